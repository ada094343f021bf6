//! Facebook Page publishing
//!
//! Photos and videos are single calls. Reels go through the three-phase
//! `video_reels` upload (start, transfer, finish) but never need polling.

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::info;

use super::graph::{extract_id, GraphClient};
use super::{PublishRequest, Publisher};
use crate::credentials::Credentials;
use crate::error::{PlatformError, Result};
use crate::types::{ContentType, MediaKind};

pub struct FacebookPagePublisher {
    client: GraphClient,
}

impl FacebookPagePublisher {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn post_photo(
        &self,
        page_id: &str,
        token: &SecretString,
        request: &PublishRequest,
    ) -> std::result::Result<String, PlatformError> {
        let mut params = vec![("url", request.media_url.as_str())];
        if let Some(caption) = caption_of(request) {
            params.push(("caption", caption));
        }

        let response = self
            .client
            .post(&format!("{}/photos", page_id), token, &params)
            .await?;
        extract_id(&response, &["id", "post_id"])
    }

    async fn post_video(
        &self,
        page_id: &str,
        token: &SecretString,
        request: &PublishRequest,
    ) -> std::result::Result<String, PlatformError> {
        let mut params = vec![("file_url", request.media_url.as_str())];
        if let Some(caption) = caption_of(request) {
            params.push(("description", caption));
        }

        let response = self
            .client
            .post(&format!("{}/videos", page_id), token, &params)
            .await?;
        extract_id(&response, &["id"])
    }

    async fn post_reel(
        &self,
        page_id: &str,
        token: &SecretString,
        request: &PublishRequest,
    ) -> std::result::Result<String, PlatformError> {
        let endpoint = format!("{}/video_reels", page_id);

        let started = self
            .client
            .post(&endpoint, token, &[("upload_phase", "start")])
            .await?;
        let video_id = extract_id(&started, &["video_id"])?;

        self.client
            .post(
                &endpoint,
                token,
                &[
                    ("upload_phase", "transfer"),
                    ("video_id", video_id.as_str()),
                    ("file_url", request.media_url.as_str()),
                ],
            )
            .await?;

        let mut finish = vec![
            ("upload_phase", "finish"),
            ("video_id", video_id.as_str()),
            ("video_state", "PUBLISHED"),
        ];
        if let Some(caption) = caption_of(request) {
            finish.push(("description", caption));
        }
        self.client.post(&endpoint, token, &finish).await?;

        Ok(video_id)
    }
}

fn caption_of(request: &PublishRequest) -> Option<&str> {
    request.caption.as_deref().filter(|c| !c.is_empty())
}

#[async_trait]
impl Publisher for FacebookPagePublisher {
    fn name(&self) -> &str {
        "facebook-page"
    }

    async fn publish(&self, credentials: &Credentials, request: &PublishRequest) -> Result<String> {
        let page_id = credentials
            .page_id
            .as_deref()
            .ok_or_else(|| PlatformError::MissingCredential("page_id".to_string()))?;
        let token = credentials
            .access_token
            .as_ref()
            .ok_or_else(|| PlatformError::MissingCredential("access_token".to_string()))?;

        let is_video = request.media_kind == MediaKind::Video;
        let post_id = match (request.content_type, is_video) {
            (ContentType::Reels, true) => self.post_reel(page_id, token, request).await?,
            (ContentType::Photos | ContentType::Feeds | ContentType::Stories, false) => {
                self.post_photo(page_id, token, request).await?
            }
            (ContentType::Videos | ContentType::Feeds | ContentType::Stories, true) => {
                self.post_video(page_id, token, request).await?
            }
            (content_type, _) => {
                let kind = if is_video { "video" } else { "image" };
                return Err(PlatformError::Unsupported(format!(
                    "FB_Page {} cannot be published from a {} file",
                    content_type, kind
                ))
                .into());
            }
        };

        info!(post_id = %post_id, content_type = %request.content_type, "Published to Facebook Page");
        Ok(post_id)
    }
}
