//! Instagram publishing: create container, poll until processed, publish

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

use super::graph::{extract_id, GraphClient};
use super::{PublishRequest, Publisher};
use crate::config::{PollSettings, PublishConfig};
use crate::credentials::Credentials;
use crate::error::{PlatformError, Result};
use crate::types::{ContentType, MediaKind};

/// Processing state of an Instagram media container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Finished,
    InProgress,
    Error(String),
    Expired,
    /// Anything else the API reports; treated as still in progress
    Other(String),
}

impl ContainerStatus {
    fn from_response(value: &serde_json::Value) -> Self {
        let code = value
            .get("status_code")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match code {
            "FINISHED" => ContainerStatus::Finished,
            "IN_PROGRESS" => ContainerStatus::InProgress,
            "EXPIRED" => ContainerStatus::Expired,
            "ERROR" => ContainerStatus::Error(
                value
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Container error")
                    .to_string(),
            ),
            other => ContainerStatus::Other(other.to_string()),
        }
    }
}

pub struct InstagramPublisher {
    client: GraphClient,
    poll: HashMap<ContentType, PollSettings>,
}

impl InstagramPublisher {
    pub fn new(client: GraphClient, config: &PublishConfig) -> Self {
        let poll = ContentType::ALL
            .into_iter()
            .map(|ct| (ct, config.poll_settings(ct)))
            .collect();
        Self { client, poll }
    }

    /// Use the same poll cadence for every content type
    pub fn with_poll_settings(mut self, settings: PollSettings) -> Self {
        for value in self.poll.values_mut() {
            *value = settings;
        }
        self
    }

    fn poll_settings(&self, content_type: ContentType) -> PollSettings {
        self.poll
            .get(&content_type)
            .copied()
            .unwrap_or_else(|| PublishConfig::default().poll_settings(content_type))
    }

    /// Form parameters for the container-create call
    fn container_params<'a>(
        request: &'a PublishRequest,
    ) -> std::result::Result<Vec<(&'a str, &'a str)>, PlatformError> {
        let url = request.media_url.as_str();
        let caption = request.caption.as_deref().filter(|c| !c.is_empty());
        let is_video = request.media_kind == MediaKind::Video;

        let mut params = Vec::new();
        match request.content_type {
            ContentType::Reels => {
                if !is_video {
                    return Err(PlatformError::Unsupported(
                        "Instagram Reels require a video".to_string(),
                    ));
                }
                params.push(("video_url", url));
                params.push(("media_type", "REELS"));
                params.push(("share_to_feed", "true"));
            }
            ContentType::Stories => {
                params.push((if is_video { "video_url" } else { "image_url" }, url));
                params.push(("media_type", "STORIES"));
                // Stories take no caption
                return Ok(params);
            }
            ContentType::Feeds | ContentType::Photos if !is_video => {
                params.push(("image_url", url));
            }
            ContentType::Feeds | ContentType::Photos | ContentType::Videos => {
                params.push(("video_url", url));
                params.push(("media_type", "VIDEO"));
            }
        }

        if let Some(caption) = caption {
            params.push(("caption", caption));
        }
        Ok(params)
    }

    async fn create_container(
        &self,
        ig_user_id: &str,
        token: &SecretString,
        request: &PublishRequest,
    ) -> std::result::Result<String, PlatformError> {
        let params = Self::container_params(request)?;
        let response = self
            .client
            .post(&format!("{}/media", ig_user_id), token, &params)
            .await?;
        extract_id(&response, &["id"])
    }

    /// Poll until FINISHED, a terminal status, or the timeout
    async fn wait_for_container(
        &self,
        container_id: &str,
        token: &SecretString,
        settings: PollSettings,
    ) -> std::result::Result<(), PlatformError> {
        let started = Instant::now();

        loop {
            let response = self
                .client
                .get(container_id, token, &[("fields", "status_code,status")])
                .await?;
            let status = ContainerStatus::from_response(&response);
            debug!(container_id, ?status, "Container status");

            match status {
                ContainerStatus::Finished => return Ok(()),
                ContainerStatus::Error(message) => return Err(PlatformError::Container(message)),
                ContainerStatus::Expired => {
                    return Err(PlatformError::Container(
                        "container expired before publishing".to_string(),
                    ))
                }
                ContainerStatus::InProgress | ContainerStatus::Other(_) => {}
            }

            if started.elapsed() + settings.interval > settings.timeout {
                return Err(PlatformError::Timeout(settings.timeout.as_secs()));
            }
            tokio::time::sleep(settings.interval).await;
        }
    }

    async fn commit(
        &self,
        ig_user_id: &str,
        token: &SecretString,
        container_id: &str,
    ) -> std::result::Result<String, PlatformError> {
        let response = self
            .client
            .post(
                &format!("{}/media_publish", ig_user_id),
                token,
                &[("creation_id", container_id)],
            )
            .await?;
        extract_id(&response, &["id"])
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn name(&self) -> &str {
        "instagram"
    }

    async fn publish(&self, credentials: &Credentials, request: &PublishRequest) -> Result<String> {
        let ig_user_id = credentials
            .ig_user_id
            .as_deref()
            .ok_or_else(|| PlatformError::MissingCredential("ig_user_id".to_string()))?;
        let token = credentials
            .access_token
            .as_ref()
            .ok_or_else(|| PlatformError::MissingCredential("access_token".to_string()))?;

        let container_id = self.create_container(ig_user_id, token, request).await?;
        info!(
            container_id = %container_id,
            content_type = %request.content_type,
            "Created Instagram container, waiting for processing"
        );

        self.wait_for_container(&container_id, token, self.poll_settings(request.content_type))
            .await?;

        let media_id = self.commit(ig_user_id, token, &container_id).await?;
        info!(media_id = %media_id, "Published to Instagram");
        Ok(media_id)
    }
}
