//! Publishing adaptors
//!
//! Each destination platform implements [`Publisher`]: given a public media
//! URL it drives the platform's protocol and returns the remote post id.
//! Instagram uses the three-phase create, poll, commit flow; Facebook Pages
//! are single-shot (Reels use a fixed three-call upload without polling).
//!
//! ```no_run
//! use libreelcast::config::Config;
//! use libreelcast::platforms::create_publishers;
//! use libreelcast::types::Platform;
//!
//! # fn example() -> libreelcast::error::Result<()> {
//! let config = Config::load()?;
//! let publishers = create_publishers(&config)?;
//! assert!(publishers.get(Platform::Instagram).is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::types::{ContentType, MediaKind, Platform};

pub mod facebook;
pub mod graph;
pub mod instagram;

// Available outside tests so integration tests and binaries can use it
pub mod mock;

/// What to publish and where the platform can fetch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub media_url: String,
    pub content_type: ContentType,
    pub media_kind: MediaKind,
    pub caption: Option<String>,
}

/// One platform family's publish protocol
///
/// Implementations must not retry internally; a failed attempt is
/// reported and the job's retry budget decides what happens next.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Publish and return the remote post id
    ///
    /// # Errors
    ///
    /// Returns `PlatformError` for missing credentials, API rejections,
    /// container failures, and poll timeouts.
    async fn publish(&self, credentials: &Credentials, request: &PublishRequest) -> Result<String>;
}

/// Publishers keyed by the platform they serve
#[derive(Clone, Default)]
pub struct Publishers {
    by_platform: HashMap<Platform, Arc<dyn Publisher>>,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, publisher: Arc<dyn Publisher>) -> Self {
        self.by_platform.insert(platform, publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.by_platform.get(&platform).cloned()
    }
}

/// Build the Graph API publishers from configuration
///
/// `FB_Account` has no publisher; jobs for it fail as unsupported.
pub fn create_publishers(config: &Config) -> Result<Publishers> {
    let client = graph::GraphClient::new(
        &config.publish.graph_api_base,
        Duration::from_secs(config.publish.request_timeout_seconds),
    )?;

    Ok(Publishers::new()
        .with(
            Platform::Instagram,
            Arc::new(instagram::InstagramPublisher::new(
                client.clone(),
                &config.publish,
            )),
        )
        .with(
            Platform::FacebookPage,
            Arc::new(facebook::FacebookPagePublisher::new(client)),
        ))
}
