//! Mock publisher for testing
//!
//! Records every request it receives and answers with a configured remote
//! id or error. Used by the worker tests in place of the Graph API.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{PublishRequest, Publisher};
use crate::credentials::Credentials;
use crate::error::{PlatformError, Result};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Remote id returned on success
    pub remote_id: String,

    /// When set, every publish fails with this error
    pub error: Option<PlatformError>,

    /// Delay before answering (simulates container processing)
    pub delay: Duration,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Requests received, in order
    pub requests: Arc<Mutex<Vec<PublishRequest>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            remote_id: "mock-post-1".to_string(),
            error: None,
            delay: Duration::from_millis(0),
            publish_call_count: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Always succeeds with `remote_id`
    pub fn success(remote_id: &str) -> Self {
        Self::new(MockConfig {
            remote_id: remote_id.to_string(),
            ..Default::default()
        })
    }

    /// Always fails with `error`
    pub fn failure(error: PlatformError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            ..Default::default()
        })
    }

    pub fn publish_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.config
            .requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, _credentials: &Credentials, request: &PublishRequest) -> Result<String> {
        {
            let mut count = self
                .config
                .publish_call_count
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            *count += 1;
        }
        self.config
            .requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        match &self.config.error {
            Some(error) => Err(error.clone().into()),
            None => Ok(self.config.remote_id.clone()),
        }
    }
}
