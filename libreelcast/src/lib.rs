//! Reelcast - queue-driven media publishing for Instagram and Facebook Pages
//!
//! This library provides the durable job queue, daily quotas, the token-gated
//! media server the platforms fetch from, and the per-platform publish
//! protocols tied together by the worker.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod rate_limiter;
pub mod shutdown;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialStore, CredentialUpdate, Credentials};
pub use db::Database;
pub use error::{ReelcastError, Result};
pub use media::MediaExposure;
pub use shutdown::ShutdownSignal;
pub use types::{ContentType, Job, JobOutcome, JobStatus, NewJob, Platform};
pub use worker::{CycleReport, JobResult, Worker};
