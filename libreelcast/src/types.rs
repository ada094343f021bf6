//! Core types for Reelcast

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::ReelcastError;

/// Destination platform of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "Instagram")]
    Instagram,
    #[serde(rename = "FB_Page")]
    FacebookPage,
    #[serde(rename = "FB_Account")]
    FacebookAccount,
}

impl Platform {
    pub const ALL: [Platform; 3] = [
        Platform::Instagram,
        Platform::FacebookPage,
        Platform::FacebookAccount,
    ];

    /// Name as stored in the database and used in folder names
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::FacebookPage => "FB_Page",
            Platform::FacebookAccount => "FB_Account",
        }
    }
}

impl FromStr for Platform {
    type Err = ReelcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Instagram" | "instagram" => Ok(Platform::Instagram),
            "FB_Page" | "fb_page" => Ok(Platform::FacebookPage),
            "FB_Account" | "fb_account" => Ok(Platform::FacebookAccount),
            _ => Err(ReelcastError::InvalidInput(format!(
                "Unknown platform '{}'. Valid platforms: Instagram, FB_Page, FB_Account",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of post; each (platform, content type) pair has its own daily quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentType {
    Feeds,
    Photos,
    Reels,
    Stories,
    Videos,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Feeds,
        ContentType::Photos,
        ContentType::Reels,
        ContentType::Stories,
        ContentType::Videos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Feeds => "Feeds",
            ContentType::Photos => "Photos",
            ContentType::Reels => "Reels",
            ContentType::Stories => "Stories",
            ContentType::Videos => "Videos",
        }
    }
}

impl FromStr for ContentType {
    type Err = ReelcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::ALL
            .into_iter()
            .find(|ct| ct.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                ReelcastError::InvalidInput(format!(
                    "Unknown content type '{}'. Valid types: Feeds, Photos, Reels, Stories, Videos",
                    s
                ))
            })
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a media file is a still image or a video, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("mp4" | "mov" | "avi" | "mkv" | "webm") => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Claimed,
    Posted,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Posted => "posted",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    /// `posted` and `skipped` jobs never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Posted | JobStatus::Skipped)
    }
}

impl FromStr for JobStatus {
    type Err = ReelcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "claimed" => Ok(JobStatus::Claimed),
            "posted" => Ok(JobStatus::Posted),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            _ => Err(ReelcastError::InvalidInput(format!(
                "Unknown job status '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of "publish this file to this account"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub detected_at: i64,
    pub account: String,
    pub platform: Platform,
    pub content_type: ContentType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub claimed_at: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub posted_at: Option<i64>,
    pub remote_post_id: Option<String>,
    pub error_message: Option<String>,
    pub caption: Option<String>,
    pub scheduled_for: Option<i64>,
}

impl Job {
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_path(Path::new(&self.file_path))
    }
}

/// Job creation request as produced by the scanner
#[derive(Debug, Clone)]
pub struct NewJob {
    pub file_path: String,
    pub account: String,
    pub platform: Platform,
    pub content_type: ContentType,
    pub caption: Option<String>,
    pub scheduled_for: Option<i64>,
    pub file_size: Option<i64>,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(
        file_path: impl Into<String>,
        account: impl Into<String>,
        platform: Platform,
        content_type: ContentType,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            account: account.into(),
            platform,
            content_type,
            caption: None,
            scheduled_for: None,
            file_size: None,
            max_attempts: 3,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn scheduled_for(mut self, timestamp: i64) -> Self {
        self.scheduled_for = Some(timestamp);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Result of one completed publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Posted { remote_post_id: String },
    Failed { error: String },
}

/// Optional narrowing of `ready_jobs`
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub platform: Option<Platform>,
    pub account: Option<String>,
}

/// Queue overview used by `reel-queue stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub by_status: BTreeMap<String, i64>,
    pub by_platform: BTreeMap<String, i64>,
    pub posted_24h: i64,
}

/// One row of the job audit log
#[derive(Debug, Clone, Serialize)]
pub struct JobLogEntry {
    pub job_id: i64,
    pub timestamp: i64,
    pub action: String,
    pub details: Option<String>,
}
