//! Configuration management for Reelcast

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::rate_limiter::QuotaTable;
use crate::types::ContentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub media: MediaConfig,
    pub worker: WorkerConfig,
    /// Daily ceilings keyed by platform, then content type
    pub rate_limits: BTreeMap<String, BTreeMap<String, u32>>,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Where the scanner's job paths are rooted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Exposure root; tokens may only reference files below it
    pub root: String,
    pub token_db: String,
    /// Public origin the remote platform fetches from (e.g. a tunnel hostname)
    pub public_base_url: String,
    pub bind: String,
    pub token_ttl_seconds: u64,
    pub token_max_uses: u32,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between cycles
    pub poll_interval: u64,
    pub batch_size: u32,
    /// Seconds between two publish attempts in the same cycle
    pub post_delay: u64,
    /// Seconds after which a claimed job is considered orphaned
    pub stale_after: u64,
    pub max_attempts: u32,
    pub auto_retry: bool,
    /// Seconds a failed job waits before automatic requeue
    pub retry_delay: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub graph_api_base: String,
    pub request_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub poll_timeout_seconds: u64,
    pub content_types: BTreeMap<String, PollOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollOverride {
    pub poll_interval_seconds: Option<u64>,
    pub poll_timeout_seconds: Option<u64>,
}

/// Container polling cadence for one content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/reelcast/queue.db".to_string(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: "~/reelcast".to_string(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "~/.local/share/reelcast/media_root".to_string(),
            token_db: "~/.local/share/reelcast/tokens.db".to_string(),
            public_base_url: "http://127.0.0.1:8787".to_string(),
            bind: "127.0.0.1:8787".to_string(),
            token_ttl_seconds: 1800,
            token_max_uses: 200,
            sweep_interval_seconds: 60,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            batch_size: 1,
            post_delay: 30,
            stale_after: 300,
            max_attempts: 3,
            auto_retry: true,
            retry_delay: 300,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        let mut content_types = BTreeMap::new();
        // Still images finish processing quickly
        content_types.insert(
            "Photos".to_string(),
            PollOverride {
                poll_interval_seconds: None,
                poll_timeout_seconds: Some(60),
            },
        );

        Self {
            graph_api_base: "https://graph.facebook.com/v21.0".to_string(),
            request_timeout_seconds: 120,
            poll_interval_seconds: 10,
            poll_timeout_seconds: 300,
            content_types,
        }
    }
}

impl PublishConfig {
    /// Resolve poll settings for a content type, falling back to the globals
    pub fn poll_settings(&self, content_type: ContentType) -> PollSettings {
        let overrides = self
            .content_types
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(content_type.as_str()))
            .map(|(_, o)| o.clone())
            .unwrap_or_default();

        PollSettings {
            interval: Duration::from_secs(
                overrides
                    .poll_interval_seconds
                    .unwrap_or(self.poll_interval_seconds),
            ),
            timeout: Duration::from_secs(
                overrides
                    .poll_timeout_seconds
                    .unwrap_or(self.poll_timeout_seconds),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file at the default location yields the built-in defaults;
    /// a missing file named by `REELCAST_CONFIG` is an error.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("REELCAST_CONFIG").is_some();
        let config_path = resolve_config_path()?;

        let mut config = if !explicit && !config_path.exists() {
            tracing::debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            Self::default_config()
        } else {
            Self::load_from_path(&config_path)?
        };

        if let Ok(db_path) = std::env::var("REELCAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig::default(),
            library: LibraryConfig::default(),
            media: MediaConfig::default(),
            worker: WorkerConfig::default(),
            rate_limits: default_rate_limits(),
            publish: PublishConfig::default(),
        }
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.batch_size == 0 {
            return Err(invalid("worker.batch_size", "must be at least 1"));
        }
        if self.worker.max_attempts == 0 {
            return Err(invalid("worker.max_attempts", "must be at least 1"));
        }
        if self.media.token_max_uses == 0 {
            return Err(invalid("media.token_max_uses", "must be at least 1"));
        }
        if self.media.token_ttl_seconds == 0 {
            return Err(invalid("media.token_ttl_seconds", "must be at least 1"));
        }
        if self.publish.poll_interval_seconds == 0 {
            return Err(invalid("publish.poll_interval_seconds", "must be at least 1"));
        }
        for (name, overrides) in &self.publish.content_types {
            name.parse::<ContentType>().map_err(|_| {
                invalid(
                    "publish.content_types",
                    &format!("unknown content type '{}'", name),
                )
            })?;
            if overrides.poll_interval_seconds == Some(0) {
                return Err(invalid(
                    &format!("publish.content_types.{}.poll_interval_seconds", name),
                    "must be at least 1",
                ));
            }
        }
        self.quota_table()?;
        Ok(())
    }

    /// Parse the `[rate_limits]` section into a typed table
    pub fn quota_table(&self) -> Result<QuotaTable> {
        QuotaTable::from_config(&self.rate_limits)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database.path)
    }

    pub fn library_root(&self) -> PathBuf {
        expand_path(&self.library.root)
    }

    pub fn media_root(&self) -> PathBuf {
        expand_path(&self.media.root)
    }

    pub fn token_db_path(&self) -> PathBuf {
        expand_path(&self.media.token_db)
    }
}

/// Daily ceilings per account, as tuned for the Graph API
fn default_rate_limits() -> BTreeMap<String, BTreeMap<String, u32>> {
    let instagram = [
        ("Feeds", 2),
        ("Photos", 2),
        ("Reels", 2),
        ("Stories", 10),
        ("Videos", 2),
    ];
    let fb_page = [
        ("Feeds", 10),
        ("Photos", 10),
        ("Reels", 5),
        ("Stories", 10),
        ("Videos", 5),
    ];

    let to_map = |entries: [(&str, u32); 5]| {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>()
    };

    let mut limits = BTreeMap::new();
    limits.insert("Instagram".to_string(), to_map(instagram));
    limits.insert("FB_Page".to_string(), to_map(fb_page));
    limits
}

fn invalid(field: &str, message: &str) -> crate::error::ReelcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Expand a leading `~` to the home directory; `$VARS` are left as written
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REELCAST_CONFIG") {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("reelcast").join("config.toml"))
}
