//! Token-gated exposure of local media files
//!
//! The worker mints a short-lived bearer token for one file below the
//! exposure root, hands `{public_base_url}/m/{token}` to the remote
//! platform, and revokes the token once the publish attempt is over. The
//! HTTP front end lives in [`server`].

pub mod paths;
pub mod range;
pub mod server;
pub mod tokens;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{MediaError, Result};
use tokens::{TokenRecord, TokenStore};

/// Result of a successful mint
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub url: String,
    pub expires_at: i64,
}

/// A token that passed every liveness check, resolved to its file
#[derive(Debug, Clone)]
pub struct ServableFile {
    pub path: PathBuf,
    pub rel_path: String,
    pub size: u64,
}

pub struct MediaExposure {
    root: PathBuf,
    store: TokenStore,
    public_base_url: String,
}

impl MediaExposure {
    pub fn new(root: PathBuf, store: TokenStore, public_base_url: &str) -> Self {
        Self {
            root,
            store,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Open the token store and exposure root named by `[media]`
    pub async fn open(config: &Config) -> Result<Self> {
        let root = config.media_root();
        std::fs::create_dir_all(&root).map_err(MediaError::Io)?;

        let store = TokenStore::open(&config.token_db_path()).await?;
        Ok(Self::new(root, store, &config.media.public_base_url))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn public_url(&self, token: &str) -> String {
        format!("{}/m/{}", self.public_base_url, token)
    }

    /// Issue a token for `rel_path` valid for `ttl` and `max_uses` fetches
    pub async fn mint(&self, rel_path: &str, ttl: Duration, max_uses: u32) -> Result<MintedToken> {
        paths::resolve_existing(&self.root, rel_path)?;

        let now = Utc::now().timestamp();
        self.store.purge_dead(now).await?;

        let token = generate_token();
        let expires_at = now + ttl.as_secs() as i64;

        self.store
            .insert(&TokenRecord {
                token: token.clone(),
                rel_path: rel_path.to_string(),
                created_at: now,
                expires_at,
                uses: 0,
                max_uses,
            })
            .await?;

        tracing::debug!(rel_path, expires_at, max_uses, "Minted media token");

        Ok(MintedToken {
            url: self.public_url(&token),
            token,
            expires_at,
        })
    }

    /// Resolve a token to its file without charging a use
    ///
    /// Dead tokens are purged first. A live token whose file has vanished
    /// (or whose stored path no longer resolves under the root) is deleted.
    pub async fn lookup(&self, token: &str) -> Result<Option<ServableFile>> {
        let now = Utc::now().timestamp();
        self.store.purge_dead(now).await?;

        let record = match self.store.get(token).await? {
            Some(record) if record.is_live(now) => record,
            _ => return Ok(None),
        };

        match paths::resolve_existing(&self.root, &record.rel_path) {
            Ok(path) => {
                let size = tokio::fs::metadata(&path)
                    .await
                    .map_err(MediaError::Io)?
                    .len();
                Ok(Some(ServableFile {
                    path,
                    rel_path: record.rel_path,
                    size,
                }))
            }
            Err(e) => {
                tracing::info!(rel_path = %record.rel_path, error = %e, "Dropping token for unservable file");
                self.store.delete(token).await?;
                Ok(None)
            }
        }
    }

    /// Charge one content fetch against the token
    pub async fn consume_use(&self, token: &str) -> Result<bool> {
        self.store
            .consume_use(token, Utc::now().timestamp())
            .await
    }

    /// Delete the token; revoking an unknown token is not an error
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        self.store.delete(token).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_dead(Utc::now().timestamp()).await
    }

    pub async fn active_count(&self) -> Result<i64> {
        self.store.count_live(Utc::now().timestamp()).await
    }
}

/// 256 bits from the thread RNG, URL-safe base64 without padding
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
