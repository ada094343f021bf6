//! Platform credentials
//!
//! One row per (account, platform) in the `credentials` table. Access
//! tokens are held as [`SecretString`] once loaded so they never end up in
//! `Debug` output or logs.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::Platform;
use crate::Database;

/// Everything a publisher needs to act on behalf of an account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: String,
    pub platform: Platform,
    pub page_id: Option<String>,
    pub ig_user_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub token_expires: Option<i64>,
}

impl Credentials {
    /// Access token with all but the last four characters masked
    pub fn redacted_token(&self) -> String {
        match &self.access_token {
            None => "(not set)".to_string(),
            Some(token) => {
                let token = token.expose_secret();
                let chars: Vec<char> = token.chars().collect();
                if chars.len() <= 8 {
                    "****".to_string()
                } else {
                    let tail: String = chars[chars.len() - 4..].iter().collect();
                    format!("****{}", tail)
                }
            }
        }
    }
}

/// Partial update for [`Database::upsert_credentials`]
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub page_id: Option<String>,
    pub ig_user_id: Option<String>,
    pub access_token: Option<String>,
    pub token_expires: Option<i64>,
}

/// Source of credentials for the worker
///
/// Implemented by [`Database`]; tests substitute an in-memory map.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credentials(&self, account: &str, platform: Platform)
        -> Result<Option<Credentials>>;
}

#[async_trait]
impl CredentialStore for Database {
    async fn get_credentials(
        &self,
        account: &str,
        platform: Platform,
    ) -> Result<Option<Credentials>> {
        let row = sqlx::query(
            r#"
            SELECT account, page_id, ig_user_id, access_token, token_expires
            FROM credentials
            WHERE account = ? AND platform = ? AND is_active = 1
            "#,
        )
        .bind(account)
        .bind(platform.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| Credentials {
            account: r.get("account"),
            platform,
            page_id: r.get("page_id"),
            ig_user_id: r.get("ig_user_id"),
            access_token: r
                .get::<Option<String>, _>("access_token")
                .map(SecretString::from),
            token_expires: r.get("token_expires"),
        }))
    }
}

impl Database {
    /// Insert or merge credentials for an account
    pub async fn upsert_credentials(
        &self,
        account: &str,
        platform: Platform,
        update: &CredentialUpdate,
    ) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO credentials
                (account, platform, page_id, ig_user_id, access_token, token_expires,
                 created_at, updated_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(account, platform) DO UPDATE SET
                page_id       = COALESCE(excluded.page_id, credentials.page_id),
                ig_user_id    = COALESCE(excluded.ig_user_id, credentials.ig_user_id),
                access_token  = COALESCE(excluded.access_token, credentials.access_token),
                token_expires = COALESCE(excluded.token_expires, credentials.token_expires),
                updated_at    = excluded.updated_at,
                is_active     = 1
            "#,
        )
        .bind(account)
        .bind(platform.as_str())
        .bind(&update.page_id)
        .bind(&update.ig_user_id)
        .bind(&update.access_token)
        .bind(update.token_expires)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(DbError::SqlxError)?;

        tracing::info!(account, platform = %platform, "Credentials updated");
        Ok(())
    }
}
