//! Daily publish quotas
//!
//! Prevents over-posting by counting successful publishes per
//! (account, platform, content type) since local midnight. Nothing is
//! recorded here; the `posted` rows in the job table are the ledger.

use chrono::{Local, TimeZone};
use std::collections::{BTreeMap, HashMap};

use crate::error::{ConfigError, Result};
use crate::types::{ContentType, Platform};
use crate::Database;

/// Daily ceilings per (platform, content type)
///
/// Pairs without an entry are unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaTable {
    ceilings: HashMap<(Platform, ContentType), u32>,
}

impl QuotaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests
    pub fn with(mut self, platform: Platform, content_type: ContentType, ceiling: u32) -> Self {
        self.ceilings.insert((platform, content_type), ceiling);
        self
    }

    /// Parse the `[rate_limits.<Platform>]` tables from the config file
    pub fn from_config(raw: &BTreeMap<String, BTreeMap<String, u32>>) -> Result<Self> {
        let mut table = Self::new();

        for (platform_name, entries) in raw {
            let platform: Platform =
                platform_name
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: "rate_limits".to_string(),
                        message: format!("unknown platform '{}'", platform_name),
                    })?;

            for (type_name, ceiling) in entries {
                let content_type: ContentType =
                    type_name.parse().map_err(|_| ConfigError::InvalidValue {
                        field: format!("rate_limits.{}", platform_name),
                        message: format!("unknown content type '{}'", type_name),
                    })?;
                table.ceilings.insert((platform, content_type), *ceiling);
            }
        }

        Ok(table)
    }

    pub fn ceiling(&self, platform: Platform, content_type: ContentType) -> Option<u32> {
        self.ceilings.get(&(platform, content_type)).copied()
    }
}

/// Rate limiter for platform posting
#[derive(Debug, Clone)]
pub struct RateLimiter {
    quotas: QuotaTable,
}

impl RateLimiter {
    pub fn new(quotas: QuotaTable) -> Self {
        Self { quotas }
    }

    /// Check whether one more publish would exceed today's ceiling
    ///
    /// Returns Ok(true) if the job must wait. Failed attempts never count.
    pub async fn would_exceed(
        &self,
        db: &Database,
        account: &str,
        platform: Platform,
        content_type: ContentType,
        now: i64,
    ) -> Result<bool> {
        let limit = match self.quotas.ceiling(platform, content_type) {
            Some(l) => l,
            None => return Ok(false), // No limit configured, allow
        };

        let since = local_day_start(now);
        let count = db
            .posted_count_since(account, platform, content_type, since)
            .await?;

        if count >= limit {
            tracing::debug!(
                account,
                platform = %platform,
                content_type = %content_type,
                count,
                limit,
                "Daily quota reached"
            );
        }

        Ok(count >= limit)
    }
}

/// Unix timestamp of the most recent local midnight at or before `now`
pub fn local_day_start(now: i64) -> i64 {
    Local
        .timestamp_opt(now, 0)
        .single()
        .and_then(|t| t.date_naive().and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|t| t.timestamp())
        .unwrap_or(now - now.rem_euclid(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobOutcome, NewJob};
    use tempfile::TempDir;

    async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (temp_dir, db)
    }

    async fn post_job(
        db: &Database,
        path: &str,
        account: &str,
        platform: Platform,
        content_type: ContentType,
    ) -> i64 {
        let id = db
            .enqueue(&NewJob::new(path, account, platform, content_type))
            .await
            .unwrap()
            .unwrap();
        assert!(db.claim(id).await.unwrap());
        db.complete(
            id,
            &JobOutcome::Posted {
                remote_post_id: format!("remote-{}", id),
            },
        )
        .await
        .unwrap();
        id
    }

    fn reels_limit(ceiling: u32) -> RateLimiter {
        RateLimiter::new(QuotaTable::new().with(Platform::Instagram, ContentType::Reels, ceiling))
    }

    #[tokio::test]
    async fn test_allows_under_limit() {
        let (_temp, db) = setup_test_db().await;
        let limiter = reels_limit(2);
        let now = chrono::Utc::now().timestamp();

        post_job(&db, "a.mp4", "US/alice", Platform::Instagram, ContentType::Reels).await;

        let blocked = limiter
            .would_exceed(&db, "US/alice", Platform::Instagram, ContentType::Reels, now)
            .await
            .unwrap();
        assert!(!blocked);
    }

    #[tokio::test]
    async fn test_blocks_at_ceiling() {
        let (_temp, db) = setup_test_db().await;
        let limiter = reels_limit(2);
        let now = chrono::Utc::now().timestamp();

        post_job(&db, "a.mp4", "US/alice", Platform::Instagram, ContentType::Reels).await;
        post_job(&db, "b.mp4", "US/alice", Platform::Instagram, ContentType::Reels).await;

        let blocked = limiter
            .would_exceed(&db, "US/alice", Platform::Instagram, ContentType::Reels, now)
            .await
            .unwrap();
        assert!(blocked);
    }

    #[tokio::test]
    async fn test_failures_do_not_count() {
        let (_temp, db) = setup_test_db().await;
        let limiter = reels_limit(1);
        let now = chrono::Utc::now().timestamp();

        let id = db
            .enqueue(&NewJob::new("a.mp4", "US/alice", Platform::Instagram, ContentType::Reels))
            .await
            .unwrap()
            .unwrap();
        db.claim(id).await.unwrap();
        db.complete(
            id,
            &JobOutcome::Failed {
                error: "API error: nope".to_string(),
            },
        )
        .await
        .unwrap();

        let blocked = limiter
            .would_exceed(&db, "US/alice", Platform::Instagram, ContentType::Reels, now)
            .await
            .unwrap();
        assert!(!blocked);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let (_temp, db) = setup_test_db().await;
        let limiter = RateLimiter::new(
            QuotaTable::new()
                .with(Platform::Instagram, ContentType::Reels, 1)
                .with(Platform::Instagram, ContentType::Stories, 1)
                .with(Platform::FacebookPage, ContentType::Reels, 1),
        );
        let now = chrono::Utc::now().timestamp();

        post_job(&db, "a.mp4", "US/alice", Platform::Instagram, ContentType::Reels).await;

        let check = |account: &'static str, platform, content_type| {
            let limiter = limiter.clone();
            let db = db.clone();
            async move {
                limiter
                    .would_exceed(&db, account, platform, content_type, now)
                    .await
                    .unwrap()
            }
        };

        assert!(check("US/alice", Platform::Instagram, ContentType::Reels).await);
        assert!(!check("US/bob", Platform::Instagram, ContentType::Reels).await);
        assert!(!check("US/alice", Platform::Instagram, ContentType::Stories).await);
        assert!(!check("US/alice", Platform::FacebookPage, ContentType::Reels).await);
    }

    #[tokio::test]
    async fn test_no_ceiling_means_unlimited() {
        let (_temp, db) = setup_test_db().await;
        let limiter = RateLimiter::new(QuotaTable::new());
        let now = chrono::Utc::now().timestamp();

        for i in 0..5 {
            post_job(
                &db,
                &format!("{}.jpg", i),
                "US/alice",
                Platform::FacebookAccount,
                ContentType::Photos,
            )
            .await;
        }

        let blocked = limiter
            .would_exceed(&db, "US/alice", Platform::FacebookAccount, ContentType::Photos, now)
            .await
            .unwrap();
        assert!(!blocked);
    }

    #[tokio::test]
    async fn test_yesterdays_posts_do_not_count() {
        let (_temp, db) = setup_test_db().await;
        let limiter = reels_limit(1);
        let now = chrono::Utc::now().timestamp();

        let id = post_job(&db, "old.mp4", "US/alice", Platform::Instagram, ContentType::Reels).await;
        sqlx::query("UPDATE jobs SET posted_at = ? WHERE id = ?")
            .bind(local_day_start(now) - 60)
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let blocked = limiter
            .would_exceed(&db, "US/alice", Platform::Instagram, ContentType::Reels, now)
            .await
            .unwrap();
        assert!(!blocked);
    }

    #[test]
    fn test_local_day_start_is_midnight() {
        let now = chrono::Utc::now().timestamp();
        let start = local_day_start(now);

        assert!(start <= now);
        assert!(now - start < 25 * 3600);

        let midnight = Local.timestamp_opt(start, 0).single().unwrap();
        assert_eq!(midnight.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn test_from_config_rejects_unknown_names() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "Instagram".to_string(),
            BTreeMap::from([("Shorts".to_string(), 3)]),
        );
        assert!(QuotaTable::from_config(&raw).is_err());

        let mut raw = BTreeMap::new();
        raw.insert("TikTok".to_string(), BTreeMap::new());
        assert!(QuotaTable::from_config(&raw).is_err());
    }
}
