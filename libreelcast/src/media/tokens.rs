//! Durable token table
//!
//! Every mutation is a single statement so several server processes (or a
//! server plus the worker) can share the file safely.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::db::open_sqlite;
use crate::error::{DbError, Result};

/// One row of the `tokens` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token: String,
    pub rel_path: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub uses: u32,
    pub max_uses: u32,
}

impl TokenRecord {
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at && self.uses < self.max_uses
    }
}

#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    /// Open the token database and apply its migrations
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = open_sqlite(path).await?;

        let mut migrator = sqlx::migrate!("./migrations/tokens");
        // The queue may share this file and carries its own migrations
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, record: &TokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (token, rel_path, created_at, expires_at, uses, max_uses)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.token)
        .bind(&record.rel_path)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.uses as i64)
        .bind(record.max_uses as i64)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Fetch a token row regardless of liveness
    pub async fn get(&self, token: &str) -> Result<Option<TokenRecord>> {
        let row = sqlx::query(
            "SELECT token, rel_path, created_at, expires_at, uses, max_uses FROM tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| TokenRecord {
            token: r.get("token"),
            rel_path: r.get("rel_path"),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
            uses: r.get::<i64, _>("uses") as u32,
            max_uses: r.get::<i64, _>("max_uses") as u32,
        }))
    }

    /// Charge one use if the token is still live at `now`
    ///
    /// Returns `false` when a concurrent fetch spent the last use or the
    /// token expired in between.
    pub async fn consume_use(&self, token: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tokens SET uses = uses + 1 WHERE token = ? AND uses < max_uses AND expires_at > ?",
        )
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove expired and used-up tokens
    pub async fn purge_dead(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at <= ? OR uses >= max_uses")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn count_live(&self, now: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tokens WHERE expires_at > ? AND uses < max_uses",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count)
    }
}
