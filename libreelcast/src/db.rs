//! Job queue persistence
//!
//! All cross-process coordination happens here through single-statement
//! conditional updates; there is no separate lock manager.

use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{
    ContentType, Job, JobFilter, JobLogEntry, JobOutcome, JobStatus, NewJob, Platform, QueueStats,
};

const JOB_COLUMNS: &str = "id, file_path, file_size, detected_at, account, platform, \
    content_type, status, attempts, max_attempts, claimed_at, last_attempt_at, posted_at, \
    remote_post_id, error_message, caption, scheduled_for";

/// Open (creating if needed) a SQLite database file in WAL mode
///
/// Shared by the job queue and the media token store so both tolerate a
/// second process writing to the same file.
pub async fn open_sqlite(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(pool)
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the queue database and apply migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded = crate::config::expand_path(db_path);
        let pool = open_sqlite(&expanded).await?;

        let mut migrator = sqlx::migrate!("./migrations/queue");
        // The token store may share this file and carries its own migrations
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a job unless its file path is already queued
    ///
    /// Returns the new id, or `None` when the path already exists.
    pub async fn enqueue(&self, job: &NewJob) -> Result<Option<i64>> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs
                (file_path, file_size, detected_at, account, platform, content_type,
                 max_attempts, caption, scheduled_for)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO NOTHING
            "#,
        )
        .bind(&job.file_path)
        .bind(job.file_size)
        .bind(now)
        .bind(&job.account)
        .bind(job.platform.as_str())
        .bind(job.content_type.as_str())
        .bind(job.max_attempts as i64)
        .bind(&job.caption)
        .bind(job.scheduled_for)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let id = result.last_insert_rowid();
        self.log_action(id, "enqueued", Some(&job.file_path)).await?;
        Ok(Some(id))
    }

    /// Get a single job by id
    pub async fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let query = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Jobs eligible for an attempt right now, oldest first
    pub async fn ready_jobs(&self, limit: u32, filter: &JobFilter) -> Result<Vec<Job>> {
        self.ready_jobs_at(limit, filter, Utc::now().timestamp()).await
    }

    async fn ready_jobs_at(&self, limit: u32, filter: &JobFilter, now: i64) -> Result<Vec<Job>> {
        let mut where_clauses = vec![
            "status = 'pending'",
            "attempts < max_attempts",
            "(scheduled_for IS NULL OR scheduled_for <= ?)",
        ];
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if filter.account.is_some() {
            where_clauses.push("account = ?");
        }

        let query_str = format!(
            "SELECT {} FROM jobs WHERE {} ORDER BY detected_at ASC, id ASC LIMIT ?",
            JOB_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str).bind(now);
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(account) = &filter.account {
            query = query.bind(account);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Transfer ownership of a pending job to the caller
    ///
    /// Returns `false` if another claimant got there first, the job is no
    /// longer pending, or its attempt budget is spent.
    pub async fn claim(&self, id: i64) -> Result<bool> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'claimed', claimed_at = ?
            WHERE id = ? AND status = 'pending' AND attempts < max_attempts
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let claimed = result.rows_affected() == 1;
        if claimed {
            self.log_action(id, "claimed", None).await?;
        }
        Ok(claimed)
    }

    /// Record the outcome of an attempt on a claimed job
    ///
    /// Both outcomes charge one attempt. Returns `false` if the job was not
    /// in the `claimed` state (e.g. it was recovered as stale meanwhile).
    pub async fn complete(&self, id: i64, outcome: &JobOutcome) -> Result<bool> {
        let now = Utc::now().timestamp();

        let result = match outcome {
            JobOutcome::Posted { remote_post_id } => sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'posted', posted_at = ?, remote_post_id = ?, error_message = NULL,
                    attempts = attempts + 1, last_attempt_at = ?, claimed_at = NULL
                WHERE id = ? AND status = 'claimed'
                "#,
            )
            .bind(now)
            .bind(remote_post_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?,
            JobOutcome::Failed { error } => sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', error_message = ?,
                    attempts = attempts + 1, last_attempt_at = ?, claimed_at = NULL
                WHERE id = ? AND status = 'claimed'
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?,
        };

        let completed = result.rows_affected() == 1;
        if completed {
            let (action, details) = match outcome {
                JobOutcome::Posted { remote_post_id } => ("posted", remote_post_id),
                JobOutcome::Failed { error } => ("failed", error),
            };
            self.log_action(id, action, Some(details)).await?;
        }
        Ok(completed)
    }

    /// Mark a pending job whose backing file vanished; terminal
    pub async fn mark_skipped(&self, id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'skipped', error_message = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let skipped = result.rows_affected() == 1;
        if skipped {
            self.log_action(id, "skipped", Some(reason)).await?;
        }
        Ok(skipped)
    }

    /// Return jobs orphaned in `claimed` for longer than `threshold` to the queue
    ///
    /// Attempts are not charged; the claimant never finished.
    pub async fn recover_stale(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - threshold.as_secs() as i64;
        self.recover_stale_before(cutoff).await
    }

    /// Recover claimed jobs whose `claimed_at` is strictly before `cutoff`
    pub async fn recover_stale_before(&self, cutoff: i64) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', claimed_at = NULL
            WHERE status = 'claimed' AND claimed_at < ?
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        for row in &rows {
            let id: i64 = row.get("id");
            self.log_action(id, "recovered", None).await?;
        }
        Ok(rows.len() as u64)
    }

    /// Put failed jobs back in the queue
    ///
    /// `max_attempts` overrides each job's own budget when given.
    pub async fn requeue_failed(&self, max_attempts: Option<u32>) -> Result<u64> {
        self.requeue_failed_before(max_attempts, None).await
    }

    /// Requeue failed jobs whose last attempt was at or before `cutoff`
    pub async fn requeue_failed_before(
        &self,
        max_attempts: Option<u32>,
        cutoff: Option<i64>,
    ) -> Result<u64> {
        let mut where_clauses = vec!["status = 'failed'"];
        where_clauses.push(if max_attempts.is_some() {
            "attempts < ?"
        } else {
            "attempts < max_attempts"
        });
        if cutoff.is_some() {
            where_clauses.push("last_attempt_at <= ?");
        }

        let query_str = format!(
            "UPDATE jobs SET status = 'pending' WHERE {}",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(max) = max_attempts {
            query = query.bind(max as i64);
        }
        if let Some(cutoff) = cutoff {
            query = query.bind(cutoff);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }

    /// Delete every pending job so the scanner can re-add them
    pub async fn clear_pending(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE status = 'pending'")
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }

    /// Pending jobs with a schedule, soonest first
    ///
    /// With `within`, only jobs due between now and now + `within`.
    pub async fn scheduled_jobs(&self, within: Option<Duration>) -> Result<Vec<Job>> {
        let now = Utc::now().timestamp();

        let rows = match within {
            Some(window) => {
                let query = format!(
                    "SELECT {} FROM jobs WHERE status = 'pending' AND scheduled_for IS NOT NULL \
                     AND scheduled_for BETWEEN ? AND ? ORDER BY scheduled_for ASC",
                    JOB_COLUMNS
                );
                sqlx::query(&query)
                    .bind(now)
                    .bind(now + window.as_secs() as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM jobs WHERE status = 'pending' AND scheduled_for IS NOT NULL \
                     ORDER BY scheduled_for ASC",
                    JOB_COLUMNS
                );
                sqlx::query(&query).fetch_all(&self.pool).await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Successful publishes for one quota bucket since `since`
    pub async fn posted_count_since(
        &self,
        account: &str,
        platform: Platform,
        content_type: ContentType,
        since: i64,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE account = ? AND platform = ? AND content_type = ?
              AND status = 'posted' AND posted_at >= ?
            "#,
        )
        .bind(account)
        .bind(platform.as_str())
        .bind(content_type.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count as u32)
    }

    /// Counts by status and platform plus recent throughput
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        for row in rows {
            stats.by_status.insert(row.get("status"), row.get("count"));
        }

        let rows = sqlx::query("SELECT platform, COUNT(*) AS count FROM jobs GROUP BY platform")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        for row in rows {
            stats.by_platform.insert(row.get("platform"), row.get("count"));
        }

        let since = Utc::now().timestamp() - 86_400;
        stats.posted_24h = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status = 'posted' AND posted_at > ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(stats)
    }

    /// Audit trail for one job, oldest first
    pub async fn job_log(&self, job_id: i64) -> Result<Vec<JobLogEntry>> {
        let rows = sqlx::query(
            "SELECT job_id, timestamp, action, details FROM job_log WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| JobLogEntry {
                job_id: r.get("job_id"),
                timestamp: r.get("timestamp"),
                action: r.get("action"),
                details: r.get("details"),
            })
            .collect())
    }

    async fn log_action(&self, job_id: i64, action: &str, details: Option<&str>) -> Result<()> {
        sqlx::query("INSERT INTO job_log (job_id, timestamp, action, details) VALUES (?, ?, ?, ?)")
            .bind(job_id)
            .bind(Utc::now().timestamp())
            .bind(action)
            .bind(details)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

fn job_from_row(r: &SqliteRow) -> Result<Job> {
    let corrupt = |field: &str, value: String| DbError::CorruptRow(format!("{}={}", field, value));

    let platform: String = r.get("platform");
    let content_type: String = r.get("content_type");
    let status: String = r.get("status");

    Ok(Job {
        id: r.get("id"),
        file_path: r.get("file_path"),
        file_size: r.get("file_size"),
        detected_at: r.get("detected_at"),
        account: r.get("account"),
        platform: platform
            .parse()
            .map_err(|_| corrupt("platform", platform.clone()))?,
        content_type: content_type
            .parse()
            .map_err(|_| corrupt("content_type", content_type.clone()))?,
        status: status
            .parse::<JobStatus>()
            .map_err(|_| corrupt("status", status.clone()))?,
        attempts: r.get::<i64, _>("attempts") as u32,
        max_attempts: r.get::<i64, _>("max_attempts") as u32,
        claimed_at: r.get("claimed_at"),
        last_attempt_at: r.get("last_attempt_at"),
        posted_at: r.get("posted_at"),
        remote_post_id: r.get("remote_post_id"),
        error_message: r.get("error_message"),
        caption: r.get("caption"),
        scheduled_for: r.get("scheduled_for"),
    })
}
