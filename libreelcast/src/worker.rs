//! The publish worker
//!
//! Strictly sequential: one job in flight at a time. Each attempt claims the
//! job, stages the file under the exposure root, mints a token, hands the
//! public URL to the platform publisher, then revokes the token and removes
//! the staged copy whatever happened.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::credentials::{CredentialStore, Credentials};
use crate::db::Database;
use crate::error::{MediaError, PlatformError, ReelcastError, Result};
use crate::media::MediaExposure;
use crate::platforms::{create_publishers, PublishRequest, Publisher, Publishers};
use crate::rate_limiter::RateLimiter;
use crate::shutdown::ShutdownSignal;
use crate::types::{Job, JobFilter, JobOutcome, JobStatus};

/// Worker knobs resolved from `[worker]`, `[library]`, and `[media]`
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub library_root: PathBuf,
    pub batch_size: u32,
    pub post_delay: Duration,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub auto_retry: bool,
    pub retry_delay: Duration,
    pub token_ttl: Duration,
    pub token_max_uses: u32,
    pub filter: JobFilter,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            library_root: config.library_root(),
            batch_size: config.worker.batch_size,
            post_delay: Duration::from_secs(config.worker.post_delay),
            poll_interval: Duration::from_secs(config.worker.poll_interval),
            stale_after: Duration::from_secs(config.worker.stale_after),
            auto_retry: config.worker.auto_retry,
            retry_delay: Duration::from_secs(config.worker.retry_delay),
            token_ttl: Duration::from_secs(config.media.token_ttl_seconds),
            token_max_uses: config.media.token_max_uses,
            filter: JobFilter::default(),
        }
    }
}

/// What happened to one job this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Posted { remote_post_id: String },
    Failed { error: String },
    /// Backing file vanished; the job is now terminal
    Skipped { reason: String },
    /// Daily quota reached; the job stays pending
    RateLimited,
    /// Another worker claimed it first
    NotClaimed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub requeued: u64,
    pub posted: u64,
    pub failed: u64,
    pub skipped: u64,
    pub rate_limited: u64,
    pub not_claimed: u64,
    /// Jobs abandoned because of a local (database) error
    pub errors: u64,
}

impl CycleReport {
    fn record(&mut self, result: &JobResult) {
        match result {
            JobResult::Posted { .. } => self.posted += 1,
            JobResult::Failed { .. } => self.failed += 1,
            JobResult::Skipped { .. } => self.skipped += 1,
            JobResult::RateLimited => self.rate_limited += 1,
            JobResult::NotClaimed => self.not_claimed += 1,
        }
    }

    pub fn attempted(&self) -> u64 {
        self.posted + self.failed
    }
}

pub struct Worker {
    db: Database,
    media: Arc<MediaExposure>,
    publishers: Publishers,
    credentials: Arc<dyn CredentialStore>,
    rate_limiter: RateLimiter,
    settings: WorkerSettings,
    shutdown: ShutdownSignal,
}

impl Worker {
    pub fn new(
        db: Database,
        media: Arc<MediaExposure>,
        publishers: Publishers,
        credentials: Arc<dyn CredentialStore>,
        rate_limiter: RateLimiter,
        settings: WorkerSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            db,
            media,
            publishers,
            credentials,
            rate_limiter,
            settings,
            shutdown,
        }
    }

    /// Wire a worker from configuration with the Graph API publishers
    pub async fn from_config(config: &Config, shutdown: ShutdownSignal) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let media = Arc::new(MediaExposure::open(config).await?);
        let publishers = create_publishers(config)?;
        let rate_limiter = RateLimiter::new(config.quota_table()?);

        Ok(Self::new(
            db.clone(),
            media,
            publishers,
            Arc::new(db),
            rate_limiter,
            WorkerSettings::from_config(config),
            shutdown,
        ))
    }

    pub fn settings_mut(&mut self) -> &mut WorkerSettings {
        &mut self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Return jobs orphaned by a crashed worker to the queue
    pub async fn recover_stale(&self) -> Result<u64> {
        let recovered = self.db.recover_stale(self.settings.stale_after).await?;
        if recovered > 0 {
            info!(recovered, "Recovered stale claimed jobs");
        }
        Ok(recovered)
    }

    /// Run until shutdown: recover once, then cycle every `poll_interval`
    pub async fn run(&self) -> Result<()> {
        info!(
            batch_size = self.settings.batch_size,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Worker starting"
        );
        self.recover_stale().await?;

        while !self.shutdown.is_triggered() {
            match self.run_cycle().await {
                Ok(report) if report != CycleReport::default() => {
                    info!(
                        posted = report.posted,
                        failed = report.failed,
                        skipped = report.skipped,
                        rate_limited = report.rate_limited,
                        requeued = report.requeued,
                        "Cycle complete"
                    );
                }
                Ok(_) => debug!("Cycle complete, nothing to do"),
                Err(e) => error!("Cycle failed: {}", e),
            }

            if !self.shutdown.sleep(self.settings.poll_interval).await {
                break;
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Process up to `batch_size` ready jobs, one at a time
    ///
    /// Rate-limited jobs stay pending and do not use up a batch slot, so an
    /// exhausted bucket at the head of the queue cannot starve the others.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        if self.settings.auto_retry {
            let cutoff = Utc::now().timestamp() - self.settings.retry_delay.as_secs() as i64;
            report.requeued = self.db.requeue_failed_before(None, Some(cutoff)).await?;
            if report.requeued > 0 {
                info!(requeued = report.requeued, "Requeued failed jobs for retry");
            }
        }

        let mut seen: HashSet<i64> = HashSet::new();
        let mut handled = 0u32;
        let mut delay_owed = false;

        'cycle: while handled < self.settings.batch_size {
            // Jobs seen this cycle may still be pending, so widen the window past them
            let window = seen.len() as u32 + (self.settings.batch_size - handled);
            let jobs = self.db.ready_jobs(window, &self.settings.filter).await?;
            let fresh: Vec<Job> = jobs.into_iter().filter(|j| !seen.contains(&j.id)).collect();
            if fresh.is_empty() {
                break;
            }

            for job in fresh {
                if self.shutdown.is_triggered() {
                    break 'cycle;
                }
                if delay_owed {
                    debug!("Waiting {}s before next post", self.settings.post_delay.as_secs());
                    if !self.shutdown.sleep(self.settings.post_delay).await {
                        break 'cycle;
                    }
                    delay_owed = false;
                }
                seen.insert(job.id);

                let span = info_span!(
                    "job",
                    job_id = job.id,
                    platform = %job.platform,
                    content_type = %job.content_type
                );

                let result = match self.process_job(&job, true).instrument(span).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(job_id = job.id, "Job processing error: {}", e);
                        report.errors += 1;
                        handled += 1;
                        if handled >= self.settings.batch_size {
                            break 'cycle;
                        }
                        continue;
                    }
                };

                report.record(&result);
                if matches!(result, JobResult::RateLimited) {
                    continue;
                }

                handled += 1;
                if handled >= self.settings.batch_size {
                    break 'cycle;
                }
                delay_owed = matches!(
                    result,
                    JobResult::Posted { .. } | JobResult::Failed { .. }
                ) && !self.settings.post_delay.is_zero();
            }
        }

        Ok(report)
    }

    /// Process one job immediately, bypassing the schedule and quota gates
    pub async fn process_job_by_id(&self, id: i64) -> Result<JobResult> {
        let job = self
            .db
            .get_job(id)
            .await?
            .ok_or_else(|| ReelcastError::InvalidInput(format!("Job {} not found", id)))?;

        if job.status != JobStatus::Pending {
            return Err(ReelcastError::InvalidInput(format!(
                "Job {} is {}, only pending jobs can be processed",
                id, job.status
            )));
        }

        let span = info_span!(
            "job",
            job_id = job.id,
            platform = %job.platform,
            content_type = %job.content_type
        );
        self.process_job(&job, false).instrument(span).await
    }

    async fn process_job(&self, job: &Job, enforce_quota: bool) -> Result<JobResult> {
        if enforce_quota {
            let limited = self
                .rate_limiter
                .would_exceed(
                    &self.db,
                    &job.account,
                    job.platform,
                    job.content_type,
                    Utc::now().timestamp(),
                )
                .await?;
            if limited {
                info!(account = %job.account, "Daily quota reached, leaving job pending");
                return Ok(JobResult::RateLimited);
            }
        }

        let source = self.settings.library_root.join(&job.file_path);
        if !source.is_file() {
            let reason = format!("File not found: {}", source.display());
            warn!("{}", reason);
            self.db.mark_skipped(job.id, &reason).await?;
            return Ok(JobResult::Skipped { reason });
        }

        if !self.db.claim(job.id).await? {
            debug!("Job already claimed elsewhere");
            return Ok(JobResult::NotClaimed);
        }

        info!(file = %job.file_path, attempt = job.attempts + 1, "Publishing");

        let outcome = match self.attempt(job, &source).await {
            Ok(remote_post_id) => {
                info!(remote_post_id = %remote_post_id, "Posted");
                JobOutcome::Posted { remote_post_id }
            }
            Err(e) => {
                let error = attempt_error_message(e);
                warn!(error = %error, "Publish failed");
                JobOutcome::Failed { error }
            }
        };

        if !self.db.complete(job.id, &outcome).await? {
            warn!("Job was no longer claimed when completing; outcome not recorded");
        }

        Ok(match outcome {
            JobOutcome::Posted { remote_post_id } => JobResult::Posted { remote_post_id },
            JobOutcome::Failed { error } => JobResult::Failed { error },
        })
    }

    /// Everything between claim and complete
    async fn attempt(&self, job: &Job, source: &Path) -> Result<String> {
        let publisher = self.publishers.get(job.platform).ok_or_else(|| {
            PlatformError::Unsupported(format!("{} publishing is not supported", job.platform))
        })?;

        let credentials = self
            .credentials
            .get_credentials(&job.account, job.platform)
            .await?
            .ok_or_else(|| {
                PlatformError::MissingCredential(format!(
                    "no credentials for {} on {}",
                    job.account, job.platform
                ))
            })?;

        let staged = self.stage(source).await?;
        let result = self
            .publish_staged(job, &staged, publisher.as_ref(), &credentials)
            .await;
        self.unstage(&staged).await;

        result
    }

    async fn publish_staged(
        &self,
        job: &Job,
        staged: &str,
        publisher: &dyn Publisher,
        credentials: &Credentials,
    ) -> Result<String> {
        let minted = self
            .media
            .mint(staged, self.settings.token_ttl, self.settings.token_max_uses)
            .await?;
        debug!(url = %minted.url, "Media exposed");

        let request = PublishRequest {
            media_url: minted.url.clone(),
            content_type: job.content_type,
            media_kind: job.media_kind(),
            caption: job.caption.clone(),
        };

        let result = tokio::select! {
            result = publisher.publish(credentials, &request) => result,
            _ = self.shutdown.cancelled() => Err(PlatformError::Interrupted.into()),
        };

        match self.media.revoke(&minted.token).await {
            Ok(_) => debug!("Media token revoked"),
            Err(e) => warn!("Failed to revoke media token: {}", e),
        }

        result
    }

    /// Copy the library file to a fresh uuid name under the exposure root
    async fn stage(&self, source: &Path) -> Result<String> {
        let name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", uuid::Uuid::new_v4(), ext.to_ascii_lowercase()),
            None => uuid::Uuid::new_v4().to_string(),
        };

        tokio::fs::copy(source, self.media.root().join(&name))
            .await
            .map_err(MediaError::Io)?;
        Ok(name)
    }

    async fn unstage(&self, staged: &str) {
        match tokio::fs::remove_file(self.media.root().join(staged)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(staged, "Failed to remove staged media: {}", e),
        }
    }
}

/// Message stored on the job for a failed attempt
///
/// Platform errors are recorded without the top-level prefix so operators
/// see e.g. "Container error: ..." directly.
fn attempt_error_message(error: ReelcastError) -> String {
    match error {
        ReelcastError::Platform(e) => e.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_error_message_strips_platform_prefix() {
        let message = attempt_error_message(PlatformError::Container("bad".to_string()).into());
        assert_eq!(message, "Container error: bad");

        let message = attempt_error_message(MediaError::NotFound("x.jpg".to_string()).into());
        assert_eq!(message, "Media error: File not found: x.jpg");
    }

    #[test]
    fn test_cycle_report_tally() {
        let mut report = CycleReport::default();
        report.record(&JobResult::Posted {
            remote_post_id: "1".to_string(),
        });
        report.record(&JobResult::Failed {
            error: "x".to_string(),
        });
        report.record(&JobResult::RateLimited);

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.rate_limited, 1);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default_config();
        config.worker.post_delay = 7;
        config.media.token_max_uses = 9;

        let settings = WorkerSettings::from_config(&config);
        assert_eq!(settings.post_delay, Duration::from_secs(7));
        assert_eq!(settings.token_max_uses, 9);
        assert_eq!(settings.batch_size, 1);
    }
}
