//! Worker workflow tests against a real queue and token store
//!
//! Platforms are replaced by `MockPublisher`; everything else (SQLite,
//! staging, minting, revocation) runs for real in a temp directory.

use anyhow::Result;
use libreelcast::config::{PollSettings, PublishConfig};
use libreelcast::credentials::CredentialUpdate;
use libreelcast::error::PlatformError;
use libreelcast::media::tokens::TokenStore;
use libreelcast::media::MediaExposure;
use libreelcast::platforms::graph::GraphClient;
use libreelcast::platforms::instagram::InstagramPublisher;
use libreelcast::platforms::mock::{MockConfig, MockPublisher};
use libreelcast::platforms::Publishers;
use libreelcast::rate_limiter::{QuotaTable, RateLimiter};
use libreelcast::types::{ContentType, JobFilter, JobOutcome, JobStatus, NewJob, Platform};
use libreelcast::worker::{CycleReport, JobResult, WorkerSettings};
use libreelcast::{Database, ShutdownSignal, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCOUNT: &str = "US/alice";

struct Harness {
    _temp_dir: TempDir,
    db: Database,
    media: Arc<MediaExposure>,
    library: PathBuf,
}

impl Harness {
    async fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let library = temp_dir.path().join("library");
        let media_root = temp_dir.path().join("media_root");
        std::fs::create_dir_all(&library)?;
        std::fs::create_dir_all(&media_root)?;

        let db = Database::new(&temp_dir.path().join("queue.db").to_string_lossy()).await?;
        let store = TokenStore::open(&temp_dir.path().join("tokens.db")).await?;
        let media = Arc::new(MediaExposure::new(media_root, store, "http://127.0.0.1:8787"));

        db.upsert_credentials(
            ACCOUNT,
            Platform::Instagram,
            &CredentialUpdate {
                ig_user_id: Some("17841400000000".to_string()),
                access_token: Some("ig-token".to_string()),
                ..Default::default()
            },
        )
        .await?;
        db.upsert_credentials(
            ACCOUNT,
            Platform::FacebookAccount,
            &CredentialUpdate {
                access_token: Some("fb-token".to_string()),
                ..Default::default()
            },
        )
        .await?;

        Ok(Self {
            _temp_dir: temp_dir,
            db,
            media,
            library,
        })
    }

    fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            library_root: self.library.clone(),
            batch_size: 10,
            post_delay: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(300),
            auto_retry: false,
            retry_delay: Duration::from_secs(300),
            token_ttl: Duration::from_secs(60),
            token_max_uses: 5,
            filter: JobFilter::default(),
        }
    }

    fn worker(&self, publisher: Arc<MockPublisher>, quotas: QuotaTable) -> Worker {
        self.worker_with_shutdown(publisher, quotas, ShutdownSignal::new())
    }

    fn worker_with_shutdown(
        &self,
        publisher: Arc<MockPublisher>,
        quotas: QuotaTable,
        shutdown: ShutdownSignal,
    ) -> Worker {
        let publishers = Publishers::new()
            .with(Platform::Instagram, publisher.clone())
            .with(Platform::FacebookPage, publisher);
        self.worker_with_publishers(publishers, quotas, shutdown)
    }

    fn worker_with_publishers(
        &self,
        publishers: Publishers,
        quotas: QuotaTable,
        shutdown: ShutdownSignal,
    ) -> Worker {
        Worker::new(
            self.db.clone(),
            self.media.clone(),
            publishers,
            Arc::new(self.db.clone()),
            RateLimiter::new(quotas),
            self.settings(),
            shutdown,
        )
    }

    /// Write a library file and enqueue it
    async fn add_job(&self, rel: &str, content_type: ContentType) -> Result<i64> {
        let path = self.library.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"media bytes")?;

        let job = NewJob::new(rel, ACCOUNT, Platform::Instagram, content_type)
            .with_caption("caption text");
        Ok(self.db.enqueue(&job).await?.expect("new job"))
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.media.root()).unwrap().count()
    }
}

fn token_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn test_successful_publish_records_remote_id() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("Instagram/Reels/clip.mp4", ContentType::Reels).await?;
    let mock = Arc::new(MockPublisher::success("ig-media-1"));

    let report = harness
        .worker(mock.clone(), QuotaTable::new())
        .run_cycle()
        .await?;

    assert_eq!(report.posted, 1);
    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Posted);
    assert_eq!(job.remote_post_id.as_deref(), Some("ig-media-1"));
    assert_eq!(job.attempts, 1);

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].media_url.starts_with("http://127.0.0.1:8787/m/"));
    assert_eq!(requests[0].caption.as_deref(), Some("caption text"));

    // Token revoked and staged copy removed
    assert_eq!(harness.media.active_count().await?, 0);
    assert_eq!(harness.staged_files(), 0);
    Ok(())
}

#[tokio::test]
async fn test_container_error_fails_job_and_still_revokes() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("Instagram/Reels/clip.mp4", ContentType::Reels).await?;
    let mock = Arc::new(MockPublisher::failure(PlatformError::Container(
        "Media upload has failed with error code 2207026".to_string(),
    )));

    let report = harness
        .worker(mock.clone(), QuotaTable::new())
        .run_cycle()
        .await?;

    assert_eq!(report.failed, 1);
    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Container error: Media upload has failed with error code 2207026")
    );

    let requests = mock.requests();
    let url = &requests[0].media_url;
    assert!(harness
        .media
        .store()
        .get(token_from_url(url))
        .await?
        .is_none());
    assert_eq!(harness.media.active_count().await?, 0);
    assert_eq!(harness.staged_files(), 0);
    Ok(())
}

#[tokio::test]
async fn test_graph_container_error_revokes_minted_token() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("Instagram/Reels/clip.mp4", ContentType::Reels).await?;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/17841400000000/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "container-9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/container-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status_code": "ERROR",
            "status": "Error: Media upload has failed with error code 2207026"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/17841400000000/media_publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "never"})))
        .expect(0)
        .mount(&server)
        .await;

    let client = GraphClient::new(&server.uri(), Duration::from_secs(5))?;
    let instagram = InstagramPublisher::new(client, &PublishConfig::default()).with_poll_settings(
        PollSettings {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        },
    );
    let publishers = Publishers::new().with(Platform::Instagram, Arc::new(instagram));

    let report = harness
        .worker_with_publishers(publishers, QuotaTable::new(), ShutdownSignal::new())
        .run_cycle()
        .await?;

    assert_eq!(report.failed, 1);
    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Container error: Error: Media upload has failed with error code 2207026")
    );

    // The URL handed to the Graph API points at a token that no longer exists
    let received = server.received_requests().await.unwrap_or_default();
    let create = received
        .iter()
        .find(|r| r.url.path() == "/17841400000000/media")
        .expect("container create request");
    let body = String::from_utf8_lossy(&create.body).to_string();
    let token = body
        .split('&')
        .find_map(|pair| pair.strip_prefix("video_url="))
        .and_then(|url| url.rsplit("%2F").next())
        .expect("video_url parameter");
    assert_eq!(token.len(), 43);
    assert!(harness.media.store().get(token).await?.is_none());

    assert_eq!(harness.media.active_count().await?, 0);
    assert_eq!(harness.staged_files(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_job_stays_pending() -> Result<()> {
    let harness = Harness::new().await?;

    // Two photos already posted today
    for name in ["a.jpg", "b.jpg"] {
        let id = harness.add_job(name, ContentType::Photos).await?;
        assert!(harness.db.claim(id).await?);
        harness
            .db
            .complete(
                id,
                &JobOutcome::Posted {
                    remote_post_id: format!("old-{}", name),
                },
            )
            .await?;
    }
    let third = harness.add_job("c.jpg", ContentType::Photos).await?;

    let mock = Arc::new(MockPublisher::success("never"));
    let quotas = QuotaTable::new().with(Platform::Instagram, ContentType::Photos, 2);
    let report = harness.worker(mock.clone(), quotas).run_cycle().await?;

    assert_eq!(report.rate_limited, 1);
    assert_eq!(mock.publish_count(), 0);

    let job = harness.db.get_job(third).await?.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    Ok(())
}

#[tokio::test]
async fn test_quota_is_per_content_type() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("story.jpg", ContentType::Stories).await?;

    let mock = Arc::new(MockPublisher::success("story-1"));
    let quotas = QuotaTable::new().with(Platform::Instagram, ContentType::Photos, 0);
    let report = harness.worker(mock, quotas).run_cycle().await?;

    assert_eq!(report.posted, 1);
    assert_eq!(
        harness.db.get_job(id).await?.unwrap().status,
        JobStatus::Posted
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_skipped() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness
        .db
        .enqueue(&NewJob::new(
            "gone.mp4",
            ACCOUNT,
            Platform::Instagram,
            ContentType::Reels,
        ))
        .await?
        .unwrap();

    let mock = Arc::new(MockPublisher::success("never"));
    let report = harness
        .worker(mock.clone(), QuotaTable::new())
        .run_cycle()
        .await?;

    assert_eq!(report.skipped, 1);
    assert_eq!(mock.publish_count(), 0);

    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert!(job.error_message.unwrap().starts_with("File not found"));
    assert_eq!(job.attempts, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_fail_without_publishing() -> Result<()> {
    let harness = Harness::new().await?;
    std::fs::write(harness.library.join("p.jpg"), b"jpeg")?;
    let id = harness
        .db
        .enqueue(&NewJob::new(
            "p.jpg",
            "UK/nobody",
            Platform::Instagram,
            ContentType::Photos,
        ))
        .await?
        .unwrap();

    let mock = Arc::new(MockPublisher::success("never"));
    harness
        .worker(mock.clone(), QuotaTable::new())
        .run_cycle()
        .await?;

    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("Missing credential"));
    assert_eq!(mock.publish_count(), 0);
    assert_eq!(harness.staged_files(), 0);
    Ok(())
}

#[tokio::test]
async fn test_platform_without_publisher_fails_as_unsupported() -> Result<()> {
    let harness = Harness::new().await?;
    std::fs::write(harness.library.join("p.jpg"), b"jpeg")?;
    let id = harness
        .db
        .enqueue(&NewJob::new(
            "p.jpg",
            ACCOUNT,
            Platform::FacebookAccount,
            ContentType::Photos,
        ))
        .await?
        .unwrap();

    let mock = Arc::new(MockPublisher::success("never"));
    harness.worker(mock, QuotaTable::new()).run_cycle().await?;

    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Unsupported: FB_Account publishing is not supported")
    );
    Ok(())
}

#[tokio::test]
async fn test_auto_retry_exhausts_attempt_budget() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("clip.mp4", ContentType::Reels).await?;
    let mock = Arc::new(MockPublisher::failure(PlatformError::Network(
        "connection reset".to_string(),
    )));

    let mut worker = harness.worker(mock.clone(), QuotaTable::new());
    worker.settings_mut().auto_retry = true;
    worker.settings_mut().retry_delay = Duration::ZERO;

    for _ in 0..5 {
        worker.run_cycle().await?;
    }

    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(mock.publish_count(), 3);
    assert!(harness
        .db
        .ready_jobs(10, &JobFilter::default())
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_retry_waits_for_delay() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("clip.mp4", ContentType::Reels).await?;
    let mock = Arc::new(MockPublisher::failure(PlatformError::Api("nope".to_string())));

    let mut worker = harness.worker(mock.clone(), QuotaTable::new());
    worker.settings_mut().auto_retry = true;
    worker.settings_mut().retry_delay = Duration::from_secs(3600);

    worker.run_cycle().await?;
    let second = worker.run_cycle().await?;

    assert_eq!(second.requeued, 0);
    assert_eq!(mock.publish_count(), 1);
    assert_eq!(
        harness.db.get_job(id).await?.unwrap().status,
        JobStatus::Failed
    );
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_publish_and_revokes() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("clip.mp4", ContentType::Reels).await?;
    let mock = Arc::new(MockPublisher::new(MockConfig {
        delay: Duration::from_secs(30),
        ..Default::default()
    }));

    let shutdown = ShutdownSignal::new();
    let worker = harness.worker_with_shutdown(mock, QuotaTable::new(), shutdown.clone());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), worker.run_cycle()).await??;

    assert_eq!(report.failed, 1);
    let job = harness.db.get_job(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("Interrupted by shutdown"));
    assert_eq!(harness.media.active_count().await?, 0);
    assert_eq!(harness.staged_files(), 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_processes_oldest_first() -> Result<()> {
    let harness = Harness::new().await?;
    let first = harness.add_job("1.jpg", ContentType::Photos).await?;
    let second = harness.add_job("2.jpg", ContentType::Photos).await?;
    let third = harness.add_job("3.jpg", ContentType::Photos).await?;

    let mock = Arc::new(MockPublisher::success("x"));
    let mut worker = harness.worker(mock.clone(), QuotaTable::new());
    worker.settings_mut().batch_size = 2;

    let report = worker.run_cycle().await?;

    assert_eq!(report.posted, 2);
    assert_eq!(harness.db.get_job(first).await?.unwrap().status, JobStatus::Posted);
    assert_eq!(harness.db.get_job(second).await?.unwrap().status, JobStatus::Posted);
    assert_eq!(harness.db.get_job(third).await?.unwrap().status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_bucket_does_not_block_batch() -> Result<()> {
    let harness = Harness::new().await?;

    // Oldest job sits in a bucket with no quota left today
    let blocked = harness.add_job("reel.mp4", ContentType::Reels).await?;
    let story = harness.add_job("story.jpg", ContentType::Stories).await?;
    let later = harness.add_job("story2.jpg", ContentType::Stories).await?;

    let mock = Arc::new(MockPublisher::success("story-1"));
    let quotas = QuotaTable::new().with(Platform::Instagram, ContentType::Reels, 0);
    let mut worker = harness.worker(mock.clone(), quotas);
    worker.settings_mut().batch_size = 1;

    let report = worker.run_cycle().await?;

    assert_eq!(report.rate_limited, 1);
    assert_eq!(report.posted, 1);
    assert_eq!(mock.publish_count(), 1);
    assert_eq!(harness.db.get_job(blocked).await?.unwrap().status, JobStatus::Pending);
    assert_eq!(harness.db.get_job(story).await?.unwrap().status, JobStatus::Posted);
    assert_eq!(harness.db.get_job(later).await?.unwrap().status, JobStatus::Pending);

    // Only the exhausted bucket is left over once the others drain
    let report = worker.run_cycle().await?;
    assert_eq!(report.posted, 1);
    let report = worker.run_cycle().await?;
    assert_eq!(report.posted, 0);
    assert_eq!(report.rate_limited, 1);
    Ok(())
}

#[tokio::test]
async fn test_process_job_by_id_ignores_schedule() -> Result<()> {
    let harness = Harness::new().await?;
    std::fs::write(harness.library.join("later.jpg"), b"jpeg")?;
    let tomorrow = chrono::Utc::now().timestamp() + 86_400;
    let id = harness
        .db
        .enqueue(
            &NewJob::new("later.jpg", ACCOUNT, Platform::Instagram, ContentType::Photos)
                .scheduled_for(tomorrow),
        )
        .await?
        .unwrap();

    let mock = Arc::new(MockPublisher::success("now-1"));
    let worker = harness.worker(mock, QuotaTable::new());

    let report = worker.run_cycle().await?;
    assert_eq!(report, CycleReport::default());

    let result = worker.process_job_by_id(id).await?;
    assert_eq!(
        result,
        JobResult::Posted {
            remote_post_id: "now-1".to_string()
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_process_job_by_id_rejects_unknown_and_finished_jobs() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("a.jpg", ContentType::Photos).await?;
    let worker = harness.worker(Arc::new(MockPublisher::success("x")), QuotaTable::new());

    assert!(worker.process_job_by_id(9999).await.is_err());

    worker.process_job_by_id(id).await?;
    let again = worker.process_job_by_id(id).await;
    assert!(again.is_err());
    Ok(())
}

#[tokio::test]
async fn test_startup_recovery_reclaims_orphans() -> Result<()> {
    let harness = Harness::new().await?;
    let id = harness.add_job("clip.mp4", ContentType::Reels).await?;
    assert!(harness.db.claim(id).await?);

    sqlx::query("UPDATE jobs SET claimed_at = claimed_at - 3600 WHERE id = ?")
        .bind(id)
        .execute(harness.db.pool())
        .await?;

    let worker = harness.worker(Arc::new(MockPublisher::success("x")), QuotaTable::new());
    assert_eq!(worker.recover_stale().await?, 1);

    let report = worker.run_cycle().await?;
    assert_eq!(report.posted, 1);
    assert_eq!(harness.db.get_job(id).await?.unwrap().attempts, 1);
    Ok(())
}
