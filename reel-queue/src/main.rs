//! reel-queue - Inspect and maintain the publishing queue
//!
//! Unix-style tool for operators: queue statistics, listings, manual
//! recovery, and credential management.

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use libreelcast::types::{ContentType, Job, JobFilter, NewJob, Platform};
use libreelcast::{Config, CredentialStore, CredentialUpdate, Database, ReelcastError, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "reel-queue")]
#[command(version)]
#[command(about = "Inspect and maintain the publishing queue")]
#[command(long_about = "\
reel-queue - Inspect and maintain the publishing queue

DESCRIPTION:
    reel-queue is a Unix-style tool for managing the Reelcast job queue.
    Use it to look at what is waiting, inspect a job's history, recover
    from crashes, requeue failures, and store platform credentials.

COMMANDS:
    stats           Counts by status and platform, posts in the last 24h
    pending         Jobs ready to publish now, oldest first
    scheduled       Pending jobs with a future publish time
    show            One job with its audit log
    recover-stale   Return orphaned claimed jobs to pending
    requeue-failed  Return failed jobs to pending
    clear-pending   Delete every pending job so the library can be rescanned
    enqueue         Add a job by hand
    credentials     Set or show credentials for an account

USAGE EXAMPLES:
    # Queue overview
    reel-queue stats

    # Jobs ready for Instagram, as JSON
    reel-queue pending --platform Instagram --format json

    # Everything scheduled over the next three days
    reel-queue scheduled --within 3days

    # Recover jobs claimed more than ten minutes ago
    reel-queue recover-stale --older-than 10m

    # Store a page token
    reel-queue credentials set US/alice FB_Page --page-id 1234 --access-token EAAB...

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml
    Queue database:     ~/.local/share/reelcast/queue.db

    Override with environment variables:
        REELCAST_CONFIG    - Path to config file
        REELCAST_DB_PATH   - Path to queue database

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (unknown job, bad platform, bad time format)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List jobs ready to publish now
    Pending {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by platform
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Filter by account
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum number of jobs to list
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },

    /// List pending jobs that have a publish time
    Scheduled {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only jobs due within this window (e.g. "2days", "12h")
        #[arg(short, long, value_parser = humantime::parse_duration)]
        within: Option<Duration>,
    },

    /// Show a job and its audit log
    Show {
        /// Job ID
        id: i64,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Return claimed jobs older than the threshold to pending
    RecoverStale {
        /// Claim age threshold (default: worker.stale_after)
        #[arg(long, value_parser = humantime::parse_duration)]
        older_than: Option<Duration>,
    },

    /// Return failed jobs to pending
    RequeueFailed {
        /// Only requeue jobs with fewer than this many attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Delete all pending jobs
    ClearPending {
        /// Required; there is no undo
        #[arg(long)]
        force: bool,
    },

    /// Add a job to the queue
    Enqueue {
        /// File path relative to the library root
        file_path: String,

        /// Account, e.g. US/alice
        #[arg(long)]
        account: String,

        /// Instagram, FB_Page, or FB_Account
        #[arg(long)]
        platform: Platform,

        /// Feeds, Photos, Reels, Stories, or Videos
        #[arg(long)]
        content_type: ContentType,

        /// Caption text
        #[arg(long)]
        caption: Option<String>,

        /// Publish no earlier than this time (RFC 3339, e.g. "2026-01-02 15:00:00")
        #[arg(long, value_parser = humantime::parse_rfc3339_weak)]
        at: Option<SystemTime>,

        /// Attempt budget (default: worker.max_attempts)
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Manage platform credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CredentialCommands {
    /// Create or update credentials; omitted fields keep their stored value
    Set {
        account: String,
        platform: Platform,

        #[arg(long)]
        page_id: Option<String>,

        #[arg(long)]
        ig_user_id: Option<String>,

        /// Access token (or set REELCAST_ACCESS_TOKEN)
        #[arg(long, env = "REELCAST_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// Token expiry as a Unix timestamp
        #[arg(long)]
        token_expires: Option<i64>,
    },

    /// Show credentials with the token redacted
    Show { account: String, platform: Platform },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libreelcast::logging::LoggingConfig::from_env("error", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::Stats { format } => cmd_stats(&db, &format).await,
        Commands::Pending {
            format,
            platform,
            account,
            limit,
        } => {
            let filter = JobFilter { platform, account };
            cmd_pending(&db, &format, &filter, limit).await
        }
        Commands::Scheduled { format, within } => cmd_scheduled(&db, &format, within).await,
        Commands::Show { id, format } => cmd_show(&db, id, &format).await,
        Commands::RecoverStale { older_than } => {
            let threshold =
                older_than.unwrap_or_else(|| Duration::from_secs(config.worker.stale_after));
            let recovered = db.recover_stale(threshold).await?;
            println!("Recovered {} stale job(s)", recovered);
            Ok(())
        }
        Commands::RequeueFailed { max_attempts } => {
            let requeued = db.requeue_failed(max_attempts).await?;
            println!("Requeued {} failed job(s)", requeued);
            Ok(())
        }
        Commands::ClearPending { force } => {
            if !force {
                return Err(ReelcastError::InvalidInput(
                    "clear-pending deletes every pending job; pass --force to confirm".to_string(),
                ));
            }
            let deleted = db.clear_pending().await?;
            println!("Deleted {} pending job(s)", deleted);
            Ok(())
        }
        Commands::Enqueue {
            file_path,
            account,
            platform,
            content_type,
            caption,
            at,
            max_attempts,
        } => {
            let mut job = NewJob::new(&file_path, account, platform, content_type)
                .with_max_attempts(max_attempts.unwrap_or(config.worker.max_attempts));
            if let Some(caption) = caption {
                job = job.with_caption(caption);
            }
            if let Some(at) = at {
                job = job.scheduled_for(unix_seconds(at)?);
            }
            if let Ok(metadata) = std::fs::metadata(config.library_root().join(&file_path)) {
                job.file_size = Some(metadata.len() as i64);
            }
            if job.max_attempts == 0 {
                return Err(ReelcastError::InvalidInput(
                    "--max-attempts must be at least 1".to_string(),
                ));
            }

            match db.enqueue(&job).await? {
                Some(id) => println!("{}", id),
                None => println!("Already queued: {}", file_path),
            }
            Ok(())
        }
        Commands::Credentials { action } => cmd_credentials(&db, action).await,
    }
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(ReelcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ReelcastError::InvalidInput(format!("Failed to serialize output: {}", e)))
}

async fn cmd_stats(db: &Database, format: &str) -> Result<()> {
    check_format(format)?;
    let stats = db.stats().await?;

    if format == "json" {
        println!("{}", to_json(&stats)?);
        return Ok(());
    }

    let total: i64 = stats.by_status.values().sum();
    println!("Total jobs: {}", total);
    println!();
    println!("By status:");
    for (status, count) in &stats.by_status {
        println!("  {:<8} {}", status, count);
    }
    println!();
    println!("By platform:");
    for (platform, count) in &stats.by_platform {
        println!("  {:<10} {}", platform, count);
    }
    println!();
    println!("Posted in last 24h: {}", stats.posted_24h);
    Ok(())
}

async fn cmd_pending(db: &Database, format: &str, filter: &JobFilter, limit: u32) -> Result<()> {
    check_format(format)?;
    let jobs = db.ready_jobs(limit, filter).await?;
    print_jobs(&jobs, format)
}

async fn cmd_scheduled(db: &Database, format: &str, within: Option<Duration>) -> Result<()> {
    check_format(format)?;
    let jobs = db.scheduled_jobs(within).await?;
    print_jobs(&jobs, format)
}

fn print_jobs(jobs: &[Job], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", to_json(&jobs)?);
        return Ok(());
    }

    for job in jobs {
        let when = job
            .scheduled_for
            .map(format_timestamp)
            .unwrap_or_else(|| "now".to_string());
        println!(
            "{} | {} | {} | {} | {} | {}",
            job.id, job.account, job.platform, job.content_type, job.file_path, when
        );
    }
    Ok(())
}

async fn cmd_show(db: &Database, id: i64, format: &str) -> Result<()> {
    check_format(format)?;
    let job = db
        .get_job(id)
        .await?
        .ok_or_else(|| ReelcastError::InvalidInput(format!("Job {} not found", id)))?;
    let log = db.job_log(id).await?;

    if format == "json" {
        let value = serde_json::json!({ "job": job, "log": log });
        println!("{}", to_json(&value)?);
        return Ok(());
    }

    println!("Job {}", job.id);
    println!("  file:      {}", job.file_path);
    println!("  account:   {}", job.account);
    println!("  platform:  {}", job.platform);
    println!("  type:      {}", job.content_type);
    println!("  status:    {}", job.status);
    println!("  attempts:  {}/{}", job.attempts, job.max_attempts);
    if let Some(ts) = job.scheduled_for {
        println!("  scheduled: {}", format_timestamp(ts));
    }
    if let Some(ts) = job.posted_at {
        println!("  posted:    {}", format_timestamp(ts));
    }
    if let Some(remote) = &job.remote_post_id {
        println!("  remote id: {}", remote);
    }
    if let Some(error) = &job.error_message {
        println!("  error:     {}", error);
    }

    if !log.is_empty() {
        println!();
        println!("History:");
        for entry in &log {
            match &entry.details {
                Some(details) => println!(
                    "  {} {:<10} {}",
                    format_timestamp(entry.timestamp),
                    entry.action,
                    details
                ),
                None => println!("  {} {}", format_timestamp(entry.timestamp), entry.action),
            }
        }
    }
    Ok(())
}

async fn cmd_credentials(db: &Database, action: CredentialCommands) -> Result<()> {
    match action {
        CredentialCommands::Set {
            account,
            platform,
            page_id,
            ig_user_id,
            access_token,
            token_expires,
        } => {
            let update = CredentialUpdate {
                page_id,
                ig_user_id,
                access_token,
                token_expires,
            };
            db.upsert_credentials(&account, platform, &update).await?;
            println!("Credentials saved for {} on {}", account, platform);
            Ok(())
        }
        CredentialCommands::Show { account, platform } => {
            let credentials = db
                .get_credentials(&account, platform)
                .await?
                .ok_or_else(|| {
                    ReelcastError::InvalidInput(format!(
                        "No credentials for {} on {}",
                        account, platform
                    ))
                })?;

            println!("account:       {}", credentials.account);
            println!("platform:      {}", credentials.platform);
            println!(
                "page_id:       {}",
                credentials.page_id.as_deref().unwrap_or("(not set)")
            );
            println!(
                "ig_user_id:    {}",
                credentials.ig_user_id.as_deref().unwrap_or("(not set)")
            );
            println!("access_token:  {}", credentials.redacted_token());
            match credentials.token_expires {
                Some(ts) => println!("token_expires: {}", format_timestamp(ts)),
                None => println!("token_expires: (not set)"),
            }
            Ok(())
        }
    }
}

fn unix_seconds(time: SystemTime) -> Result<i64> {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|_| ReelcastError::InvalidInput("Time is before 1970".to_string()))
}

fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}
