//! reel-send - Worker daemon for the publishing queue
//!
//! Claims ready jobs, exposes their media through a short-lived token, and
//! drives each platform's publish protocol until the job is posted or failed.

use clap::Parser;
use libreelcast::logging::LoggingConfig;
use libreelcast::types::Platform;
use libreelcast::worker::JobResult;
use libreelcast::{Config, ReelcastError, Result, ShutdownSignal, Worker};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reel-send")]
#[command(version)]
#[command(about = "Worker daemon that publishes queued media jobs")]
#[command(long_about = "\
reel-send - Worker daemon that publishes queued media jobs

DESCRIPTION:
    reel-send is a long-running worker that drains the Reelcast job queue.

    Each cycle it requeues failed jobs whose retry delay has elapsed, then
    takes up to --batch ready jobs (oldest first) and for each one:
    checks the daily quota, claims the job, stages the file under the media
    root, mints a short-lived URL token, publishes, and revokes the token.

    Jobs over quota stay pending for a later cycle. Jobs whose file has
    vanished are marked skipped. Every publish attempt counts against the
    job's attempt budget.

USAGE:
    # Run in foreground (logs to stderr)
    reel-send

    # Process one cycle and exit
    reel-send --once

    # Publish a specific job right now, ignoring schedule and quota
    reel-send --job-id 42

    # Poll every 30 seconds, three jobs per cycle
    reel-send --interval 30s --batch 3

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown. Sleeps end immediately; a publish
                      in progress is recorded as failed and its token revoked.

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml
    Queue database:     ~/.local/share/reelcast/queue.db

    [worker]
    poll_interval = 60   # seconds between cycles
    batch_size = 1       # jobs per cycle
    post_delay = 30      # seconds between posts in one cycle
    auto_retry = true
    retry_delay = 300    # seconds before a failed job is requeued

    Override with environment variables:
        REELCAST_CONFIG      - Path to config file
        REELCAST_DB_PATH     - Path to queue database
        REELCAST_LOG_FORMAT  - text, json, or pretty
        REELCAST_LOG_LEVEL   - default log level

EXIT CODES:
    0 - Clean shutdown (or job posted with --job-id)
    1 - Publish failed with --job-id, or runtime error
    2 - Configuration or database error
    3 - Invalid input (unknown job, bad flag value)
")]
struct Cli {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Time between cycles (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    #[arg(help = "Time between cycles, e.g. 30s or 5m (default: worker.poll_interval)")]
    interval: Option<Duration>,

    /// Jobs per cycle (overrides config)
    #[arg(long, value_name = "N")]
    batch: Option<u32>,

    /// Process one job by id immediately and exit
    #[arg(long, value_name = "ID", conflicts_with = "once")]
    job_id: Option<i64>,

    /// Only process jobs for this platform
    #[arg(long, value_name = "PLATFORM")]
    #[arg(help = "Only process jobs for this platform (Instagram, FB_Page, FB_Account)")]
    platform: Option<Platform>,

    /// Only process jobs for this account
    #[arg(long, value_name = "ACCOUNT")]
    account: Option<String>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("info", cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load()?;

    let shutdown = ShutdownSignal::new();
    setup_signal_handlers(shutdown.clone())?;

    let mut worker = Worker::from_config(&config, shutdown).await?;

    let settings = worker.settings_mut();
    if let Some(interval) = cli.interval {
        settings.poll_interval = interval;
    }
    if let Some(batch) = cli.batch {
        if batch == 0 {
            return Err(ReelcastError::InvalidInput(
                "--batch must be at least 1".to_string(),
            ));
        }
        settings.batch_size = batch;
    }
    settings.filter.platform = cli.platform;
    settings.filter.account = cli.account;

    if let Some(id) = cli.job_id {
        let result = worker.process_job_by_id(id).await?;
        return Ok(report_job(id, &result));
    }

    if cli.once {
        worker.recover_stale().await?;
        let report = worker.run_cycle().await?;
        println!(
            "{} posted, {} failed, {} skipped, {} rate limited, {} requeued",
            report.posted, report.failed, report.skipped, report.rate_limited, report.requeued
        );
        info!("reel-send: processed one cycle, exiting");
        return Ok(0);
    }

    worker.run().await?;
    Ok(0)
}

/// Print the outcome of a single job and pick the exit code
fn report_job(id: i64, result: &JobResult) -> i32 {
    match result {
        JobResult::Posted { remote_post_id } => {
            println!("Job {}: posted ({})", id, remote_post_id);
            0
        }
        JobResult::Failed { error } => {
            println!("Job {}: failed: {}", id, error);
            1
        }
        JobResult::Skipped { reason } => {
            println!("Job {}: skipped: {}", id, reason);
            1
        }
        JobResult::RateLimited => {
            println!("Job {}: rate limited", id);
            1
        }
        JobResult::NotClaimed => {
            println!("Job {}: claimed by another worker", id);
            1
        }
    }
}

/// Trigger `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: ShutdownSignal) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ReelcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.trigger();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: ShutdownSignal) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.trigger();
        }
    });
    Ok(())
}
