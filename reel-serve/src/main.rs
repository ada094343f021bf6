//! reel-serve - Token-gated media server
//!
//! Serves files under the media root to remote platforms at
//! `/m/{token}`, and manages tokens from the command line.

use clap::{Parser, Subcommand};
use libreelcast::logging::LoggingConfig;
use libreelcast::media::server;
use libreelcast::{Config, MediaExposure, ReelcastError, Result, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reel-serve")]
#[command(version)]
#[command(about = "Token-gated HTTP server for publishing media")]
#[command(long_about = "\
reel-serve - Token-gated HTTP server for publishing media

DESCRIPTION:
    Remote platforms fetch media by URL. reel-serve answers GET and HEAD on
    /m/{token} for files under the media root, and nothing else.

    Each token expires after a TTL and a maximum number of content fetches.
    HEAD requests and rejected ranges do not count as fetches. Range
    requests are answered with 206 Partial Content. Every response carries
    no-store caching headers.

    Put a tunnel or reverse proxy in front and set media.public_base_url to
    its public origin.

COMMANDS:
    serve    Run the HTTP server (default bind: media.bind)
    mint     Issue a token for a file and print its URL
    revoke   Delete a token
    purge    Delete expired and used-up tokens

USAGE EXAMPLES:
    # Serve on the configured address
    reel-serve serve

    # Serve on all interfaces
    reel-serve serve --bind 0.0.0.0:8787

    # Share a file for ten minutes, at most three fetches
    reel-serve mint Reels/clip.mp4 --ttl 10m --max-uses 3

CONFIGURATION:
    Configuration file: ~/.config/reelcast/config.toml

    [media]
    root = \"~/.local/share/reelcast/media_root\"
    token_db = \"~/.local/share/reelcast/tokens.db\"
    public_base_url = \"https://media.example.com\"
    bind = \"127.0.0.1:8787\"
    token_ttl_seconds = 1800
    token_max_uses = 200
    sweep_interval_seconds = 60

EXIT CODES:
    0 - Success
    1 - Media error (file missing, path outside the media root)
    2 - Configuration or database error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server until SIGINT or SIGTERM
    Serve {
        /// Address to bind (overrides media.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Issue a token for a file under the media root
    Mint {
        /// Path relative to the media root
        rel_path: String,

        /// Token lifetime (default: media.token_ttl_seconds)
        #[arg(long, value_parser = humantime::parse_duration)]
        ttl: Option<Duration>,

        /// Content fetches allowed (default: media.token_max_uses)
        #[arg(long)]
        max_uses: Option<u32>,
    },

    /// Delete a token
    Revoke { token: String },

    /// Delete expired and used-up tokens
    Purge,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    LoggingConfig::from_env(default_level, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let media = Arc::new(MediaExposure::open(&config).await?);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.media.bind.clone());

            let shutdown = ShutdownSignal::new();
            setup_signal_handlers(shutdown.clone())?;

            let sweeper = server::spawn_sweeper(
                media.clone(),
                Duration::from_secs(config.media.sweep_interval_seconds.max(1)),
                shutdown.clone(),
            );

            server::serve(media, &bind, shutdown.clone()).await?;

            shutdown.trigger();
            if sweeper.await.is_err() {
                tracing::warn!("Token sweeper ended abnormally");
            }
            info!("reel-serve stopped");
        }
        Commands::Mint {
            rel_path,
            ttl,
            max_uses,
        } => {
            let ttl = ttl.unwrap_or_else(|| Duration::from_secs(config.media.token_ttl_seconds));
            let max_uses = max_uses.unwrap_or(config.media.token_max_uses);
            if max_uses == 0 {
                return Err(ReelcastError::InvalidInput(
                    "--max-uses must be at least 1".to_string(),
                ));
            }

            let minted = media.mint(&rel_path, ttl, max_uses).await?;
            println!("{}", minted.url);
        }
        Commands::Revoke { token } => {
            if media.revoke(&token).await? {
                println!("Revoked");
            } else {
                println!("No such token");
            }
        }
        Commands::Purge => {
            let purged = media.purge_expired().await?;
            println!("Purged {} token(s)", purged);
        }
    }

    Ok(())
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
            info!(signal = sig, "Received shutdown signal, draining connections...");
            shutdown.trigger();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: ShutdownSignal) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });
    Ok(())
}
