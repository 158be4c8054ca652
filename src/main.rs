//! jukebot - main entry point
//!
//! Wires the core components together (no ambient globals: everything is
//! constructed here and passed by reference) and serves the dashboard API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jukebot::admission::{AdmissionConfig, PrioritySet, RateLimiter};
use jukebot::api::{self, AppContext};
use jukebot::commands::Commands;
use jukebot::config::Config;
use jukebot::db::{self, settings};
use jukebot::events::EventBus;
use jukebot::playback::{PlaybackConfig, PlaybackEngine};
use jukebot::prefetch::{ExternalDownloader, HttpResolver, PrefetchConfig, PrefetchPipeline, TrackResolver};
use jukebot::queue::QueueStore;
use jukebot::state::SharedState;

/// Command-line arguments for jukebot
#[derive(Parser, Debug)]
#[command(name = "jukebot")]
#[command(about = "Chat-driven music request daemon")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5840", env = "JUKEBOT_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "jukebot.db", env = "JUKEBOT_DB")]
    db_path: PathBuf,

    /// Directory for downloaded media
    #[arg(short, long, default_value = "media", env = "JUKEBOT_MEDIA_DIR")]
    media_dir: PathBuf,

    /// Base URL of the search/metadata resolver service
    #[arg(long, default_value = "http://127.0.0.1:5841", env = "JUKEBOT_RESOLVER_URL")]
    resolver_url: String,

    /// External downloader binary
    #[arg(long, default_value = "yt-dlp", env = "JUKEBOT_DOWNLOADER")]
    downloader: String,

    /// Additional priority (VIP) user id; repeatable
    #[arg(long = "priority-user")]
    priority_users: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jukebot=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config {
        port: args.port,
        db_path: args.db_path,
        media_dir: args.media_dir,
        resolver_url: args.resolver_url,
        downloader_bin: args.downloader,
    };

    info!("Starting jukebot on port {}", config.port);

    std::fs::create_dir_all(&config.media_dir)
        .with_context(|| format!("Failed to create media dir {}", config.media_dir.display()))?;

    let db = db::init_database(&config.db_path)
        .await
        .context("Failed to initialize database")?;

    // Runtime-tunable settings live in the database
    let admission_config = AdmissionConfig {
        enabled: settings::rate_limit_enabled(&db).await?,
        max_requests: settings::rate_limit_max_requests(&db).await?,
        window_seconds: settings::rate_limit_window_seconds(&db).await?,
    };
    let prefetch_config = PrefetchConfig {
        prefetch_next: settings::prefetch_next(&db).await?,
        prefetch_count: settings::prefetch_count(&db).await?,
    };
    let playback_config = PlaybackConfig {
        transition_delay: Duration::from_millis(settings::skip_transition_delay_ms(&db).await?),
        cleanup_after_play: settings::cleanup_after_play(&db).await?,
        ..PlaybackConfig::default()
    };

    let mut vip = settings::priority_users(&db).await?;
    vip.extend(args.priority_users);
    let priority = Arc::new(PrioritySet::new(vip));

    let events = Arc::new(EventBus::default());
    let state = Arc::new(SharedState::new(events));

    let queue = Arc::new(QueueStore::new(db.clone()));
    queue
        .load()
        .await
        .context("Failed to load queue from database")?;

    let limiter = Arc::new(RateLimiter::new(
        db.clone(),
        admission_config,
        Arc::clone(&priority),
    ));
    limiter.load().await?;
    limiter.spawn_sweeper(Duration::from_secs(60));

    let resolver: Arc<dyn TrackResolver> = Arc::new(HttpResolver::new(&config.resolver_url));
    let downloader = Arc::new(ExternalDownloader::new(&config.downloader_bin));

    let prefetch = Arc::new(PrefetchPipeline::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        Arc::clone(&resolver),
        downloader,
        config.media_dir.clone(),
        prefetch_config,
    ));
    prefetch.spawn_cleanup_sweeper(Duration::from_secs(300));

    let engine = Arc::new(PlaybackEngine::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        Arc::clone(&prefetch),
        Arc::clone(&priority),
        playback_config,
    ));
    engine.spawn_progress_reporter(Duration::from_secs(1));

    // Resume whatever the last run left pending
    if !queue.is_empty().await {
        info!("Resuming {} pending tracks from last session", queue.len().await);
        prefetch.trigger();
        engine.kick();
    }

    let commands = Arc::new(Commands::new(
        Arc::clone(&limiter),
        Arc::clone(&queue),
        Arc::clone(&prefetch),
        Arc::clone(&engine),
        resolver,
        Arc::clone(&state),
    ));

    let ctx = AppContext {
        commands,
        state,
        queue,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    api::server::run(ctx, addr, shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
