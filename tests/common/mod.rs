//! Shared test fixture: in-memory database, stub resolver/downloader doubles,
//! and fully wired core components.

#![allow(dead_code)]

use async_trait::async_trait;
use jukebot::admission::{AdmissionConfig, PrioritySet, RateLimiter};
use jukebot::commands::Commands;
use jukebot::error::{Error, Result};
use jukebot::events::JukeEvent;
use jukebot::playback::{PlaybackConfig, PlaybackEngine};
use jukebot::prefetch::{MediaDownloader, PrefetchConfig, PrefetchPipeline, ResolvedTrack, TrackResolver};
use jukebot::queue::QueueStore;
use jukebot::state::SharedState;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Resolver double: deterministic URLs for search terms, fixed duration
pub struct StubResolver {
    /// Duration reported by metadata lookups
    pub duration_ms: Option<u64>,
    /// When set, resolve() fails (resolution-failure tests)
    pub fail_resolve: bool,
}

impl Default for StubResolver {
    fn default() -> Self {
        Self {
            duration_ms: Some(60_000),
            fail_resolve: false,
        }
    }
}

#[async_trait]
impl TrackResolver for StubResolver {
    async fn resolve(&self, source_ref: &str) -> Result<ResolvedTrack> {
        if self.fail_resolve {
            return Err(Error::Resolution("stub resolver failure".to_string()));
        }
        let slug = source_ref.trim().replace(' ', "-");
        Ok(ResolvedTrack {
            url: format!("https://stub.example/{}", slug),
            title: Some(source_ref.to_string()),
            artist: Some("stub artist".to_string()),
            duration_ms: self.duration_ms,
        })
    }

    async fn metadata(&self, url: &str) -> Result<ResolvedTrack> {
        Ok(ResolvedTrack {
            url: url.to_string(),
            title: None,
            artist: None,
            duration_ms: self.duration_ms,
        })
    }
}

/// Downloader double: writes a marker file after an optional per-URL delay,
/// tracking peak concurrency.
#[derive(Default)]
pub struct StubDownloader {
    /// Base delay applied to every download
    pub delay: Duration,
    /// Extra per-URL delays (slow-track scenarios)
    pub url_delays: Mutex<HashMap<String, Duration>>,
    /// URLs whose download fails
    pub fail_urls: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl StubDownloader {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_url(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn delay_url(&self, url: &str, delay: Duration) {
        self.url_delays.lock().unwrap().insert(url.to_string(), delay);
    }

    /// Highest number of simultaneous downloads observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Successful downloads so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDownloader for StubDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let extra = self
            .url_delays
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or_default();
        tokio::time::sleep(self.delay + extra).await;

        let failed = self.fail_urls.lock().unwrap().contains(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failed {
            return Err(Error::Download("stub download failure".to_string()));
        }

        tokio::fs::write(dest, b"stub media").await?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fully wired core components over an in-memory database
pub struct Fixture {
    pub db: SqlitePool,
    pub state: Arc<SharedState>,
    pub queue: Arc<QueueStore>,
    pub limiter: Arc<RateLimiter>,
    pub priority: Arc<PrioritySet>,
    pub prefetch: Arc<PrefetchPipeline>,
    pub engine: Arc<PlaybackEngine>,
    pub commands: Arc<Commands>,
    pub downloader: Arc<StubDownloader>,
    pub media_dir: TempDir,
}

pub struct FixtureBuilder {
    pub admission: AdmissionConfig,
    pub prefetch: PrefetchConfig,
    pub playback: PlaybackConfig,
    pub priority_users: Vec<String>,
    pub resolver: StubResolver,
    pub downloader: StubDownloader,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            // Generous defaults so admission does not interfere unless a
            // test asks it to
            admission: AdmissionConfig {
                enabled: true,
                max_requests: 1000,
                window_seconds: 60,
            },
            prefetch: PrefetchConfig {
                prefetch_next: true,
                prefetch_count: 2,
            },
            playback: PlaybackConfig {
                transition_delay: Duration::from_millis(10),
                cleanup_after_play: true,
                ready_wait_timeout: Duration::from_secs(5),
            },
            priority_users: Vec::new(),
            resolver: StubResolver::default(),
            downloader: StubDownloader::default(),
        }
    }
}

impl FixtureBuilder {
    pub async fn build(self) -> Fixture {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        jukebot::db::init::create_schema(&db).await.unwrap();

        let media_dir = TempDir::new().unwrap();

        let state = Arc::new(SharedState::new(Arc::new(
            jukebot::events::EventBus::new(64),
        )));
        let priority = Arc::new(PrioritySet::new(self.priority_users));
        let queue = Arc::new(QueueStore::new(db.clone()));
        let limiter = Arc::new(RateLimiter::new(
            db.clone(),
            self.admission,
            Arc::clone(&priority),
        ));

        let resolver: Arc<StubResolver> = Arc::new(self.resolver);
        let downloader = Arc::new(self.downloader);

        let prefetch = Arc::new(PrefetchPipeline::new(
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&resolver) as Arc<dyn TrackResolver>,
            Arc::clone(&downloader) as Arc<dyn MediaDownloader>,
            media_dir.path().to_path_buf(),
            self.prefetch,
        ));

        let engine = Arc::new(PlaybackEngine::new(
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&prefetch),
            Arc::clone(&priority),
            self.playback,
        ));

        let commands = Arc::new(Commands::new(
            Arc::clone(&limiter),
            Arc::clone(&queue),
            Arc::clone(&prefetch),
            Arc::clone(&engine),
            Arc::clone(&resolver) as Arc<dyn TrackResolver>,
            Arc::clone(&state),
        ));

        Fixture {
            db,
            state,
            queue,
            limiter,
            priority,
            prefetch,
            engine,
            commands,
            downloader,
            media_dir,
        }
    }
}

impl Fixture {
    pub async fn new() -> Self {
        FixtureBuilder::default().build().await
    }
}

/// Poll `condition` until it holds or the timeout elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Drain all buffered events from a subscription
pub fn drain_events(rx: &mut broadcast::Receiver<JukeEvent>) -> Vec<JukeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
