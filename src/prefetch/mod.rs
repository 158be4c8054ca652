//! Prefetch/download pipeline
//!
//! Keeps the next N queued tracks already downloaded so playback start
//! latency is near zero. Triggered on enqueue, on playback advancing (to
//! refill the lookahead window), and on an explicit prefetch-all request.
//!
//! Downloads run as independent background tasks bounded by a counting
//! semaphore. One track's failure marks only that track failed; it never
//! aborts sibling prefetches or blocks the pipeline.

pub mod resolver;

pub use resolver::{ExternalDownloader, HttpResolver, MediaDownloader, ResolvedTrack, TrackResolver};

use crate::events::JukeEvent;
use crate::model::TrackRequest;
use crate::queue::QueueStore;
use crate::state::SharedState;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Worker ceiling for eager mode (prefetch_count = 0): "prefetch everything"
/// must still cap concurrent downloader processes.
const EAGER_WORKER_CAP: usize = 4;

/// Pipeline configuration (mirrors the settings store)
#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Master switch; when false the pipeline only reacts to prefetch-all
    pub prefetch_next: bool,
    /// Lookahead window size; 0 means the entire queue
    pub prefetch_count: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            prefetch_next: true,
            prefetch_count: 2,
        }
    }
}

impl PrefetchConfig {
    fn lookahead(&self) -> Option<usize> {
        if self.prefetch_count == 0 {
            None
        } else {
            Some(self.prefetch_count)
        }
    }

    fn worker_cap(&self) -> usize {
        if self.prefetch_count == 0 {
            EAGER_WORKER_CAP
        } else {
            self.prefetch_count
        }
    }
}

/// Background resolution/download pipeline
pub struct PrefetchPipeline {
    queue: Arc<QueueStore>,
    state: Arc<SharedState>,
    resolver: Arc<dyn TrackResolver>,
    downloader: Arc<dyn MediaDownloader>,
    media_dir: PathBuf,
    config: PrefetchConfig,
    semaphore: Arc<Semaphore>,
    cancel: Mutex<CancellationToken>,
    /// Played tracks whose files the cleanup sweep must spare
    /// (cleanup_after_play disabled)
    retained: Mutex<HashSet<Uuid>>,
}

impl PrefetchPipeline {
    pub fn new(
        queue: Arc<QueueStore>,
        state: Arc<SharedState>,
        resolver: Arc<dyn TrackResolver>,
        downloader: Arc<dyn MediaDownloader>,
        media_dir: PathBuf,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            queue,
            state,
            resolver,
            downloader,
            media_dir,
            semaphore: Arc::new(Semaphore::new(config.worker_cap())),
            config,
            cancel: Mutex::new(CancellationToken::new()),
            retained: Mutex::new(HashSet::new()),
        }
    }

    /// Stable local path for a track's media
    pub fn media_path(&self, id: Uuid) -> PathBuf {
        self.media_dir.join(format!("{}.media", id))
    }

    fn thumbnail_path(&self, id: Uuid) -> PathBuf {
        self.media_dir.join(format!("{}.thumb", id))
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone()
    }

    /// Cancel all pending and in-flight prefetch work (session reset).
    /// Work for subsequent triggers runs under a fresh token.
    pub fn cancel_all(&self) {
        let mut guard = self.cancel.lock().unwrap();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    /// Refill the lookahead window (enqueue / playback-advance trigger)
    pub fn trigger(self: &Arc<Self>) {
        if !self.config.prefetch_next {
            return;
        }
        self.spawn_for(self.config.lookahead());
    }

    /// Explicit prefetch-all request: the whole queue, still bounded
    pub fn prefetch_all(self: &Arc<Self>) {
        self.spawn_for(None);
    }

    fn spawn_for(self: &Arc<Self>, limit: Option<usize>) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let candidates = pipeline.queue.prefetch_candidates(limit).await;
            for track in candidates {
                let worker = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    worker.run_one(track).await;
                });
            }
        });
    }

    /// One track's prefetch: claim, resolve metadata, download, mark ready.
    /// Claiming makes this idempotent; a ready or already-resolving track is
    /// a no-op.
    async fn run_one(self: Arc<Self>, track: TrackRequest) {
        let token = self.token();

        // Bound concurrent downloads; waiting here keeps the track claimable
        // by whichever trigger gets a permit first.
        let permit = tokio::select! {
            _ = token.cancelled() => return,
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return,
            },
        };

        let claimed = match self.queue.claim_for_prefetch(track.id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Could not claim track for prefetch");
                return;
            }
        };
        if !claimed {
            return;
        }

        let result = tokio::select! {
            _ = token.cancelled() => {
                // Session reset while downloading: put the entry back if the
                // queue still has it.
                if let Err(e) = self.queue.release_claim(track.id).await {
                    warn!(track_id = %track.id, error = %e, "Failed to release prefetch claim");
                }
                drop(permit);
                return;
            }
            result = self.fetch(&track) => result,
        };
        drop(permit);

        match result {
            Ok(()) => {
                self.state.emit(JukeEvent::TrackReady {
                    track_id: track.id,
                    timestamp: Utc::now(),
                });
                // Completion frees a slot; refill the window
                self.trigger();
            }
            Err(e) => {
                warn!(
                    track_id = %track.id,
                    requester_id = %track.requester_id,
                    url = %track.resolved_url,
                    error = %e,
                    "Prefetch failed; track dropped from queue"
                );
                if let Err(remove_err) = self.queue.remove_by_id(track.id).await {
                    warn!(track_id = %track.id, error = %remove_err,
                          "Failed to drop failed track from queue");
                }
                self.delete_media_files(track.id).await;
                self.state.emit(JukeEvent::TrackFailed {
                    track_id: track.id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.trigger();
            }
        }
    }

    async fn fetch(&self, track: &TrackRequest) -> crate::error::Result<()> {
        // Metadata fetch fills in whatever enqueue-time resolution left blank
        let meta = match self.resolver.metadata(&track.resolved_url).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                // Missing metadata is not fatal; the download decides
                debug!(track_id = %track.id, error = %e, "Metadata fetch failed, continuing");
                None
            }
        };

        let dest = self.media_path(track.id);
        self.downloader.download(&track.resolved_url, &dest).await?;

        // Thumbnail is best-effort
        let _ = self
            .downloader
            .download_thumbnail(&track.resolved_url, &self.thumbnail_path(track.id))
            .await;

        let (title, artist, duration_ms) = match meta {
            Some(m) => (m.title, m.artist, m.duration_ms),
            None => (None, None, None),
        };

        let still_queued = self
            .queue
            .apply_prefetch_result(track.id, title, artist, duration_ms, dest.clone())
            .await?;

        if !still_queued {
            // Removed while downloading; nothing will ever play this file
            self.delete_media_files(track.id).await;
        }
        Ok(())
    }

    /// Spare this played track's file from the cleanup sweep
    pub fn retain_media(&self, id: Uuid) {
        self.retained.lock().unwrap().insert(id);
    }

    /// Delete a track's downloaded media (explicit remove, or post-play
    /// cleanup when retention is off)
    pub async fn release_media(&self, id: Uuid) {
        self.retained.lock().unwrap().remove(&id);
        self.delete_media_files(id).await;
    }

    async fn delete_media_files(&self, id: Uuid) {
        for path in [self.media_path(id), self.thumbnail_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Deleted media file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete media file"),
            }
        }
    }

    /// Delete downloaded media that no queued, current, or retained track
    /// owns. The file backing the current playing track is always excluded.
    /// Returns the number of files removed.
    pub async fn cleanup_sweep(&self) -> usize {
        let mut keep: HashSet<Uuid> = self
            .queue
            .snapshot()
            .await
            .iter()
            .map(|t| t.id)
            .collect();
        if let Some(current) = self.queue.current().await {
            keep.insert(current.id);
        }
        keep.extend(self.retained.lock().unwrap().iter().copied());

        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.media_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.media_dir.display(), error = %e, "Cleanup sweep cannot read media dir");
                return 0;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(id) = file_track_id(&path) else {
                continue;
            };
            if keep.contains(&id) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Cleanup sweep removed orphaned media");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Cleanup sweep failed to remove file"),
            }
        }

        if removed > 0 {
            info!(removed, "Cleanup sweep complete");
        }
        removed
    }

    /// Fixed-interval background cleanup task
    pub fn spawn_cleanup_sweeper(self: &Arc<Self>, interval: Duration) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                pipeline.cleanup_sweep().await;
            }
        });
    }
}

/// Parse `<uuid>.media` / `<uuid>.thumb` filenames back to track ids
fn file_track_id(path: &Path) -> Option<Uuid> {
    let stem = path.file_stem()?.to_str()?;
    Uuid::parse_str(stem).ok()
}
