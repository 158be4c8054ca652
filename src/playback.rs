//! Playback state machine
//!
//! Drives the current-track lifecycle: idle -> loading -> playing <-> paused,
//! and playing/paused -> loading (skip or natural end) -> idle when the queue
//! is exhausted. Advancement dequeues the head only when its media is ready;
//! an unready head blocks advancement (playback always respects enqueue
//! order) until it resolves or the bounded wait elapses.

use crate::admission::PrioritySet;
use crate::error::{Error, Result};
use crate::events::{JukeEvent, PlaybackState};
use crate::model::TrackRequest;
use crate::prefetch::PrefetchPipeline;
use crate::queue::QueueStore;
use crate::state::{PlaybackSession, SharedState};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on how long advancement waits for an unready head before
/// treating it as failed and skipping it.
pub const DEFAULT_READY_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Playback engine configuration (mirrors the settings store)
#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// Pause between a skip/end and the next track starting
    pub transition_delay: Duration,
    /// Delete downloaded media once a track has played
    pub cleanup_after_play: bool,
    /// Bounded wait for an unready head before skipping it
    pub ready_wait_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            transition_delay: Duration::from_millis(500),
            cleanup_after_play: true,
            ready_wait_timeout: DEFAULT_READY_WAIT_TIMEOUT,
        }
    }
}

/// Playback engine - current-track lifecycle coordinator
pub struct PlaybackEngine {
    queue: Arc<QueueStore>,
    state: Arc<SharedState>,
    prefetch: Arc<PrefetchPipeline>,
    priority: Arc<PrioritySet>,
    config: PlaybackConfig,
    /// Exclusive ownership of "advance to next track": a natural end and a
    /// simultaneous skip cannot both dequeue.
    advance_lock: AsyncMutex<()>,
    /// Cancellation for the current track's end timer; skip cancels only
    /// this, never prefetch work for other tracks.
    current_timer: Mutex<Option<CancellationToken>>,
    /// Bumped by new_session so an in-progress bounded wait aborts instead
    /// of holding the advance lock against the reset.
    session_epoch: std::sync::atomic::AtomicU64,
}

impl PlaybackEngine {
    pub fn new(
        queue: Arc<QueueStore>,
        state: Arc<SharedState>,
        prefetch: Arc<PrefetchPipeline>,
        priority: Arc<PrioritySet>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            queue,
            state,
            prefetch,
            priority,
            config,
            advance_lock: AsyncMutex::new(()),
            current_timer: Mutex::new(None),
            session_epoch: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Start playback if the engine is idle (fired after enqueue)
    pub fn kick(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if engine.state.playback_state().await == PlaybackState::Idle {
                if let Err(e) = engine.advance(None).await {
                    warn!(error = %e, "Playback kick failed");
                }
            }
        });
    }

    /// Advance to the next track. `expected_current` guards against double
    /// advancement: the caller names the track it believes is current, and if
    /// another trigger already advanced past it, this call is a no-op.
    pub async fn advance(self: &Arc<Self>, expected_current: Option<Uuid>) -> Result<()> {
        use std::sync::atomic::Ordering;

        let _guard = self.advance_lock.lock().await;
        let epoch = self.session_epoch.load(Ordering::SeqCst);

        let current_id = self.queue.current().await.map(|t| t.id);
        if current_id != expected_current {
            debug!(?expected_current, ?current_id, "Advance superseded; ignoring");
            return Ok(());
        }

        self.cancel_current_timer();
        if let Some(previous) = self.queue.clear_current().await {
            self.finish_media(&previous).await;
        }

        self.state
            .update_session(|s| {
                s.state = PlaybackState::Loading;
                s.track = None;
                s.started_at = None;
                s.elapsed_ms = 0;
            })
            .await;
        self.state.emit(JukeEvent::PlaybackStateChanged {
            state: PlaybackState::Loading,
            timestamp: Utc::now(),
        });

        // Wait for the head to become ready, bounded per head. The queue is
        // never reordered around an unready head.
        let mut waiting_on: Option<(Uuid, Instant)> = None;
        loop {
            if self.session_epoch.load(Ordering::SeqCst) != epoch {
                debug!("Advance aborted by session reset");
                return Ok(());
            }

            if self.queue.is_empty().await {
                self.state.set_session(PlaybackSession::idle()).await;
                self.state.emit(JukeEvent::PlaybackStateChanged {
                    state: PlaybackState::Idle,
                    timestamp: Utc::now(),
                });
                info!("Queue exhausted; playback idle");
                return Ok(());
            }

            if let Some(track) = self.queue.promote_head_if_ready().await? {
                self.start(track).await;
                return Ok(());
            }

            let head = match self.queue.head().await {
                Some(head) => head,
                None => continue,
            };

            match waiting_on {
                Some((id, since)) if id == head.id => {
                    if since.elapsed() >= self.config.ready_wait_timeout {
                        warn!(track_id = %head.id, timeout_ms = self.config.ready_wait_timeout.as_millis() as u64,
                              "Head not ready within wait timeout; skipping");
                        self.queue.remove_by_id(head.id).await?;
                        self.prefetch.release_media(head.id).await;
                        self.state.emit(JukeEvent::TrackFailed {
                            track_id: head.id,
                            reason: "not ready within wait timeout".to_string(),
                            timestamp: Utc::now(),
                        });
                        self.state.emit(JukeEvent::QueueChanged {
                            timestamp: Utc::now(),
                        });
                        waiting_on = None;
                        continue;
                    }
                }
                _ => {
                    waiting_on = Some((head.id, Instant::now()));
                    // Make sure someone is actually working on the head
                    self.prefetch.trigger();
                }
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn start(self: &Arc<Self>, track: TrackRequest) {
        info!(track_id = %track.id, title = ?track.title, "Starting playback");

        self.state
            .set_session(PlaybackSession {
                state: PlaybackState::Playing,
                track: Some(track.clone()),
                started_at: Some(Utc::now()),
                elapsed_ms: 0,
            })
            .await;

        self.state.emit(JukeEvent::TrackStarted {
            track_id: track.id,
            title: track.title.clone(),
            timestamp: Utc::now(),
        });
        self.state.emit(JukeEvent::PlaybackStateChanged {
            state: PlaybackState::Playing,
            timestamp: Utc::now(),
        });
        self.state.emit(JukeEvent::QueueChanged {
            timestamp: Utc::now(),
        });

        // Refill the lookahead window now that the head was consumed
        self.prefetch.trigger();

        if let Some(duration_ms) = track.duration_ms {
            self.spawn_end_timer(track.id, Duration::from_millis(duration_ms));
        }
    }

    /// Natural-end timer for the current track. Without a known duration the
    /// track plays until skipped.
    fn spawn_end_timer(self: &Arc<Self>, track_id: Uuid, remaining: Duration) {
        let token = CancellationToken::new();
        *self.current_timer.lock().unwrap() = Some(token.clone());

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(remaining) => {
                    engine.state.emit(JukeEvent::TrackCompleted {
                        track_id,
                        completed: true,
                        timestamp: Utc::now(),
                    });
                    tokio::time::sleep(engine.config.transition_delay).await;
                    if let Err(e) = engine.advance(Some(track_id)).await {
                        warn!(track_id = %track_id, error = %e, "Advance after natural end failed");
                    }
                }
            }
        });
    }

    fn cancel_current_timer(&self) {
        if let Some(token) = self.current_timer.lock().unwrap().take() {
            token.cancel();
        }
    }

    async fn finish_media(&self, track: &TrackRequest) {
        if self.config.cleanup_after_play {
            self.prefetch.release_media(track.id).await;
        } else {
            self.prefetch.retain_media(track.id);
        }
    }

    /// Skip the current track. Permitted for priority users and the track's
    /// original requester only.
    pub async fn skip(self: &Arc<Self>, requester_id: &str) -> Result<()> {
        let session = self.state.session().await;
        let track = session
            .track
            .ok_or_else(|| Error::InvalidState("nothing is playing".to_string()))?;

        if !self.priority.is_priority(requester_id) && track.requester_id != requester_id {
            return Err(Error::PermissionDenied(format!(
                "only {} or a priority user may skip this track",
                track.requester_id
            )));
        }

        info!(track_id = %track.id, requester_id, "Skipping current track");
        self.cancel_current_timer();
        self.state
            .update_session(|s| s.state = PlaybackState::Loading)
            .await;
        self.state.emit(JukeEvent::TrackCompleted {
            track_id: track.id,
            completed: false,
            timestamp: Utc::now(),
        });

        tokio::time::sleep(self.config.transition_delay).await;
        self.advance(Some(track.id)).await
    }

    /// Playing -> paused. No-op in any other state; never touches the queue.
    pub async fn pause(&self) -> Result<()> {
        let now = Utc::now();
        let session = self
            .state
            .update_session(|s| {
                if s.state == PlaybackState::Playing {
                    if let Some(started) = s.started_at.take() {
                        s.elapsed_ms += (now - started).num_milliseconds().max(0) as u64;
                    }
                    s.state = PlaybackState::Paused;
                }
            })
            .await;

        if session.state == PlaybackState::Paused {
            self.cancel_current_timer();
            self.state.emit(JukeEvent::PlaybackStateChanged {
                state: PlaybackState::Paused,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Paused -> playing. No-op in any other state.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        let session = self
            .state
            .update_session(|s| {
                if s.state == PlaybackState::Paused {
                    s.started_at = Some(Utc::now());
                    s.state = PlaybackState::Playing;
                }
            })
            .await;

        if session.state == PlaybackState::Playing {
            if let (Some(track), Some(duration_ms)) = (
                session.track.as_ref(),
                session.track.as_ref().and_then(|t| t.duration_ms),
            ) {
                let remaining = duration_ms.saturating_sub(session.elapsed_ms);
                self.spawn_end_timer(track.id, Duration::from_millis(remaining));
            }
            self.state.emit(JukeEvent::PlaybackStateChanged {
                state: PlaybackState::Playing,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Seek within the current track, clamped to [0, duration]. Returns the
    /// clamped position, or None when no track is current (no effect).
    pub async fn seek(self: &Arc<Self>, time_ms: i64) -> Result<Option<u64>> {
        let now = Utc::now();
        let mut applied: Option<u64> = None;

        let session = self
            .state
            .update_session(|s| {
                let Some(track) = s.track.as_ref() else {
                    return;
                };
                let mut target = time_ms.max(0) as u64;
                if let Some(duration) = track.duration_ms {
                    target = target.min(duration);
                }
                s.elapsed_ms = target;
                if s.state == PlaybackState::Playing {
                    s.started_at = Some(now);
                }
                applied = Some(target);
            })
            .await;

        if let Some(position) = applied {
            // Reschedule the natural end for the new position
            self.cancel_current_timer();
            if session.state == PlaybackState::Playing {
                if let (Some(track), Some(duration_ms)) = (
                    session.track.as_ref(),
                    session.track.as_ref().and_then(|t| t.duration_ms),
                ) {
                    let remaining = duration_ms.saturating_sub(position);
                    self.spawn_end_timer(track.id, Duration::from_millis(remaining));
                }
            }
            self.state.emit(JukeEvent::PlaybackProgress {
                track_id: session.track.as_ref().map(|t| t.id).unwrap_or_default(),
                position_ms: position,
                duration_ms: session.track.as_ref().and_then(|t| t.duration_ms),
                timestamp: Utc::now(),
            });
        }
        Ok(applied)
    }

    /// Hard reset: discard pending prefetch work for queued tracks, clear the
    /// queue, stop the current track, return to idle.
    pub async fn new_session(self: &Arc<Self>) -> Result<()> {
        info!("New session: clearing queue and resetting playback");

        self.prefetch.cancel_all();
        self.session_epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let _guard = self.advance_lock.lock().await;
        self.cancel_current_timer();

        if let Some(current) = self.queue.clear_current().await {
            self.prefetch.release_media(current.id).await;
        }
        let drained = self.queue.clear().await?;
        for track in &drained {
            self.prefetch.release_media(track.id).await;
        }

        self.state.set_session(PlaybackSession::idle()).await;
        self.state.emit(JukeEvent::SessionReset {
            timestamp: Utc::now(),
        });
        self.state.emit(JukeEvent::QueueChanged {
            timestamp: Utc::now(),
        });
        self.state.emit(JukeEvent::PlaybackStateChanged {
            state: PlaybackState::Idle,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Periodic position updates for dashboard subscribers
    pub fn spawn_progress_reporter(self: &Arc<Self>, interval: Duration) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let session = engine.state.session().await;
                if session.state != PlaybackState::Playing {
                    continue;
                }
                if let Some(track) = session.track.as_ref() {
                    engine.state.emit(JukeEvent::PlaybackProgress {
                        track_id: track.id,
                        position_ms: session.position_ms(Utc::now()),
                        duration_ms: track.duration_ms,
                        timestamp: Utc::now(),
                    });
                }
            }
        });
    }
}
