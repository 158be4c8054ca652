//! Command layer
//!
//! Single typed entry point wiring admission control, resolution, the queue,
//! the prefetch pipeline, and the playback engine. Both the chat adapter and
//! the HTTP handlers call through here; nothing reaches the components
//! directly.

use crate::admission::{CommandKind, RateLimiter};
use crate::error::{Error, Result};
use crate::events::JukeEvent;
use crate::model::{looks_like_url, TrackRequest};
use crate::playback::PlaybackEngine;
use crate::prefetch::{PrefetchPipeline, TrackResolver};
use crate::queue::{AddOutcome, QueueStore};
use crate::state::SharedState;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an enqueue command
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    Enqueued(TrackRequest),
    /// The track is already queued or playing; not an error
    Duplicate,
}

/// Result of a playlist (batch) enqueue
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub added: Vec<TrackRequest>,
    pub duplicates: usize,
    pub failed: usize,
}

/// Typed command surface over the core components
pub struct Commands {
    limiter: Arc<RateLimiter>,
    queue: Arc<QueueStore>,
    prefetch: Arc<PrefetchPipeline>,
    engine: Arc<PlaybackEngine>,
    resolver: Arc<dyn TrackResolver>,
    state: Arc<SharedState>,
}

impl Commands {
    pub fn new(
        limiter: Arc<RateLimiter>,
        queue: Arc<QueueStore>,
        prefetch: Arc<PrefetchPipeline>,
        engine: Arc<PlaybackEngine>,
        resolver: Arc<dyn TrackResolver>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            limiter,
            queue,
            prefetch,
            engine,
            resolver,
            state,
        }
    }

    /// Every command passes admission first; denial carries the wait time.
    async fn admit(&self, user_id: &str, kind: CommandKind) -> Result<()> {
        let admission = self.limiter.check_and_record(user_id, kind).await;
        if admission.allowed {
            Ok(())
        } else {
            info!(user_id, command = kind.as_str(), wait_seconds = admission.wait_seconds,
                  "Command denied by admission controller");
            Err(Error::AdmissionDenied {
                wait_seconds: admission.wait_seconds,
            })
        }
    }

    /// Enqueue a track by URL or search terms.
    ///
    /// Resolution failures happen before the track enters the queue; the
    /// queue never holds an entry without a concrete URL.
    pub async fn enqueue(
        &self,
        source: &str,
        requester_id: &str,
        group_id: Option<String>,
    ) -> Result<EnqueueOutcome> {
        self.admit(requester_id, CommandKind::Enqueue).await?;

        let track = if looks_like_url(source) {
            TrackRequest::new(source, source.trim(), requester_id, group_id)
        } else {
            let resolved = self.resolver.resolve(source).await.map_err(|e| {
                warn!(requester_id, source, error = %e, "Resolution failed");
                e
            })?;
            let mut track = TrackRequest::new(source, resolved.url, requester_id, group_id);
            track.title = resolved.title;
            track.artist = resolved.artist;
            track.duration_ms = resolved.duration_ms;
            track
        };

        match self.queue.add(track).await? {
            AddOutcome::Added(track) => {
                info!(track_id = %track.id, requester_id, url = %track.resolved_url, "Track enqueued");
                self.state.emit(JukeEvent::TrackEnqueued {
                    track_id: track.id,
                    requester_id: requester_id.to_string(),
                    timestamp: Utc::now(),
                });
                self.state.emit(JukeEvent::QueueChanged {
                    timestamp: Utc::now(),
                });
                self.prefetch.trigger();
                self.engine.kick();
                Ok(EnqueueOutcome::Enqueued(track))
            }
            AddOutcome::Duplicate => Ok(EnqueueOutcome::Duplicate),
        }
    }

    /// Enqueue a playlist of sources as one user command.
    ///
    /// The batch consumes a single admission slot. Items that fail resolution
    /// are dropped from the batch; duplicates (against existing state and
    /// within the batch itself) are counted, not errors.
    pub async fn enqueue_batch(
        &self,
        sources: &[String],
        requester_id: &str,
        group_id: Option<String>,
    ) -> Result<BatchOutcome> {
        self.admit(requester_id, CommandKind::Enqueue).await?;

        let mut outcome = BatchOutcome::default();
        let mut tracks = Vec::with_capacity(sources.len());
        for source in sources {
            if looks_like_url(source) {
                tracks.push(TrackRequest::new(
                    source,
                    source.trim(),
                    requester_id,
                    group_id.clone(),
                ));
                continue;
            }
            match self.resolver.resolve(source).await {
                Ok(resolved) => {
                    let mut track =
                        TrackRequest::new(source, resolved.url, requester_id, group_id.clone());
                    track.title = resolved.title;
                    track.artist = resolved.artist;
                    track.duration_ms = resolved.duration_ms;
                    tracks.push(track);
                }
                Err(e) => {
                    warn!(requester_id, source, error = %e, "Batch item failed resolution; dropped");
                    outcome.failed += 1;
                }
            }
        }

        for added in self.queue.add_all(tracks).await? {
            match added {
                AddOutcome::Added(track) => {
                    self.state.emit(JukeEvent::TrackEnqueued {
                        track_id: track.id,
                        requester_id: requester_id.to_string(),
                        timestamp: Utc::now(),
                    });
                    outcome.added.push(track);
                }
                AddOutcome::Duplicate => outcome.duplicates += 1,
            }
        }

        if !outcome.added.is_empty() {
            info!(requester_id, added = outcome.added.len(), duplicates = outcome.duplicates,
                  failed = outcome.failed, "Playlist enqueued");
            self.state.emit(JukeEvent::QueueChanged {
                timestamp: Utc::now(),
            });
            self.prefetch.trigger();
            self.engine.kick();
        }
        Ok(outcome)
    }

    pub async fn skip(&self, requester_id: &str) -> Result<()> {
        self.admit(requester_id, CommandKind::Skip).await?;
        self.engine.skip(requester_id).await
    }

    pub async fn pause(&self, requester_id: &str) -> Result<()> {
        self.admit(requester_id, CommandKind::Pause).await?;
        self.engine.pause().await
    }

    pub async fn resume(&self, requester_id: &str) -> Result<()> {
        self.admit(requester_id, CommandKind::Resume).await?;
        self.engine.resume().await
    }

    /// Seek within the current track; returns the clamped position, or None
    /// when nothing is playing.
    pub async fn seek(&self, requester_id: &str, time_ms: i64) -> Result<Option<u64>> {
        self.admit(requester_id, CommandKind::Seek).await?;
        self.engine.seek(time_ms).await
    }

    pub async fn remove(&self, requester_id: &str, index: usize) -> Result<TrackRequest> {
        self.admit(requester_id, CommandKind::Remove).await?;
        let removed = self.queue.remove(index).await?;
        // Media downloaded ahead of need is no longer wanted
        self.prefetch.release_media(removed.id).await;
        self.state.emit(JukeEvent::QueueChanged {
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    pub async fn reorder(&self, requester_id: &str, from: usize, to: usize) -> Result<bool> {
        self.admit(requester_id, CommandKind::Reorder).await?;
        let moved = self.queue.reorder(from, to).await?;
        if moved {
            self.state.emit(JukeEvent::QueueChanged {
                timestamp: Utc::now(),
            });
        }
        Ok(moved)
    }

    pub async fn prefetch_all(&self, requester_id: &str) -> Result<()> {
        self.admit(requester_id, CommandKind::Prefetch).await?;
        self.prefetch.prefetch_all();
        Ok(())
    }

    pub async fn new_session(&self, requester_id: &str) -> Result<()> {
        self.admit(requester_id, CommandKind::NewSession).await?;
        self.engine.new_session().await
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }
}
