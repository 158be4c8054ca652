//! Queue store
//!
//! Ordered, deduplicated collection of pending track requests plus the single
//! current (playing) track. The current track is not a queue member; FIFO
//! order is preserved except for explicit remove/reorder.
//!
//! Every mutation writes through to SQLite before the in-memory cache is
//! updated (fail closed), so a restart resumes the exact pending order.

use crate::db::queue as db_queue;
use crate::error::{Error, Result};
use crate::model::{normalize_url, TrackRequest, TrackStatus};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of an `add`: duplicates are a sentinel, not an error
#[derive(Debug, Clone)]
pub enum AddOutcome {
    Added(TrackRequest),
    /// An entry with the same normalized URL is already queued or playing
    Duplicate,
}

impl AddOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AddOutcome::Duplicate)
    }
}

struct Inner {
    current: Option<TrackRequest>,
    pending: Vec<TrackRequest>,
    next_order: i64,
}

impl Inner {
    /// Normalized URLs of everything that counts for dedup:
    /// queued (including resolving) entries plus the current track.
    fn dedup_keys(&self) -> HashSet<String> {
        let mut keys: HashSet<String> = self
            .pending
            .iter()
            .map(|t| normalize_url(&t.resolved_url))
            .collect();
        if let Some(current) = &self.current {
            keys.insert(normalize_url(&current.resolved_url));
        }
        keys
    }
}

/// Deduplicated FIFO queue with synchronous persistence
pub struct QueueStore {
    db: Pool<Sqlite>,
    inner: RwLock<Inner>,
}

impl QueueStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self {
            db,
            inner: RwLock::new(Inner {
                current: None,
                pending: Vec::new(),
                next_order: 0,
            }),
        }
    }

    /// Load pending entries from storage. In-flight statuses from the
    /// previous run (resolving/playing) restart as queued; ready entries
    /// whose media file vanished are demoted too.
    pub async fn load(&self) -> Result<()> {
        let mut entries = db_queue::load_queue(&self.db).await?;

        for entry in &mut entries {
            let demote = match entry.status {
                TrackStatus::Resolving | TrackStatus::Playing => true,
                TrackStatus::Ready => !entry
                    .local_media_path
                    .as_ref()
                    .is_some_and(|p| p.exists()),
                _ => false,
            };
            if demote {
                entry.status = TrackStatus::Queued;
                db_queue::update_status(&self.db, entry.id, TrackStatus::Queued).await?;
            }
        }

        let mut inner = self.inner.write().await;
        inner.next_order = entries.len() as i64;
        inner.pending = entries;
        inner.current = None;
        info!("Loaded {} pending queue entries", inner.pending.len());
        Ok(())
    }

    /// Append a track unless its normalized URL is already present among
    /// queued, resolving, or current entries.
    pub async fn add(&self, track: TrackRequest) -> Result<AddOutcome> {
        let mut inner = self.inner.write().await;
        self.add_locked(&mut inner, track).await
    }

    /// Bulk add (playlist). Dedup applies within the batch as well as against
    /// pre-existing state: a playlist containing the same track twice yields
    /// one entry.
    pub async fn add_all(&self, tracks: Vec<TrackRequest>) -> Result<Vec<AddOutcome>> {
        let mut inner = self.inner.write().await;
        let mut outcomes = Vec::with_capacity(tracks.len());
        for track in tracks {
            outcomes.push(self.add_locked(&mut inner, track).await?);
        }
        Ok(outcomes)
    }

    async fn add_locked(&self, inner: &mut Inner, track: TrackRequest) -> Result<AddOutcome> {
        let key = normalize_url(&track.resolved_url);
        if inner.dedup_keys().contains(&key) {
            debug!(url = %track.resolved_url, "Duplicate enqueue suppressed");
            return Ok(AddOutcome::Duplicate);
        }

        let order = inner.next_order;
        db_queue::insert_track(&self.db, &track, order).await?;
        inner.next_order += 1;
        inner.pending.push(track.clone());
        Ok(AddOutcome::Added(track))
    }

    /// Bounds-checked removal by queue position
    pub async fn remove(&self, index: usize) -> Result<TrackRequest> {
        let mut inner = self.inner.write().await;
        if index >= inner.pending.len() {
            return Err(Error::NotFound(index));
        }
        let track = inner.pending[index].clone();
        db_queue::delete_track(&self.db, track.id).await?;
        inner.pending.remove(index);
        debug!(track_id = %track.id, index, "Removed queue entry");
        Ok(track)
    }

    /// Remove an entry by id (prefetch failure path). Returns the removed
    /// track, or None if it already left the queue.
    pub async fn remove_by_id(&self, id: Uuid) -> Result<Option<TrackRequest>> {
        let mut inner = self.inner.write().await;
        let Some(index) = inner.pending.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        db_queue::delete_track(&self.db, id).await?;
        Ok(Some(inner.pending.remove(index)))
    }

    /// Bounds-checked move preserving all other relative order
    pub async fn reorder(&self, from: usize, to: usize) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let len = inner.pending.len();
        if from >= len || to >= len {
            return Ok(false);
        }
        if from == to {
            return Ok(true);
        }

        let mut reordered = inner.pending.clone();
        let track = reordered.remove(from);
        reordered.insert(to, track);

        let ids: Vec<Uuid> = reordered.iter().map(|t| t.id).collect();
        db_queue::persist_order(&self.db, &ids).await?;
        inner.pending = reordered;
        inner.next_order = len as i64;
        Ok(true)
    }

    /// Ordered read-only snapshot of pending entries
    pub async fn snapshot(&self) -> Vec<TrackRequest> {
        self.inner.read().await.pending.clone()
    }

    pub async fn current(&self) -> Option<TrackRequest> {
        self.inner.read().await.current.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.pending.is_empty()
    }

    /// Head of the queue without dequeuing
    pub async fn head(&self) -> Option<TrackRequest> {
        self.inner.read().await.pending.first().cloned()
    }

    /// Dequeue the head only if it is ready, making it the current track.
    /// Returns None (without advancing) when the queue is empty or the head
    /// is not yet ready; playback always respects enqueue order.
    pub async fn promote_head_if_ready(&self) -> Result<Option<TrackRequest>> {
        let mut inner = self.inner.write().await;
        match inner.pending.first() {
            Some(head) if head.status == TrackStatus::Ready => {}
            _ => return Ok(None),
        }

        let mut track = inner.pending[0].clone();
        db_queue::delete_track(&self.db, track.id).await?;
        inner.pending.remove(0);
        track.status = TrackStatus::Playing;
        inner.current = Some(track.clone());
        Ok(Some(track))
    }

    /// Clear the current track (natural end, skip, or session reset)
    pub async fn clear_current(&self) -> Option<TrackRequest> {
        self.inner.write().await.current.take()
    }

    /// Hard reset: drop every pending entry. Returns the drained tracks so
    /// the caller can clean up any downloaded media.
    pub async fn clear(&self) -> Result<Vec<TrackRequest>> {
        let mut inner = self.inner.write().await;
        db_queue::clear_queue(&self.db).await?;
        inner.next_order = 0;
        Ok(std::mem::take(&mut inner.pending))
    }

    /// Atomically claim a queued entry for prefetch (queued -> resolving).
    /// Returns false if the entry is gone or already claimed/ready, making
    /// resolve/download idempotent.
    pub async fn claim_for_prefetch(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.pending.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        if entry.status != TrackStatus::Queued {
            return Ok(false);
        }
        db_queue::update_status(&self.db, id, TrackStatus::Resolving).await?;
        entry.status = TrackStatus::Resolving;
        Ok(true)
    }

    /// Store the outcome of a successful prefetch (metadata + local path)
    pub async fn apply_prefetch_result(
        &self,
        id: Uuid,
        title: Option<String>,
        artist: Option<String>,
        duration_ms: Option<u64>,
        local_media_path: std::path::PathBuf,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.pending.iter_mut().find(|t| t.id == id) else {
            // Track was removed while downloading; caller cleans up the file
            warn!(track_id = %id, "Prefetch completed for a track no longer queued");
            return Ok(false);
        };

        let mut updated = entry.clone();
        if title.is_some() {
            updated.title = title;
        }
        if artist.is_some() {
            updated.artist = artist;
        }
        if duration_ms.is_some() {
            updated.duration_ms = duration_ms;
        }
        updated.local_media_path = Some(local_media_path);
        updated.status = TrackStatus::Ready;

        db_queue::update_prefetch_result(&self.db, &updated).await?;
        *entry = updated;
        Ok(true)
    }

    /// Reset a resolving entry back to queued (cancelled prefetch)
    pub async fn release_claim(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.pending.iter_mut().find(|t| t.id == id) {
            if entry.status == TrackStatus::Resolving {
                db_queue::update_status(&self.db, id, TrackStatus::Queued).await?;
                entry.status = TrackStatus::Queued;
            }
        }
        Ok(())
    }

    /// First `limit` positions of the queue that still need prefetch work.
    /// `None` means the whole queue (eager prefetch).
    pub async fn prefetch_candidates(&self, limit: Option<usize>) -> Vec<TrackRequest> {
        let inner = self.inner.read().await;
        let window = limit.unwrap_or(inner.pending.len());
        inner
            .pending
            .iter()
            .take(window)
            .filter(|t| t.status == TrackStatus::Queued)
            .cloned()
            .collect()
    }
}
