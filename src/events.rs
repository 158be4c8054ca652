//! Event system for jukebot
//!
//! One-to-many broadcast of state changes to subscribers (SSE dashboard
//! clients, the chat adapter). Delivery is at-least-once per connected
//! subscriber; a lagging subscriber drops the oldest buffered events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback state visible to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// jukebot event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeEvent {
    /// Queue contents changed (add/remove/reorder/clear)
    QueueChanged {
        timestamp: DateTime<Utc>,
    },

    /// A track request entered the queue
    TrackEnqueued {
        track_id: Uuid,
        requester_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Prefetch finished; the track's media is on disk
    TrackReady {
        track_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Resolution or download failed for one track
    TrackFailed {
        track_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A track became the current playback session
    TrackStarted {
        track_id: Uuid,
        title: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Current track finished (completed) or was skipped (!completed)
    TrackCompleted {
        track_id: Uuid,
        completed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Playback state changed
    PlaybackStateChanged {
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Position update for the current track
    PlaybackProgress {
        track_id: Uuid,
        position_ms: u64,
        duration_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Hard reset: queue cleared, playback back to idle
    SessionReset {
        timestamp: DateTime<Utc>,
    },
}

impl JukeEvent {
    /// Event type string used as the SSE `event:` field
    pub fn type_str(&self) -> &'static str {
        match self {
            JukeEvent::QueueChanged { .. } => "QueueChanged",
            JukeEvent::TrackEnqueued { .. } => "TrackEnqueued",
            JukeEvent::TrackReady { .. } => "TrackReady",
            JukeEvent::TrackFailed { .. } => "TrackFailed",
            JukeEvent::TrackStarted { .. } => "TrackStarted",
            JukeEvent::TrackCompleted { .. } => "TrackCompleted",
            JukeEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            JukeEvent::PlaybackProgress { .. } => "PlaybackProgress",
            JukeEvent::SessionReset { .. } => "SessionReset",
        }
    }
}

/// Broadcast event bus (tokio::broadcast under the hood)
pub struct EventBus {
    tx: broadcast::Sender<JukeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// No receivers is not an error.
    pub fn emit(&self, event: JukeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JukeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
