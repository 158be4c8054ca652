//! Shared playback state
//!
//! Thread-safe state for the current playback session, shared between the
//! playback engine, command layer, and HTTP handlers. Uses RwLock for
//! concurrent reads with rare writes.

use crate::events::{EventBus, JukeEvent, PlaybackState};
use crate::model::TrackRequest;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Current playback session
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub state: PlaybackState,
    /// Current track; None in Idle, Some in Loading/Playing/Paused
    pub track: Option<TrackRequest>,
    /// When the current play segment started (None while paused/idle)
    pub started_at: Option<DateTime<Utc>>,
    /// Milliseconds played before `started_at` (accumulates across pauses/seeks)
    pub elapsed_ms: u64,
}

impl PlaybackSession {
    pub fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            track: None,
            started_at: None,
            elapsed_ms: 0,
        }
    }

    /// Current position within the track, clamped to its duration when known
    pub fn position_ms(&self, now: DateTime<Utc>) -> u64 {
        let mut pos = self.elapsed_ms;
        if self.state == PlaybackState::Playing {
            if let Some(started) = self.started_at {
                pos += (now - started).num_milliseconds().max(0) as u64;
            }
        }
        match self.track.as_ref().and_then(|t| t.duration_ms) {
            Some(dur) => pos.min(dur),
            None => pos,
        }
    }
}

/// Shared state accessible by all components
pub struct SharedState {
    session: RwLock<PlaybackSession>,
    events: Arc<EventBus>,
}

impl SharedState {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            session: RwLock::new(PlaybackSession::idle()),
            events,
        }
    }

    /// Broadcast an event to all subscribers
    pub fn emit(&self, event: JukeEvent) {
        self.events.emit(event);
    }

    /// Subscribe to the event stream (SSE)
    pub fn subscribe_events(&self) -> broadcast::Receiver<JukeEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> PlaybackSession {
        self.session.read().await.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.session.read().await.state
    }

    /// Replace the whole session (engine transitions)
    pub async fn set_session(&self, session: PlaybackSession) {
        *self.session.write().await = session;
    }

    /// Mutate the session in place under the write lock
    pub async fn update_session<F>(&self, f: F) -> PlaybackSession
    where
        F: FnOnce(&mut PlaybackSession),
    {
        let mut guard = self.session.write().await;
        f(&mut guard);
        guard.clone()
    }
}
