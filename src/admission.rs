//! Admission controller
//!
//! Sliding-window rate limiter gating command execution per (user, command
//! kind), with a priority (VIP) bypass. Check-then-record runs as one atomic
//! unit under a single lock so two concurrent commands can never both take
//! the last slot in a window.
//!
//! Counting happens against the in-memory window; the database log exists so
//! limits survive a restart. Storage failures fail open: denying legitimate
//! users is worse than a temporarily ungated window.

use crate::db::rate_limit;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Command kinds subject to admission control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Enqueue,
    Skip,
    Pause,
    Resume,
    Seek,
    Remove,
    Reorder,
    Prefetch,
    NewSession,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Enqueue => "enqueue",
            CommandKind::Skip => "skip",
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Seek => "seek",
            CommandKind::Remove => "remove",
            CommandKind::Reorder => "reorder",
            CommandKind::Prefetch => "prefetch",
            CommandKind::NewSession => "newsession",
        }
    }
}

/// Rate limiter configuration (mirrors the settings store)
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 5,
            window_seconds: 60,
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub allowed: bool,
    /// Requests left in the current window; None means unlimited (priority
    /// user or limiting disabled)
    pub remaining: Option<u32>,
    /// When the oldest counted request leaves the window (denied only)
    pub reset_at: Option<DateTime<Utc>>,
    /// Seconds until `reset_at` (0 when allowed)
    pub wait_seconds: u64,
}

impl Admission {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
            reset_at: None,
            wait_seconds: 0,
        }
    }
}

/// Users exempt from rate limiting and entitled to skip any track
pub struct PrioritySet {
    users: std::sync::RwLock<HashSet<String>>,
}

impl PrioritySet {
    pub fn new(users: impl IntoIterator<Item = String>) -> Self {
        Self {
            users: std::sync::RwLock::new(users.into_iter().collect()),
        }
    }

    pub fn is_priority(&self, user_id: &str) -> bool {
        self.users.read().unwrap().contains(user_id)
    }

    pub fn add(&self, user_id: impl Into<String>) {
        self.users.write().unwrap().insert(user_id.into());
    }

    pub fn remove(&self, user_id: &str) {
        self.users.write().unwrap().remove(user_id);
    }
}

type WindowKey = (String, CommandKind);

/// Sliding-window rate limiter
pub struct RateLimiter {
    db: Pool<Sqlite>,
    config: RwLock<AdmissionConfig>,
    priority: Arc<PrioritySet>,
    /// Per (user, command) timestamps in ascending order. One lock for all
    /// windows keeps check-then-record atomic across concurrent commands.
    windows: Mutex<HashMap<WindowKey, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(db: Pool<Sqlite>, config: AdmissionConfig, priority: Arc<PrioritySet>) -> Self {
        Self {
            db,
            config: RwLock::new(config),
            priority,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild in-memory windows from the persisted request log.
    /// A storage failure here fails open: start with empty windows.
    pub async fn load(&self) -> Result<()> {
        let config = *self.config.read().await;
        let since = Utc::now() - ChronoDuration::seconds(2 * config.window_seconds as i64);

        match rate_limit::load_since(&self.db, since).await {
            Ok(records) => {
                let mut windows = self.windows.lock().await;
                for (user_id, command, at) in records {
                    if let Some(kind) = parse_command(&command) {
                        windows.entry((user_id, kind)).or_default().push_back(at);
                    }
                }
                info!("Loaded {} rate-limit windows from storage", windows.len());
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Rate-limit log unavailable; starting ungated (fail open)");
                Ok(())
            }
        }
    }

    pub async fn set_config(&self, config: AdmissionConfig) {
        *self.config.write().await = config;
    }

    pub async fn config(&self) -> AdmissionConfig {
        *self.config.read().await
    }

    /// Read-only admission check (does not consume a slot)
    pub async fn check(&self, user_id: &str, kind: CommandKind) -> Admission {
        self.check_at(user_id, kind, Utc::now()).await
    }

    /// Check and, if allowed, record the request as one atomic unit.
    pub async fn check_and_record(&self, user_id: &str, kind: CommandKind) -> Admission {
        self.check_and_record_at(user_id, kind, Utc::now()).await
    }

    /// Check at an explicit instant (test seam)
    pub async fn check_at(&self, user_id: &str, kind: CommandKind, now: DateTime<Utc>) -> Admission {
        let config = *self.config.read().await;
        if self.priority.is_priority(user_id) || !config.enabled {
            return Admission::unlimited();
        }

        let windows = self.windows.lock().await;
        self.evaluate(&windows, &config, user_id, kind, now)
    }

    /// Check-and-record at an explicit instant (test seam)
    pub async fn check_and_record_at(
        &self,
        user_id: &str,
        kind: CommandKind,
        now: DateTime<Utc>,
    ) -> Admission {
        let config = *self.config.read().await;
        if self.priority.is_priority(user_id) || !config.enabled {
            return Admission::unlimited();
        }

        let mut windows = self.windows.lock().await;
        let admission = self.evaluate(&windows, &config, user_id, kind, now);
        if admission.allowed {
            windows
                .entry((user_id.to_string(), kind))
                .or_default()
                .push_back(now);
            // Persist outside the hot decision but still under the lock;
            // failure only weakens future limiting, never blocks anyone.
            if let Err(e) = rate_limit::insert_request(&self.db, user_id, kind.as_str(), now).await
            {
                warn!(user_id, command = kind.as_str(), error = %e,
                      "Failed to persist rate-limit record; dropping");
            }
        }
        admission
    }

    fn evaluate(
        &self,
        windows: &HashMap<WindowKey, VecDeque<DateTime<Utc>>>,
        config: &AdmissionConfig,
        user_id: &str,
        kind: CommandKind,
        now: DateTime<Utc>,
    ) -> Admission {
        let window_start = now - ChronoDuration::seconds(config.window_seconds as i64);
        let key = (user_id.to_string(), kind);

        let counted: Vec<DateTime<Utc>> = windows
            .get(&key)
            .map(|w| w.iter().copied().filter(|t| *t >= window_start).collect())
            .unwrap_or_default();

        if counted.len() as u32 >= config.max_requests {
            // Oldest counted request leaving the window frees the next slot.
            // With max_requests = 0 the window is empty and nothing ever
            // frees up; report a full window from now.
            let oldest = counted.first().copied().unwrap_or(now);
            let reset_at = oldest + ChronoDuration::seconds(config.window_seconds as i64);
            let wait_seconds = (reset_at - now).num_seconds().max(1) as u64;
            Admission {
                allowed: false,
                remaining: Some(0),
                reset_at: Some(reset_at),
                wait_seconds,
            }
        } else {
            Admission {
                allowed: true,
                remaining: Some(config.max_requests - counted.len() as u32 - 1),
                reset_at: None,
                wait_seconds: 0,
            }
        }
    }

    /// Purge records older than 2x the window from memory and storage.
    /// Returns the number of in-memory records dropped.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let config = *self.config.read().await;
        let cutoff = now - ChronoDuration::seconds(2 * config.window_seconds as i64);

        let mut dropped = 0;
        {
            let mut windows = self.windows.lock().await;
            for window in windows.values_mut() {
                while window.front().is_some_and(|t| *t < cutoff) {
                    window.pop_front();
                    dropped += 1;
                }
            }
            windows.retain(|_, w| !w.is_empty());
        }

        match rate_limit::purge_older_than(&self.db, cutoff).await {
            Ok(rows) => debug!(rows, dropped, "Rate-limit sweep complete"),
            Err(e) => warn!(error = %e, "Rate-limit sweep could not purge storage"),
        }
        dropped
    }

    /// Spawn the fixed-interval background sweep (deterministic, not
    /// probabilistic sampling).
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        });
    }
}

fn parse_command(s: &str) -> Option<CommandKind> {
    Some(match s {
        "enqueue" => CommandKind::Enqueue,
        "skip" => CommandKind::Skip,
        "pause" => CommandKind::Pause,
        "resume" => CommandKind::Resume,
        "seek" => CommandKind::Seek,
        "remove" => CommandKind::Remove,
        "reorder" => CommandKind::Reorder,
        "prefetch" => CommandKind::Prefetch,
        "newsession" => CommandKind::NewSession,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use chrono::Duration as ChronoDuration;

    async fn limiter(max: u32, window: u64) -> Arc<RateLimiter> {
        let db = init_memory_database().await.unwrap();
        let config = AdmissionConfig {
            enabled: true,
            max_requests: max,
            window_seconds: window,
        };
        Arc::new(RateLimiter::new(db, config, Arc::new(PrioritySet::new([]))))
    }

    #[tokio::test]
    async fn sliding_window_allows_then_denies() {
        let limiter = limiter(3, 60).await;
        let t0 = Utc::now();

        for i in 0..3 {
            let a = limiter
                .check_and_record_at("user1", CommandKind::Enqueue, t0 + ChronoDuration::seconds(i))
                .await;
            assert!(a.allowed, "request {} should be allowed", i + 1);
        }

        let denied = limiter
            .check_and_record_at("user1", CommandKind::Enqueue, t0 + ChronoDuration::seconds(10))
            .await;
        assert!(!denied.allowed);
        assert!(denied.wait_seconds > 0);
        assert_eq!(denied.reset_at, Some(t0 + ChronoDuration::seconds(60)));

        // 61s after the first request its slot is free again
        let later = limiter
            .check_and_record_at("user1", CommandKind::Enqueue, t0 + ChronoDuration::seconds(61))
            .await;
        assert!(later.allowed);
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let limiter = limiter(3, 60).await;
        let t0 = Utc::now();

        let a = limiter.check_and_record_at("u", CommandKind::Skip, t0).await;
        assert_eq!(a.remaining, Some(2));
        let a = limiter.check_and_record_at("u", CommandKind::Skip, t0).await;
        assert_eq!(a.remaining, Some(1));
        let a = limiter.check_and_record_at("u", CommandKind::Skip, t0).await;
        assert_eq!(a.remaining, Some(0));
    }

    #[tokio::test]
    async fn command_kinds_are_independent_windows() {
        let limiter = limiter(1, 60).await;
        let t0 = Utc::now();

        assert!(limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await.allowed);
        assert!(!limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await.allowed);
        // A different command kind still has its own slot
        assert!(limiter.check_and_record_at("u", CommandKind::Skip, t0).await.allowed);
    }

    #[tokio::test]
    async fn priority_user_bypasses_limit() {
        let db = init_memory_database().await.unwrap();
        let priority = Arc::new(PrioritySet::new(["vip".to_string()]));
        let limiter = RateLimiter::new(
            db,
            AdmissionConfig {
                enabled: true,
                max_requests: 1,
                window_seconds: 60,
            },
            priority,
        );

        let t0 = Utc::now();
        for _ in 0..50 {
            let a = limiter.check_and_record_at("vip", CommandKind::Enqueue, t0).await;
            assert!(a.allowed);
            assert_eq!(a.remaining, None);
        }
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let db = init_memory_database().await.unwrap();
        let limiter = RateLimiter::new(
            db,
            AdmissionConfig {
                enabled: false,
                max_requests: 1,
                window_seconds: 60,
            },
            Arc::new(PrioritySet::new([])),
        );

        let t0 = Utc::now();
        for _ in 0..10 {
            assert!(limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await.allowed);
        }
    }

    #[tokio::test]
    async fn check_does_not_consume_a_slot() {
        let limiter = limiter(1, 60).await;
        let t0 = Utc::now();

        assert!(limiter.check_at("u", CommandKind::Enqueue, t0).await.allowed);
        assert!(limiter.check_at("u", CommandKind::Enqueue, t0).await.allowed);
        assert!(limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await.allowed);
        assert!(!limiter.check_at("u", CommandKind::Enqueue, t0).await.allowed);
    }

    #[tokio::test]
    async fn sweep_purges_stale_records() {
        let limiter = limiter(3, 60).await;
        let t0 = Utc::now() - ChronoDuration::seconds(300);

        limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await;
        limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await;

        // Records are 300s old, far past 2x the 60s window
        let dropped = limiter.sweep().await;
        assert_eq!(dropped, 2);
    }

    #[tokio::test]
    async fn zero_max_requests_denies_everything() {
        let limiter = limiter(0, 60).await;
        let t0 = Utc::now();

        let denied = limiter
            .check_and_record_at("u", CommandKind::Enqueue, t0)
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, Some(0));
        // No counted request can ever leave the window; the reset is a full
        // window away from the attempt
        assert_eq!(denied.reset_at, Some(t0 + ChronoDuration::seconds(60)));
        assert!(denied.wait_seconds >= 1);

        // Priority users still bypass the shut gate
        let db = init_memory_database().await.unwrap();
        let gated = RateLimiter::new(
            db,
            AdmissionConfig {
                enabled: true,
                max_requests: 0,
                window_seconds: 60,
            },
            Arc::new(PrioritySet::new(["vip".to_string()])),
        );
        assert!(gated.check_and_record_at("vip", CommandKind::Enqueue, t0).await.allowed);
    }

    #[tokio::test]
    async fn storage_failure_fails_open() {
        let db = init_memory_database().await.unwrap();
        let limiter = RateLimiter::new(
            db.clone(),
            AdmissionConfig {
                enabled: true,
                max_requests: 2,
                window_seconds: 60,
            },
            Arc::new(PrioritySet::new([])),
        );
        db.close().await;

        // Load over a dead pool starts ungated rather than erroring
        limiter.load().await.unwrap();
        // Admission still works; only the persisted record is lost
        let a = limiter.check_and_record("u", CommandKind::Enqueue).await;
        assert!(a.allowed);
    }

    #[tokio::test]
    async fn window_survives_reload_from_storage() {
        let db = init_memory_database().await.unwrap();
        let config = AdmissionConfig {
            enabled: true,
            max_requests: 2,
            window_seconds: 60,
        };
        let t0 = Utc::now();

        let limiter = RateLimiter::new(db.clone(), config, Arc::new(PrioritySet::new([])));
        limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await;
        limiter.check_and_record_at("u", CommandKind::Enqueue, t0).await;

        // Fresh limiter over the same pool: the persisted log restores state
        let reloaded = RateLimiter::new(db, config, Arc::new(PrioritySet::new([])));
        reloaded.load().await.unwrap();
        let a = reloaded.check_at("u", CommandKind::Enqueue, t0).await;
        assert!(!a.allowed);
    }
}
