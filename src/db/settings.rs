//! Settings store
//!
//! Key/value settings table with read-or-initialize-default accessors.
//! All settings are global (not per-user).

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Generic setting getter
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Internal(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter (insert or update)
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

async fn get_or_init<T: FromStr + ToString + Copy>(
    db: &Pool<Sqlite>,
    key: &str,
    default: T,
) -> Result<T> {
    match get_setting::<T>(db, key).await? {
        Some(v) => Ok(v),
        None => {
            set_setting(db, key, default).await?;
            Ok(default)
        }
    }
}

/// Rate limiting enabled (default: true)
pub async fn rate_limit_enabled(db: &Pool<Sqlite>) -> Result<bool> {
    get_or_init(db, "rate_limit_enabled", true).await
}

/// Max requests per user per command within the window (default: 5)
pub async fn rate_limit_max_requests(db: &Pool<Sqlite>) -> Result<u32> {
    get_or_init(db, "rate_limit_max_requests", 5u32).await
}

/// Sliding window length in seconds (default: 60)
pub async fn rate_limit_window_seconds(db: &Pool<Sqlite>) -> Result<u64> {
    get_or_init(db, "rate_limit_window_seconds", 60u64).await
}

/// Whether the pipeline prefetches upcoming tracks at all (default: true)
pub async fn prefetch_next(db: &Pool<Sqlite>) -> Result<bool> {
    get_or_init(db, "prefetch_next", true).await
}

/// Lookahead window size; 0 means prefetch the entire queue (default: 2)
pub async fn prefetch_count(db: &Pool<Sqlite>) -> Result<usize> {
    get_or_init(db, "prefetch_count", 2usize).await
}

/// Delay between a skip and the next track starting (default: 500 ms)
pub async fn skip_transition_delay_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_or_init(db, "skip_transition_delay_ms", 500u64).await
}

/// Delete downloaded media after the track has played (default: true)
pub async fn cleanup_after_play(db: &Pool<Sqlite>) -> Result<bool> {
    get_or_init(db, "cleanup_after_play", true).await
}

/// Comma-separated priority (VIP) user ids (default: empty)
pub async fn priority_users(db: &Pool<Sqlite>) -> Result<Vec<String>> {
    let raw = match get_setting::<String>(db, "priority_users").await? {
        Some(s) => s,
        None => {
            set_setting(db, "priority_users", String::new()).await?;
            String::new()
        }
    };
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}
