//! Rate-limit request log persistence
//!
//! The admission controller counts from its in-memory window; this log exists
//! so limits survive a restart. Write failures are the caller's concern: the
//! controller logs and drops them (a missed record only weakens future
//! limiting, it never blocks anyone).

use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

/// Append one request record
pub async fn insert_request(
    db: &Pool<Sqlite>,
    user_id: &str,
    command: &str,
    requested_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rate_limit_requests (user_id, command, requested_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(command)
    .bind(requested_at.to_rfc3339())
    .execute(db)
    .await?;
    Ok(())
}

/// Load all records newer than `since`, for rebuilding the in-memory window
/// at startup. Returned in ascending timestamp order.
pub async fn load_since(
    db: &Pool<Sqlite>,
    since: DateTime<Utc>,
) -> Result<Vec<(String, String, DateTime<Utc>)>> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        r#"
        SELECT user_id, command, requested_at
        FROM rate_limit_requests
        WHERE requested_at >= ?
        ORDER BY requested_at ASC
        "#,
    )
    .bind(since.to_rfc3339())
    .fetch_all(db)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for (user_id, command, ts) in rows {
        // Skip unparseable rows rather than failing the whole load
        if let Ok(at) = DateTime::parse_from_rfc3339(&ts) {
            records.push((user_id, command, at.with_timezone(&Utc)));
        }
    }
    Ok(records)
}

/// Purge records older than `cutoff`; returns rows removed
pub async fn purge_older_than(db: &Pool<Sqlite>, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rate_limit_requests WHERE requested_at < ?")
        .bind(cutoff.to_rfc3339())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
