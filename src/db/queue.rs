//! Queue persistence
//!
//! Every queue mutation writes through here before the in-memory cache is
//! considered updated, so a restart resumes the exact pending order.

use crate::error::{Error, Result};
use crate::model::{TrackRequest, TrackStatus};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use uuid::Uuid;

type QueueRow = (
    String,         // guid
    String,         // source_ref
    String,         // resolved_url
    Option<String>, // title
    Option<String>, // artist
    String,         // requester_id
    Option<String>, // group_id
    String,         // added_at (RFC 3339)
    String,         // status
    Option<String>, // local_media_path
    Option<i64>,    // duration_ms
);

fn row_to_track(row: QueueRow) -> Result<TrackRequest> {
    let id = Uuid::parse_str(&row.0)
        .map_err(|e| Error::Internal(format!("Invalid queue entry UUID: {}", e)))?;
    let added_at = DateTime::parse_from_rfc3339(&row.7)
        .map_err(|e| Error::Internal(format!("Invalid added_at timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(TrackRequest {
        id,
        source_ref: row.1,
        resolved_url: row.2,
        title: row.3,
        artist: row.4,
        requester_id: row.5,
        group_id: row.6,
        added_at,
        status: TrackStatus::from_db(&row.8),
        local_media_path: row.9.map(PathBuf::from),
        duration_ms: row.10.map(|v| v as u64),
    })
}

/// Load all pending entries ordered by play_order
pub async fn load_queue(db: &Pool<Sqlite>) -> Result<Vec<TrackRequest>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        r#"
        SELECT guid, source_ref, resolved_url, title, artist,
               requester_id, group_id, added_at, status,
               local_media_path, duration_ms
        FROM queue
        ORDER BY play_order ASC
        "#,
    )
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_track).collect()
}

/// Insert a pending entry at the given play order
pub async fn insert_track(db: &Pool<Sqlite>, track: &TrackRequest, play_order: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO queue (guid, source_ref, resolved_url, title, artist,
                           requester_id, group_id, added_at, status,
                           local_media_path, duration_ms, play_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(track.id.to_string())
    .bind(&track.source_ref)
    .bind(&track.resolved_url)
    .bind(&track.title)
    .bind(&track.artist)
    .bind(&track.requester_id)
    .bind(&track.group_id)
    .bind(track.added_at.to_rfc3339())
    .bind(track.status.as_str())
    .bind(track.local_media_path.as_ref().map(|p| p.display().to_string()))
    .bind(track.duration_ms.map(|v| v as i64))
    .bind(play_order)
    .execute(db)
    .await?;

    Ok(())
}

/// Delete one entry by id
pub async fn delete_track(db: &Pool<Sqlite>, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM queue WHERE guid = ?")
        .bind(id.to_string())
        .execute(db)
        .await?;
    Ok(())
}

/// Remove every pending entry
pub async fn clear_queue(db: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("DELETE FROM queue").execute(db).await?;
    Ok(())
}

/// Update status only
pub async fn update_status(db: &Pool<Sqlite>, id: Uuid, status: TrackStatus) -> Result<()> {
    sqlx::query("UPDATE queue SET status = ? WHERE guid = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(db)
        .await?;
    Ok(())
}

/// Update metadata and status after prefetch work
pub async fn update_prefetch_result(db: &Pool<Sqlite>, track: &TrackRequest) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE queue
        SET title = ?, artist = ?, duration_ms = ?, local_media_path = ?, status = ?
        WHERE guid = ?
        "#,
    )
    .bind(&track.title)
    .bind(&track.artist)
    .bind(track.duration_ms.map(|v| v as i64))
    .bind(track.local_media_path.as_ref().map(|p| p.display().to_string()))
    .bind(track.status.as_str())
    .bind(track.id.to_string())
    .execute(db)
    .await?;
    Ok(())
}

/// Rewrite play_order for the whole queue in one transaction (reorder)
pub async fn persist_order(db: &Pool<Sqlite>, ordered_ids: &[Uuid]) -> Result<()> {
    let mut tx = db.begin().await?;
    for (order, id) in ordered_ids.iter().enumerate() {
        sqlx::query("UPDATE queue SET play_order = ? WHERE guid = ?")
            .bind(order as i64)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
