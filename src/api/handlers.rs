//! HTTP request handlers
//!
//! Each handler delegates to one core operation and maps its error to a
//! status code plus a short user-visible message.

use crate::api::server::AppContext;
use crate::commands::EnqueueOutcome;
use crate::error::Error;
use crate::model::TrackRequest;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Requester attributed to dashboard requests that carry no user id
const DASHBOARD_USER: &str = "dashboard";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// URL or search terms
    source: String,
    requester_id: Option<String>,
    group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    status: String,
    track: Option<TrackRequest>,
}

#[derive(Debug, Deserialize)]
pub struct BatchEnqueueRequest {
    /// URLs or search terms, in playlist order
    sources: Vec<String>,
    requester_id: Option<String>,
    group_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchEnqueueResponse {
    added: Vec<TrackRequest>,
    duplicates: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    queue: Vec<TrackRequest>,
}

#[derive(Debug, Serialize)]
pub struct CurrentResponse {
    state: crate::events::PlaybackState,
    track: Option<TrackRequest>,
    position_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RequesterBody {
    requester_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Position in milliseconds; clamped into [0, duration]
    time: i64,
    requester_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeekResponse {
    position_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    from: usize,
    to: usize,
    requester_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    removed: TrackRequest,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn map_error(e: Error) -> ApiError {
    let status = match &e {
        Error::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::Resolution(_) | Error::Download(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(StatusResponse {
            status: e.to_string(),
        }),
    )
}

fn requester(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or(DASHBOARD_USER)
}

/// A bare POST (no body) is a dashboard request
fn body_requester(body: &Option<Json<RequesterBody>>) -> &str {
    body.as_ref()
        .and_then(|Json(b)| b.requester_id.as_deref())
        .unwrap_or(DASHBOARD_USER)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /queue - ordered snapshot of pending tracks
pub async fn get_queue(State(ctx): State<AppContext>) -> Json<QueueResponse> {
    Json(QueueResponse {
        queue: ctx.queue.snapshot().await,
    })
}

/// GET /current - current track and playback position
pub async fn get_current(State(ctx): State<AppContext>) -> Json<CurrentResponse> {
    let session = ctx.state.session().await;
    Json(CurrentResponse {
        state: session.state,
        position_ms: session.position_ms(Utc::now()),
        track: session.track,
    })
}

/// POST /queue/enqueue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let outcome = ctx
        .commands
        .enqueue(&req.source, requester(&req.requester_id), req.group_id)
        .await
        .map_err(map_error)?;

    Ok(Json(match outcome {
        EnqueueOutcome::Enqueued(track) => EnqueueResponse {
            status: "enqueued".to_string(),
            track: Some(track),
        },
        EnqueueOutcome::Duplicate => EnqueueResponse {
            status: "duplicate".to_string(),
            track: None,
        },
    }))
}

/// POST /queue/enqueue-batch - playlist add, one admission slot total
pub async fn enqueue_batch(
    State(ctx): State<AppContext>,
    Json(req): Json<BatchEnqueueRequest>,
) -> Result<Json<BatchEnqueueResponse>, ApiError> {
    let outcome = ctx
        .commands
        .enqueue_batch(&req.sources, requester(&req.requester_id), req.group_id)
        .await
        .map_err(map_error)?;

    Ok(Json(BatchEnqueueResponse {
        added: outcome.added,
        duplicates: outcome.duplicates,
        failed: outcome.failed,
    }))
}

/// DELETE /queue/:index
pub async fn remove(
    State(ctx): State<AppContext>,
    Path(index): Path<usize>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let removed = ctx
        .commands
        .remove(DASHBOARD_USER, index)
        .await
        .map_err(map_error)?;
    Ok(Json(RemoveResponse { removed }))
}

/// POST /queue/reorder
pub async fn reorder(
    State(ctx): State<AppContext>,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let moved = ctx
        .commands
        .reorder(requester(&req.requester_id), req.from, req.to)
        .await
        .map_err(map_error)?;

    if moved {
        Ok(Json(StatusResponse {
            status: "reordered".to_string(),
        }))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(StatusResponse {
                status: "index out of bounds".to_string(),
            }),
        ))
    }
}

/// POST /queue/prefetch - prefetch the entire queue now
pub async fn prefetch_all(
    State(ctx): State<AppContext>,
    body: Option<Json<RequesterBody>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.commands
        .prefetch_all(body_requester(&body))
        .await
        .map_err(map_error)?;
    Ok(Json(StatusResponse {
        status: "prefetching".to_string(),
    }))
}

/// POST /playback/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    body: Option<Json<RequesterBody>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.commands
        .skip(body_requester(&body))
        .await
        .map_err(map_error)?;
    Ok(Json(StatusResponse {
        status: "skipped".to_string(),
    }))
}

/// POST /playback/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    body: Option<Json<RequesterBody>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.commands
        .pause(body_requester(&body))
        .await
        .map_err(map_error)?;
    Ok(Json(StatusResponse {
        status: "paused".to_string(),
    }))
}

/// POST /playback/resume
pub async fn resume(
    State(ctx): State<AppContext>,
    body: Option<Json<RequesterBody>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.commands
        .resume(body_requester(&body))
        .await
        .map_err(map_error)?;
    Ok(Json(StatusResponse {
        status: "playing".to_string(),
    }))
}

/// POST /playback/seek {time: ms}
pub async fn seek(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<SeekResponse>, ApiError> {
    let position_ms = ctx
        .commands
        .seek(requester(&req.requester_id), req.time)
        .await
        .map_err(map_error)?;
    Ok(Json(SeekResponse { position_ms }))
}

/// POST /session/new - hard reset
pub async fn new_session(
    State(ctx): State<AppContext>,
    body: Option<Json<RequesterBody>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.commands
        .new_session(body_requester(&body))
        .await
        .map_err(map_error)?;
    Ok(Json(StatusResponse {
        status: "reset".to_string(),
    }))
}
