//! HTTP surface tests: routing, status-code mapping, and JSON shapes,
//! exercised against the router without binding a socket.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{wait_until, Fixture};
use jukebot::api::server::{create_router, AppContext};
use jukebot::events::PlaybackState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn router(fixture: &Fixture) -> axum::Router {
    create_router(AppContext {
        commands: Arc::clone(&fixture.commands),
        state: Arc::clone(&fixture.state),
        queue: Arc::clone(&fixture.queue),
    })
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_version() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn enqueue_then_queue_snapshot() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    let (status, body) = send(
        &app,
        "POST",
        "/queue/enqueue",
        Some(json!({"source": "https://stub.example/first", "requester_id": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "enqueued");
    assert_eq!(body["track"]["requester_id"], "alice");

    // Second distinct track stays pending behind the first
    let (status, _) = send(
        &app,
        "POST",
        "/queue/enqueue",
        Some(json!({"source": "https://stub.example/second", "requester_id": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert!(
        wait_until(Duration::from_secs(3), || async {
            fixture.queue.current().await.is_some()
        })
        .await
    );

    let (status, body) = send(&app, "GET", "/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let queue = body["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["resolved_url"], "https://stub.example/second");

    let (status, body) = send(&app, "GET", "/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "playing");
    assert_eq!(body["track"]["resolved_url"], "https://stub.example/first");
}

#[tokio::test]
async fn duplicate_enqueue_reports_duplicate() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    let payload = json!({"source": "https://stub.example/song", "requester_id": "alice"});
    send(&app, "POST", "/queue/enqueue", Some(payload.clone())).await;
    assert!(
        wait_until(Duration::from_secs(3), || async {
            fixture.queue.current().await.is_some()
        })
        .await
    );

    let (status, body) = send(&app, "POST", "/queue/enqueue", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert!(body["track"].is_null());
}

#[tokio::test]
async fn skip_by_bystander_is_forbidden() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    send(
        &app,
        "POST",
        "/queue/enqueue",
        Some(json!({"source": "https://stub.example/song", "requester_id": "alice"})),
    )
    .await;
    assert!(
        wait_until(Duration::from_secs(3), || async {
            fixture.state.playback_state().await == PlaybackState::Playing
        })
        .await
    );

    let (status, _) = send(
        &app,
        "POST",
        "/playback/skip",
        Some(json!({"requester_id": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        "/playback/skip",
        Some(json!({"requester_id": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn seek_returns_clamped_position() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    send(
        &app,
        "POST",
        "/queue/enqueue",
        Some(json!({"source": "https://stub.example/song", "requester_id": "alice"})),
    )
    .await;
    assert!(
        wait_until(Duration::from_secs(3), || async {
            fixture.state.playback_state().await == PlaybackState::Playing
        })
        .await
    );

    // Stub metadata reports 60s; anything past that clamps to the duration
    let (status, body) = send(
        &app,
        "POST",
        "/playback/seek",
        Some(json!({"time": 120_000, "requester_id": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position_ms"], 60_000);
}

#[tokio::test]
async fn playback_posts_accept_empty_bodies() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    send(
        &app,
        "POST",
        "/queue/enqueue",
        Some(json!({"source": "https://stub.example/song"})),
    )
    .await;
    assert!(
        wait_until(Duration::from_secs(3), || async {
            fixture.state.playback_state().await == PlaybackState::Playing
        })
        .await
    );

    // No body, no content-type: attributed to the dashboard user
    let (status, body) = send(&app, "POST", "/playback/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) = send(&app, "POST", "/playback/resume", None).await;
    assert_eq!(status, StatusCode::OK);

    // The dashboard enqueued this track, so a bare skip is permitted too
    let (status, _) = send(&app, "POST", "/playback/skip", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/session/new", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fixture.state.playback_state().await, PlaybackState::Idle);
}

#[tokio::test]
async fn remove_missing_index_is_not_found() {
    let fixture = Fixture::new().await;
    let app = router(&fixture);

    let (status, _) = send(&app, "DELETE", "/queue/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
