//! HTTP server setup and routing

use crate::commands::Commands;
use crate::error::Result;
use crate::queue::QueueStore;
use crate::state::SharedState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub commands: Arc<Commands>,
    pub state: Arc<SharedState>,
    pub queue: Arc<QueueStore>,
}

/// Build the dashboard router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Queue
        .route("/queue", get(super::handlers::get_queue))
        .route("/queue/enqueue", post(super::handlers::enqueue))
        .route("/queue/enqueue-batch", post(super::handlers::enqueue_batch))
        .route("/queue/:index", delete(super::handlers::remove))
        .route("/queue/reorder", post(super::handlers::reorder))
        .route("/queue/prefetch", post(super::handlers::prefetch_all))
        // Playback
        .route("/current", get(super::handlers::get_current))
        .route("/playback/skip", post(super::handlers::skip))
        .route("/playback/pause", post(super::handlers::pause))
        .route("/playback/resume", post(super::handlers::resume))
        .route("/playback/seek", post(super::handlers::seek))
        // Session
        .route("/session/new", post(super::handlers::new_session))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Run the HTTP API server until the shutdown future resolves
pub async fn run(
    ctx: AppContext,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::Error::Http(format!("bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::Http(e.to_string()))?;
    Ok(())
}
