//! HTTP API
//!
//! Thin dashboard surface: every endpoint maps 1:1 to a core operation and
//! returns its result or error. State changes stream to clients over SSE.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, AppContext};
