//! # jukebot
//!
//! Chat-driven music request daemon. Users queue tracks from a chat room; a
//! background pipeline resolves and downloads media ahead of need; a per-user
//! sliding-window admission gate prevents command abuse; a playback state
//! machine drives the current-track lifecycle. A thin axum dashboard API and
//! SSE event stream wrap the core 1:1.

pub mod admission;
pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod model;
pub mod playback;
pub mod prefetch;
pub mod queue;
pub mod state;

pub use error::{Error, Result};
