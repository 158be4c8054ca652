//! Error types for jukebot
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Duplicate enqueues are deliberately *not* an error: they are reported through
//! the `AddOutcome::Duplicate` sentinel so callers can phrase a friendly reply.

use thiserror::Error;

/// Main error type for jukebot
#[derive(Error, Debug)]
pub enum Error {
    /// Command rejected by the admission controller (rate limit hit)
    #[error("Rate limit exceeded, try again in {wait_seconds}s")]
    AdmissionDenied {
        /// Seconds until the oldest counted request leaves the window
        wait_seconds: u64,
    },

    /// Search/metadata lookup failed before the track entered the queue
    #[error("Could not resolve track: {0}")]
    Resolution(String),

    /// Media download failed after resolution; the track is marked failed
    #[error("Download failed: {0}")]
    Download(String),

    /// Skip (or other privileged action) attempted by a non-eligible user
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Durable storage unavailable or rejected a mutation
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Queue operation referenced an index that does not exist
    #[error("No queue entry at index {0}")]
    NotFound(usize),

    /// Operation not valid in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using jukebot Error
pub type Result<T> = std::result::Result<T, Error>;
