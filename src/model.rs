//! Core domain types
//!
//! Track requests, their lifecycle status, and the URL normalization used for
//! content deduplication across the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle status of a track request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Enqueued, not yet picked up by the prefetch pipeline
    Queued,
    /// Prefetch in flight (metadata fetch and/or download)
    Resolving,
    /// Media downloaded to a stable local path; eligible for playback
    Ready,
    /// Currently playing (the track is no longer a queue member)
    Playing,
    /// Resolution or download failed; never auto-retried
    Failed,
}

impl TrackStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Queued => "queued",
            TrackStatus::Resolving => "resolving",
            TrackStatus::Ready => "ready",
            TrackStatus::Playing => "playing",
            TrackStatus::Failed => "failed",
        }
    }

    /// Parse the database string form; unknown values map to Queued
    /// so a restart never wedges on an unrecognized status.
    pub fn from_db(s: &str) -> Self {
        match s {
            "resolving" => TrackStatus::Resolving,
            "ready" => TrackStatus::Ready,
            "playing" => TrackStatus::Playing,
            "failed" => TrackStatus::Failed,
            _ => TrackStatus::Queued,
        }
    }
}

/// A unit of enqueued work representing one song to be played
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Request UUID
    pub id: Uuid,

    /// Original user input: a URL or free-text search terms
    pub source_ref: String,

    /// Concrete media URL after resolution; dedup key (normalized)
    pub resolved_url: String,

    pub title: Option<String>,
    pub artist: Option<String>,

    /// Chat user who requested the track
    pub requester_id: String,

    /// Chat room / group the request came from
    pub group_id: Option<String>,

    pub added_at: DateTime<Utc>,

    pub status: TrackStatus,

    /// Stable local path once the media is downloaded
    pub local_media_path: Option<PathBuf>,

    pub duration_ms: Option<u64>,
}

impl TrackRequest {
    /// Create a freshly enqueued request with a new UUID
    pub fn new(
        source_ref: impl Into<String>,
        resolved_url: impl Into<String>,
        requester_id: impl Into<String>,
        group_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.into(),
            resolved_url: resolved_url.into(),
            title: None,
            artist: None,
            requester_id: requester_id.into(),
            group_id,
            added_at: Utc::now(),
            status: TrackStatus::Queued,
            local_media_path: None,
            duration_ms: None,
        }
    }
}

/// Normalize a media URL for content deduplication.
///
/// Two requests for the same content must compare equal even when one carries
/// a fragment, a default port, or different scheme/host casing. Query strings
/// are preserved: many media hosts key the video id in the query.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();

    // Split off the fragment first; it never affects content identity
    let no_frag = match trimmed.split_once('#') {
        Some((head, _)) => head,
        None => trimmed,
    };

    let (scheme, rest) = match no_frag.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => return no_frag.trim_end_matches('/').to_string(),
    };

    let (authority, path_query) = match rest.split_once('/') {
        Some((a, pq)) => (a, Some(pq)),
        None => (rest, None),
    };

    // Lowercase the host, strip default ports
    let mut authority = authority.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() && authority.ends_with(default_port) {
        authority.truncate(authority.len() - default_port.len());
    }

    match path_query {
        Some(pq) if !pq.is_empty() => {
            format!("{}://{}/{}", scheme, authority, pq.trim_end_matches('/'))
        }
        _ => format!("{}://{}", scheme, authority),
    }
}

/// Heuristic URL classification: anything with a scheme is a direct URL,
/// everything else is treated as search terms for the resolver.
pub fn looks_like_url(source: &str) -> bool {
    let s = source.trim();
    let lower = s.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    lower.starts_with("http://") || lower.starts_with("https://")
}
