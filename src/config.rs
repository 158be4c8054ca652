//! jukebot process configuration
//!
//! Static, CLI-provided settings. Runtime-tunable knobs (rate limits,
//! prefetch window, retention) live in the database settings table instead.

use std::path::PathBuf;

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory downloaded media is placed in
    pub media_dir: PathBuf,
    /// Base URL of the search/metadata resolver service
    pub resolver_url: String,
    /// External downloader binary invoked per track
    pub downloader_bin: String,
}
