//! Database access layer
//!
//! SQLite persistence for the queue, the rate-limit request log, and the
//! key/value settings store.

pub mod init;
pub mod queue;
pub mod rate_limit;
pub mod settings;

pub use init::init_database;
