//! Crate-wide error type
//!
//! Store and transport failures surface through [`SurgeflowError`]; the
//! application boundary (main, task wiring) uses `anyhow` on top of it.

use thiserror::Error;

/// All errors generated in `surgeflow`.
#[derive(Debug, Error)]
pub enum SurgeflowError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("tape store unavailable: {0}")]
    Tape(String),

    #[error("queue closed for '{0}'")]
    QueueClosed(String),

    #[error("depth snapshot request failed: {0}")]
    Rest(#[from] reqwest::Error),

    #[error("malformed depth snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("empty pair universe at startup")]
    EmptyUniverse,
}

pub type Result<T> = std::result::Result<T, SurgeflowError>;
