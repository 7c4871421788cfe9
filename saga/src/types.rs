//! Contract error types.
//!
//! Nothing here unwinds across a component boundary: subsystems map their
//! failures into these variants and the orchestrator decides what becomes a
//! user reply versus a silent drop.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SagaError>;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("network error: {0}")]
    Network(String),

    #[error("daemon unavailable: {0}")]
    Daemon(String),

    #[error("daemon request timed out after {0:?}")]
    DaemonTimeout(std::time::Duration),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("game not found: {0}")]
    GameNotFound(String),

    #[error("supervisor error: {0}")]
    Supervisor(String),

    #[error("signing service error: {0}")]
    Signer(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
