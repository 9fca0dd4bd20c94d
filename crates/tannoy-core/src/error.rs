//! Error types for the announcement engine

use crate::model::{RequestId, RequestStatus};
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while queueing, scheduling or playing announcements.
///
/// None of these are fatal to the engine: the orchestrator marks the affected
/// request and keeps draining the queue.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Duplicate request id: {0}")]
    DuplicateId(RequestId),

    #[error("Request not found: {0}")]
    NotFound(RequestId),

    #[error("Request queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Invalid volume {0}: must be within 0.0..=1.0")]
    InvalidVolume(f32),

    #[error("Audio sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schedule store error: {0}")]
    Store(String),

    #[error("Log sink error: {0}")]
    Log(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
