//! Error types for the streaming runtime

use crossbeam_channel::{RecvError, SendError};

/// Error type for collaborator and handoff operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to receive from frame channel: {0}")]
    RecvError(#[from] RecvError),

    #[error("Failed to send on frame channel: {0}")]
    SendError(String),

    #[error("Device error: {0}")]
    NodeError(String),

    #[error("Shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

impl From<std::io::Error> for WorkError {
    fn from(e: std::io::Error) -> Self {
        WorkError::NodeError(e.to_string())
    }
}

/// Result type for collaborator operations
pub type WorkResult<T = ()> = Result<T, WorkError>;
