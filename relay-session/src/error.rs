//! Error types for session lifecycle operations.

/// Result type for session lifecycle operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session lifecycle error.
///
/// Deliberately small: classification failures resolve to the fallback
/// workflow and persistence failures are logged and swallowed, so neither
/// surfaces here. Agent-runtime failures are the caller's to report.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    #[error("No session for conversation {0}")]
    NotFound(String),
}
