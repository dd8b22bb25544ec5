use thiserror::Error;

/// Errors raised by robot drivers.
///
/// Callers in the conversation loop log these and carry on; a failed
/// gesture must never end a conversation turn.
#[derive(Debug, Error)]
pub enum RobotError {
    /// The driver does not implement this capability.
    #[error("robot capability not available: {0}")]
    Unsupported(&'static str),

    /// The robot (or its daemon) could not be reached.
    #[error("robot unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered with a non-success status.
    #[error("robot daemon returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level HTTP failure.
    #[error("robot request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Local filesystem failure (frame capture, etc).
    #[error("robot I/O error: {0}")]
    Io(#[from] std::io::Error),
}
