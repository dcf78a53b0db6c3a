//! Error types for rtmlink operations.

use thiserror::Error;

/// Code reported to the application when a call fails because the
/// connection dropped.
pub const CODE_DISCONNECTED: i32 = 998;

/// Code reported to the application when a call times out, and the
/// fallback for errors with no more specific code.
pub const CODE_TIMEOUT: i32 = 999;

/// Errors that can occur in rtmlink.
#[derive(Debug, Error)]
pub enum RtmlinkError {
    /// I/O error on the worker socket or while handling the worker process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound queue is at capacity; the request was not enqueued.
    #[error("outbound queue full")]
    QueueFull,

    /// No response arrived within the configured call timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection dropped while the call was pending.
    #[error("disconnected from worker")]
    Disconnected,

    /// The worker answered the call with a nonzero application error code.
    #[error("operation failed with code {0}")]
    ErrorCode(i32),

    /// Malformed frame or length prefix. The byte stream cannot be
    /// resynchronized after this, so the connection is torn down.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The payload codec rejected the bytes it was given.
    #[error("codec error: {0}")]
    Codec(String),

    /// The worker process exited on its own.
    #[error("worker exited: {0}")]
    WorkerExit(std::process::ExitStatus),

    /// Operation on a connection or session that has been stopped.
    #[error("link closed")]
    Closed,
}

impl RtmlinkError {
    /// Numeric code for surfacing this error through an API that speaks
    /// error codes rather than typed errors.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ErrorCode(code) => *code,
            Self::Disconnected => CODE_DISCONNECTED,
            _ => CODE_TIMEOUT,
        }
    }
}

/// Result type alias using RtmlinkError.
pub type Result<T> = std::result::Result<T, RtmlinkError>;
