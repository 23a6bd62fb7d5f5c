//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Credentials unavailable: key or endpoint missing")]
    CredentialsUnavailable,

    #[error("Close failed: {0}")]
    CloseFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Dispatch loop already running")]
    AlreadyRunning,

    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;

/// Frame decoding failure. Contained by the supervisor, never fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
}
