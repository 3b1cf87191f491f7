//! Error types
//!
//! Nothing here is fatal to the server: every variant is scoped to a single
//! connection.

/// Minimum nickname length, in characters, after trimming
pub const MIN_NICKNAME_CHARS: usize = 2;

/// Login failures. The Display text is sent verbatim to the client in a
/// `login_error` frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("請填寫您的暱稱（至少{}個字元）。", MIN_NICKNAME_CHARS)]
    InvalidName,

    #[error("暱稱 \"{0}\" 已被使用，請換一個！")]
    NameTaken(String),
}

/// Per-connection failures
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Send to connection failed")]
    SendFailure,

    #[error("Connection did not answer the liveness probe")]
    Unresponsive,

    #[error("Server shutting down")]
    Shutdown,

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] axum::Error),
}
