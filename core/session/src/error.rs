//! Error types for background session operations.

use shineyshot_session_protocol::FrameError;
use std::path::PathBuf;

/// All errors that can occur while resolving, starting, serving or talking
/// to a background session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ─────────────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("home directory not found; set SHINEYSHOT_SOCKET_DIR or pass --dir")]
    HomeNotFound,

    #[error("invalid session name {0:?}")]
    InvalidName(String),

    // ─────────────────────────────────────────────────────────────────────
    // Arbitration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("session {0} is not running")]
    NotRunning(String),

    #[error("no background sessions running")]
    NoneRunning,

    #[error("multiple background sessions running ({}); use --name to pick one", .0.join(", "))]
    Ambiguous(Vec<String>),

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("session {0} is already running")]
    AlreadyRunning(String),

    #[error("session {name} did not become ready: {reason}")]
    NotReady { name: String, reason: String },

    #[error("failed to spawn session daemon: {0}")]
    Spawn(#[source] std::io::Error),

    // ─────────────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("session closed the connection unexpectedly")]
    Disconnected,

    /// Message carried by a `DONE ERR` frame.
    #[error("{0}")]
    Remote(String),
}

impl SessionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;
