//! Error types for the rxcast client.
//!
//! Connection errors carry the socket path and a hint to check that the
//! daemon is running.

use std::io;
use std::path::PathBuf;

use rxcast_protocol::StreamKind;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

#[derive(Error, Debug)]
pub enum ClientError {
    /// The socket could not be reached.
    #[error("Failed to connect to daemon at {path}: {source} (is rxcastd running?)")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Client and daemon speak incompatible protocol versions.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon sent something other than the expected reply.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The daemon answered with an `error` message.
    #[error("Daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    #[error("Receiver failed to start: {0}")]
    StartFailed(String),

    #[error("Failed to write trunk file: {0}")]
    TrunkWriteFailed(String),

    /// Streaming was requested while the receiver is stopped.
    #[error("No {stream} stream: {reason}")]
    Unavailable { stream: StreamKind, reason: String },

    /// The daemon closed the connection mid-request.
    #[error("Daemon closed the connection")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

// ============================================================================
// Result Type Alias
// ============================================================================

pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
