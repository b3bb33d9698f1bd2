//! Error types for blizzard.

use thiserror::Error;

/// Main error type for all blizzard operations.
#[derive(Debug, Error)]
pub enum BlizzardError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (invalid frame, oversized payload, API misuse).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered a call with an error reply.
    #[error("Peer error {code}: {message}")]
    Remote {
        /// JSON-RPC aligned error code.
        code: i64,
        /// Human-readable message from the peer.
        message: String,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// The session is closing or closed; no new requests are accepted.
    #[error("Session closed")]
    SessionClosed,
}

/// Result type alias using BlizzardError.
pub type Result<T> = std::result::Result<T, BlizzardError>;
