//! Nicolive error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, NicoliveError>;

/// Errors that can occur while relaying a live comment stream.
#[derive(Error, Debug)]
pub enum NicoliveError {
    /// Connection-related errors (handshake, closed socket, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// A frame did not match the shape expected for its declared type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Program listing or embedded page lookup failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// HTTP errors from the discovery client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `remove_subscriber` was called with no subscribers left
    #[error("Subscriber count underflow for channel {0}")]
    SubscriberUnderflow(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NicoliveError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a discovery error.
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
