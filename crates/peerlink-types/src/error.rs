//! Error types shared by every peerlink crate.

use std::sync::Arc;
use thiserror::Error;

/// Errors from the messaging layer.
#[derive(Error, Debug)]
pub enum WireError {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The local listen port is outside `1..=65535`.
    #[error("Illegal local listen port: {0}")]
    InvalidPort(u16),

    /// The local node has no default message handler.
    #[error("Local node has no default message handler")]
    MissingDefaultHandler,

    /// The local listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The outbound link to a peer could not be established.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Peer address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The outbound link did not come up within the connect timeout.
    #[error("Timed out connecting to {addr}")]
    ConnectTimeout {
        /// Peer address.
        addr: String,
    },

    /// An asynchronous boot (bind or connect) reported failure.
    #[error("Boot failed: {0}")]
    Boot(#[source] Arc<WireError>),

    /// The connection was closed by the peer or locally.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection has no outbound link yet.
    #[error("Connection is not connected")]
    NotConnected,

    /// `connect()` was called twice on the same connection.
    #[error("Connection is already connected to {0}")]
    AlreadyConnected(String),

    /// A frame exceeded the configured size limit.
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },

    /// A frame arrived that the protocol does not allow at this point.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The executor queue is full; the job was rejected.
    #[error("Executor '{name}' rejected job: queue full (capacity {capacity})")]
    ExecutorSaturated { name: String, capacity: usize },

    /// The executor worker is gone; the job was rejected.
    #[error("Executor '{0}' is shut down")]
    ExecutorShutdown(String),

    /// A pending reply was discarded before it resolved.
    #[error("Reply for key {0} was dropped before it arrived")]
    ReplyDropped(String),
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;
