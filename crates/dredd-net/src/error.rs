//! Error types for relay networking.

use thiserror::Error;

/// Errors that can occur while talking to relay nodes.
#[derive(Error, Debug)]
pub enum NetError {
    /// Could not reach the relay.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Relay is not part of this network.
    #[error("Unknown relay node: {0}")]
    UnknownNode(String),

    /// Operation timed out.
    #[error("Timed out {0}")]
    Timeout(String),

    /// Relay sent something that is not a valid frame.
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// Frame exceeds the size limit.
    #[error("Frame too large: exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// The peer closed the connection or the channel was dropped.
    #[error("Channel closed")]
    Closed,

    /// Relay pool too small for a quorum.
    #[error("Insufficient relays: {available} available, {required} required")]
    InsufficientRelays {
        /// Nodes in the pool.
        available: usize,
        /// Minimum quorum size.
        required: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] dredd_protocol::ProtocolError),
}

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Frame(e.to_string())
    }
}

/// Result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
