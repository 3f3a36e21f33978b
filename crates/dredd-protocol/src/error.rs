//! Error types for protocol operations.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Cryptographic operation failed outside the decrypt path.
    #[error("Crypto error: {0}")]
    Crypto(#[from] dredd_crypto::CryptoError),

    /// Sigil does not satisfy the naming rules.
    #[error("Invalid sigil: {0}")]
    InvalidSigil(String),

    /// Sigil is not present in the registry.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Relay address is empty or malformed.
    #[error("Invalid relay address: {0}")]
    InvalidRelayAddress(String),

    /// Envelope failed the structural check.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Serialized envelope exceeds the size limit.
    #[error("Envelope too large: {size} bytes exceeds maximum {max} bytes")]
    EnvelopeTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload exceeds the dispatch limit.
    #[error("Payload too large: {size} bytes exceeds maximum {max} bytes")]
    PayloadTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Entropy header could not be decoded.
    #[error("Invalid entropy header: {0}")]
    InvalidEntropyHeader(String),

    /// No header draw reached the requested threshold.
    #[error("Entropy threshold {threshold} not reached after {attempts} attempts")]
    EntropyUnreachable {
        /// Threshold that was requested.
        threshold: f64,
        /// Number of draws made.
        attempts: usize,
    },

    /// Entropy thresholds are out of range or not monotonic.
    #[error("Invalid entropy thresholds: {0}")]
    InvalidThresholds(String),

    /// Session keyring is empty or contains duplicate epochs.
    #[error("Invalid session keyring: {0}")]
    InvalidKeyring(String),

    /// Hybrid decryption failed. Deliberately carries no detail.
    #[error("Decryption failed")]
    Decryption,

    /// JSON encoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
