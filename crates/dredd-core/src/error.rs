//! Error types for the courier.
//!
//! Two kinds of failure never travel as [`CoreError`]: a rejected inbound
//! envelope is a [`RejectionStage`] inside a validation result, and a failed
//! send is a [`DispatchFailure`] on the delivery receipt.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from setting up or running a courier.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No relay channel could be opened for listening.
    #[error("No relay channel available for {0}")]
    NoRelayChannels(String),

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] dredd_crypto::CryptoError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] dredd_protocol::ProtocolError),

    /// Network error.
    #[error("Network error: {0}")]
    Net(#[from] dredd_net::NetError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for courier operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Validator stage that rejected an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    /// Envelope is not well-formed.
    StructuralCheck,
    /// Past `created_at + ttl_seconds`.
    Expired,
    /// Not addressed to this node, or addressed to an unknown sigil.
    WrongTarget,
    /// Entropy header stale, undecodable or below threshold.
    InsufficientEntropy,
    /// Echo signature did not verify.
    SignatureMismatch,
    /// Message id already seen.
    ReplayDetected,
    /// Payload did not decrypt.
    DecryptionError,
    /// A post-decrypt check failed.
    PolicyViolation,
}

impl RejectionStage {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuralCheck => "structural_check",
            Self::Expired => "expired",
            Self::WrongTarget => "wrong_target",
            Self::InsufficientEntropy => "insufficient_entropy",
            Self::SignatureMismatch => "signature_mismatch",
            Self::ReplayDetected => "replay_detected",
            Self::DecryptionError => "decryption_error",
            Self::PolicyViolation => "policy_violation",
        }
    }
}

impl fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a send produced no delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// Target sigil is not in the registry.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Request parameters out of range.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Relay pool too small for a quorum.
    #[error("Insufficient relays: {available} available, {required} required")]
    InsufficientRelays {
        /// Distinct nodes in the pool.
        available: usize,
        /// Minimum quorum size.
        required: usize,
    },

    /// No quorum node acknowledged in time.
    #[error("Delivery timed out: no relay acknowledged")]
    DeliveryTimeout,

    /// Envelope could not be built.
    #[error("Envelope construction failed: {0}")]
    Construction(String),
}
