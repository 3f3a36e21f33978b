//! Echo signatures.
//!
//! An echo signature is a BLAKE3 keyed MAC over the envelope metadata a
//! receiver checks before it decrypts anything. The MAC key is derived from
//! the session secret of the epoch recorded in the envelope's ciphertext, so
//! only members of the deployment can produce or verify one.
//!
//! Inputs are length-prefixed, so moving bytes between fields changes the tag.

use chrono::{DateTime, Utc};
use dredd_crypto::Hash256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain_separation::{build_domain_label, contexts, purposes};
use crate::limits::ECHO_SIGNATURE_HEX_LEN;
use crate::sensitivity::SensitivityLevel;
use crate::session::SessionSecret;
use crate::sigil::SigilId;
use crate::{ProtocolError, Result};

/// MAC key for echo signatures.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EchoKey([u8; 32]);

impl EchoKey {
    /// Derive the echo key belonging to a session secret.
    pub fn derive(secret: &SessionSecret) -> Self {
        Self(Hash256::derive_key(contexts::ECHO_KEY, secret.as_bytes()))
    }
}

impl std::fmt::Debug for EchoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EchoKey([REDACTED])")
    }
}

/// Envelope fields covered by the echo signature.
#[derive(Debug, Clone, Copy)]
pub struct EchoInput<'a> {
    /// Envelope message id.
    pub message_id: &'a str,
    /// Addressed sigil.
    pub target: &'a SigilId,
    /// Entropy header exactly as transmitted.
    pub entropy_header: &'a str,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Sensitivity level.
    pub sensitivity: SensitivityLevel,
    /// Session secret epoch used for the ciphertext.
    pub key_epoch: u32,
}

/// Keyed digest binding envelope metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct EchoSignature(Hash256);

impl EchoSignature {
    /// Compute the signature of `input`.
    pub fn compute(key: &EchoKey, input: &EchoInput<'_>) -> Self {
        let label = build_domain_label(purposes::ECHO_SIG, b"");
        let created = input.created_at.timestamp_micros().to_le_bytes();
        let ttl = input.ttl_seconds.to_le_bytes();
        let epoch = input.key_epoch.to_le_bytes();
        Self(Hash256::keyed_hash_many(
            &key.0,
            &[
                &label[..],
                input.message_id.as_bytes(),
                input.target.as_bytes(),
                input.entropy_header.as_bytes(),
                &created[..],
                &ttl[..],
                input.sensitivity.as_str().as_bytes(),
                &epoch[..],
            ],
        ))
    }

    /// Recompute over `input` and compare in constant time.
    pub fn verify(&self, key: &EchoKey, input: &EchoInput<'_>) -> bool {
        let expected = Self::compute(key, input);
        self.0.as_bytes().ct_eq(expected.0.as_bytes()).into()
    }

    /// 64-character lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] unless `s` is exactly 64 hex
    /// characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != ECHO_SIGNATURE_HEX_LEN {
            return Err(ProtocolError::Malformed(format!(
                "echo_signature must be {} hex characters",
                ECHO_SIGNATURE_HEX_LEN
            )));
        }
        Hash256::from_hex(s)
            .map(Self)
            .map_err(|_| ProtocolError::Malformed("echo_signature is not hex".into()))
    }
}

impl std::fmt::Debug for EchoSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EchoSignature({}..)", &self.to_hex()[..12])
    }
}
