//! Envelopes: the unit of transmission.
//!
//! [`WireEnvelope`] is the JSON shape relays carry; every field is a plain
//! string or integer. [`Envelope`] is the typed form a node works with.
//! [`Envelope::from_wire`] is the structural check: it either produces a fully
//! typed envelope or rejects the input as malformed.
//!
//! ```text
//! {
//!   "message_id":        "dredd_<unix>_<16 hex>",
//!   "target_identity":   "<sigil>",
//!   "entropy_header":    "<base64>",
//!   "encrypted_payload": "<base64 of HybridCiphertext JSON>",
//!   "decoy_descriptor":  { ... },
//!   "echo_signature":    "<64 hex>",
//!   "created_at":        "<RFC 3339 UTC>",
//!   "ttl_seconds":       3600,
//!   "sensitivity_level": "low" | "medium" | "high" | "critical"
//! }
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::cipher::HybridCiphertext;
use crate::codec::base64_bytes;
use crate::echo::{EchoInput, EchoKey, EchoSignature};
use crate::limits::{
    MAX_ENTROPY_HEADER_LEN, MAX_ENVELOPE_BYTES, MAX_MESSAGE_ID_LEN, MAX_TTL_SECS,
    MESSAGE_ID_PREFIX, MESSAGE_ID_RANDOM_BYTES,
};
use crate::sensitivity::SensitivityLevel;
use crate::sigil::SigilId;
use crate::trap::DecoyDescriptor;
use crate::{ProtocolError, Result};

// ===== Message id =====

/// Globally unique envelope id: `dredd_<unix seconds>_<16 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Fresh id for a message created at `now`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut random = [0u8; MESSAGE_ID_RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);
        Self(format!(
            "{}_{}_{}",
            MESSAGE_ID_PREFIX,
            now.timestamp(),
            hex::encode(random)
        ))
    }

    /// Validate an id received off the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] unless the id has the generated
    /// shape.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.len() > MAX_MESSAGE_ID_LEN || !is_well_formed(&id) {
            return Err(ProtocolError::Malformed("message_id has invalid format".into()));
        }
        Ok(Self(id))
    }

    /// Id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_well_formed(id: &str) -> bool {
    let mut parts = id.splitn(3, '_');
    let (Some(prefix), Some(secs), Some(random)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == MESSAGE_ID_PREFIX
        && !secs.is_empty()
        && secs.bytes().all(|b| b.is_ascii_digit())
        && random.len() == MESSAGE_ID_RANDOM_BYTES * 2
        && random.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

// ===== Inner payload =====

/// Content type assumed when a sender does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What the hybrid cipher actually encrypts.
///
/// Repeating the message id inside the ciphertext lets a receiver detect a
/// ciphertext transplanted into a different envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerPayload {
    /// MIME-style content type.
    pub content_type: String,
    /// Message id of the enclosing envelope.
    pub message_id: String,
    /// Application bytes.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl InnerPayload {
    /// Serialize for encryption.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse decrypted bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the plaintext is not an inner
    /// payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed(format!("inner payload: {}", e)))
    }
}

// ===== Wire form =====

/// Envelope exactly as it travels between nodes and relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Message id.
    pub message_id: String,
    /// Target sigil.
    pub target_identity: String,
    /// Base64 entropy header.
    pub entropy_header: String,
    /// Base64 hybrid ciphertext.
    pub encrypted_payload: String,
    /// Trap material.
    pub decoy_descriptor: DecoyDescriptor,
    /// Hex echo signature.
    pub echo_signature: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Sensitivity level name.
    pub sensitivity_level: String,
}

impl WireEnvelope {
    /// Parse JSON text, enforcing [`MAX_ENVELOPE_BYTES`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EnvelopeTooLarge`] or
    /// [`ProtocolError::Malformed`].
    pub fn from_json(json: &str) -> Result<Self> {
        if json.len() > MAX_ENVELOPE_BYTES {
            return Err(ProtocolError::EnvelopeTooLarge {
                size: json.len(),
                max: MAX_ENVELOPE_BYTES,
            });
        }
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize as JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ===== Typed envelope =====

/// Everything in an envelope except its echo signature.
#[derive(Debug, Clone)]
pub struct UnsignedEnvelope {
    /// Message id.
    pub message_id: MessageId,
    /// Target sigil.
    pub target_identity: SigilId,
    /// Encoded entropy header.
    pub entropy_header: String,
    /// Hybrid ciphertext.
    pub encrypted_payload: HybridCiphertext,
    /// Trap material.
    pub decoy_descriptor: DecoyDescriptor,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Sensitivity level.
    pub sensitivity_level: SensitivityLevel,
}

impl UnsignedEnvelope {
    /// Attach an echo signature.
    ///
    /// `created_at` is truncated to microseconds first, the precision the
    /// wire format carries.
    pub fn sign(self, key: &EchoKey) -> Envelope {
        let created_at = DateTime::from_timestamp_micros(self.created_at.timestamp_micros())
            .unwrap_or(self.created_at);

        let echo_signature = EchoSignature::compute(
            key,
            &EchoInput {
                message_id: self.message_id.as_str(),
                target: &self.target_identity,
                entropy_header: &self.entropy_header,
                created_at,
                ttl_seconds: self.ttl_seconds,
                sensitivity: self.sensitivity_level,
                key_epoch: self.encrypted_payload.key_epoch,
            },
        );

        Envelope {
            message_id: self.message_id,
            target_identity: self.target_identity,
            entropy_header: self.entropy_header,
            encrypted_payload: self.encrypted_payload,
            decoy_descriptor: self.decoy_descriptor,
            echo_signature,
            created_at,
            ttl_seconds: self.ttl_seconds,
            sensitivity_level: self.sensitivity_level,
        }
    }
}

/// Structurally valid envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Message id.
    pub message_id: MessageId,
    /// Target sigil.
    pub target_identity: SigilId,
    /// Encoded entropy header, kept verbatim because the echo signature
    /// covers the transmitted text.
    pub entropy_header: String,
    /// Hybrid ciphertext.
    pub encrypted_payload: HybridCiphertext,
    /// Trap material.
    pub decoy_descriptor: DecoyDescriptor,
    /// Echo signature.
    pub echo_signature: EchoSignature,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    pub ttl_seconds: u64,
    /// Sensitivity level.
    pub sensitivity_level: SensitivityLevel,
}

impl Envelope {
    /// Fields covered by the echo signature.
    pub fn echo_input(&self) -> EchoInput<'_> {
        EchoInput {
            message_id: self.message_id.as_str(),
            target: &self.target_identity,
            entropy_header: &self.entropy_header,
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            sensitivity: self.sensitivity_level,
            key_epoch: self.encrypted_payload.key_epoch,
        }
    }

    /// Check the echo signature against `key`.
    pub fn verify_echo(&self, key: &EchoKey) -> bool {
        self.echo_signature.verify(key, &self.echo_input())
    }

    /// Absolute expiry instant, `created_at + ttl_seconds`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        // `from_wire` caps ttl_seconds, so this cannot overflow.
        self.created_at + Duration::seconds(self.ttl_seconds as i64)
    }

    /// True once `now` is past the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Structural check: convert wire fields into typed ones.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] naming the first bad field.
    pub fn from_wire(wire: WireEnvelope) -> Result<Self> {
        let message_id = MessageId::parse(wire.message_id)?;

        let target_identity = SigilId::new(wire.target_identity)
            .map_err(|_| ProtocolError::Malformed("target_identity is not a valid sigil".into()))?;

        if wire.entropy_header.is_empty()
            || wire.entropy_header.len() > MAX_ENTROPY_HEADER_LEN
            || STANDARD.decode(&wire.entropy_header).is_err()
        {
            return Err(ProtocolError::Malformed("entropy_header is not base64".into()));
        }

        let encrypted_payload = HybridCiphertext::decode(&wire.encrypted_payload)?;
        wire.decoy_descriptor.validate()?;
        let echo_signature = EchoSignature::from_hex(&wire.echo_signature)?;

        let created_at = DateTime::parse_from_rfc3339(&wire.created_at)
            .map_err(|_| ProtocolError::Malformed("created_at is not RFC 3339".into()))?
            .with_timezone(&Utc);

        if wire.ttl_seconds > MAX_TTL_SECS {
            return Err(ProtocolError::Malformed(format!(
                "ttl_seconds exceeds maximum {}",
                MAX_TTL_SECS
            )));
        }

        let sensitivity_level = wire.sensitivity_level.parse()?;

        Ok(Self {
            message_id,
            target_identity,
            entropy_header: wire.entropy_header,
            encrypted_payload,
            decoy_descriptor: wire.decoy_descriptor,
            echo_signature,
            created_at,
            ttl_seconds: wire.ttl_seconds,
            sensitivity_level,
        })
    }

    /// Convert to the wire form.
    pub fn to_wire(&self) -> Result<WireEnvelope> {
        Ok(WireEnvelope {
            message_id: self.message_id.to_string(),
            target_identity: self.target_identity.to_string(),
            entropy_header: self.entropy_header.clone(),
            encrypted_payload: self.encrypted_payload.encode()?,
            decoy_descriptor: self.decoy_descriptor.clone(),
            echo_signature: self.echo_signature.to_hex(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ttl_seconds: self.ttl_seconds,
            sensitivity_level: self.sensitivity_level.to_string(),
        })
    }

    /// Parse and structurally check JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_wire(WireEnvelope::from_json(json)?)
    }

    /// Serialize as JSON text.
    pub fn to_json(&self) -> Result<String> {
        self.to_wire()?.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSecret;
    use crate::trap::MirrorTrap;

    fn sample(key: &EchoKey) -> Envelope {
        let created_at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let message_id = MessageId::generate(created_at);
        UnsignedEnvelope {
            decoy_descriptor: MirrorTrap::new(&SessionSecret::new(1, [1; 32]))
                .generate_trap(message_id.as_str()),
            message_id,
            target_identity: SigilId::new("council-01").unwrap(),
            entropy_header: STANDARD.encode(b"{}"),
            encrypted_payload: HybridCiphertext {
                algorithm: "xchacha20poly1305-wrap-v1".into(),
                key_epoch: 1,
                key_window: 472_222,
                wrapped_key: vec![1; 72],
                ciphertext: vec![2; 44],
                wrap_tag: "ab".repeat(32),
            },
            created_at,
            ttl_seconds: 3600,
            sensitivity_level: SensitivityLevel::High,
        }
        .sign(key)
    }

    fn key() -> EchoKey {
        EchoKey::derive(&SessionSecret::new(1, [1; 32]))
    }

    #[test]
    fn test_message_id_shape() {
        let id = MessageId::generate(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        assert!(id.as_str().starts_with("dredd_1700000000_"));
        assert_eq!(id.as_str().len(), "dredd_1700000000_".len() + 16);
        assert!(MessageId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_message_id_rejects_bad_shapes() {
        for bad in [
            "",
            "dredd",
            "dredd_123",
            "other_123_0011223344556677",
            "dredd_12a_0011223344556677",
            "dredd_123_00112233445566",
            "dredd_123_001122334455667z",
        ] {
            assert!(MessageId::parse(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_json_roundtrip_preserves_signature() {
        let key = key();
        let env = sample(&key);
        let parsed = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed.message_id, env.message_id);
        assert_eq!(parsed.created_at, env.created_at);
        assert!(parsed.verify_echo(&key));
    }

    #[test]
    fn test_created_at_truncated_to_micros() {
        let env = sample(&key());
        assert_eq!(env.created_at.timestamp_subsec_nanos(), 123_456_000);
        let wire = env.to_wire().unwrap();
        assert!(wire.created_at.ends_with(".123456Z"));
    }

    #[test]
    fn test_expiry() {
        let mut env = sample(&key());
        assert!(!env.is_expired(env.created_at + Duration::seconds(3600)));
        assert!(env.is_expired(env.created_at + Duration::seconds(3601)));

        env.ttl_seconds = 0;
        assert!(!env.is_expired(env.created_at));
        assert!(env.is_expired(env.created_at + Duration::microseconds(1)));
    }

    #[test]
    fn test_structural_rejections() {
        let base = sample(&key()).to_wire().unwrap();

        let mut w = base.clone();
        w.target_identity = "bad sigil".into();
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.entropy_header = "%%%".into();
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.encrypted_payload = STANDARD.encode(b"[1,2]");
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.echo_signature = "abc".into();
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.created_at = "yesterday".into();
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.ttl_seconds = MAX_TTL_SECS + 1;
        assert!(Envelope::from_wire(w).is_err());

        let mut w = base.clone();
        w.sensitivity_level = "extreme".into();
        assert!(Envelope::from_wire(w).is_err());

        assert!(Envelope::from_wire(base).is_ok());
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let json = r#"{"message_id":"dredd_1_0011223344556677","target_identity":"x"}"#;
        assert!(matches!(
            Envelope::from_json(json),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_json_rejected() {
        let json = " ".repeat(MAX_ENVELOPE_BYTES + 1);
        assert!(matches!(
            Envelope::from_json(&json),
            Err(ProtocolError::EnvelopeTooLarge { .. })
        ));
    }

    #[test]
    fn test_inner_payload_roundtrip() {
        let inner = InnerPayload {
            content_type: "text/plain".into(),
            message_id: "dredd_1_0011223344556677".into(),
            body: b"ping".to_vec(),
        };
        assert_eq!(InnerPayload::from_bytes(&inner.to_bytes().unwrap()).unwrap(), inner);
        assert!(InnerPayload::from_bytes(b"ping").is_err());
    }
}
