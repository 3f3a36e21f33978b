//! Post-decrypt checks.
//!
//! Assertions run over a decrypted payload before it is handed to the
//! caller. Any failure rejects the envelope with
//! [`RejectionStage::PolicyViolation`](crate::RejectionStage::PolicyViolation).
//!
//! Callers add their own checks by implementing [`PostDecryptCheck`].

use std::sync::Arc;

use dredd_protocol::{Envelope, InnerPayload};

use crate::config::ValidationConfig;

/// One assertion over a decrypted message.
pub trait PostDecryptCheck: Send + Sync {
    /// Short name used in rejection reasons and logs.
    fn name(&self) -> &'static str;

    /// `Err(reason)` rejects the message. The reason stays local and must
    /// not contain plaintext.
    fn check(&self, envelope: &Envelope, payload: &InnerPayload) -> Result<(), String>;
}

/// The inner message id must match the envelope's.
///
/// Catches a valid ciphertext lifted into a different envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageIdBinding;

impl PostDecryptCheck for MessageIdBinding {
    fn name(&self) -> &'static str {
        "message_id_binding"
    }

    fn check(&self, envelope: &Envelope, payload: &InnerPayload) -> Result<(), String> {
        if payload.message_id == envelope.message_id.as_str() {
            Ok(())
        } else {
            Err("inner message id does not match envelope".into())
        }
    }
}

/// Only listed content types are accepted.
#[derive(Debug, Clone)]
pub struct ContentTypeAllowList {
    allowed: Vec<String>,
}

impl ContentTypeAllowList {
    /// Allow exactly `allowed`.
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl PostDecryptCheck for ContentTypeAllowList {
    fn name(&self) -> &'static str {
        "content_type_allow_list"
    }

    fn check(&self, _envelope: &Envelope, payload: &InnerPayload) -> Result<(), String> {
        if self.allowed.iter().any(|t| *t == payload.content_type) {
            Ok(())
        } else {
            Err(format!("content type {:?} not allowed", payload.content_type))
        }
    }
}

/// Plaintext body size limit.
#[derive(Debug, Clone, Copy)]
pub struct MaxPlaintextSize {
    max: usize,
}

impl MaxPlaintextSize {
    /// Reject bodies longer than `max` bytes.
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl PostDecryptCheck for MaxPlaintextSize {
    fn name(&self) -> &'static str {
        "max_plaintext_size"
    }

    fn check(&self, _envelope: &Envelope, payload: &InnerPayload) -> Result<(), String> {
        if payload.body.len() <= self.max {
            Ok(())
        } else {
            Err(format!(
                "plaintext of {} bytes exceeds {}",
                payload.body.len(),
                self.max
            ))
        }
    }
}

/// A failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFailure {
    /// Name of the check.
    pub check: &'static str,
    /// Its reason.
    pub reason: String,
}

/// Ordered list of checks.
#[derive(Clone)]
pub struct PolicySet {
    checks: Vec<Arc<dyn PostDecryptCheck>>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            checks: vec![Arc::new(MessageIdBinding)],
        }
    }
}

impl PolicySet {
    /// The always-on checks plus those `config` enables.
    pub fn from_config(config: &ValidationConfig) -> Self {
        let mut set = Self::default();
        if !config.allowed_content_types.is_empty() {
            set = set.with_check(Arc::new(ContentTypeAllowList::new(
                config.allowed_content_types.iter().cloned(),
            )));
        }
        if let Some(max) = config.max_plaintext_bytes {
            set = set.with_check(Arc::new(MaxPlaintextSize::new(max)));
        }
        set
    }

    /// Append a check. Checks run in insertion order.
    pub fn with_check(mut self, check: Arc<dyn PostDecryptCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Names of the installed checks.
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check; stop at the first failure.
    pub fn run(&self, envelope: &Envelope, payload: &InnerPayload) -> Result<(), PolicyFailure> {
        for check in &self.checks {
            check
                .check(envelope, payload)
                .map_err(|reason| PolicyFailure {
                    check: check.name(),
                    reason,
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PolicySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySet")
            .field("checks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use dredd_protocol::{
        EchoKey, HybridCiphertext, MessageId, MirrorTrap, SensitivityLevel, SessionSecret,
        SigilId, UnsignedEnvelope, DEFAULT_CONTENT_TYPE,
    };

    fn envelope() -> Envelope {
        let created_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let message_id = MessageId::generate(created_at);
        let secret = SessionSecret::new(1, [4; 32]);
        UnsignedEnvelope {
            decoy_descriptor: MirrorTrap::new(&secret).generate_trap(message_id.as_str()),
            message_id,
            target_identity: SigilId::new("council-01").unwrap(),
            entropy_header: "e30=".into(),
            encrypted_payload: HybridCiphertext {
                algorithm: "xchacha20poly1305-wrap-v1".into(),
                key_epoch: 1,
                key_window: 1,
                wrapped_key: vec![0; 72],
                ciphertext: vec![0; 40],
                wrap_tag: "00".repeat(32),
            },
            created_at,
            ttl_seconds: 60,
            sensitivity_level: SensitivityLevel::Low,
        }
        .sign(&EchoKey::derive(&secret))
    }

    fn payload(env: &Envelope, content_type: &str, body: &[u8]) -> InnerPayload {
        InnerPayload {
            content_type: content_type.into(),
            message_id: env.message_id.to_string(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_message_id_binding_always_on() {
        let env = envelope();
        let set = PolicySet::default();
        assert!(set.run(&env, &payload(&env, DEFAULT_CONTENT_TYPE, b"x")).is_ok());

        let mut moved = payload(&env, DEFAULT_CONTENT_TYPE, b"x");
        moved.message_id = "dredd_1_0000000000000000".into();
        let failure = set.run(&env, &moved).unwrap_err();
        assert_eq!(failure.check, "message_id_binding");
    }

    #[test]
    fn test_config_enables_optional_checks() {
        let config = ValidationConfig {
            allowed_content_types: vec!["text/plain".into()],
            max_plaintext_bytes: Some(4),
            ..Default::default()
        };
        let set = PolicySet::from_config(&config);
        assert_eq!(
            set.names(),
            vec!["message_id_binding", "content_type_allow_list", "max_plaintext_size"]
        );

        let env = envelope();
        assert!(set.run(&env, &payload(&env, "text/plain", b"ping")).is_ok());
        assert_eq!(
            set.run(&env, &payload(&env, "image/png", b"ping")).unwrap_err().check,
            "content_type_allow_list"
        );
        assert_eq!(
            set.run(&env, &payload(&env, "text/plain", b"pings")).unwrap_err().check,
            "max_plaintext_size"
        );
    }

    #[test]
    fn test_custom_check() {
        struct NoShouting;
        impl PostDecryptCheck for NoShouting {
            fn name(&self) -> &'static str {
                "no_shouting"
            }
            fn check(&self, _: &Envelope, payload: &InnerPayload) -> Result<(), String> {
                if payload.body.iter().any(u8::is_ascii_uppercase) {
                    Err("uppercase body".into())
                } else {
                    Ok(())
                }
            }
        }

        let set = PolicySet::default().with_check(Arc::new(NoShouting));
        let env = envelope();
        assert!(set.run(&env, &payload(&env, DEFAULT_CONTENT_TYPE, b"ping")).is_ok());
        assert!(set.run(&env, &payload(&env, DEFAULT_CONTENT_TYPE, b"PING")).is_err());
    }
}
