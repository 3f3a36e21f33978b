//! Mirror traps: deterministic decoys for hostile-looking traffic.
//!
//! When an inbound envelope looks like forgery or probing, the receiver
//! answers with a decoy instead of an error. The decoy is derived from the
//! message id under a key only deployment members hold, so:
//!
//! - the same message id always yields the same decoy
//! - sender and receiver compute identical descriptors
//! - an outsider cannot tell a decoy from a real response or predict one

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dredd_crypto::Hash256;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain_separation::{build_domain_label, contexts, purposes};
use crate::limits::{MAX_DECOY_FIELD_LEN, TRAP_FINGERPRINT_LEN, TRAP_NOISE_LEN};
use crate::session::SessionSecret;
use crate::{ProtocolError, Result};

/// Plausible, inert plaintexts served by traps.
pub const DECOY_CORPUS: [&str; 5] = [
    "System maintenance scheduled for tomorrow.",
    "Weather forecast: Clear skies expected.",
    "Meeting rescheduled to 3 PM.",
    "Package delivery confirmed.",
    "Backup completed successfully.",
];

/// Failure pattern that engages a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapTrigger {
    /// Echo signature did not verify.
    SignatureMismatch,
    /// Envelope targets a sigil the registry does not know.
    UnregisteredSigil,
    /// Entropy header undecodable or far below threshold.
    InsufficientEntropy,
}

impl TrapTrigger {
    /// Every trigger a descriptor arms.
    pub const ALL: [TrapTrigger; 3] = [
        Self::SignatureMismatch,
        Self::UnregisteredSigil,
        Self::InsufficientEntropy,
    ];
}

/// Trap material bound to one message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyDescriptor {
    /// `trap_<message_id>`.
    pub trap_id: String,
    /// Decoy plaintext drawn from [`DECOY_CORPUS`].
    pub fake_plaintext: String,
    /// Synthetic entropy fingerprint, hex.
    pub entropy_fingerprint: String,
    /// Noise bytes, base64.
    pub noise_pattern: String,
    /// Failure patterns this trap answers.
    pub triggers: Vec<TrapTrigger>,
}

impl DecoyDescriptor {
    /// Structural check for a descriptor received off the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] for empty or oversized fields or
    /// an empty trigger list.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("trap_id", &self.trap_id),
            ("fake_plaintext", &self.fake_plaintext),
            ("entropy_fingerprint", &self.entropy_fingerprint),
            ("noise_pattern", &self.noise_pattern),
        ] {
            if value.is_empty() || value.len() > MAX_DECOY_FIELD_LEN {
                return Err(ProtocolError::Malformed(format!(
                    "decoy_descriptor.{} has invalid length",
                    name
                )));
            }
        }
        if self.triggers.is_empty() || self.triggers.len() > TrapTrigger::ALL.len() {
            return Err(ProtocolError::Malformed(
                "decoy_descriptor.triggers has invalid length".into(),
            ));
        }
        Ok(())
    }

    /// True when this descriptor arms `trigger`.
    pub fn arms(&self, trigger: TrapTrigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Build the response sent back to whoever tripped the trap.
    pub fn respond(&self, message_id: &str, trigger: TrapTrigger) -> DecoyResponse {
        DecoyResponse {
            trap_id: self.trap_id.clone(),
            message_id: message_id.to_string(),
            status: "delivered".to_string(),
            plaintext: self.fake_plaintext.clone(),
            entropy_fingerprint: self.entropy_fingerprint.clone(),
            noise: self.noise_pattern.clone(),
            trigger,
        }
    }
}

/// What a tripped trap returns to the remote peer.
///
/// Shaped like a successful read so that it carries no signal about which
/// check failed beyond `trigger`, which is only recorded locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyResponse {
    /// Trap identifier.
    pub trap_id: String,
    /// Message id the envelope claimed.
    pub message_id: String,
    /// Always `"delivered"`.
    pub status: String,
    /// Decoy plaintext.
    pub plaintext: String,
    /// Synthetic entropy fingerprint, hex.
    pub entropy_fingerprint: String,
    /// Noise, base64.
    pub noise: String,
    /// Pattern that engaged the trap. Skipped on the wire.
    #[serde(skip, default = "default_trigger")]
    pub trigger: TrapTrigger,
}

fn default_trigger() -> TrapTrigger {
    TrapTrigger::SignatureMismatch
}

/// Generates decoy descriptors under a key derived from a session secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MirrorTrap {
    key: [u8; 32],
}

impl MirrorTrap {
    /// Trap keyed from `secret`.
    pub fn new(secret: &SessionSecret) -> Self {
        Self {
            key: Hash256::derive_key(contexts::TRAP_KEY, secret.as_bytes()),
        }
    }

    /// Deterministic decoy descriptor for `message_id`.
    pub fn generate_trap(&self, message_id: &str) -> DecoyDescriptor {
        let label = build_domain_label(purposes::TRAP_SEED, b"");
        let seed = Hash256::keyed_hash_many(&self.key, &[&label[..], message_id.as_bytes()]);
        let mut rng = ChaCha20Rng::from_seed(seed.to_bytes());

        let fake_plaintext = DECOY_CORPUS[rng.gen_range(0..DECOY_CORPUS.len())];

        let mut fingerprint = [0u8; TRAP_FINGERPRINT_LEN];
        rng.fill_bytes(&mut fingerprint);

        let mut noise = [0u8; TRAP_NOISE_LEN];
        rng.fill_bytes(&mut noise);

        DecoyDescriptor {
            trap_id: format!("trap_{}", message_id),
            fake_plaintext: fake_plaintext.to_string(),
            entropy_fingerprint: hex::encode(fingerprint),
            noise_pattern: STANDARD.encode(noise),
            triggers: TrapTrigger::ALL.to_vec(),
        }
    }
}

impl std::fmt::Debug for MirrorTrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MirrorTrap([REDACTED])")
    }
}
