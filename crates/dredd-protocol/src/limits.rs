//! Protocol limits and constants.
//!
//! All protocol limits are defined here for consistent enforcement.

// === Identities ===

/// Maximum sigil length in characters.
pub const MAX_SIGIL_LEN: usize = 128;

/// Maximum message id length in characters.
pub const MAX_MESSAGE_ID_LEN: usize = 64;

/// Prefix of every generated message id.
pub const MESSAGE_ID_PREFIX: &str = "dredd";

/// Random bytes in the suffix of a message id (rendered as 16 hex chars).
pub const MESSAGE_ID_RANDOM_BYTES: usize = 8;

// === Sizes ===

/// Maximum application payload accepted for dispatch (64 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Maximum serialized envelope accepted from the wire (256 KiB).
pub const MAX_ENVELOPE_BYTES: usize = 256 * 1024;

/// Maximum encoded entropy header length.
pub const MAX_ENTROPY_HEADER_LEN: usize = 1024;

/// Maximum length of the decoy descriptor fields on the wire.
pub const MAX_DECOY_FIELD_LEN: usize = 512;

// === Time ===

/// Longest time-to-live a sender may request (7 days).
pub const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Allowed distance between an entropy header timestamp and local time (1 hour).
pub const ENTROPY_MAX_SKEW_SECS: u64 = 60 * 60;

/// Width of a shared-key derivation window (1 hour).
pub const KEY_WINDOW_SECS: u64 = 60 * 60;

/// Number of windows either side of the current one a receiver accepts.
pub const KEY_WINDOW_TOLERANCE: u64 = 1;

// === Entropy ===

/// Random seed length inside an entropy header.
pub const ENTROPY_SEED_LEN: usize = 32;

/// Resonance challenge length inside an entropy header.
pub const RESONANCE_CHALLENGE_LEN: usize = 16;

/// Header draws attempted before a dispatch gives up on reaching a threshold.
pub const MAX_ENTROPY_ATTEMPTS: usize = 8;

// === Signatures and keys ===

/// Hex length of an echo signature.
pub const ECHO_SIGNATURE_HEX_LEN: usize = 64;

/// Session secret length in bytes.
pub const SESSION_SECRET_LEN: usize = 32;

/// Derived shared keys kept in memory per cipher.
pub const SHARED_KEY_CACHE_SIZE: usize = 64;

// === Delivery ===

/// Smallest delivery quorum.
pub const MIN_QUORUM_SIZE: usize = 2;

// === Mirror trap ===

/// Noise bytes in a decoy descriptor.
pub const TRAP_NOISE_LEN: usize = 64;

/// Bytes in a synthetic entropy fingerprint.
pub const TRAP_FINGERPRINT_LEN: usize = 32;
