//! Structured domain separation for DREDD.
//!
//! Every keyed hash, derivation and AEAD binding in the protocol is labelled
//! `"DREDD-v1." || purpose || "." || context_length || context`, so output
//! produced for one purpose can never be replayed as another.

/// Label prefix shared by every purpose.
pub const LABEL_PREFIX: &[u8] = b"DREDD-v1.";

/// Build a domain-separated label.
///
/// Format: `"DREDD-v1." || purpose || "." || len(context) as 4-byte BE || context`
pub fn build_domain_label(purpose: &str, context: &[u8]) -> Vec<u8> {
    let mut label =
        Vec::with_capacity(LABEL_PREFIX.len() + purpose.len() + 1 + 4 + context.len());
    label.extend_from_slice(LABEL_PREFIX);
    label.extend_from_slice(purpose.as_bytes());
    label.push(b'.');
    label.extend_from_slice(&(context.len() as u32).to_be_bytes());
    label.extend_from_slice(context);
    label
}

/// Well-known domain separation purposes.
pub mod purposes {
    /// Password input for the shared-key derivation.
    pub const SHARED_KEY: &str = "SHARED-KEY";
    /// Binding of a hybrid ciphertext to its algorithm, epoch, window and target.
    pub const CIPHER_BINDING: &str = "CIPHER-BINDING";
    /// Echo signature over envelope metadata.
    pub const ECHO_SIG: &str = "ECHO-SIG";
    /// Seed of a mirror-trap descriptor.
    pub const TRAP_SEED: &str = "TRAP-SEED";
}

/// BLAKE3 `derive_key` context strings.
pub mod contexts {
    /// Echo signature key from a session secret.
    pub const ECHO_KEY: &str = "DREDD-v1 2024 echo-signature key";
    /// Mirror-trap key from a session secret.
    pub const TRAP_KEY: &str = "DREDD-v1 2024 mirror-trap key";
    /// Shared key-encryption key from the Argon2id output.
    pub const SHARED_KEY: &str = "DREDD-v1 2024 shared key-encryption key";
    /// Wrap-tag MAC key from a shared key.
    pub const WRAP_TAG_KEY: &str = "DREDD-v1 2024 wrap-tag key";
}

/// Fixed salt for the shared-key derivation.
pub const SHARED_KEY_SALT: &[u8] = b"DREDD-v1.SHARED-KEY-SALT";
