//! Password-style key derivation with Argon2id.
//!
//! DREDD derives its per-identity shared keys from low-structure inputs
//! (a sigil name, a session secret, a time window). Argon2id keeps that
//! derivation expensive to brute-force; a BLAKE3 context pass on the output
//! separates keys derived for different purposes from the same inputs.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::hash::Hash256;
use crate::symmetric::{SymmetricKey, KEY_SIZE};
use crate::{CryptoError, Result};

/// Memory cost in KiB for production derivations (64 MiB).
pub const ARGON2_MEMORY_KIB: u32 = 65536;

/// Iteration count for production derivations.
pub const ARGON2_ITERATIONS: u32 = 3;

/// Lane count for production derivations.
pub const ARGON2_PARALLELISM: u32 = 4;

/// Shortest salt Argon2 accepts.
pub const MIN_SALT_LEN: usize = 8;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for unit and integration tests.
    ///
    /// Both peers must use the same parameters, so never mix this with the
    /// default on a live network.
    pub fn testing() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Params> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2 params error: {}", e)))
    }

    /// Check the parameters are acceptable to Argon2.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] describing the rejected value.
    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }
}

/// Derive a symmetric key from `password` and `salt`.
///
/// The raw Argon2id output is passed through a BLAKE3 `derive_key` under
/// `context` before use and then wiped.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] when the salt is shorter than
/// [`MIN_SALT_LEN`] or the parameters are rejected by Argon2.
pub fn derive_key(
    context: &str,
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SymmetricKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt must be at least {} bytes",
            MIN_SALT_LEN
        )));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2 derivation failed: {}", e)))?;

    let contextualized = Hash256::derive_key(context, &output);
    output.zeroize();

    Ok(SymmetricKey::from_array(contextualized))
}
