//! Pluggable key wrapping.
//!
//! The hybrid cipher never hard-codes how a per-message key is protected.
//! It asks a [`KeyWrap`] implementation, chosen by algorithm id, to wrap the
//! data-encryption key (DEK) under a key-encryption key (KEK). The default
//! is [`XChaChaKeyWrap`]; a deployment that has a real KEM can register its
//! own implementation under a new id without touching the envelope format.

use std::collections::HashMap;
use std::sync::Arc;

use crate::symmetric::{open, seal, Sealed, SymmetricKey};
use crate::{CryptoError, Result};

/// Algorithm id of [`XChaChaKeyWrap`].
pub const XCHACHA_WRAP_V1: &str = "xchacha20poly1305-wrap-v1";

/// Wraps and unwraps per-message keys.
///
/// Implementations must authenticate `aad` and must report every unwrap
/// failure as [`CryptoError::KeyUnwrap`] without further detail.
pub trait KeyWrap: Send + Sync {
    /// Stable identifier written into ciphertext blobs.
    fn algorithm(&self) -> &'static str;

    /// Protect `dek` under `kek`.
    fn wrap(&self, kek: &SymmetricKey, dek: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>>;

    /// Recover a DEK previously produced by [`KeyWrap::wrap`].
    fn unwrap(&self, kek: &SymmetricKey, wrapped: &[u8], aad: &[u8]) -> Result<SymmetricKey>;
}

/// AEAD key wrap: the DEK is sealed with XChaCha20-Poly1305 under the KEK.
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaChaKeyWrap;

impl KeyWrap for XChaChaKeyWrap {
    fn algorithm(&self) -> &'static str {
        XCHACHA_WRAP_V1
    }

    fn wrap(&self, kek: &SymmetricKey, dek: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>> {
        let sealed = seal(kek, dek.as_bytes(), aad)
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))?;
        Ok(sealed.to_bytes())
    }

    fn unwrap(&self, kek: &SymmetricKey, wrapped: &[u8], aad: &[u8]) -> Result<SymmetricKey> {
        let sealed = Sealed::from_bytes(wrapped).map_err(|_| CryptoError::KeyUnwrap)?;
        let mut raw = open(kek, &sealed, aad).map_err(|_| CryptoError::KeyUnwrap)?;
        let key = SymmetricKey::from_bytes(&raw).map_err(|_| CryptoError::KeyUnwrap);
        zeroize::Zeroize::zeroize(&mut raw);
        key
    }
}

/// Key wrappers indexed by algorithm id, with one marked as preferred for
/// outgoing messages.
#[derive(Clone)]
pub struct KeyWrapRegistry {
    wrappers: HashMap<&'static str, Arc<dyn KeyWrap>>,
    preferred: &'static str,
}

impl KeyWrapRegistry {
    /// A registry holding only `wrapper`, which becomes the preferred one.
    pub fn new(wrapper: Arc<dyn KeyWrap>) -> Self {
        let preferred = wrapper.algorithm();
        let mut wrappers = HashMap::new();
        wrappers.insert(preferred, wrapper);
        Self {
            wrappers,
            preferred,
        }
    }

    /// Add a wrapper that can be used to unwrap incoming messages.
    pub fn register(&mut self, wrapper: Arc<dyn KeyWrap>) {
        self.wrappers.insert(wrapper.algorithm(), wrapper);
    }

    /// Make an already-registered wrapper the one used for sending.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyWrap`] if no wrapper has that id.
    pub fn prefer(&mut self, algorithm: &str) -> Result<()> {
        let (&id, _) = self
            .wrappers
            .get_key_value(algorithm)
            .ok_or_else(|| CryptoError::KeyWrap(format!("unknown algorithm {}", algorithm)))?;
        self.preferred = id;
        Ok(())
    }

    /// Wrapper used for outgoing messages.
    pub fn preferred(&self) -> &Arc<dyn KeyWrap> {
        // `preferred` is only ever set to a registered id.
        &self.wrappers[self.preferred]
    }

    /// Look up a wrapper by id.
    pub fn get(&self, algorithm: &str) -> Option<&Arc<dyn KeyWrap>> {
        self.wrappers.get(algorithm)
    }
}

impl Default for KeyWrapRegistry {
    fn default() -> Self {
        Self::new(Arc::new(XChaChaKeyWrap))
    }
}

impl std::fmt::Debug for KeyWrapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.wrappers.keys().collect();
        ids.sort();
        f.debug_struct("KeyWrapRegistry")
            .field("algorithms", &ids)
            .field("preferred", &self.preferred)
            .finish()
    }
}
