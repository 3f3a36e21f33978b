//! Hybrid cipher for envelope payloads.
//!
//! Every message gets a fresh data-encryption key (DEK). The payload is
//! sealed under the DEK with XChaCha20-Poly1305, and the DEK is wrapped
//! under a shared key-encryption key (KEK) by a pluggable [`KeyWrap`].
//!
//! The KEK is derived with Argon2id from:
//!
//! - the target sigil
//! - a session secret (identified by its epoch)
//! - a coarse time window (`floor(unix / window_secs)`)
//!
//! Algorithm id, epoch, window and target are bound into both AEAD layers as
//! associated data, and a BLAKE3 wrap tag keyed from the KEK covers the
//! wrapping step.
//!
//! ## Failure behaviour
//!
//! [`HybridCipher::decrypt`] fails closed. Unknown algorithm, unknown epoch,
//! window out of range, bad wrap tag, failed unwrap and failed payload open
//! all return the same [`ProtocolError::Decryption`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use dredd_crypto::{
    derive_key, open, seal, Hash256, KdfParams, KeyWrap, KeyWrapRegistry, Sealed, SymmetricKey,
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::trace;
use zeroize::Zeroize;

use crate::codec::{base64_bytes, from_b64_json, push_prefixed, to_b64_json};
use crate::domain_separation::{build_domain_label, contexts, purposes, SHARED_KEY_SALT};
use crate::limits::{KEY_WINDOW_SECS, KEY_WINDOW_TOLERANCE, SHARED_KEY_CACHE_SIZE};
use crate::session::{SessionKeyring, SessionSecret};
use crate::sigil::SigilId;
use crate::{ProtocolError, Result};

/// Encrypted payload blob, carried base64-encoded in the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridCiphertext {
    /// Key-wrap algorithm id.
    pub algorithm: String,
    /// Epoch of the session secret the KEK was derived from.
    pub key_epoch: u32,
    /// Derivation time window.
    pub key_window: u64,
    /// DEK wrapped under the KEK.
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// Payload sealed under the DEK (`nonce || ciphertext || tag`).
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// BLAKE3 keyed MAC over the binding and the wrapped key, hex.
    pub wrap_tag: String,
}

impl HybridCiphertext {
    /// Base64 wire form.
    pub fn encode(&self) -> Result<String> {
        to_b64_json(self)
    }

    /// Parse the base64 wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the blob is not base64 JSON of
    /// the right shape.
    pub fn decode(encoded: &str) -> Result<Self> {
        from_b64_json(encoded, "encrypted_payload")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    target: SigilId,
    epoch: u32,
    window: u64,
}

/// Hybrid encryption bound to sigils and a shared session keyring.
pub struct HybridCipher {
    keyring: Arc<SessionKeyring>,
    kdf: KdfParams,
    wrappers: KeyWrapRegistry,
    window_secs: u64,
    cache: Mutex<LruCache<CacheKey, SymmetricKey>>,
}

impl HybridCipher {
    /// Cipher using the default XChaCha20-Poly1305 key wrap and one-hour
    /// windows.
    pub fn new(keyring: Arc<SessionKeyring>, kdf: KdfParams) -> Self {
        let capacity = NonZeroUsize::new(SHARED_KEY_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            keyring,
            kdf,
            wrappers: KeyWrapRegistry::default(),
            window_secs: KEY_WINDOW_SECS,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Replace the key-wrap registry.
    pub fn with_wrappers(mut self, wrappers: KeyWrapRegistry) -> Self {
        self.wrappers = wrappers;
        self
    }

    /// Override the derivation window width. Zero is treated as one second.
    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs.max(1);
        self
    }

    /// Session keyring in use.
    pub fn keyring(&self) -> &SessionKeyring {
        &self.keyring
    }

    /// Derivation window containing `now_unix`.
    pub fn window_for(&self, now_unix: i64) -> u64 {
        now_unix.max(0) as u64 / self.window_secs
    }

    /// Derive the shared KEK for `target` from a session secret and window.
    ///
    /// Deterministic: the same inputs always give the same key. Bypasses the
    /// cache.
    ///
    /// # Errors
    ///
    /// Propagates Argon2 parameter errors.
    pub fn derive_shared_key(
        &self,
        target: &SigilId,
        session: &SessionSecret,
        window: u64,
    ) -> Result<SymmetricKey> {
        let mut context = Vec::with_capacity(target.as_bytes().len() + 48);
        push_prefixed(&mut context, target.as_bytes());
        push_prefixed(&mut context, session.as_bytes());
        context.extend_from_slice(&window.to_be_bytes());

        let mut password = build_domain_label(purposes::SHARED_KEY, &context);
        context.zeroize();

        let key = derive_key(contexts::SHARED_KEY, &password, SHARED_KEY_SALT, &self.kdf);
        password.zeroize();
        Ok(key?)
    }

    fn shared_key(&self, target: &SigilId, session: &SessionSecret, window: u64) -> Result<SymmetricKey> {
        let cache_key = CacheKey {
            target: target.clone(),
            epoch: session.epoch(),
            window,
        };

        if let Some(key) = self.lock_cache().get(&cache_key) {
            return Ok(key.clone());
        }

        trace!(sigil = %target, epoch = session.epoch(), window, "Deriving shared key");
        let key = self.derive_shared_key(target, session, window)?;
        self.lock_cache().put(cache_key, key.clone());
        Ok(key)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, SymmetricKey>> {
        // A panic while holding the lock cannot leave the cache inconsistent.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encrypt `plaintext` for `target` with the active session secret.
    ///
    /// # Errors
    ///
    /// Returns an error only if key derivation or sealing fails.
    pub fn encrypt(&self, plaintext: &[u8], target: &SigilId, now_unix: i64) -> Result<HybridCiphertext> {
        let session = self.keyring.active();
        let window = self.window_for(now_unix);
        let wrapper = self.wrappers.preferred();
        let algorithm = wrapper.algorithm();

        let kek = self.shared_key(target, session, window)?;
        let binding = cipher_binding(algorithm, session.epoch(), window, target);

        let dek = SymmetricKey::generate();
        let wrapped_key = wrapper.wrap(&kek, &dek, &binding)?;
        let ciphertext = seal(&dek, plaintext, &binding)?.to_bytes();

        Ok(HybridCiphertext {
            algorithm: algorithm.to_string(),
            key_epoch: session.epoch(),
            key_window: window,
            wrap_tag: wrap_tag(&kek, &binding, &wrapped_key).to_hex(),
            wrapped_key,
            ciphertext,
        })
    }

    /// Decrypt a blob addressed to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decryption`] for every failure.
    pub fn decrypt(&self, blob: &HybridCiphertext, target: &SigilId, now_unix: i64) -> Result<Vec<u8>> {
        self.try_decrypt(blob, target, now_unix)
            .ok_or(ProtocolError::Decryption)
    }

    fn try_decrypt(&self, blob: &HybridCiphertext, target: &SigilId, now_unix: i64) -> Option<Vec<u8>> {
        let wrapper = self.wrappers.get(&blob.algorithm)?;
        let session = self.keyring.get(blob.key_epoch)?;

        let current = self.window_for(now_unix);
        if blob.key_window.abs_diff(current) > KEY_WINDOW_TOLERANCE {
            return None;
        }

        let kek = self.shared_key(target, session, blob.key_window).ok()?;
        let binding = cipher_binding(wrapper.algorithm(), blob.key_epoch, blob.key_window, target);

        let claimed = Hash256::from_hex(&blob.wrap_tag).ok()?;
        let expected = wrap_tag(&kek, &binding, &blob.wrapped_key);
        if !bool::from(claimed.ct_eq(&expected)) {
            return None;
        }

        let dek = wrapper.unwrap(&kek, &blob.wrapped_key, &binding).ok()?;
        let sealed = Sealed::from_bytes(&blob.ciphertext).ok()?;
        open(&dek, &sealed, &binding).ok()
    }
}

impl std::fmt::Debug for HybridCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCipher")
            .field("keyring", &self.keyring)
            .field("kdf", &self.kdf)
            .field("wrappers", &self.wrappers)
            .field("window_secs", &self.window_secs)
            .finish_non_exhaustive()
    }
}

fn cipher_binding(algorithm: &str, epoch: u32, window: u64, target: &SigilId) -> Vec<u8> {
    let mut context = Vec::with_capacity(algorithm.len() + target.as_bytes().len() + 20);
    push_prefixed(&mut context, algorithm.as_bytes());
    context.extend_from_slice(&epoch.to_be_bytes());
    context.extend_from_slice(&window.to_be_bytes());
    push_prefixed(&mut context, target.as_bytes());
    build_domain_label(purposes::CIPHER_BINDING, &context)
}

fn wrap_tag(kek: &SymmetricKey, binding: &[u8], wrapped_key: &[u8]) -> Hash256 {
    let mut tag_key = Hash256::derive_key(contexts::WRAP_TAG_KEY, kek.as_bytes());
    let tag = Hash256::keyed_hash_many(&tag_key, &[binding, wrapped_key]);
    tag_key.zeroize();
    tag
}
