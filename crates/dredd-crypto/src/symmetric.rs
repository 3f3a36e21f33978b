//! XChaCha20-Poly1305 authenticated encryption.
//!
//! Every DREDD layer that hides bytes goes through this module: the
//! application payload, the wrapped per-message key, and anything a
//! [`KeyWrap`](crate::KeyWrap) implementation chooses to seal.
//!
//! ## Security Notes
//!
//! - Keys are zeroized on drop and never printed
//! - Nonces are 192-bit and drawn from `OsRng`, so random generation is safe
//! - The associated data must be supplied again on open; a mismatch fails
//!   exactly like a forged tag

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Size of symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of nonce in bytes (192 bits for XChaCha20).
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A 256-bit symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless the slice is 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes: arr })
    }

    /// Take ownership of an already-sized array.
    pub fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes. Never log or persist these.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// A 192-bit XChaCha20 nonce.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Draw a random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a nonce from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidNonceLength`] unless the slice is 24 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes: arr })
    }

    /// Nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({:02x}{:02x}..)", self.bytes[0], self.bytes[1])
    }
}

/// Output of [`seal`]: the nonce plus ciphertext with the tag appended.
///
/// Byte layout: `[nonce (24)][ciphertext][tag (16)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    /// Nonce used for this seal.
    pub nonce: Nonce,
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Total serialized size.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// True when there is no ciphertext at all.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Serialize as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `nonce || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decryption`] when the input cannot even hold
    /// a nonce and a tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        Ok(Self {
            nonce: Nonce::from_bytes(nonce)?,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Encrypt and authenticate `plaintext`, binding `aad` into the tag.
///
/// # Example
///
/// ```
/// use dredd_crypto::symmetric::{open, seal, SymmetricKey};
///
/// let key = SymmetricKey::generate();
/// let sealed = seal(&key, b"ping", b"council-01").unwrap();
/// assert_eq!(open(&key, &sealed, b"council-01").unwrap(), b"ping");
/// ```
pub fn seal(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::generate();

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encryption("XChaCha20-Poly1305 seal failed".into()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Verify and decrypt a [`Sealed`] value.
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] on a wrong key, wrong `aad`, or any
/// modification of nonce or ciphertext.
pub fn open(key: &SymmetricKey, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            XNonce::from_slice(sealed.nonce.as_bytes()),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decryption)
}
