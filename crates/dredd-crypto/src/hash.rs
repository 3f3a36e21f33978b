//! BLAKE3 digests and keyed MACs.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// A 256-bit BLAKE3 output, used both as a plain digest and as a MAC tag.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    /// Create from a 32-byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHashLength`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Borrow the digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out the digest bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash a single input.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash several inputs, each length-prefixed so that
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn hash_many(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        feed_prefixed(&mut hasher, inputs);
        Self(*hasher.finalize().as_bytes())
    }

    /// Keyed hash (MAC) over a single input.
    pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> Self {
        Self(*blake3::keyed_hash(key, data).as_bytes())
    }

    /// Keyed hash (MAC) over several length-prefixed inputs.
    pub fn keyed_hash_many(key: &[u8; 32], inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new_keyed(key);
        feed_prefixed(&mut hasher, inputs);
        Self(*hasher.finalize().as_bytes())
    }

    /// Derive a 32-byte subkey from `material` under a context string.
    pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
        blake3::derive_key(context, material)
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidHashLength`] for a wrong length and
    /// [`CryptoError::InvalidHexFormat`] for non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::SIZE * 2 {
            return Err(CryptoError::InvalidHashLength {
                expected: Self::SIZE * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CryptoError::InvalidHexFormat(e.to_string()))?;
        Ok(Self(bytes))
    }
}

fn feed_prefixed(hasher: &mut blake3::Hasher, inputs: &[&[u8]]) {
    for input in inputs {
        hasher.update(&(input.len() as u64).to_le_bytes());
        hasher.update(input);
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only.
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_many_is_length_prefixed() {
        let h1 = Hash256::hash_many(&["ab".as_bytes(), "c".as_bytes()]);
        let h2 = Hash256::hash_many(&["a".as_bytes(), "bc".as_bytes()]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_keyed_hash_many_depends_on_key() {
        let a = Hash256::keyed_hash_many(&[1u8; 32], &["id".as_bytes(), "target".as_bytes()]);
        let b = Hash256::keyed_hash_many(&[2u8; 32], &["id".as_bytes(), "target".as_bytes()]);
        assert_ne!(a, b);
        assert_eq!(a, Hash256::keyed_hash_many(&[1u8; 32], &["id".as_bytes(), "target".as_bytes()]));
    }

    #[test]
    fn test_keyed_hash_many_differs_from_unkeyed() {
        let keyed = Hash256::keyed_hash_many(&[0u8; 32], &[b"x"]);
        assert_ne!(keyed, Hash256::hash_many(&[b"x"]));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash256::hash(b"dredd");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(CryptoError::InvalidHashLength { .. })
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            Hash256::from_hex(&bad),
            Err(CryptoError::InvalidHexFormat(_))
        ));
    }

    #[test]
    fn test_derive_key_context_separation() {
        let k1 = Hash256::derive_key("DREDD-v1.A", b"material");
        let k2 = Hash256::derive_key("DREDD-v1.B", b"material");
        assert_ne!(k1, k2);
    }
}
