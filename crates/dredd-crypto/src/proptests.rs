//! Property-based tests for the primitives the envelope relies on.

use proptest::prelude::*;

use crate::{open, seal, Hash256, KeyWrap, Sealed, SymmetricKey, XChaChaKeyWrap};

proptest! {
    /// Any single flipped bit in a sealed blob must be rejected.
    #[test]
    fn sealed_bit_flip_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        bit in any::<prop::sample::Index>(),
    ) {
        let key = SymmetricKey::generate();
        let mut bytes = seal(&key, &plaintext, b"aad").unwrap().to_bytes();
        let idx = bit.index(bytes.len() * 8);
        bytes[idx / 8] ^= 1 << (idx % 8);

        let opened = Sealed::from_bytes(&bytes).and_then(|s| open(&key, &s, b"aad"));
        prop_assert!(opened.is_err());
    }

    /// Parsing arbitrary bytes as a sealed blob never panics.
    #[test]
    fn sealed_from_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let key = SymmetricKey::generate();
        if let Ok(sealed) = Sealed::from_bytes(&bytes) {
            prop_assert!(open(&key, &sealed, b"").is_err());
        }
    }

    /// Unwrapping garbage fails rather than yielding a key.
    #[test]
    fn unwrap_arbitrary_bytes_fails(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let kek = SymmetricKey::generate();
        prop_assert!(XChaChaKeyWrap.unwrap(&kek, &bytes, b"").is_err());
    }

    /// Appending to any input of a keyed multi-hash changes the tag.
    #[test]
    fn keyed_hash_many_sensitive_to_each_input(
        a in prop::collection::vec(any::<u8>(), 0..64),
        b in prop::collection::vec(any::<u8>(), 0..64),
        extra in any::<u8>(),
    ) {
        let key = [7u8; 32];
        let base = Hash256::keyed_hash_many(&key, &[a.as_slice(), b.as_slice()]);

        let mut a2 = a.clone();
        a2.push(extra);
        prop_assert_ne!(base.clone(), Hash256::keyed_hash_many(&key, &[a2.as_slice(), b.as_slice()]));

        let mut b2 = b.clone();
        b2.push(extra);
        prop_assert_ne!(base, Hash256::keyed_hash_many(&key, &[a.as_slice(), b2.as_slice()]));
    }
}
