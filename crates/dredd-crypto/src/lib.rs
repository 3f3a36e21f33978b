//! # dredd-crypto
//!
//! Cryptographic primitives for the DREDD protocol.
//!
//! - **XChaCha20-Poly1305** for every authenticated-encryption layer
//! - **BLAKE3** for digests, keyed MACs and subkey derivation
//! - **Argon2id** for deriving shared keys from sigil and session material
//! - **Key wrapping** behind the [`KeyWrap`] trait so a real KEM can replace
//!   the default AEAD wrap
//!
//! ## Security
//!
//! All secret data uses `zeroize` for secure memory cleanup.
//! All comparisons of secrets use constant-time operations via `subtle`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod kdf;
pub mod keywrap;
pub mod symmetric;

#[cfg(test)]
mod proptests;

pub use error::{CryptoError, Result};
pub use hash::Hash256;
pub use kdf::{derive_key, KdfParams};
pub use keywrap::{KeyWrap, KeyWrapRegistry, XChaChaKeyWrap, XCHACHA_WRAP_V1};
pub use symmetric::{open, seal, Nonce, Sealed, SymmetricKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
