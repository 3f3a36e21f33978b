//! # dredd-protocol
//!
//! Wire formats and cryptographic constructions of the DREDD protocol.
//!
//! - [`sigil`] and [`registry`]: identities, relay addresses and the
//!   read-only registry that resolves them
//! - [`entropy`]: entropy headers and the pluggable estimator that scores them
//! - [`session`]: shared session secrets with epoch rotation
//! - [`cipher`]: the hybrid cipher (Argon2id-derived KEK, AEAD-wrapped DEK)
//! - [`echo`]: keyed echo signatures over envelope metadata
//! - [`trap`]: deterministic mirror-trap decoys
//! - [`envelope`]: the envelope wire codec and structural check
//!
//! Nothing here performs I/O or reads a clock; callers pass `now` explicitly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
mod codec;
pub mod domain_separation;
pub mod echo;
pub mod entropy;
pub mod envelope;
pub mod error;
pub mod limits;
pub mod registry;
pub mod sensitivity;
pub mod session;
pub mod sigil;
pub mod trap;

#[cfg(test)]
mod proptests;

pub use cipher::{HybridCipher, HybridCiphertext};
pub use echo::{EchoInput, EchoKey, EchoSignature};
pub use entropy::{EntropyEstimator, EntropyHeader, ShannonEstimator};
pub use envelope::{
    Envelope, InnerPayload, MessageId, UnsignedEnvelope, WireEnvelope, DEFAULT_CONTENT_TYPE,
};
pub use error::{ProtocolError, Result};
pub use registry::{RelayAddress, SigilRegistry, StaticRegistry};
pub use sensitivity::{EntropyThresholds, SensitivityLevel};
pub use session::{SessionKeyring, SessionSecret};
pub use sigil::{SigilBinding, SigilId};
pub use trap::{DecoyDescriptor, DecoyResponse, MirrorTrap, TrapTrigger, DECOY_CORPUS};
