//! # dredd-core
//!
//! High-level API for the DREDD protocol.
//!
//! A [`Courier`] is one node's view of the protocol: it sends envelopes to
//! a sigil's relay quorum and listens on its own quorum for envelopes
//! addressed to it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dredd_core::{Courier, CourierConfig};
//! use dredd_net::TcpRelayTransport;
//! use dredd_protocol::{SensitivityLevel, SigilId};
//!
//! let config = CourierConfig::load("dredd.json".as_ref())?;
//! let courier = Courier::builder(config, Arc::new(TcpRelayTransport::default())).build()?;
//!
//! let target = SigilId::new("council-01")?;
//! let receipt = courier
//!     .dispatch(b"ping", &target, Duration::from_secs(3600), SensitivityLevel::High)
//!     .await;
//! assert!(receipt.is_delivered());
//!
//! for result in courier.listen(&target, Duration::from_secs(30)).await? {
//!     println!("{:?}", result);
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Dispatcher**: builds, encrypts and signs envelopes, then fans them
//!   out to the quorum. Failures are reported on a [`DeliveryReceipt`].
//! - **Validator**: the ordered admission pipeline. Rejections stay local;
//!   hostile-looking ones produce a mirror-trap decoy for the peer.
//! - **Listener**: per-relay reader tasks feeding one bounded queue.
//! - **ReplayCache**: the only state shared between concurrent receivers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod cancel;
pub mod config;
pub mod courier;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod policy;
pub mod receipt;
pub mod replay;
pub mod time;
pub mod validator;

#[cfg(test)]
mod proptests;

pub use audit::{AuditEvent, AuditEventKind, AuditTrail, DEFAULT_AUDIT_CAPACITY};
pub use cancel::CancelToken;
pub use config::{
    ConfigBuilder, ConfigError, CourierConfig, CryptoConfig, IdentityConfig, RegistryConfig,
    RelayConfig, ReplayConfig, SessionSecretConfig, TrapConfig, ValidationConfig,
};
pub use courier::{Courier, CourierBuilder};
pub use dispatcher::{Dispatcher, SendOptions};
pub use error::{CoreError, DispatchFailure, RejectionStage, Result};
pub use listener::Listener;
pub use policy::{
    ContentTypeAllowList, MaxPlaintextSize, MessageIdBinding, PolicyFailure, PolicySet,
    PostDecryptCheck,
};
pub use receipt::{DeliveryReceipt, NodeOutcome, NodeReport};
pub use replay::ReplayCache;
pub use time::{Clock, ManualClock, SystemClock};
pub use validator::{AcceptedMessage, Provenance, ValidationResult, Validator, Verdict};
