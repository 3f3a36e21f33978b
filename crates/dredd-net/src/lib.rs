//! # dredd-net
//!
//! Relay networking for the DREDD protocol.
//!
//! Relays are untrusted store-and-forward nodes. This crate provides:
//!
//! - [`RelayTransport`]: deliver an envelope to a node, or subscribe to a
//!   node's envelopes for one sigil
//! - [`TcpRelayTransport`]: JSON-lines frames over TCP
//! - [`MemoryRelayNetwork`]: an in-process network with controllable
//!   failures, used by tests and local setups
//! - [`DeliveryQuorum`]: deterministic choice of the nodes a sigil uses
//!
//! ## Security Model
//!
//! Nothing a relay says is trusted. Envelopes are passed up as raw text and
//! every check happens in the receiving node.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod memory;
pub mod quorum;
pub mod relay;
pub mod tcp;

pub use error::{NetError, Result};
pub use frame::{AckStatus, RelayFrame, MAX_FRAME_BYTES};
pub use memory::MemoryRelayNetwork;
pub use quorum::DeliveryQuorum;
pub use relay::{BoxFuture, Inbound, RelayAck, RelayChannel, RelayTransport, ReplyHandle};
pub use tcp::{TcpRelayTransport, DEFAULT_CONNECT_TIMEOUT};
