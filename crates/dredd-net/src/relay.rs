//! Relay transport abstraction.
//!
//! Relays are untrusted store-and-forward nodes. The core talks to them only
//! through [`RelayTransport`]: deliver one envelope to one node, or subscribe
//! to a node's stream of envelopes for a sigil.
//!
//! Traits use boxed futures instead of `async fn` so they stay object-safe
//! and can be held as `Arc<dyn RelayTransport>`.

use std::future::Future;
use std::pin::Pin;

use dredd_protocol::{DecoyResponse, RelayAddress, SigilId, WireEnvelope};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{NetError, Result};

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of delivering to one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAck {
    /// Relay accepted the envelope.
    Accepted,
    /// Relay answered but declined.
    Refused(String),
}

impl RelayAck {
    /// True for [`RelayAck::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Sends decoy responses back towards whoever delivered an envelope.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    tx: Option<mpsc::UnboundedSender<DecoyResponse>>,
}

impl ReplyHandle {
    /// Handle feeding `tx`.
    pub fn new(tx: mpsc::UnboundedSender<DecoyResponse>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Handle that silently discards responses.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Queue a decoy for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the channel behind the handle is gone.
    pub fn send(&self, decoy: DecoyResponse) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(decoy).map_err(|_| NetError::Closed),
            None => {
                debug!("Discarding decoy on detached reply handle");
                Ok(())
            }
        }
    }
}

/// One envelope received from a relay, still unparsed.
#[derive(Debug)]
pub struct Inbound {
    /// Relay that delivered it.
    pub node: RelayAddress,
    /// Raw envelope JSON.
    pub payload: String,
    /// Where decoys for this envelope go.
    pub reply: ReplyHandle,
}

/// Stream of envelopes from one relay for one sigil.
pub trait RelayChannel: Send {
    /// Relay this channel is attached to.
    fn node(&self) -> &RelayAddress;

    /// Next envelope, or `None` once the relay closes the stream.
    fn next_envelope(&mut self) -> BoxFuture<'_, Result<Option<Inbound>>>;
}

/// Access to the relay network.
pub trait RelayTransport: Send + Sync {
    /// Hand `envelope` to `node` and wait for its acknowledgement.
    fn deliver<'a>(
        &'a self,
        node: &'a RelayAddress,
        envelope: &'a WireEnvelope,
    ) -> BoxFuture<'a, Result<RelayAck>>;

    /// Open a stream of envelopes addressed to `identity` from `node`.
    fn subscribe<'a>(
        &'a self,
        node: &'a RelayAddress,
        identity: &'a SigilId,
    ) -> BoxFuture<'a, Result<Box<dyn RelayChannel>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use dredd_protocol::{MirrorTrap, SessionSecret, TrapTrigger};

    #[test]
    fn test_reply_handle_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ReplyHandle::new(tx);
        let decoy = MirrorTrap::new(&SessionSecret::new(1, [0; 32]))
            .generate_trap("m")
            .respond("m", TrapTrigger::SignatureMismatch);

        handle.send(decoy.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), decoy);

        drop(rx);
        assert!(matches!(handle.send(decoy.clone()), Err(NetError::Closed)));
        assert!(ReplyHandle::detached().send(decoy).is_ok());
    }

    #[test]
    fn test_ack_predicate() {
        assert!(RelayAck::Accepted.is_accepted());
        assert!(!RelayAck::Refused("full".into()).is_accepted());
    }
}
