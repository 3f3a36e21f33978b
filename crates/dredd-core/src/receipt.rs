//! Delivery receipts.

use dredd_protocol::{MessageId, RelayAddress, SigilId};

use crate::error::DispatchFailure;

/// What happened at one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Relay acknowledged the envelope.
    Accepted,
    /// Relay answered with a refusal.
    Refused(String),
    /// Every attempt failed at the transport level.
    Failed(String),
    /// Every attempt ran out of time.
    TimedOut,
    /// Still in flight when the send returned.
    Pending,
}

impl NodeOutcome {
    /// True for [`NodeOutcome::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Outcome for one quorum node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// The relay.
    pub node: RelayAddress,
    /// What happened.
    pub outcome: NodeOutcome,
    /// Delivery attempts started, zero while pending.
    pub attempts: u32,
}

/// Result of a send.
///
/// A failed send is not an error value: the receipt carries the typed
/// [`DispatchFailure`] along with whatever per-node detail exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Id of the envelope, if one was built.
    pub message_id: Option<MessageId>,
    /// Target sigil.
    pub target: SigilId,
    /// Per-node outcomes in quorum order.
    pub nodes: Vec<NodeReport>,
    /// Why the send failed, if it did.
    pub failure: Option<DispatchFailure>,
}

impl DeliveryReceipt {
    /// Receipt for a send that failed before any relay was contacted.
    pub fn failed(target: SigilId, message_id: Option<MessageId>, failure: DispatchFailure) -> Self {
        Self {
            message_id,
            target,
            nodes: Vec::new(),
            failure: Some(failure),
        }
    }

    /// True if at least one relay acknowledged.
    pub fn is_delivered(&self) -> bool {
        self.failure.is_none() && self.nodes.iter().any(|n| n.outcome.is_accepted())
    }

    /// Relays that acknowledged.
    pub fn accepted_nodes(&self) -> Vec<&RelayAddress> {
        self.nodes
            .iter()
            .filter(|n| n.outcome.is_accepted())
            .map(|n| &n.node)
            .collect()
    }

    /// Relays contacted, in quorum order.
    pub fn attempted_nodes(&self) -> Vec<&RelayAddress> {
        self.nodes.iter().map(|n| &n.node).collect()
    }
}
