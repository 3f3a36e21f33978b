//! In-process relay network.
//!
//! Behaves like a set of store-and-forward relays without sockets: envelopes
//! delivered to a node are pushed to that node's subscribers for the target
//! sigil, or held in a mailbox until someone subscribes. Nodes can be taken
//! offline, made to refuse, slowed down or made to fail a number of times,
//! which is what delivery and quorum tests need.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dredd_protocol::{DecoyResponse, RelayAddress, SigilId, WireEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::relay::{BoxFuture, Inbound, RelayAck, RelayChannel, RelayTransport, ReplyHandle};
use crate::{NetError, Result};

#[derive(Default)]
struct NodeState {
    online: bool,
    refusing: bool,
    delay: Option<Duration>,
    failures_left: usize,
    attempts: usize,
    accepted: usize,
    mailboxes: HashMap<String, VecDeque<String>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl NodeState {
    fn route(&mut self, target: &str, payload: String) {
        let subscribers = self.subscribers.entry(target.to_string()).or_default();
        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.is_empty() {
            self.mailboxes
                .entry(target.to_string())
                .or_default()
                .push_back(payload);
            return;
        }
        for tx in subscribers.iter() {
            // Closed receivers were pruned above; a race here only drops a copy.
            let _ = tx.send(payload.clone());
        }
    }
}

struct State {
    nodes: HashMap<RelayAddress, NodeState>,
    decoys: Vec<DecoyResponse>,
    decoy_rx: mpsc::UnboundedReceiver<DecoyResponse>,
}

/// Shared handle to an in-process relay network. Cheap to clone.
#[derive(Clone)]
pub struct MemoryRelayNetwork {
    state: Arc<Mutex<State>>,
    decoy_tx: mpsc::UnboundedSender<DecoyResponse>,
}

impl MemoryRelayNetwork {
    /// Network with the given nodes, all online.
    pub fn new(nodes: impl IntoIterator<Item = RelayAddress>) -> Self {
        let (decoy_tx, decoy_rx) = mpsc::unbounded_channel();
        let nodes = nodes
            .into_iter()
            .map(|addr| {
                (
                    addr,
                    NodeState {
                        online: true,
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                nodes,
                decoys: Vec::new(),
                decoy_rx,
            })),
            decoy_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_node<T>(&self, node: &RelayAddress, f: impl FnOnce(&mut NodeState) -> T) -> Result<T> {
        let mut state = self.lock();
        let node_state = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| NetError::UnknownNode(node.to_string()))?;
        Ok(f(node_state))
    }

    /// Take a node on or offline. Going offline closes its subscriptions.
    pub fn set_online(&self, node: &RelayAddress, online: bool) -> Result<()> {
        self.with_node(node, |n| {
            n.online = online;
            if !online {
                n.subscribers.clear();
            }
        })
    }

    /// Make a node answer every delivery with a refusal.
    pub fn set_refusing(&self, node: &RelayAddress, refusing: bool) -> Result<()> {
        self.with_node(node, |n| n.refusing = refusing)
    }

    /// Delay every delivery to a node.
    pub fn set_delay(&self, node: &RelayAddress, delay: Option<Duration>) -> Result<()> {
        self.with_node(node, |n| n.delay = delay)
    }

    /// Make the next `count` deliveries to a node fail with a connection error.
    pub fn fail_next(&self, node: &RelayAddress, count: usize) -> Result<()> {
        self.with_node(node, |n| n.failures_left = count)
    }

    /// Deliveries attempted against a node, including failed ones.
    pub fn attempts(&self, node: &RelayAddress) -> usize {
        self.with_node(node, |n| n.attempts).unwrap_or(0)
    }

    /// Deliveries a node accepted.
    pub fn accepted(&self, node: &RelayAddress) -> usize {
        self.with_node(node, |n| n.accepted).unwrap_or(0)
    }

    /// Push raw text to a node as if some peer had delivered it for `target`.
    ///
    /// Bypasses all checks, so tests can feed hostile or malformed input.
    pub fn inject(&self, node: &RelayAddress, target: &str, payload: impl Into<String>) -> Result<()> {
        let payload = payload.into();
        self.with_node(node, |n| n.route(target, payload))
    }

    /// Every decoy returned through this network so far.
    pub fn decoys(&self) -> Vec<DecoyResponse> {
        let mut state = self.lock();
        while let Ok(decoy) = state.decoy_rx.try_recv() {
            state.decoys.push(decoy);
        }
        state.decoys.clone()
    }

    async fn deliver_inner(&self, node: &RelayAddress, envelope: &WireEnvelope) -> Result<RelayAck> {
        let delay = self.with_node(node, |n| {
            n.attempts += 1;
            n.delay
        })?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let payload = envelope.to_json()?;
        let target = envelope.target_identity.clone();

        self.with_node(node, |n| {
            if !n.online {
                return Err(NetError::Connection(format!("{} is offline", node)));
            }
            if n.failures_left > 0 {
                n.failures_left -= 1;
                return Err(NetError::Connection(format!("{} reset the connection", node)));
            }
            if n.refusing {
                return Ok(RelayAck::Refused("relay refusing traffic".into()));
            }
            n.accepted += 1;
            n.route(&target, payload);
            trace!(node = %node, "Memory relay accepted envelope");
            Ok(RelayAck::Accepted)
        })?
    }
}

impl std::fmt::Debug for MemoryRelayNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let mut nodes: Vec<_> = state.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("MemoryRelayNetwork")
            .field("nodes", &nodes)
            .finish()
    }
}

impl RelayTransport for MemoryRelayNetwork {
    fn deliver<'a>(
        &'a self,
        node: &'a RelayAddress,
        envelope: &'a WireEnvelope,
    ) -> BoxFuture<'a, Result<RelayAck>> {
        Box::pin(self.deliver_inner(node, envelope))
    }

    fn subscribe<'a>(
        &'a self,
        node: &'a RelayAddress,
        identity: &'a SigilId,
    ) -> BoxFuture<'a, Result<Box<dyn RelayChannel>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.with_node(node, |n| {
                if !n.online {
                    return Err(NetError::Connection(format!("{} is offline", node)));
                }
                if let Some(queued) = n.mailboxes.remove(identity.as_str()) {
                    for payload in queued {
                        let _ = tx.send(payload);
                    }
                }
                n.subscribers
                    .entry(identity.to_string())
                    .or_default()
                    .push(tx);
                Ok(())
            })??;

            debug!(node = %node, identity = %identity, "Memory relay subscription opened");
            Ok(Box::new(MemoryChannel {
                node: node.clone(),
                rx,
                reply: ReplyHandle::new(self.decoy_tx.clone()),
            }) as Box<dyn RelayChannel>)
        })
    }
}

struct MemoryChannel {
    node: RelayAddress,
    rx: mpsc::UnboundedReceiver<String>,
    reply: ReplyHandle,
}

impl RelayChannel for MemoryChannel {
    fn node(&self) -> &RelayAddress {
        &self.node
    }

    fn next_envelope(&mut self) -> BoxFuture<'_, Result<Option<Inbound>>> {
        Box::pin(async move {
            Ok(self.rx.recv().await.map(|payload| Inbound {
                node: self.node.clone(),
                payload,
                reply: self.reply.clone(),
            }))
        })
    }
}
