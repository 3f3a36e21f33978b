//! Receiver path: collect envelopes from relays and validate them.
//!
//! One reader task per relay channel feeds a single bounded queue. One
//! consumer drains it and validates envelopes one at a time, so the only
//! state shared between concurrent receivers is the replay cache.

use std::sync::Arc;
use std::time::Duration;

use dredd_net::{DeliveryQuorum, Inbound, RelayChannel, RelayTransport};
use dredd_protocol::{SigilId, SigilRegistry};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::RelayConfig;
use crate::error::{CoreError, Result};
use crate::validator::{ValidationResult, Validator};

/// Subscribes to relays and runs inbound envelopes through a [`Validator`].
pub struct Listener {
    registry: Arc<dyn SigilRegistry>,
    transport: Arc<dyn RelayTransport>,
    validator: Arc<Validator>,
    relay: RelayConfig,
}

impl Listener {
    /// Listener using `relay` for quorum size and queue capacity.
    pub fn new(
        relay: RelayConfig,
        registry: Arc<dyn SigilRegistry>,
        transport: Arc<dyn RelayTransport>,
        validator: Arc<Validator>,
    ) -> Self {
        Self {
            registry,
            transport,
            validator,
            relay,
        }
    }

    /// Validator in use.
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Listen for `identity` until `timeout` elapses or `cancel` fires.
    ///
    /// Subscribes to the quorum senders use for `identity`. Returns every
    /// validation result produced, accepted and rejected, in arrival order.
    /// An envelope already taken off the queue is always fully validated
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoRelayChannels`] if no relay could be
    /// subscribed to, or a network error if the relay pool is too small.
    /// A validation task that panics ends the listen early; the results
    /// gathered before it are still returned.
    #[instrument(skip(self, cancel), fields(sigil = %identity))]
    pub async fn listen(
        &self,
        identity: &SigilId,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<ValidationResult>> {
        let channels = self.open_channels(identity).await?;

        let (tx, mut rx) = mpsc::channel::<Inbound>(self.relay.queue_capacity);
        let stop = CancelToken::new();
        let readers: Vec<_> = channels
            .into_iter()
            .map(|channel| tokio::spawn(read_channel(channel, tx.clone(), stop.clone())))
            .collect();
        drop(tx);

        let mut results = Vec::new();
        let expiry = tokio::time::sleep(timeout);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Listen cancelled");
                    break;
                }
                _ = &mut expiry => {
                    debug!("Listen timeout elapsed");
                    break;
                }
                next = rx.recv() => {
                    let Some(inbound) = next else {
                        debug!("All relay channels closed");
                        break;
                    };
                    match self.process(identity, inbound).await {
                        Ok(result) => results.push(result),
                        Err(e) => {
                            error!(error = %e, "Validation task failed, stopping listen");
                            break;
                        }
                    }
                }
            }
        }

        stop.cancel();
        for reader in readers {
            if let Err(e) = reader.await {
                warn!(error = %e, "Relay reader task failed");
            }
        }

        let accepted = results.iter().filter(|r| r.is_accepted()).count();
        info!(accepted, total = results.len(), "Listen finished");
        Ok(results)
    }

    async fn open_channels(&self, identity: &SigilId) -> Result<Vec<Box<dyn RelayChannel>>> {
        let pool = self.registry.relay_pool();
        let quorum = DeliveryQuorum::select(identity, &pool, self.relay.quorum_size)?;

        let mut channels = Vec::with_capacity(quorum.len());
        for node in quorum.nodes() {
            match self.transport.subscribe(node, identity).await {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!(node = %node, error = %e, "Relay subscription failed"),
            }
        }

        if channels.is_empty() {
            return Err(CoreError::NoRelayChannels(identity.to_string()));
        }
        debug!(channels = channels.len(), quorum = quorum.len(), "Subscribed to relays");
        Ok(channels)
    }

    async fn process(&self, identity: &SigilId, inbound: Inbound) -> Result<ValidationResult> {
        let validator = Arc::clone(&self.validator);
        let local = identity.clone();
        let node = inbound.node.clone();
        let payload = inbound.payload;

        let verdict = tokio::task::spawn_blocking(move || {
            validator.validate(&payload, &local, Some(&node))
        })
        .await
        .map_err(|e| CoreError::Task(e.to_string()))?;

        if let Some(decoy) = verdict.decoy {
            if let Err(e) = inbound.reply.send(decoy) {
                debug!(node = %inbound.node, error = %e, "Could not return decoy");
            }
        }
        Ok(verdict.result)
    }
}

async fn read_channel(mut channel: Box<dyn RelayChannel>, tx: mpsc::Sender<Inbound>, stop: CancelToken) {
    let node = channel.node().clone();
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return,
            next = channel.next_envelope() => next,
        };
        let inbound = match next {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                debug!(node = %node, "Relay channel closed");
                return;
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Relay channel failed");
                return;
            }
        };
        tokio::select! {
            _ = stop.cancelled() => return,
            sent = tx.send(inbound) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("relay", &self.relay)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
