//! Sender path: build an envelope and fan it out to a relay quorum.
//!
//! A send succeeds as soon as one quorum node acknowledges. Nodes still in
//! flight at that point keep running in the background and are reported as
//! [`NodeOutcome::Pending`]. Transport failures are retried at most once per
//! node; a refusal is an answer and is not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dredd_net::{DeliveryQuorum, NetError, RelayAck, RelayTransport};
use dredd_protocol::limits::MAX_PAYLOAD_BYTES;
use dredd_protocol::{
    EchoKey, EntropyEstimator, EntropyHeader, EntropyThresholds, Envelope, HybridCipher,
    HybridCiphertext, InnerPayload, MessageId, MirrorTrap, RelayAddress, SensitivityLevel,
    ShannonEstimator, SigilId, SigilRegistry, UnsignedEnvelope, WireEnvelope,
    DEFAULT_CONTENT_TYPE,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::{CourierConfig, RelayConfig, MAX_RETRIES_PER_NODE};
use crate::error::DispatchFailure;
use crate::receipt::{DeliveryReceipt, NodeOutcome, NodeReport};
use crate::time::Clock;

/// Per-send options.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Inner content type.
    pub content_type: String,
    /// Longest the caller will wait for an acknowledgement. Also caps each
    /// delivery attempt.
    pub deadline: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            deadline: None,
        }
    }
}

impl SendOptions {
    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Everything of an envelope except its ciphertext.
struct Draft {
    message_id: MessageId,
    target: SigilId,
    entropy_header: String,
    inner: Vec<u8>,
    created_at: DateTime<Utc>,
    ttl_seconds: u64,
    sensitivity: SensitivityLevel,
}

/// Builds and delivers envelopes.
pub struct Dispatcher {
    registry: Arc<dyn SigilRegistry>,
    transport: Arc<dyn RelayTransport>,
    cipher: Arc<HybridCipher>,
    estimator: Arc<dyn EntropyEstimator>,
    thresholds: EntropyThresholds,
    relay: RelayConfig,
    max_ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Dispatcher using the relay and validation settings from `config`.
    pub fn new(
        config: &CourierConfig,
        registry: Arc<dyn SigilRegistry>,
        transport: Arc<dyn RelayTransport>,
        cipher: Arc<HybridCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            transport,
            cipher,
            estimator: Arc::new(ShannonEstimator),
            thresholds: config.validation.thresholds,
            relay: config.relay.clone(),
            max_ttl_secs: config.validation.max_ttl_secs,
            clock,
        }
    }

    /// Replace the entropy estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn EntropyEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Send with default options.
    pub async fn send(
        &self,
        plaintext: &[u8],
        target: &SigilId,
        ttl_seconds: u64,
        sensitivity: SensitivityLevel,
    ) -> DeliveryReceipt {
        self.send_with(plaintext, target, ttl_seconds, sensitivity, SendOptions::default())
            .await
    }

    /// Encrypt `plaintext` for `target` and deliver it to the target's quorum.
    ///
    /// Never fails with an error value; the receipt says what happened.
    #[instrument(skip(self, plaintext, options), fields(sigil = %target))]
    pub async fn send_with(
        &self,
        plaintext: &[u8],
        target: &SigilId,
        ttl_seconds: u64,
        sensitivity: SensitivityLevel,
        options: SendOptions,
    ) -> DeliveryReceipt {
        let draft = match self.draft(
            plaintext,
            target,
            ttl_seconds,
            sensitivity,
            &options.content_type,
        ) {
            Ok(draft) => draft,
            Err(failure) => {
                warn!(error = %failure, "Send rejected before delivery");
                return DeliveryReceipt::failed(target.clone(), None, failure);
            }
        };
        let message_id = draft.message_id.clone();
        let fail = |failure: DispatchFailure| {
            warn!(message_id = %message_id, error = %failure, "Send failed");
            DeliveryReceipt::failed(target.clone(), Some(message_id.clone()), failure)
        };

        let pool = self.registry.relay_pool();
        let quorum = match DeliveryQuorum::select(target, &pool, self.relay.quorum_size) {
            Ok(quorum) => quorum,
            Err(NetError::InsufficientRelays { available, required }) => {
                return fail(DispatchFailure::InsufficientRelays { available, required });
            }
            Err(e) => return fail(DispatchFailure::Construction(e.to_string())),
        };

        // Key derivation blocks; keep it off the async workers.
        let ciphertext = {
            let cipher = Arc::clone(&self.cipher);
            let inner = draft.inner.clone();
            let target = draft.target.clone();
            let now = draft.created_at.timestamp();
            match tokio::task::spawn_blocking(move || cipher.encrypt(&inner, &target, now)).await {
                Ok(Ok(ciphertext)) => ciphertext,
                Ok(Err(e)) => return fail(DispatchFailure::Construction(e.to_string())),
                Err(e) => return fail(DispatchFailure::Construction(e.to_string())),
            }
        };

        let envelope = self.seal(draft, ciphertext);
        let wire = match envelope.to_wire() {
            Ok(wire) => Arc::new(wire),
            Err(e) => return fail(DispatchFailure::Construction(e.to_string())),
        };

        let nodes = self.fan_out(&quorum, wire, options.deadline).await;
        let accepted = nodes.iter().filter(|n| n.outcome.is_accepted()).count();

        if accepted == 0 {
            warn!(message_id = %envelope.message_id, nodes = nodes.len(), "No relay acknowledged");
            return DeliveryReceipt {
                message_id: Some(envelope.message_id),
                target: target.clone(),
                nodes,
                failure: Some(DispatchFailure::DeliveryTimeout),
            };
        }

        info!(
            message_id = %envelope.message_id,
            accepted,
            quorum = quorum.len(),
            "Envelope dispatched"
        );
        DeliveryReceipt {
            message_id: Some(envelope.message_id),
            target: target.clone(),
            nodes,
            failure: None,
        }
    }

    /// Build a signed envelope without sending it.
    ///
    /// Runs key derivation on the calling thread.
    pub fn build_envelope(
        &self,
        plaintext: &[u8],
        target: &SigilId,
        ttl_seconds: u64,
        sensitivity: SensitivityLevel,
        content_type: &str,
    ) -> Result<Envelope, DispatchFailure> {
        let draft = self.draft(plaintext, target, ttl_seconds, sensitivity, content_type)?;
        let ciphertext = self
            .cipher
            .encrypt(&draft.inner, &draft.target, draft.created_at.timestamp())
            .map_err(|e| DispatchFailure::Construction(e.to_string()))?;
        Ok(self.seal(draft, ciphertext))
    }

    fn draft(
        &self,
        plaintext: &[u8],
        target: &SigilId,
        ttl_seconds: u64,
        sensitivity: SensitivityLevel,
        content_type: &str,
    ) -> Result<Draft, DispatchFailure> {
        if ttl_seconds > self.max_ttl_secs {
            return Err(DispatchFailure::InvalidRequest(format!(
                "ttl {}s exceeds maximum {}s",
                ttl_seconds, self.max_ttl_secs
            )));
        }
        if plaintext.len() > MAX_PAYLOAD_BYTES {
            return Err(DispatchFailure::InvalidRequest(format!(
                "payload of {} bytes exceeds maximum {}",
                plaintext.len(),
                MAX_PAYLOAD_BYTES
            )));
        }
        if content_type.is_empty() {
            return Err(DispatchFailure::InvalidRequest("empty content type".into()));
        }
        if self.registry.resolve(target).is_none() {
            return Err(DispatchFailure::UnknownIdentity(target.to_string()));
        }

        let created_at = self.clock.now();
        let message_id = MessageId::generate(created_at);
        let threshold = self.thresholds.threshold(sensitivity);
        let header = EntropyHeader::generate_meeting(
            created_at.timestamp(),
            self.estimator.as_ref(),
            threshold,
        )
        .map_err(|e| DispatchFailure::Construction(e.to_string()))?;

        let inner = InnerPayload {
            content_type: content_type.to_string(),
            message_id: message_id.to_string(),
            body: plaintext.to_vec(),
        }
        .to_bytes()
        .map_err(|e| DispatchFailure::Construction(e.to_string()))?;

        debug!(message_id = %message_id, score = header.entropy_score, "Envelope drafted");
        Ok(Draft {
            message_id,
            target: target.clone(),
            entropy_header: header.encode(),
            inner,
            created_at,
            ttl_seconds,
            sensitivity,
        })
    }

    fn seal(&self, draft: Draft, ciphertext: HybridCiphertext) -> Envelope {
        let session = self.cipher.keyring().active();
        let decoy_descriptor = MirrorTrap::new(session).generate_trap(draft.message_id.as_str());
        UnsignedEnvelope {
            message_id: draft.message_id,
            target_identity: draft.target,
            entropy_header: draft.entropy_header,
            encrypted_payload: ciphertext,
            decoy_descriptor,
            created_at: draft.created_at,
            ttl_seconds: draft.ttl_seconds,
            sensitivity_level: draft.sensitivity,
        }
        .sign(&EchoKey::derive(session))
    }

    async fn fan_out(
        &self,
        quorum: &DeliveryQuorum,
        wire: Arc<WireEnvelope>,
        deadline: Option<Duration>,
    ) -> Vec<NodeReport> {
        let attempt_timeout = match deadline {
            Some(deadline) => self.relay.node_timeout.min(deadline),
            None => self.relay.node_timeout,
        };
        let max_attempts = self
            .relay
            .retries_per_node
            .min(MAX_RETRIES_PER_NODE)
            .saturating_add(1);

        let (tx, mut rx) = mpsc::channel(quorum.len());
        for node in quorum.nodes() {
            let transport = Arc::clone(&self.transport);
            let wire = Arc::clone(&wire);
            let node = node.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let report =
                    deliver_to_node(transport.as_ref(), node, &wire, attempt_timeout, max_attempts)
                        .await;
                // The sender may have stopped listening after an earlier ack.
                let _ = tx.send(report).await;
            });
        }
        drop(tx);

        let mut reports: Vec<NodeReport> = quorum
            .nodes()
            .iter()
            .map(|node| NodeReport {
                node: node.clone(),
                outcome: NodeOutcome::Pending,
                attempts: 0,
            })
            .collect();

        let collect = async {
            while let Some(report) = rx.recv().await {
                let accepted = report.outcome.is_accepted();
                if let Some(slot) = reports.iter_mut().find(|r| r.node == report.node) {
                    *slot = report;
                }
                if accepted {
                    break;
                }
            }
        };

        match deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, collect).await.is_err() {
                    debug!("Send deadline reached before any acknowledgement");
                }
            }
            None => collect.await,
        }

        reports
    }
}

async fn deliver_to_node(
    transport: &dyn RelayTransport,
    node: RelayAddress,
    wire: &WireEnvelope,
    attempt_timeout: Duration,
    max_attempts: u32,
) -> NodeReport {
    let mut outcome = NodeOutcome::TimedOut;
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;
        match tokio::time::timeout(attempt_timeout, transport.deliver(&node, wire)).await {
            Ok(Ok(RelayAck::Accepted)) => {
                debug!(node = %node, attempts, "Relay accepted envelope");
                outcome = NodeOutcome::Accepted;
                break;
            }
            Ok(Ok(RelayAck::Refused(reason))) => {
                warn!(node = %node, reason = %reason, "Relay refused envelope");
                outcome = NodeOutcome::Refused(reason);
                break;
            }
            Ok(Err(e)) => {
                warn!(node = %node, attempt = attempts, error = %e, "Relay delivery failed");
                outcome = NodeOutcome::Failed(e.to_string());
            }
            Err(_) => {
                warn!(node = %node, attempt = attempts, "Relay delivery timed out");
                outcome = NodeOutcome::TimedOut;
            }
        }
    }

    NodeReport {
        node,
        outcome,
        attempts,
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("relay", &self.relay)
            .field("thresholds", &self.thresholds)
            .field("max_ttl_secs", &self.max_ttl_secs)
            .finish_non_exhaustive()
    }
}
