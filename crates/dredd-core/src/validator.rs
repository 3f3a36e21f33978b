//! Receiver admission pipeline.
//!
//! Every inbound envelope passes these gates in order; the first failure
//! rejects it:
//!
//! 1. structural check (shape, encodings, sizes)
//! 2. expiry
//! 3. targeting (registered, and addressed to the local sigil)
//! 4. entropy header (fresh, challenge present, score at threshold)
//! 5. echo signature, then replay
//! 6. decryption
//! 7. post-decrypt checks
//!
//! Rejections are local. A remote peer only ever sees silence or, for
//! hostile-looking failures, a mirror-trap decoy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dredd_protocol::{
    EchoKey, EntropyEstimator, EntropyHeader, Envelope, HybridCipher, InnerPayload, MessageId,
    MirrorTrap, RelayAddress, SensitivityLevel, ShannonEstimator, SigilId, SigilRegistry,
    TrapTrigger,
};
use dredd_protocol::{DecoyResponse, EntropyThresholds};
use tracing::{debug, info, warn};

use crate::audit::{AuditEventKind, AuditTrail};
use crate::config::{CourierConfig, ValidationConfig};
use crate::error::RejectionStage;
use crate::policy::PolicySet;
use crate::replay::ReplayCache;
use crate::time::Clock;

/// Where an accepted message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Envelope id.
    pub message_id: MessageId,
    /// Sigil it was addressed to.
    pub target: SigilId,
    /// Declared sensitivity.
    pub sensitivity: SensitivityLevel,
    /// Sender's creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Inner content type.
    pub content_type: String,
    /// Relay that delivered it, when known.
    pub relay: Option<RelayAddress>,
}

/// A decrypted, fully validated message.
#[derive(Clone, PartialEq, Eq)]
pub struct AcceptedMessage {
    /// Application payload.
    pub plaintext: Vec<u8>,
    /// Metadata.
    pub provenance: Provenance,
}

impl std::fmt::Debug for AcceptedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptedMessage")
            .field("plaintext", &format_args!("<{} bytes>", self.plaintext.len()))
            .field("provenance", &self.provenance)
            .finish()
    }
}

/// Outcome of validating one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Passed every gate.
    Accepted(AcceptedMessage),
    /// Failed a gate. Never carries plaintext.
    Rejected {
        /// Failing gate.
        stage: RejectionStage,
        /// Local diagnostic.
        reason: String,
    },
}

impl ValidationResult {
    /// True for [`ValidationResult::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The accepted message, if any.
    pub fn accepted(&self) -> Option<&AcceptedMessage> {
        match self {
            Self::Accepted(message) => Some(message),
            Self::Rejected { .. } => None,
        }
    }

    /// The rejecting stage, if any.
    pub fn stage(&self) -> Option<RejectionStage> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected { stage, .. } => Some(*stage),
        }
    }
}

/// Validation result plus the decoy to send back, if a trap engaged.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Local result.
    pub result: ValidationResult,
    /// Decoy for the remote peer.
    pub decoy: Option<DecoyResponse>,
}

struct Rejection {
    stage: RejectionStage,
    reason: String,
    trap: Option<TrapTrigger>,
}

impl Rejection {
    fn new(stage: RejectionStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            trap: None,
        }
    }

    fn trapped(mut self, trigger: TrapTrigger) -> Self {
        self.trap = Some(trigger);
        self
    }
}

#[derive(Debug, Clone)]
struct Settings {
    thresholds: EntropyThresholds,
    max_clock_skew_secs: u64,
    trap_entropy_margin: f64,
    trap_enabled: bool,
}

impl Settings {
    fn from_config(config: &ValidationConfig, trap_enabled: bool) -> Self {
        Self {
            thresholds: config.thresholds,
            max_clock_skew_secs: config.max_clock_skew_secs,
            trap_entropy_margin: config.trap_entropy_margin,
            trap_enabled,
        }
    }
}

/// The admission pipeline for one node.
pub struct Validator {
    registry: Arc<dyn SigilRegistry>,
    cipher: Arc<HybridCipher>,
    estimator: Arc<dyn EntropyEstimator>,
    replay: Arc<ReplayCache>,
    policy: PolicySet,
    trap: MirrorTrap,
    settings: Settings,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditTrail>,
}

impl Validator {
    /// Validator with settings, replay cache and policy taken from `config`.
    pub fn new(
        config: &CourierConfig,
        registry: Arc<dyn SigilRegistry>,
        cipher: Arc<HybridCipher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trap: MirrorTrap::new(cipher.keyring().active()),
            registry,
            cipher,
            estimator: Arc::new(ShannonEstimator),
            replay: Arc::new(ReplayCache::new(
                config.replay.capacity,
                config.replay.retention,
            )),
            policy: PolicySet::from_config(&config.validation),
            settings: Settings::from_config(&config.validation, config.trap.enabled),
            clock,
            audit: Arc::new(AuditTrail::default()),
        }
    }

    /// Replace the entropy estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn EntropyEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Share a replay cache with other validators.
    pub fn with_replay_cache(mut self, replay: Arc<ReplayCache>) -> Self {
        self.replay = replay;
        self
    }

    /// Replace the post-decrypt checks.
    pub fn with_policy(mut self, policy: PolicySet) -> Self {
        self.policy = policy;
        self
    }

    /// Record into `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    /// Audit trail in use.
    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Replay cache in use.
    pub fn replay_cache(&self) -> &Arc<ReplayCache> {
        &self.replay
    }

    /// Run the pipeline over raw envelope JSON received for `local`.
    ///
    /// CPU-heavy (key derivation); call from a blocking context.
    pub fn validate(&self, raw: &str, local: &SigilId, relay: Option<&RelayAddress>) -> Verdict {
        let now = self.clock.now();

        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.audit.record(now, None, AuditEventKind::ParseAttempt);
                let rejection = Rejection::new(RejectionStage::StructuralCheck, e.to_string());
                return self.reject(now, None, rejection);
            }
        };

        self.audit.record(
            now,
            Some(envelope.message_id.as_str()),
            AuditEventKind::ParseAttempt,
        );

        match self.run_gates(&envelope, local, relay, now) {
            Ok(accepted) => {
                self.audit.record(
                    now,
                    Some(envelope.message_id.as_str()),
                    AuditEventKind::ParseSuccess,
                );
                info!(
                    message_id = %envelope.message_id,
                    sensitivity = %envelope.sensitivity_level,
                    "Envelope accepted"
                );
                Verdict {
                    result: ValidationResult::Accepted(accepted),
                    decoy: None,
                }
            }
            Err(rejection) => self.reject(now, Some(&envelope), rejection),
        }
    }

    fn reject(&self, now: DateTime<Utc>, envelope: Option<&Envelope>, rejection: Rejection) -> Verdict {
        let message_id = envelope.map(|e| e.message_id.as_str());
        debug!(
            message_id = message_id.unwrap_or("-"),
            stage = %rejection.stage,
            reason = %rejection.reason,
            "Envelope rejected"
        );
        self.audit.record(
            now,
            message_id,
            AuditEventKind::ParseFailed {
                stage: rejection.stage,
            },
        );

        let decoy = match (envelope, rejection.trap) {
            (Some(envelope), Some(trigger)) => self.engage_trap(now, envelope, trigger),
            _ => None,
        };

        Verdict {
            result: ValidationResult::Rejected {
                stage: rejection.stage,
                reason: rejection.reason,
            },
            decoy,
        }
    }

    fn engage_trap(
        &self,
        now: DateTime<Utc>,
        envelope: &Envelope,
        trigger: TrapTrigger,
    ) -> Option<DecoyResponse> {
        if !self.settings.trap_enabled {
            return None;
        }
        let id = envelope.message_id.as_str();
        let descriptor = self.trap.generate_trap(id);
        if !descriptor.arms(trigger) {
            return None;
        }
        warn!(message_id = %id, trigger = ?trigger, "Mirror trap engaged");
        self.audit
            .record(now, Some(id), AuditEventKind::TrapEngaged { trigger });
        Some(descriptor.respond(id, trigger))
    }

    fn run_gates(
        &self,
        envelope: &Envelope,
        local: &SigilId,
        relay: Option<&RelayAddress>,
        now: DateTime<Utc>,
    ) -> Result<AcceptedMessage, Rejection> {
        self.check_expiry(envelope, now)?;
        self.check_target(envelope, local)?;
        let stale_at = self.check_entropy(envelope, now)?;
        self.check_echo(envelope)?;

        // Past either instant a copy fails an earlier gate, so the id need
        // not be remembered longer.
        let replay_until = envelope.expires_at().min(stale_at);
        if !self
            .replay
            .check_and_insert(&envelope.message_id, replay_until, now)
        {
            return Err(Rejection::new(
                RejectionStage::ReplayDetected,
                "message id already seen",
            ));
        }

        let payload = self.decrypt(envelope, now)?;

        self.policy.run(envelope, &payload).map_err(|failure| {
            Rejection::new(
                RejectionStage::PolicyViolation,
                format!("{}: {}", failure.check, failure.reason),
            )
        })?;

        Ok(AcceptedMessage {
            provenance: Provenance {
                message_id: envelope.message_id.clone(),
                target: envelope.target_identity.clone(),
                sensitivity: envelope.sensitivity_level,
                created_at: envelope.created_at,
                expires_at: envelope.expires_at(),
                content_type: payload.content_type,
                relay: relay.cloned(),
            },
            plaintext: payload.body,
        })
    }

    fn check_expiry(&self, envelope: &Envelope, now: DateTime<Utc>) -> Result<(), Rejection> {
        if envelope.is_expired(now) {
            return Err(Rejection::new(
                RejectionStage::Expired,
                format!("expired at {}", envelope.expires_at()),
            ));
        }
        Ok(())
    }

    fn check_target(&self, envelope: &Envelope, local: &SigilId) -> Result<(), Rejection> {
        let target = &envelope.target_identity;
        if self.registry.resolve(target).is_none() {
            return Err(
                Rejection::new(RejectionStage::WrongTarget, "target sigil is not registered")
                    .trapped(TrapTrigger::UnregisteredSigil),
            );
        }
        if target != local {
            return Err(Rejection::new(
                RejectionStage::WrongTarget,
                format!("addressed to {}", target),
            ));
        }
        Ok(())
    }

    /// Returns the first instant at which the header stops being fresh.
    fn check_entropy(
        &self,
        envelope: &Envelope,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, Rejection> {
        let header = EntropyHeader::decode(&envelope.entropy_header).map_err(|e| {
            Rejection::new(RejectionStage::InsufficientEntropy, e.to_string())
                .trapped(TrapTrigger::InsufficientEntropy)
        })?;

        if !header.is_fresh(now.timestamp(), self.settings.max_clock_skew_secs) {
            return Err(Rejection::new(
                RejectionStage::InsufficientEntropy,
                "entropy header timestamp outside allowed skew",
            ));
        }

        // A sender can declare any score; trust the lower of declared and measured.
        let measured = header.measure(self.estimator.as_ref());
        let score = header.entropy_score.min(measured);
        let threshold = self.settings.thresholds.threshold(envelope.sensitivity_level);

        if score < threshold {
            let rejection = Rejection::new(
                RejectionStage::InsufficientEntropy,
                format!("score {:.3} below threshold {:.3}", score, threshold),
            );
            if score < threshold - self.settings.trap_entropy_margin {
                return Err(rejection.trapped(TrapTrigger::InsufficientEntropy));
            }
            return Err(rejection);
        }

        let skew = i64::try_from(self.settings.max_clock_skew_secs).unwrap_or(i64::MAX);
        let stale_at = header
            .timestamp
            .saturating_add(skew)
            .saturating_add(1);
        Ok(DateTime::from_timestamp(stale_at, 0).unwrap_or_else(|| envelope.expires_at()))
    }

    fn check_echo(&self, envelope: &Envelope) -> Result<(), Rejection> {
        let verified = self
            .cipher
            .keyring()
            .get(envelope.encrypted_payload.key_epoch)
            .map(EchoKey::derive)
            .is_some_and(|key| envelope.verify_echo(&key));

        if !verified {
            return Err(
                Rejection::new(RejectionStage::SignatureMismatch, "echo signature mismatch")
                    .trapped(TrapTrigger::SignatureMismatch),
            );
        }
        Ok(())
    }

    fn decrypt(&self, envelope: &Envelope, now: DateTime<Utc>) -> Result<InnerPayload, Rejection> {
        let plaintext = self
            .cipher
            .decrypt(
                &envelope.encrypted_payload,
                &envelope.target_identity,
                now.timestamp(),
            )
            .map_err(|e| Rejection::new(RejectionStage::DecryptionError, e.to_string()))?;

        InnerPayload::from_bytes(&plaintext)
            .map_err(|_| Rejection::new(RejectionStage::DecryptionError, "inner payload unreadable"))
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("settings", &self.settings)
            .field("policy", &self.policy)
            .field("replay", &self.replay)
            .finish_non_exhaustive()
    }
}
