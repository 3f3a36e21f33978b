//! The courier facade: one node's sender and receiver sharing one config.

use std::sync::Arc;
use std::time::Duration;

use dredd_net::RelayTransport;
use dredd_protocol::{EntropyEstimator, HybridCipher, SensitivityLevel, SigilId, SigilRegistry};
use tracing::info;

use crate::audit::AuditTrail;
use crate::cancel::CancelToken;
use crate::config::CourierConfig;
use crate::dispatcher::{Dispatcher, SendOptions};
use crate::error::Result;
use crate::listener::Listener;
use crate::policy::{PolicySet, PostDecryptCheck};
use crate::receipt::DeliveryReceipt;
use crate::time::{Clock, SystemClock};
use crate::validator::{ValidationResult, Validator};

/// Builder for a [`Courier`].
///
/// Only the config and transport are required. The registry defaults to the
/// one described by the config, the clock to the system clock and the
/// estimator to normalized Shannon entropy.
pub struct CourierBuilder {
    config: CourierConfig,
    transport: Arc<dyn RelayTransport>,
    registry: Option<Arc<dyn SigilRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    estimator: Option<Arc<dyn EntropyEstimator>>,
    checks: Vec<Arc<dyn PostDecryptCheck>>,
}

impl CourierBuilder {
    /// Start a builder.
    pub fn new(config: CourierConfig, transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            config,
            transport,
            registry: None,
            clock: None,
            estimator: None,
            checks: Vec::new(),
        }
    }

    /// Use `registry` instead of the one in the config.
    pub fn registry(mut self, registry: Arc<dyn SigilRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `clock` for timestamps and expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `estimator` on both the send and receive paths.
    pub fn estimator(mut self, estimator: Arc<dyn EntropyEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Add a post-decrypt check after the configured ones.
    pub fn check(mut self, check: Arc<dyn PostDecryptCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Validate the config and assemble the courier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Config`] if the config is invalid or its
    /// session secrets are malformed.
    pub fn build(self) -> Result<Courier> {
        let config = self.config;
        config.validate()?;

        let keyring = Arc::new(config.keyring()?);
        let cipher = Arc::new(
            HybridCipher::new(keyring, config.crypto.kdf)
                .with_window_secs(config.crypto.key_window_secs),
        );
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(config.registry()) as Arc<dyn SigilRegistry>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let mut dispatcher = Dispatcher::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&self.transport),
            Arc::clone(&cipher),
            Arc::clone(&clock),
        );

        let policy = self
            .checks
            .into_iter()
            .fold(PolicySet::from_config(&config.validation), PolicySet::with_check);
        let mut validator = Validator::new(&config, Arc::clone(&registry), cipher, clock)
            .with_policy(policy);

        if let Some(estimator) = self.estimator {
            dispatcher = dispatcher.with_estimator(Arc::clone(&estimator));
            validator = validator.with_estimator(estimator);
        }

        let validator = Arc::new(validator);
        let listener = Listener::new(
            config.relay.clone(),
            registry,
            self.transport,
            Arc::clone(&validator),
        );

        info!(
            local_sigil = config.identity.local_sigil.as_ref().map(|s| s.as_str()).unwrap_or("-"),
            relays = config.relay.nodes.len(),
            quorum = config.relay.quorum_size,
            "Courier ready"
        );

        Ok(Courier {
            dispatcher,
            listener,
            validator,
        })
    }
}

/// Sends and receives DREDD envelopes for one node.
pub struct Courier {
    dispatcher: Dispatcher,
    listener: Listener,
    validator: Arc<Validator>,
}

impl Courier {
    /// Start a [`CourierBuilder`].
    pub fn builder(config: CourierConfig, transport: Arc<dyn RelayTransport>) -> CourierBuilder {
        CourierBuilder::new(config, transport)
    }

    /// Encrypt `payload` for `target` and deliver it to the target's quorum.
    ///
    /// TTL is truncated to whole seconds.
    pub async fn dispatch(
        &self,
        payload: &[u8],
        target: &SigilId,
        ttl: Duration,
        sensitivity: SensitivityLevel,
    ) -> DeliveryReceipt {
        self.dispatch_with(payload, target, ttl, sensitivity, SendOptions::default())
            .await
    }

    /// [`Courier::dispatch`] with explicit options.
    pub async fn dispatch_with(
        &self,
        payload: &[u8],
        target: &SigilId,
        ttl: Duration,
        sensitivity: SensitivityLevel,
        options: SendOptions,
    ) -> DeliveryReceipt {
        self.dispatcher
            .send_with(payload, target, ttl.as_secs(), sensitivity, options)
            .await
    }

    /// Listen for envelopes addressed to `identity` for `timeout`.
    pub async fn listen(&self, identity: &SigilId, timeout: Duration) -> Result<Vec<ValidationResult>> {
        self.listener
            .listen(identity, timeout, &CancelToken::new())
            .await
    }

    /// [`Courier::listen`], stopping early when `cancel` fires.
    pub async fn listen_until(
        &self,
        identity: &SigilId,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<ValidationResult>> {
        self.listener.listen(identity, timeout, cancel).await
    }

    /// Audit trail of inbound handling.
    pub fn audit(&self) -> &Arc<AuditTrail> {
        self.validator.audit()
    }

    /// The receive-side pipeline.
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// The send-side dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("dispatcher", &self.dispatcher)
            .field("listener", &self.listener)
            .finish()
    }
}
