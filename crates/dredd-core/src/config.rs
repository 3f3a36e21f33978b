//! Configuration for a DREDD courier.
//!
//! All groups have working defaults except the session secrets and the
//! registry, which every deployment must supply.
//!
//! # Example
//!
//! ```
//! use dredd_core::config::ConfigBuilder;
//! use dredd_protocol::{RelayAddress, SessionSecret, SigilId, SigilBinding};
//! use std::time::Duration;
//!
//! let config = ConfigBuilder::new()
//!     .with_local_sigil(SigilId::new("council-01").unwrap())
//!     .with_sigil(SigilId::new("council-01").unwrap(), SigilBinding::new("0xabc"))
//!     .with_relay(RelayAddress::new("relay-a:9000").unwrap())
//!     .with_relay(RelayAddress::new("relay-b:9000").unwrap())
//!     .with_session_secret(&SessionSecret::generate(1))
//!     .with_node_timeout(Duration::from_secs(2))
//!     .build_validated()
//!     .unwrap();
//! assert_eq!(config.relay.quorum_size, 2);
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use dredd_crypto::KdfParams;
use dredd_protocol::limits::{
    KEY_WINDOW_SECS, KEY_WINDOW_TOLERANCE, MAX_PAYLOAD_BYTES, MAX_TTL_SECS, MIN_QUORUM_SIZE,
};
use dredd_protocol::{
    EntropyThresholds, RelayAddress, SessionKeyring, SessionSecret, SigilBinding, SigilId,
    StaticRegistry,
};
use serde::{Deserialize, Serialize};

/// Default number of relays an envelope is sent to.
const DEFAULT_QUORUM_SIZE: usize = MIN_QUORUM_SIZE;

/// Default per-attempt relay timeout in seconds.
const DEFAULT_NODE_TIMEOUT_SECS: u64 = 5;

/// Default extra attempts per relay after a transport failure.
const DEFAULT_RETRIES_PER_NODE: u32 = 1;

/// Most extra attempts per relay after a transport failure.
pub const MAX_RETRIES_PER_NODE: u32 = 1;

/// Default inbound queue capacity while listening.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default allowed distance between entropy header time and now.
const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 3600;

/// Default distance below threshold at which entropy failures engage the trap.
const DEFAULT_TRAP_ENTROPY_MARGIN: f64 = 0.2;

/// Default replay cache capacity.
const DEFAULT_REPLAY_CAPACITY: usize = 10_000;

/// Configuration error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// The reason it's invalid.
        reason: String,
    },

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// Config file could not be read.
    #[error("Cannot read config file: {0}")]
    Io(String),

    /// Config file is not valid JSON for this schema.
    #[error("Cannot parse config: {0}")]
    Parse(String),
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Complete courier configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Who this node is.
    pub identity: IdentityConfig,

    /// Known sigils.
    pub registry: RegistryConfig,

    /// Relay pool and delivery behaviour.
    pub relay: RelayConfig,

    /// Receiver admission settings.
    pub validation: ValidationConfig,

    /// Replay cache sizing.
    pub replay: ReplayConfig,

    /// Mirror-trap settings.
    pub trap: TrapConfig,

    /// Shared secrets and key derivation.
    pub crypto: CryptoConfig,
}

impl CourierConfig {
    /// Create a configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Parse JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text does not match the schema.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`], [`ConfigError::Parse`] or a validation
    /// error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Relay
        if self.relay.quorum_size < MIN_QUORUM_SIZE {
            return Err(invalid(
                "relay.quorum_size",
                format!("quorum size must be at least {}", MIN_QUORUM_SIZE),
            ));
        }
        if self.relay.node_timeout.is_zero() {
            return Err(invalid(
                "relay.node_timeout",
                "node timeout must be greater than zero",
            ));
        }
        if self.relay.retries_per_node > MAX_RETRIES_PER_NODE {
            return Err(invalid(
                "relay.retries_per_node",
                format!("at most {} retry per node", MAX_RETRIES_PER_NODE),
            ));
        }
        if self.relay.queue_capacity == 0 {
            return Err(invalid(
                "relay.queue_capacity",
                "queue capacity must be greater than zero",
            ));
        }

        // Validation
        self.validation
            .thresholds
            .validate()
            .map_err(|e| invalid("validation.thresholds", e.to_string()))?;
        if !(0.0..=1.0).contains(&self.validation.trap_entropy_margin) {
            return Err(invalid(
                "validation.trap_entropy_margin",
                "margin must be between 0.0 and 1.0",
            ));
        }
        if self.validation.max_ttl_secs > MAX_TTL_SECS {
            return Err(invalid(
                "validation.max_ttl_secs",
                format!("must not exceed {}", MAX_TTL_SECS),
            ));
        }
        if self.validation.max_plaintext_bytes == Some(0) {
            return Err(invalid(
                "validation.max_plaintext_bytes",
                "limit must be greater than zero",
            ));
        }

        // Replay
        if self.replay.capacity == 0 {
            return Err(invalid(
                "replay.capacity",
                "capacity must be greater than zero",
            ));
        }
        // An envelope passes the freshness gate for up to twice the skew
        // after arrival; its id has to be remembered at least that long.
        let min_retention = self.min_replay_retention();
        if self.replay.retention < min_retention {
            return Err(invalid(
                "replay.retention",
                format!(
                    "retention must be at least {}s to cover the clock skew window",
                    min_retention.as_secs()
                ),
            ));
        }

        // Crypto
        if self.crypto.session_secrets.is_empty() {
            return Err(ConfigError::Missing("crypto.session_secrets".into()));
        }
        self.keyring()?;
        self.crypto
            .kdf
            .validate()
            .map_err(|e| invalid("crypto.kdf", e.to_string()))?;
        if self.crypto.key_window_secs == 0 {
            return Err(invalid(
                "crypto.key_window_secs",
                "window must be greater than zero",
            ));
        }
        // Decryption accepts a key window only this many windows away, so
        // every fresh envelope must fall within that reach.
        let reach = self
            .crypto
            .key_window_secs
            .saturating_mul(KEY_WINDOW_TOLERANCE);
        if reach < self.validation.max_clock_skew_secs {
            return Err(invalid(
                "crypto.key_window_secs",
                format!(
                    "window must be at least {}s to cover the clock skew",
                    self.validation.max_clock_skew_secs.div_ceil(KEY_WINDOW_TOLERANCE.max(1))
                ),
            ));
        }

        Ok(())
    }

    /// Shortest replay retention that outlives every envelope the
    /// freshness gate can still admit.
    pub fn min_replay_retention(&self) -> Duration {
        let skew = self.validation.max_clock_skew_secs;
        Duration::from_secs(skew.saturating_mul(2).saturating_add(1))
    }

    /// Registry built from the `registry` and `relay` groups.
    pub fn registry(&self) -> StaticRegistry {
        StaticRegistry::from_parts(self.registry.sigils.clone(), self.relay.nodes.clone())
    }

    /// Session keyring built from the configured secrets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed or duplicate
    /// secrets.
    pub fn keyring(&self) -> Result<SessionKeyring, ConfigError> {
        let secrets = self
            .crypto
            .session_secrets
            .iter()
            .map(|s| SessionSecret::from_hex(s.epoch, &s.secret))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("crypto.session_secrets", e.to_string()))?;
        SessionKeyring::new(secrets).map_err(|e| invalid("crypto.session_secrets", e.to_string()))
    }
}

/// Local identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sigil this node receives for. Optional for send-only nodes.
    pub local_sigil: Option<SigilId>,
}

/// Sigil registry contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Sigil to binding.
    pub sigils: BTreeMap<SigilId, SigilBinding>,
}

/// Relay pool and delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Every relay node in the deployment.
    pub nodes: Vec<RelayAddress>,

    /// Relays per envelope.
    pub quorum_size: usize,

    /// Time allowed for one delivery attempt.
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,

    /// Extra attempts after a transport failure, at most
    /// [`MAX_RETRIES_PER_NODE`].
    pub retries_per_node: u32,

    /// Inbound queue capacity while listening.
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            quorum_size: DEFAULT_QUORUM_SIZE,
            node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
            retries_per_node: DEFAULT_RETRIES_PER_NODE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Receiver admission settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum entropy score per sensitivity level.
    pub thresholds: EntropyThresholds,

    /// Allowed distance between entropy header time and now.
    pub max_clock_skew_secs: u64,

    /// Entropy failures more than this far below threshold engage the trap.
    pub trap_entropy_margin: f64,

    /// Longest TTL a sender may request.
    pub max_ttl_secs: u64,

    /// Accepted inner content types. Empty accepts any.
    pub allowed_content_types: Vec<String>,

    /// Largest accepted plaintext.
    pub max_plaintext_bytes: Option<usize>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            thresholds: EntropyThresholds::default(),
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            trap_entropy_margin: DEFAULT_TRAP_ENTROPY_MARGIN,
            max_ttl_secs: MAX_TTL_SECS,
            allowed_content_types: Vec::new(),
            max_plaintext_bytes: Some(MAX_PAYLOAD_BYTES),
        }
    }
}

/// Replay cache sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Most message ids remembered at once.
    pub capacity: usize,

    /// Longest time an id is remembered, whatever its TTL. Must exceed
    /// twice `validation.max_clock_skew_secs`.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_REPLAY_CAPACITY,
            retention: Duration::from_secs(MAX_TTL_SECS),
        }
    }
}

/// Mirror-trap settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapConfig {
    /// Answer hostile-looking envelopes with decoys. When off they are
    /// dropped silently.
    pub enabled: bool,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One configured session secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionSecretConfig {
    /// Epoch number.
    pub epoch: u32,
    /// 64 hex characters.
    pub secret: String,
}

impl std::fmt::Debug for SessionSecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecretConfig")
            .field("epoch", &self.epoch)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Shared secrets and key derivation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Session secrets; the highest epoch sends.
    pub session_secrets: Vec<SessionSecretConfig>,

    /// Argon2id parameters. Every node must agree on these.
    pub kdf: KdfParams,

    /// Width of a shared-key window. Must be at least
    /// `validation.max_clock_skew_secs`.
    pub key_window_secs: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            session_secrets: Vec::new(),
            kdf: KdfParams::default(),
            key_window_secs: KEY_WINDOW_SECS,
        }
    }
}

/// Builder for constructing `CourierConfig` with custom values.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: CourierConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the final configuration.
    pub fn build(self) -> CourierConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// Returns an error if validation fails.
    pub fn build_validated(self) -> Result<CourierConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }

    // ===== Identity and registry =====

    /// Set the sigil this node receives for.
    pub fn with_local_sigil(mut self, sigil: SigilId) -> Self {
        self.config.identity.local_sigil = Some(sigil);
        self
    }

    /// Register a sigil.
    pub fn with_sigil(mut self, sigil: SigilId, binding: SigilBinding) -> Self {
        self.config.registry.sigils.insert(sigil, binding);
        self
    }

    // ===== Relay =====

    /// Add a relay node.
    pub fn with_relay(mut self, node: RelayAddress) -> Self {
        if !self.config.relay.nodes.contains(&node) {
            self.config.relay.nodes.push(node);
        }
        self
    }

    /// Set the quorum size.
    pub fn with_quorum_size(mut self, size: usize) -> Self {
        self.config.relay.quorum_size = size;
        self
    }

    /// Set the per-attempt relay timeout.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.config.relay.node_timeout = timeout;
        self
    }

    /// Set the number of retries after a transport failure.
    pub fn with_retries_per_node(mut self, retries: u32) -> Self {
        self.config.relay.retries_per_node = retries;
        self
    }

    // ===== Validation =====

    /// Set the entropy thresholds.
    pub fn with_thresholds(mut self, thresholds: EntropyThresholds) -> Self {
        self.config.validation.thresholds = thresholds;
        self
    }

    /// Set the allowed distance between entropy header time and now.
    pub fn with_max_clock_skew_secs(mut self, secs: u64) -> Self {
        self.config.validation.max_clock_skew_secs = secs;
        self
    }

    /// Allow an inner content type. The first call turns the allow-list on.
    pub fn allow_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config
            .validation
            .allowed_content_types
            .push(content_type.into());
        self
    }

    /// Set the largest accepted plaintext.
    pub fn with_max_plaintext_bytes(mut self, max: Option<usize>) -> Self {
        self.config.validation.max_plaintext_bytes = max;
        self
    }

    // ===== Replay and trap =====

    /// Set the replay cache capacity.
    pub fn with_replay_capacity(mut self, capacity: usize) -> Self {
        self.config.replay.capacity = capacity;
        self
    }

    /// Set how long an id may be remembered.
    pub fn with_replay_retention(mut self, retention: Duration) -> Self {
        self.config.replay.retention = retention;
        self
    }

    /// Turn the mirror trap off.
    pub fn disable_trap(mut self) -> Self {
        self.config.trap.enabled = false;
        self
    }

    // ===== Crypto =====

    /// Add a session secret.
    pub fn with_session_secret(mut self, secret: &SessionSecret) -> Self {
        self.config.crypto.session_secrets.push(SessionSecretConfig {
            epoch: secret.epoch(),
            secret: hex::encode(secret.as_bytes()),
        });
        self
    }

    /// Set the shared-key window width.
    pub fn with_key_window_secs(mut self, secs: u64) -> Self {
        self.config.crypto.key_window_secs = secs;
        self
    }

    /// Set Argon2id parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.config.crypto.kdf = kdf;
        self
    }
}

/// Serde helper for `Duration` as milliseconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
