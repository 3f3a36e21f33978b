//! Identity and relay registry.
//!
//! The registry is owned by whoever deploys DREDD. The core receives it as an
//! injected `Arc<dyn SigilRegistry>` and only ever reads from it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sigil::{SigilBinding, SigilId};
use crate::{ProtocolError, Result};

/// Network address of a relay node, e.g. `relay1.example:8443`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayAddress(String);

impl RelayAddress {
    /// Wrap an address. Must be non-empty and free of whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRelayAddress`] otherwise.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        if addr.is_empty() || addr.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidRelayAddress(addr));
        }
        Ok(Self(addr))
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RelayAddress {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<RelayAddress> for String {
    fn from(addr: RelayAddress) -> Self {
        addr.0
    }
}

/// Read-only lookup of sigils and the relay pool.
pub trait SigilRegistry: Send + Sync {
    /// Binding for `sigil`, or `None` when it is not registered.
    fn resolve(&self, sigil: &SigilId) -> Option<SigilBinding>;

    /// Every relay node the deployment knows about, in a stable order.
    fn relay_pool(&self) -> Vec<RelayAddress>;

    /// Convenience wrapper over [`SigilRegistry::resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownIdentity`] when the sigil is absent.
    fn require(&self, sigil: &SigilId) -> Result<SigilBinding> {
        self.resolve(sigil)
            .ok_or_else(|| ProtocolError::UnknownIdentity(sigil.to_string()))
    }
}

/// Registry backed by fixed maps, typically loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRegistry {
    #[serde(default)]
    sigils: BTreeMap<SigilId, SigilBinding>,
    #[serde(default)]
    relays: Vec<RelayAddress>,
}

impl StaticRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pre-validated parts.
    pub fn from_parts(sigils: BTreeMap<SigilId, SigilBinding>, relays: Vec<RelayAddress>) -> Self {
        Self { sigils, relays }
    }

    /// Register a sigil.
    pub fn with_sigil(mut self, sigil: SigilId, binding: SigilBinding) -> Self {
        self.sigils.insert(sigil, binding);
        self
    }

    /// Append a relay node.
    pub fn with_relay(mut self, relay: RelayAddress) -> Self {
        if !self.relays.contains(&relay) {
            self.relays.push(relay);
        }
        self
    }

    /// Number of registered sigils.
    pub fn sigil_count(&self) -> usize {
        self.sigils.len()
    }
}

impl SigilRegistry for StaticRegistry {
    fn resolve(&self, sigil: &SigilId) -> Option<SigilBinding> {
        self.sigils.get(sigil).cloned()
    }

    fn relay_pool(&self) -> Vec<RelayAddress> {
        self.relays.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigil(s: &str) -> SigilId {
        SigilId::new(s).unwrap()
    }

    #[test]
    fn test_resolve_and_require() {
        let registry = StaticRegistry::new()
            .with_sigil(sigil("council-01"), SigilBinding::new("0xabc"));

        assert_eq!(
            registry.resolve(&sigil("council-01")).unwrap().as_str(),
            "0xabc"
        );
        assert!(registry.resolve(&sigil("council-02")).is_none());
        assert!(matches!(
            registry.require(&sigil("council-02")),
            Err(ProtocolError::UnknownIdentity(s)) if s == "council-02"
        ));
    }

    #[test]
    fn test_relay_pool_is_ordered_and_deduplicated() {
        let a = RelayAddress::new("relay-a:9000").unwrap();
        let b = RelayAddress::new("relay-b:9000").unwrap();
        let registry = StaticRegistry::new()
            .with_relay(a.clone())
            .with_relay(b.clone())
            .with_relay(a.clone());
        assert_eq!(registry.relay_pool(), vec![a, b]);
    }

    #[test]
    fn test_relay_address_validation() {
        assert!(RelayAddress::new("").is_err());
        assert!(RelayAddress::new("relay a").is_err());
        assert!(RelayAddress::new("127.0.0.1:9000").is_ok());
    }

    #[test]
    fn test_registry_deserializes_from_json() {
        let json = r#"{
            "sigils": {"alpha_sigil": "0x1234", "council-01": "0x5678"},
            "relays": ["relay1:8443", "relay2:8443"]
        }"#;
        let registry: StaticRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.sigil_count(), 2);
        assert_eq!(registry.relay_pool().len(), 2);
    }
}
