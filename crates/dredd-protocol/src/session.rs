//! Session secrets shared by cooperating nodes.
//!
//! Every node in a deployment holds the same set of session secrets, each
//! tagged with an epoch. The highest epoch is used for sending; older epochs
//! stay in the keyring so envelopes sent just before a rotation still verify.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::limits::SESSION_SECRET_LEN;
use crate::{ProtocolError, Result};

/// One shared session secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    #[zeroize(skip)]
    epoch: u32,
    bytes: [u8; SESSION_SECRET_LEN],
}

impl SessionSecret {
    /// Wrap raw secret bytes.
    pub fn new(epoch: u32, bytes: [u8; SESSION_SECRET_LEN]) -> Self {
        Self { epoch, bytes }
    }

    /// Generate a random secret.
    pub fn generate(epoch: u32) -> Self {
        let mut bytes = [0u8; SESSION_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { epoch, bytes }
    }

    /// Parse a 64-character hex secret.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKeyring`] for anything else. The
    /// message never echoes the input.
    pub fn from_hex(epoch: u32, hex_str: &str) -> Result<Self> {
        let mut bytes = [0u8; SESSION_SECRET_LEN];
        hex::decode_to_slice(hex_str.trim(), &mut bytes).map_err(|_| {
            ProtocolError::InvalidKeyring(format!(
                "secret for epoch {} must be {} hex bytes",
                epoch, SESSION_SECRET_LEN
            ))
        })?;
        Ok(Self { epoch, bytes })
    }

    /// Epoch number.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Raw secret bytes. Never log these.
    pub fn as_bytes(&self) -> &[u8; SESSION_SECRET_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecret")
            .field("epoch", &self.epoch)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// All session secrets a node knows, indexed by epoch.
#[derive(Clone)]
pub struct SessionKeyring {
    active: SessionSecret,
    previous: BTreeMap<u32, SessionSecret>,
}

impl SessionKeyring {
    /// Build a keyring. The highest epoch becomes the active secret.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKeyring`] when `secrets` is empty or
    /// two secrets share an epoch.
    pub fn new(secrets: impl IntoIterator<Item = SessionSecret>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for secret in secrets {
            let epoch = secret.epoch();
            if map.insert(epoch, secret).is_some() {
                return Err(ProtocolError::InvalidKeyring(format!(
                    "duplicate epoch {}",
                    epoch
                )));
            }
        }
        let (_, active) = map
            .pop_last()
            .ok_or_else(|| ProtocolError::InvalidKeyring("no session secrets".into()))?;
        Ok(Self {
            active,
            previous: map,
        })
    }

    /// Keyring holding exactly one secret.
    pub fn single(secret: SessionSecret) -> Self {
        Self {
            active: secret,
            previous: BTreeMap::new(),
        }
    }

    /// Secret used for outgoing messages: the highest epoch.
    pub fn active(&self) -> &SessionSecret {
        &self.active
    }

    /// Secret for `epoch`, if known.
    pub fn get(&self, epoch: u32) -> Option<&SessionSecret> {
        if epoch == self.active.epoch() {
            Some(&self.active)
        } else {
            self.previous.get(&epoch)
        }
    }

    /// Known epochs in ascending order.
    pub fn epochs(&self) -> Vec<u32> {
        self.previous
            .keys()
            .copied()
            .chain(std::iter::once(self.active.epoch()))
            .collect()
    }
}

impl std::fmt::Debug for SessionKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyring")
            .field("epochs", &self.epochs())
            .finish()
    }
}
