//! Sigil identities and their registry bindings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_SIGIL_LEN;
use crate::{ProtocolError, Result};

/// Opaque addressing token for a protocol participant, e.g. `council-01`.
///
/// Allowed characters are ASCII alphanumerics and `. _ : -`; length is
/// 1 to [`MAX_SIGIL_LEN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SigilId(String);

impl SigilId {
    /// Validate and wrap a sigil.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSigil`] for an empty, overlong or
    /// non-conforming name.
    pub fn new(sigil: impl Into<String>) -> Result<Self> {
        let sigil = sigil.into();
        if sigil.is_empty() {
            return Err(ProtocolError::InvalidSigil("empty".into()));
        }
        if sigil.len() > MAX_SIGIL_LEN {
            return Err(ProtocolError::InvalidSigil(format!(
                "{} characters exceeds maximum {}",
                sigil.len(),
                MAX_SIGIL_LEN
            )));
        }
        if let Some(c) = sigil.chars().find(|c| !is_sigil_char(*c)) {
            return Err(ProtocolError::InvalidSigil(format!(
                "character {:?} not allowed",
                c
            )));
        }
        Ok(Self(sigil))
    }

    /// The sigil text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sigil text as bytes, for hashing.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

fn is_sigil_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')
}

impl fmt::Display for SigilId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SigilId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SigilId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<SigilId> for String {
    fn from(sigil: SigilId) -> Self {
        sigil.0
    }
}

/// What a sigil resolves to in the registry: an address or key fingerprint.
///
/// The core only checks that a binding exists; it never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigilBinding(String);

impl SigilBinding {
    /// Wrap a binding value.
    pub fn new(binding: impl Into<String>) -> Self {
        Self(binding.into())
    }

    /// The binding text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SigilBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
