//! Shared wire encoding helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ProtocolError, Result};

/// Serde helper for byte vectors carried as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serialize `value` as JSON and base64 the result.
pub(crate) fn to_b64_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

/// Reverse of [`to_b64_json`]. Errors name `field` and are reported as
/// [`ProtocolError::Malformed`].
pub(crate) fn from_b64_json<T: DeserializeOwned>(encoded: &str, field: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| ProtocolError::Malformed(format!("{} is not base64", field)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProtocolError::Malformed(format!("{}: {}", field, e)))
}

/// Append `bytes` with a 4-byte big-endian length prefix.
pub(crate) fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}
