//! Relay frames.
//!
//! Every message between a node and a relay is one JSON object tagged by
//! `type`. Over TCP each frame is a single line.
//!
//! | `type`            | direction        | body                              |
//! |-------------------|------------------|-----------------------------------|
//! | `dredd_message`   | both             | `envelope`                        |
//! | `subscribe`       | node to relay    | `target_sigil`                    |
//! | `ack`             | relay to node    | `status`, optional `reason`       |
//! | `mirror_response` | node to relay    | `decoy`                           |
//!
//! The envelope travels as an untyped JSON value so a receiver's own
//! structural check, not the framing layer, decides whether it is valid.

use dredd_protocol::limits::MAX_ENVELOPE_BYTES;
use dredd_protocol::DecoyResponse;
use serde::{Deserialize, Serialize};

use crate::{NetError, Result};

/// Largest frame accepted: a maximal envelope plus framing overhead.
pub const MAX_FRAME_BYTES: usize = MAX_ENVELOPE_BYTES + 4 * 1024;

/// Relay verdict on a delivered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Relay stored or forwarded the envelope.
    Accepted,
    /// Relay declined it.
    Refused,
}

/// One relay protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Envelope in transit.
    DreddMessage {
        /// Envelope JSON.
        envelope: serde_json::Value,
    },
    /// Ask the relay to stream envelopes addressed to a sigil.
    Subscribe {
        /// Sigil to receive for.
        target_sigil: String,
    },
    /// Relay acknowledgement of a `dredd_message`.
    Ack {
        /// Verdict.
        status: AckStatus,
        /// Reason given for a refusal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Decoy produced by a tripped mirror trap.
    MirrorResponse {
        /// The decoy.
        decoy: DecoyResponse,
    },
}

impl RelayFrame {
    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line, with or without its trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::FrameTooLarge`] or [`NetError::Frame`].
    pub fn from_line(line: &str) -> Result<Self> {
        if line.len() > MAX_FRAME_BYTES {
            return Err(NetError::FrameTooLarge {
                max: MAX_FRAME_BYTES,
            });
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// The `target_identity` of a `dredd_message`, if it has one.
    pub fn target_identity(&self) -> Option<&str> {
        match self {
            Self::DreddMessage { envelope } => envelope.get("target_identity")?.as_str(),
            _ => None,
        }
    }
}
