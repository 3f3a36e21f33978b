//! Local audit trail of inbound envelope handling.
//!
//! Every envelope the validator sees produces a `parse_attempt` event
//! followed by exactly one of `parse_failed` or `parse_success`, plus a
//! `trap_engaged` event when a decoy was sent. Events hold ids and stage
//! names only, never plaintext.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dredd_protocol::TrapTrigger;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RejectionStage, Result};

/// Default number of events kept.
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Validation started.
    ParseAttempt,
    /// Validation rejected the envelope.
    ParseFailed {
        /// Rejecting stage.
        stage: RejectionStage,
    },
    /// Envelope accepted.
    ParseSuccess,
    /// A decoy was produced.
    TrapEngaged {
        /// Failure pattern that engaged it.
        trigger: TrapTrigger,
    },
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
    /// Message id the envelope claimed, when it had a readable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Event details.
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

/// Bounded, thread-safe event log. Oldest events drop first.
#[derive(Debug)]
pub struct AuditTrail {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditTrail {
    /// Trail keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event.
    pub fn record(&self, timestamp: DateTime<Utc>, message_id: Option<&str>, kind: AuditEventKind) {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(AuditEvent {
            timestamp,
            message_id: message_id.map(str::to_string),
            kind,
        });
    }

    /// Copy of the current events, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no events are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current events to `path` as a pretty-printed JSON array.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let events = self.snapshot();
        let json = serde_json::to_string_pretty(&events)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), events = events.len(), "Audit trail saved");
        Ok(())
    }
}
