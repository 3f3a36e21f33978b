//! Replay detection.
//!
//! Remembers the message ids of envelopes that passed the echo check until
//! they expire. An envelope whose id is still remembered is a replay.
//!
//! # Security
//!
//! Expired ids can be forgotten safely: a replayed copy of an expired
//! envelope fails an earlier gate before it ever reaches this cache. When
//! the cache is full the entry closest to expiry is evicted rather than
//! clearing the whole set, which would open a replay window for everything.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dredd_protocol::MessageId;
use tracing::warn;

#[derive(Default)]
struct SeenIds {
    /// Id to the instant it may be forgotten.
    expiry: HashMap<MessageId, DateTime<Utc>>,
    /// The same entries ordered by that instant, soonest first.
    by_expiry: BTreeSet<(DateTime<Utc>, MessageId)>,
}

impl SeenIds {
    fn insert(&mut self, id: &MessageId, until: DateTime<Utc>) {
        if let Some(previous) = self.expiry.insert(id.clone(), until) {
            self.by_expiry.remove(&(previous, id.clone()));
        }
        self.by_expiry.insert((until, id.clone()));
    }

    /// Drop entries that expired before `now`. Stops at the first live one.
    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some((until, _)) = self.by_expiry.first() {
            if *until >= now {
                break;
            }
            if let Some((_, id)) = self.by_expiry.pop_first() {
                self.expiry.remove(&id);
            }
        }
    }

    fn evict_soonest(&mut self) -> bool {
        let Some((_, id)) = self.by_expiry.pop_first() else {
            return false;
        };
        self.expiry.remove(&id);
        warn!(message_id = %id, "Replay cache full, evicting unexpired entry");
        true
    }
}

/// Bounded set of recently accepted message ids.
///
/// [`ReplayCache::check_and_insert`] is atomic: of several concurrent calls
/// with the same id exactly one succeeds. Pruning costs O(log n) per
/// expired entry.
pub struct ReplayCache {
    state: Mutex<SeenIds>,
    capacity: usize,
    retention: chrono::Duration,
}

impl ReplayCache {
    /// Cache holding at most `capacity` ids, each for at most `retention`.
    pub fn new(capacity: usize, retention: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(SeenIds {
                expiry: HashMap::with_capacity(capacity.min(1024)),
                by_expiry: BTreeSet::new(),
            }),
            capacity,
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SeenIds> {
        // The critical sections never leave the maps half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `id` unless it is already remembered.
    ///
    /// Returns `true` the first time an id is seen and `false` for a
    /// replay. The id is remembered until `until`, capped at the retention
    /// period.
    pub fn check_and_insert(&self, id: &MessageId, until: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let mut seen = self.lock();

        seen.prune(now);
        if seen.expiry.contains_key(id) {
            return false;
        }
        while seen.expiry.len() >= self.capacity && seen.evict_soonest() {}

        seen.insert(id, until.min(now + self.retention));
        true
    }

    /// True if `id` is currently remembered.
    pub fn contains(&self, id: &MessageId, now: DateTime<Utc>) -> bool {
        self.lock().expiry.get(id).is_some_and(|until| *until >= now)
    }

    /// Number of remembered ids, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().expiry.len()
    }

    /// True if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ReplayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCache")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
