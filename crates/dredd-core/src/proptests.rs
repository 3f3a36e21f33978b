//! Property-based tests for the replay cache and configuration checks.

use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use dredd_protocol::{EntropyThresholds, MessageId, SessionSecret};
use proptest::prelude::*;

use crate::config::{ConfigError, CourierConfig};
use crate::replay::ReplayCache;

fn id(n: u64) -> MessageId {
    MessageId::parse(format!("dredd_1700000000_{:016x}", n)).unwrap()
}

proptest! {
    #[test]
    fn replay_accepts_each_id_once(ids in proptest::collection::vec(0u64..32, 1..128)) {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let expires = now + chrono::Duration::hours(1);
        let cache = ReplayCache::new(1024, Duration::from_secs(7 * 24 * 3600));

        let mut seen = HashSet::new();
        for n in ids {
            let first = seen.insert(n);
            prop_assert_eq!(cache.check_and_insert(&id(n), expires, now), first);
        }
        prop_assert_eq!(cache.len(), seen.len());
    }

    #[test]
    fn replay_never_exceeds_capacity(
        capacity in 1usize..16,
        count in 1u64..64,
    ) {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let expires = now + chrono::Duration::hours(1);
        let cache = ReplayCache::new(capacity, Duration::from_secs(3600));

        for n in 0..count {
            prop_assert!(cache.check_and_insert(&id(n), expires, now));
            prop_assert!(cache.len() <= capacity);
        }
    }

    #[test]
    fn unordered_thresholds_are_rejected(
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        prop_assume!(a > b);
        let config = CourierConfig::builder()
            .with_session_secret(&SessionSecret::new(1, [7; 32]))
            .with_thresholds(EntropyThresholds {
                low: a,
                medium: b,
                high: 1.0,
                critical: 1.0,
            })
            .build();
        let is_threshold_error = matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "validation.thresholds"
        );
        prop_assert!(is_threshold_error);
    }
}
