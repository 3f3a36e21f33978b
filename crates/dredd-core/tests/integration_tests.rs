//! Integration tests for dredd-core.
//!
//! These run senders and receivers against the in-memory relay network and
//! check delivery, admission and mirror-trap behaviour end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dredd_core::{
    AuditEvent, AuditEventKind, ConfigBuilder, CoreError, Courier, CourierConfig, DispatchFailure,
    ManualClock, NodeOutcome, PostDecryptCheck, RejectionStage, SendOptions, ValidationResult,
};
use dredd_crypto::KdfParams;
use dredd_net::MemoryRelayNetwork;
use dredd_protocol::{
    EntropyEstimator, Envelope, InnerPayload, MirrorTrap, RelayAddress, SensitivityLevel,
    SessionSecret, SigilBinding, SigilId, TrapTrigger, DEFAULT_CONTENT_TYPE,
};

// ============================================================================
// Helpers
// ============================================================================

const HOUR: Duration = Duration::from_secs(3600);
const BRIEF: Duration = Duration::from_millis(400);

fn sigil(s: &str) -> SigilId {
    SigilId::new(s).unwrap()
}

fn relay(s: &str) -> RelayAddress {
    RelayAddress::new(s).unwrap()
}

fn secret() -> SessionSecret {
    SessionSecret::new(1, [0x5a; 32])
}

fn relays() -> Vec<RelayAddress> {
    vec![relay("relay-a:7700"), relay("relay-b:7700"), relay("relay-c:7700")]
}

fn base_config(quorum: usize) -> ConfigBuilder {
    config_with_secret(quorum, &secret())
}

fn config_with_secret(quorum: usize, secret: &SessionSecret) -> ConfigBuilder {
    let mut builder = CourierConfig::builder()
        .with_local_sigil(sigil("council-01"))
        .with_sigil(sigil("council-01"), SigilBinding::new("council-01-binding"))
        .with_sigil(sigil("council-02"), SigilBinding::new("council-02-binding"))
        .with_quorum_size(quorum)
        .with_node_timeout(Duration::from_millis(500))
        .with_session_secret(secret)
        .with_kdf(KdfParams::testing());
    for node in relays() {
        builder = builder.with_relay(node);
    }
    builder
}

fn courier(config: CourierConfig, net: &MemoryRelayNetwork) -> Courier {
    Courier::builder(config, Arc::new(net.clone()))
        .build()
        .expect("courier should build")
}

fn network() -> MemoryRelayNetwork {
    MemoryRelayNetwork::new(relays())
}

/// Receiver subscribed to every relay, so one injected copy is seen once.
fn receiver(net: &MemoryRelayNetwork) -> Courier {
    courier(base_config(3).build(), net)
}

/// Serialized envelope from `sender` to `target`, not yet delivered.
fn envelope_json(
    sender: &Courier,
    target: &str,
    body: &[u8],
    ttl: u64,
    level: SensitivityLevel,
) -> (Envelope, String) {
    let envelope = sender
        .dispatcher()
        .build_envelope(body, &sigil(target), ttl, level, DEFAULT_CONTENT_TYPE)
        .expect("envelope should build");
    let json = envelope.to_json().unwrap();
    (envelope, json)
}

/// Place one copy of `json` on relay-a for council-01.
fn drop_off(net: &MemoryRelayNetwork, json: impl Into<String>) {
    net.inject(&relay("relay-a:7700"), "council-01", json).unwrap();
}

fn accepted_bodies(results: &[ValidationResult]) -> Vec<Vec<u8>> {
    results
        .iter()
        .filter_map(|r| r.accepted())
        .map(|m| m.plaintext.clone())
        .collect()
}

fn stages(results: &[ValidationResult]) -> Vec<RejectionStage> {
    results.iter().filter_map(|r| r.stage()).collect()
}

struct FixedEstimator(f64);

impl EntropyEstimator for FixedEstimator {
    fn estimate(&self, _seed: &[u8], _challenge: &[u8]) -> f64 {
        self.0
    }
}

// ============================================================================
// Delivery and round trip
// ============================================================================

mod delivery {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = courier(base_config(2).build(), &net);
        let target = sigil("council-01");

        let receipt = sender
            .dispatch(b"hello council", &target, HOUR, SensitivityLevel::Medium)
            .await;
        assert!(receipt.is_delivered(), "receipt: {:?}", receipt);
        assert_eq!(receipt.target, target);
        assert_eq!(receipt.nodes.len(), 2);

        // Both quorum nodes end up holding a copy; the second one read is a
        // replay.
        let results = receiver.listen(&target, BRIEF).await.unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"hello council".to_vec()]);
        assert!(stages(&results)
            .iter()
            .all(|s| *s == RejectionStage::ReplayDetected));

        let message = results[0].accepted().unwrap();
        assert_eq!(Some(&message.provenance.message_id), receipt.message_id.as_ref());
        assert_eq!(message.provenance.target, target);
        assert_eq!(message.provenance.sensitivity, SensitivityLevel::Medium);
        assert_eq!(message.provenance.content_type, DEFAULT_CONTENT_TYPE);
        assert!(message.provenance.relay.is_some());
    }

    #[tokio::test]
    async fn test_ping_council_scenario() {
        let net = network();
        let sender = courier(base_config(3).build(), &net);
        let receiver = courier(base_config(3).build(), &net);
        let target = sigil("council-01");

        net.set_online(&relay("relay-b:7700"), false).unwrap();
        net.set_online(&relay("relay-c:7700"), false).unwrap();

        let receipt = sender
            .dispatch(b"ping", &target, HOUR, SensitivityLevel::High)
            .await;
        assert!(receipt.is_delivered(), "receipt: {:?}", receipt);
        assert_eq!(receipt.accepted_nodes(), vec![&relay("relay-a:7700")]);
        assert_eq!(receipt.attempted_nodes().len(), 3);

        // Close the only live channel once the listener is subscribed so the
        // listen returns without waiting out its 30 seconds.
        let closer = net.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            closer.set_online(&relay("relay-a:7700"), false).unwrap();
        });

        let results = receiver
            .listen(&target, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"ping".to_vec()]);
        let provenance = &results[0].accepted().unwrap().provenance;
        assert_eq!(provenance.sensitivity, SensitivityLevel::High);
        assert_eq!(provenance.relay, Some(relay("relay-a:7700")));
    }

    #[tokio::test]
    async fn test_quorum_survives_all_but_one() {
        let net = network();
        let sender = courier(base_config(3).build(), &net);
        net.set_online(&relay("relay-a:7700"), false).unwrap();
        net.fail_next(&relay("relay-b:7700"), 10).unwrap();

        let receipt = sender
            .dispatch(b"x", &sigil("council-01"), HOUR, SensitivityLevel::Low)
            .await;
        assert!(receipt.is_delivered());
        assert_eq!(receipt.accepted_nodes(), vec![&relay("relay-c:7700")]);
    }

    #[tokio::test]
    async fn test_all_nodes_down_is_delivery_timeout() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        for node in relays() {
            net.set_online(&node, false).unwrap();
        }

        let receipt = sender
            .dispatch(b"x", &sigil("council-01"), HOUR, SensitivityLevel::Low)
            .await;
        assert!(!receipt.is_delivered());
        assert_eq!(receipt.failure, Some(DispatchFailure::DeliveryTimeout));
        assert!(receipt.message_id.is_some());
        for node in &receipt.nodes {
            // One retry after the first transport failure.
            assert_eq!(node.attempts, 2);
            assert!(matches!(node.outcome, NodeOutcome::Failed(_)));
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let net = network();
        let sender = courier(base_config(3).build(), &net);
        for node in relays() {
            net.fail_next(&node, 1).unwrap();
        }

        let receipt = sender
            .dispatch(b"x", &sigil("council-01"), HOUR, SensitivityLevel::Low)
            .await;
        assert!(receipt.is_delivered());
        let accepted = receipt
            .nodes
            .iter()
            .find(|n| n.outcome.is_accepted())
            .unwrap();
        assert_eq!(accepted.attempts, 2);
    }

    #[tokio::test]
    async fn test_refusal_is_not_retried() {
        let net = network();
        let sender = courier(base_config(3).build(), &net);
        for node in relays() {
            net.set_refusing(&node, true).unwrap();
        }

        let receipt = sender
            .dispatch(b"x", &sigil("council-01"), HOUR, SensitivityLevel::Low)
            .await;
        assert_eq!(receipt.failure, Some(DispatchFailure::DeliveryTimeout));
        for node in relays() {
            assert_eq!(net.attempts(&node), 1);
        }
        assert!(receipt
            .nodes
            .iter()
            .all(|n| matches!(n.outcome, NodeOutcome::Refused(_))));
    }

    #[tokio::test]
    async fn test_deadline_bounds_send() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        for node in relays() {
            net.set_delay(&node, Some(Duration::from_secs(5))).unwrap();
        }

        let started = Instant::now();
        let receipt = sender
            .dispatch_with(
                b"x",
                &sigil("council-01"),
                HOUR,
                SensitivityLevel::Low,
                SendOptions::default().with_deadline(Duration::from_millis(100)),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(receipt.failure, Some(DispatchFailure::DeliveryTimeout));
        assert!(receipt.nodes.iter().all(|n| !n.outcome.is_accepted()));
    }

    #[tokio::test]
    async fn test_unknown_identity_contacts_nobody() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);

        let receipt = sender
            .dispatch(b"x", &sigil("stranger-9"), HOUR, SensitivityLevel::Low)
            .await;
        assert_eq!(
            receipt.failure,
            Some(DispatchFailure::UnknownIdentity("stranger-9".into()))
        );
        assert!(receipt.message_id.is_none());
        assert!(receipt.nodes.is_empty());
        for node in relays() {
            assert_eq!(net.attempts(&node), 0);
        }
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let target = sigil("council-01");

        let too_long = Duration::from_secs(8 * 24 * 3600);
        let receipt = sender
            .dispatch(b"x", &target, too_long, SensitivityLevel::Low)
            .await;
        assert!(matches!(
            receipt.failure,
            Some(DispatchFailure::InvalidRequest(_))
        ));

        let huge = vec![0u8; 64 * 1024 + 1];
        let receipt = sender
            .dispatch(&huge, &target, HOUR, SensitivityLevel::Low)
            .await;
        assert!(matches!(
            receipt.failure,
            Some(DispatchFailure::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_smaller_than_quorum() {
        let net = network();
        let mut config = base_config(2).build();
        config.relay.nodes.truncate(1);
        let sender = courier(config, &net);

        let receipt = sender
            .dispatch(b"x", &sigil("council-01"), HOUR, SensitivityLevel::Low)
            .await;
        assert_eq!(
            receipt.failure,
            Some(DispatchFailure::InsufficientRelays {
                available: 1,
                required: 2
            })
        );
    }
}


// ============================================================================
// Admission pipeline
// ============================================================================

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_replay_is_rejected() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = receiver(&net);
        let (_, json) = envelope_json(&sender, "council-01", b"once", 3600, SensitivityLevel::Low);

        drop_off(&net, json.clone());
        net.inject(&relay("relay-b:7700"), "council-01", json).unwrap();

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"once".to_vec()]);
        assert_eq!(stages(&results), vec![RejectionStage::ReplayDetected]);
        assert!(net.decoys().is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let net = network();
        let clock = Arc::new(ManualClock::starting_now());
        let sender = Courier::builder(base_config(2).build(), Arc::new(net.clone()))
            .clock(clock.clone())
            .build()
            .unwrap();
        let receiver = Courier::builder(base_config(3).build(), Arc::new(net.clone()))
            .clock(clock.clone())
            .build()
            .unwrap();

        let (_, json) = envelope_json(&sender, "council-01", b"gone", 0, SensitivityLevel::Low);
        drop_off(&net, json);

        clock.advance(chrono::Duration::seconds(1));
        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::Expired]);
        assert!(net.decoys().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_is_structural_rejection() {
        let net = network();
        let receiver = receiver(&net);
        drop_off(&net, "not json at all");
        drop_off(&net, r#"{"message_id":"dredd_1_00"}"#);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(
            stages(&results),
            vec![RejectionStage::StructuralCheck, RejectionStage::StructuralCheck]
        );
        assert!(net.decoys().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_but_registered_target_is_silent() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = receiver(&net);
        let (_, json) =
            envelope_json(&sender, "council-02", b"not yours", 3600, SensitivityLevel::Low);

        drop_off(&net, json);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::WrongTarget]);
        assert!(net.decoys().is_empty());
    }

    #[tokio::test]
    async fn test_entropy_gating() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = Courier::builder(base_config(3).build(), Arc::new(net.clone()))
            .estimator(Arc::new(FixedEstimator(0.6)))
            .build()
            .unwrap();

        // Medium needs 0.5 and high needs 0.7. A measured 0.6 is short of
        // high but within the trap margin.
        for level in [SensitivityLevel::Medium, SensitivityLevel::High] {
            let (_, json) = envelope_json(&sender, "council-01", b"gated", 3600, level);
            drop_off(&net, json);
        }

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"gated".to_vec()]);
        assert_eq!(
            results[0].accepted().unwrap().provenance.sensitivity,
            SensitivityLevel::Medium
        );
        assert_eq!(stages(&results), vec![RejectionStage::InsufficientEntropy]);
        assert!(net.decoys().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_secret_fails_echo() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let stranger = SessionSecret::new(1, [0x11; 32]);
        let receiver = courier(config_with_secret(3, &stranger).build(), &net);
        let (_, json) = envelope_json(&sender, "council-01", b"x", 3600, SensitivityLevel::Low);

        drop_off(&net, json);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::SignatureMismatch]);
    }

    #[tokio::test]
    async fn test_unknown_epoch_fails_echo() {
        let net = network();
        let sender = courier(
            config_with_secret(2, &SessionSecret::new(2, [0x5a; 32])).build(),
            &net,
        );
        let receiver = receiver(&net);
        let (_, json) = envelope_json(&sender, "council-01", b"x", 3600, SensitivityLevel::Low);

        drop_off(&net, json);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::SignatureMismatch]);
    }

    #[tokio::test]
    async fn test_rotated_receiver_reads_old_epoch() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = courier(
            base_config(3)
                .with_session_secret(&SessionSecret::new(2, [0x77; 32]))
                .build(),
            &net,
        );
        let (_, json) = envelope_json(&sender, "council-01", b"epoch one", 3600, SensitivityLevel::Low);

        drop_off(&net, json);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"epoch one".to_vec()]);
    }

    #[tokio::test]
    async fn test_policy_violation() {
        struct NoShouting;

        impl PostDecryptCheck for NoShouting {
            fn name(&self) -> &'static str {
                "no_shouting"
            }

            fn check(&self, _: &Envelope, payload: &InnerPayload) -> Result<(), String> {
                if payload.body.iter().any(u8::is_ascii_lowercase) {
                    Ok(())
                } else {
                    Err("all caps".into())
                }
            }
        }

        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = Courier::builder(
            base_config(3).allow_content_type("text/plain").build(),
            Arc::new(net.clone()),
        )
        .check(Arc::new(NoShouting))
        .build()
        .unwrap();

        for (body, content_type) in [
            (&b"quiet"[..], "text/plain"),
            (&b"LOUD"[..], "text/plain"),
            (&b"binary"[..], DEFAULT_CONTENT_TYPE),
        ] {
            let envelope = sender
                .dispatcher()
                .build_envelope(
                    body,
                    &sigil("council-01"),
                    3600,
                    SensitivityLevel::Low,
                    content_type,
                )
                .unwrap();
            drop_off(&net, envelope.to_json().unwrap());
        }

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(accepted_bodies(&results), vec![b"quiet".to_vec()]);
        let reasons: Vec<_> = results
            .iter()
            .filter_map(|r| match r {
                ValidationResult::Rejected {
                    stage: RejectionStage::PolicyViolation,
                    reason,
                } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons.iter().any(|r| r.starts_with("no_shouting")));
        assert!(reasons.iter().any(|r| r.starts_with("content_type")));
        assert!(reasons.iter().all(|r| !r.contains("LOUD")));
        assert!(net.decoys().is_empty());
    }
}

// ============================================================================
// Mirror trap
// ============================================================================

mod trap {
    use super::*;

    fn tamper(json: &str, field: &str, value: serde_json::Value) -> String {
        let mut doc: serde_json::Value = serde_json::from_str(json).unwrap();
        doc[field] = value;
        doc.to_string()
    }

    #[tokio::test]
    async fn test_tampered_field_engages_trap() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = receiver(&net);
        let (envelope, json) =
            envelope_json(&sender, "council-01", b"secret", 3600, SensitivityLevel::Medium);

        drop_off(&net, tamper(&json, "ttl_seconds", serde_json::json!(7200)));
        drop_off(&net, tamper(&json, "sensitivity_level", serde_json::json!("low")));

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(
            stages(&results),
            vec![
                RejectionStage::SignatureMismatch,
                RejectionStage::SignatureMismatch
            ]
        );

        let id = envelope.message_id.as_str();
        let expected = MirrorTrap::new(&secret())
            .generate_trap(id)
            .respond(id, TrapTrigger::SignatureMismatch);
        let decoys = net.decoys();
        assert_eq!(decoys.len(), 2);
        assert!(decoys.iter().all(|d| *d == expected));
        assert_eq!(decoys[0].status, "delivered");
        assert_ne!(decoys[0].plaintext, "secret");
    }

    #[tokio::test]
    async fn test_unregistered_target_engages_trap() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = receiver(&net);
        let (envelope, json) =
            envelope_json(&sender, "council-01", b"x", 3600, SensitivityLevel::Low);

        drop_off(&net, tamper(&json, "target_identity", serde_json::json!("ghost-99")));

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::WrongTarget]);
        let decoys = net.decoys();
        assert_eq!(decoys.len(), 1);
        assert_eq!(decoys[0].trigger, TrapTrigger::UnregisteredSigil);
        assert_eq!(decoys[0].message_id, envelope.message_id.as_str());
    }

    #[tokio::test]
    async fn test_far_low_entropy_engages_trap() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = Courier::builder(base_config(3).build(), Arc::new(net.clone()))
            .estimator(Arc::new(FixedEstimator(0.1)))
            .build()
            .unwrap();
        let (_, json) = envelope_json(&sender, "council-01", b"x", 3600, SensitivityLevel::High);

        drop_off(&net, json);

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::InsufficientEntropy]);
        let decoys = net.decoys();
        assert_eq!(decoys.len(), 1);
        assert_eq!(decoys[0].trigger, TrapTrigger::InsufficientEntropy);
    }

    #[tokio::test]
    async fn test_disabled_trap_stays_silent() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = courier(base_config(3).disable_trap().build(), &net);
        let (_, json) = envelope_json(&sender, "council-01", b"x", 3600, SensitivityLevel::Low);

        drop_off(&net, tamper(&json, "ttl_seconds", serde_json::json!(7200)));

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(stages(&results), vec![RejectionStage::SignatureMismatch]);
        assert!(net.decoys().is_empty());
    }

    #[test]
    fn test_trap_is_deterministic_per_message() {
        let trap = MirrorTrap::new(&secret());
        let a = trap.generate_trap("dredd_1700000000_0011223344556677");
        let b = trap.generate_trap("dredd_1700000000_0011223344556677");
        let c = trap.generate_trap("dredd_1700000000_8899aabbccddeeff");
        assert_eq!(a, b);
        assert_ne!(a.noise_pattern, c.noise_pattern);
        assert_ne!(
            a,
            MirrorTrap::new(&SessionSecret::new(1, [0x01; 32]))
                .generate_trap("dredd_1700000000_0011223344556677")
        );
    }
}

// ============================================================================
// Listening and audit
// ============================================================================

mod listening {
    use super::*;
    use dredd_core::CancelToken;

    #[tokio::test]
    async fn test_cancel_stops_listen() {
        let net = network();
        let receiver = receiver(&net);
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let results = receiver
            .listen_until(&sigil("council-01"), Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_crashed_validation_ends_listen_with_earlier_results() {
        struct Brittle;

        impl PostDecryptCheck for Brittle {
            fn name(&self) -> &'static str {
                "brittle"
            }

            fn check(&self, _: &Envelope, payload: &InnerPayload) -> Result<(), String> {
                assert!(payload.body != b"crash", "check blew up");
                Ok(())
            }
        }

        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = Courier::builder(base_config(3).build(), Arc::new(net.clone()))
            .check(Arc::new(Brittle))
            .build()
            .unwrap();

        for body in [&b"first"[..], &b"crash"[..], &b"never read"[..]] {
            let (_, json) = envelope_json(&sender, "council-01", body, 3600, SensitivityLevel::Low);
            drop_off(&net, json);
        }

        let started = Instant::now();
        let results = receiver
            .listen(&sigil("council-01"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(accepted_bodies(&results), vec![b"first".to_vec()]);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_no_reachable_relay_is_an_error() {
        let net = network();
        let receiver = receiver(&net);
        for node in relays() {
            net.set_online(&node, false).unwrap();
        }

        let err = receiver
            .listen(&sigil("council-01"), BRIEF)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoRelayChannels(_)));
    }

    #[tokio::test]
    async fn test_audit_trail_records_outcomes() {
        let net = network();
        let sender = courier(base_config(2).build(), &net);
        let receiver = receiver(&net);
        let (envelope, json) =
            envelope_json(&sender, "council-01", b"ok", 3600, SensitivityLevel::Low);

        drop_off(&net, json);
        drop_off(&net, "garbage");

        let results = receiver.listen(&sigil("council-01"), BRIEF).await.unwrap();
        assert_eq!(results.len(), 2);

        let events = receiver.audit().snapshot();
        let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                AuditEventKind::ParseAttempt,
                AuditEventKind::ParseSuccess,
                AuditEventKind::ParseAttempt,
                AuditEventKind::ParseFailed {
                    stage: RejectionStage::StructuralCheck
                },
            ]
        );
        assert_eq!(events[1].message_id.as_deref(), Some(envelope.message_id.as_str()));
        assert_eq!(events[3].message_id, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        receiver.audit().save_json(&path).unwrap();
        let saved: Vec<AuditEvent> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, events);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_at_build() {
        let net = network();
        let err = Courier::builder(base_config(1).build(), Arc::new(net))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
