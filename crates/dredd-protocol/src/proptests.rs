//! Property-based tests for the envelope codec and its integrity checks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::DateTime;
use proptest::prelude::*;

use crate::{
    EchoKey, EntropyHeader, Envelope, HybridCiphertext, MessageId, MirrorTrap, SensitivityLevel,
    SessionSecret, SigilId, UnsignedEnvelope,
};

fn signed(target: &str, header: &str, ttl: u64, key: &EchoKey) -> Envelope {
    let created_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    let message_id = MessageId::generate(created_at);
    UnsignedEnvelope {
        decoy_descriptor: MirrorTrap::new(&SessionSecret::new(1, [3; 32]))
            .generate_trap(message_id.as_str()),
        message_id,
        target_identity: SigilId::new(target).unwrap(),
        entropy_header: header.to_string(),
        encrypted_payload: HybridCiphertext {
            algorithm: "xchacha20poly1305-wrap-v1".into(),
            key_epoch: 1,
            key_window: 1,
            wrapped_key: vec![0; 72],
            ciphertext: vec![0; 40],
            wrap_tag: "00".repeat(32),
        },
        created_at,
        ttl_seconds: ttl,
        sensitivity_level: SensitivityLevel::Medium,
    }
    .sign(key)
}

fn flip_char(s: &str, idx: usize, alphabet: &[u8]) -> String {
    let mut bytes = s.as_bytes().to_vec();
    let i = idx % bytes.len();
    let pos = alphabet.iter().position(|&c| c == bytes[i]).unwrap_or(0);
    bytes[i] = alphabet[(pos + 1) % alphabet.len()];
    String::from_utf8(bytes).unwrap()
}

const SIGIL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";
const B64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

proptest! {
    /// Changing any character of the target invalidates the echo signature.
    #[test]
    fn target_change_breaks_echo(target in "[a-z][a-z0-9-]{0,30}", idx in any::<usize>()) {
        let key = EchoKey::derive(&SessionSecret::new(1, [9; 32]));
        let mut env = signed(&target, "aGVhZGVy", 60, &key);
        prop_assert!(env.verify_echo(&key));

        env.target_identity = SigilId::new(flip_char(&target, idx, SIGIL_ALPHABET)).unwrap();
        prop_assert!(!env.verify_echo(&key));
    }

    /// Changing any character of the entropy header invalidates the echo signature.
    #[test]
    fn header_change_breaks_echo(raw in prop::collection::vec(any::<u8>(), 3..90), idx in any::<usize>()) {
        let key = EchoKey::derive(&SessionSecret::new(1, [9; 32]));
        let header = STANDARD.encode(&raw);
        let mut env = signed("council-01", &header, 60, &key);

        // Skip padding characters so the flipped header is still plausible base64.
        let body_len = header.trim_end_matches('=').len();
        env.entropy_header = flip_char(&header[..body_len], idx, B64_ALPHABET) + &header[body_len..];
        prop_assert!(!env.verify_echo(&key));
    }

    /// Changing the message id invalidates the echo signature.
    #[test]
    fn message_id_change_breaks_echo(ttl in 0u64..86_400) {
        let key = EchoKey::derive(&SessionSecret::new(1, [9; 32]));
        let mut env = signed("council-01", "aGVhZGVy", ttl, &key);
        let other = MessageId::generate(env.created_at);
        prop_assume!(other != env.message_id);
        env.message_id = other;
        prop_assert!(!env.verify_echo(&key));
    }

    /// The structural check never panics on arbitrary text.
    #[test]
    fn from_json_never_panics(s in ".{0,512}") {
        let _ = Envelope::from_json(&s);
    }

    /// Entropy header decoding never panics on arbitrary text.
    #[test]
    fn entropy_decode_never_panics(s in "[A-Za-z0-9+/=]{0,256}") {
        let _ = EntropyHeader::decode(&s);
    }

    /// Same secret and message id always produce the same trap.
    #[test]
    fn trap_is_deterministic(secret in any::<[u8; 32]>(), id in "[a-z0-9_]{1,40}") {
        let a = MirrorTrap::new(&SessionSecret::new(1, secret)).generate_trap(&id);
        let b = MirrorTrap::new(&SessionSecret::new(1, secret)).generate_trap(&id);
        prop_assert_eq!(a, b);
    }
}
