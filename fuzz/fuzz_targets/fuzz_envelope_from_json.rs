//! Fuzz target for envelope parsing.
//!
//! Arbitrary text must parse or fail cleanly, and anything that parses must
//! keep its identity and signature through a serialize/parse cycle.

#![no_main]

use dredd_protocol::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(envelope) = Envelope::from_json(text) {
        let json = envelope.to_json().expect("parsed envelope should serialize");
        // Normalized timestamps can push an input sitting at the size limit over it.
        if let Ok(again) = Envelope::from_json(&json) {
            assert_eq!(again.message_id, envelope.message_id);
            assert_eq!(again.echo_signature, envelope.echo_signature);
            assert_eq!(again.created_at, envelope.created_at);
        }
    }
});
