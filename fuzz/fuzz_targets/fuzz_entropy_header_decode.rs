//! Fuzz target for entropy header decoding.

#![no_main]

use dredd_protocol::{EntropyHeader, ShannonEstimator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(header) = EntropyHeader::decode(text) {
        // Decoded scores are always usable.
        assert!((0.0..=1.0).contains(&header.entropy_score));
        let measured = header.measure(&ShannonEstimator);
        assert!((0.0..=1.0).contains(&measured));

        if let Ok(again) = EntropyHeader::decode(&header.encode()) {
            assert_eq!(again.random_seed, header.random_seed);
            assert_eq!(again.resonance_challenge, header.resonance_challenge);
        }
    }
});
