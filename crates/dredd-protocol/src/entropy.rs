//! Entropy headers: freshness and randomness attestation for admission control.
//!
//! A header carries a creation timestamp, a random seed, a resonance
//! challenge and the score an [`EntropyEstimator`] gave that randomness. On
//! the wire it is base64 of a small JSON object:
//!
//! ```json
//! {"timestamp":1700000000,"random_seed":"<64 hex>","entropy_score":0.97,"resonance_challenge":"<32 hex>"}
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::limits::{
    ENTROPY_SEED_LEN, MAX_ENTROPY_ATTEMPTS, MAX_ENTROPY_HEADER_LEN, RESONANCE_CHALLENGE_LEN,
};
use crate::{ProtocolError, Result};

/// Scores the randomness of a header's seed and challenge in `[0, 1]`.
pub trait EntropyEstimator: Send + Sync {
    /// Score `seed || challenge`. Must return a finite value in `[0, 1]`.
    fn estimate(&self, seed: &[u8], challenge: &[u8]) -> f64;
}

/// Normalized Shannon entropy of the byte histogram of `seed || challenge`.
///
/// The raw entropy in bits per byte is divided by the largest value the
/// sample size allows (`log2(min(n, 256))`), so uniformly random input
/// scores close to 1 and a constant seed scores 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShannonEstimator;

impl EntropyEstimator for ShannonEstimator {
    fn estimate(&self, seed: &[u8], challenge: &[u8]) -> f64 {
        let mut counts = [0u32; 256];
        for &b in seed.iter().chain(challenge) {
            counts[b as usize] += 1;
        }
        let n = (seed.len() + challenge.len()) as f64;
        if n < 2.0 {
            return 0.0;
        }

        let bits: f64 = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = f64::from(c) / n;
                -p * p.log2()
            })
            .sum();

        (bits / n.min(256.0).log2()).clamp(0.0, 1.0)
    }
}

/// Decoded entropy header.
#[derive(Debug, Clone, PartialEq)]
pub struct EntropyHeader {
    /// Creation time, unix seconds.
    pub timestamp: i64,
    /// Random seed.
    pub random_seed: [u8; ENTROPY_SEED_LEN],
    /// Score the sender's estimator assigned.
    pub entropy_score: f64,
    /// Random challenge.
    pub resonance_challenge: [u8; RESONANCE_CHALLENGE_LEN],
}

#[derive(Serialize, Deserialize)]
struct HeaderJson {
    timestamp: i64,
    random_seed: String,
    entropy_score: f64,
    resonance_challenge: String,
}

impl EntropyHeader {
    /// Draw a fresh header with `OsRng` and score it.
    pub fn generate(now_unix: i64, estimator: &dyn EntropyEstimator) -> Self {
        Self::generate_with(&mut OsRng, now_unix, estimator)
    }

    /// Draw a header from the given RNG and score it.
    pub fn generate_with<R: RngCore + CryptoRng>(
        rng: &mut R,
        now_unix: i64,
        estimator: &dyn EntropyEstimator,
    ) -> Self {
        let mut random_seed = [0u8; ENTROPY_SEED_LEN];
        let mut resonance_challenge = [0u8; RESONANCE_CHALLENGE_LEN];
        rng.fill_bytes(&mut random_seed);
        rng.fill_bytes(&mut resonance_challenge);
        let entropy_score = estimator.estimate(&random_seed, &resonance_challenge);
        Self {
            timestamp: now_unix,
            random_seed,
            entropy_score,
            resonance_challenge,
        }
    }

    /// Draw headers until one scores at least `threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EntropyUnreachable`] after
    /// [`MAX_ENTROPY_ATTEMPTS`] insufficient draws.
    pub fn generate_meeting(
        now_unix: i64,
        estimator: &dyn EntropyEstimator,
        threshold: f64,
    ) -> Result<Self> {
        for _ in 0..MAX_ENTROPY_ATTEMPTS {
            let header = Self::generate(now_unix, estimator);
            if header.entropy_score >= threshold {
                return Ok(header);
            }
        }
        Err(ProtocolError::EntropyUnreachable {
            threshold,
            attempts: MAX_ENTROPY_ATTEMPTS,
        })
    }

    /// Score the header's randomness with `estimator`, independent of the
    /// declared score.
    pub fn measure(&self, estimator: &dyn EntropyEstimator) -> f64 {
        estimator.estimate(&self.random_seed, &self.resonance_challenge)
    }

    /// True when the header timestamp is within `max_skew_secs` of `now_unix`.
    pub fn is_fresh(&self, now_unix: i64, max_skew_secs: u64) -> bool {
        now_unix.abs_diff(self.timestamp) <= max_skew_secs
    }

    /// Base64 wire form.
    pub fn encode(&self) -> String {
        let json = HeaderJson {
            timestamp: self.timestamp,
            random_seed: hex::encode(self.random_seed),
            entropy_score: self.entropy_score,
            resonance_challenge: hex::encode(self.resonance_challenge),
        };
        // HeaderJson has no maps or non-string keys; serialization cannot fail.
        let bytes = serde_json::to_vec(&json).unwrap_or_default();
        STANDARD.encode(bytes)
    }

    /// Parse the base64 wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidEntropyHeader`] for oversized input,
    /// bad base64 or JSON, wrong seed or challenge length, or a score outside
    /// `[0, 1]`.
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.len() > MAX_ENTROPY_HEADER_LEN {
            return Err(ProtocolError::InvalidEntropyHeader("too long".into()));
        }
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ProtocolError::InvalidEntropyHeader(format!("base64: {}", e)))?;
        let json: HeaderJson = serde_json::from_slice(&bytes)
            .map_err(|e| ProtocolError::InvalidEntropyHeader(format!("json: {}", e)))?;

        if !(0.0..=1.0).contains(&json.entropy_score) {
            return Err(ProtocolError::InvalidEntropyHeader(
                "entropy_score outside [0, 1]".into(),
            ));
        }

        Ok(Self {
            timestamp: json.timestamp,
            random_seed: decode_fixed(&json.random_seed, "random_seed")?,
            entropy_score: json.entropy_score,
            resonance_challenge: decode_fixed(&json.resonance_challenge, "resonance_challenge")?,
        })
    }
}

fn decode_fixed<const N: usize>(hex_str: &str, field: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(hex_str, &mut out).map_err(|_| {
        ProtocolError::InvalidEntropyHeader(format!("{} must be {} hex bytes", field, N))
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_encode_decode() {
        let header = EntropyHeader::generate(1_700_000_000, &ShannonEstimator);
        let decoded = EntropyHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_random_input_scores_high() {
        let mut rng = ChaCha20Rng::from_seed([9u8; 32]);
        let header = EntropyHeader::generate_with(&mut rng, 0, &ShannonEstimator);
        assert!(header.entropy_score > 0.9, "score {}", header.entropy_score);
    }

    #[test]
    fn test_constant_input_scores_zero() {
        let score = ShannonEstimator.estimate(&[0u8; 32], &[0u8; 16]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_two_symbols_score_low() {
        let seed: Vec<u8> = (0..32).map(|i| (i % 2) as u8).collect();
        let score = ShannonEstimator.estimate(&seed, &[0u8; 16]);
        assert!(score > 0.0 && score < 0.3, "score {}", score);
    }

    #[test]
    fn test_generate_meeting_threshold() {
        let header = EntropyHeader::generate_meeting(0, &ShannonEstimator, 0.9).unwrap();
        assert!(header.entropy_score >= 0.9);
    }

    struct FixedEstimator(f64);

    impl EntropyEstimator for FixedEstimator {
        fn estimate(&self, _: &[u8], _: &[u8]) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_generate_meeting_gives_up() {
        let result = EntropyHeader::generate_meeting(0, &FixedEstimator(0.2), 0.5);
        assert!(matches!(
            result,
            Err(ProtocolError::EntropyUnreachable { attempts: MAX_ENTROPY_ATTEMPTS, .. })
        ));
    }

    #[test]
    fn test_freshness_window() {
        let header = EntropyHeader::generate(10_000, &ShannonEstimator);
        assert!(header.is_fresh(10_000 + 3600, 3600));
        assert!(header.is_fresh(10_000 - 3600, 3600));
        assert!(!header.is_fresh(10_000 + 3601, 3600));
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(EntropyHeader::decode("not base64!").is_err());
        assert!(EntropyHeader::decode(&STANDARD.encode(b"{}")).is_err());

        let short_challenge = r#"{"timestamp":1,"random_seed":"00000000000000000000000000000000000000000000000000000000000000aa","entropy_score":0.5,"resonance_challenge":"abcd"}"#;
        assert!(EntropyHeader::decode(&STANDARD.encode(short_challenge)).is_err());

        let header = EntropyHeader {
            entropy_score: 1.5,
            ..EntropyHeader::generate(0, &ShannonEstimator)
        };
        assert!(EntropyHeader::decode(&header.encode()).is_err());

        assert!(EntropyHeader::decode(&"A".repeat(MAX_ENTROPY_HEADER_LEN + 4)).is_err());
    }
}
