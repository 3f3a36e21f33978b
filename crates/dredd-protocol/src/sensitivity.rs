//! Sensitivity levels and their entropy thresholds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// How sensitive a payload is. Drives the entropy threshold an envelope must
/// meet before a receiver will look at its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityLevel {
    /// Routine traffic.
    Low,
    /// Default level.
    Medium,
    /// Sensitive traffic.
    High,
    /// Most sensitive traffic.
    Critical,
}

impl SensitivityLevel {
    /// All levels in ascending order.
    pub const ALL: [SensitivityLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for SensitivityLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityLevel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ProtocolError::Malformed(format!(
                "unknown sensitivity level {:?}",
                other
            ))),
        }
    }
}

/// Minimum entropy score per sensitivity level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyThresholds {
    /// Threshold for [`SensitivityLevel::Low`].
    pub low: f64,
    /// Threshold for [`SensitivityLevel::Medium`].
    pub medium: f64,
    /// Threshold for [`SensitivityLevel::High`].
    pub high: f64,
    /// Threshold for [`SensitivityLevel::Critical`].
    pub critical: f64,
}

impl Default for EntropyThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.5,
            high: 0.7,
            critical: 0.9,
        }
    }
}

impl EntropyThresholds {
    /// Threshold for `level`.
    pub fn threshold(&self, level: SensitivityLevel) -> f64 {
        match level {
            SensitivityLevel::Low => self.low,
            SensitivityLevel::Medium => self.medium,
            SensitivityLevel::High => self.high,
            SensitivityLevel::Critical => self.critical,
        }
    }

    /// Each threshold must lie in `[0, 1]` and never decrease with level.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidThresholds`] naming the offending level.
    pub fn validate(&self) -> Result<()> {
        let mut previous = 0.0_f64;
        for level in SensitivityLevel::ALL {
            let t = self.threshold(level);
            if !(0.0..=1.0).contains(&t) {
                return Err(ProtocolError::InvalidThresholds(format!(
                    "{} threshold {} outside [0, 1]",
                    level, t
                )));
            }
            if t < previous {
                return Err(ProtocolError::InvalidThresholds(format!(
                    "{} threshold {} is below the previous level's {}",
                    level, t, previous
                )));
            }
            previous = t;
        }
        Ok(())
    }
}
