//! Link and application data rates
//!
//! Parsed from strings such as `2048bps`, `500kbps`, `5Mbps` or `1Gbps`.
//! Units use decimal multiples; the unit suffix is case-insensitive.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate {
    bits_per_second: u64,
}

impl DataRate {
    pub const fn from_bps(bits_per_second: u64) -> Self {
        Self { bits_per_second }
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self::from_bps(kbps * 1_000)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self::from_bps(mbps * 1_000_000)
    }

    pub fn bps(&self) -> u64 {
        self.bits_per_second
    }

    /// Time to put `bytes` on the wire, `None` for a zero rate.
    /// Never shorter than one nanosecond.
    pub fn transmission_time(&self, bytes: u64) -> Option<Duration> {
        if self.bits_per_second == 0 {
            return None;
        }
        let bits = u128::from(bytes) * 8;
        let nanos = bits * 1_000_000_000 / u128::from(self.bits_per_second);
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX).max(1);
        Some(Duration::from_nanos(nanos))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.bits_per_second;
        if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps >= 1_000_000 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps >= 1_000 && bps % 1_000 == 0 {
            write!(f, "{}kbps", bps / 1_000)
        } else {
            write!(f, "{bps}bps")
        }
    }
}

impl FromStr for DataRate {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let value: f64 = number
            .parse()
            .map_err(|_| ConfigurationError::invalid("data rate", format!("'{s}' has no numeric value")))?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "bps" | "b/s" => 1.0,
            "kbps" | "kb/s" => 1e3,
            "mbps" | "mb/s" => 1e6,
            "gbps" | "gb/s" => 1e9,
            other => {
                return Err(ConfigurationError::invalid(
                    "data rate",
                    format!("unknown unit '{other}' in '{s}'"),
                ))
            }
        };

        let bits = value * multiplier;
        if !bits.is_finite() || bits < 1.0 || bits > u64::MAX as f64 {
            return Err(ConfigurationError::invalid(
                "data rate",
                format!("'{s}' is out of range"),
            ));
        }
        Ok(DataRate::from_bps(bits.round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> Self {
        rate.to_string()
    }
}
