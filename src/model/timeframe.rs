use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer};

/// Bar width of a candle series (`M1`, `H4`, `D1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M10,
    M12,
    M15,
    M20,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 21] = [
        Timeframe::M1,
        Timeframe::M2,
        Timeframe::M3,
        Timeframe::M4,
        Timeframe::M5,
        Timeframe::M6,
        Timeframe::M10,
        Timeframe::M12,
        Timeframe::M15,
        Timeframe::M20,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H3,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::M3 => "M3",
            Self::M4 => "M4",
            Self::M5 => "M5",
            Self::M6 => "M6",
            Self::M10 => "M10",
            Self::M12 => "M12",
            Self::M15 => "M15",
            Self::M20 => "M20",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H2 => "H2",
            Self::H3 => "H3",
            Self::H4 => "H4",
            Self::H6 => "H6",
            Self::H8 => "H8",
            Self::H12 => "H12",
            Self::D1 => "D1",
            Self::W1 => "W1",
            Self::MN1 => "MN1",
        }
    }

    /// Bucket length in seconds. A month is approximated as 30 days.
    pub fn seconds(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M2 => 2 * 60,
            Self::M3 => 3 * 60,
            Self::M4 => 4 * 60,
            Self::M5 => 5 * 60,
            Self::M6 => 6 * 60,
            Self::M10 => 10 * 60,
            Self::M12 => 12 * 60,
            Self::M15 => 15 * 60,
            Self::M20 => 20 * 60,
            Self::M30 => 30 * 60,
            Self::H1 => 3_600,
            Self::H2 => 2 * 3_600,
            Self::H3 => 3 * 3_600,
            Self::H4 => 4 * 3_600,
            Self::H6 => 6 * 3_600,
            Self::H8 => 8 * 3_600,
            Self::H12 => 12 * 3_600,
            Self::D1 => 86_400,
            Self::W1 => 7 * 86_400,
            Self::MN1 => 30 * 86_400,
        }
    }

    /// A quarter of the bucket, clamped to 50ms..=60s.
    pub fn suggested_poll_interval(self) -> Duration {
        let quarter_ms = (self.seconds() as u64 * 1_000) / 4;
        Duration::from_millis(quarter_ms.clamp(50, 60_000))
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|tf| *tf == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        match Self::ALL.iter().find(|tf| tf.as_str() == normalized) {
            Some(tf) => Ok(*tf),
            None => bail!(
                "invalid timeframe '{}': expected one of M1..M30, H1..H12, D1, W1, MN1",
                s
            ),
        }
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
