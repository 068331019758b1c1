//! Persisted records: per-date regimes and per-horizon outcomes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regime::{RegimeFeatures, RegimeTag, RiskLevel};

/// Version stamped on every record written by this crate.
pub const ENGINE_VERSION: &str = concat!("mahler-regime/", env!("CARGO_PKG_VERSION"));

/// Direction of a price move or of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// UP iff the return is positive, DOWN iff negative, FLAT iff exactly zero.
    pub fn from_return(ret: f64) -> Self {
        if ret > 0.0 {
            Self::Up
        } else if ret < 0.0 {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

/// Forward look-ahead window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "14d")]
    D14,
    #[serde(rename = "30d")]
    D30,
    #[serde(rename = "90d")]
    D90,
    #[serde(rename = "180d")]
    D180,
    #[serde(rename = "365d")]
    D365,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported horizon: {0}")]
pub struct UnknownHorizon(pub String);

impl Horizon {
    pub const ALL: [Horizon; 6] = [
        Self::D7,
        Self::D14,
        Self::D30,
        Self::D90,
        Self::D180,
        Self::D365,
    ];

    /// Horizon length in trading days.
    pub fn trading_days(&self) -> usize {
        match self {
            Self::D7 => 5,
            Self::D14 => 10,
            Self::D30 => 21,
            Self::D90 => 63,
            Self::D180 => 126,
            Self::D365 => 252,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::D7 => "7d",
            Self::D14 => "14d",
            Self::D30 => "30d",
            Self::D90 => "90d",
            Self::D180 => "180d",
            Self::D365 => "365d",
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Horizon {
    type Err = UnknownHorizon;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|h| h.label() == wanted)
            .ok_or_else(|| UnknownHorizon(s.to_string()))
    }
}

/// Regime computed for one date under one preset. Unique on `(date, preset)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeRecord {
    pub date: NaiveDate,
    pub idx: usize,
    pub cohort: String,
    pub preset: String,
    pub regime_tag: RegimeTag,
    pub features: RegimeFeatures,
    pub description: String,
    pub risk_level: RiskLevel,
    pub computed_at: DateTime<Utc>,
    pub engine_version: String,
}

/// Realized outcome of the benchmark predictor. Unique on `(idx, horizon, preset)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub idx: usize,
    pub date: NaiveDate,
    pub preset: String,
    pub horizon: Horizon,
    pub expected_direction: Direction,
    /// Forward return as a fraction (0.05 = 5%).
    pub actual_return_pct: f64,
    pub realized_direction: Direction,
    pub close_at_prediction: f64,
    pub close_at_outcome: f64,
    pub sma50_at_prediction: f64,
    pub computed_at: DateTime<Utc>,
}

impl Outcome {
    /// Whether the benchmark call matched the realized direction.
    pub fn is_hit(&self) -> bool {
        self.expected_direction == self.realized_direction
    }
}
