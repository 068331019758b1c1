//! Regime tag taxonomy.
//!
//! The enumeration is closed: every classification ends in exactly one of
//! these tags, and every constitution carries one policy per tag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Regime tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeTag {
    /// High vol, fast shock with a V-shaped rebound.
    CrisisFastV,
    /// High vol, fast shock with no recovery.
    CrisisFastNonV,
    /// High vol, shock plus rebound (legacy V-shape flag).
    CrisisVShape,
    /// High vol, fast drawdown by speed alone (legacy).
    CrisisFastShock,
    /// High vol, severe drawdown built slowly.
    CrisisSlowDrawdown,
    /// High vol, persistent uptrend after a crisis.
    PostCrisisRecovery,
    MedVolUp,
    MedVolDown,
    MedVolRange,
    LowVolUp,
    LowVolDown,
    LowVolRange,
    /// Volatility bucket escalating while expanding.
    TransitionVolUp,
    /// Volatility bucket de-escalating while contracting.
    TransitionVolDown,
    TransitionTrendFlip,
    TransitionRangeBreak,
    /// No specific regime matched.
    Transition,
}

/// Risk level attached to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported regime tag: {0}")]
pub struct UnknownRegimeTag(pub String);

impl RegimeTag {
    /// Every tag, in declaration order.
    pub const ALL: [RegimeTag; 17] = [
        Self::CrisisFastV,
        Self::CrisisFastNonV,
        Self::CrisisVShape,
        Self::CrisisFastShock,
        Self::CrisisSlowDrawdown,
        Self::PostCrisisRecovery,
        Self::MedVolUp,
        Self::MedVolDown,
        Self::MedVolRange,
        Self::LowVolUp,
        Self::LowVolDown,
        Self::LowVolRange,
        Self::TransitionVolUp,
        Self::TransitionVolDown,
        Self::TransitionTrendFlip,
        Self::TransitionRangeBreak,
        Self::Transition,
    ];

    /// Stored identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrisisFastV => "CRISIS_FAST_V",
            Self::CrisisFastNonV => "CRISIS_FAST_NON_V",
            Self::CrisisVShape => "CRISIS_V_SHAPE",
            Self::CrisisFastShock => "CRISIS_FAST_SHOCK",
            Self::CrisisSlowDrawdown => "CRISIS_SLOW_DRAWDOWN",
            Self::PostCrisisRecovery => "POST_CRISIS_RECOVERY",
            Self::MedVolUp => "MED_VOL_UP",
            Self::MedVolDown => "MED_VOL_DOWN",
            Self::MedVolRange => "MED_VOL_RANGE",
            Self::LowVolUp => "LOW_VOL_UP",
            Self::LowVolDown => "LOW_VOL_DOWN",
            Self::LowVolRange => "LOW_VOL_RANGE",
            Self::TransitionVolUp => "TRANSITION_VOL_UP",
            Self::TransitionVolDown => "TRANSITION_VOL_DOWN",
            Self::TransitionTrendFlip => "TRANSITION_TREND_FLIP",
            Self::TransitionRangeBreak => "TRANSITION_RANGE_BREAK",
            Self::Transition => "TRANSITION",
        }
    }

    /// Description of the regime.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CrisisFastV => "Fast crash with V-shaped recovery",
            Self::CrisisFastNonV => "Fast crash without recovery",
            Self::CrisisVShape => "Shock followed by a sharp rebound",
            Self::CrisisFastShock => "Fast drawdown in high volatility",
            Self::CrisisSlowDrawdown => "Slow, grinding severe drawdown",
            Self::PostCrisisRecovery => "Persistent recovery in high volatility",
            Self::MedVolUp => "Uptrend, moderate volatility",
            Self::MedVolDown => "Downtrend, moderate volatility",
            Self::MedVolRange => "Range-bound, moderate volatility",
            Self::LowVolUp => "Uptrend, low volatility",
            Self::LowVolDown => "Downtrend, low volatility",
            Self::LowVolRange => "Range-bound, low volatility",
            Self::TransitionVolUp => "Volatility expanding into a higher bucket",
            Self::TransitionVolDown => "Volatility contracting into a lower bucket",
            Self::TransitionTrendFlip => "Trend direction flipping",
            Self::TransitionRangeBreak => "Breaking into or out of a range",
            Self::Transition => "Unclassified transition",
        }
    }

    /// Risk level of the regime.
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            Self::CrisisFastNonV => RiskLevel::Extreme,
            Self::CrisisFastV
            | Self::CrisisVShape
            | Self::CrisisFastShock
            | Self::CrisisSlowDrawdown => RiskLevel::High,
            Self::PostCrisisRecovery
            | Self::MedVolDown
            | Self::TransitionVolUp
            | Self::TransitionTrendFlip
            | Self::TransitionRangeBreak
            | Self::Transition => RiskLevel::Medium,
            Self::MedVolUp
            | Self::MedVolRange
            | Self::LowVolUp
            | Self::LowVolDown
            | Self::LowVolRange
            | Self::TransitionVolDown => RiskLevel::Low,
        }
    }

    /// Crisis regimes get an extra size-cap reduction.
    pub fn is_crisis(&self) -> bool {
        matches!(
            self,
            Self::CrisisFastV
                | Self::CrisisFastNonV
                | Self::CrisisVShape
                | Self::CrisisFastShock
                | Self::CrisisSlowDrawdown
        )
    }

    /// Fast shock that has not recovered.
    pub fn is_fast_shock_without_recovery(&self) -> bool {
        matches!(self, Self::CrisisFastNonV)
    }
}

impl fmt::Display for RegimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegimeTag {
    type Err = UnknownRegimeTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == wanted)
            .ok_or_else(|| UnknownRegimeTag(s.to_string()))
    }
}

/// Regimes where the directional model has historically been useful.
///
/// Static policy data taken from prior matrix analysis. The live matrix can
/// suggest a different list (`SkillMatrix::suggest_useful_regimes`) but it
/// never replaces this one automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsefulRegimes {
    pub tags: Vec<RegimeTag>,
}

impl Default for UsefulRegimes {
    fn default() -> Self {
        Self {
            tags: vec![
                RegimeTag::MedVolUp,
                RegimeTag::MedVolDown,
                RegimeTag::LowVolUp,
                RegimeTag::LowVolDown,
                RegimeTag::PostCrisisRecovery,
            ],
        }
    }
}

impl UsefulRegimes {
    pub fn is_useful(&self, tag: RegimeTag) -> bool {
        self.tags.contains(&tag)
    }
}
