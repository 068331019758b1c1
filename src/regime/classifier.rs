//! Regime classifier.
//!
//! Maps a feature vector to exactly one tag through an ordered rule table;
//! the first rule whose predicate holds wins. Rules that did not fire in the
//! volatility branches hand over to the transition subtype table, which ends
//! in the generic `TRANSITION` tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::features::{CrashSpeed, ReboundType, RegimeFeatures, TrendDirection, VolBucket};
use super::tags::RegimeTag;
use crate::data::RegimeRecord;

/// Classifier thresholds not already encoded in the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Drawdown at or below which a slow drawdown is severe.
    pub severe_drawdown: f64,
    /// Trend persistence at or above which an uptrend counts as recovery.
    pub recovery_persistence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            severe_drawdown: -0.20,
            recovery_persistence: 0.60,
        }
    }
}

/// One row of the rule table.
pub struct RegimeRule {
    pub name: &'static str,
    pub tag: RegimeTag,
    pub applies: fn(&RegimeFeatures, &ClassifierConfig) -> bool,
}

fn high(f: &RegimeFeatures) -> bool {
    f.vol_bucket == VolBucket::High
}

fn fast_shock(f: &RegimeFeatures) -> bool {
    f.is_shock && f.crash_speed == CrashSpeed::Fast
}

fn bucket_trend(f: &RegimeFeatures, bucket: VolBucket, direction: TrendDirection) -> bool {
    f.vol_bucket == bucket && f.trend_direction == direction
}

fn bucket_range(f: &RegimeFeatures, bucket: VolBucket) -> bool {
    f.vol_bucket == bucket && f.trend_direction == TrendDirection::Flat && f.is_range
}

/// Volatility-bucket rules, highest priority first.
pub const PRIORITY_RULES: &[RegimeRule] = &[
    RegimeRule {
        name: "high_vol_fast_shock_v_rebound",
        tag: RegimeTag::CrisisFastV,
        applies: |f, _| high(f) && fast_shock(f) && f.rebound_type == ReboundType::VShape,
    },
    RegimeRule {
        name: "high_vol_fast_shock_no_rebound",
        tag: RegimeTag::CrisisFastNonV,
        applies: |f, _| high(f) && fast_shock(f) && f.rebound_type == ReboundType::NonV,
    },
    RegimeRule {
        name: "high_vol_v_shape_flag",
        tag: RegimeTag::CrisisVShape,
        applies: |f, _| high(f) && f.is_v_shape,
    },
    RegimeRule {
        name: "high_vol_fast_drawdown_speed",
        tag: RegimeTag::CrisisFastShock,
        applies: |f, _| high(f) && f.crash_speed == CrashSpeed::Fast,
    },
    RegimeRule {
        name: "high_vol_slow_severe_drawdown",
        tag: RegimeTag::CrisisSlowDrawdown,
        applies: |f, c| {
            high(f) && f.crash_speed == CrashSpeed::Slow && f.max_drawdown <= c.severe_drawdown
        },
    },
    RegimeRule {
        name: "high_vol_persistent_recovery",
        tag: RegimeTag::PostCrisisRecovery,
        applies: |f, c| {
            high(f)
                && f.trend_direction == TrendDirection::Up
                && f.trend_persistence >= c.recovery_persistence
        },
    },
    RegimeRule {
        name: "med_vol_up",
        tag: RegimeTag::MedVolUp,
        applies: |f, _| bucket_trend(f, VolBucket::Medium, TrendDirection::Up),
    },
    RegimeRule {
        name: "med_vol_down",
        tag: RegimeTag::MedVolDown,
        applies: |f, _| bucket_trend(f, VolBucket::Medium, TrendDirection::Down),
    },
    RegimeRule {
        name: "med_vol_range",
        tag: RegimeTag::MedVolRange,
        applies: |f, _| bucket_range(f, VolBucket::Medium),
    },
    RegimeRule {
        name: "low_vol_up",
        tag: RegimeTag::LowVolUp,
        applies: |f, _| bucket_trend(f, VolBucket::Low, TrendDirection::Up),
    },
    RegimeRule {
        name: "low_vol_down",
        tag: RegimeTag::LowVolDown,
        applies: |f, _| bucket_trend(f, VolBucket::Low, TrendDirection::Down),
    },
    RegimeRule {
        name: "low_vol_range",
        tag: RegimeTag::LowVolRange,
        applies: |f, _| bucket_range(f, VolBucket::Low),
    },
];

/// Transition subtype rules, reached only when no priority rule fired.
pub const TRANSITION_RULES: &[RegimeRule] = &[
    RegimeRule {
        name: "vol_bucket_escalating_expanding",
        tag: RegimeTag::TransitionVolUp,
        applies: |f, _| f.vol_bucket > f.vol_bucket_prev && f.is_expanding,
    },
    RegimeRule {
        name: "vol_bucket_deescalating_contracting",
        tag: RegimeTag::TransitionVolDown,
        applies: |f, _| f.vol_bucket < f.vol_bucket_prev && f.is_contracting,
    },
    RegimeRule {
        name: "trend_flip",
        tag: RegimeTag::TransitionTrendFlip,
        applies: |f, _| f.is_trend_flip,
    },
    RegimeRule {
        name: "range_break",
        tag: RegimeTag::TransitionRangeBreak,
        applies: |f, _| f.is_range_breaking,
    },
];

/// Name reported when nothing in either table matched.
pub const FALLBACK_RULE: &str = "generic_transition";

/// Deterministic rule-table classifier.
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: ClassifierConfig,
}

impl RegimeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a feature vector.
    pub fn classify(&self, features: &RegimeFeatures) -> RegimeTag {
        self.explain(features).0
    }

    /// Classify and report the name of the rule that fired.
    pub fn explain(&self, features: &RegimeFeatures) -> (RegimeTag, &'static str) {
        PRIORITY_RULES
            .iter()
            .chain(TRANSITION_RULES)
            .find(|rule| (rule.applies)(features, &self.config))
            .map(|rule| (rule.tag, rule.name))
            .unwrap_or((RegimeTag::Transition, FALLBACK_RULE))
    }
}

/// Statistics for one tag over a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub regime: RegimeTag,
    pub days: usize,
    pub pct_of_total: f64,
    pub avg_vol_20: f64,
    pub worst_drawdown: f64,
}

/// Day counts per tag and per cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeDistribution {
    pub total_days: usize,
    pub by_tag: Vec<RegimeStats>,
    pub by_cohort: BTreeMap<String, BTreeMap<RegimeTag, usize>>,
}

impl RegimeDistribution {
    pub fn from_records(records: &[RegimeRecord]) -> Self {
        let total_days = records.len();
        let mut per_tag: BTreeMap<RegimeTag, (usize, f64, f64)> = BTreeMap::new();
        let mut by_cohort: BTreeMap<String, BTreeMap<RegimeTag, usize>> = BTreeMap::new();

        for record in records {
            let entry = per_tag.entry(record.regime_tag).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += record.features.vol_20;
            entry.2 = entry.2.min(record.features.max_drawdown);

            *by_cohort
                .entry(record.cohort.clone())
                .or_default()
                .entry(record.regime_tag)
                .or_insert(0) += 1;
        }

        let by_tag = per_tag
            .into_iter()
            .map(|(regime, (days, vol_sum, worst))| RegimeStats {
                regime,
                days,
                pct_of_total: days as f64 / total_days as f64 * 100.0,
                avg_vol_20: vol_sum / days as f64,
                worst_drawdown: worst,
            })
            .collect();

        Self {
            total_days,
            by_tag,
            by_cohort,
        }
    }
}
