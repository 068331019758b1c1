//! Regime-conditioned skill matrix.
//!
//! Joins regime records to outcomes and measures, per (regime, horizon)
//! cell, how often the benchmark predictor's direction call was right
//! compared with the cell's own base rate.
//!
//! Two join strategies exist:
//! - `IndexJoined` (production): joins on `idx`, baseline computed inside
//!   the cell, so skill is the regime-conditioned edge.
//! - `LegacyDate` (regression only): joins on the date string, baseline
//!   computed over the whole outcome set per horizon. This is the old
//!   behaviour and mixes unconditional market drift into the skill.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::{Direction, Horizon, Outcome, RegimeRecord};
use crate::regime::RegimeTag;

/// How regime records are matched to outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinStrategy {
    IndexJoined,
    LegacyDate,
}

/// Sample-size confidence of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Sample counts below which a cell is LOW or MEDIUM confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceTiers {
    pub low_below: usize,
    pub medium_below: usize,
}

impl ConfidenceTiers {
    pub fn grade(&self, samples: usize) -> Confidence {
        if samples < self.low_below {
            Confidence::Low
        } else if samples < self.medium_below {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }
}

/// Skill matrix configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    pub corrected_tiers: ConfidenceTiers,
    pub legacy_tiers: ConfidenceTiers,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            corrected_tiers: ConfidenceTiers {
                low_below: 500,
                medium_below: 2_000,
            },
            legacy_tiers: ConfidenceTiers {
                low_below: 100,
                medium_below: 500,
            },
        }
    }
}

/// One (regime, horizon) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCell {
    pub regime_tag: RegimeTag,
    pub horizon: Horizon,
    pub samples: usize,
    pub baseline_up: f64,
    pub baseline_down: f64,
    pub hit_up: f64,
    pub hit_down: f64,
    pub skill_up: f64,
    pub skill_down: f64,
    pub confidence: Confidence,
}

/// Raw counts behind a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellCounts {
    pub samples: usize,
    pub predicted_up: usize,
    pub predicted_down: usize,
    pub hits_up: usize,
    pub hits_down: usize,
    pub actual_up: usize,
    pub actual_down: usize,
}

impl CellCounts {
    pub fn add(&mut self, outcome: &Outcome) {
        self.samples += 1;
        match outcome.realized_direction {
            Direction::Up => self.actual_up += 1,
            Direction::Down => self.actual_down += 1,
            Direction::Flat => {}
        }
        match outcome.expected_direction {
            Direction::Up => {
                self.predicted_up += 1;
                if outcome.realized_direction == Direction::Up {
                    self.hits_up += 1;
                }
            }
            Direction::Down => {
                self.predicted_down += 1;
                if outcome.realized_direction == Direction::Down {
                    self.hits_down += 1;
                }
            }
            Direction::Flat => {}
        }
    }

    /// Base rates of UP and DOWN inside these counts.
    pub fn baseline(&self) -> (f64, f64) {
        (
            ratio(self.actual_up, self.samples),
            ratio(self.actual_down, self.samples),
        )
    }

    /// Hit rates conditioned on the predictor's call.
    pub fn hit_rates(&self) -> (f64, f64) {
        (
            ratio(self.hits_up, self.predicted_up),
            ratio(self.hits_down, self.predicted_down),
        )
    }

    /// `(skill_up, skill_down)` against the given baseline.
    pub fn skill(&self, baseline: (f64, f64)) -> (f64, f64) {
        let (hit_up, hit_down) = self.hit_rates();
        (hit_up - baseline.0, hit_down - baseline.1)
    }

    fn into_cell(
        self,
        regime_tag: RegimeTag,
        horizon: Horizon,
        baseline: (f64, f64),
        tiers: &ConfidenceTiers,
    ) -> SkillCell {
        let (hit_up, hit_down) = self.hit_rates();
        let (skill_up, skill_down) = self.skill(baseline);
        SkillCell {
            regime_tag,
            horizon,
            samples: self.samples,
            baseline_up: baseline.0,
            baseline_down: baseline.1,
            hit_up,
            hit_down,
            skill_up,
            skill_down,
            confidence: tiers.grade(self.samples),
        }
    }
}

pub(crate) fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Skill matrix for one preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMatrix {
    pub preset: String,
    pub join: JoinStrategy,
    /// Only cells with at least one sample, ordered by (tag, horizon).
    pub cells: Vec<SkillCell>,
    /// Outcomes matched to a regime record.
    pub joined: usize,
    /// Outcomes with no regime record, skipped.
    pub skipped_unmatched: usize,
}

impl SkillMatrix {
    pub fn cell(&self, tag: RegimeTag, horizon: Horizon) -> Option<&SkillCell> {
        self.cells
            .iter()
            .find(|c| c.regime_tag == tag && c.horizon == horizon)
    }

    pub fn cells_for(&self, tag: RegimeTag) -> impl Iterator<Item = &SkillCell> {
        self.cells.iter().filter(move |c| c.regime_tag == tag)
    }

    /// Tags with at least one cell of `min_confidence` whose skill in either
    /// direction reaches `min_skill`. For review against the configured
    /// useful-regime list.
    pub fn suggest_useful_regimes(&self, min_skill: f64, min_confidence: Confidence) -> Vec<RegimeTag> {
        let mut tags: Vec<RegimeTag> = self
            .cells
            .iter()
            .filter(|c| c.confidence >= min_confidence)
            .filter(|c| c.skill_down >= min_skill || c.skill_up >= min_skill)
            .map(|c| c.regime_tag)
            .collect();
        tags.dedup();
        tags
    }
}

/// Index of regime records by the join key.
pub(crate) fn index_regimes(regimes: &[RegimeRecord]) -> HashMap<usize, &RegimeRecord> {
    regimes.iter().map(|r| (r.idx, r)).collect()
}

/// Builds skill matrices from stored records.
#[derive(Debug, Clone, Default)]
pub struct SkillMatrixBuilder {
    config: SkillConfig,
}

impl SkillMatrixBuilder {
    pub fn new(config: SkillConfig) -> Self {
        Self { config }
    }

    /// Production matrix: index join, regime-conditioned baseline.
    pub fn build(&self, preset: &str, regimes: &[RegimeRecord], outcomes: &[Outcome]) -> SkillMatrix {
        let by_idx = index_regimes(regimes);
        let mut counts: BTreeMap<(RegimeTag, Horizon), CellCounts> = BTreeMap::new();
        let mut joined = 0;
        let mut skipped = 0;

        for outcome in outcomes {
            let Some(regime) = by_idx.get(&outcome.idx) else {
                skipped += 1;
                continue;
            };
            joined += 1;
            counts
                .entry((regime.regime_tag, outcome.horizon))
                .or_default()
                .add(outcome);
        }

        let cells = counts
            .into_iter()
            .filter(|(_, c)| c.samples > 0)
            .map(|((tag, horizon), c)| {
                let baseline = c.baseline();
                c.into_cell(tag, horizon, baseline, &self.config.corrected_tiers)
            })
            .collect::<Vec<_>>();

        info!(
            "Skill matrix [{}]: {} cells, {} joined, {} unmatched",
            preset,
            cells.len(),
            joined,
            skipped
        );

        SkillMatrix {
            preset: preset.to_string(),
            join: JoinStrategy::IndexJoined,
            cells,
            joined,
            skipped_unmatched: skipped,
        }
    }

    /// Legacy matrix: date-string join, unconditional per-horizon baseline.
    /// Kept for regression comparison with historical reports only.
    pub fn build_legacy(
        &self,
        preset: &str,
        regimes: &[RegimeRecord],
        outcomes: &[Outcome],
    ) -> SkillMatrix {
        let by_date: HashMap<String, &RegimeRecord> =
            regimes.iter().map(|r| (r.date.to_string(), r)).collect();

        let mut global: BTreeMap<Horizon, CellCounts> = BTreeMap::new();
        for outcome in outcomes {
            global.entry(outcome.horizon).or_default().add(outcome);
        }

        let mut counts: BTreeMap<(RegimeTag, Horizon), CellCounts> = BTreeMap::new();
        let mut joined = 0;
        let mut skipped = 0;
        for outcome in outcomes {
            match by_date.get(&outcome.date.to_string()) {
                Some(regime) => {
                    joined += 1;
                    counts
                        .entry((regime.regime_tag, outcome.horizon))
                        .or_default()
                        .add(outcome);
                }
                None => skipped += 1,
            }
        }

        let cells = counts
            .into_iter()
            .filter(|(_, c)| c.samples > 0)
            .map(|((tag, horizon), c)| {
                let baseline = global
                    .get(&horizon)
                    .map(CellCounts::baseline)
                    .unwrap_or((0.0, 0.0));
                c.into_cell(tag, horizon, baseline, &self.config.legacy_tiers)
            })
            .collect();

        debug!("Legacy skill matrix [{}]: {} joined", preset, joined);

        SkillMatrix {
            preset: preset.to_string(),
            join: JoinStrategy::LegacyDate,
            cells,
            joined,
            skipped_unmatched: skipped,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::regime::{
        CrashSpeed, ReboundType, RegimeFeatures, RiskLevel, TrendDirection, VolBucket,
    };
    use chrono::{Duration, NaiveDate, Utc};

    pub(crate) fn features() -> RegimeFeatures {
        RegimeFeatures {
            vol_20: 0.1,
            vol_60: 0.1,
            vol_bucket: VolBucket::Low,
            vol_bucket_prev: VolBucket::Low,
            is_expanding: false,
            is_contracting: false,
            max_drawdown: 0.0,
            dd_speed: 0.0,
            days_to_trough: 0,
            sma_50: 100.0,
            sma_slope: 0.1,
            sma_slope_prev: 0.1,
            trend_direction: TrendDirection::Up,
            trend_direction_prev: TrendDirection::Up,
            trend_persistence: 0.6,
            is_range: false,
            is_trend_flip: false,
            is_range_breaking: false,
            shock_return: 0.0,
            rebound: 0.0,
            is_shock: false,
            is_v_shape: false,
            crash_speed: CrashSpeed::None,
            rebound_type: ReboundType::None,
        }
    }

    pub(crate) fn record(idx: usize, date: NaiveDate, tag: RegimeTag) -> RegimeRecord {
        RegimeRecord {
            date,
            idx,
            cohort: "2008_2020".to_string(),
            preset: "default".to_string(),
            regime_tag: tag,
            features: features(),
            description: tag.description().to_string(),
            risk_level: RiskLevel::Low,
            computed_at: Utc::now(),
            engine_version: "test".to_string(),
        }
    }

    pub(crate) fn outcome(
        idx: usize,
        date: NaiveDate,
        horizon: Horizon,
        expected: Direction,
        ret: f64,
    ) -> Outcome {
        Outcome {
            idx,
            date,
            preset: "default".to_string(),
            horizon,
            expected_direction: expected,
            actual_return_pct: ret,
            realized_direction: Direction::from_return(ret),
            close_at_prediction: 100.0,
            close_at_outcome: 100.0 * (1.0 + ret),
            sma50_at_prediction: 100.0,
            computed_at: Utc::now(),
        }
    }

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2010, 1, 1).unwrap() + Duration::days(i as i64)
    }

    #[test]
    fn test_cell_baseline_is_regime_conditioned() {
        // Regime A: 3 up / 1 down. Regime B: 1 up / 3 down.
        let regimes: Vec<_> = (0..8)
            .map(|i| {
                let tag = if i < 4 { RegimeTag::LowVolUp } else { RegimeTag::LowVolDown };
                record(i, day(i), tag)
            })
            .collect();
        let rets = [0.01, 0.02, 0.01, -0.01, -0.02, -0.01, -0.03, 0.01];
        let outcomes: Vec<_> = rets
            .iter()
            .enumerate()
            .map(|(i, &r)| outcome(i, day(i), Horizon::D7, Direction::Up, r))
            .collect();

        let matrix = SkillMatrixBuilder::default().build("default", &regimes, &outcomes);
        assert_eq!(matrix.joined, 8);
        assert_eq!(matrix.cells.len(), 2);

        let up = matrix.cell(RegimeTag::LowVolUp, Horizon::D7).unwrap();
        assert_eq!(up.samples, 4);
        assert!((up.baseline_up - 0.75).abs() < 1e-12);
        assert!((up.hit_up - 0.75).abs() < 1e-12);
        assert!(up.skill_up.abs() < 1e-12);

        let down = matrix.cell(RegimeTag::LowVolDown, Horizon::D7).unwrap();
        assert!((down.baseline_up - 0.25).abs() < 1e-12);
        assert_eq!(down.confidence, Confidence::Low);
    }

    #[test]
    fn test_flat_outcomes_count_as_samples_only() {
        let regimes = vec![record(0, day(0), RegimeTag::LowVolRange)];
        let outcomes = vec![outcome(0, day(0), Horizon::D14, Direction::Down, 0.0)];
        let matrix = SkillMatrixBuilder::default().build("default", &regimes, &outcomes);
        let cell = matrix.cell(RegimeTag::LowVolRange, Horizon::D14).unwrap();
        assert_eq!(cell.samples, 1);
        assert_eq!(cell.baseline_down, 0.0);
        assert_eq!(cell.hit_down, 0.0);
    }

    #[test]
    fn test_unmatched_outcomes_skipped_and_empty_cells_omitted() {
        let regimes = vec![record(5, day(5), RegimeTag::MedVolUp)];
        let outcomes = vec![
            outcome(5, day(5), Horizon::D30, Direction::Up, 0.02),
            outcome(6, day(6), Horizon::D30, Direction::Up, 0.02),
        ];
        let matrix = SkillMatrixBuilder::default().build("default", &regimes, &outcomes);
        assert_eq!(matrix.joined, 1);
        assert_eq!(matrix.skipped_unmatched, 1);
        assert_eq!(matrix.cells.len(), 1);
        assert!(matrix.cell(RegimeTag::MedVolUp, Horizon::D7).is_none());
    }

    #[test]
    fn test_skill_bounds() {
        let regimes: Vec<_> = (0..50).map(|i| record(i, day(i), RegimeTag::MedVolDown)).collect();
        let outcomes: Vec<_> = (0..50)
            .map(|i| {
                let expected = if i % 3 == 0 { Direction::Up } else { Direction::Down };
                let ret = if i % 2 == 0 { 0.01 } else { -0.01 };
                outcome(i, day(i), Horizon::D90, expected, ret)
            })
            .collect();
        let matrix = SkillMatrixBuilder::default().build("default", &regimes, &outcomes);
        for cell in &matrix.cells {
            assert!((-1.0..=1.0).contains(&cell.skill_up));
            assert!((-1.0..=1.0).contains(&cell.skill_down));
        }
    }

    #[test]
    fn test_legacy_join_uses_dates_and_global_baseline() {
        // Records carry shifted idx values: the index join misses, the date join hits.
        let regimes = vec![
            record(100, day(0), RegimeTag::LowVolUp),
            record(101, day(1), RegimeTag::LowVolUp),
        ];
        let outcomes = vec![
            outcome(0, day(0), Horizon::D7, Direction::Up, 0.01),
            outcome(1, day(1), Horizon::D7, Direction::Up, 0.01),
            outcome(2, day(2), Horizon::D7, Direction::Up, -0.01),
            outcome(3, day(3), Horizon::D7, Direction::Up, -0.01),
        ];
        let builder = SkillMatrixBuilder::default();

        let corrected = builder.build("default", &regimes, &outcomes);
        assert_eq!(corrected.joined, 0);
        assert!(corrected.cells.is_empty());

        let legacy = builder.build_legacy("default", &regimes, &outcomes);
        assert_eq!(legacy.join, JoinStrategy::LegacyDate);
        assert_eq!(legacy.joined, 2);
        let cell = legacy.cell(RegimeTag::LowVolUp, Horizon::D7).unwrap();
        // Baseline over all four outcomes, not just the joined two
        assert!((cell.baseline_up - 0.5).abs() < 1e-12);
        assert!((cell.skill_up - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_tiers() {
        let config = SkillConfig::default();
        assert_eq!(config.corrected_tiers.grade(499), Confidence::Low);
        assert_eq!(config.corrected_tiers.grade(500), Confidence::Medium);
        assert_eq!(config.corrected_tiers.grade(2_000), Confidence::High);
        assert_eq!(config.legacy_tiers.grade(99), Confidence::Low);
        assert_eq!(config.legacy_tiers.grade(100), Confidence::Medium);
        assert_eq!(config.legacy_tiers.grade(500), Confidence::High);
    }
}
