//! Decade stability analysis.
//!
//! Re-runs the index-joined skill computation split by calendar decade and
//! asks whether downside skill survives across market eras. A cell that
//! only works in one decade is graded accordingly.

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::info;

use super::skill_matrix::{index_regimes, ratio, CellCounts};
use crate::data::{Horizon, Outcome, RegimeRecord};
use crate::regime::RegimeTag;

/// Stability grade of a (regime, horizon) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityGrade {
    Unproven,
    Low,
    Medium,
    High,
}

/// Minimums for one grade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeRule {
    pub min_qualified_decades: usize,
    pub min_consistency: f64,
    pub min_samples: usize,
}

/// Stability analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// First year of each configured decade.
    pub decades: Vec<i32>,
    /// Samples a decade needs to qualify.
    pub min_decade_samples: usize,
    /// Consistency needed for a confidence uplift.
    pub min_consistency: f64,
    /// Qualified decades needed for a confidence uplift.
    pub uplift_min_decades: usize,
    pub high: GradeRule,
    pub medium: GradeRule,
    /// Qualified decades needed for LOW.
    pub low_min_decades: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            decades: (1950..=2020).step_by(10).collect(),
            min_decade_samples: 100,
            min_consistency: 0.60,
            uplift_min_decades: 3,
            high: GradeRule {
                min_qualified_decades: 4,
                min_consistency: 0.75,
                min_samples: 2_000,
            },
            medium: GradeRule {
                min_qualified_decades: 3,
                min_consistency: 0.60,
                min_samples: 500,
            },
            low_min_decades: 1,
        }
    }
}

impl StabilityConfig {
    pub fn grade(&self, qualified: usize, consistency: f64, samples: usize) -> StabilityGrade {
        let meets = |rule: &GradeRule| {
            qualified >= rule.min_qualified_decades
                && consistency >= rule.min_consistency
                && samples >= rule.min_samples
        };
        if meets(&self.high) {
            StabilityGrade::High
        } else if meets(&self.medium) {
            StabilityGrade::Medium
        } else if qualified >= self.low_min_decades && qualified > 0 {
            StabilityGrade::Low
        } else {
            StabilityGrade::Unproven
        }
    }
}

/// Downside skill of a cell within one decade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecadeCell {
    pub decade: i32,
    pub samples: usize,
    pub skill_down: f64,
    pub qualified: bool,
}

/// Stability of one (regime, horizon) cell across decades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityScore {
    pub regime_tag: RegimeTag,
    pub horizon: Horizon,
    pub decades: Vec<DecadeCell>,
    /// Samples inside the configured decades.
    pub total_samples: usize,
    /// Configured decades with at least one sample.
    pub decades_with_data: usize,
    pub qualified_decades: usize,
    pub coverage: f64,
    pub consistency: f64,
    pub mean_skill_down: f64,
    pub std_skill_down: f64,
    pub grade: StabilityGrade,
    pub confidence_uplift: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub preset: String,
    pub scores: Vec<StabilityScore>,
}

impl StabilityReport {
    pub fn score(&self, tag: RegimeTag, horizon: Horizon) -> Option<&StabilityScore> {
        self.scores
            .iter()
            .find(|s| s.regime_tag == tag && s.horizon == horizon)
    }

    /// Best grade across horizons; UNPROVEN for tags never seen.
    pub fn best_grade(&self, tag: RegimeTag) -> StabilityGrade {
        self.scores
            .iter()
            .filter(|s| s.regime_tag == tag)
            .map(|s| s.grade)
            .max()
            .unwrap_or(StabilityGrade::Unproven)
    }

    /// Most qualified decades across horizons.
    pub fn qualified_decades(&self, tag: RegimeTag) -> usize {
        self.scores
            .iter()
            .filter(|s| s.regime_tag == tag)
            .map(|s| s.qualified_decades)
            .max()
            .unwrap_or(0)
    }

    /// Best decade coverage across horizons.
    pub fn decade_coverage(&self, tag: RegimeTag) -> f64 {
        self.scores
            .iter()
            .filter(|s| s.regime_tag == tag)
            .map(|s| s.coverage)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StabilityAnalyzer {
    config: StabilityConfig,
}

impl StabilityAnalyzer {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        preset: &str,
        regimes: &[RegimeRecord],
        outcomes: &[Outcome],
    ) -> StabilityReport {
        let by_idx = index_regimes(regimes);
        let mut cells: BTreeMap<(RegimeTag, Horizon), BTreeMap<i32, CellCounts>> = BTreeMap::new();

        for outcome in outcomes {
            let Some(regime) = by_idx.get(&outcome.idx) else {
                continue;
            };
            let decade = outcome.date.year().div_euclid(10) * 10;
            cells
                .entry((regime.regime_tag, outcome.horizon))
                .or_default()
                .entry(decade)
                .or_default()
                .add(outcome);
        }

        let scores: Vec<StabilityScore> = cells
            .into_iter()
            .map(|((tag, horizon), per_decade)| self.score_cell(tag, horizon, &per_decade))
            .collect();

        info!(
            "Stability [{}]: {} cells, {} HIGH",
            preset,
            scores.len(),
            scores.iter().filter(|s| s.grade == StabilityGrade::High).count()
        );

        StabilityReport {
            preset: preset.to_string(),
            scores,
        }
    }

    fn score_cell(
        &self,
        regime_tag: RegimeTag,
        horizon: Horizon,
        per_decade: &BTreeMap<i32, CellCounts>,
    ) -> StabilityScore {
        let decades: Vec<DecadeCell> = self
            .config
            .decades
            .iter()
            .map(|&decade| {
                let counts = per_decade.get(&decade).copied().unwrap_or_default();
                let (_, skill_down) = counts.skill(counts.baseline());
                DecadeCell {
                    decade,
                    samples: counts.samples,
                    skill_down,
                    qualified: counts.samples >= self.config.min_decade_samples,
                }
            })
            .collect();

        // Outcomes dated outside the configured decades are not graded
        let total_samples = decades.iter().map(|d| d.samples).sum();
        let decades_with_data = decades.iter().filter(|d| d.samples > 0).count();

        let qualified: Vec<f64> = decades
            .iter()
            .filter(|d| d.qualified)
            .map(|d| d.skill_down)
            .collect();
        let qualified_decades = qualified.len();
        let positive = qualified.iter().filter(|&&s| s > 0.0).count();

        let consistency = ratio(positive, qualified_decades);
        let coverage = ratio(qualified_decades, self.config.decades.len());
        let mean_skill_down = if qualified.is_empty() {
            0.0
        } else {
            qualified.iter().mean()
        };
        let std_skill_down = if qualified.len() < 2 {
            0.0
        } else {
            qualified.iter().std_dev()
        };

        StabilityScore {
            regime_tag,
            horizon,
            decades,
            total_samples,
            decades_with_data,
            qualified_decades,
            coverage,
            consistency,
            mean_skill_down,
            std_skill_down,
            grade: self.config.grade(qualified_decades, consistency, total_samples),
            confidence_uplift: qualified_decades >= self.config.uplift_min_decades
                && consistency >= self.config.min_consistency,
        }
    }
}
