//! Per-regime policy rules.
//!
//! Three tunable functions turn aggregated evidence for one regime into a
//! policy:
//! - `determine_status`: evidence density + stability -> PROVEN / MODERATE / UNPROVEN / NEGATIVE
//! - `determine_filter`: skill + stability + status -> ALLOW / CAUTION / BLOCK
//! - `calculate_size_cap`: filter + crisis flags -> size cap in [0, 1]
//!
//! Short signals are judged on downside skill and long signals on upside
//! skill, so each direction gets its own filter and cap.

use serde::{Deserialize, Serialize};

use crate::analytics::{SkillMatrix, StabilityGrade, StabilityReport};
use crate::data::Horizon;
use crate::regime::RegimeTag;

/// Evidence status of a regime. Declaration order is the output sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Proven,
    Moderate,
    Unproven,
    Negative,
}

/// Directional filter applied to the model in a regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterPolicy {
    Allow,
    Caution,
    Block,
}

/// Thresholds of the policy functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Daily samples below which a regime is always UNPROVEN.
    pub evidence_floor: f64,
    /// Average downside skill below which a regime is NEGATIVE.
    pub negative_skill: f64,
    /// Daily samples needed for PROVEN.
    pub proven_daily_samples: f64,
    /// Daily samples needed for MODERATE.
    pub moderate_daily_samples: f64,
    /// Average skill at or above which a proven regime is ALLOWED.
    pub allow_skill: f64,
    /// Average skill at or below which a regime is BLOCKED.
    pub block_skill: f64,
    pub allow_cap: f64,
    pub caution_cap: f64,
    pub block_cap: f64,
    pub crisis_multiplier: f64,
    pub fast_shock_multiplier: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            evidence_floor: 100.0,
            negative_skill: -0.02,
            proven_daily_samples: 1_000.0,
            moderate_daily_samples: 250.0,
            allow_skill: 0.02,
            block_skill: -0.02,
            allow_cap: 1.0,
            caution_cap: 0.5,
            block_cap: 0.0,
            crisis_multiplier: 0.5,
            fast_shock_multiplier: 0.5,
        }
    }
}

/// Matrix and stability evidence aggregated over horizons for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeEvidence {
    pub regime_tag: RegimeTag,
    pub total_samples: usize,
    /// Samples per horizon, i.e. distinct regime days with outcomes.
    pub daily_samples: f64,
    pub skill_sum_down: f64,
    pub skill_sum_up: f64,
    pub avg_skill_down: f64,
    pub avg_skill_up: f64,
    pub best_grade: StabilityGrade,
    pub qualified_decades: usize,
    /// Best share of configured decades with enough samples, over horizons.
    pub decade_coverage: f64,
}

impl RegimeEvidence {
    pub fn collect(tag: RegimeTag, matrix: &SkillMatrix, stability: &StabilityReport) -> Self {
        let mut total_samples = 0;
        let mut skill_sum_down = 0.0;
        let mut skill_sum_up = 0.0;
        let mut cells = 0usize;
        for cell in matrix.cells_for(tag) {
            total_samples += cell.samples;
            skill_sum_down += cell.skill_down;
            skill_sum_up += cell.skill_up;
            cells += 1;
        }
        let (avg_skill_down, avg_skill_up) = if cells == 0 {
            (0.0, 0.0)
        } else {
            (skill_sum_down / cells as f64, skill_sum_up / cells as f64)
        };

        Self {
            regime_tag: tag,
            total_samples,
            daily_samples: total_samples as f64 / Horizon::ALL.len() as f64,
            skill_sum_down,
            skill_sum_up,
            avg_skill_down,
            avg_skill_up,
            best_grade: stability.best_grade(tag),
            qualified_decades: stability.qualified_decades(tag),
            decade_coverage: stability.decade_coverage(tag),
        }
    }
}

pub fn determine_status(evidence: &RegimeEvidence, config: &PolicyConfig) -> PolicyStatus {
    if evidence.daily_samples < config.evidence_floor {
        PolicyStatus::Unproven
    } else if evidence.avg_skill_down < config.negative_skill {
        PolicyStatus::Negative
    } else if evidence.daily_samples >= config.proven_daily_samples
        && evidence.best_grade == StabilityGrade::High
    {
        PolicyStatus::Proven
    } else if evidence.daily_samples >= config.moderate_daily_samples
        && evidence.best_grade >= StabilityGrade::Medium
    {
        PolicyStatus::Moderate
    } else {
        PolicyStatus::Unproven
    }
}

pub fn determine_filter(
    avg_skill: f64,
    grade: StabilityGrade,
    status: PolicyStatus,
    config: &PolicyConfig,
) -> FilterPolicy {
    match status {
        PolicyStatus::Negative => FilterPolicy::Block,
        PolicyStatus::Unproven => FilterPolicy::Caution,
        PolicyStatus::Proven | PolicyStatus::Moderate => {
            if avg_skill <= config.block_skill {
                FilterPolicy::Block
            } else if avg_skill >= config.allow_skill && grade >= StabilityGrade::Medium {
                FilterPolicy::Allow
            } else {
                FilterPolicy::Caution
            }
        }
    }
}

pub fn calculate_size_cap(filter: FilterPolicy, tag: RegimeTag, config: &PolicyConfig) -> f64 {
    let mut cap = match filter {
        FilterPolicy::Allow => config.allow_cap,
        FilterPolicy::Caution => config.caution_cap,
        FilterPolicy::Block => config.block_cap,
    };
    if tag.is_crisis() {
        cap *= config.crisis_multiplier;
    }
    if tag.is_fast_shock_without_recovery() {
        cap *= config.fast_shock_multiplier;
    }
    cap.clamp(0.0, 1.0)
}

/// Deterministic notes for a policy, derived from the same inputs.
pub fn policy_notes(
    evidence: &RegimeEvidence,
    status: PolicyStatus,
    short_filter: FilterPolicy,
    long_filter: FilterPolicy,
    config: &PolicyConfig,
) -> Vec<String> {
    let tag = evidence.regime_tag;
    let mut notes = Vec::new();
    if evidence.total_samples == 0 {
        notes.push("No observations for this regime".to_string());
    } else if evidence.daily_samples < config.evidence_floor {
        notes.push(format!(
            "Insufficient evidence: {:.0} daily samples (floor {:.0})",
            evidence.daily_samples, config.evidence_floor
        ));
    }
    match status {
        PolicyStatus::Negative => notes.push(format!(
            "Negative downside skill {:.4}",
            evidence.avg_skill_down
        )),
        PolicyStatus::Proven => notes.push("Stable across decades with dense evidence".to_string()),
        PolicyStatus::Moderate => notes.push("Moderate evidence and stability".to_string()),
        PolicyStatus::Unproven => {}
    }
    if evidence.qualified_decades == 0 && evidence.total_samples > 0 {
        notes.push("No decade meets the minimum sample threshold".to_string());
    }
    if short_filter == FilterPolicy::Block {
        notes.push("Short signals blocked".to_string());
    }
    if long_filter == FilterPolicy::Block {
        notes.push(format!(
            "Long signals blocked: upside skill {:.4}",
            evidence.avg_skill_up
        ));
    }
    if tag.is_crisis() {
        notes.push("Crisis regime: size cap reduced".to_string());
    }
    if tag.is_fast_shock_without_recovery() {
        notes.push("Fast shock without recovery: size cap reduced further".to_string());
    }
    notes
}

/// Policy for one regime tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePolicy {
    pub regime_tag: RegimeTag,
    pub status: PolicyStatus,
    pub short_filter: FilterPolicy,
    pub long_filter: FilterPolicy,
    pub size_cap_short: f64,
    pub size_cap_long: f64,
    pub stability_grade: StabilityGrade,
    pub total_samples: usize,
    pub daily_samples: f64,
    pub avg_skill_down: f64,
    pub avg_skill_up: f64,
    pub qualified_decades: usize,
    pub decade_coverage: f64,
    pub notes: Vec<String>,
}

impl RegimePolicy {
    pub fn from_evidence(evidence: &RegimeEvidence, config: &PolicyConfig) -> Self {
        let status = determine_status(evidence, config);
        let grade = evidence.best_grade;
        let short_filter = determine_filter(evidence.avg_skill_down, grade, status, config);
        let long_filter = determine_filter(evidence.avg_skill_up, grade, status, config);
        Self {
            regime_tag: evidence.regime_tag,
            status,
            short_filter,
            long_filter,
            size_cap_short: calculate_size_cap(short_filter, evidence.regime_tag, config),
            size_cap_long: calculate_size_cap(long_filter, evidence.regime_tag, config),
            stability_grade: evidence.best_grade,
            total_samples: evidence.total_samples,
            daily_samples: evidence.daily_samples,
            avg_skill_down: evidence.avg_skill_down,
            avg_skill_up: evidence.avg_skill_up,
            qualified_decades: evidence.qualified_decades,
            decade_coverage: evidence.decade_coverage,
            notes: policy_notes(evidence, status, short_filter, long_filter, config),
        }
    }

    /// Multiplier applied to a raw long return in this regime.
    pub fn exposure(&self) -> f64 {
        match self.long_filter {
            FilterPolicy::Block => 0.0,
            _ => self.size_cap_long,
        }
    }

    /// Default for a tag absent from the matrix.
    pub fn unproven(tag: RegimeTag, config: &PolicyConfig) -> Self {
        let evidence = RegimeEvidence {
            regime_tag: tag,
            total_samples: 0,
            daily_samples: 0.0,
            skill_sum_down: 0.0,
            skill_sum_up: 0.0,
            avg_skill_down: 0.0,
            avg_skill_up: 0.0,
            best_grade: StabilityGrade::Unproven,
            qualified_decades: 0,
            decade_coverage: 0.0,
        };
        Self::from_evidence(&evidence, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(daily: f64, skill: f64, grade: StabilityGrade) -> RegimeEvidence {
        RegimeEvidence {
            regime_tag: RegimeTag::MedVolUp,
            total_samples: (daily * 6.0) as usize,
            daily_samples: daily,
            skill_sum_down: skill * 6.0,
            skill_sum_up: 0.0,
            avg_skill_down: skill,
            avg_skill_up: 0.0,
            best_grade: grade,
            qualified_decades: 4,
            decade_coverage: 0.5,
        }
    }

    #[test]
    fn test_evidence_floor_overrides_negative_skill() {
        let config = PolicyConfig::default();
        let e = evidence(99.0, -0.50, StabilityGrade::Unproven);
        assert_eq!(determine_status(&e, &config), PolicyStatus::Unproven);
    }

    #[test]
    fn test_status_ladder() {
        let config = PolicyConfig::default();
        assert_eq!(
            determine_status(&evidence(500.0, -0.03, StabilityGrade::High), &config),
            PolicyStatus::Negative
        );
        assert_eq!(
            determine_status(&evidence(1_000.0, 0.05, StabilityGrade::High), &config),
            PolicyStatus::Proven
        );
        assert_eq!(
            determine_status(&evidence(1_000.0, 0.05, StabilityGrade::Medium), &config),
            PolicyStatus::Moderate
        );
        assert_eq!(
            determine_status(&evidence(250.0, 0.05, StabilityGrade::High), &config),
            PolicyStatus::Moderate
        );
        assert_eq!(
            determine_status(&evidence(249.0, 0.05, StabilityGrade::High), &config),
            PolicyStatus::Unproven
        );
    }

    #[test]
    fn test_filter_rules() {
        let config = PolicyConfig::default();
        assert_eq!(
            determine_filter(0.05, StabilityGrade::High, PolicyStatus::Proven, &config),
            FilterPolicy::Allow
        );
        assert_eq!(
            determine_filter(0.01, StabilityGrade::High, PolicyStatus::Proven, &config),
            FilterPolicy::Caution
        );
        assert_eq!(
            determine_filter(0.5, StabilityGrade::High, PolicyStatus::Unproven, &config),
            FilterPolicy::Caution
        );
        assert_eq!(
            determine_filter(0.5, StabilityGrade::High, PolicyStatus::Negative, &config),
            FilterPolicy::Block
        );
    }

    #[test]
    fn test_size_caps() {
        let config = PolicyConfig::default();
        assert_eq!(calculate_size_cap(FilterPolicy::Allow, RegimeTag::LowVolUp, &config), 1.0);
        assert_eq!(calculate_size_cap(FilterPolicy::Caution, RegimeTag::LowVolUp, &config), 0.5);
        assert_eq!(calculate_size_cap(FilterPolicy::Allow, RegimeTag::CrisisFastV, &config), 0.5);
        assert_eq!(
            calculate_size_cap(FilterPolicy::Caution, RegimeTag::CrisisFastNonV, &config),
            0.125
        );
        assert_eq!(calculate_size_cap(FilterPolicy::Block, RegimeTag::LowVolUp, &config), 0.0);
    }

    #[test]
    fn test_unproven_default() {
        let policy = RegimePolicy::unproven(RegimeTag::Transition, &PolicyConfig::default());
        assert_eq!(policy.status, PolicyStatus::Unproven);
        assert_eq!(policy.short_filter, FilterPolicy::Caution);
        assert_eq!(policy.long_filter, FilterPolicy::Caution);
        assert_eq!(policy.size_cap_short, policy.size_cap_long);
        assert_eq!(policy.decade_coverage, 0.0);
        assert_eq!(policy.stability_grade, StabilityGrade::Unproven);
        assert_eq!(policy.notes, vec!["No observations for this regime".to_string()]);
    }

    #[test]
    fn test_directions_follow_their_own_skill() {
        let config = PolicyConfig::default();
        // Good DOWN calls, bad UP calls
        let mut e = evidence(1_000.0, 0.05, StabilityGrade::High);
        e.skill_sum_up = -0.30;
        e.avg_skill_up = -0.05;
        let policy = RegimePolicy::from_evidence(&e, &config);
        assert_eq!(policy.status, PolicyStatus::Proven);
        assert_eq!(policy.short_filter, FilterPolicy::Allow);
        assert_eq!(policy.size_cap_short, 1.0);
        assert_eq!(policy.long_filter, FilterPolicy::Block);
        assert_eq!(policy.size_cap_long, 0.0);
        assert_eq!(policy.exposure(), 0.0);
        assert_eq!(policy.decade_coverage, 0.5);
        assert!(policy.notes.iter().any(|n| n.starts_with("Long signals blocked")));
        assert!(!policy.notes.iter().any(|n| n.starts_with("Short signals blocked")));

        // And the mirror image
        let mut e = evidence(1_000.0, 0.0, StabilityGrade::High);
        e.avg_skill_up = 0.05;
        let policy = RegimePolicy::from_evidence(&e, &config);
        assert_eq!(policy.short_filter, FilterPolicy::Caution);
        assert_eq!(policy.size_cap_short, 0.5);
        assert_eq!(policy.long_filter, FilterPolicy::Allow);
        assert_eq!(policy.exposure(), 1.0);
    }
}
