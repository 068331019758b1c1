//! Constitution builder.
//!
//! A constitution is the full set of regime policies for one preset. It is
//! content-addressed: the version id is derived from a SHA-256 over the
//! policies in tag order, so rebuilding from identical evidence yields the
//! same id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use super::policy::{FilterPolicy, PolicyConfig, PolicyStatus, RegimeEvidence, RegimePolicy};
use crate::analytics::{SkillMatrix, StabilityReport};
use crate::regime::RegimeTag;

/// Hex characters of the hash kept in the version id.
const VERSION_HASH_CHARS: usize = 12;

/// Policy counts per filter for one trade direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    pub allowed: usize,
    pub cautioned: usize,
    pub blocked: usize,
}

impl FilterCounts {
    fn add(&mut self, filter: FilterPolicy) {
        match filter {
            FilterPolicy::Allow => self.allowed += 1,
            FilterPolicy::Caution => self.cautioned += 1,
            FilterPolicy::Block => self.blocked += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstitutionSummary {
    pub proven: usize,
    pub moderate: usize,
    pub unproven: usize,
    pub negative: usize,
    pub short: FilterCounts,
    pub long: FilterCounts,
}

impl ConstitutionSummary {
    fn from_policies(policies: &[RegimePolicy]) -> Self {
        let mut summary = Self::default();
        for policy in policies {
            match policy.status {
                PolicyStatus::Proven => summary.proven += 1,
                PolicyStatus::Moderate => summary.moderate += 1,
                PolicyStatus::Unproven => summary.unproven += 1,
                PolicyStatus::Negative => summary.negative += 1,
            }
            summary.short.add(policy.short_filter);
            summary.long.add(policy.long_filter);
        }
        summary
    }
}

/// Full regime policy set for one preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constitution {
    pub preset: String,
    pub version: String,
    pub hash: String,
    pub generated_at: DateTime<Utc>,
    /// Sorted PROVEN -> MODERATE -> UNPROVEN -> NEGATIVE, then by tag.
    pub policies: Vec<RegimePolicy>,
    pub summary: ConstitutionSummary,
}

/// Change of one regime policy between two constitutions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChange {
    pub regime_tag: RegimeTag,
    pub from_status: Option<PolicyStatus>,
    pub to_status: Option<PolicyStatus>,
    pub from_short_filter: Option<FilterPolicy>,
    pub to_short_filter: Option<FilterPolicy>,
    pub from_long_filter: Option<FilterPolicy>,
    pub to_long_filter: Option<FilterPolicy>,
    pub from_short_cap: Option<f64>,
    pub to_short_cap: Option<f64>,
    pub from_long_cap: Option<f64>,
    pub to_long_cap: Option<f64>,
}

impl Constitution {
    pub fn policy(&self, tag: RegimeTag) -> Option<&RegimePolicy> {
        self.policies.iter().find(|p| p.regime_tag == tag)
    }

    /// Tags whose status, filters or caps differ from `other`.
    pub fn diff(&self, other: &Constitution) -> Vec<PolicyChange> {
        RegimeTag::ALL
            .into_iter()
            .filter_map(|tag| {
                let from = self.policy(tag);
                let to = other.policy(tag);
                let same = match (from, to) {
                    (Some(a), Some(b)) => {
                        a.status == b.status
                            && a.short_filter == b.short_filter
                            && a.long_filter == b.long_filter
                            && a.size_cap_short == b.size_cap_short
                            && a.size_cap_long == b.size_cap_long
                    }
                    (None, None) => true,
                    _ => false,
                };
                (!same).then(|| PolicyChange {
                    regime_tag: tag,
                    from_status: from.map(|p| p.status),
                    to_status: to.map(|p| p.status),
                    from_short_filter: from.map(|p| p.short_filter),
                    to_short_filter: to.map(|p| p.short_filter),
                    from_long_filter: from.map(|p| p.long_filter),
                    to_long_filter: to.map(|p| p.long_filter),
                    from_short_cap: from.map(|p| p.size_cap_short),
                    to_short_cap: to.map(|p| p.size_cap_short),
                    from_long_cap: from.map(|p| p.size_cap_long),
                    to_long_cap: to.map(|p| p.size_cap_long),
                })
            })
            .collect()
    }
}

/// Canonical hash of a policy set, independent of input order.
pub fn constitution_hash(policies: &[RegimePolicy]) -> Result<String, serde_json::Error> {
    let mut canonical: Vec<&RegimePolicy> = policies.iter().collect();
    canonical.sort_by_key(|p| p.regime_tag);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn version_id(hash: &str) -> String {
    format!("c-{}", &hash[..VERSION_HASH_CHARS.min(hash.len())])
}

/// Previous constitution kept in the per-preset history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionHistoryEntry {
    pub version: String,
    pub hash: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ConstitutionSummary,
}

/// Saved constitution plus the append-only history of earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConstitution {
    pub current: Constitution,
    pub history: Vec<ConstitutionHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOutcome {
    Created,
    Updated { previous_hash: String },
    /// Same hash as the stored constitution; nothing written.
    Unchanged,
}

impl StoredConstitution {
    pub fn new(current: Constitution) -> Self {
        Self {
            current,
            history: Vec::new(),
        }
    }

    /// Next stored value after saving `next`.
    pub fn replaced_by(&self, next: Constitution) -> (Self, SaveOutcome) {
        if self.current.hash == next.hash {
            return (self.clone(), SaveOutcome::Unchanged);
        }
        let mut history = self.history.clone();
        history.push(ConstitutionHistoryEntry {
            version: self.current.version.clone(),
            hash: self.current.hash.clone(),
            generated_at: self.current.generated_at,
            summary: self.current.summary.clone(),
        });
        let outcome = SaveOutcome::Updated {
            previous_hash: self.current.hash.clone(),
        };
        (
            Self {
                current: next,
                history,
            },
            outcome,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstitutionBuilder {
    config: PolicyConfig,
}

impl ConstitutionBuilder {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Build (but do not persist) a constitution covering every tag.
    pub fn build(
        &self,
        matrix: &SkillMatrix,
        stability: &StabilityReport,
    ) -> Result<Constitution, serde_json::Error> {
        let mut policies: Vec<RegimePolicy> = RegimeTag::ALL
            .into_iter()
            .map(|tag| {
                let evidence = RegimeEvidence::collect(tag, matrix, stability);
                if evidence.total_samples == 0 {
                    RegimePolicy::unproven(tag, &self.config)
                } else {
                    RegimePolicy::from_evidence(&evidence, &self.config)
                }
            })
            .collect();
        policies.sort_by_key(|p| (p.status, p.regime_tag));

        let hash = constitution_hash(&policies)?;
        let summary = ConstitutionSummary::from_policies(&policies);

        info!(
            "Constitution [{}] {}: {} proven, {} moderate, {} unproven, {} negative",
            matrix.preset,
            version_id(&hash),
            summary.proven,
            summary.moderate,
            summary.unproven,
            summary.negative
        );

        Ok(Constitution {
            preset: matrix.preset.clone(),
            version: version_id(&hash),
            hash,
            generated_at: Utc::now(),
            policies,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{JoinStrategy, StabilityGrade};

    fn empty_inputs() -> (SkillMatrix, StabilityReport) {
        (
            SkillMatrix {
                preset: "default".to_string(),
                join: JoinStrategy::IndexJoined,
                cells: Vec::new(),
                joined: 0,
                skipped_unmatched: 0,
            },
            StabilityReport {
                preset: "default".to_string(),
                scores: Vec::new(),
            },
        )
    }

    #[test]
    fn test_every_tag_gets_a_policy() {
        let (matrix, stability) = empty_inputs();
        let constitution = ConstitutionBuilder::default().build(&matrix, &stability).unwrap();
        assert_eq!(constitution.policies.len(), RegimeTag::ALL.len());
        assert!(constitution
            .policies
            .iter()
            .all(|p| p.status == PolicyStatus::Unproven
                && p.short_filter == FilterPolicy::Caution
                && p.long_filter == FilterPolicy::Caution
                && p.stability_grade == StabilityGrade::Unproven));
        assert_eq!(constitution.summary.unproven, RegimeTag::ALL.len());
        assert_eq!(constitution.summary.short.cautioned, RegimeTag::ALL.len());
        assert_eq!(constitution.summary.long.cautioned, RegimeTag::ALL.len());
        assert!(constitution.version.starts_with("c-"));
        assert_eq!(constitution.version.len(), 14);
    }

    #[test]
    fn test_hash_is_order_independent_and_deterministic() {
        let (matrix, stability) = empty_inputs();
        let builder = ConstitutionBuilder::default();
        let a = builder.build(&matrix, &stability).unwrap();
        let b = builder.build(&matrix, &stability).unwrap();
        assert_eq!(a.hash, b.hash);

        let mut reversed = a.policies.clone();
        reversed.reverse();
        assert_eq!(constitution_hash(&reversed).unwrap(), a.hash);
    }

    #[test]
    fn test_diff_and_history() {
        let (matrix, stability) = empty_inputs();
        let first = ConstitutionBuilder::default().build(&matrix, &stability).unwrap();
        let mut second = first.clone();
        second.policies[0].long_filter = FilterPolicy::Block;
        second.policies[0].size_cap_long = 0.0;
        second.hash = constitution_hash(&second.policies).unwrap();
        second.version = version_id(&second.hash);

        let changes = first.diff(&second);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from_long_filter, Some(FilterPolicy::Caution));
        assert_eq!(changes[0].to_long_filter, Some(FilterPolicy::Block));
        assert_eq!(changes[0].to_long_cap, Some(0.0));
        assert_eq!(changes[0].from_short_filter, changes[0].to_short_filter);

        // A short-side change alone is still a change
        let mut third = first.clone();
        third.policies[1].short_filter = FilterPolicy::Allow;
        let changes = first.diff(&third);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].regime_tag, first.policies[1].regime_tag);
        assert_eq!(changes[0].to_short_filter, Some(FilterPolicy::Allow));

        let stored = StoredConstitution::new(first.clone());
        let (same, outcome) = stored.replaced_by(first.clone());
        assert_eq!(outcome, SaveOutcome::Unchanged);
        assert!(same.history.is_empty());

        let (next, outcome) = stored.replaced_by(second.clone());
        assert_eq!(
            outcome,
            SaveOutcome::Updated {
                previous_hash: first.hash.clone()
            }
        );
        assert_eq!(next.history.len(), 1);
        assert_eq!(next.history[0].hash, first.hash);
        assert_eq!(next.current.hash, second.hash);
    }
}
