//! Versioned constitution records and their audit trail.
//!
//! Every state change produces a new `ConstitutionVersion` value with one
//! more audit entry; existing entries are never edited or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::GovernanceStatus;
use crate::constitution::Constitution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Transition,
    /// Demoted because another version of the preset was applied.
    Superseded,
    MetricsAttached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: String,
    pub from: Option<GovernanceStatus>,
    pub to: Option<GovernanceStatus>,
    pub details: String,
}

/// Backtest summary recorded against a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub recorded_at: DateTime<Utc>,
    pub periods_evaluated: usize,
    pub recommendation: String,
    pub avg_drawdown_reduction: f64,
    pub avg_sharpe_delta: f64,
    pub avg_cagr_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionVersion {
    pub preset: String,
    pub hash: String,
    pub version: String,
    pub status: GovernanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time the version became APPLIED.
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    /// Last time the version became ROLLED_BACK.
    #[serde(default)]
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub constitution: Constitution,
    pub metrics: Option<MetricsSnapshot>,
    pub audit: Vec<AuditEntry>,
}

impl ConstitutionVersion {
    /// New GENERATED version wrapping a saved constitution.
    pub fn generated(constitution: Constitution, actor: &str, at: DateTime<Utc>) -> Self {
        let created = AuditEntry {
            at,
            action: AuditAction::Created,
            actor: actor.to_string(),
            from: None,
            to: Some(GovernanceStatus::Generated),
            details: format!("Created from constitution {}", constitution.version),
        };
        Self {
            preset: constitution.preset.clone(),
            hash: constitution.hash.clone(),
            version: constitution.version.clone(),
            status: GovernanceStatus::Generated,
            created_at: at,
            updated_at: at,
            applied_at: None,
            rolled_back_at: None,
            created_by: actor.to_string(),
            constitution,
            metrics: None,
            audit: vec![created],
        }
    }

    fn with_entry(&self, status: GovernanceStatus, entry: AuditEntry) -> Self {
        let mut audit = self.audit.clone();
        let updated_at = entry.at;
        audit.push(entry);
        let entered = status != self.status;
        Self {
            status,
            updated_at,
            applied_at: match status {
                GovernanceStatus::Applied if entered => Some(updated_at),
                _ => self.applied_at,
            },
            rolled_back_at: match status {
                GovernanceStatus::RolledBack if entered => Some(updated_at),
                _ => self.rolled_back_at,
            },
            audit,
            ..self.clone()
        }
    }

    pub fn transitioned(
        &self,
        to: GovernanceStatus,
        actor: &str,
        details: &str,
        at: DateTime<Utc>,
    ) -> Self {
        self.with_entry(
            to,
            AuditEntry {
                at,
                action: AuditAction::Transition,
                actor: actor.to_string(),
                from: Some(self.status),
                to: Some(to),
                details: details.to_string(),
            },
        )
    }

    /// APPLIED -> ROLLED_BACK because `superseded_by` was applied.
    pub fn superseded(&self, superseded_by: &str, actor: &str, at: DateTime<Utc>) -> Self {
        self.with_entry(
            GovernanceStatus::RolledBack,
            AuditEntry {
                at,
                action: AuditAction::Superseded,
                actor: actor.to_string(),
                from: Some(self.status),
                to: Some(GovernanceStatus::RolledBack),
                details: format!("Superseded by {}", superseded_by),
            },
        )
    }

    pub fn with_metrics(&self, snapshot: MetricsSnapshot, actor: &str) -> Self {
        let entry = AuditEntry {
            at: snapshot.recorded_at,
            action: AuditAction::MetricsAttached,
            actor: actor.to_string(),
            from: None,
            to: None,
            details: format!(
                "Backtest over {} periods: {}",
                snapshot.periods_evaluated, snapshot.recommendation
            ),
        };
        let mut next = self.with_entry(self.status, entry);
        next.metrics = Some(snapshot);
        next
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analytics::{JoinStrategy, SkillMatrix, StabilityReport};
    use crate::constitution::ConstitutionBuilder;

    pub(crate) fn constitution(preset: &str) -> Constitution {
        let matrix = SkillMatrix {
            preset: preset.to_string(),
            join: JoinStrategy::IndexJoined,
            cells: Vec::new(),
            joined: 0,
            skipped_unmatched: 0,
        };
        let stability = StabilityReport {
            preset: preset.to_string(),
            scores: Vec::new(),
        };
        ConstitutionBuilder::default().build(&matrix, &stability).unwrap()
    }

    #[test]
    fn test_transition_appends_audit() {
        let at = Utc::now();
        let v = ConstitutionVersion::generated(constitution("default"), "ops", at);
        assert_eq!(v.audit.len(), 1);

        let next = v.transitioned(GovernanceStatus::DryRun, "ops", "dry run", at);
        assert_eq!(next.status, GovernanceStatus::DryRun);
        assert_eq!(next.audit.len(), 2);
        assert_eq!(next.audit[0], v.audit[0]);
        assert_eq!(next.audit[1].from, Some(GovernanceStatus::Generated));
        // Original value untouched
        assert_eq!(v.status, GovernanceStatus::Generated);
    }

    #[test]
    fn test_superseded_references_new_hash() {
        let at = Utc::now();
        let v = ConstitutionVersion::generated(constitution("default"), "ops", at);
        let rolled = v.superseded("abc123", "ops", at);
        assert_eq!(rolled.status, GovernanceStatus::RolledBack);
        let last = rolled.audit.last().unwrap();
        assert_eq!(last.action, AuditAction::Superseded);
        assert!(last.details.contains("abc123"));
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(1);
        let t2 = t0 + chrono::Duration::minutes(2);
        let v = ConstitutionVersion::generated(constitution("default"), "ops", t0);
        assert_eq!(v.applied_at, None);
        assert_eq!(v.rolled_back_at, None);

        let proposed = v
            .transitioned(GovernanceStatus::DryRun, "ops", "", t0)
            .transitioned(GovernanceStatus::Proposed, "ops", "", t0);
        assert_eq!(proposed.applied_at, None);

        let applied = proposed.transitioned(GovernanceStatus::Applied, "ops", "", t1);
        assert_eq!(applied.applied_at, Some(t1));
        assert_eq!(applied.rolled_back_at, None);

        // Metrics do not move the lifecycle
        let snapshot = MetricsSnapshot {
            recorded_at: t2,
            periods_evaluated: 1,
            recommendation: "CAUTION".to_string(),
            avg_drawdown_reduction: 0.0,
            avg_sharpe_delta: 0.0,
            avg_cagr_delta: 0.0,
        };
        let measured = applied.with_metrics(snapshot, "ops");
        assert_eq!(measured.applied_at, Some(t1));
        assert_eq!(measured.updated_at, t2);

        let rolled = measured.superseded("abc123", "ops", t2);
        assert_eq!(rolled.applied_at, Some(t1));
        assert_eq!(rolled.rolled_back_at, Some(t2));
    }
}
