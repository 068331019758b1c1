//! Governance manager: versions, gates and transitions for saved constitutions.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::gates::{evaluate_gates, ApplyGateReport, GateConfig};
use super::status::{can_transition, GovernanceStatus};
use super::version::{ConstitutionVersion, MetricsSnapshot};
use crate::error::EngineResult;
use crate::store::{Store, StoreError, TransitionCommit};

/// Outcome of a transition request. Misuse is `success == false`, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub success: bool,
    pub preset: String,
    pub hash: String,
    pub from: Option<GovernanceStatus>,
    pub to: GovernanceStatus,
    pub error: Option<String>,
    pub gate_report: Option<ApplyGateReport>,
    /// Versions demoted to ROLLED_BACK by this transition.
    pub demoted: Vec<String>,
}

impl TransitionResult {
    fn rejected(
        preset: &str,
        hash: &str,
        from: Option<GovernanceStatus>,
        to: GovernanceStatus,
        error: String,
    ) -> Self {
        Self {
            success: false,
            preset: preset.to_string(),
            hash: hash.to_string(),
            from,
            to,
            error: Some(error),
            gate_report: None,
            demoted: Vec::new(),
        }
    }
}

pub struct GovernanceManager<S: ?Sized> {
    store: Arc<S>,
    gates: GateConfig,
}

impl<S: Store + ?Sized> GovernanceManager<S> {
    pub fn new(store: Arc<S>, gates: GateConfig) -> Self {
        Self { store, gates }
    }

    /// Create a GENERATED version from the preset's saved constitution.
    ///
    /// Returns the existing version when one already has the same hash, and
    /// `None` when the preset has no saved constitution.
    pub fn create_version(
        &self,
        preset: &str,
        actor: &str,
    ) -> EngineResult<Option<ConstitutionVersion>> {
        let Some(stored) = self.store.constitution(preset)? else {
            return Ok(None);
        };
        let hash = stored.current.hash.clone();
        let version = ConstitutionVersion::generated(stored.current, actor, Utc::now());
        if self.store.insert_version(version.clone())? {
            info!("Created version {} for {}", version.version, preset);
            Ok(Some(version))
        } else {
            Ok(self.store.version(preset, &hash)?)
        }
    }

    pub fn check_gates(&self, preset: &str, hash: &str) -> EngineResult<Option<ApplyGateReport>> {
        let Some(version) = self.store.version(preset, hash)? else {
            return Ok(None);
        };
        Ok(Some(evaluate_gates(
            self.store.as_ref(),
            &version.constitution,
            &self.gates,
            Utc::now(),
        )?))
    }

    /// Request `target` for a version.
    ///
    /// Invalid edges, missing versions, failed gates and concurrent
    /// modifications come back as `success == false`. Only store failures
    /// are errors.
    pub fn transition(
        &self,
        preset: &str,
        hash: &str,
        target: GovernanceStatus,
        actor: &str,
        details: &str,
    ) -> EngineResult<TransitionResult> {
        let Some(current) = self.store.version(preset, hash)? else {
            return Ok(TransitionResult::rejected(
                preset,
                hash,
                None,
                target,
                format!("Version {} not found for {}", hash, preset),
            ));
        };
        let from = current.status;

        if !can_transition(from, target) {
            warn!("Rejected transition {} -> {} for {}", from, target, hash);
            return Ok(TransitionResult::rejected(
                preset,
                hash,
                Some(from),
                target,
                format!("Invalid transition {} -> {}", from, target),
            ));
        }

        let now = Utc::now();
        let mut gate_report = None;
        let mut details = details.to_string();

        if target == GovernanceStatus::Applied {
            let report =
                evaluate_gates(self.store.as_ref(), &current.constitution, &self.gates, now)?;
            if !report.can_apply {
                let mut result = TransitionResult::rejected(
                    preset,
                    hash,
                    Some(from),
                    target,
                    format!("Apply gates failed: {}", report.blockers.join("; ")),
                );
                result.gate_report = Some(report);
                return Ok(result);
            }
            gate_report = Some(report);

            if let Some(active) = self.active(preset)? {
                let changes = active.constitution.diff(&current.constitution);
                details = format!(
                    "{} (replaces {}, {} policy changes)",
                    details,
                    active.hash,
                    changes.len()
                )
                .trim_start()
                .to_string();
            }
        }

        let commit = TransitionCommit {
            preset: preset.to_string(),
            hash: hash.to_string(),
            expected: from,
            target,
            actor: actor.to_string(),
            details,
            at: now,
        };

        match self.store.commit_transition(commit) {
            Ok(outcome) => {
                info!(
                    "Transition {} -> {} for {} by {} (demoted {:?})",
                    from, target, hash, actor, outcome.demoted
                );
                Ok(TransitionResult {
                    success: true,
                    preset: preset.to_string(),
                    hash: hash.to_string(),
                    from: Some(from),
                    to: target,
                    error: None,
                    gate_report,
                    demoted: outcome.demoted,
                })
            }
            Err(err @ StoreError::Conflict { .. }) => {
                warn!("Concurrent transition on {}: {}", hash, err);
                let mut result =
                    TransitionResult::rejected(preset, hash, Some(from), target, err.to_string());
                result.gate_report = gate_report;
                Ok(result)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The APPLIED version of a preset, if any.
    pub fn active(&self, preset: &str) -> EngineResult<Option<ConstitutionVersion>> {
        Ok(self
            .store
            .versions_with_status(preset, GovernanceStatus::Applied)?
            .into_iter()
            .max_by_key(|v| v.applied_at))
    }

    pub fn history(&self, preset: &str) -> EngineResult<Vec<ConstitutionVersion>> {
        Ok(self.store.versions(preset)?)
    }

    pub fn attach_metrics_snapshot(
        &self,
        preset: &str,
        hash: &str,
        snapshot: MetricsSnapshot,
        actor: &str,
    ) -> EngineResult<Option<ConstitutionVersion>> {
        match self.store.attach_metrics(preset, hash, snapshot, actor) {
            Ok(version) => Ok(Some(version)),
            Err(StoreError::MissingVersion { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
