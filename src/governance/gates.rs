//! Apply gates.
//!
//! A version may only become APPLIED when all three gates pass:
//! - Live samples: enough regime records computed recently
//! - Drift: recent realized returns not below a floor
//! - Stability: no observed regime that is UNPROVEN with zero qualified decades
//!
//! Failing gates are reported, never raised.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constitution::{Constitution, PolicyStatus};
use crate::data::Outcome;
use crate::store::{OutcomeStore, RegimeStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub live_window_days: i64,
    pub min_live_samples: usize,
    pub drift_window_days: i64,
    pub drift_floor: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            live_window_days: 30,
            min_live_samples: 30,
            drift_window_days: 60,
            drift_floor: -0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    LiveSamples,
    Drift,
    Stability,
}

/// Result of a single gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    pub gate: GateKind,
    pub passed: bool,
    pub observed: f64,
    pub threshold: f64,
    pub message: String,
}

impl GateCheck {
    pub fn pass(gate: GateKind, observed: f64, threshold: f64, message: String) -> Self {
        Self {
            gate,
            passed: true,
            observed,
            threshold,
            message,
        }
    }

    pub fn fail(gate: GateKind, observed: f64, threshold: f64, message: String) -> Self {
        Self {
            gate,
            passed: false,
            observed,
            threshold,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyGateReport {
    pub preset: String,
    pub hash: String,
    pub checked_at: DateTime<Utc>,
    pub can_apply: bool,
    pub checks: Vec<GateCheck>,
    /// Messages of the failed checks.
    pub blockers: Vec<String>,
}

impl ApplyGateReport {
    pub fn from_checks(
        preset: &str,
        hash: &str,
        checked_at: DateTime<Utc>,
        checks: Vec<GateCheck>,
    ) -> Self {
        let blockers: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.message.clone())
            .collect();
        Self {
            preset: preset.to_string(),
            hash: hash.to_string(),
            checked_at,
            can_apply: blockers.is_empty(),
            checks,
            blockers,
        }
    }

    pub fn check(&self, gate: GateKind) -> Option<&GateCheck> {
        self.checks.iter().find(|c| c.gate == gate)
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        format!(
            "{} {}: {}/{} gates passed",
            self.preset,
            self.hash,
            passed,
            self.checks.len()
        )
    }
}

pub fn live_sample_gate(live_samples: usize, config: &GateConfig) -> GateCheck {
    let observed = live_samples as f64;
    let threshold = config.min_live_samples as f64;
    if live_samples >= config.min_live_samples {
        GateCheck::pass(
            GateKind::LiveSamples,
            observed,
            threshold,
            format!("{} live samples in the last {} days", live_samples, config.live_window_days),
        )
    } else {
        GateCheck::fail(
            GateKind::LiveSamples,
            observed,
            threshold,
            format!(
                "Insufficient live samples: {} < {} in the last {} days",
                live_samples, config.min_live_samples, config.live_window_days
            ),
        )
    }
}

pub fn drift_gate(recent: &[Outcome], config: &GateConfig) -> GateCheck {
    let mean = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|o| o.actual_return_pct).sum::<f64>() / recent.len() as f64
    };
    if mean >= config.drift_floor {
        GateCheck::pass(
            GateKind::Drift,
            mean,
            config.drift_floor,
            format!("Mean return {:.4} over {} recent outcomes", mean, recent.len()),
        )
    } else {
        GateCheck::fail(
            GateKind::Drift,
            mean,
            config.drift_floor,
            format!(
                "Drift: mean return {:.4} below floor {:.4} over the last {} days",
                mean, config.drift_floor, config.drift_window_days
            ),
        )
    }
}

pub fn stability_gate(constitution: &Constitution) -> GateCheck {
    let critical: Vec<String> = constitution
        .policies
        .iter()
        .filter(|p| {
            p.total_samples > 0 && p.status == PolicyStatus::Unproven && p.qualified_decades == 0
        })
        .map(|p| p.regime_tag.to_string())
        .collect();
    let observed = critical.len() as f64;
    if critical.is_empty() {
        GateCheck::pass(
            GateKind::Stability,
            observed,
            0.0,
            "No critically unstable regimes".to_string(),
        )
    } else {
        GateCheck::fail(
            GateKind::Stability,
            observed,
            0.0,
            format!("Critical instability in {}", critical.join(", ")),
        )
    }
}

/// Run all gates for a constitution against the store at `now`.
pub fn evaluate_gates<S>(
    store: &S,
    constitution: &Constitution,
    config: &GateConfig,
    now: DateTime<Utc>,
) -> StoreResult<ApplyGateReport>
where
    S: RegimeStore + OutcomeStore + ?Sized,
{
    let preset = &constitution.preset;
    let live = store
        .count_regimes_computed_since(preset, now - Duration::days(config.live_window_days))?;
    let recent = store.outcomes_computed_since(preset, now - Duration::days(config.drift_window_days))?;

    let report = ApplyGateReport::from_checks(
        preset,
        &constitution.hash,
        now,
        vec![
            live_sample_gate(live, config),
            drift_gate(&recent, config),
            stability_gate(constitution),
        ],
    );

    if report.can_apply {
        info!("Gates: {}", report.summary());
    } else {
        warn!("Gates: {} blockers: {:?}", report.summary(), report.blockers);
    }
    Ok(report)
}
