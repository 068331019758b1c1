//! End-to-end scenarios over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use mahler_regime::constitution::PolicyStatus;
use mahler_regime::data::Candle;
use mahler_regime::governance::{AuditAction, GovernanceStatus};
use mahler_regime::pipeline::{NoProgress, OutcomeRequest, RecomputeRequest};
use mahler_regime::regime::RegimeTag;
use mahler_regime::store::{RegimeStore, VersionStore};
use mahler_regime::analytics::StabilityGrade;
use mahler_regime::{EngineConfig, InMemoryStore, RegimeService};

const PRESET: &str = "default";

fn candles(closes: &[f64]) -> Vec<Candle> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            Candle::new(
                start + Duration::days(i as i64),
                Decimal::from_f64_retain(c).unwrap().round_dp(4),
            )
        })
        .collect()
}

/// Flat for 250 bars, -15% over 3 bars, back to the old level over 8 bars.
fn shock_and_recovery() -> Vec<f64> {
    let mut closes = vec![100.0; 250];
    closes.extend([95.0, 90.0, 85.0]);
    closes.extend((1..=8).map(|i| 85.0 + 15.0 * i as f64 / 8.0));
    closes.resize(300, 100.0);
    closes
}

fn wavy(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + (i as f64 * 0.4).sin() * 3.0 + (i as f64 * 0.07).cos() * 5.0)
        .collect()
}

fn service(store: Arc<InMemoryStore>) -> RegimeService<InMemoryStore> {
    RegimeService::new(store, EngineConfig::default())
}

fn recompute(
    service: &RegimeService<InMemoryStore>,
    candles: &[Candle],
    from: usize,
    to: Option<usize>,
) -> mahler_regime::pipeline::RecomputeSummary {
    let request = RecomputeRequest {
        from_idx: from,
        to_idx: to,
        ..service.recompute_request(PRESET)
    };
    service
        .recompute(candles, &request, &CancellationToken::new(), &NoProgress)
        .unwrap()
}

fn propose(service: &RegimeService<InMemoryStore>, hash: &str) {
    for target in [GovernanceStatus::DryRun, GovernanceStatus::Proposed] {
        let result = service
            .transition(PRESET, hash, target, "ops", "review")
            .unwrap();
        assert!(result.success, "{:?}", result.error);
    }
}

#[test]
fn fast_shock_with_v_recovery_is_crisis_fast_v() {
    let store = Arc::new(InMemoryStore::new());
    let s = service(Arc::clone(&store));
    let series = candles(&shock_and_recovery());
    let summary = recompute(&s, &series, 0, None);
    assert_eq!(summary.processed, 241);

    let records = store.regimes(PRESET).unwrap();
    let tag_at = |idx: usize| records.iter().find(|r| r.idx == idx).unwrap().regime_tag;

    // Recovery runs over idx 253..=260. The first two bars rebound 2.2% and
    // 4.4% off the low, short of the 5% V-shape threshold.
    assert_eq!(tag_at(253), RegimeTag::CrisisFastNonV);
    assert_eq!(tag_at(254), RegimeTag::CrisisFastNonV);
    for idx in 255..=260 {
        assert_eq!(tag_at(idx), RegimeTag::CrisisFastV, "idx {}", idx);
    }
    // Before the drop nothing moves
    let calm = records.iter().find(|r| r.idx == 200).unwrap();
    assert_eq!(calm.regime_tag, RegimeTag::LowVolRange);
}

#[test]
fn thin_evidence_yields_unproven_constitution() {
    let store = Arc::new(InMemoryStore::new());
    let s = service(Arc::clone(&store));
    let series = candles(&wavy(150));
    recompute(&s, &series, 0, None);
    s.generate_outcomes(
        &series,
        &OutcomeRequest::full(PRESET),
        &CancellationToken::new(),
        &NoProgress,
    )
    .unwrap();

    let matrix = s.skill_matrix(PRESET).unwrap();
    assert!(!matrix.cells.is_empty());
    assert!(matrix.cells.iter().all(|c| c.samples < 100));

    let constitution = s.build_constitution(PRESET).unwrap();
    assert_eq!(constitution.policies.len(), RegimeTag::ALL.len());
    for policy in &constitution.policies {
        assert_eq!(policy.status, PolicyStatus::Unproven, "{}", policy.regime_tag);
        assert_eq!(policy.stability_grade, StabilityGrade::Unproven);
    }
}

#[test]
fn apply_blocked_by_live_samples() {
    let store = Arc::new(InMemoryStore::new());
    let s = service(Arc::clone(&store));
    let series = candles(&wavy(100));
    let summary = recompute(&s, &series, 60, Some(69));
    assert_eq!(summary.processed, 10);

    s.save_constitution(s.build_constitution(PRESET).unwrap())
        .unwrap();
    let version = s.create_version(PRESET, "ops").unwrap().unwrap();
    propose(&s, &version.hash);

    let result = s
        .transition(PRESET, &version.hash, GovernanceStatus::Applied, "ops", "go live")
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("live samples"));
    let report = result.gate_report.unwrap();
    assert!(!report.can_apply);

    let stored = store.version(PRESET, &version.hash).unwrap().unwrap();
    assert_eq!(stored.status, GovernanceStatus::Proposed);
    assert!(s.active_constitution(PRESET).unwrap().is_none());
}

#[test]
fn recompute_twice_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let s = service(Arc::clone(&store));
    let series = candles(&shock_and_recovery());

    let first = recompute(&s, &series, 0, None);
    let tags: Vec<_> = store
        .regimes(PRESET)
        .unwrap()
        .iter()
        .map(|r| (r.idx, r.regime_tag))
        .collect();
    let second = recompute(&s, &series, 0, None);
    let again: Vec<_> = store
        .regimes(PRESET)
        .unwrap()
        .iter()
        .map(|r| (r.idx, r.regime_tag))
        .collect();

    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, first.inserted);
    assert_eq!(tags.len(), first.processed);
    assert_eq!(tags, again);
}

#[test]
fn concurrent_apply_leaves_one_applied() {
    let store = Arc::new(InMemoryStore::new());
    let a = service(Arc::clone(&store));
    let mut config = EngineConfig::default();
    config.policy.caution_cap = 0.4;
    let b = RegimeService::new(Arc::clone(&store), config);

    // Constitutions from an empty store only carry unobserved tags
    a.save_constitution(a.build_constitution(PRESET).unwrap())
        .unwrap();
    let first = a.create_version(PRESET, "ops").unwrap().unwrap();
    b.save_constitution(b.build_constitution(PRESET).unwrap())
        .unwrap();
    let second = b.create_version(PRESET, "ops").unwrap().unwrap();
    assert_ne!(first.hash, second.hash);

    // Enough live regimes for the apply gates
    recompute(&a, &candles(&wavy(100)), 0, None);
    propose(&a, &first.hash);
    propose(&a, &second.hash);

    // Two callers per version, both versions racing to APPLIED
    let successes = std::thread::scope(|scope| {
        let handles: Vec<_> = [&first.hash, &second.hash, &first.hash, &second.hash]
            .into_iter()
            .map(|hash| {
                let s = &a;
                scope.spawn(move || {
                    let result = s
                        .transition(PRESET, hash, GovernanceStatus::Applied, "ops", "race")
                        .unwrap();
                    result.success.then(|| hash.clone())
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    // Each version leaves PROPOSED exactly once
    assert_eq!(successes.len(), 2);
    assert!(successes.contains(&first.hash) && successes.contains(&second.hash));

    let applied = store
        .versions_with_status(PRESET, GovernanceStatus::Applied)
        .unwrap();
    assert_eq!(applied.len(), 1);
    let winner = applied[0].hash.clone();
    let loser = if winner == first.hash { &second.hash } else { &first.hash };

    let superseded: Vec<_> = store
        .versions(PRESET)
        .unwrap()
        .into_iter()
        .flat_map(|v| v.audit)
        .filter(|e| e.action == AuditAction::Superseded)
        .collect();
    assert_eq!(superseded.len(), 1);
    assert!(superseded[0].details.contains(&winner));

    let rolled = store.version(PRESET, loser).unwrap().unwrap();
    assert_eq!(rolled.status, GovernanceStatus::RolledBack);
    assert!(rolled.rolled_back_at.is_some());
    assert_eq!(rolled.audit.last().unwrap().action, AuditAction::Superseded);
    assert_eq!(a.active_constitution(PRESET).unwrap().unwrap().hash, winner);

    // Bringing the loser back replaces the winner
    propose(&a, loser);
    let result = a
        .transition(PRESET, loser, GovernanceStatus::Applied, "ops", "replace")
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.demoted, vec![winner.clone()]);

    let applied = store
        .versions_with_status(PRESET, GovernanceStatus::Applied)
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(&applied[0].hash, loser);
    let demoted = store.version(PRESET, &winner).unwrap().unwrap();
    assert_eq!(demoted.status, GovernanceStatus::RolledBack);
    assert!(demoted.audit.last().unwrap().details.contains(loser.as_str()));
    assert_eq!(a.active_constitution(PRESET).unwrap().unwrap().hash, *loser);
}
