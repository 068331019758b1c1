//! Read and command surface over one store.
//!
//! `RegimeService` owns the configuration and hands each component the
//! section it needs. Candle series are supplied by the caller; the service
//! never fetches market data.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analytics::{SkillMatrix, SkillMatrixBuilder, StabilityAnalyzer, StabilityReport};
use crate::backtest::{BacktestResult, Backtester, FullBacktestResult};
use crate::config::EngineConfig;
use crate::constitution::{Constitution, ConstitutionBuilder, SaveOutcome, StoredConstitution};
use crate::data::{Candle, RegimeRecord};
use crate::error::EngineResult;
use crate::governance::{
    ApplyGateReport, ConstitutionVersion, GovernanceManager, GovernanceStatus, TransitionResult,
};
use crate::pipeline::{
    OutcomeGenerator, OutcomeRequest, OutcomeSummary, ProgressSink, RecomputeEngine,
    RecomputeRequest, RecomputeSummary,
};
use crate::regime::{FeatureCalculator, RegimeClassifier, RegimeDistribution, RegimeTag};
use crate::store::{Store, StoreError};

pub struct RegimeService<S: ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
    governance: GovernanceManager<S>,
}

impl<S: Store + ?Sized> RegimeService<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        let governance = GovernanceManager::new(Arc::clone(&store), config.gates.clone());
        Self {
            store,
            config,
            governance,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn governance(&self) -> &GovernanceManager<S> {
        &self.governance
    }

    // Reads

    /// Latest stored regime for a preset.
    pub fn current_regime(&self, preset: &str) -> EngineResult<Option<RegimeRecord>> {
        Ok(self.store.latest_regime(preset)?)
    }

    /// The APPLIED constitution version, if any.
    pub fn active_constitution(&self, preset: &str) -> EngineResult<Option<ConstitutionVersion>> {
        self.governance.active(preset)
    }

    pub fn version_history(&self, preset: &str) -> EngineResult<Vec<ConstitutionVersion>> {
        self.governance.history(preset)
    }

    pub fn check_gates(&self, preset: &str, hash: &str) -> EngineResult<Option<ApplyGateReport>> {
        self.governance.check_gates(preset, hash)
    }

    pub fn saved_constitution(&self, preset: &str) -> EngineResult<Option<StoredConstitution>> {
        Ok(self.store.constitution(preset)?)
    }

    pub fn distribution(&self, preset: &str) -> EngineResult<RegimeDistribution> {
        let records = self.store.regimes(preset)?;
        Ok(RegimeDistribution::from_records(&records))
    }

    /// Whether a tag is on the configured allow-list.
    pub fn is_useful_regime(&self, tag: RegimeTag) -> bool {
        self.config.useful_regimes.is_useful(tag)
    }

    // Batch pipelines

    /// A recompute engine over this store, for running as a background job.
    pub fn recompute_engine(&self) -> RecomputeEngine<S> {
        RecomputeEngine::new(
            Arc::clone(&self.store),
            FeatureCalculator::new(self.config.features.clone()),
            RegimeClassifier::new(self.config.classifier.clone()),
            self.config.cohorts.clone(),
        )
    }

    pub fn outcome_generator(&self) -> OutcomeGenerator<S> {
        OutcomeGenerator::new(Arc::clone(&self.store), self.config.outcomes.clone())
    }

    pub fn recompute_request(&self, preset: &str) -> RecomputeRequest {
        RecomputeRequest::full(preset, self.config.recompute.chunk_size)
    }

    pub fn recompute(
        &self,
        candles: &[Candle],
        request: &RecomputeRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> EngineResult<RecomputeSummary> {
        self.recompute_engine()
            .recompute(candles, request, cancel, progress)
    }

    pub fn generate_outcomes(
        &self,
        candles: &[Candle],
        request: &OutcomeRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> EngineResult<OutcomeSummary> {
        self.outcome_generator()
            .generate(candles, request, cancel, progress)
    }

    // Analytics

    pub fn skill_matrix(&self, preset: &str) -> EngineResult<SkillMatrix> {
        let regimes = self.store.regimes(preset)?;
        let outcomes = self.store.outcomes(preset)?;
        Ok(SkillMatrixBuilder::new(self.config.skill.clone()).build(preset, &regimes, &outcomes))
    }

    /// Date-joined matrix, for comparison with historical reports.
    pub fn legacy_skill_matrix(&self, preset: &str) -> EngineResult<SkillMatrix> {
        let regimes = self.store.regimes(preset)?;
        let outcomes = self.store.outcomes(preset)?;
        Ok(SkillMatrixBuilder::new(self.config.skill.clone())
            .build_legacy(preset, &regimes, &outcomes))
    }

    pub fn stability(&self, preset: &str) -> EngineResult<StabilityReport> {
        let regimes = self.store.regimes(preset)?;
        let outcomes = self.store.outcomes(preset)?;
        Ok(StabilityAnalyzer::new(self.config.stability.clone()).analyze(preset, &regimes, &outcomes))
    }

    // Constitutions and governance

    /// Build from the stored evidence without persisting.
    pub fn build_constitution(&self, preset: &str) -> EngineResult<Constitution> {
        let regimes = self.store.regimes(preset)?;
        let outcomes = self.store.outcomes(preset)?;
        let matrix =
            SkillMatrixBuilder::new(self.config.skill.clone()).build(preset, &regimes, &outcomes);
        let stability =
            StabilityAnalyzer::new(self.config.stability.clone()).analyze(preset, &regimes, &outcomes);
        let constitution = ConstitutionBuilder::new(self.config.policy.clone())
            .build(&matrix, &stability)
            .map_err(StoreError::from)?;
        info!(
            "Built constitution {} for {} ({} joined samples)",
            constitution.version, preset, matrix.joined
        );
        Ok(constitution)
    }

    pub fn save_constitution(&self, constitution: Constitution) -> EngineResult<SaveOutcome> {
        let preset = constitution.preset.clone();
        let outcome = self.store.save_constitution(constitution)?;
        info!("Saved constitution for {}: {:?}", preset, outcome);
        Ok(outcome)
    }

    pub fn create_version(
        &self,
        preset: &str,
        actor: &str,
    ) -> EngineResult<Option<ConstitutionVersion>> {
        self.governance.create_version(preset, actor)
    }

    pub fn transition(
        &self,
        preset: &str,
        hash: &str,
        target: GovernanceStatus,
        actor: &str,
        details: &str,
    ) -> EngineResult<TransitionResult> {
        self.governance
            .transition(preset, hash, target, actor, details)
    }

    // Backtests

    /// The constitution of version `hash`, or the saved one when `hash` is `None`.
    pub fn constitution_for(
        &self,
        preset: &str,
        hash: Option<&str>,
    ) -> EngineResult<Option<Constitution>> {
        match hash {
            Some(hash) => Ok(self
                .store
                .version(preset, hash)?
                .map(|v| v.constitution)),
            None => Ok(self.store.constitution(preset)?.map(|s| s.current)),
        }
    }

    pub fn backtester(&self) -> Backtester {
        Backtester::new(self.config.backtest.clone())
    }

    /// Single-period backtest. `None` when the constitution does not exist.
    pub fn backtest(
        &self,
        candles: &[Candle],
        preset: &str,
        hash: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Option<BacktestResult>> {
        let Some(constitution) = self.constitution_for(preset, hash)? else {
            return Ok(None);
        };
        let regimes = self.store.regimes_between(preset, start, end)?;
        let regimes = self.with_lead_in(preset, regimes, start)?;
        self.backtester()
            .run(candles, &regimes, &constitution, start, end)
            .map(Some)
    }

    pub fn full_backtest(
        &self,
        candles: &[Candle],
        preset: &str,
        hash: Option<&str>,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<FullBacktestResult>> {
        let Some(constitution) = self.constitution_for(preset, hash)? else {
            return Ok(None);
        };
        let regimes = self.store.regimes(preset)?;
        self.backtester()
            .run_full(candles, &regimes, &constitution, cancel)
            .map(Some)
    }

    /// Record a full-suite summary on a version's audit log.
    pub fn attach_backtest_metrics(
        &self,
        preset: &str,
        hash: &str,
        result: &FullBacktestResult,
        actor: &str,
    ) -> EngineResult<Option<ConstitutionVersion>> {
        self.governance
            .attach_metrics_snapshot(preset, hash, result.metrics_snapshot(), actor)
    }

    /// The first day of a range is filtered by the record of the bar before it.
    fn with_lead_in(
        &self,
        preset: &str,
        mut regimes: Vec<RegimeRecord>,
        start: NaiveDate,
    ) -> EngineResult<Vec<RegimeRecord>> {
        let lead_in = self
            .store
            .regimes_between(preset, NaiveDate::MIN, start)?
            .into_iter()
            .rev()
            .find(|r| r.date < start);
        if let Some(record) = lead_in {
            regimes.insert(0, record);
        }
        Ok(regimes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recompute::tests::series;
    use crate::pipeline::NoProgress;
    use crate::store::InMemoryStore;

    fn service() -> RegimeService<InMemoryStore> {
        RegimeService::new(Arc::new(InMemoryStore::new()), EngineConfig::default())
    }

    fn populate(service: &RegimeService<InMemoryStore>, candles: &[Candle]) {
        let cancel = CancellationToken::new();
        service
            .recompute(candles, &service.recompute_request("default"), &cancel, &NoProgress)
            .unwrap();
        service
            .generate_outcomes(candles, &OutcomeRequest::full("default"), &cancel, &NoProgress)
            .unwrap();
    }

    #[test]
    fn test_reads_on_empty_store() {
        let s = service();
        assert!(s.current_regime("default").unwrap().is_none());
        assert!(s.active_constitution("default").unwrap().is_none());
        assert!(s.version_history("default").unwrap().is_empty());
        assert!(s.check_gates("default", "nope").unwrap().is_none());
        assert!(s.create_version("default", "ops").unwrap().is_none());
        assert_eq!(s.distribution("default").unwrap().total_days, 0);
    }

    #[test]
    fn test_pipeline_to_version() {
        let s = service();
        let candles = series(400);
        populate(&s, &candles);

        let current = s.current_regime("default").unwrap().unwrap();
        assert_eq!(current.idx, 399);

        let matrix = s.skill_matrix("default").unwrap();
        assert!(matrix.joined > 0);
        assert!(matrix.cells.iter().all(|c| c.samples > 0));
        assert!(matrix
            .cells
            .iter()
            .all(|c| c.skill_down.abs() <= 1.0 && c.skill_up.abs() <= 1.0));

        let constitution = s.build_constitution("default").unwrap();
        assert_eq!(constitution.policies.len(), RegimeTag::ALL.len());
        assert_eq!(
            s.save_constitution(constitution.clone()).unwrap(),
            SaveOutcome::Created
        );
        assert_eq!(
            s.save_constitution(s.build_constitution("default").unwrap()).unwrap(),
            SaveOutcome::Unchanged
        );

        let version = s.create_version("default", "ops").unwrap().unwrap();
        assert_eq!(version.hash, constitution.hash);
        assert_eq!(version.status, GovernanceStatus::Generated);
        let again = s.create_version("default", "ops").unwrap().unwrap();
        assert_eq!(again.created_at, version.created_at);
        assert_eq!(s.version_history("default").unwrap().len(), 1);
    }

    #[test]
    fn test_backtest_uses_saved_or_versioned_constitution() {
        let s = service();
        let candles = series(400);
        populate(&s, &candles);
        let start = candles[200].date;
        let end = candles[300].date;

        assert!(s
            .backtest(&candles, "default", None, start, end)
            .unwrap()
            .is_none());

        s.save_constitution(s.build_constitution("default").unwrap())
            .unwrap();
        let result = s
            .backtest(&candles, "default", None, start, end)
            .unwrap()
            .unwrap();
        assert_eq!(result.trading_days, 101);
        assert_eq!(result.unclassified_days, 0);

        let version = s.create_version("default", "ops").unwrap().unwrap();
        let by_hash = s
            .backtest(&candles, "default", Some(&version.hash), start, end)
            .unwrap()
            .unwrap();
        assert_eq!(by_hash.filtered, result.filtered);
        assert!(s
            .backtest(&candles, "default", Some("missing"), start, end)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_full_backtest_metrics_attach_to_version() {
        let s = service();
        let candles = series(400);
        populate(&s, &candles);
        s.save_constitution(s.build_constitution("default").unwrap())
            .unwrap();
        let version = s.create_version("default", "ops").unwrap().unwrap();

        let full = s
            .full_backtest(&candles, "default", Some(&version.hash), &CancellationToken::new())
            .unwrap()
            .unwrap();
        // 2015-2016 synthetic data overlaps no stress period
        assert_eq!(full.evaluated().count(), 0);

        let updated = s
            .attach_backtest_metrics("default", &version.hash, &full, "ops")
            .unwrap()
            .unwrap();
        let metrics = updated.metrics.unwrap();
        assert_eq!(metrics.periods_evaluated, 0);
        assert_eq!(metrics.recommendation, "CAUTION");
        assert_eq!(updated.status, GovernanceStatus::Generated);
    }
}
