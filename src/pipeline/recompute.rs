//! Regime recompute over a candle series.
//!
//! Walks the requested index range in chunks. Inside a chunk every index is
//! independent, so features and tags are computed in parallel; the chunk is
//! then committed with one bulk upsert before the next chunk starts.

use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProgressSink;
use crate::data::{closes, Candle, CohortConfig, RegimeRecord, ENGINE_VERSION};
use crate::error::{EngineError, EngineResult};
use crate::regime::{FeatureCalculator, RegimeClassifier};
use crate::store::{RegimeStore, UpsertSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecomputeConfig {
    pub chunk_size: usize,
}

impl Default for RecomputeConfig {
    fn default() -> Self {
        Self { chunk_size: 1_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeRequest {
    pub preset: String,
    pub from_idx: usize,
    /// Inclusive; `None` means the last candle.
    pub to_idx: Option<usize>,
    pub chunk_size: usize,
}

impl RecomputeRequest {
    pub fn full(preset: &str, chunk_size: usize) -> Self {
        Self {
            preset: preset.to_string(),
            from_idx: 0,
            to_idx: None,
            chunk_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecomputeSummary {
    pub preset: String,
    pub from_idx: usize,
    pub to_idx: usize,
    pub processed: usize,
    pub skipped_insufficient_history: usize,
    pub inserted: usize,
    pub updated: usize,
    pub chunks: usize,
    /// First index not yet committed; pass as `from_idx` to resume.
    pub next_cursor: usize,
    pub cancelled: bool,
}

pub struct RecomputeEngine<S: ?Sized> {
    store: Arc<S>,
    calculator: FeatureCalculator,
    classifier: RegimeClassifier,
    cohorts: CohortConfig,
}

impl<S: RegimeStore + ?Sized> RecomputeEngine<S> {
    pub fn new(
        store: Arc<S>,
        calculator: FeatureCalculator,
        classifier: RegimeClassifier,
        cohorts: CohortConfig,
    ) -> Self {
        Self {
            store,
            calculator,
            classifier,
            cohorts,
        }
    }

    /// Regime record for `idx`, or `None` with insufficient history.
    pub fn classify_at(
        &self,
        candles: &[Candle],
        series: &[f64],
        idx: usize,
        preset: &str,
    ) -> Option<RegimeRecord> {
        let candle = candles.get(idx)?;
        let features = self.calculator.compute(&series[..=idx])?;
        let regime_tag = self.classifier.classify(&features);
        Some(RegimeRecord {
            date: candle.date,
            idx,
            cohort: self.cohorts.cohort_for(candle.date).to_string(),
            preset: preset.to_string(),
            regime_tag,
            features,
            description: regime_tag.description().to_string(),
            risk_level: regime_tag.risk_level(),
            computed_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
        })
    }

    pub fn validate(candles: &[Candle], request: &RecomputeRequest) -> EngineResult<usize> {
        if candles.is_empty() {
            return Err(EngineError::validation("No candles to recompute"));
        }
        if request.chunk_size == 0 {
            return Err(EngineError::validation("Chunk size must be positive"));
        }
        let last = candles.len() - 1;
        let to_idx = request.to_idx.unwrap_or(last);
        if to_idx > last {
            return Err(EngineError::validation(format!(
                "to_idx {} beyond last candle {}",
                to_idx, last
            )));
        }
        if request.from_idx > to_idx {
            return Err(EngineError::validation(format!(
                "from_idx {} after to_idx {}",
                request.from_idx, to_idx
            )));
        }
        Ok(to_idx)
    }

    pub fn recompute(
        &self,
        candles: &[Candle],
        request: &RecomputeRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> EngineResult<RecomputeSummary> {
        let to_idx = Self::validate(candles, request)?;
        let series = closes(candles);
        let mut summary = RecomputeSummary {
            preset: request.preset.clone(),
            from_idx: request.from_idx,
            to_idx,
            next_cursor: request.from_idx,
            ..Default::default()
        };

        info!(
            "Recompute [{}]: idx {}..={} in chunks of {}",
            request.preset, request.from_idx, to_idx, request.chunk_size
        );
        progress.start((to_idx - request.from_idx + 1) as u64);

        let mut start = request.from_idx;
        while start <= to_idx {
            if cancel.is_cancelled() {
                warn!("Recompute [{}] cancelled at idx {}", request.preset, start);
                summary.cancelled = true;
                break;
            }
            let end = start.saturating_add(request.chunk_size - 1).min(to_idx);

            let computed: Vec<Option<RegimeRecord>> = (start..=end)
                .into_par_iter()
                .map(|idx| self.classify_at(candles, &series, idx, &request.preset))
                .collect();
            let records: Vec<RegimeRecord> = computed.into_iter().flatten().collect();
            let skipped = (end - start + 1) - records.len();
            let produced = records.len();

            let written = if records.is_empty() {
                UpsertSummary::default()
            } else {
                self.store.upsert_regimes(records).map_err(|e| {
                    warn!(
                        "Recompute [{}] failed at chunk {}..={}: {}",
                        request.preset, start, end, e
                    );
                    e
                })?
            };

            summary.processed += produced;
            summary.skipped_insufficient_history += skipped;
            summary.inserted += written.inserted;
            summary.updated += written.updated;
            summary.chunks += 1;
            summary.next_cursor = end + 1;
            progress.advance((end - start + 1) as u64);

            debug!(
                "Chunk {}..={}: {} records, {} skipped",
                start, end, produced, skipped
            );
            start = end + 1;
        }

        progress.finish("recompute done");
        info!(
            "Recompute [{}]: {} records in {} chunks, {} skipped (insufficient history)",
            request.preset, summary.processed, summary.chunks, summary.skipped_insufficient_history
        );
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::NoProgress;
    use crate::regime::{ClassifierConfig, FeatureConfig};
    use crate::store::{InMemoryStore, StoreError, StoreResult};
    use chrono::{DateTime, Duration, NaiveDate};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn series(n: usize) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let price = 100.0 + (i as f64 * 0.3).sin() * 2.0 + i as f64 * 0.05;
                Candle::new(
                    start + Duration::days(i as i64),
                    Decimal::from_f64_retain(price).unwrap().round_dp(4),
                )
            })
            .collect()
    }

    fn engine<S: RegimeStore + ?Sized>(store: Arc<S>) -> RecomputeEngine<S> {
        RecomputeEngine::new(
            store,
            FeatureCalculator::new(FeatureConfig::default()),
            RegimeClassifier::new(ClassifierConfig::default()),
            CohortConfig::default(),
        )
    }

    #[test]
    fn test_skips_insufficient_history() {
        let store = Arc::new(InMemoryStore::new());
        let candles = series(100);
        let summary = engine(Arc::clone(&store))
            .recompute(
                &candles,
                &RecomputeRequest::full("default", 30),
                &CancellationToken::new(),
                &NoProgress,
            )
            .unwrap();
        assert_eq!(summary.skipped_insufficient_history, 59);
        assert_eq!(summary.processed, 41);
        assert_eq!(summary.chunks, 4);
        assert_eq!(summary.next_cursor, 100);
        let stored = store.regimes("default").unwrap();
        assert_eq!(stored.len(), 41);
        assert_eq!(stored[0].idx, 59);
        assert_eq!(stored[0].cohort, "2008_2020");
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let candles = series(150);
        let e = engine(Arc::clone(&store));
        let request = RecomputeRequest::full("default", 64);
        let cancel = CancellationToken::new();

        let first = e.recompute(&candles, &request, &cancel, &NoProgress).unwrap();
        let tags_a: Vec<_> = store.regimes("default").unwrap().iter().map(|r| r.regime_tag).collect();
        let second = e.recompute(&candles, &request, &cancel, &NoProgress).unwrap();
        let tags_b: Vec<_> = store.regimes("default").unwrap().iter().map(|r| r.regime_tag).collect();

        assert_eq!(first.inserted, second.updated);
        assert_eq!(second.inserted, 0);
        assert_eq!(tags_a, tags_b);
    }

    #[test]
    fn test_oversized_chunk_runs_as_one_chunk() {
        let store = Arc::new(InMemoryStore::new());
        let candles = series(80);
        let request = RecomputeRequest {
            from_idx: 10,
            ..RecomputeRequest::full("default", usize::MAX)
        };
        let summary = engine(Arc::clone(&store))
            .recompute(&candles, &request, &CancellationToken::new(), &NoProgress)
            .unwrap();
        assert_eq!(summary.chunks, 1);
        assert_eq!(summary.processed, 21);
        assert_eq!(summary.next_cursor, 80);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let candles = series(10);
        let bad_to = RecomputeRequest {
            to_idx: Some(10),
            ..RecomputeRequest::full("default", 5)
        };
        assert!(matches!(
            RecomputeEngine::<InMemoryStore>::validate(&candles, &bad_to),
            Err(EngineError::Validation(_))
        ));
        let zero_chunk = RecomputeRequest::full("default", 0);
        assert!(RecomputeEngine::<InMemoryStore>::validate(&candles, &zero_chunk).is_err());
        assert!(RecomputeEngine::<InMemoryStore>::validate(&[], &RecomputeRequest::full("d", 5)).is_err());
    }

    #[test]
    fn test_cancelled_before_start_returns_cursor() {
        let store = Arc::new(InMemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = RecomputeRequest {
            from_idx: 70,
            ..RecomputeRequest::full("default", 10)
        };
        let summary = engine(store)
            .recompute(&series(100), &request, &cancel, &NoProgress)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.next_cursor, 70);
        assert_eq!(summary.chunks, 0);
    }

    /// Store that fails on the second upsert.
    struct FlakyStore {
        inner: InMemoryStore,
        calls: AtomicUsize,
    }

    impl RegimeStore for FlakyStore {
        fn upsert_regimes(&self, records: Vec<RegimeRecord>) -> StoreResult<UpsertSummary> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(StoreError::Unavailable("lost connection".to_string()));
            }
            self.inner.upsert_regimes(records)
        }
        fn regimes(&self, preset: &str) -> StoreResult<Vec<RegimeRecord>> {
            self.inner.regimes(preset)
        }
        fn regimes_between(
            &self,
            preset: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> StoreResult<Vec<RegimeRecord>> {
            self.inner.regimes_between(preset, from, to)
        }
        fn latest_regime(&self, preset: &str) -> StoreResult<Option<RegimeRecord>> {
            self.inner.latest_regime(preset)
        }
        fn count_regimes_computed_since(
            &self,
            preset: &str,
            since: DateTime<Utc>,
        ) -> StoreResult<usize> {
            self.inner.count_regimes_computed_since(preset, since)
        }
    }

    #[test]
    fn test_failed_chunk_keeps_earlier_chunks() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            calls: AtomicUsize::new(0),
        });
        let candles = series(200);
        let request = RecomputeRequest {
            from_idx: 60,
            ..RecomputeRequest::full("default", 50)
        };
        let err = engine(Arc::clone(&store))
            .recompute(&candles, &request, &CancellationToken::new(), &NoProgress)
            .unwrap_err();
        assert!(err.is_configuration());
        // First chunk 60..=109 survived
        assert_eq!(store.regimes("default").unwrap().len(), 50);

        // Resume from the failed chunk
        let resumed = RecomputeRequest {
            from_idx: 110,
            ..request
        };
        engine(Arc::clone(&store))
            .recompute(&candles, &resumed, &CancellationToken::new(), &NoProgress)
            .unwrap();
        assert_eq!(store.regimes("default").unwrap().len(), 140);
    }
}
