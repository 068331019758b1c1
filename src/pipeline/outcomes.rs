//! Outcome generation for the benchmark predictor.
//!
//! The predictor is deliberately naive: UP when the close is above its
//! SMA, DOWN otherwise. It only exists so regime skill can be measured
//! against something.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProgressSink;
use crate::data::{closes, Candle, Direction, Horizon, Outcome};
use crate::error::{EngineError, EngineResult};
use crate::store::OutcomeStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub batch_size: usize,
    pub sma_period: usize,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            batch_size: 5_000,
            sma_period: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRequest {
    pub preset: String,
    pub from_idx: usize,
    /// Inclusive; `None` means the last candle.
    pub to_idx: Option<usize>,
    pub horizons: Vec<Horizon>,
}

impl OutcomeRequest {
    pub fn full(preset: &str) -> Self {
        Self {
            preset: preset.to_string(),
            from_idx: 0,
            to_idx: None,
            horizons: Horizon::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub preset: String,
    pub indices: usize,
    pub generated: usize,
    /// (index, horizon) pairs whose future bar is past the series end.
    pub skipped_no_future: usize,
    pub inserted: usize,
    pub updated: usize,
    pub batches: usize,
    pub next_cursor: usize,
    pub cancelled: bool,
}

/// Parse horizon labels; an empty list means every horizon.
pub fn parse_horizons(labels: &[String]) -> EngineResult<Vec<Horizon>> {
    if labels.is_empty() {
        return Ok(Horizon::ALL.to_vec());
    }
    let mut horizons = labels
        .iter()
        .map(|l| l.parse::<Horizon>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::validation(e.to_string()))?;
    horizons.sort();
    horizons.dedup();
    Ok(horizons)
}

/// Benchmark call: UP iff close is strictly above the SMA.
pub fn expected_direction(close: f64, sma: f64) -> Direction {
    if close > sma {
        Direction::Up
    } else {
        Direction::Down
    }
}

/// Mean of up to `period` closes ending at `idx`.
fn trailing_sma(series: &[f64], idx: usize, period: usize) -> f64 {
    let start = (idx + 1).saturating_sub(period);
    let window = &series[start..=idx];
    window.iter().sum::<f64>() / window.len() as f64
}

pub struct OutcomeGenerator<S: ?Sized> {
    store: Arc<S>,
    config: OutcomeConfig,
}

impl<S: OutcomeStore + ?Sized> OutcomeGenerator<S> {
    pub fn new(store: Arc<S>, config: OutcomeConfig) -> Self {
        Self { store, config }
    }

    /// Outcomes for one index over the requested horizons.
    pub fn outcomes_at(
        &self,
        candles: &[Candle],
        series: &[f64],
        idx: usize,
        preset: &str,
        horizons: &[Horizon],
    ) -> Vec<Outcome> {
        if idx == 0 || idx >= series.len() {
            return Vec::new();
        }
        let close = series[idx];
        let sma = trailing_sma(series, idx, self.config.sma_period);
        let expected = expected_direction(close, sma);
        let computed_at = Utc::now();

        horizons
            .iter()
            .filter_map(|&horizon| {
                let future = series.get(idx + horizon.trading_days())?;
                let ret = future / close - 1.0;
                Some(Outcome {
                    idx,
                    date: candles[idx].date,
                    preset: preset.to_string(),
                    horizon,
                    expected_direction: expected,
                    actual_return_pct: ret,
                    realized_direction: Direction::from_return(ret),
                    close_at_prediction: close,
                    close_at_outcome: *future,
                    sma50_at_prediction: sma,
                    computed_at,
                })
            })
            .collect()
    }

    fn flush(&self, buffer: &mut Vec<Outcome>, summary: &mut OutcomeSummary) -> EngineResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let written = self.store.upsert_outcomes(std::mem::take(buffer))?;
        summary.inserted += written.inserted;
        summary.updated += written.updated;
        summary.batches += 1;
        debug!("Outcome batch {}: {} rows", summary.batches, written.total());
        Ok(())
    }

    pub fn generate(
        &self,
        candles: &[Candle],
        request: &OutcomeRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> EngineResult<OutcomeSummary> {
        if candles.is_empty() {
            return Err(EngineError::validation("No candles for outcome generation"));
        }
        if self.config.batch_size == 0 {
            return Err(EngineError::validation("Batch size must be positive"));
        }
        if request.horizons.is_empty() {
            return Err(EngineError::validation("No horizons requested"));
        }
        let last = candles.len() - 1;
        let to_idx = request.to_idx.unwrap_or(last);
        if to_idx > last || request.from_idx > to_idx {
            return Err(EngineError::validation(format!(
                "Invalid index range {}..={} for {} candles",
                request.from_idx,
                to_idx,
                candles.len()
            )));
        }

        let series = closes(candles);
        let mut summary = OutcomeSummary {
            preset: request.preset.clone(),
            next_cursor: request.from_idx,
            ..Default::default()
        };
        let mut buffer: Vec<Outcome> = Vec::new();
        // First index whose outcomes are still unflushed.
        let mut pending_from = request.from_idx;

        info!(
            "Outcomes [{}]: idx {}..={}, {} horizons",
            request.preset,
            request.from_idx,
            to_idx,
            request.horizons.len()
        );
        progress.start((to_idx - request.from_idx + 1) as u64);

        for idx in request.from_idx.max(1)..=to_idx {
            let outcomes = self.outcomes_at(candles, &series, idx, &request.preset, &request.horizons);
            summary.indices += 1;
            summary.skipped_no_future += request.horizons.len() - outcomes.len();
            summary.generated += outcomes.len();
            buffer.extend(outcomes);

            if buffer.len() >= self.config.batch_size {
                self.flush(&mut buffer, &mut summary)?;
                summary.next_cursor = idx + 1;
                progress.advance((idx + 1 - pending_from) as u64);
                pending_from = idx + 1;
                if cancel.is_cancelled() {
                    warn!("Outcomes [{}] cancelled at idx {}", request.preset, idx + 1);
                    summary.cancelled = true;
                    progress.finish("outcomes cancelled");
                    return Ok(summary);
                }
            }
        }

        self.flush(&mut buffer, &mut summary)?;
        summary.next_cursor = to_idx + 1;
        progress.advance((to_idx + 1).saturating_sub(pending_from) as u64);
        progress.finish("outcomes done");

        info!(
            "Outcomes [{}]: {} generated in {} batches, {} beyond series end",
            request.preset, summary.generated, summary.batches, summary.skipped_no_future
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recompute::tests::series;
    use crate::pipeline::NoProgress;
    use crate::store::InMemoryStore;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;

    fn flat_then_step() -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..12)
            .map(|i| {
                let close = if i < 6 { dec!(100) } else { dec!(110) };
                Candle::new(start + Duration::days(i), close)
            })
            .collect()
    }

    #[test]
    fn test_flat_return_is_flat_direction() {
        let store = Arc::new(InMemoryStore::new());
        let generator = OutcomeGenerator::new(Arc::clone(&store), OutcomeConfig::default());
        let candles = flat_then_step();
        let series = closes(&candles);

        let at_zero = generator.outcomes_at(&candles, &series, 0, "default", &[Horizon::D7]);
        assert!(at_zero.is_empty());

        // idx 1 -> idx 6 crosses the step; idx 6 -> idx 11 is flat
        let up = generator.outcomes_at(&candles, &series, 1, "default", &[Horizon::D7]);
        assert_eq!(up[0].realized_direction, Direction::Up);
        assert!((up[0].actual_return_pct - 0.10).abs() < 1e-12);
        // Close equal to SMA is not above it
        assert_eq!(up[0].expected_direction, Direction::Down);

        let flat = generator.outcomes_at(&candles, &series, 6, "default", &[Horizon::D7]);
        assert_eq!(flat[0].realized_direction, Direction::Flat);
        assert_eq!(flat[0].actual_return_pct, 0.0);
    }

    #[test]
    fn test_generate_batches_and_skips_missing_future() {
        let store = Arc::new(InMemoryStore::new());
        let config = OutcomeConfig {
            batch_size: 7,
            ..Default::default()
        };
        let generator = OutcomeGenerator::new(Arc::clone(&store), config);
        let candles = flat_then_step();
        let request = OutcomeRequest {
            horizons: vec![Horizon::D7, Horizon::D14],
            ..OutcomeRequest::full("default")
        };
        let summary = generator
            .generate(&candles, &request, &CancellationToken::new(), &NoProgress)
            .unwrap();

        // idx 1..=11: D7 exists for idx <= 6, D14 for idx <= 1
        assert_eq!(summary.indices, 11);
        assert_eq!(summary.generated, 7);
        assert_eq!(summary.skipped_no_future, 15);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.next_cursor, 12);
        assert_eq!(store.outcomes("default").unwrap().len(), 7);
    }

    #[test]
    fn test_generate_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let generator = OutcomeGenerator::new(Arc::clone(&store), OutcomeConfig::default());
        let candles = series(300);
        let request = OutcomeRequest::full("default");
        let cancel = CancellationToken::new();
        let first = generator.generate(&candles, &request, &cancel, &NoProgress).unwrap();
        let second = generator.generate(&candles, &request, &cancel, &NoProgress).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, first.inserted);
        assert_eq!(store.outcomes("default").unwrap().len(), first.generated);
    }

    #[test]
    fn test_parse_horizons() {
        assert_eq!(parse_horizons(&[]).unwrap().len(), 6);
        let parsed = parse_horizons(&["30d".to_string(), "7d".to_string(), "30d".to_string()]).unwrap();
        assert_eq!(parsed, vec![Horizon::D7, Horizon::D30]);
        assert!(matches!(
            parse_horizons(&["2d".to_string()]),
            Err(EngineError::Validation(_))
        ));
    }
}
