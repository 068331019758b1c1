//! Constitution backtester.
//!
//! Compares three daily tracks over a date range:
//! - raw: an always-long naive model (a stand-in, not the production model)
//! - filtered: the raw return scaled by the long-side policy of the previous bar's regime
//! - buy & hold: the raw market return
//!
//! A day's own regime is classified from its closing price, so it is only
//! known after that day's return. The return of day `t` is therefore filtered
//! with the regime of day `t - 1`. Days with no regime on the previous bar are
//! left unfiltered and counted as unclassified.
//!
//! The verdict weighs drawdown reduction and Sharpe improvement against CAGR
//! given up.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::periods::{default_stress_periods, StressPeriod};
use crate::constitution::{Constitution, RegimePolicy};
use crate::data::types::{first_index_on_or_after, last_index_on_or_before};
use crate::data::{Candle, RegimeRecord};
use crate::error::{EngineError, EngineResult};
use crate::governance::MetricsSnapshot;
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::regime::RegimeTag;

/// Configuration for backtest verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Max drawdown reduction needed to recommend applying.
    pub min_drawdown_reduction: f64,
    /// CAGR loss beyond which applying is rejected.
    pub max_cagr_loss: f64,
    pub stress_periods: Vec<StressPeriod>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            min_drawdown_reduction: 0.02,
            max_cagr_loss: 0.02,
            stress_periods: default_stress_periods(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    ApplyRecommended,
    Caution,
    DoNotApply,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ApplyRecommended => "APPLY_RECOMMENDED",
            Self::Caution => "CAUTION",
            Self::DoNotApply => "DO_NOT_APPLY",
        };
        f.write_str(s)
    }
}

/// Per-regime contribution over the backtest window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeBreakdown {
    pub regime_tag: RegimeTag,
    pub days: usize,
    pub raw_return_sum: f64,
    pub filtered_return_sum: f64,
    pub exposure: f64,
}

/// Filtered minus raw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestImpact {
    /// Positive when filtering lowered the max drawdown.
    pub drawdown_reduction: f64,
    pub sharpe_delta: f64,
    pub cagr_delta: f64,
    pub total_return_delta: f64,
}

impl BacktestImpact {
    pub fn between(raw: &PerformanceMetrics, filtered: &PerformanceMetrics) -> Self {
        Self {
            drawdown_reduction: raw.max_drawdown - filtered.max_drawdown,
            sharpe_delta: filtered.sharpe_ratio - raw.sharpe_ratio,
            cagr_delta: filtered.cagr - raw.cagr,
            total_return_delta: filtered.total_return - raw.total_return,
        }
    }
}

/// Result of a single-period backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub preset: String,
    pub constitution_version: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trading_days: usize,
    /// Days whose previous bar had no regime record; left unfiltered.
    pub unclassified_days: usize,
    pub raw: PerformanceMetrics,
    pub filtered: PerformanceMetrics,
    pub buy_hold: PerformanceMetrics,
    pub regimes: Vec<RegimeBreakdown>,
    pub impact: BacktestImpact,
    pub verdict: Verdict,
    pub reasons: Vec<String>,
}

impl BacktestResult {
    /// Generate summary string.
    pub fn summary(&self) -> String {
        format!(
            "Backtest {} ({} to {}, {} days)\n\
             ----------------------------------------\n\
             Raw:      return {:.2}%, max DD {:.2}%, Sharpe {:.2}\n\
             Filtered: return {:.2}%, max DD {:.2}%, Sharpe {:.2}\n\
             DD reduction: {:.2}%, Sharpe delta: {:.2}, CAGR delta: {:.2}%\n\
             Verdict: {}",
            self.constitution_version,
            self.start_date,
            self.end_date,
            self.trading_days,
            self.raw.total_return * 100.0,
            self.raw.max_drawdown * 100.0,
            self.raw.sharpe_ratio,
            self.filtered.total_return * 100.0,
            self.filtered.max_drawdown * 100.0,
            self.filtered.sharpe_ratio,
            self.impact.drawdown_reduction * 100.0,
            self.impact.sharpe_delta,
            self.impact.cagr_delta * 100.0,
            self.verdict
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub period: StressPeriod,
    pub result: Option<BacktestResult>,
    /// Why the period was not evaluated (no data in range).
    pub skipped: Option<String>,
}

/// Result of the stress-period suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullBacktestResult {
    pub preset: String,
    pub constitution_version: String,
    pub periods: Vec<PeriodOutcome>,
    pub overall: Verdict,
    pub reasons: Vec<String>,
    pub cancelled: bool,
}

impl FullBacktestResult {
    pub fn evaluated(&self) -> impl Iterator<Item = &BacktestResult> {
        self.periods.iter().filter_map(|p| p.result.as_ref())
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let results: Vec<&BacktestResult> = self.evaluated().collect();
        let n = results.len().max(1) as f64;
        MetricsSnapshot {
            recorded_at: Utc::now(),
            periods_evaluated: results.len(),
            recommendation: self.overall.to_string(),
            avg_drawdown_reduction: results.iter().map(|r| r.impact.drawdown_reduction).sum::<f64>() / n,
            avg_sharpe_delta: results.iter().map(|r| r.impact.sharpe_delta).sum::<f64>() / n,
            avg_cagr_delta: results.iter().map(|r| r.impact.cagr_delta).sum::<f64>() / n,
        }
    }
}

/// Verdict for one period plus the reasons behind it.
pub fn determine_verdict(impact: &BacktestImpact, config: &BacktestConfig) -> (Verdict, Vec<String>) {
    let mut reasons = Vec::new();
    if impact.cagr_delta < -config.max_cagr_loss {
        reasons.push(format!(
            "CAGR loss {:.2}% exceeds {:.2}%",
            -impact.cagr_delta * 100.0,
            config.max_cagr_loss * 100.0
        ));
        return (Verdict::DoNotApply, reasons);
    }
    let dd_ok = impact.drawdown_reduction >= config.min_drawdown_reduction;
    let sharpe_ok = impact.sharpe_delta > 0.0;
    if dd_ok && sharpe_ok {
        reasons.push(format!(
            "Max drawdown reduced by {:.2}% with Sharpe +{:.2}",
            impact.drawdown_reduction * 100.0,
            impact.sharpe_delta
        ));
        return (Verdict::ApplyRecommended, reasons);
    }
    if !dd_ok {
        reasons.push(format!(
            "Drawdown reduction {:.2}% below {:.2}%",
            impact.drawdown_reduction * 100.0,
            config.min_drawdown_reduction * 100.0
        ));
    }
    if !sharpe_ok {
        reasons.push(format!("Sharpe did not improve ({:.2})", impact.sharpe_delta));
    }
    (Verdict::Caution, reasons)
}

/// Negative in half or more of the periods rejects; positive in all recommends.
pub fn aggregate_verdicts(verdicts: &[Verdict]) -> Verdict {
    if verdicts.is_empty() {
        return Verdict::Caution;
    }
    let negative = verdicts.iter().filter(|v| **v == Verdict::DoNotApply).count();
    if negative * 2 >= verdicts.len() {
        Verdict::DoNotApply
    } else if verdicts.iter().all(|v| *v == Verdict::ApplyRecommended) {
        Verdict::ApplyRecommended
    } else {
        Verdict::Caution
    }
}

#[derive(Debug, Clone, Default)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Backtest a constitution over `[start, end]`.
    pub fn run(
        &self,
        candles: &[Candle],
        regimes: &[RegimeRecord],
        constitution: &Constitution,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<BacktestResult> {
        if start > end {
            return Err(EngineError::validation(format!(
                "Backtest start {} after end {}",
                start, end
            )));
        }
        let (Some(first), Some(last)) = (
            first_index_on_or_after(candles, start),
            last_index_on_or_before(candles, end),
        ) else {
            return Err(EngineError::validation(format!(
                "No candles between {} and {}",
                start, end
            )));
        };
        // Day i needs the close of day i-1.
        let first = first.max(1);
        if first > last {
            return Err(EngineError::validation(format!(
                "No trading days between {} and {}",
                start, end
            )));
        }

        let tag_by_date: HashMap<NaiveDate, RegimeTag> =
            regimes.iter().map(|r| (r.date, r.regime_tag)).collect();
        let policies: HashMap<RegimeTag, &RegimePolicy> = constitution
            .policies
            .iter()
            .map(|p| (p.regime_tag, p))
            .collect();

        let mut raw = Vec::with_capacity(last - first + 1);
        let mut filtered = Vec::with_capacity(last - first + 1);
        let mut breakdown: BTreeMap<RegimeTag, RegimeBreakdown> = BTreeMap::new();
        let mut unclassified_days = 0;

        for i in first..=last {
            let prev = candles[i - 1].close_f64();
            let ret = if prev > 0.0 {
                candles[i].close_f64() / prev - 1.0
            } else {
                0.0
            };

            let (tag, exposure) = match tag_by_date.get(&candles[i - 1].date) {
                Some(&tag) => (Some(tag), policies.get(&tag).map_or(1.0, |p| p.exposure())),
                None => {
                    unclassified_days += 1;
                    (None, 1.0)
                }
            };
            let filtered_ret = ret * exposure;
            raw.push(ret);
            filtered.push(filtered_ret);

            if let Some(tag) = tag {
                let entry = breakdown.entry(tag).or_insert(RegimeBreakdown {
                    regime_tag: tag,
                    days: 0,
                    raw_return_sum: 0.0,
                    filtered_return_sum: 0.0,
                    exposure,
                });
                entry.days += 1;
                entry.raw_return_sum += ret;
                entry.filtered_return_sum += filtered_ret;
            }
        }

        let raw_metrics = MetricsCalculator::calculate(&raw);
        let filtered_metrics = MetricsCalculator::calculate(&filtered);
        let buy_hold = raw_metrics.clone();
        let impact = BacktestImpact::between(&raw_metrics, &filtered_metrics);
        let (verdict, reasons) = determine_verdict(&impact, &self.config);

        info!(
            "Backtest [{}] {} {}..{}: {} ({} days, {} unclassified)",
            constitution.preset,
            constitution.version,
            candles[first].date,
            candles[last].date,
            verdict,
            raw.len(),
            unclassified_days
        );

        Ok(BacktestResult {
            preset: constitution.preset.clone(),
            constitution_version: constitution.version.clone(),
            start_date: candles[first].date,
            end_date: candles[last].date,
            trading_days: raw.len(),
            unclassified_days,
            raw: raw_metrics,
            filtered: filtered_metrics,
            buy_hold,
            regimes: breakdown.into_values().collect(),
            impact,
            verdict,
            reasons,
        })
    }

    /// Run every configured stress period and aggregate the verdicts.
    pub fn run_full(
        &self,
        candles: &[Candle],
        regimes: &[RegimeRecord],
        constitution: &Constitution,
        cancel: &CancellationToken,
    ) -> EngineResult<FullBacktestResult> {
        let mut periods = Vec::with_capacity(self.config.stress_periods.len());
        let mut cancelled = false;

        for period in &self.config.stress_periods {
            if cancel.is_cancelled() {
                warn!("Full backtest cancelled before {}", period.name);
                cancelled = true;
                break;
            }
            match self.run(candles, regimes, constitution, period.start, period.end) {
                Ok(result) => periods.push(PeriodOutcome {
                    period: period.clone(),
                    result: Some(result),
                    skipped: None,
                }),
                Err(EngineError::Validation(reason)) => {
                    warn!("Skipping {}: {}", period.name, reason);
                    periods.push(PeriodOutcome {
                        period: period.clone(),
                        result: None,
                        skipped: Some(reason),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let verdicts: Vec<Verdict> = periods
            .iter()
            .filter_map(|p| p.result.as_ref().map(|r| r.verdict))
            .collect();
        let overall = aggregate_verdicts(&verdicts);
        let mut reasons: Vec<String> = periods
            .iter()
            .filter_map(|p| {
                p.result
                    .as_ref()
                    .map(|r| format!("{}: {}", p.period.name, r.verdict))
            })
            .collect();
        if verdicts.is_empty() {
            reasons.push("No stress period had data".to_string());
        }

        info!(
            "Full backtest [{}] {}: {} over {} periods",
            constitution.preset,
            constitution.version,
            overall,
            verdicts.len()
        );

        Ok(FullBacktestResult {
            preset: constitution.preset.clone(),
            constitution_version: constitution.version.clone(),
            periods,
            overall,
            reasons,
            cancelled,
        })
    }
}
