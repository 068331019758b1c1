//! Regime feature calculator.
//!
//! Turns an ascending close series ending at the evaluation bar into a
//! fixed feature vector:
//! - Realized volatility (20 and 60 bars, annualized) and its bucket
//! - Running-peak drawdown with speed and days to trough
//! - 50-bar SMA slope, trend direction and persistence
//! - Range / trend-flip / range-break flags
//! - Shock return, rebound from the local low and crisis typology
//!
//! Every routine here is pure. Callers must skip indices with fewer than
//! `min_lookback` bars; `compute` returns `None` for them.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Trading days per year used to annualize volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Volatility bucket of the short-window realized volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolBucket {
    Low,
    Medium,
    High,
}

/// Direction of the 50-bar SMA slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

/// How fast the current drawdown developed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrashSpeed {
    Fast,
    Slow,
    None,
}

/// Shape of the rebound after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReboundType {
    #[serde(rename = "VSHAPE")]
    VShape,
    #[serde(rename = "NONV")]
    NonV,
    None,
}

/// Feature calculator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Minimum number of bars before any feature is computed.
    pub min_lookback: usize,
    /// Short realized volatility window.
    pub vol_short_window: usize,
    /// Long realized volatility window.
    pub vol_long_window: usize,
    /// Annualized volatility where MEDIUM begins (P33).
    pub vol_p33: f64,
    /// Annualized volatility where HIGH begins (P66).
    pub vol_p66: f64,
    /// Short/long vol ratio at or above which volatility is expanding.
    pub expansion_ratio: f64,
    /// Short/long vol ratio at or below which volatility is contracting.
    pub contraction_ratio: f64,
    /// Bars compared for bucket transitions, trend flips and range breaks.
    pub transition_lag: usize,
    /// Drawdown window.
    pub drawdown_window: usize,
    /// SMA period.
    pub sma_period: usize,
    /// Bars between the two SMA values of the slope.
    pub slope_lag: usize,
    /// Relative slope per bar below which the trend is FLAT.
    pub flat_slope_threshold: f64,
    /// Window for trend persistence.
    pub persistence_window: usize,
    /// Persistence below which the market is ranging.
    pub range_persistence: f64,
    /// Bars of the shock return.
    pub shock_window: usize,
    /// Shock return at or below which a bar is a shock.
    pub shock_return_threshold: f64,
    /// Local window for rebound-from-low.
    pub rebound_window: usize,
    /// Rebound at or above which the recovery is V-shaped.
    pub v_rebound_threshold: f64,
    /// Drawdown speed (per bar) at or above which a crash is FAST.
    pub fast_crash_speed: f64,
    /// Drawdown at or below which a crash is considered at all.
    pub min_crash_drawdown: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_lookback: 60,
            vol_short_window: 20,
            vol_long_window: 60,
            vol_p33: 0.12,
            vol_p66: 0.20,
            expansion_ratio: 1.2,
            contraction_ratio: 0.8,
            transition_lag: 5,
            drawdown_window: 60,
            sma_period: 50,
            slope_lag: 10,
            flat_slope_threshold: 0.0005,
            persistence_window: 30,
            range_persistence: 0.55,
            shock_window: 5,
            shock_return_threshold: -0.10,
            rebound_window: 10,
            v_rebound_threshold: 0.05,
            fast_crash_speed: 0.015,
            min_crash_drawdown: -0.10,
        }
    }
}

/// Feature vector for one evaluation bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeFeatures {
    // Volatility
    pub vol_20: f64,
    pub vol_60: f64,
    pub vol_bucket: VolBucket,
    pub vol_bucket_prev: VolBucket,
    pub is_expanding: bool,
    pub is_contracting: bool,

    // Drawdown
    pub max_drawdown: f64,
    pub dd_speed: f64,
    pub days_to_trough: usize,

    // Trend
    pub sma_50: f64,
    pub sma_slope: f64,
    pub sma_slope_prev: f64,
    pub trend_direction: TrendDirection,
    pub trend_direction_prev: TrendDirection,
    pub trend_persistence: f64,

    // Transitions
    pub is_range: bool,
    pub is_trend_flip: bool,
    pub is_range_breaking: bool,

    // Shock / rebound
    pub shock_return: f64,
    pub rebound: f64,
    pub is_shock: bool,
    pub is_v_shape: bool,

    // Crisis typology
    pub crash_speed: CrashSpeed,
    pub rebound_type: ReboundType,
}

/// Drawdown statistics over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownStats {
    /// Most negative peak-to-point return (0 when there is none).
    pub max_drawdown: f64,
    /// |max drawdown| per bar from the peak to the trough.
    pub speed: f64,
    /// Bars from the peak to the trough.
    pub days_to_trough: usize,
}

/// Pure feature calculator.
#[derive(Debug, Clone, Default)]
pub struct FeatureCalculator {
    config: FeatureConfig,
}

impl FeatureCalculator {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Compute features for the last bar of `closes`.
    ///
    /// Returns `None` when fewer than `min_lookback` bars are available.
    pub fn compute(&self, closes: &[f64]) -> Option<RegimeFeatures> {
        let cfg = &self.config;
        if closes.len() < cfg.min_lookback.max(2) {
            return None;
        }
        let lag = cfg.transition_lag;
        let lagged = &closes[..closes.len().saturating_sub(lag).max(2)];

        // Volatility
        let vol_20 = realized_vol(closes, cfg.vol_short_window);
        let vol_60 = realized_vol(closes, cfg.vol_long_window);
        let vol_bucket = self.vol_bucket(vol_20);
        let vol_bucket_prev = self.vol_bucket(realized_vol(lagged, cfg.vol_short_window));
        let is_expanding = vol_60 > 0.0 && vol_20 >= vol_60 * cfg.expansion_ratio;
        let is_contracting = vol_60 > 0.0 && vol_20 <= vol_60 * cfg.contraction_ratio;

        // Drawdown
        let dd = drawdown(tail(closes, cfg.drawdown_window));

        // Trend
        let sma_50 = sma(closes, closes.len(), cfg.sma_period).unwrap_or(0.0);
        let slope_now = sma_slope(closes, closes.len(), cfg.sma_period, cfg.slope_lag).unwrap_or(0.0);
        let sma_slope_prev = closes
            .len()
            .checked_sub(lag)
            .and_then(|end| sma_slope(closes, end, cfg.sma_period, cfg.slope_lag))
            .unwrap_or(slope_now);
        let trend_direction = self.trend_direction(slope_now, sma_50);
        let prev_sma = closes
            .len()
            .checked_sub(lag)
            .and_then(|end| sma(closes, end, cfg.sma_period))
            .unwrap_or(sma_50);
        let trend_direction_prev = self.trend_direction(sma_slope_prev, prev_sma);
        let trend_persistence = persistence(closes, cfg.persistence_window);

        // Transitions
        let is_range = trend_persistence < cfg.range_persistence;
        let was_range = persistence(lagged, cfg.persistence_window) < cfg.range_persistence;
        let is_trend_flip = trend_direction != trend_direction_prev;
        let is_range_breaking = is_range != was_range;

        // Shock / rebound
        let shock_return = worst_shock_return(closes, cfg.shock_window, cfg.rebound_window);
        let rebound = rebound_from_low(tail(closes, cfg.rebound_window));
        let is_shock = shock_return <= cfg.shock_return_threshold;
        let is_v_shape = is_shock && rebound >= cfg.v_rebound_threshold;

        // Crisis typology
        let crash_speed = if dd.max_drawdown > cfg.min_crash_drawdown {
            CrashSpeed::None
        } else if dd.speed >= cfg.fast_crash_speed {
            CrashSpeed::Fast
        } else {
            CrashSpeed::Slow
        };
        let rebound_type = match crash_speed {
            CrashSpeed::None => ReboundType::None,
            _ if rebound >= cfg.v_rebound_threshold => ReboundType::VShape,
            _ => ReboundType::NonV,
        };

        Some(RegimeFeatures {
            vol_20,
            vol_60,
            vol_bucket,
            vol_bucket_prev,
            is_expanding,
            is_contracting,
            max_drawdown: dd.max_drawdown,
            dd_speed: dd.speed,
            days_to_trough: dd.days_to_trough,
            sma_50,
            sma_slope: slope_now,
            sma_slope_prev,
            trend_direction,
            trend_direction_prev,
            trend_persistence,
            is_range,
            is_trend_flip,
            is_range_breaking,
            shock_return,
            rebound,
            is_shock,
            is_v_shape,
            crash_speed,
            rebound_type,
        })
    }

    /// Bucket an annualized volatility. MEDIUM starts at P33, HIGH at P66.
    pub fn vol_bucket(&self, vol: f64) -> VolBucket {
        if vol >= self.config.vol_p66 {
            VolBucket::High
        } else if vol >= self.config.vol_p33 {
            VolBucket::Medium
        } else {
            VolBucket::Low
        }
    }

    /// Bucket an SMA slope, measured relative to the SMA level.
    pub fn trend_direction(&self, slope: f64, sma: f64) -> TrendDirection {
        if sma <= 0.0 {
            return TrendDirection::Flat;
        }
        let relative = slope / sma;
        if relative > self.config.flat_slope_threshold {
            TrendDirection::Up
        } else if relative < -self.config.flat_slope_threshold {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        }
    }
}

fn tail(closes: &[f64], n: usize) -> &[f64] {
    &closes[closes.len().saturating_sub(n)..]
}

/// Daily log returns.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Annualized realized volatility of the last `window` returns.
pub fn realized_vol(closes: &[f64], window: usize) -> f64 {
    let returns = log_returns(tail(closes, window + 1));
    if returns.len() < 2 {
        return 0.0;
    }
    let std_dev = returns.iter().std_dev();
    if std_dev.is_finite() {
        std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Running-peak drawdown over the whole slice.
pub fn drawdown(closes: &[f64]) -> DrawdownStats {
    let mut stats = DrawdownStats {
        max_drawdown: 0.0,
        speed: 0.0,
        days_to_trough: 0,
    };
    let Some(&first) = closes.first() else {
        return stats;
    };

    let mut peak = first;
    let mut peak_idx = 0;
    for (i, &close) in closes.iter().enumerate() {
        if close >= peak {
            peak = close;
            peak_idx = i;
            continue;
        }
        let dd = (close - peak) / peak;
        if dd < stats.max_drawdown {
            stats.max_drawdown = dd;
            stats.days_to_trough = i - peak_idx;
        }
    }

    stats.speed = stats.max_drawdown.abs() / stats.days_to_trough.max(1) as f64;
    stats
}

/// Simple moving average of the `period` closes ending before `end`.
pub fn sma(closes: &[f64], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end > closes.len() || end < period {
        return None;
    }
    Some(closes[end - period..end].iter().sum::<f64>() / period as f64)
}

/// Per-bar SMA slope: `(SMA(end) - SMA(end - lag)) / lag`.
pub fn sma_slope(closes: &[f64], end: usize, period: usize, lag: usize) -> Option<f64> {
    if lag == 0 {
        return None;
    }
    let now = sma(closes, end, period)?;
    let before = sma(closes, end.checked_sub(lag)?, period)?;
    Some((now - before) / lag as f64)
}

/// Fraction of the dominant daily direction over the last `window` returns.
pub fn persistence(closes: &[f64], window: usize) -> f64 {
    let recent = tail(closes, window + 1);
    let days = recent.len().saturating_sub(1);
    if days == 0 {
        return 0.0;
    }
    let ups = recent.windows(2).filter(|w| w[1] > w[0]).count();
    let downs = recent.windows(2).filter(|w| w[1] < w[0]).count();
    ups.max(downs) as f64 / days as f64
}

/// Most negative `shock_window`-bar return ending inside the last `within` bars.
pub fn worst_shock_return(closes: &[f64], shock_window: usize, within: usize) -> f64 {
    let n = closes.len();
    let first_end = n.saturating_sub(within).max(shock_window);
    (first_end..n)
        .map(|t| closes[t] / closes[t - shock_window] - 1.0)
        .fold(0.0, f64::min)
}

/// `(max after the local low - local low) / local low`.
pub fn rebound_from_low(window: &[f64]) -> f64 {
    let Some((low_idx, &low)) = window
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
    else {
        return 0.0;
    };
    if low <= 0.0 {
        return 0.0;
    }
    let high_after = window[low_idx..].iter().copied().fold(low, f64::max);
    (high_after - low) / low
}
