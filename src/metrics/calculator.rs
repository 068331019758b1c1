//! Performance metrics calculator.
//!
//! Calculates performance statistics for a daily return series. Every
//! backtest track (raw, filtered, buy & hold) goes through the same routine.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::regime::features::TRADING_DAYS_PER_YEAR;

/// Performance metrics of one return series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub trading_days: usize,

    // Return metrics
    /// Compounded total return as a fraction.
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,

    // Risk metrics
    /// Largest peak-to-trough loss as a positive fraction.
    pub max_drawdown: f64,
    pub avg_drawdown: f64,

    // Risk-adjusted returns
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    /// Fraction of days with a positive return.
    pub hit_rate: f64,
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Days: {}\n\
             Total Return: {:.2}%\n\
             CAGR: {:.2}%\n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             Hit Rate: {:.1}%",
            self.trading_days,
            self.total_return * 100.0,
            self.cagr * 100.0,
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.hit_rate * 100.0
        )
    }
}

/// Drawdown analysis details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    pub max_drawdown: f64,
    /// Index into the return series where the worst drawdown's peak was set.
    pub peak_index: Option<usize>,
    pub trough_index: Option<usize>,
    pub avg_drawdown: f64,
    pub drawdown_periods: usize,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from daily returns.
    pub fn calculate(returns: &[f64]) -> PerformanceMetrics {
        let trading_days = returns.len();
        let total_return = Self::total_return(returns);
        let cagr = Self::calculate_cagr(total_return, trading_days);
        let drawdown = Self::analyze_drawdown(returns);
        let volatility = if returns.len() < 2 {
            0.0
        } else {
            returns.std_dev() * TRADING_DAYS_PER_YEAR.sqrt()
        };
        let calmar_ratio = if drawdown.max_drawdown > 0.0 {
            cagr / drawdown.max_drawdown
        } else {
            0.0
        };
        let hit_rate = if returns.is_empty() {
            0.0
        } else {
            returns.iter().filter(|&&r| r > 0.0).count() as f64 / returns.len() as f64
        };

        PerformanceMetrics {
            trading_days,
            total_return,
            cagr,
            volatility,
            max_drawdown: drawdown.max_drawdown,
            avg_drawdown: drawdown.avg_drawdown,
            sharpe_ratio: Self::calculate_sharpe(returns),
            sortino_ratio: Self::calculate_sortino(returns),
            calmar_ratio,
            hit_rate,
        }
    }

    /// Compounded total return.
    pub fn total_return(returns: &[f64]) -> f64 {
        returns.iter().fold(1.0, |equity, r| equity * (1.0 + r)) - 1.0
    }

    /// Calculate CAGR (Compound Annual Growth Rate).
    pub fn calculate_cagr(total_return: f64, trading_days: usize) -> f64 {
        if trading_days == 0 {
            return 0.0;
        }
        let growth = 1.0 + total_return;
        if growth <= 0.0 {
            return -1.0;
        }
        let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
        growth.powf(1.0 / years) - 1.0
    }

    /// Annualized Sharpe ratio (risk-free rate 0). Zero when there is no variance.
    pub fn calculate_sharpe(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std_dev = returns.std_dev();
        if !std_dev.is_finite() || std_dev <= f64::EPSILON {
            return 0.0;
        }
        returns.mean() / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Calculate Sortino ratio (downside deviation).
    pub fn calculate_sortino(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).collect();
        if downside.is_empty() {
            return 0.0;
        }
        let downside_dev = (downside.iter().sum::<f64>() / returns.len() as f64).sqrt();
        if downside_dev <= f64::EPSILON {
            return 0.0;
        }
        returns.mean() / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Running-peak drawdown of the compounded equity curve.
    pub fn analyze_drawdown(returns: &[f64]) -> DrawdownAnalysis {
        let mut equity = 1.0;
        let mut peak = 1.0;
        let mut peak_index = None;
        let mut analysis = DrawdownAnalysis::default();
        let mut drawdowns = Vec::new();
        let mut in_drawdown = false;

        for (i, r) in returns.iter().enumerate() {
            equity *= 1.0 + r;
            if equity >= peak {
                if in_drawdown {
                    analysis.drawdown_periods += 1;
                    in_drawdown = false;
                }
                peak = equity;
                peak_index = Some(i);
                continue;
            }
            in_drawdown = true;
            let drawdown = (peak - equity) / peak;
            drawdowns.push(drawdown);
            if drawdown > analysis.max_drawdown {
                analysis.max_drawdown = drawdown;
                analysis.peak_index = peak_index;
                analysis.trough_index = Some(i);
            }
        }
        if in_drawdown {
            analysis.drawdown_periods += 1;
        }
        if !drawdowns.is_empty() {
            analysis.avg_drawdown = drawdowns.iter().sum::<f64>() / drawdowns.len() as f64;
        }
        analysis
    }
}
