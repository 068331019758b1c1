//! Performance metrics module.
//!
//! Provides performance calculations for daily return series:
//! - Compounded total return, CAGR
//! - Sharpe ratio, Sortino ratio
//! - Maximum drawdown via running peak
//! - Hit rate

pub mod calculator;

pub use calculator::{DrawdownAnalysis, MetricsCalculator, PerformanceMetrics};
