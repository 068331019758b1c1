//! Constitution backtesting.
//!
//! This module replays history with a constitution's filters applied:
//! - Single-range backtests against an unfiltered baseline
//! - Per-regime breakdown of where exposure was cut
//! - Verdicts from drawdown, Sharpe and CAGR impact
//! - A stress-period suite with an aggregate recommendation

pub mod engine;
pub mod periods;

pub use engine::{
    aggregate_verdicts, determine_verdict, BacktestConfig, BacktestImpact, BacktestResult,
    Backtester, FullBacktestResult, PeriodOutcome, RegimeBreakdown, Verdict,
};
pub use periods::{default_stress_periods, StressPeriod};
