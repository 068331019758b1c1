pub mod analytics;
pub mod backtest;
pub mod config;
pub mod constitution;
pub mod data;
pub mod error;
pub mod governance;
pub mod metrics;
pub mod pipeline;
pub mod regime;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use analytics::{SkillMatrix, SkillMatrixBuilder, StabilityAnalyzer, StabilityReport};
pub use backtest::{BacktestResult, Backtester, FullBacktestResult, Verdict};
pub use config::{ConfigError, EngineConfig};
pub use constitution::{Constitution, ConstitutionBuilder, PolicyStatus, RegimePolicy};
pub use data::{Candle, CandleLoader, Horizon, Outcome, RegimeRecord};
pub use error::{EngineError, EngineResult};
pub use governance::{ApplyGateReport, ConstitutionVersion, GovernanceStatus, TransitionResult};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use pipeline::{JobRunner, OutcomeGenerator, RecomputeEngine};
pub use regime::{RegimeClassifier, RegimeFeatures, RegimeTag};
pub use service::RegimeService;
pub use store::{InMemoryStore, Store, StoreError};
