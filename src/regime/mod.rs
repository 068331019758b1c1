//! Market regime classification module.
//!
//! Two pure stages:
//! - `features`: close series -> feature vector (volatility, drawdown,
//!   trend, shock/rebound, crisis typology)
//! - `classifier`: feature vector -> one tag, via an ordered rule table

pub mod classifier;
pub mod features;
pub mod tags;

pub use classifier::{
    ClassifierConfig, RegimeClassifier, RegimeDistribution, RegimeRule, RegimeStats,
    PRIORITY_RULES, TRANSITION_RULES,
};
pub use features::{
    CrashSpeed, FeatureCalculator, FeatureConfig, ReboundType, RegimeFeatures, TrendDirection,
    VolBucket,
};
pub use tags::{RegimeTag, RiskLevel, UnknownRegimeTag, UsefulRegimes};
