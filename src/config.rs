//! Engine configuration.
//!
//! Every threshold the engine uses lives in one of these sections. A TOML
//! file only needs the keys it overrides:
//!
//! ```toml
//! [gates]
//! min_live_samples = 10
//!
//! [[backtest.stress_periods]]
//! name = "FLASH_CRASH"
//! start = "2010-05-01"
//! end = "2010-07-31"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::{SkillConfig, StabilityConfig};
use crate::backtest::BacktestConfig;
use crate::constitution::PolicyConfig;
use crate::data::CohortConfig;
use crate::governance::GateConfig;
use crate::pipeline::{OutcomeConfig, RecomputeConfig};
use crate::regime::{ClassifierConfig, FeatureConfig, UsefulRegimes};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub cohorts: CohortConfig,
    pub recompute: RecomputeConfig,
    pub outcomes: OutcomeConfig,
    pub skill: SkillConfig,
    pub stability: StabilityConfig,
    pub policy: PolicyConfig,
    pub gates: GateConfig,
    pub backtest: BacktestConfig,
    pub useful_regimes: UsefulRegimes,
}

impl EngineConfig {
    /// Load a TOML file. Missing sections and keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a pipeline loop forever or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recompute.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "recompute.chunk_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.outcomes.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "outcomes.batch_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.features.vol_p33 >= self.features.vol_p66 {
            return Err(ConfigError::Invalid {
                field: "features.vol_p33",
                reason: format!(
                    "{} must be below vol_p66 {}",
                    self.features.vol_p33, self.features.vol_p66
                ),
            });
        }
        if self.features.min_lookback < self.features.vol_long_window {
            return Err(ConfigError::Invalid {
                field: "features.min_lookback",
                reason: format!(
                    "{} is shorter than the long vol window {}",
                    self.features.min_lookback, self.features.vol_long_window
                ),
            });
        }
        if let Some(p) = self.backtest.stress_periods.iter().find(|p| p.start > p.end) {
            return Err(ConfigError::Invalid {
                field: "backtest.stress_periods",
                reason: format!("{} starts after it ends", p.name),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeTag;
    use chrono::NaiveDate;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.recompute.chunk_size, 1_000);
        assert_eq!(config.outcomes.batch_size, 5_000);
        assert_eq!(config.backtest.stress_periods.len(), 5);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [gates]
            min_live_samples = 10

            [policy]
            allow_skill = 0.05

            [useful_regimes]
            tags = ["CRISIS_FAST_V"]
            "#,
        )
        .unwrap();
        assert_eq!(config.gates.min_live_samples, 10);
        assert_eq!(config.gates.live_window_days, 30);
        assert_eq!(config.policy.allow_skill, 0.05);
        assert_eq!(config.policy.block_skill, -0.02);
        assert_eq!(config.useful_regimes.tags, vec![RegimeTag::CrisisFastV]);
    }

    #[test]
    fn test_load_from_file_with_stress_periods() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[backtest.stress_periods]]
            name = "FLASH_CRASH"
            start = "2010-05-01"
            end = "2010-07-31"
            "#
        )
        .unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.backtest.stress_periods.len(), 1);
        assert_eq!(
            config.backtest.stress_periods[0].start,
            NaiveDate::from_ymd_opt(2010, 5, 1).unwrap()
        );
        assert_eq!(config.backtest.max_cagr_loss, 0.02);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml("[recompute]\nchunk_size = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "recompute.chunk_size",
                ..
            }
        ));
        let err = EngineConfig::from_toml("[features]\nvol_p33 = 0.3").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(matches!(
            EngineConfig::from_toml("gates = 3").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
