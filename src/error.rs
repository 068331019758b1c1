//! Top-level error type.
//!
//! Only failures that abort an operation live here. Expected outcomes are
//! values instead:
//! - absent constitutions/versions on read paths are `Option::None`
//! - failed apply gates are an `ApplyGateReport` with `can_apply == false`
//! - rejected governance transitions are a `TransitionResult` with `success == false`
//! - bars with insufficient history are counted as skipped

use thiserror::Error;

use crate::config::ConfigError;
use crate::data::LoaderError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Underlying store unavailable or misconfigured. Fatal for the operation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unsupported parameter, rejected before any computation.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Background job cancelled before it started.
    #[error("Job cancelled")]
    Cancelled,

    /// Background job panicked or was aborted by the runtime.
    #[error("Job {name} failed: {reason}")]
    Job { name: String, reason: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error came from an unusable store.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Store(StoreError::Unavailable(_))
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
