//! Batch pipelines.
//!
//! Provides:
//! - Chunked, cursor-resumable regime recompute
//! - Batched outcome generation for the benchmark predictor
//! - Background job runner with cancellation
//!
//! Batches commit independently through idempotent upserts, so a failed or
//! cancelled run can be resumed from its cursor.

pub mod jobs;
pub mod outcomes;
pub mod recompute;

use indicatif::ProgressBar;

pub use jobs::{JobHandle, JobRunner};
pub use outcomes::{
    expected_direction, parse_horizons, OutcomeConfig, OutcomeGenerator, OutcomeRequest,
    OutcomeSummary,
};
pub use recompute::{RecomputeConfig, RecomputeEngine, RecomputeRequest, RecomputeSummary};

/// Receives progress at chunk and batch boundaries.
pub trait ProgressSink: Send + Sync {
    fn start(&self, total: u64);
    fn advance(&self, delta: u64);
    fn finish(&self, message: &str);
}

impl ProgressSink for ProgressBar {
    fn start(&self, total: u64) {
        self.set_length(total);
        self.set_position(0);
    }

    fn advance(&self, delta: u64) {
        self.inc(delta);
    }

    fn finish(&self, message: &str) {
        self.finish_with_message(message.to_string());
    }
}

/// Progress sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: u64) {}
    fn advance(&self, _delta: u64) {}
    fn finish(&self, _message: &str) {}
}
