//! Background jobs.
//!
//! Batch work is CPU-bound, so each job runs on the blocking pool. Every job
//! gets a child of the runner's shutdown token; the pipelines check it at
//! chunk and batch boundaries.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

/// Handle to a running job.
pub struct JobHandle<T> {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<EngineResult<T>>,
}

impl<T> JobHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the job to stop at its next boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> EngineResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(EngineError::Job {
                name: self.name,
                reason: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Run `work` on the blocking pool with its own cancellation token.
    pub fn spawn<T, F>(&self, name: &str, work: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> EngineResult<T> + Send + 'static,
    {
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let job_name = name.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            if token.is_cancelled() {
                warn!("Job {} cancelled before start", job_name);
                return Err(EngineError::Cancelled);
            }
            info!("Job {} started", job_name);
            let result = work(token);
            match &result {
                Ok(_) => info!("Job {} finished", job_name),
                Err(e) => warn!("Job {} failed: {}", job_name, e),
            }
            result
        });
        JobHandle {
            name: name.to_string(),
            cancel,
            handle,
        }
    }

    /// Cancel every job spawned by this runner.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
