use std::sync::mpsc;

use sds_core::{JobId, JobOutput, JobRequest};

use crate::{EngineError, EngineEvent};

/// Receives progress reports for the job it was created for.
pub trait ProgressSink: Send + Sync {
    /// Reports completion as a percentage in `0.0..=100.0`.
    fn progress(&self, percent: f64);
}

pub(crate) struct ChannelProgressSink {
    job_id: JobId,
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub(crate) fn new(job_id: JobId, tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { job_id, tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn progress(&self, percent: f64) {
        let _ = self.tx.send(EngineEvent::Progress {
            job_id: self.job_id.clone(),
            percent,
        });
    }
}

/// The stateful compute engine that performs synthesis and evaluation.
///
/// The engine is driven from a single dedicated thread: `accept` calls are
/// made one at a time and awaited before the next request is looked at, while
/// `run` futures of accepted jobs execute concurrently on the engine's
/// runtime. A `run` future is dropped when its job is aborted; `abort` is then
/// awaited and its completion is the abort confirmation.
#[async_trait::async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Admits a job into the engine context. An error rejects the job.
    async fn accept(&self, _job_id: &JobId, _request: &JobRequest) -> Result<(), EngineError> {
        Ok(())
    }

    async fn run(
        &self,
        job_id: &JobId,
        request: &JobRequest,
        sink: &dyn ProgressSink,
    ) -> Result<JobOutput, EngineError>;

    /// Releases whatever the engine still holds for an aborted job.
    async fn abort(&self, _job_id: &JobId) -> Result<(), EngineError> {
        Ok(())
    }

    /// Releases engine-wide resources. Called exactly once, on shutdown.
    fn dispose(&self) {}
}
