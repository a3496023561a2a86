use std::any::Any;

use sds_core::{JobError, JobId, JobOutput};
use thiserror::Error;

/// Message from the engine thread, tagged with the job it concerns.
///
/// Every accepted job produces exactly one of `Finished`, `Failed` or
/// `Aborted`; a rejected job produces only `Rejected`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started { job_id: JobId },
    Rejected { job_id: JobId, error: EngineError },
    Progress { job_id: JobId, percent: f64 },
    Finished { job_id: JobId, output: JobOutput },
    Failed { job_id: JobId, error: EngineError },
    Aborted { job_id: JobId },
}

impl EngineEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            EngineEvent::Started { job_id }
            | EngineEvent::Rejected { job_id, .. }
            | EngineEvent::Progress { job_id, .. }
            | EngineEvent::Finished { job_id, .. }
            | EngineEvent::Failed { job_id, .. }
            | EngineEvent::Aborted { job_id } => job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("job rejected: {0}")]
    Rejected(String),
    #[error("computation failed: {0}")]
    Computation(String),
    #[error("engine panicked: {0}")]
    Panicked(String),
    #[error("compute engine is unreachable")]
    Unreachable,
}

impl From<EngineError> for JobError {
    fn from(err: EngineError) -> Self {
        JobError::EngineFailure(err.to_string())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
