use thiserror::Error;

use crate::{JobId, JobStatus, ParameterError};

/// Coarse classification of [`JobError`], stable for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameters,
    NotFound,
    InvalidTransition,
    EngineFailure,
    SubscriberFailure,
    ManagerDisposed,
    OutOfCapacity,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("invalid job parameters: {0}")]
    InvalidParameters(#[from] ParameterError),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id} is still {status} and cannot be removed")]
    StillActive { id: JobId, status: JobStatus },
    #[error("compute engine failure: {0}")]
    EngineFailure(String),
    #[error("subscriber {subscription} failed: {message}")]
    SubscriberFailure { subscription: u64, message: String },
    #[error("job manager has been disposed")]
    ManagerDisposed,
    #[error("job registry is full ({capacity} jobs)")]
    OutOfCapacity { capacity: usize },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            JobError::NotFound(_) => ErrorKind::NotFound,
            JobError::InvalidTransition { .. } | JobError::StillActive { .. } => {
                ErrorKind::InvalidTransition
            }
            JobError::EngineFailure(_) => ErrorKind::EngineFailure,
            JobError::SubscriberFailure { .. } => ErrorKind::SubscriberFailure,
            JobError::ManagerDisposed => ErrorKind::ManagerDisposed,
            JobError::OutOfCapacity { .. } => ErrorKind::OutOfCapacity,
        }
    }
}
