use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{JobId, JobKind, JobOutput, JobRequest, JobStatus};

/// Committed state of one job. Only the registry mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub request: JobRequest,
    /// Set exactly when the job enters `Finished`.
    pub result: Option<Arc<JobOutput>>,
    /// Failure detail, set exactly when the job enters `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) fn queued(id: JobId, request: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: request.kind(),
            status: JobStatus::Queued,
            progress: 0.0,
            request,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
