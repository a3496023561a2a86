use std::sync::Arc;

use chrono::{DateTime, Utc};
use sds_core::{JobId, JobKind, JobOutput, JobRecord, JobStatus};
use serde::Serialize;

/// Outcome of one session job, as printed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub id: Option<JobId>,
    pub kind: JobKind,
    /// `None` when the job never made it into the manager.
    pub status: Option<JobStatus>,
    pub progress: f64,
    pub error: Option<String>,
    pub elapsed_ms: Option<i64>,
    pub result: Option<Arc<JobOutput>>,
}

impl JobSummary {
    pub fn from_record(name: &str, record: &JobRecord) -> Self {
        Self {
            name: name.to_string(),
            id: Some(record.id.clone()),
            kind: record.kind,
            status: Some(record.status),
            progress: record.progress,
            error: record.error.clone(),
            elapsed_ms: Some((record.updated_at - record.created_at).num_milliseconds()),
            result: record.result.clone(),
        }
    }

    /// A job that was never submitted, with the reason.
    pub fn not_submitted(name: &str, kind: JobKind, reason: String) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            kind,
            status: None,
            progress: 0.0,
            error: Some(reason),
            elapsed_ms: None,
            result: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Some(JobStatus::Finished)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<JobSummary>,
}

impl SessionReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn failures(&self) -> usize {
        self.jobs.iter().filter(|job| !job.succeeded()).count()
    }
}
