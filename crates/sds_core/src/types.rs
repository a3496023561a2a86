use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JobOutput;

/// Opaque job identifier, unique for the lifetime of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Synthesis,
    Evaluation,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Synthesis => write!(f, "synthesis"),
            JobKind::Evaluation => write!(f, "evaluation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Started,
    Progressing,
    Finished,
    Terminating,
    Terminated,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Terminated | JobStatus::Failed
        )
    }

    /// Whether the engine is (or may be) holding resources for the job.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            JobStatus::Started | JobStatus::Progressing | JobStatus::Terminating
        )
    }

    /// Edges of the job state machine. Terminal states have no outgoing edges.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Started)
                | (Queued, Failed)
                | (Queued, Terminated)
                | (Started, Progressing)
                | (Progressing, Progressing)
                | (Started | Progressing, Finished | Failed | Terminating)
                | (Terminating, Terminated)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Progressing => "progressing",
            JobStatus::Finished => "finished",
            JobStatus::Terminating => "terminating",
            JobStatus::Terminated => "terminated",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A state change together with the fields that change with it.
///
/// Carrying the payload in the variant keeps a record from ever holding a
/// status without its data (e.g. `Finished` without a result).
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Start,
    Progress(f64),
    Finish(Arc<JobOutput>),
    Fail(String),
    BeginTermination,
    ConfirmTermination,
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Started,
            Transition::Progress(_) => JobStatus::Progressing,
            Transition::Finish(_) => JobStatus::Finished,
            Transition::Fail(_) => JobStatus::Failed,
            Transition::BeginTermination => JobStatus::Terminating,
            Transition::ConfirmTermination => JobStatus::Terminated,
        }
    }
}
