use crate::{JobId, JobRecord, JobStatus};

/// Whether an event reports a transition as it happened or replays current
/// state to a newly registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Live,
    Replay,
}

/// Lifecycle event: the committed record right after a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub record: JobRecord,
    pub origin: EventOrigin,
}

impl JobEvent {
    pub fn live(record: JobRecord) -> Self {
        Self {
            record,
            origin: EventOrigin::Live,
        }
    }

    pub fn replay(record: JobRecord) -> Self {
        Self {
            record,
            origin: EventOrigin::Replay,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.record.id
    }

    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    pub fn is_terminal(&self) -> bool {
        self.record.is_terminal()
    }

    /// Live progress events are the only ones that may be coalesced.
    pub fn is_coalescable(&self) -> bool {
        self.origin == EventOrigin::Live && self.record.status == JobStatus::Progressing
    }
}
