use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::{JobError, JobId, JobRecord, JobRequest, Transition};

pub const DEFAULT_REGISTRY_CAPACITY: usize = 1024;

/// Authoritative JobId -> JobRecord mapping.
///
/// Records are kept in a `BTreeMap` keyed by an insertion sequence number so
/// that `list` is ordered by submission and stays stable across calls.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    records: BTreeMap<u64, JobRecord>,
    index: HashMap<JobId, u64>,
    next_seq: u64,
    capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding at most `capacity` records, terminal ones included.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a `Queued` record under a fresh identifier.
    pub fn create(&mut self, request: JobRequest) -> Result<JobId, JobError> {
        if self.records.len() >= self.capacity {
            return Err(JobError::OutOfCapacity {
                capacity: self.capacity,
            });
        }

        let id = loop {
            let candidate = JobId::generate();
            if !self.index.contains_key(&candidate) {
                break candidate;
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;

        self.records
            .insert(seq, JobRecord::queued(id.clone(), request, Utc::now()));
        self.index.insert(id.clone(), seq);
        Ok(id)
    }

    pub fn get(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.record(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.clone()))
    }

    pub fn record(&self, id: &JobId) -> Option<&JobRecord> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    /// Snapshot of every record in submission order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.records.values().cloned().collect()
    }

    /// Records that have not reached a terminal state, in submission order.
    pub fn active(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values().filter(|record| !record.is_terminal())
    }

    /// Applies `transition` to the record if the state machine allows it.
    ///
    /// Status and the fields that belong to it change together; on error the
    /// record is left untouched.
    pub fn transition(
        &mut self,
        id: &JobId,
        transition: Transition,
    ) -> Result<&JobRecord, JobError> {
        let record = self
            .index
            .get(id)
            .and_then(|seq| self.records.get_mut(seq))
            .ok_or_else(|| JobError::NotFound(id.clone()))?;

        let to = transition.target();
        if !record.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                id: id.clone(),
                from: record.status,
                to,
            });
        }

        match transition {
            Transition::Start => record.progress = 0.0,
            Transition::Progress(percent) => {
                if percent.is_finite() {
                    record.progress = percent.clamp(0.0, 100.0);
                }
            }
            Transition::Finish(output) => {
                record.result = Some(output);
                record.progress = 100.0;
            }
            Transition::Fail(message) => record.error = Some(message),
            Transition::BeginTermination | Transition::ConfirmTermination => {}
        }
        record.status = to;
        record.updated_at = Utc::now();
        Ok(record)
    }

    /// Deletes a record that has reached a terminal state.
    pub fn remove(&mut self, id: &JobId) -> Result<JobRecord, JobError> {
        let seq = *self
            .index
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        match self.records.get(&seq) {
            Some(record) if !record.is_terminal() => {
                return Err(JobError::StillActive {
                    id: id.clone(),
                    status: record.status,
                })
            }
            Some(_) => {}
            None => return Err(JobError::NotFound(id.clone())),
        }
        self.index.remove(id);
        self.records
            .remove(&seq)
            .ok_or_else(|| JobError::NotFound(id.clone()))
    }
}
