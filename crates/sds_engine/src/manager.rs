use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{mpsc, Arc, Weak};
use std::thread;

use engine_logging::{engine_debug, engine_error, engine_info, engine_trace, engine_warn};
use futures_util::future::join_all;
use parking_lot::Mutex;
use sds_core::{
    JobError, JobEvent, JobId, JobKind, JobObserver, JobRecord, JobRegistry, JobRequest,
    JobStatus, ParameterError, Transition,
};
use tokio::sync::oneshot;

use crate::broadcast::{Broadcaster, SubscriptionId};
use crate::compute::ComputeEngine;
use crate::{EngineError, EngineEvent, EngineHandle, ManagerConfig, SetupError};

/// Owns the lifecycle of synthesis and evaluation jobs run by one engine.
///
/// Registry, broadcaster and dispatch bookkeeping live behind a single lock;
/// public operations and engine events are each applied to completion under
/// it, so queries never observe a half-applied transition. Engine events are
/// applied by a dedicated pump thread in the order the engine emitted them.
pub struct JobManager {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ManagerState>,
    engine: EngineHandle,
}

struct ManagerState {
    registry: JobRegistry,
    broadcaster: Broadcaster,
    /// Submitted jobs not yet handed to the engine, in submission order.
    pending: VecDeque<JobId>,
    /// Job handed to the engine whose acceptance has not arrived yet.
    dispatching: Option<JobId>,
    /// Jobs holding an engine slot: accepted and not yet let go by the engine.
    accepted: HashSet<JobId>,
    /// Jobs cancelled while the engine was deciding on them; whatever the
    /// engine still reports for them is absorbed here.
    abandoned: HashSet<JobId>,
    waiters: HashMap<JobId, Vec<oneshot::Sender<()>>>,
    max_concurrent_jobs: usize,
    disposed: bool,
}

impl JobManager {
    pub fn new(engine: Arc<dyn ComputeEngine>, config: ManagerConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let (engine, events) = EngineHandle::spawn(engine, config.engine.clone());
        let shared = Arc::new(Shared {
            state: Mutex::new(ManagerState::new(&config)),
            engine,
        });

        let pump = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("sds-job-pump".to_string())
            .spawn(move || pump_engine_events(pump, events))?;

        engine_info!(
            "job manager ready (max {} concurrent jobs, registry capacity {})",
            config.max_concurrent_jobs,
            config.registry_capacity
        );
        Ok(Self { shared })
    }

    /// Validates and registers a job, then returns without waiting for the engine.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(JobError::ManagerDisposed);
        }
        request.validate()?;
        if let Some(dependency) = request.synthesis_dependency() {
            state.check_synthesis_dependency(dependency)?;
        }

        let kind = request.kind();
        let id = state.registry.create(request)?;
        engine_info!(job = id; "submitted {} job", kind);
        state.publish_current(&id);
        state.pending.push_back(id.clone());
        state.dispatch_next(&self.shared.engine);
        Ok(id)
    }

    /// Cancels a job and resolves once it has reached a terminal state.
    ///
    /// Queued jobs are terminated on the spot, even when the engine is still
    /// deciding whether to accept them. Running jobs move to `Terminating` and
    /// become `Terminated` when the engine confirms the abort. Terminal jobs
    /// are left alone.
    pub async fn cancel(&self, id: &JobId) -> Result<(), JobError> {
        let confirmation = {
            let mut state = self.shared.state.lock();
            state.request_cancel(&self.shared.engine, id)?
        };
        match confirmation {
            Some(confirmation) => confirmation.await.map_err(|_| {
                JobError::EngineFailure("job manager dropped before the abort was confirmed".into())
            }),
            None => Ok(()),
        }
    }

    pub fn get_all(&self) -> Vec<JobRecord> {
        self.shared.state.lock().registry.list()
    }

    pub fn get_one(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.shared.state.lock().registry.get(id)
    }

    /// Subscribes an observer the caller keeps alive through `observer`.
    ///
    /// The current state of every non-terminal job is queued to the observer
    /// before any later event, so no in-flight job is missed. Dropping the
    /// last `Arc` ends the subscription.
    pub fn register_observer<O>(&self, observer: &Arc<O>) -> Result<SubscriptionId, JobError>
    where
        O: JobObserver + 'static,
    {
        let observer = Arc::downgrade(observer);
        let observer: Weak<dyn JobObserver> = observer;
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(JobError::ManagerDisposed);
        }
        let replay: Vec<JobEvent> = state
            .registry
            .active()
            .cloned()
            .map(JobEvent::replay)
            .collect();
        Ok(state.broadcaster.subscribe(observer, replay))
    }

    pub fn unregister_observer(&self, id: SubscriptionId) -> bool {
        self.shared.state.lock().broadcaster.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().broadcaster.len()
    }

    /// Forgets a job that has reached a terminal state.
    pub fn remove(&self, id: &JobId) -> Result<JobRecord, JobError> {
        let record = self.shared.state.lock().registry.remove(id)?;
        engine_debug!(job = id; "removed from registry");
        Ok(record)
    }

    /// Cancels a job if needed and removes it from the registry.
    pub async fn terminate_and_forget(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.cancel(id).await?;
        self.remove(id)
    }

    /// Cancels every unfinished job, releases the engine and drops all
    /// subscriptions. Later submits fail with `ManagerDisposed`.
    pub async fn dispose(&self) {
        let confirmations = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;

            let active: Vec<JobId> = state.registry.active().map(|r| r.id.clone()).collect();
            engine_info!("disposing job manager with {} unfinished jobs", active.len());
            let mut confirmations = Vec::new();
            for id in active {
                match state.request_cancel(&self.shared.engine, &id) {
                    Ok(Some(confirmation)) => confirmations.push(confirmation),
                    Ok(None) => {}
                    Err(err) => engine_warn!(job = id; "could not cancel during dispose: {}", err),
                }
            }
            confirmations
        };

        join_all(confirmations).await;
        self.shared.engine.dispose();
        self.shared.state.lock().broadcaster.clear();
        engine_info!("job manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }
}

impl ManagerState {
    fn new(config: &ManagerConfig) -> Self {
        Self {
            registry: JobRegistry::with_capacity(config.registry_capacity),
            broadcaster: Broadcaster::new(config.coalesce_progress),
            pending: VecDeque::new(),
            dispatching: None,
            accepted: HashSet::new(),
            abandoned: HashSet::new(),
            waiters: HashMap::new(),
            max_concurrent_jobs: config.max_concurrent_jobs,
            disposed: false,
        }
    }

    fn status_of(&self, id: &JobId) -> Option<JobStatus> {
        self.registry.record(id).map(|record| record.status)
    }

    fn check_synthesis_dependency(&self, id: &JobId) -> Result<(), ParameterError> {
        match self.registry.record(id) {
            None => Err(ParameterError::UnknownSynthesisJob(id.clone())),
            Some(record)
                if record.kind == JobKind::Synthesis && record.status == JobStatus::Finished =>
            {
                Ok(())
            }
            Some(record) => Err(ParameterError::SynthesisNotFinished {
                job: id.clone(),
                kind: record.kind,
                status: record.status,
            }),
        }
    }

    fn publish_current(&mut self, id: &JobId) {
        if let Some(record) = self.registry.record(id) {
            let event = JobEvent::live(record.clone());
            self.broadcaster.publish(&event);
        }
    }

    /// Commits a transition, publishes it and settles the job if it ended.
    fn apply(&mut self, id: &JobId, transition: Transition) -> Result<JobStatus, JobError> {
        let record = self.registry.transition(id, transition)?;
        let status = record.status;
        let event = JobEvent::live(record.clone());
        engine_debug!(job = id; "now {}", status);
        self.broadcaster.publish(&event);
        if status.is_terminal() {
            self.settle(id);
        }
        Ok(status)
    }

    /// Applies a transition, treating a rejected one as an integration defect.
    fn apply_or_repair(&mut self, engine: &EngineHandle, id: &JobId, transition: Transition) {
        match self.apply(id, transition) {
            Ok(_) => {}
            Err(JobError::NotFound(_)) => {
                engine_warn!(job = id; "ignoring event for a job that is no longer registered");
            }
            Err(err) => {
                engine_error!(job = id; "{}", err);
                self.repair(engine, id, &err);
            }
        }
    }

    /// Forces a job that hit a defect into a terminal state.
    fn repair(&mut self, engine: &EngineHandle, id: &JobId, defect: &JobError) {
        let Some(status) = self.status_of(id) else {
            return;
        };
        if status.is_terminal() {
            return;
        }
        if self.accepted.contains(id) {
            if let Err(err) = engine.abort(id.clone()) {
                engine_warn!(job = id; "abort after defect failed: {}", err);
            }
        }
        let repair = if status == JobStatus::Terminating {
            Transition::ConfirmTermination
        } else {
            Transition::Fail(format!("internal error: {defect}"))
        };
        if let Err(err) = self.apply(id, repair) {
            engine_error!(job = id; "could not repair job state: {}", err);
        }
    }

    /// Releases dispatch bookkeeping and wakes cancel waiters of an ended job.
    ///
    /// The dispatch slot is not released here: it stays taken until the
    /// engine has answered the start request.
    fn settle(&mut self, id: &JobId) {
        self.accepted.remove(id);
        if let Some(waiters) = self.waiters.remove(id) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    fn wait_for(&mut self, id: &JobId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(id.clone()).or_default().push(tx);
        rx
    }

    /// Hands queued jobs to the engine, one outstanding start at a time.
    fn dispatch_next(&mut self, engine: &EngineHandle) {
        while !self.disposed
            && self.dispatching.is_none()
            && self.accepted.len() < self.max_concurrent_jobs
        {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            let request = match self.registry.record(&id) {
                Some(record) if record.status == JobStatus::Queued => record.request.clone(),
                _ => continue,
            };
            match engine.start(id.clone(), request) {
                Ok(()) => {
                    engine_debug!(job = id; "dispatched to compute engine");
                    self.dispatching = Some(id);
                }
                Err(err) => {
                    engine_error!(job = id; "dispatch failed: {}", err);
                    self.apply_or_repair(engine, &id, Transition::Fail(err.to_string()));
                }
            }
        }
    }

    /// Starts cancellation; returns a receiver when the outcome is not final yet.
    fn request_cancel(
        &mut self,
        engine: &EngineHandle,
        id: &JobId,
    ) -> Result<Option<oneshot::Receiver<()>>, JobError> {
        let status = self
            .status_of(id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        match status {
            JobStatus::Finished | JobStatus::Terminated | JobStatus::Failed => Ok(None),
            JobStatus::Queued => {
                if self.dispatching.as_ref() == Some(id) {
                    engine_info!(job = id; "cancelled while the engine decides on it");
                    self.abandoned.insert(id.clone());
                } else {
                    self.pending.retain(|pending| pending != id);
                    engine_info!(job = id; "cancelled before reaching the engine");
                }
                self.apply(id, Transition::ConfirmTermination)?;
                Ok(None)
            }
            JobStatus::Started | JobStatus::Progressing => {
                let confirmation = self.wait_for(id);
                self.begin_termination(engine, id);
                Ok(Some(confirmation))
            }
            JobStatus::Terminating => Ok(Some(self.wait_for(id))),
        }
    }

    fn begin_termination(&mut self, engine: &EngineHandle, id: &JobId) {
        if let Err(err) = self.apply(id, Transition::BeginTermination) {
            engine_error!(job = id; "{}", err);
            self.repair(engine, id, &err);
            return;
        }
        engine_info!(job = id; "terminating");
        if let Err(err) = engine.abort(id.clone()) {
            // Nothing can still be running inside an engine that is gone.
            engine_warn!(job = id; "abort could not reach the engine: {}", err);
            self.apply_or_repair(engine, id, Transition::ConfirmTermination);
        }
    }

    fn on_engine_event(&mut self, engine: &EngineHandle, event: EngineEvent) {
        if !matches!(event, EngineEvent::Progress { .. })
            && self.dispatching.as_ref() == Some(event.job_id())
        {
            self.dispatching = None;
        }
        if self.abandoned.contains(event.job_id()) {
            self.on_abandoned_event(engine, event);
            self.dispatch_next(engine);
            return;
        }

        let terminating = self.status_of(event.job_id()) == Some(JobStatus::Terminating);
        match event {
            EngineEvent::Started { job_id } => {
                match self.apply(&job_id, Transition::Start) {
                    Ok(_) => {
                        self.accepted.insert(job_id.clone());
                        engine_info!(job = job_id; "started");
                    }
                    Err(err) => {
                        // The engine now holds a job the registry no longer runs.
                        engine_error!(job = job_id; "{}", err);
                        if let Err(err) = engine.abort(job_id.clone()) {
                            engine_warn!(job = job_id; "abort after defect failed: {}", err);
                        }
                    }
                }
            }
            EngineEvent::Rejected { job_id, error } => {
                engine_warn!(job = job_id; "rejected: {}", error);
                self.apply_or_repair(engine, &job_id, Transition::Fail(error.to_string()));
            }
            EngineEvent::Progress { job_id, percent } => {
                if terminating {
                    engine_trace!(job = job_id; "progress {:.1}% ignored while terminating", percent);
                } else {
                    self.apply_or_repair(engine, &job_id, Transition::Progress(percent));
                }
            }
            EngineEvent::Finished { job_id, output } => {
                if terminating {
                    engine_debug!(job = job_id; "finished while terminating, result discarded");
                    self.apply_or_repair(engine, &job_id, Transition::ConfirmTermination);
                } else {
                    engine_info!(job = job_id; "finished");
                    self.apply_or_repair(engine, &job_id, Transition::Finish(Arc::new(output)));
                }
            }
            EngineEvent::Failed { job_id, error } => {
                if terminating {
                    engine_debug!(job = job_id; "failed while terminating: {}", error);
                    self.apply_or_repair(engine, &job_id, Transition::ConfirmTermination);
                } else {
                    engine_warn!(job = job_id; "failed: {}", error);
                    let failure = JobError::from(error);
                    self.apply_or_repair(engine, &job_id, Transition::Fail(failure.to_string()));
                }
            }
            EngineEvent::Aborted { job_id } => {
                if terminating {
                    engine_info!(job = job_id; "terminated");
                    self.apply_or_repair(engine, &job_id, Transition::ConfirmTermination);
                } else {
                    self.apply_or_repair(
                        engine,
                        &job_id,
                        Transition::Fail("aborted by the compute engine".to_string()),
                    );
                }
            }
        }
        self.dispatch_next(engine);
    }

    /// The job already ended locally; the engine only needs to let go of it.
    fn on_abandoned_event(&mut self, engine: &EngineHandle, event: EngineEvent) {
        match event {
            EngineEvent::Started { job_id } => {
                engine_debug!(job = job_id; "accepted after cancel, aborting");
                match engine.abort(job_id.clone()) {
                    // Holds a concurrency slot until the engine lets go.
                    Ok(()) => {
                        self.accepted.insert(job_id);
                    }
                    Err(err) => {
                        engine_warn!(job = job_id; "abort could not reach the engine: {}", err);
                        self.abandoned.remove(&job_id);
                    }
                }
            }
            EngineEvent::Progress { .. } => {}
            EngineEvent::Rejected { job_id, .. }
            | EngineEvent::Finished { job_id, .. }
            | EngineEvent::Failed { job_id, .. }
            | EngineEvent::Aborted { job_id } => {
                engine_trace!(job = job_id; "engine released cancelled job");
                self.abandoned.remove(&job_id);
                self.accepted.remove(&job_id);
            }
        }
    }

    /// The engine's event stream closed: nothing it held is running anymore.
    fn engine_lost(&mut self, engine: &EngineHandle) {
        let mut stranded: Vec<JobId> = self.accepted.iter().cloned().collect();
        stranded.extend(self.dispatching.take());
        for id in self.abandoned.drain() {
            self.accepted.remove(&id);
        }
        if stranded.is_empty() {
            engine_debug!("compute engine event stream closed");
        } else {
            engine_warn!(
                "compute engine went away with {} unfinished jobs",
                stranded.len()
            );
        }

        for id in stranded {
            let transition = match self.status_of(&id) {
                Some(JobStatus::Terminating) => Transition::ConfirmTermination,
                Some(status) if status.is_terminal() => continue,
                Some(_) => Transition::Fail(JobError::from(EngineError::Unreachable).to_string()),
                None => continue,
            };
            self.apply_or_repair(engine, &id, transition);
        }
        self.dispatch_next(engine);
    }
}

fn pump_engine_events(shared: Weak<Shared>, events: mpsc::Receiver<EngineEvent>) {
    while let Ok(event) = events.recv() {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock();
        state.on_engine_event(&shared.engine, event);
    }
    if let Some(shared) = shared.upgrade() {
        shared.state.lock().engine_lost(&shared.engine);
    }
}
