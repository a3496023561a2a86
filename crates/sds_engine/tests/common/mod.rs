#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sds_core::{
    EvaluationOutput, JobEvent, JobId, JobObserver, JobOutput, JobRecord, JobRequest, JobStatus,
    SynthesisOutput,
};
use sds_engine::{ComputeEngine, EngineError, JobManager, ManagerConfig, ProgressSink};
use tokio::sync::{mpsc, Semaphore};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub enum Step {
    Progress(f64),
    Finish,
    Fail(String),
    Panic,
}

struct Script {
    tx: mpsc::UnboundedSender<Step>,
    rx: Option<mpsc::UnboundedReceiver<Step>>,
}

impl Script {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Compute engine fake driven step by step from the test body.
///
/// Each job runs until the test pushes a terminal step for it. Acceptance and
/// abort confirmation can be held back to freeze a job in between states.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<JobId, Script>>,
    accept_gate: Option<Semaphore>,
    abort_gate: Option<Semaphore>,
    reject: AtomicBool,
    accepted: Mutex<Vec<JobId>>,
    accept_calls: AtomicUsize,
    aborts: AtomicUsize,
    disposes: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn holding_acceptance() -> Arc<Self> {
        Arc::new(Self {
            accept_gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn holding_aborts() -> Arc<Self> {
        Arc::new(Self {
            abort_gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn rejecting() -> Arc<Self> {
        let engine = Self::default();
        engine.reject.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    pub fn step(&self, id: &JobId, step: Step) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(id.clone()).or_insert_with(Script::new);
        let _ = script.tx.send(step);
    }

    pub fn progress(&self, id: &JobId, percent: f64) {
        self.step(id, Step::Progress(percent));
    }

    pub fn finish(&self, id: &JobId) {
        self.step(id, Step::Finish);
    }

    pub fn fail(&self, id: &JobId, message: &str) {
        self.step(id, Step::Fail(message.to_string()));
    }

    pub fn release_acceptance(&self) {
        if let Some(gate) = &self.accept_gate {
            gate.add_permits(1);
        }
    }

    pub fn release_abort(&self) {
        if let Some(gate) = &self.abort_gate {
            gate.add_permits(1);
        }
    }

    pub fn accepted_ids(&self) -> Vec<JobId> {
        self.accepted.lock().clone()
    }

    pub fn accept_calls(&self) -> usize {
        self.accept_calls.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(running)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComputeEngine for ScriptedEngine {
    async fn accept(&self, job_id: &JobId, _request: &JobRequest) -> Result<(), EngineError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.accept_gate {
            gate.acquire().await.expect("acceptance gate closed").forget();
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("no sensitive data loaded".to_string()));
        }
        self.accepted.lock().push(job_id.clone());
        Ok(())
    }

    async fn run(
        &self,
        job_id: &JobId,
        request: &JobRequest,
        sink: &dyn ProgressSink,
    ) -> Result<JobOutput, EngineError> {
        let steps = self
            .scripts
            .lock()
            .entry(job_id.clone())
            .or_insert_with(Script::new)
            .rx
            .take();
        let Some(mut steps) = steps else {
            return Err(EngineError::Computation("job ran twice".to_string()));
        };
        let _running = RunningGuard::enter(&self.running, &self.peak_running);

        while let Some(step) = steps.recv().await {
            match step {
                Step::Progress(percent) => sink.progress(percent),
                Step::Finish => return Ok(output_for(job_id, request)),
                Step::Fail(message) => return Err(EngineError::Computation(message)),
                Step::Panic => panic!("scripted engine panic"),
            }
        }
        Err(EngineError::Computation("script closed".to_string()))
    }

    async fn abort(&self, _job_id: &JobId) -> Result<(), EngineError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.abort_gate {
            gate.acquire().await.expect("abort gate closed").forget();
        }
        Ok(())
    }

    fn dispose(&self) {
        self.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthetic output carrying the job id, so results can be told apart.
pub fn output_for(job_id: &JobId, request: &JobRequest) -> JobOutput {
    match request {
        JobRequest::Synthesis(_) => JobOutput::Synthesis(SynthesisOutput {
            synthetic_csv: format!("job\n{job_id}\n"),
            record_count: 1,
            expansion_ratio: 1.0,
        }),
        JobRequest::Evaluation(_) => JobOutput::Evaluation(EvaluationOutput {
            sensitive_aggregates: 10,
            synthetic_aggregates: 9,
            leaked_aggregates: 0,
            fabricated_aggregates: 1,
            preservation_ratio: 0.9,
        }),
    }
}

/// Forwards every delivered event to the test body.
pub struct RecordingObserver {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), EventStream { rx })
    }
}

impl JobObserver for RecordingObserver {
    fn on_event(&self, event: &JobEvent) -> anyhow::Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

pub struct EventStream {
    rx: mpsc::UnboundedReceiver<JobEvent>,
}

impl EventStream {
    pub async fn next(&mut self) -> JobEvent {
        tokio::time::timeout(TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a job event")
            .expect("observer channel closed")
    }

    /// Collects the records delivered for `id` up to and including status `last`.
    pub async fn records_until(&mut self, id: &JobId, last: JobStatus) -> Vec<JobRecord> {
        let mut records = Vec::new();
        loop {
            let event = self.next().await;
            if event.job_id() != id {
                continue;
            }
            let done = event.status() == last;
            records.push(event.record);
            if done {
                return records;
            }
        }
    }

    pub async fn statuses_until(&mut self, id: &JobId, last: JobStatus) -> Vec<JobStatus> {
        self.records_until(id, last)
            .await
            .iter()
            .map(|record| record.status)
            .collect()
    }

    pub async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(150), self.rx.recv()).await;
        assert!(next.is_err(), "unexpected event: {:?}", next);
    }
}

pub fn manager(engine: Arc<ScriptedEngine>) -> JobManager {
    manager_with(engine, ManagerConfig::default())
}

pub fn manager_with(engine: Arc<ScriptedEngine>, config: ManagerConfig) -> JobManager {
    engine_logging::initialize_for_tests();
    JobManager::new(engine, config).expect("manager starts")
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(manager: &JobManager, id: &JobId, status: JobStatus) -> JobRecord {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let record = manager.get_one(id).expect("job is registered");
        if record.status == status {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} stuck in {} waiting for {status}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
