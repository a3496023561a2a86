use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use sds_core::{JobId, JobRequest};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::compute::{ChannelProgressSink, ComputeEngine};
use crate::types::panic_message;
use crate::{EngineError, EngineEvent, EngineSettings};

enum EngineCommand {
    Start { job_id: JobId, request: JobRequest },
    Abort { job_id: JobId },
    Shutdown,
}

struct ActiveJob {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Whoever removes a job from this map owns its terminal event.
type ActiveJobs = Arc<Mutex<HashMap<JobId, ActiveJob>>>;

/// Typed, JobId-aware handle to a compute engine running on its own thread.
///
/// All interaction is message passing: commands go in through `start`/`abort`,
/// and [`EngineEvent`]s come out of the receiver returned by [`EngineHandle::spawn`].
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    disposed: AtomicBool,
}

impl EngineHandle {
    pub fn spawn(
        engine: Arc<dyn ComputeEngine>,
        settings: EngineSettings,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("sds-engine".to_string())
            .spawn(move || run_engine_thread(engine, settings, cmd_rx, event_tx));
        if let Err(err) = spawned {
            // The event sender went down with the closure, so the receiver
            // reports a disconnected engine.
            engine_error!("failed to spawn compute engine thread: {}", err);
        }

        let handle = Self {
            cmd_tx,
            disposed: AtomicBool::new(false),
        };
        (handle, event_rx)
    }

    /// Hands a job to the engine. Acceptance arrives as `Started`/`Rejected`.
    pub fn start(&self, job_id: JobId, request: JobRequest) -> Result<(), EngineError> {
        self.send(EngineCommand::Start { job_id, request })
    }

    /// Asks the engine to abort a job. Confirmation arrives as `Aborted`.
    pub fn abort(&self, job_id: JobId) -> Result<(), EngineError> {
        self.send(EngineCommand::Abort { job_id })
    }

    /// Shuts the engine down. Safe to call any number of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        if self.is_disposed() {
            return Err(EngineError::Unreachable);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| EngineError::Unreachable)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_engine_thread(
    engine: Arc<dyn ComputeEngine>,
    settings: EngineSettings,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_threads)
        .thread_name("sds-engine-worker")
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            engine_error!("failed to start compute engine runtime: {}", err);
            return;
        }
    };
    let active: ActiveJobs = Arc::new(Mutex::new(HashMap::new()));
    engine_info!(
        "compute engine started with {} worker threads",
        settings.worker_threads
    );

    let mut aborts: Vec<JoinHandle<()>> = Vec::new();

    // A closed command channel means the handle is gone; treat it as shutdown.
    while let Ok(command) = cmd_rx.recv() {
        match command {
            EngineCommand::Start { job_id, request } => {
                start_job(&runtime, &engine, &active, &event_tx, job_id, request);
            }
            EngineCommand::Abort { job_id } => {
                aborts.retain(|task| !task.is_finished());
                aborts.extend(abort_job(&runtime, &engine, &active, &event_tx, job_id));
            }
            EngineCommand::Shutdown => break,
        }
    }

    let remaining: Vec<(JobId, ActiveJob)> = active.lock().drain().collect();
    if !remaining.is_empty() {
        engine_warn!(
            "compute engine shutting down with {} active jobs",
            remaining.len()
        );
    }
    runtime.block_on(async {
        for (job_id, job) in remaining {
            job.token.cancel();
            if let Some(task) = job.task {
                let _ = task.await;
            }
            engine_debug!(job = job_id; "aborted by engine shutdown");
            let _ = event_tx.send(EngineEvent::Aborted { job_id });
        }
        // The engine's own abort calls must not overlap its disposal.
        join_all(aborts).await;
    });

    engine.dispose();
    runtime.shutdown_timeout(settings.shutdown_grace());
    engine_info!("compute engine disposed");
}

fn start_job(
    runtime: &Runtime,
    engine: &Arc<dyn ComputeEngine>,
    active: &ActiveJobs,
    event_tx: &mpsc::Sender<EngineEvent>,
    job_id: JobId,
    request: JobRequest,
) {
    let token = CancellationToken::new();
    {
        let mut active = active.lock();
        if active.contains_key(&job_id) {
            let error = EngineError::Rejected("job is already active".to_string());
            let _ = event_tx.send(EngineEvent::Rejected { job_id, error });
            return;
        }
        active.insert(
            job_id.clone(),
            ActiveJob {
                token: token.clone(),
                task: None,
            },
        );
    }

    // Acceptance runs on the runtime so aborts for other jobs are served meanwhile.
    let task = runtime.spawn(run_job(
        engine.clone(),
        active.clone(),
        event_tx.clone(),
        job_id.clone(),
        request,
        token,
    ));
    if let Some(job) = active.lock().get_mut(&job_id) {
        job.task = Some(task);
    }
}

async fn run_job(
    engine: Arc<dyn ComputeEngine>,
    active: ActiveJobs,
    event_tx: mpsc::Sender<EngineEvent>,
    job_id: JobId,
    request: JobRequest,
    token: CancellationToken,
) {
    let admitted = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        admitted = AssertUnwindSafe(engine.accept(&job_id, &request)).catch_unwind() => settle(admitted),
    };
    if let Err(error) = admitted {
        if active.lock().remove(&job_id).is_some() {
            engine_warn!(job = job_id; "rejected by compute engine: {}", error);
            let _ = event_tx.send(EngineEvent::Rejected { job_id, error });
        }
        return;
    }
    if !active.lock().contains_key(&job_id) {
        return;
    }
    let _ = event_tx.send(EngineEvent::Started {
        job_id: job_id.clone(),
    });
    engine_debug!(job = job_id; "accepted by compute engine");

    let sink = ChannelProgressSink::new(job_id.clone(), event_tx.clone());
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        outcome = AssertUnwindSafe(engine.run(&job_id, &request, &sink)).catch_unwind() => settle(outcome),
    };

    if active.lock().remove(&job_id).is_none() {
        // Aborted while finishing; the abort path reports the job.
        return;
    }
    let event = match outcome {
        Ok(output) => EngineEvent::Finished { job_id, output },
        Err(error) => EngineEvent::Failed { job_id, error },
    };
    let _ = event_tx.send(event);
}

fn abort_job(
    runtime: &Runtime,
    engine: &Arc<dyn ComputeEngine>,
    active: &ActiveJobs,
    event_tx: &mpsc::Sender<EngineEvent>,
    job_id: JobId,
) -> Option<JoinHandle<()>> {
    let Some(job) = active.lock().remove(&job_id) else {
        engine_debug!(job = job_id; "abort ignored, job is no longer active");
        return None;
    };
    job.token.cancel();

    let engine = engine.clone();
    let event_tx = event_tx.clone();
    let task = runtime.spawn(async move {
        // Wait for the run task so none of its progress trails the confirmation.
        if let Some(task) = job.task {
            let _ = task.await;
        }
        if let Err(err) = settle(AssertUnwindSafe(engine.abort(&job_id)).catch_unwind().await) {
            engine_warn!(job = job_id; "compute engine reported an abort error: {}", err);
        }
        engine_debug!(job = job_id; "abort confirmed");
        let _ = event_tx.send(EngineEvent::Aborted { job_id });
    });
    Some(task)
}

fn settle<T>(
    outcome: Result<Result<T, EngineError>, Box<dyn std::any::Any + Send>>,
) -> Result<T, EngineError> {
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(EngineError::Panicked(panic_message(payload.as_ref()))),
    }
}
