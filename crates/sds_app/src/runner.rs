use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_info, engine_warn};
use sds_core::{JobError, JobId, JobObserver, JobRecord, JobRequest, JobStatus};
use sds_engine::{JobManager, SetupError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::demo_engine::DemoEngine;
use crate::observer::LoggingObserver;
use crate::report::{JobSummary, SessionReport};
use crate::session::{SessionFile, SessionJob};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Runs a whole session against the demo engine and disposes the manager.
pub async fn run_session(session: &SessionFile) -> Result<SessionReport, RunError> {
    let engine = Arc::new(DemoEngine::new(session.engine.clone()));
    let manager = Arc::new(JobManager::new(engine, session.config.clone())?);
    let logger = Arc::new(LoggingObserver);
    manager.register_observer(&logger)?;

    let report = SessionRunner::new(manager.clone()).run(&session.jobs).await;
    manager.dispose().await;
    report
}

/// Forwards terminal records so the runner can wait on individual jobs.
struct CompletionObserver {
    tx: mpsc::UnboundedSender<JobRecord>,
}

impl CompletionObserver {
    fn forward(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.tx.send(job.clone())?;
        Ok(())
    }
}

impl JobObserver for CompletionObserver {
    fn on_finished(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.forward(job)
    }

    fn on_failed(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.forward(job)
    }

    fn on_terminated(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.forward(job)
    }
}

/// Submits session jobs in order, honouring dependencies and cancel timers.
pub struct SessionRunner {
    manager: Arc<JobManager>,
}

impl SessionRunner {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }

    pub async fn run(&self, jobs: &[SessionJob]) -> Result<SessionReport, RunError> {
        let started_at = Utc::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let completion = Arc::new(CompletionObserver { tx });
        let subscription = self.manager.register_observer(&completion)?;
        let mut completions = Completions {
            manager: &self.manager,
            rx,
            done: HashMap::new(),
        };

        let mut submitted: HashMap<&str, JobId> = HashMap::new();
        let mut outcomes: Vec<(&SessionJob, Result<JobId, String>)> = Vec::new();
        let mut timers: Vec<JoinHandle<()>> = Vec::new();

        for job in jobs {
            let mut request = job.request.clone();
            if let Some(dependency) = &job.depends_on {
                let Some(dependency_id) = submitted.get(dependency.as_str()).cloned() else {
                    outcomes.push((job, Err(format!("dependency {dependency:?} was not submitted"))));
                    continue;
                };
                let upstream = completions.wait_for(&dependency_id).await?;
                if upstream.status != JobStatus::Finished {
                    outcomes.push((
                        job,
                        Err(format!("dependency {dependency:?} ended {}", upstream.status)),
                    ));
                    continue;
                }
                if let JobRequest::Evaluation(params) = &mut request {
                    params.synthesis_job = Some(dependency_id);
                }
            }

            match self.manager.submit(request) {
                Ok(id) => {
                    engine_info!(job = id; "session job {:?}", job.name);
                    if let Some(delay) = job.cancel_after_ms {
                        timers.push(self.cancel_later(id.clone(), Duration::from_millis(delay)));
                    }
                    submitted.insert(job.name.as_str(), id.clone());
                    outcomes.push((job, Ok(id)));
                }
                Err(err) => {
                    engine_warn!("session job {:?} was not submitted: {}", job.name, err);
                    outcomes.push((job, Err(err.to_string())));
                }
            }
        }

        let mut summaries = Vec::with_capacity(outcomes.len());
        for (job, outcome) in outcomes {
            let summary = match outcome {
                Ok(id) => JobSummary::from_record(&job.name, &completions.wait_for(&id).await?),
                Err(reason) => JobSummary::not_submitted(&job.name, job.request.kind(), reason),
            };
            summaries.push(summary);
        }

        for timer in timers {
            timer.abort();
        }
        self.manager.unregister_observer(subscription);

        Ok(SessionReport {
            started_at,
            finished_at: Utc::now(),
            jobs: summaries,
        })
    }

    fn cancel_later(&self, id: JobId, delay: Duration) -> JoinHandle<()> {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine_info!(job = id; "cancel timer fired");
            if let Err(err) = manager.cancel(&id).await {
                engine_warn!(job = id; "scheduled cancel failed: {}", err);
            }
        })
    }
}

struct Completions<'a> {
    manager: &'a JobManager,
    rx: mpsc::UnboundedReceiver<JobRecord>,
    done: HashMap<JobId, JobRecord>,
}

impl Completions<'_> {
    /// Waits until `id` reaches a terminal state and returns its record.
    async fn wait_for(&mut self, id: &JobId) -> Result<JobRecord, JobError> {
        loop {
            if let Some(record) = self.done.get(id) {
                return Ok(record.clone());
            }
            let current = self.manager.get_one(id)?;
            if current.is_terminal() {
                return Ok(current);
            }
            let Some(record) = self.rx.recv().await else {
                return Ok(current);
            };
            self.done.insert(record.id.clone(), record);
        }
    }
}
