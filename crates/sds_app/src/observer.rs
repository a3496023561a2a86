use engine_logging::{engine_debug, engine_info, engine_warn};
use sds_core::{JobObserver, JobRecord};

/// Writes the lifecycle of every job to the log.
pub struct LoggingObserver;

impl JobObserver for LoggingObserver {
    fn on_queued(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_info!(job = job.id; "{} job queued", job.kind);
        Ok(())
    }

    fn on_started(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_info!(job = job.id; "started");
        Ok(())
    }

    fn on_progress(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_debug!(job = job.id; "{:.0}%", job.progress);
        Ok(())
    }

    fn on_finished(&self, job: &JobRecord) -> anyhow::Result<()> {
        let elapsed = job.updated_at - job.created_at;
        engine_info!(job = job.id; "finished in {} ms", elapsed.num_milliseconds());
        Ok(())
    }

    fn on_failed(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_warn!(
            job = job.id;
            "failed: {}",
            job.error.as_deref().unwrap_or("no detail")
        );
        Ok(())
    }

    fn on_terminating(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_info!(job = job.id; "terminating");
        Ok(())
    }

    fn on_terminated(&self, job: &JobRecord) -> anyhow::Result<()> {
        engine_info!(job = job.id; "terminated");
        Ok(())
    }
}
