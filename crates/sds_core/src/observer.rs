use crate::{JobEvent, JobRecord, JobStatus};

/// Caller-owned handler for job lifecycle events.
///
/// Every callback receives the committed record after the transition, so the
/// payload that belongs to a status (result, error, progress) is always
/// present. Returning an error (or panicking) is logged by the broadcaster and
/// does not affect other observers or the job.
pub trait JobObserver: Send + Sync {
    fn on_queued(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_started(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_progress(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_finished(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_failed(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_terminating(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_terminated(&self, _job: &JobRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// Routes an event to the callback matching its status.
    fn on_event(&self, event: &JobEvent) -> anyhow::Result<()> {
        let job = &event.record;
        match job.status {
            JobStatus::Queued => self.on_queued(job),
            JobStatus::Started => self.on_started(job),
            JobStatus::Progressing => self.on_progress(job),
            JobStatus::Finished => self.on_finished(job),
            JobStatus::Failed => self.on_failed(job),
            JobStatus::Terminating => self.on_terminating(job),
            JobStatus::Terminated => self.on_terminated(job),
        }
    }
}
