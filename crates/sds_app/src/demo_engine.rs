//! Stand-in compute engine for running sessions without the native engine.
//!
//! It produces deterministic synthetic rows and aggregate counts so that the
//! job lifecycle (progress, results, cancellation, evaluation of an earlier
//! synthesis) can be exercised end to end.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use engine_logging::engine_debug;
use parking_lot::Mutex;
use sds_core::{
    EvaluationOutput, EvaluationParameters, JobId, JobOutput, JobRequest, SynthesisOutput,
    SynthesisParameters,
};
use sds_engine::{ComputeEngine, EngineError, ProgressSink};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Rows in the pretend sensitive dataset.
    pub sensitive_records: usize,
    /// Pause between progress reports.
    pub step_delay_ms: u64,
    pub progress_steps: u32,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            sensitive_records: 1_000,
            step_delay_ms: 50,
            progress_steps: 10,
        }
    }
}

impl DemoSettings {
    fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

pub struct DemoEngine {
    settings: DemoSettings,
    /// Synthesis results by job, kept for later evaluations.
    synthesized: Mutex<HashMap<JobId, SynthesisOutput>>,
    latest: Mutex<Option<JobId>>,
}

impl DemoEngine {
    pub fn new(settings: DemoSettings) -> Self {
        Self {
            settings,
            synthesized: Mutex::new(HashMap::new()),
            latest: Mutex::new(None),
        }
    }

    async fn report_steps(&self, sink: &dyn ProgressSink) {
        let steps = self.settings.progress_steps.max(1);
        for step in 1..steps {
            tokio::time::sleep(self.settings.step_delay()).await;
            sink.progress(f64::from(step) * 100.0 / f64::from(steps));
        }
        tokio::time::sleep(self.settings.step_delay()).await;
    }

    fn synthesize(&self, job_id: &JobId, params: &SynthesisParameters) -> SynthesisOutput {
        let sensitive = self.settings.sensitive_records;
        let count = match usize::try_from(params.record_limit) {
            Ok(0) | Err(_) => sensitive,
            Ok(limit) => limit.min(sensitive),
        };

        let mut csv = String::from("age,zip,visits\n");
        let zip_range = params.resolution.saturating_mul(100).max(1);
        for row in 0..count {
            let age = 18 + (row * 7) % 60;
            let zip = 10_000 + row.wrapping_mul(131) % zip_range;
            let visits = row % params.reporting_length.max(1);
            csv.push_str(&format!("{age},{zip},{visits}\n"));
        }

        let output = SynthesisOutput {
            synthetic_csv: csv,
            record_count: count,
            expansion_ratio: if sensitive == 0 {
                0.0
            } else {
                count as f64 / sensitive as f64
            },
        };
        self.synthesized.lock().insert(job_id.clone(), output.clone());
        *self.latest.lock() = Some(job_id.clone());
        output
    }

    fn evaluate(&self, params: &EvaluationParameters) -> Result<EvaluationOutput, EngineError> {
        let source = match &params.synthesis_job {
            Some(id) => Some(id.clone()),
            None => self.latest.lock().clone(),
        };
        let synthesis = source
            .and_then(|id| self.synthesized.lock().get(&id).cloned())
            .ok_or_else(|| EngineError::Rejected("no synthetic data to evaluate".to_string()))?;

        let aggregate_limit = params
            .reporting_length
            .saturating_mul(params.resolution)
            .saturating_mul(10);
        let sensitive_aggregates = self.settings.sensitive_records.min(aggregate_limit);
        let synthetic_aggregates = synthesis.record_count.min(aggregate_limit);
        let leaked_aggregates = synthetic_aggregates.min(params.sensitivity_threshold);
        let fabricated_aggregates = synthetic_aggregates.saturating_sub(sensitive_aggregates);
        let preserved = synthetic_aggregates - fabricated_aggregates;
        Ok(EvaluationOutput {
            sensitive_aggregates,
            synthetic_aggregates,
            leaked_aggregates,
            fabricated_aggregates,
            preservation_ratio: if sensitive_aggregates == 0 {
                0.0
            } else {
                preserved as f64 / sensitive_aggregates as f64
            },
        })
    }
}

#[async_trait]
impl ComputeEngine for DemoEngine {
    async fn accept(&self, _job_id: &JobId, request: &JobRequest) -> Result<(), EngineError> {
        match request {
            JobRequest::Synthesis(_) if self.settings.sensitive_records == 0 => Err(
                EngineError::Rejected("no sensitive records are loaded".to_string()),
            ),
            _ => Ok(()),
        }
    }

    async fn run(
        &self,
        job_id: &JobId,
        request: &JobRequest,
        sink: &dyn ProgressSink,
    ) -> Result<JobOutput, EngineError> {
        self.report_steps(sink).await;
        match request {
            JobRequest::Synthesis(params) => {
                Ok(JobOutput::Synthesis(self.synthesize(job_id, params)))
            }
            JobRequest::Evaluation(params) => self.evaluate(params).map(JobOutput::Evaluation),
        }
    }

    async fn abort(&self, job_id: &JobId) -> Result<(), EngineError> {
        engine_debug!(job = job_id; "demo engine released job");
        Ok(())
    }

    fn dispose(&self) {
        self.synthesized.lock().clear();
        engine_debug!("demo engine disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ignore;

    impl ProgressSink for Ignore {
        fn progress(&self, _percent: f64) {}
    }

    fn fast() -> DemoSettings {
        DemoSettings {
            sensitive_records: 40,
            step_delay_ms: 0,
            progress_steps: 2,
        }
    }

    #[tokio::test]
    async fn synthesis_honours_record_limit() {
        let engine = DemoEngine::new(fast());
        let request = JobRequest::Synthesis(SynthesisParameters {
            record_limit: 10,
            ..SynthesisParameters::default()
        });

        let output = engine.run(&JobId::from("a"), &request, &Ignore).await.unwrap();

        let JobOutput::Synthesis(output) = output else {
            panic!("expected synthesis output");
        };
        assert_eq!(output.record_count, 10);
        assert_eq!(output.synthetic_csv.lines().count(), 11);
        assert_eq!(output.expansion_ratio, 0.25);
    }

    #[tokio::test]
    async fn huge_resolution_and_length_do_not_overflow() {
        let engine = DemoEngine::new(fast());
        let synthesis = JobRequest::Synthesis(SynthesisParameters {
            resolution: usize::MAX,
            ..SynthesisParameters::default()
        });
        let evaluation = JobRequest::Evaluation(EvaluationParameters {
            synthesis_job: Some(JobId::from("big")),
            reporting_length: usize::MAX,
            resolution: usize::MAX,
            ..EvaluationParameters::default()
        });

        engine.run(&JobId::from("big"), &synthesis, &Ignore).await.unwrap();
        let output = engine.run(&JobId::from("eval"), &evaluation, &Ignore).await.unwrap();

        let JobOutput::Evaluation(output) = output else {
            panic!("expected evaluation output");
        };
        assert_eq!(output.sensitive_aggregates, 40);
        assert_eq!(output.synthetic_aggregates, 40);
    }

    #[tokio::test]
    async fn evaluation_without_synthesis_is_rejected() {
        let engine = DemoEngine::new(fast());
        let request = JobRequest::Evaluation(EvaluationParameters::default());

        let err = engine
            .run(&JobId::from("e"), &request, &Ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Rejected(_)));
    }
}
