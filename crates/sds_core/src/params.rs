use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{JobId, JobKind, JobStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{field} must not be negative (got {actual})")]
    Negative { field: &'static str, actual: i64 },
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("{field} must be a finite number {expected} (got {actual})")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        actual: f64,
    },
    #[error("differential privacy parameters are required in {0:?} mode")]
    MissingDpParameters(SynthesisMode),
    #[error("differential privacy parameters are not used in {0:?} mode")]
    UnexpectedDpParameters(SynthesisMode),
    #[error("oversampling is only supported in aggregate-seeded mode, not {0:?}")]
    UnexpectedOversampling(SynthesisMode),
    #[error("referenced synthesis job {0} does not exist")]
    UnknownSynthesisJob(JobId),
    #[error("referenced job {job} is a {kind} job in status {status}, expected a finished synthesis")]
    SynthesisNotFinished {
        job: JobId,
        kind: JobKind,
        status: JobStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SynthesisMode {
    Unseeded,
    #[default]
    RowSeeded,
    ValueSeeded,
    AggregateSeeded,
    Dp,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OversamplingParameters {
    pub ratio: Option<f64>,
    pub tries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpParameters {
    pub noise_epsilon: f64,
    pub noise_delta: f64,
    pub percentile_percentage: f64,
    pub sensitivity_filter_epsilon: f64,
    pub use_synthetic_counts: bool,
}

impl Default for DpParameters {
    fn default() -> Self {
        Self {
            noise_epsilon: 4.0,
            noise_delta: 0.001,
            percentile_percentage: 99.0,
            sensitivity_filter_epsilon: 0.0,
            use_synthetic_counts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParameters {
    pub mode: SynthesisMode,
    /// Number of sensitive records to use; 0 means all of them.
    pub record_limit: i64,
    pub resolution: usize,
    pub reporting_length: usize,
    pub cache_max_size: usize,
    pub empty_value: String,
    pub seeded: bool,
    pub oversampling: Option<OversamplingParameters>,
    pub dp: Option<DpParameters>,
}

impl Default for SynthesisParameters {
    fn default() -> Self {
        Self {
            mode: SynthesisMode::default(),
            record_limit: 0,
            resolution: 10,
            reporting_length: 3,
            cache_max_size: 100_000,
            empty_value: String::new(),
            seeded: true,
            oversampling: None,
            dp: None,
        }
    }
}

impl SynthesisParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.record_limit < 0 {
            return Err(ParameterError::Negative {
                field: "record_limit",
                actual: self.record_limit,
            });
        }
        at_least_one("resolution", self.resolution)?;
        at_least_one("reporting_length", self.reporting_length)?;
        at_least_one("cache_max_size", self.cache_max_size)?;

        if let Some(oversampling) = &self.oversampling {
            if self.mode != SynthesisMode::AggregateSeeded {
                return Err(ParameterError::UnexpectedOversampling(self.mode));
            }
            if let Some(ratio) = oversampling.ratio {
                check_float("oversampling.ratio", ratio, ">= 0", |v| v >= 0.0)?;
            }
            if let Some(tries) = oversampling.tries {
                at_least_one("oversampling.tries", tries)?;
            }
        }

        match (self.mode, &self.dp) {
            (SynthesisMode::Dp, Some(dp)) => dp.validate(),
            (SynthesisMode::Dp, None) => Err(ParameterError::MissingDpParameters(self.mode)),
            (mode, Some(_)) => Err(ParameterError::UnexpectedDpParameters(mode)),
            (_, None) => Ok(()),
        }
    }
}

impl DpParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        check_float("dp.noise_epsilon", self.noise_epsilon, "> 0", |v| v > 0.0)?;
        check_float("dp.noise_delta", self.noise_delta, "in (0, 1)", |v| {
            v > 0.0 && v < 1.0
        })?;
        check_float(
            "dp.percentile_percentage",
            self.percentile_percentage,
            "in [0, 100]",
            |v| (0.0..=100.0).contains(&v),
        )?;
        check_float(
            "dp.sensitivity_filter_epsilon",
            self.sensitivity_filter_epsilon,
            ">= 0",
            |v| v >= 0.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationParameters {
    pub reporting_length: usize,
    pub resolution: usize,
    pub sensitivity_threshold: usize,
    /// Synthesis job whose output is evaluated; `None` evaluates the engine's
    /// current synthetic data.
    pub synthesis_job: Option<JobId>,
}

impl Default for EvaluationParameters {
    fn default() -> Self {
        Self {
            reporting_length: 3,
            resolution: 10,
            sensitivity_threshold: 0,
            synthesis_job: None,
        }
    }
}

impl EvaluationParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        at_least_one("reporting_length", self.reporting_length)?;
        at_least_one("resolution", self.resolution)
    }
}

/// Launch parameters of a job; the variant decides the job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobRequest {
    Synthesis(SynthesisParameters),
    Evaluation(EvaluationParameters),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Synthesis(_) => JobKind::Synthesis,
            JobRequest::Evaluation(_) => JobKind::Evaluation,
        }
    }

    /// Checks the constraints that do not depend on other jobs.
    pub fn validate(&self) -> Result<(), ParameterError> {
        match self {
            JobRequest::Synthesis(params) => params.validate(),
            JobRequest::Evaluation(params) => params.validate(),
        }
    }

    pub fn synthesis_dependency(&self) -> Option<&JobId> {
        match self {
            JobRequest::Evaluation(params) => params.synthesis_job.as_ref(),
            JobRequest::Synthesis(_) => None,
        }
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<(), ParameterError> {
    if value == 0 {
        Err(ParameterError::Zero { field })
    } else {
        Ok(())
    }
}

fn check_float(
    field: &'static str,
    value: f64,
    expected: &'static str,
    accept: impl Fn(f64) -> bool,
) -> Result<(), ParameterError> {
    if value.is_finite() && accept(value) {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange {
            field,
            expected,
            actual: value,
        })
    }
}
