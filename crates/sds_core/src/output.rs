use serde::{Deserialize, Serialize};

use crate::JobKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub synthetic_csv: String,
    pub record_count: usize,
    /// Synthetic record count divided by sensitive record count.
    pub expansion_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutput {
    pub sensitive_aggregates: usize,
    pub synthetic_aggregates: usize,
    /// Synthetic aggregates whose count falls below the sensitivity threshold.
    pub leaked_aggregates: usize,
    /// Synthetic aggregates that never occur in the sensitive data.
    pub fabricated_aggregates: usize,
    pub preservation_ratio: f64,
}

/// Result payload of a finished job, as produced by the compute engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutput {
    Synthesis(SynthesisOutput),
    Evaluation(EvaluationOutput),
}

impl JobOutput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobOutput::Synthesis(_) => JobKind::Synthesis,
            JobOutput::Evaluation(_) => JobKind::Evaluation,
        }
    }
}
