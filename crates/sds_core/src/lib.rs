//! SDS core: job data model, state machine and registry.
//!
//! Nothing in this crate performs IO or spawns threads; the engine crate
//! drives it from behind a single lock.
mod error;
mod event;
mod observer;
mod output;
mod params;
mod record;
mod registry;
mod types;

pub use error::{ErrorKind, JobError};
pub use event::{EventOrigin, JobEvent};
pub use observer::JobObserver;
pub use output::{EvaluationOutput, JobOutput, SynthesisOutput};
pub use params::{
    DpParameters, EvaluationParameters, JobRequest, OversamplingParameters, ParameterError,
    SynthesisMode, SynthesisParameters,
};
pub use record::JobRecord;
pub use registry::{JobRegistry, DEFAULT_REGISTRY_CAPACITY};
pub use types::{JobId, JobKind, JobStatus, Transition};
