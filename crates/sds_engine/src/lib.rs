//! Job orchestration: engine adapter, event fan-out and the job manager.
mod broadcast;
mod compute;
mod config;
mod engine;
mod manager;
mod types;

pub use broadcast::{Broadcaster, SubscriptionId};
pub use compute::{ComputeEngine, ProgressSink};
pub use config::{EngineSettings, ManagerConfig, SetupError};
pub use engine::EngineHandle;
pub use manager::JobManager;
pub use types::{EngineError, EngineEvent};
