use std::io;
use std::time::Duration;

use sds_core::DEFAULT_REGISTRY_CAPACITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Worker threads of the engine's private runtime.
    pub worker_threads: usize,
    /// How long shutdown waits for engine tasks before dropping them.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl EngineSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Jobs the engine may hold at once, counting the one being dispatched.
    pub max_concurrent_jobs: usize,
    pub registry_capacity: usize,
    /// Drop superseded progress events that back up in an observer's queue.
    pub coalesce_progress: bool,
    pub engine: EngineSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            coalesce_progress: true,
            engine: EngineSettings::default(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), SetupError> {
        let fields = [
            ("max_concurrent_jobs", self.max_concurrent_jobs),
            ("registry_capacity", self.registry_capacity),
            ("engine.worker_threads", self.engine.worker_threads),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(SetupError::InvalidConfig { field }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("configuration field {field} must be at least 1")]
    InvalidConfig { field: &'static str },
    #[error("failed to spawn job manager thread: {0}")]
    Spawn(#[from] io::Error),
}
