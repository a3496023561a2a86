//! Session files: manager configuration, logging and the jobs to run.
//!
//! A session is a RON document, e.g.
//!
//! ```ron
//! (
//!     config: (max_concurrent_jobs: 2),
//!     log: (destination: Terminal, level: "debug"),
//!     engine: (step_delay_ms: 20),
//!     jobs: [
//!         (name: "rows", request: Synthesis((record_limit: 500))),
//!         (name: "quality", request: Evaluation(()), depends_on: Some("rows")),
//!     ],
//! )
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use engine_logging::LogDestination;
use log::LevelFilter;
use sds_core::{JobKind, JobRequest};
use sds_engine::ManagerConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::demo_engine::DemoSettings;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read session file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse session file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("unknown log level {0:?}")]
    LogLevel(String),
    #[error("job name {0:?} is used more than once")]
    DuplicateName(String),
    #[error("job {job:?} depends on {dependency:?}, which is not listed before it")]
    UnknownDependency { job: String, dependency: String },
    #[error("job {job:?} depends on {dependency:?}, but an evaluation can only depend on a synthesis")]
    InvalidDependency { job: String, dependency: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum LogTarget {
    Terminal,
    File(PathBuf),
    Both(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub destination: LogTarget,
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            destination: LogTarget::Terminal,
            level: "info".to_string(),
        }
    }
}

impl LogSettings {
    pub fn destination(&self) -> LogDestination {
        match &self.destination {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File(path) => LogDestination::File(path.clone()),
            LogTarget::Both(path) => LogDestination::Both(path.clone()),
        }
    }

    pub fn level(&self) -> Result<LevelFilter, SessionError> {
        LevelFilter::from_str(&self.level).map_err(|_| SessionError::LogLevel(self.level.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionJob {
    pub name: String,
    pub request: JobRequest,
    /// Earlier job this one waits for. An evaluation evaluates its output.
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Cancel the job this long after submitting it.
    #[serde(default)]
    pub cancel_after_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SessionFile {
    pub config: ManagerConfig,
    pub log: LogSettings,
    pub engine: DemoSettings,
    pub jobs: Vec<SessionJob>,
}

impl SessionFile {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = fs::read_to_string(path).map_err(|source| SessionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let session: SessionFile = ron::from_str(&text).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        session.validate()?;
        Ok(session)
    }

    /// Checks job names and dependencies. Job parameters are left to the manager.
    pub fn validate(&self) -> Result<(), SessionError> {
        self.log.level()?;
        let mut seen: Vec<(&str, JobKind)> = Vec::new();
        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(SessionError::DuplicateName(job.name.clone()));
            }
            if let Some(dependency) = &job.depends_on {
                let Some(&(_, kind)) = seen.iter().find(|(name, _)| *name == dependency.as_str()) else {
                    return Err(SessionError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                if job.request.kind() == JobKind::Evaluation && kind != JobKind::Synthesis {
                    return Err(SessionError::InvalidDependency {
                        job: job.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            seen.push((job.name.as_str(), job.request.kind()));
        }
        Ok(())
    }
}
