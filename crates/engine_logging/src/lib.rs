#![deny(missing_docs)]
//! Shared logging utilities for the job-manager workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! logger initialisation for binaries, and a minimal test initializer for the
//! global logger.
//!
//! Every macro accepts an optional `job = <id>;` prefix. Job-tagged records are
//! emitted under the [`JOB_TARGET`] target with the job id in brackets, so a
//! single job's lifecycle can be filtered out of a busy log.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Log target used by the job-tagged macro form.
pub const JOB_TARGET: &str = "sds::job";

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    (job = $job:expr; $($arg:tt)*) => {{
        log::trace!(target: $crate::JOB_TARGET, "[{}] {}", $job, format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    (job = $job:expr; $($arg:tt)*) => {{
        log::debug!(target: $crate::JOB_TARGET, "[{}] {}", $job, format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    (job = $job:expr; $($arg:tt)*) => {{
        log::info!(target: $crate::JOB_TARGET, "[{}] {}", $job, format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    (job = $job:expr; $($arg:tt)*) => {{
        log::warn!(target: $crate::JOB_TARGET, "[{}] {}", $job, format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    (job = $job:expr; $($arg:tt)*) => {{
        log::error!(target: $crate::JOB_TARGET, "[{}] {}", $job, format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Destination for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Write to the given file, truncating it.
    File(PathBuf),
    /// Write to the terminal (stderr for warnings and errors).
    Terminal,
    /// Write to both a file and the terminal.
    Both(PathBuf),
}

/// Initialize the global logger with the specified destination and level.
///
/// A file that cannot be created is reported on stderr and skipped; the
/// remaining loggers are still installed. Calling this twice keeps the first
/// logger.
pub fn initialize(destination: &LogDestination, level: LevelFilter) {
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    match destination {
        LogDestination::Terminal => {
            loggers.push(TermLogger::new(
                level,
                config,
                TerminalMode::Mixed,
                ColorChoice::Auto,
            ));
        }
        LogDestination::File(path) => {
            if let Some(file_logger) = create_file_logger(path, level, config) {
                loggers.push(file_logger);
            }
        }
        LogDestination::Both(path) => {
            loggers.push(TermLogger::new(
                level,
                config.clone(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            ));
            if let Some(file_logger) = create_file_logger(path, level, config) {
                loggers.push(file_logger);
            }
        }
    }

    if loggers.is_empty() {
        return;
    }
    let _ = CombinedLogger::init(loggers);
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn create_file_logger(
    path: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    match File::create(path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not create log file at {:?}: {}", path, err);
            None
        }
    }
}
