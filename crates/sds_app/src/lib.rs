//! Headless driver that runs synthesis sessions through the job manager.
pub mod demo_engine;
pub mod observer;
pub mod report;
pub mod runner;
pub mod session;

pub use demo_engine::{DemoEngine, DemoSettings};
pub use observer::LoggingObserver;
pub use report::{JobSummary, SessionReport};
pub use runner::{run_session, RunError, SessionRunner};
pub use session::{LogSettings, LogTarget, SessionError, SessionFile, SessionJob};
