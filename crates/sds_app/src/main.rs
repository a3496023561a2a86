use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_info, engine_warn};
use sds_app::{run_session, SessionFile};

#[derive(Parser)]
#[command(name = "sds")]
#[command(about = "Run synthesis and evaluation jobs described by a session file", long_about = None)]
struct Cli {
    /// Session file (RON)
    session: PathBuf,

    /// Write the JSON summary to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the log level from the session file
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut session = SessionFile::load(&cli.session)
        .with_context(|| format!("loading session {}", cli.session.display()))?;
    if let Some(level) = cli.log_level {
        session.log.level = level;
    }
    engine_logging::initialize(&session.log.destination(), session.log.level()?);
    engine_info!(
        "running {} jobs from {}",
        session.jobs.len(),
        cli.session.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .context("starting async runtime")?;
    let report = runtime
        .block_on(run_session(&session))
        .context("running session")?;

    let json = report.to_json().context("serializing session report")?;
    match &cli.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => println!("{json}"),
    }

    let failures = report.failures();
    if failures > 0 {
        engine_warn!("{} of {} jobs did not finish", failures, report.jobs.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
