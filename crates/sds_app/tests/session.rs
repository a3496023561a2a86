use std::fs;

use pretty_assertions::assert_eq;
use sds_app::{run_session, DemoSettings, LogTarget, SessionError, SessionFile};
use sds_core::{JobKind, JobOutput, JobRequest, JobStatus};
use tempfile::TempDir;

fn write_session(dir: &TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("session.ron");
    fs::write(&path, text).unwrap();
    path
}

fn fast_engine() -> DemoSettings {
    DemoSettings {
        sensitive_records: 200,
        step_delay_ms: 1,
        progress_steps: 4,
    }
}

#[test]
fn load_reads_config_logging_and_jobs() {
    let dir = TempDir::new().unwrap();
    let path = write_session(
        &dir,
        r#"(
            config: (max_concurrent_jobs: 2, engine: (worker_threads: 1)),
            log: (destination: File("sds.log"), level: "debug"),
            engine: (step_delay_ms: 5),
            jobs: [
                (name: "rows", request: Synthesis((record_limit: 500, mode: Unseeded))),
                (name: "quality", request: Evaluation((sensitivity_threshold: 2)), depends_on: Some("rows")),
                (name: "slow", request: Synthesis(()), cancel_after_ms: Some(10)),
            ],
        )"#,
    );

    let session = SessionFile::load(&path).unwrap();

    assert_eq!(session.config.max_concurrent_jobs, 2);
    assert_eq!(session.config.engine.worker_threads, 1);
    assert_eq!(session.config.registry_capacity, 1024);
    assert_eq!(session.log.destination, LogTarget::File("sds.log".into()));
    assert_eq!(session.log.level().unwrap(), log::LevelFilter::Debug);
    assert_eq!(session.engine.step_delay_ms, 5);
    assert_eq!(session.engine.sensitive_records, 1_000);
    assert_eq!(
        session
            .jobs
            .iter()
            .map(|job| (job.name.as_str(), job.request.kind()))
            .collect::<Vec<_>>(),
        vec![
            ("rows", JobKind::Synthesis),
            ("quality", JobKind::Evaluation),
            ("slow", JobKind::Synthesis),
        ]
    );
    assert_eq!(session.jobs[1].depends_on.as_deref(), Some("rows"));
    assert_eq!(session.jobs[2].cancel_after_ms, Some(10));
}

#[test]
fn empty_session_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_session(&dir, "()");

    let session = SessionFile::load(&path).unwrap();
    assert_eq!(session, SessionFile::default());
}

#[test]
fn load_reports_missing_and_malformed_files() {
    let dir = TempDir::new().unwrap();
    let missing = SessionFile::load(&dir.path().join("nope.ron")).unwrap_err();
    assert!(matches!(missing, SessionError::Read { .. }));

    let path = write_session(&dir, "(jobs: [(name: \"x\")])");
    let malformed = SessionFile::load(&path).unwrap_err();
    assert!(matches!(malformed, SessionError::Parse { .. }));
}

#[test]
fn validation_rejects_bad_names_dependencies_and_levels() {
    let dir = TempDir::new().unwrap();
    let cases = [
        (
            r#"(jobs: [(name: "a", request: Synthesis(())), (name: "a", request: Synthesis(()))])"#,
            "used more than once",
        ),
        (
            r#"(jobs: [(name: "e", request: Evaluation(()), depends_on: Some("later")), (name: "later", request: Synthesis(()))])"#,
            "not listed before it",
        ),
        (
            r#"(jobs: [(name: "e1", request: Evaluation(())), (name: "e2", request: Evaluation(()), depends_on: Some("e1"))])"#,
            "can only depend on a synthesis",
        ),
        (r#"(log: (level: "chatty"))"#, "unknown log level"),
    ];

    for (text, expected) in cases {
        let path = write_session(&dir, text);
        let err = SessionFile::load(&path).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{text}: unexpected error {err}"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn session_runs_synthesis_then_dependent_evaluation() {
    engine_logging::initialize_for_tests();
    let session = SessionFile {
        engine: fast_engine(),
        jobs: ron::from_str(
            r#"[
                (name: "rows", request: Synthesis((record_limit: 50))),
                (name: "quality", request: Evaluation(()), depends_on: Some("rows")),
                (name: "broken", request: Synthesis((record_limit: -5))),
            ]"#,
        )
        .unwrap(),
        ..SessionFile::default()
    };

    let report = run_session(&session).await.unwrap();

    let outcomes: Vec<(&str, Option<JobStatus>)> = report
        .jobs
        .iter()
        .map(|job| (job.name.as_str(), job.status))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("rows", Some(JobStatus::Finished)),
            ("quality", Some(JobStatus::Finished)),
            ("broken", None),
        ]
    );
    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.jobs[0].result.as_deref(),
        Some(JobOutput::Synthesis(output)) if output.record_count == 50
    ));
    assert!(matches!(
        report.jobs[1].result.as_deref(),
        Some(JobOutput::Evaluation(_))
    ));
    assert!(report.jobs[2]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("record_limit")));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["jobs"][0]["status"], "Finished");
    assert_eq!(json["jobs"][2]["status"], serde_json::Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_timer_terminates_job_and_skips_dependents() {
    engine_logging::initialize_for_tests();
    let session = SessionFile {
        engine: DemoSettings {
            step_delay_ms: 1_000,
            ..fast_engine()
        },
        jobs: ron::from_str(
            r#"[
                (name: "slow", request: Synthesis(()), cancel_after_ms: Some(20)),
                (name: "quality", request: Evaluation(()), depends_on: Some("slow")),
            ]"#,
        )
        .unwrap(),
        ..SessionFile::default()
    };

    let report = run_session(&session).await.unwrap();

    assert_eq!(report.jobs[0].status, Some(JobStatus::Terminated));
    assert!(report.jobs[0].result.is_none());
    assert_eq!(report.jobs[1].status, None);
    assert!(report.jobs[1]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("ended terminated")));
}

#[test]
fn evaluation_request_parses_with_partial_fields() {
    let request: JobRequest = ron::from_str("Evaluation((reporting_length: 4))").unwrap();
    assert_eq!(request.kind(), JobKind::Evaluation);
}
