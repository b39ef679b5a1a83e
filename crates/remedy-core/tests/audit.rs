//! Run records persisted at terminal states.

use std::sync::Arc;

use remedy_core::fakes::{InMemoryCaseStore, ScriptedModel};
use remedy_core::{
    read_run_record, write_run_record, Alert, AlertClassifier, CaseRetriever, GenerationLimits,
    LanguageModel, OperationPolicy, ParameterGenerator, Pipeline, PipelineRun, RemedyError,
    RetryPolicy, RunState, SamplingSettings, Severity, StagingGate, TemplateCatalog,
};

fn pipeline(model: Arc<ScriptedModel>, staging: &std::path::Path) -> Pipeline {
    let model: Arc<dyn LanguageModel> = model;
    let retry = RetryPolicy {
        max_attempts: 1,
        backoff_base_ms: 1,
        timeout_ms: 1_000,
    };
    let sampling = SamplingSettings {
        max_tokens: 64,
        temperature: 0.1,
    };
    Pipeline::new(
        AlertClassifier::new(model.clone(), sampling, retry.clone()),
        CaseRetriever::new(Arc::new(InMemoryCaseStore::new()), 3, retry.clone()),
        ParameterGenerator::new(model, sampling, retry, Arc::new(GenerationLimits::default())),
        Arc::new(TemplateCatalog::builtin()),
        Arc::new(OperationPolicy::standard()),
        StagingGate::new(staging).unwrap(),
    )
}

#[tokio::test]
async fn finished_runs_are_written_and_verified() {
    let dir = tempfile::tempdir().unwrap();
    let audit_dir = dir.path().join("audit");
    let model = Arc::new(
        ScriptedModel::new()
            .reply(r#"{"category": "service_down", "target_node": "redfin", "target_service": "redis.service", "summary": "redis down"}"#)
            .reply(r#"{"service_name": "redis.service", "node": "redfin"}"#),
    );
    let pipeline = pipeline(model, &dir.path().join("staging")).with_audit_dir(&audit_dir);

    let run = pipeline
        .run(Alert::new("alert-100", "redis.service down on redfin", Severity::Critical))
        .await
        .unwrap();
    assert_eq!(run.state, RunState::Staged);

    let restored = read_run_record(&run.run_id, &audit_dir).unwrap();
    assert_eq!(restored.run_id, run.run_id);
    assert_eq!(restored.state, RunState::Staged);
    assert_eq!(restored.transitions, run.transitions);
    assert_eq!(restored.variables, run.variables);
    assert_eq!(restored.validation, run.validation);
    assert_eq!(restored.staged_path, run.staged_path);
}

#[tokio::test]
async fn failed_runs_are_audited_too() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new().reply(r#"{"category": "unknown"}"#));
    let pipeline = pipeline(model, &dir.path().join("staging")).with_audit_dir(dir.path());

    let run = pipeline
        .run(Alert::new("alert-101", "something odd", Severity::Info))
        .await
        .unwrap();
    assert_eq!(run.state, RunState::NoTemplateManualReview);

    let restored = read_run_record(&run.run_id, dir.path()).unwrap();
    assert_eq!(restored.failure, run.failure);
}

#[test]
fn tampered_record_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let run = PipelineRun::new(Alert::new("alert-102", "x", Severity::Warning));
    let path = write_run_record(&run, dir.path()).unwrap();

    let json = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, json.replace("alert-102", "alert-999")).unwrap();

    let err = read_run_record(&run.run_id, dir.path()).unwrap_err();
    assert!(matches!(err, RemedyError::DigestMismatch { .. }));
}

#[test]
fn missing_record_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_run_record("no-such-run", dir.path()).unwrap_err();
    assert!(matches!(err, RemedyError::Io(_)));
}

#[test]
fn record_directory_holds_only_the_record_and_digest() {
    let dir = tempfile::tempdir().unwrap();
    let mut run = PipelineRun::new(Alert::new("alert-103", "x", Severity::Warning));
    write_run_record(&run, dir.path()).unwrap();
    run.template_id = Some("restart_service".to_string());
    let path = write_run_record(&run, dir.path()).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["run.digest", "run.json"]);

    let restored = read_run_record(&run.run_id, dir.path()).unwrap();
    assert_eq!(restored.template_id.as_deref(), Some("restart_service"));
}

#[test]
fn record_without_digest_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let run = PipelineRun::new(Alert::new("alert-104", "x", Severity::Warning));
    let path = write_run_record(&run, dir.path()).unwrap();
    std::fs::remove_file(path.with_file_name("run.digest")).unwrap();

    let err = read_run_record(&run.run_id, dir.path()).unwrap_err();
    assert!(matches!(err, RemedyError::Io(_)), "{err:?}");
}
