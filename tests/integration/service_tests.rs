//! Service behaviour that does not depend on guest language semantics

use assert_matches::assert_matches;
use coderunner_common::{ExecutionResult, FailureKind, OutputKind, RUNTIME_LOAD_PREFIX};
use coderunner_sandbox::{
    CodeRunnerService, ExecutionStatus, Language, LoadPhase, RunnerSettings, BUSY_MESSAGE,
};
use coderunner_tests::common::{lines, setup_test_logging};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn settings_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn missing_python_service() -> CodeRunnerService {
    setup_test_logging();
    let file = settings_file(
        r#"
        [python]
        executable = "/nonexistent/bin/python3"
        "#,
    );
    let settings = RunnerSettings::load(file.path()).unwrap();
    CodeRunnerService::new(settings)
}

#[tokio::test]
async fn test_settings_drive_default_limits() {
    setup_test_logging();
    let file = settings_file(
        r#"
        [execution]
        default_max_iterations = 50
        default_timeout = "2s"
        "#,
    );
    let service = CodeRunnerService::new(RunnerSettings::load(file.path()).unwrap());

    let result = service
        .execute("for (;;) {}", Language::JavaScript, None)
        .await;

    assert_matches!(result.failure, Some(FailureKind::IterationLimit));
    assert!(result.error.unwrap().contains("exceeded 50 iterations"));
}

#[tokio::test]
async fn test_iteration_cap_clamps_requests() {
    setup_test_logging();
    let file = settings_file(
        r#"
        [execution]
        iteration_cap = 20
        "#,
    );
    let service = CodeRunnerService::new(RunnerSettings::load(file.path()).unwrap());
    let options = coderunner_sandbox::ExecutionOptions::default().with_max_iterations(1_000_000);

    let result = service
        .execute("while (true) {}", Language::JavaScript, Some(options))
        .await;

    assert!(result.error.unwrap().contains("exceeded 20 iterations"));
}

#[tokio::test]
async fn test_missing_interpreter_fails_fast() {
    let service = missing_python_service();

    let first = service.execute("print(1)", Language::Python, None).await;
    assert!(!first.success);
    assert_matches!(first.failure, Some(FailureKind::RuntimeLoad));
    assert!(first.error.as_deref().unwrap().starts_with(RUNTIME_LOAD_PREFIX));
    assert_eq!(
        lines(&first, OutputKind::Info),
        vec!["Loading Python runtime..."]
    );
    assert_eq!(service.python_phase(), LoadPhase::Failed);

    // the recorded failure is returned without another load attempt
    let started = Instant::now();
    let second = service.execute("print(1)", Language::Python, None).await;
    assert_matches!(second.failure, Some(FailureKind::RuntimeLoad));
    assert!(lines(&second, OutputKind::Info).is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(service.status(), ExecutionStatus::Idle);
}

#[tokio::test]
async fn test_preload_swallows_failure() {
    let service = missing_python_service();

    service.preload(Language::Python).await;
    assert_eq!(service.python_phase(), LoadPhase::Failed);

    // manual retry goes through preload and fails again, quietly
    service.preload(Language::Python).await;
    assert_eq!(service.python_phase(), LoadPhase::Failed);
}

#[tokio::test]
async fn test_language_failure_does_not_affect_other_language() {
    let service = missing_python_service();
    service.preload(Language::Python).await;

    let result = service.execute("6 * 7", Language::JavaScript, None).await;

    assert!(result.success);
    assert_eq!(lines(&result, OutputKind::Result), vec!["42"]);
}

#[tokio::test]
async fn test_busy_while_running() {
    setup_test_logging();
    let service = Arc::new(CodeRunnerService::new(RunnerSettings::default()));

    let task = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .execute(
                    "/^(a+)+$/.test('a'.repeat(40) + 'b')",
                    Language::JavaScript,
                    None,
                )
                .await
        }
    });
    while service.status() != ExecutionStatus::Running {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let rejected = service.execute("1", Language::JavaScript, None).await;
    assert_matches!(rejected.failure, Some(FailureKind::Busy));
    assert_eq!(rejected.error.as_deref(), Some(BUSY_MESSAGE));

    assert!(service.stop());
    let stopped: ExecutionResult = task.await.unwrap();
    assert_matches!(stopped.failure, Some(FailureKind::Stopped));
    assert_eq!(service.last_status(), Some(ExecutionStatus::Stopped));
    assert!(!service.stop());
}

#[test]
fn test_result_wire_shape() {
    let result = ExecutionResult::failed(
        FailureKind::Timeout,
        "Execution timed out after 100ms",
        Vec::new(),
        101,
    );
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["executionTime"], 101);
    assert_eq!(json["failure"], "timeout");
}
