//! Common test utilities shared across integration and E2E tests

use coderunner_common::{ExecutionResult, OutputKind};
use coderunner_sandbox::{CodeRunnerService, ExecutionOptions, RunnerSettings};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Whether a `python3` interpreter is available on PATH
pub fn python_available() -> bool {
    Command::new(RunnerSettings::default().python.executable)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Service with default settings
pub fn service() -> CodeRunnerService {
    setup_test_logging();
    CodeRunnerService::new(RunnerSettings::default())
}

/// Options with an explicit loop-guard ceiling
pub fn iterations(max_iterations: u64) -> Option<ExecutionOptions> {
    Some(ExecutionOptions::default().with_max_iterations(max_iterations))
}

/// Options with an explicit wall-clock budget
pub fn timeout(timeout: Duration) -> Option<ExecutionOptions> {
    Some(ExecutionOptions::default().with_timeout(timeout))
}

/// Contents of every line of the given kind, in order
pub fn lines(result: &ExecutionResult, kind: OutputKind) -> Vec<String> {
    result.lines_of(kind).map(str::to_string).collect()
}

/// Output contents without timestamps, for comparing two runs
pub fn transcript(result: &ExecutionResult) -> Vec<(OutputKind, String)> {
    result
        .outputs
        .iter()
        .map(|line| (line.kind, line.content.clone()))
        .collect()
}
