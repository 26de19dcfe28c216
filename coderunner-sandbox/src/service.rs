//! Code runner service - the only entry point callers use

use crate::error::RunnerError;
use crate::execution::{ExecutionId, ExecutionState, ExecutionStatus};
use crate::language::Language;
use crate::runtime::{PythonRuntime, Runtime, V8Runtime};
use crate::settings::RunnerSettings;
use crate::types::{LoadPhase, RunRequest};
use coderunner_common::{
    ExecutionOptions, ExecutionResult, FailureKind, OutputLine, OutputLog, WorkerMessage,
    STOPPED_BY_USER,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Reported when `execute` is called while another run is in flight
pub const BUSY_MESSAGE: &str = "Another execution is already running";

/// Reported when a worker goes away without completing its run
pub const WORKER_EXITED_MESSAGE: &str = "Worker exited unexpectedly";

/// Runs student snippets one at a time against the language runtimes
///
/// One service is one logical session: it owns a single execution slot, so
/// a second `execute` while a run is in flight is rejected rather than
/// interleaved.
pub struct CodeRunnerService {
    settings: RunnerSettings,
    javascript: Arc<dyn Runtime>,
    python: Arc<dyn Runtime>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    current: Option<ExecutionState>,
    last: Option<ExecutionStatus>,
}

impl CodeRunnerService {
    /// Create a service backed by V8 and a python3 child process
    pub fn new(settings: RunnerSettings) -> Self {
        let javascript = Arc::new(V8Runtime::new(settings.javascript.clone()));
        let python = Arc::new(PythonRuntime::new(settings.python.clone()));
        Self::with_runtimes(settings, javascript, python)
    }

    /// Create a service over arbitrary runtimes
    pub fn with_runtimes(
        settings: RunnerSettings,
        javascript: Arc<dyn Runtime>,
        python: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            settings,
            javascript,
            python,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Warm a runtime up ahead of the first run. Failures are logged, never
    /// returned; the next `execute` reports them.
    pub async fn preload(&self, language: Language) {
        let runtime = self.runtime(language);
        let started = Instant::now();
        match runtime.warm_up().await {
            Ok(()) => tracing::debug!(
                language = %language,
                runtime = runtime.name(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Runtime preloaded"
            ),
            Err(e) => tracing::warn!(
                language = %language,
                runtime = runtime.name(),
                error = %e,
                "Runtime preload failed"
            ),
        }
    }

    /// Run a snippet to completion, timeout or stop
    ///
    /// Never fails: every outcome, including engine trouble, comes back as
    /// an `ExecutionResult`.
    pub async fn execute(
        &self,
        code: &str,
        language: Language,
        options: Option<ExecutionOptions>,
    ) -> ExecutionResult {
        let Some(state) = self.claim(language) else {
            tracing::warn!(language = %language, "Rejected execute while another run is active");
            return ExecutionResult::failed(FailureKind::Busy, BUSY_MESSAGE, Vec::new(), 0);
        };

        let runtime = self.runtime(language).clone();
        let mut release = Release {
            service: self,
            runtime: runtime.clone(),
            id: state.id,
            status: None,
        };

        let config = self.settings.resolve(options);
        tracing::info!(
            execution_id = %state.id,
            language = %language,
            runtime = runtime.name(),
            code_len = code.len(),
            max_iterations = config.max_iterations,
            timeout_ms = config.timeout_ms,
            "Executing code"
        );

        let request = RunRequest {
            id: state.id,
            code: code.to_string(),
            config,
        };
        let result = self.drive(runtime.as_ref(), request, &state).await;

        release.status = Some(match result.failure {
            None => ExecutionStatus::Succeeded,
            Some(FailureKind::Stopped) => ExecutionStatus::Stopped,
            Some(_) => ExecutionStatus::Failed,
        });
        tracing::info!(
            execution_id = %state.id,
            language = %language,
            success = result.success,
            failure = ?result.failure,
            duration_ms = result.execution_time,
            outputs = result.outputs.len(),
            "Execution finished"
        );
        result
    }

    /// Stop the in-flight run. Returns whether there was one.
    pub fn stop(&self) -> bool {
        match &self.slot().current {
            Some(state) => {
                tracing::info!(execution_id = %state.id, "Stop requested");
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// `Running` while a run is in flight, otherwise `Idle`
    pub fn status(&self) -> ExecutionStatus {
        if self.slot().current.is_some() {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Idle
        }
    }

    /// How the previous run ended
    pub fn last_status(&self) -> Option<ExecutionStatus> {
        self.slot().last
    }

    /// Load progress of the Python interpreter
    pub fn python_phase(&self) -> LoadPhase {
        self.python.phase()
    }

    async fn drive(
        &self,
        runtime: &dyn Runtime,
        request: RunRequest,
        state: &ExecutionState,
    ) -> ExecutionResult {
        let id = request.id;
        let timeout = request.config.timeout();
        let mut log = OutputLog::new();

        let mut stream = match runtime.execute(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(execution_id = %id, error = %e, "Failed to dispatch run");
                let kind = match e {
                    RunnerError::RuntimeLoad { .. } => FailureKind::RuntimeLoad,
                    _ => FailureKind::Transport,
                };
                return ExecutionResult::failed(kind, e.to_string(), Vec::new(), state.elapsed_ms());
            }
        };

        // the load budget runs until the worker is ready, then the run budget
        let load_timeout = self.settings.execution.runtime_load_timeout;
        let deadline = tokio::time::sleep(load_timeout);
        tokio::pin!(deadline);
        let mut ready = false;
        let mut error: Option<String> = None;

        loop {
            tokio::select! {
                biased;

                _ = state.cancel.cancelled() => {
                    runtime.terminate();
                    log.push(OutputLine::info(STOPPED_BY_USER));
                    return ExecutionResult::failed(
                        FailureKind::Stopped,
                        STOPPED_BY_USER,
                        log.into_lines(),
                        state.elapsed_ms(),
                    );
                }

                _ = &mut deadline => {
                    runtime.terminate();
                    let (kind, message) = if ready {
                        (
                            FailureKind::Timeout,
                            format!("Execution timed out after {}ms", timeout.as_millis()),
                        )
                    } else {
                        let reason = format!("timed out after {}s", load_timeout.as_secs_f64());
                        (
                            FailureKind::RuntimeLoad,
                            RunnerError::runtime_load(state.language.display_name(), reason)
                                .to_string(),
                        )
                    };
                    tracing::warn!(execution_id = %id, error = %message, "Run exceeded its budget");
                    return ExecutionResult::failed(kind, message, log.into_lines(), state.elapsed_ms());
                }

                message = stream.recv() => match message {
                    Some(WorkerMessage::Ready) => {
                        if !ready {
                            ready = true;
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + timeout);
                        }
                    }
                    Some(WorkerMessage::Output { data }) => log.push(data),
                    Some(WorkerMessage::Error { error: message }) => error = Some(message),
                    Some(WorkerMessage::Complete { execution_time }) => {
                        tracing::debug!(execution_id = %id, worker_time_ms = execution_time, "Worker completed");
                        let elapsed = state.elapsed_ms();
                        return match error {
                            Some(message) => ExecutionResult::failed(
                                FailureKind::classify(&message),
                                message,
                                log.into_lines(),
                                elapsed,
                            ),
                            None => ExecutionResult::succeeded(log.into_lines(), elapsed),
                        };
                    }
                    None => {
                        tracing::warn!(execution_id = %id, "Worker stream closed before completion");
                        runtime.terminate();
                        let message = error.unwrap_or_else(|| WORKER_EXITED_MESSAGE.to_string());
                        return ExecutionResult::failed(
                            FailureKind::Transport,
                            message,
                            log.into_lines(),
                            state.elapsed_ms(),
                        );
                    }
                },
            }
        }
    }

    fn claim(&self, language: Language) -> Option<ExecutionState> {
        let mut slot = self.slot();
        if slot.current.is_some() {
            return None;
        }
        let state = ExecutionState::new(ExecutionId::new(), language);
        slot.current = Some(state.clone());
        Some(state)
    }

    fn runtime(&self, language: Language) -> &Arc<dyn Runtime> {
        match language {
            Language::JavaScript => &self.javascript,
            Language::Python => &self.python,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Frees the slot when `execute` returns or its future is dropped
struct Release<'a> {
    service: &'a CodeRunnerService,
    runtime: Arc<dyn Runtime>,
    id: ExecutionId,
    /// Set once the run settled; unset means the caller gave up on it
    status: Option<ExecutionStatus>,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let status = match self.status {
            Some(status) => status,
            None => {
                tracing::debug!(execution_id = %self.id, "Execute abandoned, terminating worker");
                self.runtime.terminate();
                ExecutionStatus::Stopped
            }
        };

        let mut slot = self.service.slot();
        if slot.current.as_ref().map(|state| state.id) == Some(self.id) {
            slot.current = None;
        }
        slot.last = Some(status);
    }
}
