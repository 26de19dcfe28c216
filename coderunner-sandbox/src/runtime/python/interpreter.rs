//! The lazily loaded Python interpreter shared by every run

use super::traceback;
use crate::error::{Result, RunnerError};
use crate::guard::python::instrument;
use crate::runtime::WorkerProcess;
use crate::settings::PythonSettings;
use crate::types::{EventSender, LoadPhase, RunRequest};
use coderunner_common::{HostMessage, OutputLine, WorkerEnvelope, WorkerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Program the interpreter process runs
const WORKER_PROGRAM: &str = include_str!("worker.py");

/// Announced to the caller before a cold start
pub const LOADING_MESSAGE: &str = "Loading Python runtime...";

const RUNTIME_NAME: &str = "Python";

enum LoadState {
    Unloaded,
    Loaded(WorkerProcess),
    /// Reason of the last failed load; returned to every caller until a
    /// preload retries
    Failed(String),
}

/// Interpreter singleton
///
/// The async mutex doubles as the in-flight load: whoever holds it is either
/// loading or running, and everyone else waits for that to finish instead of
/// starting a second interpreter.
pub struct Interpreter {
    settings: PythonSettings,
    state: Mutex<LoadState>,
    phase: watch::Sender<LoadPhase>,
    /// Cancels the current run, reachable without the state lock
    current: StdMutex<Option<CancellationToken>>,
    /// Last run sequence number handed to the worker
    runs: AtomicU64,
    /// Number of failed loads so far
    failures: AtomicU64,
}

impl Interpreter {
    pub fn new(settings: PythonSettings) -> Self {
        let (phase, _) = watch::channel(LoadPhase::Unloaded);
        Self {
            settings,
            state: Mutex::new(LoadState::Unloaded),
            phase,
            current: StdMutex::new(None),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        *self.phase.borrow()
    }

    /// Load the interpreter if it is not loaded yet. A failure recorded
    /// before this call is cleared first, so this is also the manual retry.
    /// A load that fails while this call waits is shared, not repeated.
    pub async fn preload(&self) -> Result<()> {
        let failures = self.failures.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let stale_failure = matches!(*state, LoadState::Failed(_))
            && self.failures.load(Ordering::SeqCst) == failures;
        if stale_failure {
            tracing::info!("Retrying Python runtime load");
            *state = LoadState::Unloaded;
            self.set_phase(LoadPhase::Unloaded);
        }
        self.ensure_loaded(&mut state).await
    }

    /// Register a new run and return the token that cancels it. Any run
    /// still registered is cancelled.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.current_run().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Execute one run, posting its messages to `events`.
    ///
    /// If the process dies mid-run the sender is dropped without a
    /// `Complete`, which the host reads as a worker crash. Cancellation kills
    /// the process, whether it is loading or running guest code.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken, events: EventSender) {
        let mut state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            state = self.state.lock() => state,
        };

        let cold = match &*state {
            LoadState::Unloaded => true,
            LoadState::Loaded(process) => !process.is_alive(),
            LoadState::Failed(_) => false,
        };
        if cold {
            let _ = events.send(WorkerMessage::output(OutputLine::info(LOADING_MESSAGE)));
        }

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // dropping the load future killed the half-started process
                if matches!(*state, LoadState::Unloaded) {
                    self.set_phase(LoadPhase::Unloaded);
                }
                tracing::debug!(execution_id = %request.id, "Python load cancelled");
                return;
            }
            loaded = self.ensure_loaded(&mut state) => loaded,
        };
        if let Err(e) = loaded {
            let _ = events.send(WorkerMessage::error(e.to_string()));
            let _ = events.send(WorkerMessage::complete(0));
            return;
        }
        let LoadState::Loaded(process) = &mut *state else {
            return;
        };
        let _ = events.send(WorkerMessage::Ready);

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let source = instrument(&request.code, request.config.max_iterations);
        let message = HostMessage::Run {
            run,
            code: source.source.clone(),
            config: request.config,
        };
        if let Err(e) = process.send(&message).await {
            tracing::warn!(execution_id = %request.id, error = %e, "Python worker rejected run");
            self.unload(&mut state);
            return;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(execution_id = %request.id, "Terminating Python worker");
                    self.unload(&mut state);
                    return;
                }
                next = process.recv() => next,
            };
            let Some(WorkerEnvelope {
                run: from,
                recycle,
                message,
            }) = next
            else {
                tracing::debug!(execution_id = %request.id, "Python worker exited mid-run");
                self.unload(&mut state);
                return;
            };
            if from != run {
                tracing::debug!(execution_id = %request.id, run, from, "Dropping message from an earlier run");
                continue;
            }
            match message {
                WorkerMessage::Error { error } => {
                    let _ = events.send(WorkerMessage::error(traceback::clean(&error, &source)));
                }
                message if message.is_terminal() => {
                    if recycle {
                        tracing::info!(execution_id = %request.id, "Guest threads outlived the run; recycling Python worker");
                        self.unload(&mut state);
                    }
                    let _ = events.send(message);
                    return;
                }
                WorkerMessage::Ready => {}
                message => {
                    let _ = events.send(message);
                }
            }
        }
    }

    /// Cancel the current run. Never blocks; the next run reloads.
    pub fn terminate(&self) {
        if let Some(token) = self.current_run().take() {
            token.cancel();
        }
    }

    async fn ensure_loaded(&self, state: &mut LoadState) -> Result<()> {
        if matches!(state, LoadState::Loaded(process) if !process.is_alive()) {
            self.unload(state);
        }

        if matches!(state, LoadState::Unloaded) {
            self.set_phase(LoadPhase::Loading);
            match self.load().await {
                Ok(process) => {
                    *state = LoadState::Loaded(process);
                    self.set_phase(LoadPhase::Loaded);
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Failed to load Python runtime");
                    self.failures.fetch_add(1, Ordering::SeqCst);
                    *state = LoadState::Failed(reason);
                    self.set_phase(LoadPhase::Failed);
                }
            }
        }

        match state {
            LoadState::Loaded(_) => Ok(()),
            LoadState::Failed(reason) => Err(RunnerError::runtime_load(RUNTIME_NAME, reason.clone())),
            LoadState::Unloaded => Err(RunnerError::WorkerExited(
                "Python runtime is not loaded".to_string(),
            )),
        }
    }

    async fn load(&self) -> std::result::Result<WorkerProcess, String> {
        let started = std::time::Instant::now();
        let mut process = WorkerProcess::spawn(self.command(), &self.settings.executable)
            .map_err(|e| e.to_string())?;

        match process.recv().await.map(|envelope| envelope.message) {
            Some(WorkerMessage::Ready) => {
                tracing::info!(
                    executable = %self.settings.executable,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Python runtime loaded"
                );
                Ok(process)
            }
            Some(other) => Err(format!("unexpected message during startup: {:?}", other)),
            None => Err(format!("{} exited during startup", self.settings.executable)),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.settings.executable);
        command
            .arg("-I")
            .arg("-u")
            .arg("-c")
            .arg(WORKER_PROGRAM)
            .env_clear()
            .current_dir(
                self.settings
                    .working_dir
                    .clone()
                    .unwrap_or_else(std::env::temp_dir),
            );
        // only for locating the executable itself
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
    }

    fn unload(&self, state: &mut LoadState) {
        // dropping the process kills it
        *state = LoadState::Unloaded;
        self.set_phase(LoadPhase::Unloaded);
    }

    fn set_phase(&self, phase: LoadPhase) {
        self.phase.send_replace(phase);
    }

    fn current_run(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
