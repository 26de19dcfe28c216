//! Coderunner Sandbox - execution engine for student snippets
//!
//! Runs short JavaScript and Python programs in isolated workers and hands
//! back a structured [`ExecutionResult`]. JavaScript runs in a fresh V8
//! isolate per call; Python runs in a long-lived interpreter process that is
//! loaded on first use. Loops are guarded against runaway iteration and every
//! run is bounded by a wall-clock budget.

mod error;
mod execution;
pub mod guard;
mod language;
pub mod runtime;
mod service;
mod settings;
mod types;

pub use error::{Result, RunnerError};
pub use execution::{ExecutionId, ExecutionState, ExecutionStatus};
pub use guard::InstrumentedSource;
pub use language::Language;
pub use runtime::{PythonRuntime, Runtime, V8Runtime};
pub use service::{CodeRunnerService, BUSY_MESSAGE, WORKER_EXITED_MESSAGE};
pub use settings::{ExecutionSettings, JavaScriptSettings, PythonSettings, RunnerSettings};
pub use types::{EventSender, ExecutionStream, LoadPhase, RunRequest};

pub use coderunner_common::{
    ExecutionConfig, ExecutionOptions, ExecutionResult, FailureKind, OutputKind, OutputLine,
};
