//! Runtime trait and implementations

mod process;
pub mod python;
pub mod v8;

use crate::types::{ExecutionStream, LoadPhase, RunRequest};
use crate::Result;
use async_trait::async_trait;

pub use process::WorkerProcess;
pub use python::PythonRuntime;
pub use v8::V8Runtime;

/// A language worker the service can dispatch snippets to
///
/// `execute` hands back the worker's message stream as soon as the run is
/// dispatched; failures while the snippet runs arrive on the stream, not as
/// an `Err`. At most one run is in flight per runtime.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Bring the runtime up ahead of the first run
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Start a run and return its streaming output
    async fn execute(&self, request: RunRequest) -> Result<ExecutionStream>;

    /// Hard-stop the in-flight run. Must not block: it is called from
    /// `stop()` and from timeout handling while guest code may be spinning.
    fn terminate(&self);

    /// Load progress, for runtimes that have one
    fn phase(&self) -> LoadPhase {
        LoadPhase::Loaded
    }

    /// Get runtime name
    fn name(&self) -> &str;
}
