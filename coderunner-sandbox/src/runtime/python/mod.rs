//! Python runtime backed by a long-lived interpreter process

mod interpreter;
pub mod traceback;

pub use interpreter::{Interpreter, LOADING_MESSAGE};

use crate::error::Result;
use crate::settings::PythonSettings;
use crate::types::{ExecutionStream, LoadPhase, RunRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Python runtime
pub struct PythonRuntime {
    interpreter: Arc<Interpreter>,
}

impl PythonRuntime {
    pub fn new(settings: PythonSettings) -> Self {
        Self {
            interpreter: Arc::new(Interpreter::new(settings)),
        }
    }
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new(PythonSettings::default())
    }
}

#[async_trait]
impl super::Runtime for PythonRuntime {
    async fn warm_up(&self) -> Result<()> {
        self.interpreter.preload().await
    }

    async fn execute(&self, request: RunRequest) -> Result<ExecutionStream> {
        let (events, stream) = ExecutionStream::channel();
        let interpreter = self.interpreter.clone();
        let cancel = interpreter.arm();

        tracing::debug!(execution_id = %request.id, phase = %interpreter.phase(), "Dispatching Python run");
        tokio::spawn(async move { interpreter.run(request, cancel, events).await });

        Ok(stream)
    }

    fn terminate(&self) {
        self.interpreter.terminate();
    }

    fn phase(&self) -> LoadPhase {
        self.interpreter.phase()
    }

    fn name(&self) -> &str {
        "python"
    }
}
