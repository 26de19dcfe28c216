//! Core types for runtime dispatch

use crate::execution::ExecutionId;
use coderunner_common::{ExecutionConfig, WorkerMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One snippet handed to a language runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Correlates log lines across host and worker
    pub id: ExecutionId,

    /// Student source, before loop-guard injection
    pub code: String,

    /// Resolved limits for this run
    pub config: ExecutionConfig,
}

impl RunRequest {
    pub fn new(code: impl Into<String>, config: ExecutionConfig) -> Self {
        Self {
            id: ExecutionId::new(),
            code: code.into(),
            config,
        }
    }
}

/// Sending half of a run's message stream, held by the worker
pub type EventSender = mpsc::UnboundedSender<WorkerMessage>;

/// Messages posted by a worker for one run, in emission order.
///
/// The stream ends (`recv` returns `None`) when the worker drops its sender,
/// which after a `Complete` is normal and before one means the worker died.
#[derive(Debug)]
pub struct ExecutionStream {
    events: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl ExecutionStream {
    /// Create a connected sender/stream pair
    pub fn channel() -> (EventSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { events: rx })
    }

    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.events.recv().await
    }
}

/// Load progress of a runtime that needs warming up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadPhase::Unloaded => "unloaded",
            LoadPhase::Loading => "loading",
            LoadPhase::Loaded => "loaded",
            LoadPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}
