use crate::{ExecutionConfig, OutputLine};
use serde::{Deserialize, Serialize};

/// Host -> worker messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    /// Execute one snippet. `code` has already been loop-guarded.
    Run {
        /// Sequence number the worker stamps on every message of this run
        #[serde(default)]
        run: u64,
        code: String,
        config: ExecutionConfig,
    },
    /// Informational. Workers may wind down after the current run, but the
    /// host never relies on this to stop running guest code.
    Cancel,
}

/// Worker -> host messages
///
/// A run produces `Ready`, any number of `Output`, an optional `Error`, and
/// always a final `Complete`. A run that fails before the worker is able to
/// accept it skips `Ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ready,
    Output {
        data: OutputLine,
    },
    Complete {
        #[serde(rename = "executionTime", default)]
        execution_time: u64,
    },
    Error {
        error: String,
    },
}

impl WorkerMessage {
    pub fn output(line: OutputLine) -> Self {
        WorkerMessage::Output { data: line }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            error: message.into(),
        }
    }

    pub fn complete(execution_time: u64) -> Self {
        WorkerMessage::Complete { execution_time }
    }

    /// Whether this message ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Complete { .. })
    }
}

/// A worker message stamped with the run that produced it, as written by
/// long-lived workers. Run 0 is the startup handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    #[serde(default)]
    pub run: u64,
    /// Set on `Complete` when the worker must not serve another run
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recycle: bool,
    #[serde(flatten)]
    pub message: WorkerMessage,
}

impl WorkerEnvelope {
    pub fn new(run: u64, message: WorkerMessage) -> Self {
        Self {
            run,
            recycle: false,
            message,
        }
    }
}
