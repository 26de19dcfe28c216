//! Execution slot state

use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status
///
/// A session moves `Idle -> Running -> {Succeeded | Failed | Stopped}` and
/// is immediately ready to run again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// The run currently occupying a session
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub id: ExecutionId,
    pub language: Language,
    pub started_at: Instant,
    /// Fired by `stop()`
    pub cancel: CancellationToken,
}

impl ExecutionState {
    pub fn new(id: ExecutionId, language: Language) -> Self {
        Self {
            id,
            language,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Milliseconds since dispatch
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
