//! Per-call resource policy for guest code

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fully resolved limits for one execution. Both bounds are always finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Ceiling on loop-guard ticks across the whole program
    pub max_iterations: u64,

    /// Wall-clock budget in milliseconds
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            timeout_ms: 10_000,
        }
    }
}

impl ExecutionConfig {
    pub fn new(max_iterations: u64, timeout: Duration) -> Self {
        Self {
            max_iterations,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Caller-supplied overrides; unset fields fall back to the runner defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub max_iterations: Option<u64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecutionOptions {
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}
