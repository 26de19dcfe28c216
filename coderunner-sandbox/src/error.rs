//! Error types for the code runner engine

use std::path::PathBuf;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Failures raised by the engine itself (never by guest code)
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Settings file missing or malformed
    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Settings text could not be parsed
    #[error("Failed to parse settings: {0}")]
    Settings(#[from] toml::de::Error),

    /// Interpreter process could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Interpreter started but never became ready
    #[error("Failed to load {runtime} runtime: {reason}")]
    RuntimeLoad { runtime: String, reason: String },

    /// Worker thread or process went away mid-conversation
    #[error("Worker exited unexpectedly: {0}")]
    WorkerExited(String),

    /// Worker sent something that is not part of the protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunnerError {
    pub fn runtime_load(runtime: impl Into<String>, reason: impl Into<String>) -> Self {
        RunnerError::RuntimeLoad {
            runtime: runtime.into(),
            reason: reason.into(),
        }
    }
}
