//! Runner settings loaded from TOML

use crate::error::{Result, RunnerError};
use coderunner_common::{ExecutionConfig, ExecutionOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runner settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Limits applied to every execution
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// V8 isolate settings
    #[serde(default)]
    pub javascript: JavaScriptSettings,
    /// Python interpreter settings
    #[serde(default)]
    pub python: PythonSettings,
}

/// Defaults and hard caps for per-call limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Loop-guard ceiling used when the caller does not pick one
    pub default_max_iterations: u64,
    /// Largest ceiling a caller may request
    pub iteration_cap: u64,
    /// Wall-clock budget used when the caller does not pick one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Longest budget a caller may request
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
    /// Budget for bringing a language runtime up before it reports ready
    #[serde(with = "humantime_serde")]
    pub runtime_load_timeout: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let defaults = ExecutionConfig::default();
        Self {
            default_max_iterations: defaults.max_iterations,
            iteration_cap: 10_000_000,
            default_timeout: defaults.timeout(),
            max_timeout: Duration::from_secs(60),
            runtime_load_timeout: Duration::from_secs(30),
        }
    }
}

/// V8 isolate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaScriptSettings {
    /// Heap ceiling for each isolate, in bytes
    pub max_heap_bytes: usize,
}

impl Default for JavaScriptSettings {
    fn default() -> Self {
        Self {
            max_heap_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Python interpreter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonSettings {
    /// Interpreter executable, resolved through PATH when not absolute
    pub executable: String,
    /// Working directory for the interpreter process (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for PythonSettings {
    fn default() -> Self {
        Self {
            executable: "python3".to_string(),
            working_dir: None,
        }
    }
}

impl RunnerSettings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RunnerError::Config {
            path: path.to_path_buf(),
            message: format!("Failed to read settings: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| RunnerError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load settings from a file if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RunnerError::Other(e.into()))
    }

    /// Resolve caller overrides into concrete, bounded limits
    pub fn resolve(&self, options: Option<ExecutionOptions>) -> ExecutionConfig {
        let options = options.unwrap_or_default();
        let exec = &self.execution;

        let cap = exec.iteration_cap.max(1);
        let max_iterations = options
            .max_iterations
            .unwrap_or(exec.default_max_iterations)
            .clamp(1, cap);

        let max_timeout_ms = (exec.max_timeout.as_millis() as u64).max(1);
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(exec.default_timeout.as_millis() as u64)
            .clamp(1, max_timeout_ms);

        ExecutionConfig {
            max_iterations,
            timeout_ms,
        }
    }
}
