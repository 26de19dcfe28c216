//! Structured program output and the per-call execution result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Advisory line appended when a caller cancels an in-flight run
pub const STOPPED_BY_USER: &str = "Execution stopped by user";

/// Prefix of the message raised by the loop guard in every language
pub const INFINITE_LOOP_PREFIX: &str = "Infinite loop detected";

/// Prefix used when the embedded interpreter could not be brought up
pub const RUNTIME_LOAD_PREFIX: &str = "Failed to load";

/// Category of a captured output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Info,
    Warn,
    Error,
    /// Explicit non-undefined value produced by the snippet itself
    Result,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Log => "log",
            OutputKind::Info => "info",
            OutputKind::Warn => "warn",
            OutputKind::Error => "error",
            OutputKind::Result => "result",
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted unit of program output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub content: String,
    /// Capture time. Workers may leave it out on the wire; the host stamps
    /// every line when it is appended to an [`OutputLog`].
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl OutputLine {
    pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn log(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Log, content)
    }

    pub fn info(content: impl Into<String>) -> Self {
        Self::new(OutputKind::Info, content)
    }
}

/// Ordered accumulator for the lines of a single execution.
///
/// Lines keep arrival order, and timestamps are clamped so they never run
/// backwards even if the wall clock is adjusted mid-run.
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    lines: Vec<OutputLine>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut line: OutputLine) {
        let now = Utc::now();
        line.timestamp = match self.lines.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<OutputLine> {
        self.lines
    }
}

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Exception raised by the submitted program
    Guest,
    /// Loop-guard ceiling exceeded
    IterationLimit,
    /// Wall-clock budget exhausted; the worker was terminated
    Timeout,
    /// Cancelled through `stop()`
    Stopped,
    /// The language runtime could not be initialised
    RuntimeLoad,
    /// Another execution was already running in this session
    Busy,
    /// Worker crash or protocol breakage
    Transport,
}

impl FailureKind {
    /// Classify an error reported by a worker from its message text
    pub fn classify(message: &str) -> Self {
        if message.contains(INFINITE_LOOP_PREFIX) {
            FailureKind::IterationLimit
        } else if message.starts_with(RUNTIME_LOAD_PREFIX) {
            FailureKind::RuntimeLoad
        } else {
            FailureKind::Guest
        }
    }
}

/// The single value returned to the caller per execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub outputs: Vec<OutputLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Elapsed wall-clock milliseconds from dispatch to completion
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn succeeded(outputs: Vec<OutputLine>, execution_time: u64) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            execution_time,
            failure: None,
        }
    }

    pub fn failed(
        kind: FailureKind,
        error: impl Into<String>,
        outputs: Vec<OutputLine>,
        execution_time: u64,
    ) -> Self {
        Self {
            success: false,
            outputs,
            error: Some(error.into()),
            execution_time,
            failure: Some(kind),
        }
    }

    /// Lines of a given kind, in emission order
    pub fn lines_of(&self, kind: OutputKind) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .filter(move |line| line.kind == kind)
            .map(|line| line.content.as_str())
    }
}
