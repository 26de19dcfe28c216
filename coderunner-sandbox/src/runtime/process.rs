//! Long-lived worker process speaking JSON lines over stdio

use crate::error::{Result, RunnerError};
use coderunner_common::{HostMessage, WorkerEnvelope};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A child process that reads `HostMessage` lines on stdin and writes
/// `WorkerEnvelope` lines on stdout.
///
/// Dropping the handle kills the child.
pub struct WorkerProcess {
    program: String,
    stdin: ChildStdin,
    messages: mpsc::UnboundedReceiver<WorkerEnvelope>,
    kill: CancellationToken,
    exited: Arc<AtomicBool>,
}

impl WorkerProcess {
    /// Spawn `command` with piped stdio. Stdio settings on `command` are
    /// overridden.
    pub fn spawn(mut command: Command, program: &str) -> Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Protocol("worker stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Protocol("worker stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        // Parse protocol lines
        let (tx, messages) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerEnvelope>(&line) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(pid, error = %e, line = %line, "Ignoring malformed worker line"),
                }
            }
        });

        // Interpreter diagnostics
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(pid, "worker stderr: {}", line);
                }
            });
        }

        let kill = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        {
            let kill = kill.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                tokio::select! {
                    status = child.wait() => {
                        tracing::debug!(pid, ?status, "Worker process exited");
                    }
                    _ = kill.cancelled() => {
                        if let Err(e) = child.kill().await {
                            tracing::warn!(pid, error = %e, "Failed to kill worker process");
                        } else {
                            tracing::debug!(pid, "Worker process killed");
                        }
                    }
                }
                exited.store(true, Ordering::SeqCst);
            });
        }

        tracing::debug!(pid, program, "Spawned worker process");

        Ok(Self {
            program: program.to_string(),
            stdin,
            messages,
            kill,
            exited,
        })
    }

    /// Write one message line to the worker
    pub async fn send(&mut self, message: &HostMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| RunnerError::Protocol(format!("unencodable message: {}", e)))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.gone(e))?;
        self.stdin.flush().await.map_err(|e| self.gone(e))
    }

    fn gone(&self, error: std::io::Error) -> RunnerError {
        RunnerError::WorkerExited(format!("{}: {}", self.program, error))
    }

    /// Next message from the worker; `None` once its stdout has closed
    pub async fn recv(&mut self) -> Option<WorkerEnvelope> {
        self.messages.recv().await
    }

    /// Kill the child. Its stream ends once the pipes close.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn is_alive(&self) -> bool {
        !self.kill.is_cancelled() && !self.exited.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
