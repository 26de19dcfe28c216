//! CLI command implementations
//!
//! Each command loads the runner settings, then drives the library the same
//! way an embedding application would.

use anyhow::{anyhow, Context, Result};
use coderunner_common::{ExecutionResult, OutputKind, OutputLine};
use coderunner_sandbox::{guard, CodeRunnerService, ExecutionOptions, Language, RunnerSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Execute a source file
///
/// # Arguments
/// * `file` - Source file to run
/// * `language` - Explicit language, otherwise inferred from the extension
/// * `max_iterations` / `timeout_ms` - Per-run overrides
/// * `config` - Optional settings file
/// * `json` - Print the full result as JSON instead of the transcript
///
/// Returns whether the program succeeded. Ctrl-C stops the run.
pub async fn execute_run(
    file: PathBuf,
    language: Option<Language>,
    max_iterations: Option<u64>,
    timeout_ms: Option<u64>,
    config: Option<PathBuf>,
    json: bool,
) -> Result<bool> {
    let settings = load_settings(config.as_deref())?;
    let language = resolve_language(&file, language)?;
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let options = ExecutionOptions {
        max_iterations,
        timeout_ms,
    };
    let service = Arc::new(CodeRunnerService::new(settings));

    let interrupt = tokio::spawn({
        let service = service.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                service.stop();
            }
        }
    });

    info!("Running {} as {}", file.display(), language);
    let result = service.execute(&code, language, Some(options)).await;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_transcript(&result);
    }
    Ok(result.success)
}

/// Print a file after loop-guard injection
pub async fn execute_guard(
    file: PathBuf,
    language: Option<Language>,
    max_iterations: Option<u64>,
    config: Option<PathBuf>,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let language = resolve_language(&file, language)?;
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let resolved = settings.resolve(Some(ExecutionOptions {
        max_iterations,
        timeout_ms: None,
    }));
    let instrumented = guard::instrument(language, &code, resolved.max_iterations);
    println!("{}", instrumented.source);
    Ok(())
}

/// Print the effective settings
pub fn execute_config(config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    print!("{}", settings.to_toml_string()?);
    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<RunnerSettings> {
    Ok(RunnerSettings::load_or_default(path)?)
}

fn resolve_language(file: &Path, explicit: Option<Language>) -> Result<Language> {
    if let Some(language) = explicit {
        return Ok(language);
    }
    file.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        .ok_or_else(|| {
            anyhow!(
                "Cannot infer language of {}; pass --language",
                file.display()
            )
        })
}

fn print_transcript(result: &ExecutionResult) {
    for line in &result.outputs {
        print_line(line);
    }

    match &result.error {
        Some(error) => eprintln!("✗ {}", error),
        None => eprintln!("✓ Finished in {}ms", result.execution_time),
    }
}

fn print_line(line: &OutputLine) {
    match line.kind {
        OutputKind::Log => println!("{}", line.content),
        OutputKind::Result => println!("=> {}", line.content),
        OutputKind::Info => println!("[info] {}", line.content),
        OutputKind::Warn => eprintln!("[warn] {}", line.content),
        OutputKind::Error => eprintln!("[error] {}", line.content),
    }
}
