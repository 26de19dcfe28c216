mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use coderunner_sandbox::Language;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderunner")]
#[command(about = "Run student JavaScript and Python snippets in a sandbox")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a source file and print its output
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Language (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<Language>,

        /// Loop-guard ceiling
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Wall-clock budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Runner settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the source a file runs as after loop-guard injection
    Guard {
        /// Source file to instrument
        file: PathBuf,

        /// Language (inferred from the file extension when omitted)
        #[arg(short, long)]
        language: Option<Language>,

        /// Loop-guard ceiling
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Runner settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective runner settings as TOML
    Config {
        /// Runner settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            language,
            max_iterations,
            timeout_ms,
            config,
            json,
            verbose,
        } => {
            init_logging(verbose);
            let success = commands::execute_run(
                file,
                language,
                max_iterations,
                timeout_ms,
                config,
                json,
            )
            .await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Guard {
            file,
            language,
            max_iterations,
            config,
        } => {
            init_logging(false);
            commands::execute_guard(file, language, max_iterations, config).await
        }
        Commands::Config { config } => {
            init_logging(false);
            commands::execute_config(config)
        }
    }
}

/// Log to stderr so program output stays clean on stdout
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
