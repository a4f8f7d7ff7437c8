//! Modhost CLI: parses text commands and drives the execution orchestrator.

mod config;
mod router;

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use modhost::ExecutionOrchestrator;
use tracing_subscriber::EnvFilter;

// Keep the demo modules linked so their descriptors register.
use counter_module as _;
use relay_module as _;

use config::AppConfig;
use router::parse_command;

/// Modhost - in-process module runtime
#[derive(Parser)]
#[command(name = "modhost")]
#[command(about = "Modhost - in-process module runtime")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data root override (overrides config)
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command to execute (e.g. `run counter`); omit for an interactive shell
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(orchestrator: &ExecutionOrchestrator, line: &str) -> Result<()> {
    let action = match parse_command(line, "cli") {
        Ok(action) => action,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(());
        }
    };
    let result = orchestrator.execute(&action);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn repl(orchestrator: &ExecutionOrchestrator) -> Result<()> {
    let stdin = std::io::stdin();
    loop {
        print!("modhost> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        dispatch(orchestrator, line)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(ref path) = cli.config {
        if !path.is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }
    }

    let mut app_config = AppConfig::load(cli.config.as_deref())?;
    if let Some(data_root) = cli.data_root {
        app_config.data_root = data_root;
    }

    let orchestrator = ExecutionOrchestrator::new(app_config.runtime_config())?;
    tracing::info!(
        modules = orchestrator.loader().catalog().len(),
        "Runtime ready"
    );

    if cli.command.is_empty() {
        repl(&orchestrator)
    } else {
        dispatch(&orchestrator, &cli.command.join(" "))
    }
}
