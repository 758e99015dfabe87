//! CLI entry point. Mirrors the shape of a typical `clap`-derived
//! interpreter front end: a program path, trailing program arguments, and
//! flags controlling logging, persistence, and the IOManager binding
//! (interactive terminal vs. headless agent polling), per SPEC_FULL.md §2.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use scriptlang::ast::State;
use scriptlang::executor::{Cancellation, Executor};
use scriptlang::io::agent::AgentIo;
use scriptlang::io::interactive::InteractiveIo;
use scriptlang::io::IOManager;
use scriptlang::{persistence, validator, ProgramError};

/// Run a scriptlang program file.
#[derive(Debug, Parser)]
#[command(name = "scriptlang", version, about)]
struct Cli {
    /// Path to the program file to run.
    program: PathBuf,

    /// Positional arguments passed to the program, available as `{ARG1}`,
    /// `{ARG2}`, etc. (1-based).
    program_arguments: Vec<String>,

    /// Write structured logs to this file instead of staying quiet.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Directory to poll for fallback insert values not found in the
    /// running program's state (spec.md §4.4 "inserts directory").
    #[arg(long)]
    inserts_dir: Option<PathBuf>,

    /// Path to store `user_input` history at; entries from prior runs
    /// using the same path are preserved across sessions.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Run headless: exchange JSON envelopes through files in this
    /// directory instead of driving an interactive terminal.
    #[arg(long, value_name = "DIR")]
    agent_mode: Option<PathBuf>,

    /// Dump the final insert state as JSON on stdout when the program
    /// finishes, instead of nothing.
    #[arg(long)]
    json: bool,
}

fn init_logging(log_path: &Option<PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    match log_path {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "scriptlang.log".to_string());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env().add_directive("scriptlang=debug".parse().unwrap()))
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(std::io::sink)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log);

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("scriptlang: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ProgramError> {
    tracing::info!(program = %cli.program.display(), "loading program");
    let program = persistence::load(&cli.program)?;
    validator::validate_program(&program)?;

    let io: Arc<dyn IOManager> = match &cli.agent_mode {
        Some(dir) => Arc::new(AgentIo::new(dir.clone())),
        None => Arc::new(InteractiveIo::new().with_history_path(cli.history.clone())),
    };

    let (cancel_tx, cancel_rx) = watch::channel(Cancellation::None);
    tokio::spawn(watch_signals(cancel_tx));

    let state = State::seeded_from(&program.default_state);
    let mut executor = Executor::new(program, state, cli.program_arguments, io, cancel_rx)
        .with_inserts_dir(cli.inserts_dir.clone())
        .with_program_path(Some(cli.program.clone()));
    let result = executor.run().await;

    if cli.json {
        let dump: serde_json::Map<String, serde_json::Value> = executor
            .state
            .inserts
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(dump)).unwrap_or_default());
    }

    result
}

/// Translate Ctrl-C (toggle-menu) and the absence of further signals into
/// `Cancellation` updates on the watch channel the executor polls
/// (spec.md §5 "Cancellation"). Ctrl-C is treated as a terminate request
/// here; a full interactive build additionally distinguishes a second
/// Ctrl-C from the first to offer the resume/save/terminate menu.
async fn watch_signals(tx: watch::Sender<Cancellation>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::debug!("received interrupt signal");
        let _ = tx.send(Cancellation::ToggleMenu);
    }
}
