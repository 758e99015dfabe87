//! IOManager abstraction (spec.md §4.9, Component H): everything the
//! executor needs from the outside world — printing output, asking the
//! user for input/a choice, and surfacing the toggle-menu — behind one
//! `async_trait`, with two concrete bindings: an interactive TUI
//! (`interactive`) and a file-polling agent binding (`agent`).
//!
//! Grounded in the teacher's `CommandExecutor`/`FileSystem` trait-object
//! pattern (`arthur-zhang-just-bash/src/interpreter/interpreter.rs`),
//! which keeps the interpreter generic over how commands actually touch
//! the outside world.

pub mod agent;
pub mod interactive;

use async_trait::async_trait;

use crate::error::ProgramError;

/// What the toggle-menu (spec.md §5, Ctrl-C / SIGINT) lets the user do
/// once a running program has been paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Resume,
    Save,
    Terminate,
}

#[async_trait]
pub trait IOManager: Send + Sync {
    /// Emit non-interactive program output (`print`, `show_inserts`, chat
    /// deltas).
    async fn output(&self, text: &str);

    /// Prompt for a single line of free-text input (`user_input`).
    async fn input(&self, prompt: &str) -> Result<String, ProgramError>;

    /// Prompt the user to pick one of `choices` (`user_choice`), returning
    /// the chosen index.
    async fn choice(&self, prompt: &str, choices: &[String]) -> Result<usize, ProgramError>;

    /// Block until the user responds to the toggle-menu, or until
    /// cancelled.
    async fn menu(&self) -> Result<MenuChoice, ProgramError>;

    /// Structured log line (mirrors the original's `log_sink`, spec.md
    /// §6.3); distinct from `output` since it's meant for a log file, not
    /// the transcript the user reads.
    fn log(&self, level: tracing::Level, message: &str) {
        match level {
            tracing::Level::ERROR => tracing::error!("{message}"),
            tracing::Level::WARN => tracing::warn!("{message}"),
            tracing::Level::INFO => tracing::info!("{message}"),
            tracing::Level::DEBUG => tracing::debug!("{message}"),
            tracing::Level::TRACE => tracing::trace!("{message}"),
        }
    }
}
