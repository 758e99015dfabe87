//! Interactive IOManager: plain scrolling output to the terminal for
//! transcript text (so chat deltas and `print` output read like a normal
//! CLI session), with a small `ratatui`/`crossterm` alternate-screen menu
//! for the toggle-menu (spec.md §5) and choice prompts, so the user gets
//! arrow-key selection instead of typing an index by hand.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;
use tokio::task;

use super::{IOManager, MenuChoice};
use crate::error::ProgramError;

pub struct InteractiveIo {
    history_path: Option<PathBuf>,
}

impl InteractiveIo {
    pub fn new() -> Self {
        Self { history_path: None }
    }

    /// Persist entered `user_input` lines to `--history <path>`
    /// (`interpolation_engine.py`'s `FileHistory`), so a later run started
    /// with the same path can find what was typed before. This crate does
    /// not offer the original's up-arrow recall while typing (no readline
    /// dependency in the stack this workspace is grounded on) — it only
    /// appends, matching the persisted-storage half of that feature.
    pub fn with_history_path(mut self, path: Option<PathBuf>) -> Self {
        self.history_path = path;
        self
    }

    fn record_history(&self, line: &str) {
        let Some(path) = &self.history_path else { return };
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(f, "{line}");
        }
    }

    /// Run a `ListState`-driven selection menu in an alternate screen,
    /// returning the chosen index (or an error on terminal failure).
    fn run_selection(title: String, items: Vec<String>) -> Result<usize, ProgramError> {
        enable_raw_mode().map_err(|e| ProgramError::execution("<io>", e.to_string()))?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).map_err(|e| ProgramError::execution("<io>", e.to_string()))?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).map_err(|e| ProgramError::execution("<io>", e.to_string()))?;

        let mut state = ListState::default();
        state.select(Some(0));
        let result = loop {
            terminal
                .draw(|f| {
                    let layout = Layout::default()
                        .direction(Direction::Vertical)
                        .constraints([Constraint::Length(2), Constraint::Min(1)])
                        .split(f.area());
                    let header = Paragraph::new(title.clone());
                    f.render_widget(header, layout[0]);

                    let list_items: Vec<ListItem> = items.iter().map(|s| ListItem::new(s.clone())).collect();
                    let list = List::new(list_items)
                        .block(Block::default().borders(Borders::ALL))
                        .highlight_style(Style::default().add_modifier(Modifier::REVERSED).fg(Color::Yellow));
                    f.render_stateful_widget(list, layout[1], &mut state);
                })
                .map_err(|e| ProgramError::execution("<io>", e.to_string()))?;

            if let Ok(true) = event::poll(std::time::Duration::from_millis(100)) {
                if let Ok(Event::Key(key)) = event::read() {
                    match key.code {
                        KeyCode::Up => {
                            let i = state.selected().unwrap_or(0);
                            state.select(Some(i.saturating_sub(1)));
                        }
                        KeyCode::Down => {
                            let i = state.selected().unwrap_or(0);
                            state.select(Some((i + 1).min(items.len().saturating_sub(1))));
                        }
                        KeyCode::Enter => break Ok(state.selected().unwrap_or(0)),
                        KeyCode::Esc => break Err(ProgramError::Cancelled),
                        _ => {}
                    }
                }
            }
        };

        disable_raw_mode().map_err(|e| ProgramError::execution("<io>", e.to_string()))?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen).map_err(|e| ProgramError::execution("<io>", e.to_string()))?;
        result
    }
}

impl Default for InteractiveIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IOManager for InteractiveIo {
    async fn output(&self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    async fn input(&self, prompt: &str) -> Result<String, ProgramError> {
        print!("{prompt}");
        let _ = io::stdout().flush();
        let line = task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().read_line(&mut line).map_err(ProgramError::Io)?;
            Ok::<_, ProgramError>(line.trim_end_matches(['\n', '\r']).to_string())
        })
        .await
        .map_err(|e| ProgramError::execution("<io>", e.to_string()))??;
        self.record_history(&line);
        Ok(line)
    }

    async fn choice(&self, prompt: &str, choices: &[String]) -> Result<usize, ProgramError> {
        let prompt = prompt.to_string();
        let choices = choices.to_vec();
        task::spawn_blocking(move || Self::run_selection(prompt, choices))
            .await
            .map_err(|e| ProgramError::execution("<io>", e.to_string()))?
    }

    async fn menu(&self) -> Result<MenuChoice, ProgramError> {
        let items = vec!["Resume".to_string(), "Save".to_string(), "Terminate".to_string()];
        let idx = task::spawn_blocking(move || Self::run_selection("Program paused".to_string(), items))
            .await
            .map_err(|e| ProgramError::execution("<io>", e.to_string()))??;
        Ok(match idx {
            0 => MenuChoice::Resume,
            1 => MenuChoice::Save,
            _ => MenuChoice::Terminate,
        })
    }
}
