//! Agent IOManager: a headless binding for running under an external
//! orchestrator (spec.md §4.9, `--agent-mode`). Output is appended as JSON
//! envelopes to an `output.jsonl` file; input/choice/menu prompts are
//! written as a `request.json` envelope and satisfied by polling for a
//! `response.json` the external agent writes back, then deleting it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::time::sleep;

use super::{IOManager, MenuChoice};
use crate::error::ProgramError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope<'a> {
    Output { text: &'a str },
    Input { prompt: &'a str },
    Choice { prompt: &'a str, choices: &'a [String] },
    Menu,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    choice: Option<String>,
}

pub struct AgentIo {
    dir: PathBuf,
}

impl AgentIo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn output_path(&self) -> PathBuf {
        self.dir.join("output.jsonl")
    }

    fn request_path(&self) -> PathBuf {
        self.dir.join("request.json")
    }

    fn response_path(&self) -> PathBuf {
        self.dir.join("response.json")
    }

    async fn write_request(&self, envelope: &Envelope<'_>) -> Result<(), ProgramError> {
        let json = serde_json::to_string(envelope).map_err(ProgramError::Json)?;
        fs::write(self.request_path(), json).await.map_err(ProgramError::Io)
    }

    async fn await_response(&self) -> Result<Response, ProgramError> {
        let path = self.response_path();
        loop {
            if path.exists() {
                let raw = fs::read_to_string(&path).await.map_err(ProgramError::Io)?;
                let response: Response = serde_json::from_str(&raw).map_err(ProgramError::Json)?;
                fs::remove_file(&path).await.ok();
                return Ok(response);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), ProgramError> {
    fs::create_dir_all(dir).await.map_err(ProgramError::Io)
}

#[async_trait]
impl IOManager for AgentIo {
    async fn output(&self, text: &str) {
        if ensure_dir(&self.dir).await.is_err() {
            return;
        }
        let Ok(mut line) = serde_json::to_string(&Envelope::Output { text }) else {
            return;
        };
        line.push('\n');
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(self.output_path()).await else {
            return;
        };
        let _ = tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await;
    }

    async fn input(&self, prompt: &str) -> Result<String, ProgramError> {
        ensure_dir(&self.dir).await?;
        self.write_request(&Envelope::Input { prompt }).await?;
        let response = self.await_response().await?;
        response
            .text
            .ok_or_else(|| ProgramError::execution("<io>", "agent response to 'input' request missing 'text'"))
    }

    async fn choice(&self, prompt: &str, choices: &[String]) -> Result<usize, ProgramError> {
        ensure_dir(&self.dir).await?;
        self.write_request(&Envelope::Choice { prompt, choices }).await?;
        let response = self.await_response().await?;
        response
            .index
            .ok_or_else(|| ProgramError::execution("<io>", "agent response to 'choice' request missing 'index'"))
    }

    async fn menu(&self) -> Result<MenuChoice, ProgramError> {
        ensure_dir(&self.dir).await?;
        self.write_request(&Envelope::Menu).await?;
        let response = self.await_response().await?;
        match response.choice.as_deref() {
            Some("resume") => Ok(MenuChoice::Resume),
            Some("save") => Ok(MenuChoice::Save),
            Some("terminate") => Ok(MenuChoice::Terminate),
            _ => Err(ProgramError::execution("<io>", "agent response to 'menu' request missing valid 'choice'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_appends_jsonl_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let io = AgentIo::new(dir.path());
        io.output("hello").await;
        let contents = fs::read_to_string(dir.path().join("output.jsonl")).await.unwrap();
        assert!(contents.contains("\"text\":\"hello\""));
    }

    #[tokio::test]
    async fn input_waits_for_response_file() {
        let dir = tempfile::tempdir().unwrap();
        let io = AgentIo::new(dir.path());
        let response_path = dir.path().join("response.json");

        let writer = {
            let response_path = response_path.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                fs::write(&response_path, r#"{"text":"Ada"}"#).await.unwrap();
            })
        };

        let result = io.input("name? ").await.unwrap();
        writer.await.unwrap();
        assert_eq!(result, "Ada");
    }
}
