//! Streaming chat-completion HTTP client (spec.md §4.8 step 1, §6.1).
//!
//! Wraps an OpenAI-compatible `/chat/completions` endpoint. The client is
//! cached by `(api_url, api_key)` so repeated `chat` tasks against the
//! same endpoint within a run reuse one `reqwest::Client` rather than
//! rebuilding a connection pool per call, matching the original's
//! per-`(url, key)` client cache (`interpolation_engine.py`'s
//! `InputOutputManager`/chat-task handling).
//!
//! The pack's own `llm` crate (`pcastone-orca/src/crates/llm`) stubs
//! streaming with a `TODO`, so the SSE line parser here is authored fresh
//! over `reqwest`'s `bytes_stream()` using `futures::StreamExt`, in the
//! same "hand-rolled reader over a byte stream" idiom the teacher uses
//! for its own line-oriented buffering (`arthur-zhang-just-bash`'s
//! `network/fetch.rs`).

use std::sync::Mutex;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::ProgramError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Json],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Json>,
    /// Everything else a `chat` task forwards verbatim to the endpoint:
    /// `max_tokens`, `temperature`, `seed`, `stop`, and any `extra_body`
    /// entries (spec.md §4.8 step 1) — flattened to the top level, matching
    /// the OpenAI client's own `extra_body` convention.
    #[serde(flatten)]
    extra: serde_json::Map<String, Json>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

struct CachedClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// Holds at most one live `reqwest::Client`, rebuilt only when the
/// `(api_url, api_key)` pair changes (spec.md §4.8 step 1, §5 "Shared
/// resources").
pub struct ChatClient {
    cached: Mutex<Option<CachedClient>>,
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClient {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    fn client_for(&self, api_url: &str, api_key: &str) -> reqwest::Client {
        let mut guard = self.cached.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            if cached.api_url == api_url && cached.api_key == api_key {
                return cached.client.clone();
            }
        }
        let client = reqwest::Client::new();
        *guard = Some(CachedClient {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            client: client.clone(),
        });
        client
    }

    /// Issue a streaming chat-completion request, sending each incremental
    /// content fragment down `delta_tx` as it arrives (dropped, and so
    /// closed, when this call returns). Returns the accumulated full text
    /// and the final `finish_reason` (`"stop"`/`"length"`/other), per
    /// spec.md §4.8 steps 1, 3, 6.
    pub async fn stream_chat(
        &self,
        api_url: &str,
        api_key: &str,
        model: &str,
        messages: &[Json],
        extra: serde_json::Map<String, Json>,
        response_format: Option<Json>,
        delta_tx: tokio::sync::mpsc::UnboundedSender<String>,
    ) -> Result<(String, Option<String>), ProgramError> {
        let client = self.client_for(api_url, api_key);
        let body = ChatRequest {
            model,
            messages,
            stream: true,
            response_format,
            extra,
        };

        let response = client
            .post(api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProgramError::execution("<chat>", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProgramError::execution("<chat>", format!("server returned {status}: {text}")));
        }

        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut full_text = String::new();
        let mut finish_reason = None;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| ProgramError::execution("<chat>", format!("stream read error: {e}")))?;
            line_buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = line_buf.find('\n') {
                let line = line_buf[..pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                let parsed: StreamChunk = match serde_json::from_str(data) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Some(choice) = parsed.choices.into_iter().next() {
                    if let Some(content) = choice.delta.content {
                        let _ = delta_tx.send(content.clone());
                        full_text.push_str(&content);
                    }
                    if choice.finish_reason.is_some() {
                        finish_reason = choice.finish_reason;
                    }
                }
            }
        }

        Ok((full_text, finish_reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_cache_tracks_last_seen_endpoint() {
        let chat = ChatClient::new();
        let _ = chat.client_for("https://api.example.com", "key1");
        {
            let guard = chat.cached.lock().unwrap();
            let cached = guard.as_ref().unwrap();
            assert_eq!(cached.api_url, "https://api.example.com");
            assert_eq!(cached.api_key, "key1");
        }
        let _ = chat.client_for("https://other.example.com", "key2");
        let guard = chat.cached.lock().unwrap();
        let cached = guard.as_ref().unwrap();
        assert_eq!(cached.api_url, "https://other.example.com");
    }
}
