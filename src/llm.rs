use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::error::VidharaError;

/// Incremental text of one completion, in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, VidharaError>> + Send>>;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Opens a streaming completion for `prompt`. Request-level failures
    /// (auth, bad model, unreachable host) are returned here, before any text.
    async fn stream_completion(&self, prompt: &str) -> Result<TextStream, VidharaError>;

    fn model(&self) -> &str;
}

pub fn create_provider(config: &Config) -> Box<dyn LlmProvider> {
    Box::new(OpenAiProvider::new(config))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider  (OpenAI, Ollama's /v1 endpoint, proxies)
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    chat_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &Config) -> Self {
        let default_base = match config.llm_provider.as_str() {
            "ollama" => "http://127.0.0.1:11434/v1",
            _ => "https://api.openai.com/v1",
        };
        let base = config.llm_base_url.as_deref().unwrap_or(default_base);
        let chat_url = format!("{}/chat/completions", base.trim_end_matches('/'));

        OpenAiProvider {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            chat_url,
        }
    }
}

// --- OpenAI streaming types ---

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    error: Option<OaiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    #[serde(default)]
    delta: OaiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiErrorResponse {
    error: OaiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OaiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn stream_completion(&self, prompt: &str) -> Result<TextStream, VidharaError> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut req = self
            .http
            .post(&self.chat_url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.trim().is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<OaiErrorResponse>(&text) {
                return Err(VidharaError::LlmApi(err.error.message));
            }
            return Err(VidharaError::LlmApi(format!("HTTP {status}: {text}")));
        }

        debug!(model = %self.model, "LLM stream opened");
        Ok(parse_completion_stream(response))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Turns an OpenAI `text/event-stream` body into text deltas. Empty deltas
/// and the `[DONE]` sentinel are dropped.
fn parse_completion_stream(response: reqwest::Response) -> TextStream {
    let events = response.bytes_stream().eventsource();
    let text = events.filter_map(|event| async move {
        let event = match event {
            Ok(event) => event,
            Err(e) => return Some(Err(VidharaError::LlmApi(format!("SSE stream error: {e}")))),
        };
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        let chunk: OaiStreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                return Some(Err(VidharaError::LlmApi(format!(
                    "Failed to parse stream chunk: {e}"
                ))))
            }
        };
        if let Some(err) = chunk.error {
            return Some(Err(VidharaError::LlmApi(err.message)));
        }
        let delta: String = chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();
        (!delta.is_empty()).then_some(Ok(delta))
    });
    Box::pin(text)
}
