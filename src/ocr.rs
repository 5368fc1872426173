//! Text extraction from hosted PDFs and images through a Mistral-style
//! chat completion that accepts document and image URL parts.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::VidharaError;
use crate::types::FileDescriptor;

pub const DEFAULT_OCR_BASE_URL: &str = "https://api.mistral.ai";
const EXTRACTION_INSTRUCTION: &str = "Extract all text from the document.";

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Returns the text of `file`, or `None` when the provider answered
    /// without any content.
    async fn extract(&self, file: &FileDescriptor) -> Result<Option<String>, VidharaError>;
}

pub struct MistralExtractor {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl MistralExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_OCR_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// `None` when no OCR key is configured; attachments are then ignored.
pub fn create_extractor(config: &Config) -> Option<Box<dyn DocumentExtractor>> {
    let key = config.mistral_api_key.clone()?;
    let mut extractor = MistralExtractor::new(key, config.ocr_model.clone());
    if let Some(base) = &config.ocr_base_url {
        extractor = extractor.with_base_url(base.clone());
    }
    Some(Box::new(extractor))
}

fn file_part(file: &FileDescriptor) -> Value {
    if file.is_image() {
        json!({"type": "image_url", "image_url": file.url})
    } else {
        json!({"type": "document_url", "document_url": file.url})
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<Value>,
}

/// Strings pass through; structured content is kept as its JSON text.
fn content_text(content: Value) -> Option<String> {
    match content {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl DocumentExtractor for MistralExtractor {
    async fn extract(&self, file: &FileDescriptor) -> Result<Option<String>, VidharaError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": EXTRACTION_INSTRUCTION},
                    file_part(file),
                ],
            }],
        });
        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VidharaError::Extraction(format!(
                "{}: HTTP {status}: {text}",
                file.name
            )));
        }
        let parsed: CompletionResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .and_then(content_text);
        debug!(file = %file.name, chars = text.as_ref().map(|t| t.len()).unwrap_or(0), "OCR finished");
        Ok(text)
    }
}
