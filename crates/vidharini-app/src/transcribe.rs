//! Client for a Replicate-compatible speech-to-text prediction API.
//!
//! A transcription is a prediction: it is submitted once and then polled
//! until the provider reports `succeeded` or `failed`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use vidharini_core::error::VidharaError;
use vidharini_core::poll::{poll_until, OnError, PollPolicy, PollStep};

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com";
pub const DEFAULT_WHISPER_VERSION: &str =
    "3ab86df6c8f54c11309d4d1f930ac292bad43ace52d10c80d87eb258b3c9f79c";

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

pub struct TranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    version: String,
    poll: PollPolicy,
}

impl TranscriptionClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_REPLICATE_BASE_URL.to_string(),
            token: token.into(),
            version: DEFAULT_WHISPER_VERSION.to_string(),
            poll: PollPolicy::new(Duration::from_secs(2), 30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    pub async fn submit(&self, audio_url: &str) -> Result<Prediction, VidharaError> {
        let body = json!({
            "version": self.version,
            "input": {
                "task": "transcribe",
                "audio": audio_url,
                "language": "None",
                "timestamp": "chunk",
                "batch_size": 64,
                "diarise_audio": false,
            }
        });
        let resp = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VidharaError::Transcription(format!(
                "prediction submit failed: HTTP {status}: {text}"
            )));
        }
        Ok(resp.json::<Prediction>().await?)
    }

    pub async fn fetch(&self, prediction_id: &str) -> Result<Prediction, VidharaError> {
        let resp = self
            .http
            .get(format!("{}/v1/predictions/{prediction_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VidharaError::Transcription(format!(
                "prediction status failed: HTTP {status}"
            )));
        }
        Ok(resp.json::<Prediction>().await?)
    }

    /// Submits `audio_url` and waits for the transcript. Transport errors
    /// while polling end the wait immediately.
    pub async fn transcribe(&self, audio_url: &str) -> Result<String, VidharaError> {
        let prediction = self.submit(audio_url).await?;
        info!(prediction_id = %prediction.id, "Transcription submitted");

        let output = poll_until(self.poll, OnError::Abort, |attempt| {
            let id = prediction.id.clone();
            async move {
                let current = self.fetch(&id).await?;
                debug!(prediction_id = %id, attempt, status = %current.status, "Polled prediction");
                Ok(match current.status.as_str() {
                    "succeeded" => PollStep::Done(current.output),
                    "failed" | "canceled" => PollStep::Failed(
                        current
                            .error
                            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                            .unwrap_or_else(|| "Transcription failed".to_string()),
                    ),
                    _ => PollStep::Pending,
                })
            }
        })
        .await
        .map_err(|e| match e {
            VidharaError::TaskFailed(reason) => VidharaError::Transcription(reason),
            VidharaError::Timeout(_) => {
                VidharaError::Transcription("Transcription timed out".to_string())
            }
            other => other,
        })?;

        output
            .as_ref()
            .and_then(normalize_output)
            .ok_or_else(|| VidharaError::Transcription("provider returned no transcript".into()))
    }
}

/// Flattens the provider's output into plain text.
///
/// Accepts an array (strings or `{text}` segments joined with a space), a
/// bare string, or an object with a `text` field.
pub fn normalize_output(output: &Value) -> Option<String> {
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => item.get("text").and_then(Value::as_str).map(str::to_string),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Value::Object(_) => output.get("text").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
