use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn model(&self) -> &str;
    fn dimension(&self) -> usize;
}

pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

fn infer_default_dim(provider: &str, model: &str) -> usize {
    match provider {
        "ollama" => 768,
        _ if model.contains("3-large") => 3072,
        _ => 1536,
    }
}

/// Longest input sent for embedding. Extracted documents can be far larger
/// than the providers accept.
const MAX_EMBED_INPUT_BYTES: usize = 24_000;

fn clip(text: &str) -> &str {
    crate::text::preview(text, MAX_EMBED_INPUT_BYTES)
}

async fn post_for_json<B, R>(
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: for<'de> Deserialize<'de>,
{
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("embedding request failed ({status}): {body}"));
    }
    Ok(response.json::<R>().await?)
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let request = self.client.post(url).bearer_auth(&self.api_key);
        let body: OpenAIEmbeddingResponse = post_for_json(
            request,
            &OpenAIEmbeddingRequest {
                model: &self.model,
                input: clip(text),
            },
        )
        .await?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("empty embedding response"))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let body: OllamaEmbeddingResponse = post_for_json(
            self.client.post(url),
            &OllamaEmbeddingRequest {
                model: &self.model,
                prompt: clip(text),
            },
        )
        .await?;
        Ok(body.embedding)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Builds the embedding backend for document search. `None` means search
/// falls back to lexical matching.
pub fn create_provider(config: &Config) -> Option<Arc<dyn EmbeddingProvider>> {
    let provider = config.embedding_provider.as_deref()?.trim().to_lowercase();

    let model = config
        .embedding_model
        .clone()
        .unwrap_or_else(|| match provider.as_str() {
            "ollama" => "nomic-embed-text".to_string(),
            _ => "text-embedding-3-small".to_string(),
        });
    let dim = config
        .embedding_dim
        .unwrap_or_else(|| infer_default_dim(&provider, &model));
    let client = reqwest::Client::new();

    match provider.as_str() {
        "openai" => {
            // Reuse the chat key when no dedicated one is configured.
            let api_key = config
                .embedding_api_key
                .clone()
                .unwrap_or_else(|| config.api_key.clone());
            if api_key.trim().is_empty() {
                return None;
            }
            let base_url = config
                .embedding_base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Some(Arc::new(OpenAIEmbeddingProvider {
                client,
                base_url,
                api_key,
                model,
                dim,
            }))
        }
        "ollama" => {
            let base_url = config
                .embedding_base_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
            Some(Arc::new(OllamaEmbeddingProvider {
                client,
                base_url,
                model,
                dim,
            }))
        }
        _ => None,
    }
}
