use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llm::retry::send_with_retry;

/// Maximum characters to send per text to the embedding API.
/// Embedding models commonly run an 8k-token context, and dense content
/// (JSON blobs, minified sources) can tokenise at over 2 tokens per char,
/// so 3000 chars keeps every input inside the window.
const MAX_EMBED_CHARS: usize = 3_000;

/// Texts per request against an OpenAI-compatible endpoint.
const OPENAI_BATCH_SIZE: usize = 64;

/// Texts per request against Ollama's `/api/embed`.
const OLLAMA_BATCH_SIZE: usize = 32;

/// Client for the configured embedding provider.
///
/// All callers share one bounded concurrency limit: a caller that cannot
/// get a slot within the configured wait deadline gets a `Timeout` error
/// instead of queueing forever.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: LlmConfig,
    limiter: Arc<Semaphore>,
}

impl EmbeddingClient {
    pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_embeds.max(1)));
        Self {
            http,
            config,
            limiter,
        }
    }

    /// Embed a batch of texts, preserving order. The returned vector always
    /// has exactly one embedding per input text.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _permit = tokio::time::timeout(
            Duration::from_secs(self.config.embed_wait_timeout_secs),
            self.limiter.acquire(),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "waited over {}s for an embedding slot",
                self.config.embed_wait_timeout_secs
            ))
        })?
        .map_err(|_| Error::Internal(anyhow::anyhow!("embedding limiter closed")))?;

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let embeddings = match self.config.provider.as_str() {
            "ollama" => self.embed_ollama(&truncated).await?,
            "openai" => self.embed_openai(&truncated).await?,
            other => {
                return Err(Error::Internal(anyhow::anyhow!(
                    "Unknown LLM provider: {other}"
                )))
            }
        };

        if embeddings.len() != texts.len() {
            return Err(Error::EmbeddingService(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    /// Embed a single text.
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingService("No embedding returned".into()))
    }

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.config.base_url);

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OLLAMA_BATCH_SIZE) {
            let req = OllamaEmbedRequest {
                model: self.config.embedding_model.clone(),
                input: batch.to_vec(),
                truncate: true,
            };

            let resp = send_with_retry(
                self.http.post(&url).json(&req),
                self.config.embed_max_retries,
            )
            .await
            .map_err(transport_error)?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::EmbeddingService(format!(
                    "Ollama embed API returned {status}: {body}"
                )));
            }

            let body: OllamaEmbedResponse = resp
                .json()
                .await
                .map_err(|e| Error::EmbeddingService(format!("Bad embed response: {e}")))?;
            all_embeddings.extend(body.embeddings);
        }

        Ok(all_embeddings)
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.config.base_url);
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OPENAI_BATCH_SIZE) {
            let req = OpenAiEmbedRequest {
                model: self.config.embedding_model.clone(),
                input: batch.to_vec(),
            };

            let resp = send_with_retry(
                self.http
                    .post(&url)
                    .header("Authorization", format!("Bearer {api_key}"))
                    .json(&req),
                self.config.embed_max_retries,
            )
            .await
            .map_err(transport_error)?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::EmbeddingService(format!(
                    "OpenAI embed API returned {status}: {body}"
                )));
            }

            let body: OpenAiEmbedResponse = resp
                .json()
                .await
                .map_err(|e| Error::EmbeddingService(format!("Bad embed response: {e}")))?;
            all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(all_embeddings)
    }
}

fn transport_error(e: anyhow::Error) -> Error {
    match e.downcast_ref::<reqwest::Error>() {
        Some(re) if re.is_timeout() => Error::Timeout("embedding request timed out".into()),
        _ => Error::EmbeddingService(format!("{e:#}")),
    }
}

/// Truncate `text` to at most `MAX_EMBED_CHARS` bytes on a char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ollama truncates over-length inputs itself instead of erroring.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}
