//! Remote model providers
//!
//! Embedding and generation run as remote HTTP services behind the
//! [`EmbeddingService`] and [`GenerationService`] traits. The shipped clients
//! speak the OpenAI-compatible wire shape (`/embeddings` and
//! `/chat/completions`), which Jina-style embedding APIs and Groq-style chat
//! APIs both serve. Calls are bounded by the configured timeout and are never
//! retried here; transient failures surface to the caller with a retryable
//! marker instead.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EmbeddingConfig, GenerationConfig};

/// Errors from a remote model provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{service} request timed out")]
    Timeout { service: String },
    #[error("{service} request was rate limited")]
    RateLimited { service: String },
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("generation request failed: {0}")]
    Generation(String),
    #[error("{service} returned an unusable response: {detail}")]
    BadResponse { service: String, detail: String },
}

/// Remote text-embedding backend
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Width of the vectors this service produces
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Remote text-generation backend
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce a completion for the given system and user messages
    async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

// =============================================================================
// Embedding over HTTP
// =============================================================================

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI-compatible embeddings client
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Embedding(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error("embedding", e, ProviderError::Embedding))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                service: "embedding".into(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Embedding(format!(
                "HTTP {}: {}",
                status,
                truncate(&detail, 500)
            )));
        }

        let payload = response
            .text()
            .await
            .map_err(|e| classify_transport_error("embedding", e, ProviderError::Embedding))?;
        let vectors = parse_embedding_response(&payload, texts.len())?;

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(ProviderError::BadResponse {
                    service: "embedding".into(),
                    detail: format!(
                        "expected {}-dimensional vectors, got {}",
                        self.dimension,
                        vector.len()
                    ),
                });
            }
        }
        Ok(vectors)
    }
}

fn parse_embedding_response(
    payload: &str,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(payload).map_err(|e| ProviderError::BadResponse {
            service: "embedding".into(),
            detail: e.to_string(),
        })?;

    if parsed.data.len() != expected {
        return Err(ProviderError::BadResponse {
            service: "embedding".into(),
            detail: format!(
                "expected {} embeddings, got {}",
                expected,
                parsed.data.len()
            ),
        });
    }

    // Order by the response index so vectors line up with the input batch.
    let mut data = parsed.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

// =============================================================================
// Generation over HTTP
// =============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessagePayload<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessagePayload<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// OpenAI-compatible chat completions client
pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::Generation(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessagePayload {
                    role: "system",
                    content: system,
                },
                ChatMessagePayload {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error("generation", e, ProviderError::Generation))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                service: "generation".into(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Generation(format!(
                "HTTP {}: {}",
                status,
                truncate(&detail, 500)
            )));
        }

        let payload = response
            .text()
            .await
            .map_err(|e| classify_transport_error("generation", e, ProviderError::Generation))?;
        parse_chat_response(&payload)
    }
}

fn parse_chat_response(payload: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(payload).map_err(|e| ProviderError::BadResponse {
            service: "generation".into(),
            detail: e.to_string(),
        })?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ProviderError::BadResponse {
            service: "generation".into(),
            detail: "response contained no choices".into(),
        })
}

fn classify_transport_error<F>(service: &str, e: reqwest::Error, wrap: F) -> ProviderError
where
    F: FnOnce(String) -> ProviderError,
{
    if e.is_timeout() {
        ProviderError::Timeout {
            service: service.to_string(),
        }
    } else {
        wrap(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
