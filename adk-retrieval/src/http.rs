//! HTTP-backed embedding and reranking providers.
//!
//! This module is only available when the `http` feature is enabled.
//!
//! - [`OpenAIEmbeddingProvider`] talks to any OpenAI-compatible
//!   `/v1/embeddings` endpoint (OpenAI, Ollama, vLLM, LocalAI).
//! - [`HttpReranker`] talks to a text-embeddings-inference style `/rerank`
//!   endpoint serving a cross-encoder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RerankConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::reranker::Reranker;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

fn embedding_error(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: "OpenAI".into(), message: message.into() }
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// # Configuration
///
/// - `base_url` – defaults to `https://api.openai.com/v1`.
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – required for OpenAI, optional for local servers.
///
/// # Example
///
/// ```rust,ignore
/// use adk_retrieval::http::OpenAIEmbeddingProvider;
///
/// let provider =
///     OpenAIEmbeddingProvider::compatible("http://localhost:11434/v1", "nomic-embed-text", 768);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for the OpenAI API with the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(embedding_error("API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.into(),
            api_key: Some(api_key),
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| embedding_error("OPENAI_API_KEY environment variable not set"))?;
        Self::new(api_key)
    }

    /// Create a provider for a self-hosted OpenAI-compatible server.
    pub fn compatible(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            dimensions,
            request_dimensions: None,
        }
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request embeddings truncated to `dims` components.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| embedding_error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = "OpenAI",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let mut request = self.client.post(format!("{}/embeddings", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "request failed");
            embedding_error(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(provider = "OpenAI", %status, "API error");
            return Err(embedding_error(format!("API returned {status}: {detail}")));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse response");
            embedding_error(format!("failed to parse response: {e}"))
        })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        if data.len() != texts.len() {
            return Err(embedding_error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A [`Reranker`] calling a cross-encoder behind a `/rerank` endpoint.
///
/// Sends `{"query", "texts", "model"?}` and expects a list of
/// `{"index", "score"}` entries, as served by text-embeddings-inference.
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    model_id: Option<String>,
    api_key: Option<String>,
}

impl HttpReranker {
    /// Create a reranker for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/rerank", base_url.into().trim_end_matches('/')),
            model_id: None,
            api_key: None,
        }
    }

    /// Create a reranker using `rerank.model_id` from the configuration.
    pub fn from_config(base_url: impl Into<String>, config: &RerankConfig) -> Self {
        let mut reranker = Self::new(base_url);
        reranker.model_id = config.model_id.clone();
        reranker
    }

    /// Name the model the server should use.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Send a bearer token with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn error(&self, message: impl Into<String>) -> RagError {
        RagError::RerankerError { reranker: "Http".into(), message: message.into() }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        "Http"
    }

    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(reranker = "Http", pairs = texts.len(), model = ?self.model_id, "scoring pairs");

        let body = RerankRequest { query, texts, model: self.model_id.as_deref() };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(reranker = "Http", error = %e, "request failed");
            self.error(format!("request failed: {e}"))
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(reranker = "Http", %status, "rerank endpoint error");
            return Err(self.error(format!("endpoint returned {status}: {body}")));
        }

        let entries: Vec<RerankEntry> = response
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse response: {e}")))?;
        scores_by_index(entries, texts.len()).map_err(|message| self.error(message))
    }
}

/// Place each entry's score at its input position.
fn scores_by_index(
    entries: Vec<RerankEntry>,
    expected: usize,
) -> std::result::Result<Vec<f32>, String> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for entry in entries {
        let slot = scores
            .get_mut(entry.index)
            .ok_or_else(|| format!("index {} out of range for {expected} texts", entry.index))?;
        *slot = Some(entry.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| score.ok_or_else(|| format!("no score returned for text {i}")))
        .collect()
}
