//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs models in-process via fastembed (feature `local-embeddings`).
//!
//! # Provider Selection
//!
//! The pipeline never builds providers directly. It asks an
//! [`EmbedderFactory`] for the embedder of a job's model, which lets a job
//! override the configured model and lets tests inject fakes.
//! [`ConfiguredEmbedders`] is the factory backed by `[embedding]` config.
//!
//! # Retry Strategy
//!
//! HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings")]
mod local;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use vector_ingest_core::embedding::{Embedder, EmbeddingError};

use crate::config::EmbeddingConfig;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

/// A model with a known output dimensionality.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub dims: usize,
    pub label: &'static str,
}

/// Models whose dimensionality is known without asking the provider.
pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec { id: "sentence-transformers/paraphrase-MiniLM-L6-v2", dims: 384, label: "MiniLM (384d)" },
    ModelSpec { id: "sentence-transformers/all-MiniLM-L6-v2", dims: 384, label: "all-MiniLM-L6-v2 (384d)" },
    ModelSpec { id: "BAAI/bge-small-en-v1.5", dims: 384, label: "bge-small-en-v1.5 (384d)" },
    ModelSpec { id: "intfloat/e5-small-v2", dims: 384, label: "e5-small-v2 (384d)" },
    ModelSpec { id: "BAAI/bge-base-en-v1.5", dims: 768, label: "bge-base-en-v1.5 (768d)" },
    ModelSpec { id: "intfloat/e5-base-v2", dims: 768, label: "e5-base-v2 (768d)" },
    ModelSpec { id: "BAAI/bge-large-en-v1.5", dims: 1024, label: "bge-large-en-v1.5 (1024d)" },
    ModelSpec { id: "nomic-ai/nomic-embed-text-v1", dims: 768, label: "nomic-embed-text-v1 (768d)" },
    ModelSpec { id: "nomic-ai/nomic-embed-text-v1.5", dims: 768, label: "nomic-embed-text-v1.5 (768d)" },
    ModelSpec { id: "intfloat/multilingual-e5-small", dims: 384, label: "multilingual-e5-small (384d)" },
    ModelSpec { id: "intfloat/multilingual-e5-base", dims: 768, label: "multilingual-e5-base (768d)" },
    ModelSpec { id: "intfloat/multilingual-e5-large", dims: 1024, label: "multilingual-e5-large (1024d)" },
    ModelSpec { id: "nomic-embed-text", dims: 768, label: "nomic-embed-text (768d, Ollama)" },
    ModelSpec { id: "mxbai-embed-large", dims: 1024, label: "mxbai-embed-large (1024d, Ollama)" },
    ModelSpec { id: "text-embedding-3-small", dims: 1536, label: "OpenAI text-embedding-3-small (1536d)" },
    ModelSpec { id: "text-embedding-3-large", dims: 3072, label: "OpenAI text-embedding-3-large (3072d)" },
    ModelSpec { id: "text-embedding-ada-002", dims: 1536, label: "OpenAI ada-002 (1536d)" },
];

/// Catalog dimensionality for `model`, matching either the full id or the
/// part after the last `/`, case-insensitively.
pub fn catalog_dims(model: &str) -> Option<usize> {
    let wanted = model.trim().to_ascii_lowercase();
    let short = |id: &str| id.rsplit('/').next().unwrap_or(id).to_ascii_lowercase();
    MODEL_CATALOG
        .iter()
        .find(|m| m.id.to_ascii_lowercase() == wanted || short(m.id) == short(&wanted))
        .map(|m| m.dims)
}

/// Resolves the embedder for a job's model.
pub trait EmbedderFactory: Send + Sync {
    /// `model = None` selects the configured default model.
    fn create(&self, model: Option<&str>) -> Result<Arc<dyn Embedder>>;
}

/// [`EmbedderFactory`] backed by `[embedding]` config. Embedders are cached
/// per model so HTTP clients and local models are reused across jobs.
pub struct ConfiguredEmbedders {
    config: EmbeddingConfig,
    cache: Mutex<HashMap<String, Arc<dyn Embedder>>>,
}

impl ConfiguredEmbedders {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_dims(&self, model: &str) -> Result<usize> {
        if self.config.model.as_deref() == Some(model) {
            if let Some(dims) = self.config.dims {
                return Ok(dims);
            }
        }
        catalog_dims(model).ok_or_else(|| {
            anyhow!(
                "unknown dimensionality for model '{}'; set embedding.dims or pick a catalog model",
                model
            )
        })
    }
}

impl EmbedderFactory for ConfiguredEmbedders {
    fn create(&self, model: Option<&str>) -> Result<Arc<dyn Embedder>> {
        if !self.config.is_enabled() {
            bail!("embedding provider is disabled; set [embedding].provider");
        }
        let model = match model.or(self.config.model.as_deref()) {
            Some(m) => m.to_string(),
            None if self.config.provider == "local" => "all-minilm-l6-v2".to_string(),
            None => bail!("no embedding model configured"),
        };

        if let Some(hit) = self.cache.lock().get(&model) {
            return Ok(Arc::clone(hit));
        }

        let dims = self.resolve_dims(&model)?;
        let embedder: Arc<dyn Embedder> = match self.config.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::new(&self.config, &model, dims)?),
            "ollama" => Arc::new(OllamaEmbedder::new(&self.config, &model, dims)?),
            #[cfg(feature = "local-embeddings")]
            "local" => Arc::new(LocalEmbedder::new(&model, dims, self.config.batch_size)?),
            #[cfg(not(feature = "local-embeddings"))]
            "local" => bail!("Local embedding provider requires --features local-embeddings"),
            other => bail!("Unknown embedding provider: {}", other),
        };
        tracing::info!(provider = %self.config.provider, model = %model, dims, "embedder ready");

        self.cache.lock().insert(model, Arc::clone(&embedder));
        Ok(embedder)
    }
}

// ============ HTTP retry loop ============

/// POSTs `body` to `url`, retrying transient failures with exponential backoff.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, EmbeddingError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} embedding retry", label);
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| EmbeddingError::Response(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                return Err(EmbeddingError::Request(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(EmbeddingError::Request(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn json_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| EmbeddingError::Response("embedding is not an array".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Response("embedding value is not a number".into()))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedder using the OpenAI API (`POST /v1/embeddings`).
///
/// Requires `OPENAI_API_KEY`. `embedding.url` overrides the base URL for
/// OpenAI-compatible servers.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, model: &str, dims: usize) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Response("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbeddingError::Response("missing embedding".into()))?;
        indexed.push((index, json_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, model: &str, dims: usize) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Response("missing embeddings array".into()))?
        .iter()
        .map(json_vector)
        .collect()
}
