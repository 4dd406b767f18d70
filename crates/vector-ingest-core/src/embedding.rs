//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements.
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `vector-ingest` app crate; tests supply their own deterministic
//! implementations.

use async_trait::async_trait;
use thiserror::Error;

/// Failure while producing embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding configuration error: {0}")]
    Config(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("invalid embedding response: {0}")]
    Response(String),
    #[error("embedder returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedder returned a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Maps chunk texts to fixed-dimension vectors.
///
/// `dims` must be known without calling the model, so the pipeline can
/// check it against the target collection before embedding anything.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Output dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embeds a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Checks that a batch result matches the request and the declared dims.
pub fn check_batch(
    expected_count: usize,
    dims: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dims,
            got: bad.len(),
        });
    }
    Ok(())
}

/// Scales `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}
