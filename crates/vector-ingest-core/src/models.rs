//! Core data types shared by the ingestion pipeline.
//!
//! These types are produced and consumed by the chunker, the embedder, and
//! the vector-store writer. They carry no I/O behaviour of their own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Options captured when a job is created. Immutable for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Target collection name.
    pub collection: String,
    /// Embedding model override. `None` uses the configured default.
    #[serde(default)]
    pub model: Option<String>,
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
    /// Scale vectors to unit length before writing.
    pub normalize: bool,
    /// Run optical character recognition on image inputs.
    pub ocr: bool,
    /// Tag each chunk with a detected language code.
    pub language_detect: bool,
    /// Drop chunks whose fingerprint was already seen in this job.
    pub dedupe: bool,
    /// Chunks shorter than this many characters are discarded.
    pub min_chars: usize,
}

impl IngestOptions {
    /// Options with the default chunking policy for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            model: None,
            chunk_size: 512,
            overlap: 64,
            normalize: false,
            ocr: false,
            language_detect: true,
            dedupe: true,
            min_chars: 12,
        }
    }

    /// Checks the options before a job is created.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.collection.trim().is_empty() {
            return Err(OptionsError::EmptyCollection);
        }
        if self.chunk_size == 0 {
            return Err(OptionsError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(OptionsError::OverlapTooLarge {
                overlap: self.overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Rejected ingest options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("collection name must not be empty")]
    EmptyCollection,
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

/// A slice of normalized document text, the unit that gets embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    /// Deterministic identifier derived from `source` and `ordinal`.
    pub id: String,
    /// Relative path of the source file within its batch.
    pub source: String,
    /// Position of the chunk within its source file, starting at 0.
    pub ordinal: u32,
    pub text: String,
    /// ISO 639-3 code, `und` when detection was inconclusive.
    pub lang: Option<String>,
    /// SHA-256 of the lowercased, whitespace-collapsed text.
    pub fingerprint: String,
    /// Free-form string metadata (`filename`, `ext`, `section`, `page`).
    pub meta: BTreeMap<String, String>,
}

/// Distance metric declared by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    Ip,
    L2,
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Ip => "IP",
            Metric::L2 => "L2",
            Metric::Cosine => "COSINE",
        }
    }

    /// Parses a metric name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IP" => Some(Metric::Ip),
            "L2" => Some(Metric::L2),
            "COSINE" => Some(Metric::Cosine),
            _ => None,
        }
    }
}

/// The external collection a job writes into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionTarget {
    pub name: String,
    pub dim: usize,
    pub metric: Metric,
    /// Index type, e.g. `IVF_FLAT` or `HNSW`.
    pub index_type: String,
    /// Index build parameters, e.g. `{"nlist": 1024}`.
    pub index_params: serde_json::Value,
}

/// One row handed to the vector store: a chunk plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

impl VectorRecord {
    /// Builds a record from an embedded chunk; metadata keeps the chunk's
    /// source, ordinal, language, and fingerprint next to its string meta.
    pub fn from_chunk(chunk: &DocumentChunk, vector: Vec<f32>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), chunk.source.clone().into());
        metadata.insert("ordinal".into(), chunk.ordinal.into());
        metadata.insert("fingerprint".into(), chunk.fingerprint.clone().into());
        if let Some(lang) = &chunk.lang {
            metadata.insert("lang".into(), lang.clone().into());
        }
        for (k, v) in &chunk.meta {
            metadata.insert(k.clone(), v.clone().into());
        }
        Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            vector,
            metadata: serde_json::Value::Object(metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        let opts = IngestOptions::new("docs");
        assert!(opts.validate().is_ok());
        assert_eq!(opts.chunk_size, 512);
        assert_eq!(opts.overlap, 64);
    }

    #[test]
    fn overlap_equal_to_chunk_size_is_rejected() {
        let mut opts = IngestOptions::new("docs");
        opts.chunk_size = 64;
        opts.overlap = 64;
        assert_eq!(
            opts.validate(),
            Err(OptionsError::OverlapTooLarge {
                overlap: 64,
                chunk_size: 64
            })
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut opts = IngestOptions::new("docs");
        opts.chunk_size = 0;
        opts.overlap = 0;
        assert_eq!(opts.validate(), Err(OptionsError::ZeroChunkSize));
    }

    #[test]
    fn blank_collection_is_rejected() {
        assert_eq!(
            IngestOptions::new("  ").validate(),
            Err(OptionsError::EmptyCollection)
        );
    }

    #[test]
    fn metric_parse_is_case_insensitive() {
        assert_eq!(Metric::parse("ip"), Some(Metric::Ip));
        assert_eq!(Metric::parse("Cosine"), Some(Metric::Cosine));
        assert_eq!(Metric::parse("hamming"), None);
    }
}
