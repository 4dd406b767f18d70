//! TOML configuration.
//!
//! Every section except `[embedding]` and `[vector_store]` is optional and
//! falls back to the defaults below. Secrets may come from the environment
//! (`MILVUS_TOKEN`, `OPENAI_API_KEY`) instead of the file.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7860"
//!
//! [uploads]
//! workdir = "./uploads"
//!
//! [sync]
//! source_root = "./data"
//! collection_prefix = "kb_"
//!
//! [ingest]
//! chunk_size = 512
//! overlap = 64
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [vector_store]
//! provider = "milvus"
//! url = "http://127.0.0.1:19530"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vector_ingest_core::models::{IngestOptions, Metric};

use crate::embedding::catalog_dims;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allow `POST /sync` from non-loopback peers.
    #[serde(default)]
    pub allow_remote_sync: bool,
    /// Allow `POST /ingest/upload` from non-loopback peers.
    #[serde(default = "default_true")]
    pub allow_remote_upload: bool,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allow_remote_sync: false,
            allow_remote_upload: true,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7860".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    /// Root of the per-job scratch directories.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Keep uploaded files after the job finishes.
    #[serde(default = "default_true")]
    pub keep_files: bool,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            keep_files: true,
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from("./uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// Single target collection. When unset, each top-level folder of
    /// `source_root` becomes a job for `collection_prefix + folder`.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub collection_prefix: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            collection: None,
            collection_prefix: String::new(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_source_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub normalize: bool,
    #[serde(default)]
    pub ocr: bool,
    #[serde(default = "default_true")]
    pub language_detect: bool,
    #[serde(default = "default_true")]
    pub dedupe: bool,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Per-file extraction budget.
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    /// Log lines retained per job.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_ocr_command")]
    pub ocr_command: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            normalize: false,
            ocr: false,
            language_detect: true,
            dedupe: true,
            min_chars: default_min_chars(),
            extract_timeout_secs: default_extract_timeout_secs(),
            log_capacity: default_log_capacity(),
            upsert_batch_size: default_upsert_batch_size(),
            ocr_command: default_ocr_command(),
        }
    }
}

impl IngestConfig {
    /// Job options for `collection` seeded from these defaults.
    pub fn options_for(&self, collection: &str) -> IngestOptions {
        IngestOptions {
            collection: collection.to_string(),
            model: None,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            normalize: self.normalize,
            ocr: self.ocr,
            language_detect: self.language_detect,
            dedupe: self.dedupe,
            min_chars: self.min_chars,
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    64
}
fn default_min_chars() -> usize {
    12
}
fn default_extract_timeout_secs() -> u64 {
    120
}
fn default_log_capacity() -> usize {
    200
}
fn default_upsert_batch_size() -> usize {
    256
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// Create a missing target collection instead of rejecting the request.
    #[serde(default)]
    pub auto_create_collections: bool,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_index_type")]
    pub index_type: String,
    #[serde(default = "default_nlist")]
    pub nlist: u32,
    /// Byte cap for the stored `text` field.
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: default_store_url(),
            token: None,
            database: None,
            auto_create_collections: false,
            metric: default_metric(),
            index_type: default_index_type(),
            nlist: default_nlist(),
            max_text_len: default_max_text_len(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl VectorStoreConfig {
    /// Configured metric; validated at load time.
    pub fn metric(&self) -> Metric {
        Metric::parse(&self.metric).unwrap_or(Metric::Ip)
    }

    /// Index parameters for newly created collections.
    pub fn index_params(&self) -> serde_json::Value {
        match self.index_type.to_ascii_uppercase().as_str() {
            "HNSW" => serde_json::json!({ "M": 16, "efConstruction": 200 }),
            "FLAT" | "AUTOINDEX" => serde_json::json!({}),
            _ => serde_json::json!({ "nlist": self.nlist }),
        }
    }

    /// Token from the config file, else `MILVUS_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("MILVUS_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

fn default_store_provider() -> String {
    "memory".to_string()
}
fn default_store_url() -> String {
    "http://127.0.0.1:19530".to_string()
}
fn default_metric() -> String {
    "IP".to_string()
}
fn default_index_type() -> String {
    "IVF_FLAT".to_string()
}
fn default_nlist() -> u32 {
    1024
}
fn default_max_text_len() -> usize {
    2048
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            uploads: UploadsConfig::default(),
            sync: SyncConfig::default(),
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.ingest.chunk_size == 0 {
        bail!("ingest.chunk_size must be > 0");
    }
    if config.ingest.overlap >= config.ingest.chunk_size {
        bail!("ingest.overlap must be smaller than ingest.chunk_size");
    }
    if config.ingest.log_capacity == 0 {
        bail!("ingest.log_capacity must be > 0");
    }
    if config.ingest.upsert_batch_size == 0 {
        bail!("ingest.upsert_batch_size must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if config.embedding.provider != "local" {
            let Some(model) = config.embedding.model.as_deref() else {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            };
            if config.embedding.dims.is_none() && catalog_dims(model).is_none() {
                bail!(
                    "embedding.dims must be set for model '{}' (not in the built-in catalog)",
                    model
                );
            }
        }
    }

    match config.vector_store.provider.as_str() {
        "memory" | "milvus" => {}
        other => bail!(
            "Unknown vector_store provider: '{}'. Must be memory or milvus.",
            other
        ),
    }
    if Metric::parse(&config.vector_store.metric).is_none() {
        bail!(
            "vector_store.metric must be IP, L2, or COSINE (got '{}')",
            config.vector_store.metric
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7860");
        assert!(!config.server.allow_remote_sync);
        assert_eq!(config.ingest.chunk_size, 512);
        assert_eq!(config.ingest.overlap, 64);
        assert_eq!(config.ingest.log_capacity, 200);
        assert_eq!(config.vector_store.provider, "memory");
        assert_eq!(config.vector_store.metric(), Metric::Ip);
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let err = parse_config("[ingest]\nchunk_size = 100\noverlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn catalog_model_needs_no_dims() {
        let config = parse_config(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"all-MiniLM-L6-v2\"\n",
        )
        .unwrap();
        assert_eq!(config.embedding.dims, None);
    }

    #[test]
    fn unknown_model_needs_dims() {
        assert!(parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"mystery\"\n").is_err());
        assert!(parse_config(
            "[embedding]\nprovider = \"openai\"\nmodel = \"mystery\"\ndims = 12\n"
        )
        .is_ok());
    }

    #[test]
    fn hnsw_index_params() {
        let config = parse_config("[vector_store]\nindex_type = \"HNSW\"\n").unwrap();
        assert_eq!(config.vector_store.index_params()["M"], 16);
        let config = parse_config("").unwrap();
        assert_eq!(config.vector_store.index_params()["nlist"], 1024);
    }

    #[test]
    fn options_seeded_from_defaults() {
        let config = parse_config("[ingest]\nchunk_size = 256\noverlap = 32\ndedupe = false\n").unwrap();
        let opts = config.ingest.options_for("kb");
        assert_eq!(opts.collection, "kb");
        assert_eq!(opts.chunk_size, 256);
        assert_eq!(opts.overlap, 32);
        assert!(!opts.dedupe);
        assert!(opts.language_detect);
    }
}
