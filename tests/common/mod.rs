//! Shared fixtures: deterministic embedder, fault-injecting store, and
//! service builders over temp directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use vector_ingest::config::Config;
use vector_ingest::core::embedding::{Embedder, EmbeddingError};
use vector_ingest::core::job::Job;
use vector_ingest::core::models::{CollectionTarget, Metric, VectorRecord};
use vector_ingest::core::registry::JobRegistry;
use vector_ingest::core::store::memory::MemoryVectorStore;
use vector_ingest::core::store::{StoreError, VectorStore};
use vector_ingest::embedding::EmbedderFactory;
use vector_ingest::service::IngestService;

pub const DIMS: usize = 8;

pub const ENGLISH: &str = "The ingestion service accepts documents from operators and turns them \
into searchable records. Each document is split into overlapping windows of text, every window \
is embedded with the selected model, and the resulting vectors are written into the target \
collection before the index is rebuilt so that new content becomes searchable.";

/// Embeds text into a fixed-size vector derived from its bytes.
pub struct FakeEmbedder {
    pub dims: usize,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

pub fn vector_for(text: &str, dims: usize) -> Vec<f32> {
    let seed = text
        .bytes()
        .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    (0..dims)
        .map(|i| ((seed.wrapping_add(i as u32 * 13) % 97) as f32 + 1.0) / 97.0)
        .collect()
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts.iter().map(|t| vector_for(t, self.dims)).collect())
    }
}

/// Always hands out the same embedder, whatever model is asked for.
pub struct FakeFactory(pub Arc<FakeEmbedder>);

impl EmbedderFactory for FakeFactory {
    fn create(&self, _model: Option<&str>) -> Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = self.0.clone();
        Ok(embedder)
    }
}

/// Embedder whose `embed` panics, standing in for a crashing model runtime.
pub struct PanickingEmbedder;

#[async_trait]
impl Embedder for PanickingEmbedder {
    fn model_name(&self) -> &str {
        "panicking-embedder"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        panic!("model runtime crashed");
    }
}

pub struct PanickingFactory;

impl EmbedderFactory for PanickingFactory {
    fn create(&self, _model: Option<&str>) -> Result<Arc<dyn Embedder>> {
        let embedder: Arc<dyn Embedder> = Arc::new(PanickingEmbedder);
        Ok(embedder)
    }
}

/// Executable that ignores its arguments and sleeps, for exercising the
/// extraction time budget through the OCR command.
#[cfg(unix)]
pub fn sleeping_command(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("slow-ocr.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Memory store whose `upsert` fails on the given (1-based) call.
pub struct FlakyStore {
    pub inner: Arc<MemoryVectorStore>,
    pub fail_on_call: usize,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryVectorStore>, fail_on_call: usize) -> Self {
        Self {
            inner,
            fail_on_call,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionTarget>, StoreError> {
        self.inner.describe(collection).await
    }

    async fn create(&self, target: &CollectionTarget) -> Result<(), StoreError> {
        self.inner.create(target).await
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(StoreError::Write("connection reset".into()));
        }
        self.inner.upsert(collection, records).await
    }

    async fn build_index(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.build_index(collection).await
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.inner.count(collection).await
    }
}

pub fn target(name: &str, dim: usize) -> CollectionTarget {
    CollectionTarget {
        name: name.to_string(),
        dim,
        metric: Metric::Ip,
        index_type: "IVF_FLAT".to_string(),
        index_params: serde_json::json!({ "nlist": 16 }),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryVectorStore>,
    pub embedder: Arc<FakeEmbedder>,
    pub service: Arc<IngestService>,
}

impl Harness {
    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.service.registry()
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.uploads.workdir = dir.path().join("uploads");
    config.sync.source_root = dir.path().join("data");
    config.embedding.batch_size = 4;
    config.ingest.upsert_batch_size = 4;
    config
}

/// Service over a memory store holding `kb` with [`DIMS`] dimensions.
pub fn harness() -> Harness {
    harness_with(|_| {}, FakeEmbedder::new(DIMS), vec![target("kb", DIMS)])
}

pub fn harness_with(
    tweak: impl FnOnce(&mut Config),
    embedder: FakeEmbedder,
    collections: Vec<CollectionTarget>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    tweak(&mut config);
    let store = Arc::new(MemoryVectorStore::with_collections(collections));
    let embedder = Arc::new(embedder);
    let service = Arc::new(IngestService::with_parts(
        config,
        store.clone(),
        Arc::new(FakeFactory(embedder.clone())),
    ));
    Harness {
        dir,
        store,
        embedder,
        service,
    }
}

/// Polls until the job is terminal.
pub async fn wait_for(registry: &JobRegistry, id: &str) -> Job {
    for _ in 0..1000 {
        let job = registry.get(id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not reach a terminal state", id);
}

pub fn log_lines_containing(job: &Job, needle: &str) -> usize {
    job.logs_tail.iter().filter(|l| l.contains(needle)).count()
}
