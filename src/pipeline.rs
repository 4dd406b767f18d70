//! Pipeline executor.
//!
//! Runs one job from `queued` to a terminal state:
//!
//! ```text
//! upload_saved ──▶ ingesting ──▶ building_index ──▶ done
//!  extract+chunk     embed          upsert+index
//! ```
//!
//! Every transition and progress change goes through the [`JobRegistry`];
//! pollers only ever see registry snapshots. Failures at any stage end the
//! job in `error` with the stage recorded. Records already upserted when a
//! write or index failure happens stay in the collection, and the failure
//! message says how many were committed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use vector_ingest_core::chunk::{chunk_text, ChunkFilter};
use vector_ingest_core::embedding::{self, Embedder};
use vector_ingest_core::job::{Job, JobResult, Stage};
use vector_ingest_core::lang::tag_chunks;
use vector_ingest_core::models::{DocumentChunk, IngestOptions, VectorRecord};
use vector_ingest_core::progress::{PipelineCounters, ProgressEstimator};
use vector_ingest_core::registry::{JobRegistry, RegistryError};
use vector_ingest_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::EmbedderFactory;
use crate::extract::{extract_file, ExtractSettings};

/// Interval between synthetic progress ticks while the index builds.
const INDEX_RAMP_INTERVAL: Duration = Duration::from_millis(500);

/// One file of a batch: where it is on disk and the path that identifies it.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: PathBuf,
    /// Path relative to the batch root, `/`-separated. Chunk ids derive from it.
    pub relative: String,
}

/// The files a job ingests.
#[derive(Debug, Clone)]
pub struct FileBatch {
    pub root: PathBuf,
    pub files: Vec<BatchFile>,
    /// Root is a per-job scratch directory the pipeline may delete.
    pub scratch: bool,
}

impl FileBatch {
    pub fn relative_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.relative.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub extract_timeout: Duration,
    pub ocr_command: String,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    pub keep_files: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extract_timeout: Duration::from_secs(config.ingest.extract_timeout_secs),
            ocr_command: config.ingest.ocr_command.clone(),
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.ingest.upsert_batch_size.max(1),
            keep_files: config.uploads.keep_files,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extract_timeout: Duration::from_secs(120),
            ocr_command: "tesseract".to_string(),
            embed_batch_size: 64,
            upsert_batch_size: 256,
            keep_files: true,
        }
    }
}

/// Unrecoverable failure, tagged with the stage it happened in.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    message: String,
}

impl StageFailure {
    fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Shared handles the executor needs; cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<JobRegistry>,
    store: Arc<dyn VectorStore>,
    embedders: Arc<dyn EmbedderFactory>,
    estimator: Arc<dyn ProgressEstimator>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn VectorStore>,
        embedders: Arc<dyn EmbedderFactory>,
        estimator: Arc<dyn ProgressEstimator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            embedders,
            estimator,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Runs the job in the background and returns immediately.
    ///
    /// The job runs in its own task; a panic there fails the job at the
    /// stage it had reached instead of leaving it `running`.
    pub fn spawn(&self, job_id: String, batch: FileBatch) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let scratch = (batch.scratch && !this.settings.keep_files).then(|| batch.root.clone());
            let worker = {
                let this = this.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move { this.run(&job_id, batch).await })
            };
            match worker.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(job = %job_id, "pipeline lost its job record: {}", e);
                }
                Err(e) => {
                    let message = format!("pipeline panicked: {}", panic_message(e));
                    tracing::error!(job = %job_id, "{}", message);
                    let stage = this
                        .registry
                        .get(&job_id)
                        .ok()
                        .and_then(|job| job.stage)
                        .unwrap_or(Stage::UploadSaved);
                    if let Err(e) = this.registry.fail(&job_id, stage, &message) {
                        tracing::warn!(job = %job_id, "could not record panic: {}", e);
                    }
                    if let Some(dir) = scratch {
                        let _ = tokio::fs::remove_dir_all(&dir).await;
                    }
                }
            }
        })
    }

    /// Runs the job to a terminal state and returns its final snapshot.
    pub async fn run(&self, job_id: &str, batch: FileBatch) -> Result<Job, RegistryError> {
        let options = self.registry.get(job_id)?.options;
        let outcome = self.execute(job_id, &options, &batch).await;

        if batch.scratch && !self.settings.keep_files {
            if let Err(e) = tokio::fs::remove_dir_all(&batch.root).await {
                tracing::warn!(job = %job_id, dir = %batch.root.display(), "failed to remove scratch dir: {}", e);
            }
        }

        match outcome {
            Ok(result) => self.registry.complete(job_id, result),
            Err(failure) => self
                .registry
                .fail(job_id, failure.stage, &failure.message),
        }
    }

    async fn execute(
        &self,
        id: &str,
        options: &IngestOptions,
        batch: &FileBatch,
    ) -> Result<JobResult, StageFailure> {
        let mut counters = PipelineCounters {
            files_total: batch.files.len(),
            ..Default::default()
        };
        let mut result = JobResult {
            files_received: batch.files.len(),
            ..Default::default()
        };

        // Stage 1: extract and chunk.
        self.step(
            id,
            Stage::UploadSaved,
            &counters,
            Some(&format!(
                "Received {} file(s) for collection {}",
                batch.files.len(),
                options.collection
            )),
        );

        let extract = ExtractSettings {
            ocr: options.ocr,
            ocr_command: self.settings.ocr_command.clone(),
            timeout: self.settings.extract_timeout,
        };
        let mut chunks: Vec<DocumentChunk> = Vec::new();
        for file in &batch.files {
            let line = match extract_file(&file.path, &extract).await {
                Ok(text) => {
                    let file_chunks =
                        chunk_text(&file.relative, &text, options.chunk_size, options.overlap);
                    result.files_processed += 1;
                    let line = format!(
                        "Extracted {} ({} chars, {} chunks)",
                        file.relative,
                        text.chars().count(),
                        file_chunks.len()
                    );
                    chunks.extend(file_chunks);
                    line
                }
                Err(e) => {
                    result.files_failed += 1;
                    format!("Failed to extract {}: {}", file.relative, e)
                }
            };
            counters.files_done += 1;
            self.step(id, Stage::UploadSaved, &counters, Some(&line));
        }

        if result.files_processed == 0 {
            return Err(StageFailure::new(
                Stage::UploadSaved,
                format!("No files could be extracted ({} failed)", result.files_failed),
            ));
        }

        result.chunks_total = chunks.len();
        let mut filter = ChunkFilter::new(options.dedupe, options.min_chars);
        chunks.retain(|c| filter.admit(c));
        result.chunks_deduped = filter.deduped();
        result.chunks_filtered = filter.filtered();
        if options.language_detect {
            tag_chunks(&mut chunks);
        }
        counters.chunks_total = chunks.len();

        // Stage 2: embed.
        self.step(
            id,
            Stage::Ingesting,
            &counters,
            Some(&format!(
                "Chunked into {} chunks ({} duplicates dropped, {} below {} chars)",
                chunks.len(),
                result.chunks_deduped,
                result.chunks_filtered,
                options.min_chars
            )),
        );
        let embedder = self.embedders.create(options.model.as_deref()).map_err(|e| {
            StageFailure::new(Stage::Ingesting, format!("Embedder unavailable: {:#}", e))
        })?;
        self.check_dimensions(&options.collection, embedder.as_ref())
            .await?;
        self.log(id, &format!("Embedding with {}", embedder.model_name()));
        let records = self
            .embed_all(id, options, embedder.as_ref(), &chunks, &mut counters)
            .await?;

        // Stage 3: write and index.
        counters.records_total = records.len();
        self.step(
            id,
            Stage::BuildingIndex,
            &counters,
            Some(&format!(
                "Writing {} records to collection {}",
                records.len(),
                options.collection
            )),
        );
        result.chunks_written = self
            .write_all(id, &options.collection, &records, &mut counters)
            .await?;
        self.build_index(id, &options.collection, result.chunks_written)
            .await?;

        result.entities_after = match self.store.count(&options.collection).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(job = %id, "entity count unavailable: {}", e);
                None
            }
        };
        let summary = match result.entities_after {
            Some(n) => format!(
                "Wrote {} chunks; collection {} now holds {} entities",
                result.chunks_written, options.collection, n
            ),
            None => format!("Wrote {} chunks", result.chunks_written),
        };
        self.log(id, &summary);
        Ok(result)
    }

    /// Fails before any write when the model and collection disagree on dims.
    async fn check_dimensions(
        &self,
        collection: &str,
        embedder: &dyn Embedder,
    ) -> Result<(), StageFailure> {
        let target = self
            .store
            .describe(collection)
            .await
            .map_err(|e| StageFailure::new(Stage::Ingesting, e.to_string()))?
            .ok_or_else(|| {
                StageFailure::new(
                    Stage::Ingesting,
                    format!("Collection '{}' not found", collection),
                )
            })?;
        if target.dim != embedder.dims() {
            return Err(StageFailure::new(
                Stage::Ingesting,
                format!(
                    "Dimension mismatch: model {} produces {}-dim vectors but collection {} expects {}",
                    embedder.model_name(),
                    embedder.dims(),
                    collection,
                    target.dim
                ),
            ));
        }
        Ok(())
    }

    async fn embed_all(
        &self,
        id: &str,
        options: &IngestOptions,
        embedder: &dyn Embedder,
        chunks: &[DocumentChunk],
        counters: &mut PipelineCounters,
    ) -> Result<Vec<VectorRecord>, StageFailure> {
        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.settings.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let mut vectors = embedder
                .embed(&texts)
                .await
                .map_err(|e| StageFailure::new(Stage::Ingesting, e.to_string()))?;
            embedding::check_batch(texts.len(), embedder.dims(), &vectors)
                .map_err(|e| StageFailure::new(Stage::Ingesting, e.to_string()))?;
            for (chunk, mut vector) in batch.iter().zip(vectors.drain(..)) {
                if options.normalize {
                    embedding::normalize(&mut vector);
                }
                records.push(VectorRecord::from_chunk(chunk, vector));
            }
            counters.chunks_embedded += batch.len();
            self.step(
                id,
                Stage::Ingesting,
                counters,
                Some(&format!(
                    "Embedded {}/{} chunks",
                    counters.chunks_embedded, counters.chunks_total
                )),
            );
        }
        Ok(records)
    }

    async fn write_all(
        &self,
        id: &str,
        collection: &str,
        records: &[VectorRecord],
        counters: &mut PipelineCounters,
    ) -> Result<usize, StageFailure> {
        let mut written = 0usize;
        for batch in records.chunks(self.settings.upsert_batch_size) {
            let n = self.store.upsert(collection, batch).await.map_err(|e| {
                StageFailure::new(
                    Stage::BuildingIndex,
                    format!(
                        "Write failed after {} of {} records were committed: {}",
                        written,
                        records.len(),
                        e
                    ),
                )
            })?;
            written += n;
            counters.records_written += batch.len();
            self.step(
                id,
                Stage::BuildingIndex,
                counters,
                Some(&format!("Upserted {}/{} records", written, records.len())),
            );
        }
        Ok(written)
    }

    /// Builds the index once, ramping progress while the store works.
    async fn build_index(
        &self,
        id: &str,
        collection: &str,
        committed: usize,
    ) -> Result<(), StageFailure> {
        self.log(id, &format!("Building index on {}", collection));
        let build = self.store.build_index(collection);
        tokio::pin!(build);
        let mut ticker = tokio::time::interval(INDEX_RAMP_INTERVAL);
        ticker.tick().await;

        let outcome = loop {
            tokio::select! {
                res = &mut build => break res,
                _ = ticker.tick() => {
                    if let Ok(job) = self.registry.get(id) {
                        let next = self.estimator.ramp(job.progress);
                        self.set_progress(id, Stage::BuildingIndex, next, None);
                    }
                }
            }
        };
        outcome.map_err(|e| {
            StageFailure::new(
                Stage::BuildingIndex,
                format!(
                    "Index build failed; {} records were already committed: {}",
                    committed, e
                ),
            )
        })?;
        self.log(id, "Index ready");
        Ok(())
    }

    fn step(&self, id: &str, stage: Stage, counters: &PipelineCounters, line: Option<&str>) {
        let progress = self.estimator.estimate(stage, counters);
        self.set_progress(id, stage, progress, line);
    }

    fn set_progress(&self, id: &str, stage: Stage, progress: u8, line: Option<&str>) {
        if let Err(e) = self.registry.advance(id, stage, Some(progress), line) {
            tracing::warn!(job = %id, "progress update rejected: {}", e);
        }
    }

    fn log(&self, id: &str, line: &str) {
        if let Err(e) = self.registry.log(id, line) {
            tracing::warn!(job = %id, "log append rejected: {}", e);
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builds a batch from files under `root`, keyed by their path relative to it.
pub fn batch_from_paths(root: &Path, paths: Vec<PathBuf>, scratch: bool) -> FileBatch {
    let files = paths
        .into_iter()
        .map(|path| {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            BatchFile { path, relative }
        })
        .collect();
    FileBatch {
        root: root.to_path_buf(),
        files,
        scratch,
    }
}
