//! Upload receiver and sync trigger.
//!
//! Both entry points validate synchronously, create the job, hand the batch
//! to the [`Pipeline`], and return without waiting for it. Anything rejected
//! here never produces a job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vector_ingest_core::job::{Job, JobKind, Stage};
use vector_ingest_core::models::{CollectionTarget, IngestOptions};
use vector_ingest_core::progress::WeightedEstimator;
use vector_ingest_core::registry::JobRegistry;
use vector_ingest_core::store::{StoreError, VectorStore};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::{ConfiguredEmbedders, EmbedderFactory};
use crate::error::IngestError;
use crate::extract;
use crate::milvus;
use crate::pipeline::{BatchFile, FileBatch, Pipeline, PipelineSettings};
use crate::sync::plan_sync;
use crate::upload::{self, UploadedFile};

/// A multipart upload after parsing.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub options: IngestOptions,
    pub files: Vec<UploadedFile>,
}

/// Returned to the uploader once the files are on disk.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub job: Job,
    pub saved: usize,
    pub bytes: u64,
    pub dest: PathBuf,
}

pub struct IngestService {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    embedders: Arc<dyn EmbedderFactory>,
    pipeline: Pipeline,
}

impl IngestService {
    /// Builds the store and embedders named in `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = milvus::build_store(&config.vector_store)?;
        let embedders: Arc<dyn EmbedderFactory> =
            Arc::new(ConfiguredEmbedders::new(config.embedding.clone()));
        Ok(Self::with_parts(config, store, embedders))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedders: Arc<dyn EmbedderFactory>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new(config.ingest.log_capacity));
        let pipeline = Pipeline::new(
            registry,
            Arc::clone(&store),
            Arc::clone(&embedders),
            Arc::new(WeightedEstimator::default()),
            PipelineSettings::from_config(&config),
        );
        Self {
            config: Arc::new(config),
            store,
            embedders,
            pipeline,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.pipeline.registry()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Validates an upload, saves its files, and starts the job.
    pub async fn submit_upload(
        &self,
        request: UploadRequest,
        remote: bool,
    ) -> Result<UploadReceipt, IngestError> {
        if remote && !self.config.server.allow_remote_upload {
            return Err(IngestError::Forbidden(
                "/ingest/upload is disabled for remote clients. Set server.allow_remote_upload = true to enable."
                    .into(),
            ));
        }
        if request.files.iter().all(|f| f.bytes.is_empty()) {
            return Err(IngestError::NoFiles);
        }
        let options = request.options;
        self.validate(&options).await?;

        let job = self.registry().create(
            JobKind::Upload,
            options,
            upload::planned_paths(&request.files),
        );
        let dest = upload::job_dir(
            &self.config.uploads.workdir,
            &job.collection,
            &job.id,
            job.created_at,
        );
        let saved = match upload::save_files(&dest, &request.files).await {
            Ok(saved) => saved,
            Err(e) => {
                let _ = self.registry().fail(
                    &job.id,
                    Stage::UploadSaved,
                    &format!("Failed to save upload: {}", e),
                );
                return Err(IngestError::Io(e));
            }
        };
        let _ = self.registry().log(
            &job.id,
            &format!(
                "Saved {} file(s), {} bytes to {}",
                saved.saved,
                saved.bytes,
                saved.dest.display()
            ),
        );
        tracing::info!(
            job = %job.id,
            collection = %job.collection,
            dest = %saved.dest.display(),
            files = saved.saved,
            bytes = saved.bytes,
            "upload saved"
        );

        self.pipeline.spawn(job.id.clone(), saved.batch);
        Ok(UploadReceipt {
            job,
            saved: saved.saved,
            bytes: saved.bytes,
            dest: saved.dest,
        })
    }

    /// Scans the source root and starts one job per target collection.
    /// Every target is validated before any job is created.
    pub async fn submit_sync(&self, remote: bool) -> Result<Vec<Job>, IngestError> {
        if remote && !self.config.server.allow_remote_sync {
            return Err(IngestError::Forbidden(
                "/sync is local-only. Set server.allow_remote_sync = true to allow remote access."
                    .into(),
            ));
        }
        let sync = self.config.sync.clone();
        let plans = tokio::task::spawn_blocking(move || plan_sync(&sync))
            .await
            .map_err(|e| IngestError::Other(anyhow::anyhow!("sync scan task failed: {}", e)))??;
        let mut prepared = Vec::with_capacity(plans.len());
        for plan in plans {
            let options = self.config.ingest.options_for(&plan.collection);
            self.validate(&options).await?;
            prepared.push((options, plan.batch));
        }

        let mut jobs = Vec::with_capacity(prepared.len());
        for (options, batch) in prepared {
            let job = self
                .registry()
                .create(JobKind::Sync, options, batch.relative_paths());
            tracing::info!(
                job = %job.id,
                collection = %job.collection,
                root = %batch.root.display(),
                files = batch.files.len(),
                "sync started"
            );
            self.pipeline.spawn(job.id.clone(), batch);
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Validates a foreground job over local paths and creates it without
    /// starting it. Directories contribute every supported file under them.
    pub async fn prepare_local(
        &self,
        options: IngestOptions,
        paths: &[PathBuf],
    ) -> Result<(Job, FileBatch), IngestError> {
        let owned = paths.to_vec();
        let batch = tokio::task::spawn_blocking(move || local_batch(&owned))
            .await
            .map_err(|e| IngestError::Other(anyhow::anyhow!("file scan task failed: {}", e)))??;
        if batch.files.is_empty() {
            return Err(IngestError::NoFiles);
        }
        self.validate(&options).await?;
        let job = self
            .registry()
            .create(JobKind::Upload, options, batch.relative_paths());
        Ok((job, batch))
    }

    async fn validate(&self, options: &IngestOptions) -> Result<(), IngestError> {
        options.validate()?;
        self.ensure_collection(options).await
    }

    /// Missing collections are created only when configured to; the new
    /// collection takes the job's embedder dimensionality.
    async fn ensure_collection(&self, options: &IngestOptions) -> Result<(), IngestError> {
        if self.store.describe(&options.collection).await?.is_some() {
            return Ok(());
        }
        if !self.config.vector_store.auto_create_collections {
            return Err(IngestError::CollectionNotFound(options.collection.clone()));
        }
        let embedder = self
            .embedders
            .create(options.model.as_deref())
            .map_err(|e| IngestError::Embedder(format!("{:#}", e)))?;
        let target = CollectionTarget {
            name: options.collection.clone(),
            dim: embedder.dims(),
            metric: self.config.vector_store.metric(),
            index_type: self.config.vector_store.index_type.to_ascii_uppercase(),
            index_params: self.config.vector_store.index_params(),
        };
        match self.store.create(&target).await {
            Ok(()) | Err(StoreError::CollectionExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(collection = %target.name, dim = target.dim, "auto-created collection");
        Ok(())
    }
}

fn local_batch(paths: &[PathBuf]) -> Result<FileBatch, IngestError> {
    let root = common_root(paths);
    let mut files: Vec<BatchFile> = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && extract::is_supported(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            for file in found {
                let relative = relative_to(&file, path);
                files.push(BatchFile { path: file, relative });
            }
        } else if path.is_file() {
            let relative = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            files.push(BatchFile {
                path: path.clone(),
                relative,
            });
        } else {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
    }
    Ok(FileBatch {
        root,
        files,
        scratch: false,
    })
}

fn common_root(paths: &[PathBuf]) -> PathBuf {
    match paths {
        [only] if only.is_dir() => only.clone(),
        _ => PathBuf::from("."),
    }
}

fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
