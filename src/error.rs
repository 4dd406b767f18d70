//! Request-path errors of the upload receiver and sync trigger.
//!
//! Everything that can go wrong *before* a job starts running is an
//! [`IngestError`] and is reported synchronously to the caller. Failures
//! after that point are recorded on the job itself.

use std::path::PathBuf;

use thiserror::Error;
use vector_ingest_core::models::OptionsError;
use vector_ingest_core::store::StoreError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No files provided")]
    NoFiles,
    #[error("invalid ingest options: {0}")]
    InvalidOptions(#[from] OptionsError),
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("sync source root does not exist: {}", .0.display())]
    SourceRootMissing(PathBuf),
    #[error("no files found under sync source root {}", .0.display())]
    NothingToSync(PathBuf),
    #[error("embedder unavailable: {0}")]
    Embedder(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("file operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

