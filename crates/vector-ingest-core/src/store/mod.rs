//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the pipeline's only view of the external
//! vector database. Implementations must be `Send + Sync`; the same store is
//! shared by every concurrently running job.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`describe`](VectorStore::describe) | Declared dims, metric, and index of a collection |
//! | [`create`](VectorStore::create) | Create a collection from a [`CollectionTarget`] |
//! | [`upsert`](VectorStore::upsert) | Insert or overwrite records keyed by id |
//! | [`build_index`](VectorStore::build_index) | (Re)build the index and make new rows searchable |
//! | [`count`](VectorStore::count) | Number of entities in a collection |

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CollectionTarget, VectorRecord};

/// Failure reported by a vector store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),
    #[error("Collection '{0}' already exists")]
    CollectionExists(String),
    #[error("record {id} has {got} dimensions, collection expects {expected}")]
    Dimension {
        id: String,
        expected: usize,
        got: usize,
    },
    #[error("write failed: {0}")]
    Write(String),
    #[error("index build failed: {0}")]
    Index(String),
    #[error("vector store request failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs (e.g. `"memory"`, `"milvus"`).
    fn name(&self) -> &str;

    /// Returns `None` when the collection does not exist.
    async fn describe(&self, collection: &str) -> Result<Option<CollectionTarget>, StoreError>;

    async fn create(&self, target: &CollectionTarget) -> Result<(), StoreError>;

    /// Writes `records`, overwriting any existing rows with the same id.
    /// Returns the number of records written.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize, StoreError>;

    async fn build_index(&self, collection: &str) -> Result<(), StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;
}
