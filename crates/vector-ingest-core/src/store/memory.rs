//! In-memory [`VectorStore`] for tests and local experiments.
//!
//! Collections are `HashMap`s keyed by record id behind a
//! `parking_lot::RwLock`, so upserts overwrite exactly like a real store.
//! Call counters let tests assert when writes and index builds happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::{CollectionTarget, VectorRecord};

use super::{StoreError, VectorStore};

struct MemCollection {
    target: CollectionTarget,
    records: HashMap<String, VectorRecord>,
    index_builds: usize,
}

/// In-memory vector store.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, MemCollection>>,
    upsert_calls: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given collections.
    pub fn with_collections(targets: impl IntoIterator<Item = CollectionTarget>) -> Self {
        let store = Self::new();
        {
            let mut cols = store.collections.write();
            for target in targets {
                cols.insert(
                    target.name.clone(),
                    MemCollection {
                        target,
                        records: HashMap::new(),
                        index_builds: 0,
                    },
                );
            }
        }
        store
    }

    /// Total `upsert` calls across all collections.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of completed index builds for a collection.
    pub fn index_builds(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.index_builds)
            .unwrap_or(0)
    }

    /// Copy of a stored record.
    pub fn record(&self, collection: &str, id: &str) -> Option<VectorRecord> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.records.get(id).cloned())
    }

    /// Copies of every record in a collection, sorted by id.
    pub fn records(&self, collection: &str) -> Vec<VectorRecord> {
        let mut out: Vec<VectorRecord> = self
            .collections
            .read()
            .get(collection)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionTarget>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.target.clone()))
    }

    async fn create(&self, target: &CollectionTarget) -> Result<(), StoreError> {
        let mut cols = self.collections.write();
        if cols.contains_key(&target.name) {
            return Err(StoreError::CollectionExists(target.name.clone()));
        }
        cols.insert(
            target.name.clone(),
            MemCollection {
                target: target.clone(),
                records: HashMap::new(),
                index_builds: 0,
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut cols = self.collections.write();
        let col = cols
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != col.target.dim) {
            return Err(StoreError::Dimension {
                id: bad.id.clone(),
                expected: col.target.dim,
                got: bad.vector.len(),
            });
        }
        for record in records {
            col.records.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn build_index(&self, collection: &str) -> Result<(), StoreError> {
        let mut cols = self.collections.write();
        let col = cols
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        col.index_builds += 1;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.records.len() as u64)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;

    fn target(name: &str, dim: usize) -> CollectionTarget {
        CollectionTarget {
            name: name.to_string(),
            dim,
            metric: Metric::Ip,
            index_type: "IVF_FLAT".to_string(),
            index_params: serde_json::json!({ "nlist": 1024 }),
        }
    }

    fn record(id: &str, dim: usize, text: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            text: text.to_string(),
            vector: vec![0.5; dim],
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = MemoryVectorStore::with_collections([target("docs", 4)]);
        store
            .upsert("docs", &[record("a", 4, "one"), record("b", 4, "two")])
            .await
            .unwrap();
        store.upsert("docs", &[record("a", 4, "uno")]).await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 2);
        assert_eq!(store.record("docs", "a").unwrap().text, "uno");
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let store = MemoryVectorStore::with_collections([target("docs", 4)]);
        let err = store.upsert("docs", &[record("a", 3, "x")]).await.unwrap_err();
        assert!(matches!(err, StoreError::Dimension { expected: 4, got: 3, .. }));
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_collection() {
        let store = MemoryVectorStore::new();
        assert!(store.describe("nope").await.unwrap().is_none());
        assert!(matches!(
            store.count("nope").await.unwrap_err(),
            StoreError::CollectionNotFound(_)
        ));
        store.create(&target("nope", 2)).await.unwrap();
        assert_eq!(store.describe("nope").await.unwrap().unwrap().dim, 2);
        assert!(store.create(&target("nope", 2)).await.is_err());
    }

    #[tokio::test]
    async fn index_builds_are_counted() {
        let store = MemoryVectorStore::with_collections([target("docs", 2)]);
        store.build_index("docs").await.unwrap();
        assert_eq!(store.index_builds("docs"), 1);
        assert_eq!(store.index_builds("other"), 0);
    }
}
