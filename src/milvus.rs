//! Milvus vector store over the RESTful v2 API.
//!
//! Every call is a JSON `POST` to `/v2/vectordb/...` answered with an
//! envelope `{ "code": 0, "data": ..., "message": ... }`; a non-zero code is
//! an error even when the HTTP status is 200.
//!
//! Collections created here use a fixed schema:
//!
//! | Field | Type | Notes |
//! |-------|------|-------|
//! | `doc_id` | VarChar(64), primary | stable chunk id |
//! | `text` | VarChar(`max_text_len`) | truncated on a char boundary |
//! | `meta` | VarChar(65535) | chunk metadata as a JSON string |
//! | `vec` | FloatVector(`dim`) | |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use vector_ingest_core::models::{CollectionTarget, Metric, VectorRecord};
use vector_ingest_core::store::memory::MemoryVectorStore;
use vector_ingest_core::store::{StoreError, VectorStore};

use crate::config::VectorStoreConfig;

const PRIMARY_FIELD: &str = "doc_id";
const TEXT_FIELD: &str = "text";
const META_FIELD: &str = "meta";
const VECTOR_FIELD: &str = "vec";
const INDEX_NAME: &str = "vec_idx";
const META_MAX_LEN: usize = 65_535;

/// Builds the store selected by `[vector_store] provider`.
pub fn build_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "milvus" => Ok(Arc::new(MilvusStore::new(config)?)),
        _ => Ok(Arc::new(MemoryVectorStore::new())),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

pub struct MilvusStore {
    client: reqwest::Client,
    base_url: String,
    database: Option<String>,
    metric: Metric,
    index_type: String,
    index_params: Value,
    max_text_len: usize,
}

impl MilvusStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        anyhow::ensure!(
            config.url.starts_with("http://") || config.url.starts_with("https://"),
            "vector_store.url must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = config.resolved_token() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("invalid Milvus token")?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build Milvus HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            metric: config.metric(),
            index_type: config.index_type.to_ascii_uppercase(),
            index_params: config.index_params(),
            max_text_len: config.max_text_len,
        })
    }

    async fn call(&self, path: &str, mut body: Value) -> Result<Envelope, StoreError> {
        if let (Some(db), Some(obj)) = (&self.database, body.as_object_mut()) {
            obj.insert("dbName".into(), Value::String(db.clone()));
        }
        let url = format!("{}/v2/vectordb/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {}", path, e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("{} returned {}: {}", path, status, text)));
        }
        response
            .json::<Envelope>()
            .await
            .map_err(|e| StoreError::Backend(format!("{}: invalid response: {}", path, e)))
    }

    fn index_param(&self) -> Value {
        let mut params = match &self.index_params {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params.insert("index_type".into(), Value::String(self.index_type.clone()));
        json!({
            "fieldName": VECTOR_FIELD,
            "indexName": INDEX_NAME,
            "metricType": self.metric.as_str(),
            "params": params,
        })
    }

    fn row(&self, record: &VectorRecord) -> Value {
        json!({
            PRIMARY_FIELD: record.id,
            TEXT_FIELD: truncate_to_boundary(&record.text, self.max_text_len),
            META_FIELD: truncate_to_boundary(&record.metadata.to_string(), META_MAX_LEN),
            VECTOR_FIELD: record.vector,
        })
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_not_found(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("not found") || m.contains("can't find") || m.contains("not exist")
}

fn envelope_error(path: &str, env: &Envelope) -> String {
    format!(
        "{} failed (code {}): {}",
        path,
        env.code,
        env.message.as_deref().unwrap_or("no message")
    )
}

/// Reads dims and metric out of a `collections/describe` payload.
fn parse_describe(name: &str, data: &Value, fallback: &MilvusStore) -> Result<CollectionTarget, StoreError> {
    let fields = data
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Backend(format!("describe {}: missing fields", name)))?;
    let vector_field = fields
        .iter()
        .find(|f| {
            f.get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("FloatVector"))
        })
        .ok_or_else(|| StoreError::Backend(format!("collection {} has no FloatVector field", name)))?;
    let dim = vector_field
        .get("params")
        .and_then(Value::as_array)
        .and_then(|params| {
            params
                .iter()
                .find(|p| p.get("key").and_then(Value::as_str) == Some("dim"))
        })
        .and_then(|p| p.get("value"))
        .and_then(|v| match v {
            Value::String(s) => s.parse::<usize>().ok(),
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            _ => None,
        })
        .ok_or_else(|| StoreError::Backend(format!("collection {} declares no dim", name)))?;
    let metric = data
        .get("indexes")
        .and_then(Value::as_array)
        .and_then(|idx| idx.first())
        .and_then(|i| i.get("metricType"))
        .and_then(Value::as_str)
        .and_then(Metric::parse)
        .unwrap_or(fallback.metric);
    Ok(CollectionTarget {
        name: name.to_string(),
        dim,
        metric,
        index_type: fallback.index_type.clone(),
        index_params: fallback.index_params.clone(),
    })
}

fn parse_row_count(data: &Value) -> Option<u64> {
    match data.get("rowCount")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for MilvusStore {
    fn name(&self) -> &str {
        "milvus"
    }

    async fn describe(&self, collection: &str) -> Result<Option<CollectionTarget>, StoreError> {
        let env = self
            .call("collections/describe", json!({ "collectionName": collection }))
            .await?;
        if env.code != 0 {
            if env.message.as_deref().is_some_and(is_not_found) {
                return Ok(None);
            }
            return Err(StoreError::Backend(envelope_error("collections/describe", &env)));
        }
        parse_describe(collection, &env.data, self).map(Some)
    }

    async fn create(&self, target: &CollectionTarget) -> Result<(), StoreError> {
        let mut params = match &target.index_params {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params.insert("index_type".into(), Value::String(target.index_type.clone()));
        let body = json!({
            "collectionName": target.name,
            "schema": {
                "autoId": false,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": PRIMARY_FIELD, "dataType": "VarChar", "isPrimary": true,
                      "elementTypeParams": { "max_length": 64 } },
                    { "fieldName": TEXT_FIELD, "dataType": "VarChar",
                      "elementTypeParams": { "max_length": self.max_text_len.max(1) } },
                    { "fieldName": META_FIELD, "dataType": "VarChar",
                      "elementTypeParams": { "max_length": META_MAX_LEN } },
                    { "fieldName": VECTOR_FIELD, "dataType": "FloatVector",
                      "elementTypeParams": { "dim": target.dim.to_string() } },
                ],
            },
            "indexParams": [{
                "fieldName": VECTOR_FIELD,
                "indexName": INDEX_NAME,
                "metricType": target.metric.as_str(),
                "params": params,
            }],
        });
        let env = self.call("collections/create", body).await?;
        if env.code != 0 {
            let message = env.message.as_deref().unwrap_or_default();
            if message.to_ascii_lowercase().contains("already exist") {
                return Err(StoreError::CollectionExists(target.name.clone()));
            }
            return Err(StoreError::Backend(envelope_error("collections/create", &env)));
        }
        tracing::info!(collection = %target.name, dim = target.dim, "created Milvus collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows: Vec<Value> = records.iter().map(|r| self.row(r)).collect();
        let env = self
            .call(
                "entities/upsert",
                json!({ "collectionName": collection, "data": rows }),
            )
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        if env.code != 0 {
            if env.message.as_deref().is_some_and(is_not_found) {
                return Err(StoreError::CollectionNotFound(collection.to_string()));
            }
            return Err(StoreError::Write(envelope_error("entities/upsert", &env)));
        }
        let written = env
            .data
            .get("upsertCount")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(records.len());
        Ok(written)
    }

    async fn build_index(&self, collection: &str) -> Result<(), StoreError> {
        let env = self
            .call(
                "indexes/describe",
                json!({ "collectionName": collection, "indexName": INDEX_NAME }),
            )
            .await
            .map_err(|e| StoreError::Index(e.to_string()))?;
        let has_index = env.code == 0
            && env.data.as_array().map_or(!env.data.is_null(), |a| !a.is_empty());
        if !has_index {
            let env = self
                .call(
                    "indexes/create",
                    json!({ "collectionName": collection, "indexParams": [self.index_param()] }),
                )
                .await
                .map_err(|e| StoreError::Index(e.to_string()))?;
            if env.code != 0 {
                return Err(StoreError::Index(envelope_error("indexes/create", &env)));
            }
            tracing::info!(collection, "created vector index");
        }

        let env = self
            .call("collections/load", json!({ "collectionName": collection }))
            .await
            .map_err(|e| StoreError::Index(e.to_string()))?;
        if env.code != 0 {
            return Err(StoreError::Index(envelope_error("collections/load", &env)));
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let env = self
            .call("collections/get_stats", json!({ "collectionName": collection }))
            .await?;
        if env.code != 0 {
            if env.message.as_deref().is_some_and(is_not_found) {
                return Err(StoreError::CollectionNotFound(collection.to_string()));
            }
            return Err(StoreError::Backend(envelope_error("collections/get_stats", &env)));
        }
        parse_row_count(&env.data)
            .ok_or_else(|| StoreError::Backend("get_stats response has no rowCount".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MilvusStore {
        MilvusStore::new(&VectorStoreConfig::default()).unwrap()
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_boundary("hello", 10), "hello");
        assert_eq!(truncate_to_boundary("hello", 3), "hel");
        // "é" is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_to_boundary("aé", 2), "a");
        assert_eq!(truncate_to_boundary("aé", 3), "aé");
    }

    #[test]
    fn describe_payload_yields_dim_and_metric() {
        let data = json!({
            "collectionName": "kb",
            "fields": [
                { "name": "doc_id", "type": "VarChar", "primaryKey": true },
                { "name": "vec", "type": "FloatVector",
                  "params": [{ "key": "dim", "value": "768" }] }
            ],
            "indexes": [{ "fieldName": "vec", "indexName": "vec_idx", "metricType": "COSINE" }]
        });
        let target = parse_describe("kb", &data, &store()).unwrap();
        assert_eq!(target.dim, 768);
        assert_eq!(target.metric, Metric::Cosine);
        assert_eq!(target.index_type, "IVF_FLAT");
    }

    #[test]
    fn describe_without_vector_field_is_an_error() {
        let data = json!({ "fields": [{ "name": "doc_id", "type": "VarChar" }] });
        assert!(parse_describe("kb", &data, &store()).is_err());
    }

    #[test]
    fn row_count_accepts_string_or_number() {
        assert_eq!(parse_row_count(&json!({ "rowCount": 42 })), Some(42));
        assert_eq!(parse_row_count(&json!({ "rowCount": "7" })), Some(7));
        assert_eq!(parse_row_count(&json!({})), None);
    }

    #[test]
    fn rows_use_fixed_field_names() {
        let mut config = VectorStoreConfig::default();
        config.max_text_len = 4;
        let store = MilvusStore::new(&config).unwrap();
        let record = VectorRecord {
            id: "abc".into(),
            text: "longer text".into(),
            vector: vec![0.5, 0.5],
            metadata: json!({ "source": "a.txt" }),
        };
        let row = store.row(&record);
        assert_eq!(row["doc_id"], "abc");
        assert_eq!(row["text"], "long");
        assert_eq!(row["meta"], "{\"source\":\"a.txt\"}");
        assert_eq!(row["vec"], json!([0.5, 0.5]));
    }

    #[test]
    fn index_param_carries_type_and_metric() {
        let p = store().index_param();
        assert_eq!(p["metricType"], "IP");
        assert_eq!(p["params"]["index_type"], "IVF_FLAT");
        assert_eq!(p["params"]["nlist"], 1024);
    }

    #[test]
    fn not_found_messages_are_recognized() {
        assert!(is_not_found("collection not found[collection=kb]"));
        assert!(is_not_found("can't find collection"));
        assert!(!is_not_found("rate limited"));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut config = VectorStoreConfig::default();
        config.url = "localhost:19530".into();
        assert!(MilvusStore::new(&config).is_err());
    }
}
