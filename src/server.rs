//! HTTP surface for ingestion jobs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest/upload` | Multipart upload; starts a job and returns its id |
//! | `POST` | `/sync` | Ingest the configured source root (local callers only by default) |
//! | `GET`  | `/jobs` | Job summaries in creation order, without log lines |
//! | `GET`  | `/jobs/{id}?tail=N` | Full job record; `tail` limits the log lines returned |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "ok": false, "code": "bad_request", "detail": "No files provided" }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `payload_too_large` (413), `internal` (500). Job failures are never HTTP
//! errors; they show up as `status: "error"` on the polled record.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{Extensions, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vector_ingest_core::registry::RegistryError;

use crate::config::Config;
use crate::error::IngestError;
use crate::service::{IngestService, UploadRequest};
use crate::upload::UploadedFile;

/// Builds the router over a shared service.
pub fn router(service: Arc<IngestService>) -> Router {
    let max_upload = service.config().server.max_upload_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/ingest/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/sync", post(handle_sync))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

/// Starts the server and runs until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = Arc::new(IngestService::from_config(config)?);
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    code: String,
    detail: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            code,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            code: self.code.to_string(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(detail: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", detail)
}

fn internal(detail: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let detail = err.to_string();
        match err {
            IngestError::NoFiles
            | IngestError::InvalidOptions(_)
            | IngestError::NothingToSync(_)
            | IngestError::Embedder(_) => bad_request(detail),
            IngestError::Forbidden(_) => AppError::new(StatusCode::FORBIDDEN, "forbidden", detail),
            IngestError::CollectionNotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", detail)
            }
            IngestError::SourceRootMissing(_)
            | IngestError::Store(_)
            | IngestError::Io(_)
            | IngestError::Other(_) => {
                tracing::error!("request failed: {}", detail);
                internal(detail)
            }
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", "job not found")
            }
            other => internal(other.to_string()),
        }
    }
}

/// Peers other than loopback count as remote. Requests served without
/// connection info (in-process tests) are local.
fn is_remote(extensions: &Extensions) -> bool {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .is_some_and(|ConnectInfo(addr)| {
            let ip = addr.ip();
            !(ip.is_loopback() || ip.is_unspecified())
        })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest/upload ============

/// Accepts `true/false/1/0/yes/no/on/off`, case-insensitively.
fn parse_bool(field: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(bad_request(format!("{} must be a boolean, got '{}'", field, other))),
    }
}

fn parse_usize(field: &str, value: &str) -> Result<usize, AppError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| bad_request(format!("{} must be a non-negative integer, got '{}'", field, value)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.body_text())
    } else {
        bad_request(format!("Failed to read multipart body: {}", err.body_text()))
    }
}

/// Collects form fields and file parts, then layers the fields over the
/// configured defaults.
async fn read_upload(config: &Config, mut multipart: Multipart) -> Result<UploadRequest, AppError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(|s| s.to_string());
        if name == "files" || name == "file" || file_name.is_some() {
            let bytes = field.bytes().await.map_err(multipart_error)?;
            files.push(UploadedFile {
                name: file_name.unwrap_or_else(|| "file".to_string()),
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    let collection = fields
        .get("collection")
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    let mut options = config.ingest.options_for(&collection);
    for (name, value) in &fields {
        match name.as_str() {
            "model" => {
                let model = value.trim();
                options.model = (!model.is_empty()).then(|| model.to_string());
            }
            "chunk_size" => options.chunk_size = parse_usize(name, value)?,
            "overlap" => options.overlap = parse_usize(name, value)?,
            "normalize" => options.normalize = parse_bool(name, value)?,
            "ocr" => options.ocr = parse_bool(name, value)?,
            "language_detect" => options.language_detect = parse_bool(name, value)?,
            "dedupe" => options.dedupe = parse_bool(name, value)?,
            _ => {}
        }
    }
    Ok(UploadRequest { options, files })
}

async fn handle_upload(
    State(service): State<Arc<IngestService>>,
    extensions: Extensions,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let remote = is_remote(&extensions);
    let request = read_upload(service.config(), multipart).await?;
    let receipt = service.submit_upload(request, remote).await?;
    Ok(Json(json!({
        "ok": true,
        "job": {
            "id": receipt.job.id,
            "collection": receipt.job.collection,
            "saved": receipt.saved,
            "bytes": receipt.bytes,
            "dest": receipt.dest.display().to_string(),
        },
        "note": format!(
            "Upload saved. Ingest running in background. Poll /jobs/{} for progress.",
            receipt.job.id
        ),
    })))
}

// ============ POST /sync ============

async fn handle_sync(
    State(service): State<Arc<IngestService>>,
    extensions: Extensions,
) -> Result<Json<serde_json::Value>, AppError> {
    let jobs = service.submit_sync(is_remote(&extensions)).await?;
    let jobs: Vec<_> = jobs
        .iter()
        .map(|job| {
            json!({
                "id": job.id,
                "collection": job.collection,
                "files": job.files.len(),
            })
        })
        .collect();
    Ok(Json(json!({ "ok": true, "jobs": jobs })))
}

// ============ GET /jobs ============

async fn handle_list_jobs(State(service): State<Arc<IngestService>>) -> Json<serde_json::Value> {
    Json(json!({ "jobs": service.registry().summaries() }))
}

// ============ GET /jobs/{id} ============

#[derive(Deserialize)]
struct JobQuery {
    /// Last N log lines; 0 or absent returns every retained line.
    #[serde(default)]
    tail: usize,
}

async fn handle_get_job(
    State(service): State<Arc<IngestService>>,
    Path(id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = service.registry().get(&id)?;
    let logs = if query.tail == 0 {
        job.logs_tail.iter().cloned().collect::<Vec<_>>()
    } else {
        job.logs_tail.tail(query.tail)
    };
    let mut value = serde_json::to_value(&job).map_err(|e| internal(e.to_string()))?;
    value["logs_tail"] = json!(logs);
    Ok(Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn bools_accept_common_spellings() {
        for v in ["true", "1", "YES", "on"] {
            assert!(parse_bool("f", v).unwrap());
        }
        for v in ["false", "0", "no", "Off"] {
            assert!(!parse_bool("f", v).unwrap());
        }
        assert!(parse_bool("f", "maybe").is_err());
    }

    #[test]
    fn remote_detection() {
        let mut ext = Extensions::new();
        assert!(!is_remote(&ext));
        ext.insert(ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9)));
        assert!(!is_remote(&ext));
        ext.insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            9,
        )));
        assert!(is_remote(&ext));
    }

    #[test]
    fn ingest_errors_map_to_status_codes() {
        assert_eq!(AppError::from(IngestError::NoFiles).status, StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(IngestError::CollectionNotFound("kb".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(IngestError::Forbidden("no".into())).code,
            "forbidden"
        );
    }
}
