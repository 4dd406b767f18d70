//! Per-job scratch directories for uploaded files.
//!
//! Each upload lands in `workdir/<collection>/<YYYYmmddTHHMMSSZ>_<job>/`,
//! keeping the client's relative paths (folder uploads) after sanitizing
//! them so nothing escapes the job directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::pipeline::{BatchFile, FileBatch};

/// One uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// What was written to the scratch directory.
#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub batch: FileBatch,
    pub saved: usize,
    pub bytes: u64,
    pub dest: PathBuf,
}

/// Sanitizes a client-supplied relative path.
///
/// Backslashes become `/`, leading slashes and `.` components are dropped,
/// and a path with any `..` component collapses to its final component.
pub fn safe_relpath(name: &str) -> String {
    let name = name.replace('\\', "/");
    let name = name.trim_start_matches('/');
    let parts: Vec<&str> = name
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();

    let basename = name.rsplit('/').next().unwrap_or_default();
    let fallback = if basename.is_empty() || basename == "." || basename == ".." {
        "file".to_string()
    } else {
        basename.to_string()
    };

    if parts.is_empty() || parts.contains(&"..") {
        return fallback;
    }
    parts.join("/")
}

/// Sanitized, de-duplicated relative paths in upload order.
pub fn planned_paths(files: &[UploadedFile]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(files.len());
    for file in files {
        let rel = safe_relpath(&file.name);
        if !out.contains(&rel) {
            out.push(rel);
        }
    }
    out
}

/// `workdir/<collection>/<timestamp>_<job_id>`.
pub fn job_dir(workdir: &Path, collection: &str, job_id: &str, at: DateTime<Utc>) -> PathBuf {
    workdir
        .join(safe_relpath(collection))
        .join(format!("{}_{}", at.format("%Y%m%dT%H%M%SZ"), job_id))
}

/// Writes every file under `dest`. A later file with the same sanitized
/// path overwrites an earlier one.
pub async fn save_files(dest: &Path, files: &[UploadedFile]) -> std::io::Result<SavedUpload> {
    tokio::fs::create_dir_all(dest).await?;
    let mut batch_files: Vec<BatchFile> = Vec::with_capacity(files.len());
    let mut bytes = 0u64;
    for file in files {
        let relative = safe_relpath(&file.name);
        let path = dest.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &file.bytes).await?;
        bytes += file.bytes.len() as u64;
        if !batch_files.iter().any(|f| f.relative == relative) {
            batch_files.push(BatchFile { path, relative });
        }
    }
    tracing::debug!(dest = %dest.display(), files = batch_files.len(), bytes, "saved upload");
    Ok(SavedUpload {
        saved: files.len(),
        bytes,
        dest: dest.to_path_buf(),
        batch: FileBatch {
            root: dest.to_path_buf(),
            files: batch_files,
            scratch: true,
        },
    })
}
