//! Job record and its state vocabulary.
//!
//! A [`Job`] is the unit of trackable background work. Its `status` moves
//! `queued → running → done | error` and never regresses; while running,
//! its `stage` moves `upload_saved → ingesting → building_index → done`.
//! The derived `Ord` on [`JobStatus`] and [`Stage`] encodes these orders.
//!
//! Records are only mutated through [`JobRegistry`](crate::registry::JobRegistry);
//! everything handed out to readers is a cloned snapshot.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::models::IngestOptions;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// `done` and `error` are terminal; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

/// Pipeline position of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    UploadSaved,
    Ingesting,
    BuildingIndex,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::UploadSaved => "upload_saved",
            Stage::Ingesting => "ingesting",
            Stage::BuildingIndex => "building_index",
            Stage::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the job's file batch was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Upload,
    Sync,
}

/// Counts reported when a job finishes successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub files_received: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    /// Chunks produced by the chunker, before dedupe and filtering.
    pub chunks_total: usize,
    /// Chunks dropped because their fingerprint was already seen.
    pub chunks_deduped: usize,
    /// Chunks dropped for being shorter than `min_chars`.
    pub chunks_filtered: usize,
    pub chunks_written: usize,
    /// Entity count of the target collection after the run, when the store reports one.
    pub entities_after: Option<u64>,
}

/// Diagnostic recorded when a job fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub stage: Stage,
    pub message: String,
}

/// Fixed-capacity ring of the most recent log lines.
#[derive(Debug, Clone)]
pub struct LogTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    /// A zero capacity is bumped to one so the newest line is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    /// The last `n` lines in order; `n == 0` returns every retained line.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = if n == 0 {
            0
        } else {
            self.lines.len().saturating_sub(n)
        };
        self.lines.iter().skip(skip).cloned().collect()
    }
}

impl Serialize for LogTail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines.iter())
    }
}

/// Prefixes a log message with an ISO-8601 UTC timestamp.
pub fn stamp_line(at: DateTime<Utc>, message: &str) -> String {
    format!(
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    )
}

/// One tracked unit of ingestion work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub collection: String,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub progress: u8,
    pub logs_tail: LogTail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Relative paths of the files in this job's batch.
    pub files: Vec<String>,
    pub options: IngestOptions,
}

impl Job {
    /// Listing view without log lines.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            kind: self.kind,
            collection: self.collection.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            logs_len: self.logs_tail.len(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Compact job row for `GET /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub kind: JobKind,
    pub collection: String,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub progress: u8,
    pub logs_len: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
