//! Foreground job progress reporting.
//!
//! `vingest ingest` and `vingest sync` run jobs in-process and poll the
//! registry like an HTTP client would, reporting each observed change.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::time::Duration;

use vector_ingest_core::job::{Job, JobStatus};
use vector_ingest_core::registry::JobRegistry;

/// How often [`watch_job`] polls the registry.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One observed state of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobProgressEvent {
    pub job_id: String,
    pub collection: String,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub progress: u8,
    /// Most recent log line, timestamp prefix included.
    pub last_log: Option<String>,
}

impl JobProgressEvent {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            collection: job.collection.clone(),
            status: job.status,
            stage: job.stage.map(|s| s.as_str().to_string()),
            progress: job.progress,
            last_log: job.logs_tail.iter().last().cloned(),
        }
    }
}

/// Reports job progress. Implementations write to stderr (human or JSON).
pub trait JobProgressReporter: Send + Sync {
    fn report(&self, event: &JobProgressEvent);
}

/// Human-friendly progress on stderr: "job 1a2b3c4d  kb  ingesting  45%  Embedded 64/120 chunks".
pub struct StderrProgress;

impl JobProgressReporter for StderrProgress {
    fn report(&self, event: &JobProgressEvent) {
        let stage = event.stage.as_deref().unwrap_or(event.status.as_str());
        let message = event
            .last_log
            .as_deref()
            .map(strip_stamp)
            .unwrap_or_default();
        let line = format!(
            "job {}  {}  {}  {:>3}%  {}\n",
            event.job_id, event.collection, stage, event.progress, message
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JobProgressReporter for JsonProgress {
    fn report(&self, event: &JobProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "job": event.job_id,
            "collection": event.collection,
            "status": event.status,
            "stage": event.stage,
            "progress": event.progress,
            "log": event.last_log,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl JobProgressReporter for NoProgress {
    fn report(&self, _event: &JobProgressEvent) {}
}

/// Drops the `[timestamp] ` prefix of a job log line.
fn strip_stamp(line: &str) -> &str {
    match line.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((_, message)) => message,
        None => line,
    }
}

/// Polls `id` until it is terminal, reporting every distinct state seen.
/// Returns the final snapshot, or `None` if the job does not exist.
pub async fn watch_job(
    registry: &JobRegistry,
    id: &str,
    reporter: &dyn JobProgressReporter,
) -> Option<Job> {
    let mut last: Option<JobProgressEvent> = None;
    loop {
        let job = registry.get(id).ok()?;
        let event = JobProgressEvent::from_job(&job);
        if last.as_ref() != Some(&event) {
            reporter.report(&event);
            last = Some(event);
        }
        if job.status.is_terminal() {
            return Some(job);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn JobProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
