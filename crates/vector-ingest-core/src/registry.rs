//! Concurrency-safe store of job records.
//!
//! [`JobRegistry`] is the single source of truth for job status, stage,
//! progress, and logs. Every mutation takes the write lock once and applies
//! all of its field changes before releasing it, so readers observe either
//! the record before the update or after it, never a mix.
//!
//! The registry is an ordinary value shared through `Arc`; the HTTP layer
//! and the pipeline executor both receive it by injection.
//!
//! # Rules enforced
//!
//! | Rule | Effect |
//! |------|--------|
//! | Status never regresses | Mutating a terminal job returns [`RegistryError::Terminal`] |
//! | Stage never regresses | `advance` to an earlier stage returns [`RegistryError::StageRegression`] |
//! | Progress is monotonic | Lower targets are ignored; values are capped at 99 until terminal |
//! | Terminal pins progress | `complete` and `fail` set progress to 100 |
//! | Bounded logs | Each job keeps at most `log_capacity` lines |

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::job::{
    stamp_line, Job, JobFailure, JobKind, JobResult, JobStatus, JobSummary, LogTail, Stage,
};
use crate::models::IngestOptions;

/// Highest progress value a non-terminal job can report.
pub const MAX_ACTIVE_PROGRESS: u8 = 99;

/// Default number of log lines retained per job.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {id} is already {}", status.as_str())]
    Terminal { id: String, status: JobStatus },
    #[error("job {id} cannot move from stage {current} back to {requested}")]
    StageRegression {
        id: String,
        current: Stage,
        requested: Stage,
    },
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    order: Vec<String>,
}

/// In-memory keyed job store with insertion-ordered listing.
pub struct JobRegistry {
    inner: RwLock<Inner>,
    log_capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl JobRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    /// Creates a `queued` job with no stage and zero progress.
    pub fn create(&self, kind: JobKind, options: IngestOptions, files: Vec<String>) -> Job {
        let now = Utc::now();
        let mut inner = self.inner.write();

        let id = loop {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !inner.jobs.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut logs_tail = LogTail::new(self.log_capacity);
        logs_tail.push(stamp_line(
            now,
            &format!("Job created for collection={}", options.collection),
        ));

        let job = Job {
            id: id.clone(),
            kind,
            collection: options.collection.clone(),
            status: JobStatus::Queued,
            stage: None,
            progress: 0,
            logs_tail,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            files,
            options,
        };

        inner.order.push(id.clone());
        inner.jobs.insert(id.clone(), job.clone());
        tracing::info!(job = %id, collection = %job.collection, "job created");
        job
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &str) -> Result<Job, RegistryError> {
        self.inner
            .read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshots of every job in creation order.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// Listing rows in creation order, without log lines.
    pub fn summaries(&self) -> Vec<JobSummary> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).map(Job::summary))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves a job to `stage`, optionally raising progress and appending a
    /// log line. A queued job becomes `running` on its first advance.
    ///
    /// `progress` is an absolute target; it is clamped to the active range
    /// and ignored when lower than the current value.
    pub fn advance(
        &self,
        id: &str,
        stage: Stage,
        progress: Option<u8>,
        log_line: Option<&str>,
    ) -> Result<Job, RegistryError> {
        self.mutate(id, |job| {
            ensure_active(job)?;
            if let Some(current) = job.stage {
                if stage < current {
                    return Err(RegistryError::StageRegression {
                        id: job.id.clone(),
                        current,
                        requested: stage,
                    });
                }
            }
            let now = Utc::now();
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
            }
            job.stage = Some(stage);
            if let Some(target) = progress {
                job.progress = job.progress.max(target.min(MAX_ACTIVE_PROGRESS));
            }
            if let Some(line) = log_line {
                tracing::debug!(job = %job.id, "{}", line);
                job.logs_tail.push(stamp_line(now, line));
            }
            Ok(())
        })
    }

    /// Appends a log line without changing stage or progress. Terminal jobs
    /// take no further lines.
    pub fn log(&self, id: &str, line: &str) -> Result<(), RegistryError> {
        self.mutate(id, |job| {
            ensure_active(job)?;
            tracing::debug!(job = %job.id, "{}", line);
            job.logs_tail.push(stamp_line(Utc::now(), line));
            Ok(())
        })
        .map(|_| ())
    }

    /// Marks a job `done` with its result summary.
    pub fn complete(&self, id: &str, result: JobResult) -> Result<Job, RegistryError> {
        self.mutate(id, |job| {
            ensure_active(job)?;
            let now = Utc::now();
            job.status = JobStatus::Done;
            job.stage = Some(Stage::Done);
            job.progress = 100;
            job.ended_at = Some(now);
            job.started_at.get_or_insert(now);
            job.logs_tail.push(stamp_line(now, "Job complete"));
            job.result = Some(result);
            Ok(())
        })
        .inspect(|job| {
            tracing::info!(job = %job.id, collection = %job.collection, "job complete");
        })
    }

    /// Marks a job `error`, recording the stage the failure happened in.
    /// The job's own `stage` moves forward to the failing stage, never back.
    pub fn fail(&self, id: &str, stage: Stage, message: &str) -> Result<Job, RegistryError> {
        self.mutate(id, |job| {
            ensure_active(job)?;
            let now = Utc::now();
            job.status = JobStatus::Error;
            job.stage = Some(job.stage.map_or(stage, |current| current.max(stage)));
            job.progress = 100;
            job.ended_at = Some(now);
            job.logs_tail.push(stamp_line(now, &format!("ERROR: {}", message)));
            job.error = Some(JobFailure {
                stage,
                message: message.to_string(),
            });
            Ok(())
        })
        .inspect(|job| {
            tracing::warn!(job = %job.id, stage = %stage, "job failed: {}", message);
        })
    }

    fn mutate<F>(&self, id: &str, f: F) -> Result<Job, RegistryError>
    where
        F: FnOnce(&mut Job) -> Result<(), RegistryError>,
    {
        let mut inner = self.inner.write();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        // Apply to a copy so a rejected update leaves the stored record untouched.
        let mut next = job.clone();
        f(&mut next)?;
        *job = next;
        Ok(job.clone())
    }
}

fn ensure_active(job: &Job) -> Result<(), RegistryError> {
    if job.status.is_terminal() {
        return Err(RegistryError::Terminal {
            id: job.id.clone(),
            status: job.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> JobRegistry {
        JobRegistry::new(5)
    }

    fn new_job(reg: &JobRegistry) -> Job {
        reg.create(JobKind::Upload, IngestOptions::new("docs"), vec!["a.txt".into()])
    }

    #[test]
    fn created_job_is_queued() {
        let reg = registry();
        let job = new_job(&reg);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, None);
        assert_eq!(job.progress, 0);
        assert_eq!(job.id.len(), 8);
        assert_eq!(reg.get(&job.id).unwrap().id, job.id);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let reg = registry();
        assert_eq!(
            reg.get("nope").unwrap_err(),
            RegistryError::NotFound("nope".into())
        );
    }

    #[test]
    fn list_preserves_insertion_order() {
        let reg = registry();
        let ids: Vec<String> = (0..5).map(|_| new_job(&reg).id).collect();
        let listed: Vec<String> = reg.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, listed);
        let summarized: Vec<String> = reg.summaries().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, summarized);
    }

    #[test]
    fn first_advance_starts_the_job() {
        let reg = registry();
        let job = new_job(&reg);
        let job = reg
            .advance(&job.id, Stage::UploadSaved, Some(5), Some("received 1 file(s)"))
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.stage, Some(Stage::UploadSaved));
        assert_eq!(job.progress, 5);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn stage_regression_is_rejected_and_leaves_record_intact() {
        let reg = registry();
        let job = new_job(&reg);
        reg.advance(&job.id, Stage::Ingesting, Some(50), None).unwrap();
        let err = reg
            .advance(&job.id, Stage::UploadSaved, Some(60), Some("late"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::StageRegression { .. }));
        let job = reg.get(&job.id).unwrap();
        assert_eq!(job.stage, Some(Stage::Ingesting));
        assert_eq!(job.progress, 50);
    }

    #[test]
    fn progress_never_decreases_and_stays_below_100_while_running() {
        let reg = registry();
        let job = new_job(&reg);
        reg.advance(&job.id, Stage::UploadSaved, Some(40), None).unwrap();
        let job = reg.advance(&job.id, Stage::UploadSaved, Some(10), None).unwrap();
        assert_eq!(job.progress, 40);
        let job = reg.advance(&job.id, Stage::Ingesting, Some(250), None).unwrap();
        assert_eq!(job.progress, MAX_ACTIVE_PROGRESS);
    }

    #[test]
    fn complete_pins_progress_and_is_terminal() {
        let reg = registry();
        let job = new_job(&reg);
        reg.advance(&job.id, Stage::BuildingIndex, Some(90), None).unwrap();
        let done = reg
            .complete(
                &job.id,
                JobResult {
                    files_processed: 1,
                    chunks_written: 3,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.stage, Some(Stage::Done));
        assert_eq!(done.progress, 100);
        assert!(done.ended_at.is_some());

        let err = reg.advance(&job.id, Stage::Done, None, None).unwrap_err();
        assert!(matches!(err, RegistryError::Terminal { .. }));
        assert!(reg.fail(&job.id, Stage::Done, "late").is_err());
    }

    #[test]
    fn fail_records_stage_and_message() {
        let reg = registry();
        let job = new_job(&reg);
        reg.advance(&job.id, Stage::Ingesting, Some(45), None).unwrap();
        let failed = reg.fail(&job.id, Stage::Ingesting, "dimension mismatch").unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.progress, 100);
        assert_eq!(failed.stage, Some(Stage::Ingesting));
        let err = failed.error.unwrap();
        assert_eq!(err.stage, Stage::Ingesting);
        assert_eq!(err.message, "dimension mismatch");
        assert!(failed.result.is_none());
        assert!(failed
            .logs_tail
            .iter()
            .last()
            .unwrap()
            .ends_with("ERROR: dimension mismatch"));
    }

    #[test]
    fn failing_at_a_later_stage_moves_stage_forward() {
        let reg = registry();
        let job = new_job(&reg);
        reg.advance(&job.id, Stage::UploadSaved, Some(30), None).unwrap();
        let failed = reg.fail(&job.id, Stage::Ingesting, "no embedder").unwrap();
        assert_eq!(failed.stage, Some(Stage::Ingesting));
        assert_eq!(failed.error.unwrap().stage, Stage::Ingesting);
    }

    #[test]
    fn terminal_jobs_take_no_more_log_lines() {
        let reg = registry();
        let job = new_job(&reg);
        reg.log(&job.id, "saved").unwrap();
        reg.complete(&job.id, JobResult::default()).unwrap();
        assert!(matches!(
            reg.log(&job.id, "late"),
            Err(RegistryError::Terminal { .. })
        ));
        let job = reg.get(&job.id).unwrap();
        assert!(job.logs_tail.iter().last().unwrap().ends_with("Job complete"));
    }

    #[test]
    fn logs_are_bounded_and_keep_last_line() {
        let reg = registry();
        let job = new_job(&reg);
        for i in 0..50 {
            reg.log(&job.id, &format!("line {}", i)).unwrap();
            let snap = reg.get(&job.id).unwrap();
            assert!(snap.logs_tail.len() <= reg.log_capacity());
            assert!(snap
                .logs_tail
                .iter()
                .last()
                .unwrap()
                .ends_with(&format!("line {}", i)));
        }
    }

    #[test]
    fn concurrent_writers_and_readers_see_consistent_records() {
        let reg = Arc::new(JobRegistry::new(16));
        let ids: Vec<String> = (0..4).map(|_| new_job(&reg).id).collect();

        let writers: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    for p in 0..=99u8 {
                        let stage = if p < 50 { Stage::UploadSaved } else { Stage::Ingesting };
                        reg.advance(&id, stage, Some(p), Some("tick")).unwrap();
                    }
                    reg.complete(&id, JobResult::default()).unwrap();
                })
            })
            .collect();

        let reader = {
            let reg = Arc::clone(&reg);
            let ids = ids.clone();
            std::thread::spawn(move || {
                let mut last: HashMap<String, (JobStatus, u8)> = HashMap::new();
                for _ in 0..500 {
                    for id in &ids {
                        let job = reg.get(id).unwrap();
                        assert_eq!(&job.id, id);
                        if let Some((status, progress)) = last.get(id) {
                            assert!(job.status >= *status);
                            assert!(job.progress >= *progress);
                        }
                        assert_eq!(job.status.is_terminal(), job.progress == 100);
                        last.insert(id.clone(), (job.status, job.progress));
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        for id in &ids {
            let job = reg.get(id).unwrap();
            assert_eq!(job.status, JobStatus::Done);
            assert_eq!(job.progress, 100);
        }
    }
}
