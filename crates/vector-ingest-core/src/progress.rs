//! Progress estimation for running jobs.
//!
//! The pipeline knows real unit counts for some phases (files extracted,
//! chunks embedded, records written) and nothing for others (the index
//! build). [`ProgressEstimator`] turns those counters into a single 0–99
//! percentage; swapping the estimator changes the policy without touching
//! the job state machine.
//!
//! The default [`WeightedEstimator`] blends the three completed-unit
//! fractions with fixed weights:
//!
//! ```text
//! progress = 40 × files_done/files_total
//!          + 45 × chunks_embedded/chunks_total
//!          + 10 × records_written/records_total
//! ```
//!
//! Each stage also sets a floor so a phase with zero units (for example a
//! batch that produced no chunks) still moves the bar forward. The opaque
//! index build uses [`ProgressEstimator::ramp`], which closes a quarter of
//! the remaining distance per tick and never reaches 100.

use crate::job::Stage;
use crate::registry::MAX_ACTIVE_PROGRESS;

/// Completed-unit counters maintained by the pipeline executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub files_total: usize,
    /// Files attempted so far, whether extraction succeeded or not.
    pub files_done: usize,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub records_total: usize,
    pub records_written: usize,
}

/// Maps pipeline counters to a client-facing percentage.
pub trait ProgressEstimator: Send + Sync {
    /// Progress for the given stage and counters, in `0..=99`.
    fn estimate(&self, stage: Stage, counters: &PipelineCounters) -> u8;

    /// Next value of a synthetic ramp for phases with no unit counts.
    fn ramp(&self, current: u8) -> u8;
}

/// Fixed-weight blend of completed-unit fractions.
#[derive(Debug, Clone, Copy)]
pub struct WeightedEstimator {
    pub files_weight: f64,
    pub chunks_weight: f64,
    pub records_weight: f64,
}

impl Default for WeightedEstimator {
    fn default() -> Self {
        Self {
            files_weight: 40.0,
            chunks_weight: 45.0,
            records_weight: 10.0,
        }
    }
}

impl WeightedEstimator {
    fn floor(&self, stage: Stage) -> f64 {
        match stage {
            Stage::UploadSaved => 0.0,
            Stage::Ingesting => self.files_weight,
            Stage::BuildingIndex => self.files_weight + self.chunks_weight,
            Stage::Done => self.files_weight + self.chunks_weight + self.records_weight,
        }
    }
}

fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done.min(total) as f64) / (total as f64)
    }
}

impl ProgressEstimator for WeightedEstimator {
    fn estimate(&self, stage: Stage, c: &PipelineCounters) -> u8 {
        let blended = self.files_weight * fraction(c.files_done, c.files_total)
            + self.chunks_weight * fraction(c.chunks_embedded, c.chunks_total)
            + self.records_weight * fraction(c.records_written, c.records_total);
        let value = blended.max(self.floor(stage)).round();
        (value as u8).min(MAX_ACTIVE_PROGRESS)
    }

    fn ramp(&self, current: u8) -> u8 {
        let remaining = MAX_ACTIVE_PROGRESS.saturating_sub(current);
        current.saturating_add(remaining.div_ceil(4)).min(MAX_ACTIVE_PROGRESS)
    }
}
