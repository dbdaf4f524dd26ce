//! Output and progress types: per-job records, batch snapshots, final result.
//!
//! [`ConversionJob`] is one file's journey through the pipeline; it only ever
//! moves forward: `Pending → Processing → {Complete | Failed | Cancelled}`.
//! [`BatchProgress`] is the consistent point-in-time snapshot the scheduler
//! pushes to the caller's callback after every transition. [`BatchOutput`] is
//! what [`crate::batch::convert_batch`] returns on success.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle state of a single file's conversion.
///
/// Transitions are monotonic; there is no way out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, no backend call made yet.
    Pending,
    /// At least one submit attempt is underway.
    Processing,
    /// Markdown received.
    Complete,
    /// All retry attempts exhausted (or timed out).
    Failed,
    /// The caller's cancellation signal was observed before completion.
    Cancelled,
}

impl JobStatus {
    /// True for `Complete`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One file's record in the batch.
///
/// Jobs are index-stable: `index` is the file's position in the input slice,
/// and `BatchProgress::jobs[index]` always refers to the same file regardless
/// of completion order. Two inputs may share a `file_name`; identity is the
/// index, never the name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Position in the input file list.
    pub index: usize,
    /// Original filename, as supplied by the caller.
    pub file_name: String,
    pub status: JobStatus,
    /// Submit attempts made so far. Starts at 0, includes the successful
    /// attempt (if any), never exceeds `max_retries + 1`.
    pub attempts: u32,
    /// Converted Markdown. `Some` only when `status == Complete`.
    pub markdown: Option<String>,
    /// Human-readable error. `Some` only when `status == Failed | Cancelled`.
    pub error: Option<String>,
    /// Wall-clock start of the first attempt.
    pub started_at: Option<SystemTime>,
    /// Wall-clock time the job reached a terminal state.
    pub finished_at: Option<SystemTime>,
    /// `finished_at - started_at`; only meaningful once terminal.
    pub duration_ms: u64,
}

impl ConversionJob {
    /// A fresh `Pending` placeholder for the file at `index`.
    pub fn pending(index: usize, file_name: impl Into<String>) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            status: JobStatus::Pending,
            attempts: 0,
            markdown: None,
            error: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }
}

/// A consistent snapshot of the whole batch, pushed to the caller's
/// [`crate::progress::BatchProgressCallback`] after every state transition.
///
/// Invariants, held at every callback invocation:
/// * `completed + failed + cancelled + in_progress + pending() == total`
/// * `completed + failed + cancelled` is monotonically non-decreasing
/// * `in_progress` never exceeds the configured concurrency
/// * `jobs.len() == total` from the moment the batch starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub in_progress: usize,
    /// All job snapshots, in input order (`jobs[i].index == i`).
    pub jobs: Vec<ConversionJob>,
}

impl BatchProgress {
    /// A new snapshot with every job a `Pending` placeholder.
    pub fn new(file_names: &[String]) -> Self {
        Self {
            total: file_names.len(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            in_progress: 0,
            jobs: file_names
                .iter()
                .enumerate()
                .map(|(i, name)| ConversionJob::pending(i, name))
                .collect(),
        }
    }

    /// Jobs not yet launched.
    pub fn pending(&self) -> usize {
        self.total - self.completed - self.failed - self.cancelled - self.in_progress
    }

    /// Jobs in a terminal state.
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// True once every job is terminal.
    pub fn is_done(&self) -> bool {
        self.settled() == self.total
    }
}

/// Aggregate counters for a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Wall-clock duration of the whole batch, including packaging.
    pub total_duration_ms: u64,
}

/// The result of a successful batch (at least one conversion completed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// All job records, in input order.
    pub jobs: Vec<ConversionJob>,
    /// ZIP archive containing one `.md` entry per completed job.
    #[serde(skip)]
    pub archive: Vec<u8>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Jobs that reached `Complete`.
    pub fn completed(&self) -> impl Iterator<Item = &ConversionJob> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Complete)
    }

    /// Jobs that reached `Failed`.
    pub fn failed(&self) -> impl Iterator<Item = &ConversionJob> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed)
    }
}
