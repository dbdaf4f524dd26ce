//! Error types for the marker-batch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`JobError`] — **Non-fatal**: a single file's conversion failed (rejected
//!   submit, transient poll failure, poll-attempt exhaustion) but all other
//!   files in the batch are unaffected. Captured into that job's `error`
//!   field inside [`crate::output::ConversionJob`] and never thrown past the
//!   scheduler boundary.
//!
//! * [`BatchError`] — **Fatal**: the batch as a whole produced nothing usable
//!   (zero completions, archive generation failed, invalid configuration).
//!   Returned as `Err(BatchError)` from [`crate::batch::convert_batch`].
//!
//! The separation lets callers decide their own tolerance: inspect per-job
//! errors for a post-run report, or just surface the batch-level summary.

use thiserror::Error;

/// A non-fatal error for a single file's conversion.
///
/// Stored in [`crate::output::ConversionJob::error`] (as its display string)
/// when a job ends `Failed` or `Cancelled`. One job's error never aborts
/// sibling jobs.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The backend rejected or malformed the initial submit (bad credentials,
    /// oversized file, malformed options).
    #[error("{backend}: submit failed: {detail}")]
    Submission {
        backend: &'static str,
        detail: String,
    },

    /// Transient transport or parse failure during a status check.
    #[error("{backend}: status check failed: {detail}")]
    Poll {
        backend: &'static str,
        detail: String,
    },

    /// The backend itself reported the job as errored.
    ///
    /// Retried like any other failure by the retry wrapper; kept as a
    /// distinct variant so permanent backend errors can be made terminal
    /// later with a single match arm.
    #[error("{backend}: conversion failed: {detail}")]
    Remote {
        backend: &'static str,
        detail: String,
    },

    /// Poll attempts exhausted without the backend reaching a terminal state.
    #[error("conversion timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    /// The backend reported `complete` but returned no markdown content.
    #[error("conversion completed but no content was received")]
    NoContent,

    /// The caller's cancellation signal was observed.
    #[error("conversion cancelled")]
    Cancelled,
}

impl JobError {
    /// True when this error came from the caller's cancellation signal.
    ///
    /// The retry wrapper uses this to mark the job `Cancelled` instead of
    /// `Failed`, and to stop retrying immediately.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

/// All fatal errors returned by [`crate::batch::convert_batch`].
///
/// Per-job failures use [`JobError`] and live inside the returned jobs rather
/// than propagating here.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The caller supplied no files.
    #[error("no files to convert")]
    EmptyBatch,

    /// Every job in the batch failed; there is nothing to package.
    ///
    /// `summary` concatenates the first few per-job error messages so
    /// callers have a ready-to-display string without walking every job.
    #[error("all {total} conversions failed: {summary}")]
    AllJobsFailed { total: usize, summary: String },

    /// The caller cancelled the batch before any conversion completed.
    ///
    /// Kept apart from [`BatchError::AllJobsFailed`] so a deliberate
    /// cancellation is never reported as a failure.
    #[error("batch cancelled before any of the {total} conversions completed")]
    Cancelled { total: usize },

    /// Archive generation failed after at least one conversion succeeded.
    ///
    /// The archive is the sole successful-output artifact, so this demotes
    /// the entire batch result to failure.
    #[error("failed to package results: {0}")]
    Packaging(String),

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
