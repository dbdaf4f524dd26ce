//! Single-file conversion: one submit, then poll to a terminal state.
//!
//! This is one attempt in retry terms — [`crate::retry`] wraps the whole
//! call, not individual polls, so a transient poll failure costs the attempt
//! and re-submits rather than spinning on a dead check URL.
//!
//! ## Cancellation
//!
//! The caller's token is observed cooperatively at fixed checkpoints: before
//! the submit, and around every poll sleep. An HTTP call already in flight
//! runs to completion before the next checkpoint is seen — a forced task
//! kill could leave a job submitted but untracked on the backend.

use crate::backend::{ConversionBackend, PollStatus, SourceFile};
use crate::config::ConversionOptions;
use crate::error::JobError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Sleep that loses the race against cancellation.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Convert one file: submit, then poll every `poll_interval` until the
/// backend reports a terminal state, up to `max_polls` checks.
///
/// # Errors
/// * [`JobError::Submission`] — the backend rejected the upload.
/// * [`JobError::Poll`] — transport/parse failure on a status check.
/// * [`JobError::Remote`] — the backend reported the job as errored.
/// * [`JobError::NoContent`] — `complete` arrived without markdown.
/// * [`JobError::Timeout`] — `max_polls` checks without a terminal state.
/// * [`JobError::Cancelled`] — the cancellation token fired at a checkpoint.
pub async fn convert_file(
    backend: &dyn ConversionBackend,
    file: &SourceFile,
    options: &ConversionOptions,
    poll_interval: Duration,
    max_polls: u32,
    cancel: &CancellationToken,
) -> Result<String, JobError> {
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let receipt = backend.submit(file, options).await?;
    debug!(
        "{}: submitted {} (request {})",
        backend.label(),
        file.name,
        receipt.request_id
    );

    // Some deployments register the job asynchronously; polling too early
    // would read an id that does not exist yet.
    if let Some(delay) = backend.initial_delay() {
        sleep_or_cancel(delay, cancel).await?;
    }

    for attempt in 1..=max_polls {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let response = backend.poll_once(&receipt.check_url).await?;
        trace!(
            "{}: poll {}/{} for {} -> {:?}",
            backend.label(),
            attempt,
            max_polls,
            file.name,
            response.status
        );

        match response.status {
            PollStatus::Complete => {
                return match response.markdown {
                    Some(markdown) if !markdown.is_empty() => Ok(markdown),
                    _ => Err(JobError::NoContent),
                };
            }
            PollStatus::Error => {
                return Err(JobError::Remote {
                    backend: backend.label(),
                    detail: response
                        .error
                        .unwrap_or_else(|| "backend reported an unspecified error".into()),
                });
            }
            PollStatus::Pending | PollStatus::Processing => {
                sleep_or_cancel(poll_interval, cancel).await?;
            }
        }
    }

    Err(JobError::Timeout {
        attempts: max_polls,
    })
}
