//! Batch scheduler: run many conversions with bounded concurrency.
//!
//! ## Concurrency model
//!
//! Conversions run as plain futures inside a [`FuturesUnordered`] driven by
//! this function's own loop, not as spawned tasks. That gives us two things
//! the remote-service workload needs:
//!
//! 1. **A hard ceiling.** At most `max_concurrent` conversions are in flight;
//!    a replacement launches only when a slot frees up. The ceiling protects
//!    the backend (GPU memory on self-hosted deployments, rate limits on the
//!    paid API), not this process.
//! 2. **A single writer.** The [`BatchProgress`] snapshot is mutated only
//!    between awaits of this loop, so no lock is needed and every callback
//!    invocation observes the counter invariants documented on the type.
//!
//! Self-hosted deployments additionally want launches spaced out so several
//! GPU containers do not cold-start at once. The scheduler reserves a start
//! slot per launch and the launched future sleeps out its slot (racing
//! cancellation) before touching the network, so the scheduling loop itself
//! never blocks on a stagger.

use crate::archive::package_markdown;
use crate::backend::{ConversionBackend, SourceFile};
use crate::client::sleep_or_cancel;
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::output::{BatchOutput, BatchProgress, BatchStats, ConversionJob, JobStatus};
use crate::postprocess::clean_markdown;
use crate::retry::convert_with_retry;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Convert a batch of files and package the results into a ZIP archive.
///
/// Every file is driven through submit→poll→complete independently with
/// retries; one file's failure never aborts its siblings. The batch as a
/// whole fails only when nothing completed, when packaging failed, or when
/// the input was empty.
///
/// # Example
/// ```rust,no_run
/// use marker_batch::{convert_batch, BatchConfig, MarkerBackend, SourceFile};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MarkerBackend::new("sk-...");
/// let files = vec![SourceFile::new("report.pdf", std::fs::read("report.pdf")?)];
/// let output = convert_batch(&files, &backend, &BatchConfig::default()).await?;
/// std::fs::write("results.zip", &output.archive)?;
/// # Ok(())
/// # }
/// ```
pub async fn convert_batch(
    files: &[SourceFile],
    backend: &dyn ConversionBackend,
    config: &BatchConfig,
) -> Result<BatchOutput, BatchError> {
    if files.is_empty() {
        return Err(BatchError::EmptyBatch);
    }
    let total = files.len();
    let batch_start = Instant::now();

    let max_concurrent = config
        .max_concurrent
        .unwrap_or_else(|| backend.default_concurrency())
        .max(1);
    let stagger = config
        .launch_stagger_ms
        .map(Duration::from_millis)
        .or_else(|| backend.launch_stagger());

    info!(
        "starting batch: {} files via {} (concurrency {})",
        total,
        backend.label(),
        max_concurrent
    );

    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    let mut progress = BatchProgress::new(&names);
    let cb = config.progress_callback.as_deref();

    // Initial snapshot: every job a Pending placeholder.
    if let Some(cb) = cb {
        cb.on_batch_start(total);
        cb.on_progress(&progress);
    }

    let mut queue: VecDeque<usize> = (0..total).collect();
    let mut in_flight = FuturesUnordered::new();
    // Next reserved start slot when launches are staggered.
    let mut next_slot = Instant::now();

    loop {
        // Fill free slots. Once cancelled, nothing new launches; the queue
        // is drained after in-flight jobs settle.
        while in_flight.len() < max_concurrent && !config.cancel.is_cancelled() {
            let Some(index) = queue.pop_front() else { break };

            let wait = match stagger {
                Some(gap) => {
                    let now = Instant::now();
                    let wait = next_slot.saturating_duration_since(now);
                    next_slot = next_slot.max(now) + gap;
                    wait
                }
                None => Duration::ZERO,
            };

            progress.jobs[index].status = JobStatus::Processing;
            progress.in_progress += 1;
            if let Some(cb) = cb {
                cb.on_job_start(index, &files[index].name);
                cb.on_progress(&progress);
            }
            debug!("launching {} (slot wait {:?})", files[index].name, wait);

            let cancel = &config.cancel;
            in_flight.push(async move {
                if !wait.is_zero() {
                    // A cancelled slot wait falls through to the retry
                    // wrapper, whose first cancellation check makes the
                    // job terminal without any backend call.
                    let _ = sleep_or_cancel(wait, cancel).await;
                }
                convert_with_retry(backend, index, &files[index], config, cancel).await
            });
        }

        let Some(job) = in_flight.next().await else { break };
        settle(&mut progress, job, cb);
    }

    // Jobs still queued after cancellation never reached a backend.
    while let Some(index) = queue.pop_front() {
        let mut job = ConversionJob::pending(index, &files[index].name);
        job.status = JobStatus::Cancelled;
        job.error = Some("conversion cancelled".to_string());
        settle(&mut progress, job, cb);
    }

    info!(
        "batch settled: {} completed, {} failed, {} cancelled",
        progress.completed, progress.failed, progress.cancelled
    );

    if progress.completed == 0 {
        // A purely-cancelled batch is not a failure.
        if progress.failed == 0 && progress.cancelled > 0 {
            return Err(BatchError::Cancelled { total });
        }
        let summary = failure_summary(&progress.jobs);
        return Err(BatchError::AllJobsFailed { total, summary });
    }

    if config.clean_page_breaks {
        for job in &mut progress.jobs {
            if let Some(md) = job.markdown.take() {
                job.markdown = Some(clean_markdown(&md));
            }
        }
    }

    let archive = package_markdown(&progress.jobs, &config.filename_map)?;
    if let Some(cb) = cb {
        cb.on_batch_complete(total, progress.completed);
    }

    let stats = BatchStats {
        total,
        completed: progress.completed,
        failed: progress.failed,
        cancelled: progress.cancelled,
        total_duration_ms: batch_start.elapsed().as_millis() as u64,
    };
    Ok(BatchOutput {
        jobs: progress.jobs,
        archive,
        stats,
    })
}

/// Record a terminal job into the snapshot and notify the callback.
fn settle(
    progress: &mut BatchProgress,
    job: ConversionJob,
    cb: Option<&dyn crate::progress::BatchProgressCallback>,
) {
    // Queued jobs cancelled before launch were never counted in_progress.
    if progress.jobs[job.index].status == JobStatus::Processing {
        progress.in_progress -= 1;
    }
    match job.status {
        JobStatus::Complete => {
            progress.completed += 1;
            if let Some(cb) = cb {
                cb.on_job_complete(
                    job.index,
                    &job.file_name,
                    job.markdown.as_ref().map_or(0, String::len),
                );
            }
        }
        JobStatus::Cancelled => {
            progress.cancelled += 1;
            if let Some(cb) = cb {
                cb.on_job_error(
                    job.index,
                    &job.file_name,
                    job.error.clone().unwrap_or_default(),
                );
            }
        }
        _ => {
            progress.failed += 1;
            warn!(
                "{} failed after {} attempts: {}",
                job.file_name,
                job.attempts,
                job.error.as_deref().unwrap_or("unknown error")
            );
            if let Some(cb) = cb {
                cb.on_job_error(
                    job.index,
                    &job.file_name,
                    job.error.clone().unwrap_or_default(),
                );
            }
        }
    }
    let index = job.index;
    progress.jobs[index] = job;
    if let Some(cb) = cb {
        cb.on_progress(progress);
    }
}

/// First few per-job error messages, ready for display.
fn failure_summary(jobs: &[ConversionJob]) -> String {
    const SHOWN: usize = 3;
    let mut parts: Vec<String> = jobs
        .iter()
        .filter(|j| j.status != JobStatus::Complete)
        .take(SHOWN)
        .map(|j| {
            format!(
                "{}: {}",
                j.file_name,
                j.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    let omitted = jobs.len().saturating_sub(SHOWN);
    if omitted > 0 {
        parts.push(format!("… and {omitted} more"));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_truncates() {
        let jobs: Vec<ConversionJob> = (0..5)
            .map(|i| {
                let mut j = ConversionJob::pending(i, format!("f{i}.pdf"));
                j.status = JobStatus::Failed;
                j.error = Some("boom".into());
                j
            })
            .collect();
        let s = failure_summary(&jobs);
        assert!(s.contains("f0.pdf: boom"));
        assert!(s.contains("f2.pdf"));
        assert!(!s.contains("f3.pdf"));
        assert!(s.contains("2 more"));
    }

    #[test]
    fn settle_replaces_the_record_at_the_job_index() {
        let names = vec!["a.pdf".to_string(), "b.pdf".to_string()];
        let mut progress = BatchProgress::new(&names);
        progress.jobs[1].status = JobStatus::Processing;
        progress.in_progress = 1;

        let mut job = ConversionJob::pending(1, "b.pdf");
        job.status = JobStatus::Complete;
        job.markdown = Some("# md".into());
        settle(&mut progress, job, None);

        assert_eq!(progress.jobs[1].status, JobStatus::Complete);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.in_progress, 0);
        assert_eq!(progress.jobs[0].status, JobStatus::Pending);
    }

    #[test]
    fn failure_summary_single_error() {
        let mut j = ConversionJob::pending(0, "only.pdf");
        j.status = JobStatus::Failed;
        j.error = Some("timed out".into());
        let s = failure_summary(&[j]);
        assert_eq!(s, "only.pdf: timed out");
    }
}
