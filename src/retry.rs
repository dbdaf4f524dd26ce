//! Retry wrapper: re-run a file's whole submit/poll sequence with backoff.
//!
//! ## Retry strategy
//!
//! Transient failures (overloaded backend, network blip, gateway hiccup) are
//! frequent under concurrent load. Exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`, capped) avoids thundering-herd: with
//! the defaults the wait sequence is 1 s → 2 s → 4 s. Cancellation is checked
//! before every attempt and races every backoff sleep, and always yields a
//! `Cancelled` job — never `Failed`.
//!
//! This function touches no shared state: it returns its own job record and
//! leaves aggregation to the scheduler, which keeps it independently
//! testable.

use crate::backend::{ConversionBackend, SourceFile};
use crate::client::{convert_file, sleep_or_cancel};
use crate::config::BatchConfig;
use crate::error::JobError;
use crate::output::{ConversionJob, JobStatus};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff before retry number `attempt` (1-based), capped.
fn backoff_delay(base_ms: u64, cap_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp).min(cap_ms))
}

/// Convert one file, retrying the full submit/poll sequence on failure.
///
/// Always returns a terminal [`ConversionJob`] — errors are captured into the
/// record, never propagated, so a single bad file cannot abort its siblings.
/// `attempts` counts every submit attempt, including the successful one.
pub async fn convert_with_retry(
    backend: &dyn ConversionBackend,
    index: usize,
    file: &SourceFile,
    config: &BatchConfig,
    cancel: &CancellationToken,
) -> ConversionJob {
    let mut job = ConversionJob::pending(index, &file.name);
    job.status = JobStatus::Processing;
    job.started_at = Some(SystemTime::now());
    let start = Instant::now();

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut last_err = JobError::Cancelled;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            last_err = JobError::Cancelled;
            break;
        }

        if attempt > 0 {
            let backoff = backoff_delay(
                config.retry_backoff_ms,
                config.retry_backoff_cap_ms,
                attempt,
            );
            warn!(
                "{}: retry {}/{} after {:?}",
                file.name, attempt, config.max_retries, backoff
            );
            if sleep_or_cancel(backoff, cancel).await.is_err() {
                last_err = JobError::Cancelled;
                break;
            }
        }

        job.attempts += 1;
        match convert_file(
            backend,
            file,
            &config.options,
            poll_interval,
            config.max_poll_attempts,
            cancel,
        )
        .await
        {
            Ok(markdown) => {
                job.status = JobStatus::Complete;
                job.markdown = Some(markdown);
                job.finished_at = Some(SystemTime::now());
                job.duration_ms = start.elapsed().as_millis() as u64;
                return job;
            }
            Err(e) if e.is_cancelled() => {
                last_err = e;
                break;
            }
            Err(e) => {
                warn!("{}: attempt {} failed: {}", file.name, attempt + 1, e);
                last_err = e;
            }
        }
    }

    job.status = if last_err.is_cancelled() {
        JobStatus::Cancelled
    } else {
        JobStatus::Failed
    };
    job.error = Some(last_err.to_string());
    job.finished_at = Some(SystemTime::now());
    job.duration_ms = start.elapsed().as_millis() as u64;
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PollResponse, PollStatus, SubmitReceipt};
    use crate::config::ConversionOptions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` submits, then completes on the first poll.
    struct FlakyBackend {
        failures: u32,
        submits: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                submits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ConversionBackend for FlakyBackend {
        async fn submit(
            &self,
            _file: &SourceFile,
            _options: &ConversionOptions,
        ) -> Result<SubmitReceipt, JobError> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(JobError::Submission {
                    backend: "mock",
                    detail: format!("transient failure {n}"),
                })
            } else {
                Ok(SubmitReceipt {
                    request_id: "r1".into(),
                    check_url: "mock://check/r1".into(),
                })
            }
        }

        async fn poll_once(&self, _check_url: &str) -> Result<PollResponse, JobError> {
            Ok(PollResponse {
                status: PollStatus::Complete,
                markdown: Some("# out".into()),
                progress: None,
                error: None,
            })
        }

        fn label(&self) -> &'static str {
            "mock"
        }

        fn default_concurrency(&self) -> usize {
            1
        }
    }

    fn fast_config(max_retries: u32) -> BatchConfig {
        BatchConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .retry_backoff_cap_ms(4)
            .poll_interval_ms(1)
            .build()
            .unwrap()
    }

    fn file() -> SourceFile {
        SourceFile::new("doc.pdf", b"%PDF-1.4".to_vec())
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let backend = FlakyBackend::new(2);
        let job = convert_with_retry(
            &backend,
            0,
            &file(),
            &fast_config(3),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.markdown.as_deref(), Some("# out"));
        // No attempts after success.
        assert_eq!(backend.submits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_keeps_last_error() {
        let backend = FlakyBackend::new(u32::MAX);
        let job = convert_with_retry(
            &backend,
            0,
            &file(),
            &fast_config(1),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        let err = job.error.expect("failed job carries its error");
        assert!(err.contains("transient failure 2"), "got: {err}");
        assert!(job.duration_ms < 60_000);
    }

    #[tokio::test]
    async fn cancellation_marks_cancelled_not_failed() {
        let backend = FlakyBackend::new(u32::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = convert_with_retry(&backend, 0, &file(), &fast_config(3), &cancel).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.attempts, 0);
        assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1000, 32_000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 32_000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 32_000, 6), Duration::from_millis(32_000));
        assert_eq!(backoff_delay(1000, 32_000, 60), Duration::from_millis(32_000));
    }
}
