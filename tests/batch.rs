//! End-to-end batch tests against a scripted backend.
//!
//! No network: `MockBackend` implements the submit/poll contract in memory
//! and records how it was driven (total submits, peak in-flight jobs), which
//! is enough to exercise the whole scheduler → retry → poll → package path.

use async_trait::async_trait;
use marker_batch::{
    convert_batch, BatchConfig, BatchError, BatchProgress, BatchProgressCallback,
    ConversionBackend, ConversionOptions, JobError, JobStatus, PollResponse, PollStatus,
    SourceFile, SubmitReceipt,
};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

// ── Scripted backend ─────────────────────────────────────────────────────

/// In-memory backend: jobs complete after a fixed number of polls, files
/// whose names start with `fail-` are rejected at submit, and per-name
/// transient-failure budgets simulate a recovering service.
struct MockBackend {
    markdown: String,
    polls_until_complete: u32,
    /// Remaining submit failures per file name.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// check_url → polls remaining before `complete`.
    pending: Mutex<HashMap<String, u32>>,
    next_id: AtomicUsize,
    submits: AtomicUsize,
    submit_times: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockBackend {
    fn new(markdown: &str, polls_until_complete: u32) -> Self {
        Self {
            markdown: markdown.to_string(),
            polls_until_complete,
            transient_failures: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            submit_times: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// The next `count` submits of `name` fail with a transient error.
    fn fail_submits(self, name: &str, count: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
        self
    }
}

#[async_trait]
impl ConversionBackend for MockBackend {
    async fn submit(
        &self,
        file: &SourceFile,
        _options: &ConversionOptions,
    ) -> Result<SubmitReceipt, JobError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.submit_times.lock().unwrap().push(Instant::now());

        if file.name.starts_with("fail-") {
            return Err(JobError::Submission {
                backend: "mock",
                detail: format!("{} is always rejected", file.name),
            });
        }
        if let Some(remaining) = self.transient_failures.lock().unwrap().get_mut(&file.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(JobError::Submission {
                    backend: "mock",
                    detail: "service briefly unavailable".into(),
                });
            }
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let check_url = format!("mock://check/{id}");
        self.pending
            .lock()
            .unwrap()
            .insert(check_url.clone(), self.polls_until_complete);
        Ok(SubmitReceipt {
            request_id: id.to_string(),
            check_url,
        })
    }

    async fn poll_once(&self, check_url: &str) -> Result<PollResponse, JobError> {
        let mut pending = self.pending.lock().unwrap();
        let remaining = pending.get_mut(check_url).ok_or(JobError::Poll {
            backend: "mock",
            detail: format!("unknown check url {check_url}"),
        })?;

        if *remaining == 0 {
            pending.remove(check_url);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(PollResponse {
                status: PollStatus::Complete,
                markdown: Some(self.markdown.clone()),
                progress: Some(1.0),
                error: None,
            })
        } else {
            *remaining -= 1;
            Ok(PollResponse {
                status: PollStatus::Processing,
                markdown: None,
                progress: None,
                error: None,
            })
        }
    }

    fn label(&self) -> &'static str {
        "mock"
    }

    fn default_concurrency(&self) -> usize {
        3
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn pdf(name: &str) -> SourceFile {
    SourceFile::new(name, b"%PDF-1.4 test".to_vec())
}

fn fast_config() -> BatchConfig {
    BatchConfig::builder()
        .retry_backoff_ms(1)
        .retry_backoff_cap_ms(2)
        .poll_interval_ms(1)
        .build()
        .unwrap()
}

fn archive_entries(archive: &[u8]) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).expect("valid zip");
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

fn archive_entry_content(archive: &[u8], name: &str) -> String {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).expect("valid zip");
    let mut content = String::new();
    zip.by_name(name)
        .expect("entry exists")
        .read_to_string(&mut content)
        .expect("read entry");
    content
}

/// Records every snapshot pushed to the callback.
#[derive(Default)]
struct SnapshotRecorder {
    snapshots: Mutex<Vec<BatchProgress>>,
}

impl BatchProgressCallback for SnapshotRecorder {
    fn on_progress(&self, progress: &BatchProgress) {
        self.snapshots.lock().unwrap().push(progress.clone());
    }
}

/// Fires the cancellation token as soon as the first job completes.
struct CancelOnFirstComplete {
    cancel: CancellationToken,
}

impl BatchProgressCallback for CancelOnFirstComplete {
    fn on_job_complete(&self, _index: usize, _file_name: &str, _markdown_len: usize) {
        self.cancel.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_file_batch_produces_archive() {
    let backend = MockBackend::new("# Report\n\nText.\n", 2);
    let files = vec![pdf("report.pdf")];

    let output = convert_batch(&files, &backend, &fast_config())
        .await
        .expect("batch succeeds");

    assert_eq!(output.stats.completed, 1);
    assert_eq!(output.stats.failed, 0);
    assert_eq!(output.jobs[0].status, JobStatus::Complete);
    assert_eq!(output.jobs[0].attempts, 1);
    assert_eq!(archive_entries(&output.archive), vec!["report.md"]);
    assert_eq!(
        archive_entry_content(&output.archive, "report.md"),
        "# Report\n\nText.\n"
    );
}

#[tokio::test]
async fn all_failures_yield_batch_error() {
    let backend = MockBackend::new("unused", 0);
    let files = vec![pdf("fail-a.pdf"), pdf("fail-b.pdf"), pdf("fail-c.pdf")];
    let config = BatchConfig::builder()
        .max_retries(0)
        .poll_interval_ms(1)
        .build()
        .unwrap();

    let err = convert_batch(&files, &backend, &config)
        .await
        .expect_err("nothing completed");

    match err {
        BatchError::AllJobsFailed { total, summary } => {
            assert_eq!(total, 3);
            assert!(summary.contains("fail-a.pdf"), "got: {summary}");
        }
        other => panic!("unexpected error: {other}"),
    }
    // One submit per file, no retries.
    assert_eq!(backend.submits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn partial_failure_still_packages_completed_jobs() {
    let backend = MockBackend::new("content\n", 1);
    let files = vec![pdf("good.pdf"), pdf("fail-bad.pdf")];
    let config = BatchConfig::builder()
        .max_retries(1)
        .retry_backoff_ms(1)
        .poll_interval_ms(1)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("one completion is enough");

    assert_eq!(output.stats.completed, 1);
    assert_eq!(output.stats.failed, 1);
    assert_eq!(output.jobs[1].status, JobStatus::Failed);
    assert_eq!(output.jobs[1].attempts, 2);
    assert!(output.jobs[1]
        .error
        .as_deref()
        .unwrap()
        .contains("always rejected"));
    assert_eq!(archive_entries(&output.archive), vec!["good.md"]);
}

#[tokio::test]
async fn concurrency_ceiling_is_never_exceeded() {
    let backend = MockBackend::new("md\n", 3);
    let files: Vec<SourceFile> = (0..8).map(|i| pdf(&format!("f{i}.pdf"))).collect();
    let config = BatchConfig::builder()
        .max_concurrent(2)
        .poll_interval_ms(1)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");

    assert_eq!(output.stats.completed, 8);
    assert!(
        backend.peak_in_flight.load(Ordering::SeqCst) <= 2,
        "peak in-flight {} exceeded the configured limit",
        backend.peak_in_flight.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn limit_of_one_runs_sequentially() {
    let backend = MockBackend::new("md\n", 2);
    let files = vec![pdf("a.pdf"), pdf("b.pdf")];
    let config = BatchConfig::builder()
        .max_concurrent(1)
        .poll_interval_ms(1)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");

    assert_eq!(output.stats.completed, 2);
    assert_eq!(backend.peak_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pre_cancelled_batch_makes_no_backend_calls() {
    let backend = MockBackend::new("md\n", 0);
    let files = vec![pdf("a.pdf"), pdf("b.pdf")];
    let cancel = CancellationToken::new();
    cancel.cancel();
    let config = BatchConfig::builder()
        .cancel_token(cancel)
        .poll_interval_ms(1)
        .build()
        .unwrap();

    let err = convert_batch(&files, &backend, &config)
        .await
        .expect_err("nothing completed");

    assert!(matches!(err, BatchError::Cancelled { total: 2 }));
    assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mid_batch_cancellation_winds_down_without_new_launches() {
    let backend = MockBackend::new("md\n", 1);
    let files = vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")];
    let cancel = CancellationToken::new();
    let config = BatchConfig::builder()
        .max_concurrent(1)
        .poll_interval_ms(1)
        .cancel_token(cancel.clone())
        .progress_callback(Arc::new(CancelOnFirstComplete { cancel }))
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("the first completion still packages");

    assert_eq!(output.stats.completed, 1);
    assert_eq!(output.stats.cancelled, 2);
    assert_eq!(output.jobs[0].status, JobStatus::Complete);
    assert_eq!(output.jobs[1].status, JobStatus::Cancelled);
    assert_eq!(output.jobs[2].status, JobStatus::Cancelled);
    // Still-queued jobs never reached the backend.
    assert_eq!(backend.submits.load(Ordering::SeqCst), 1);
    assert_eq!(output.jobs[1].attempts, 0);
    assert_eq!(archive_entries(&output.archive), vec!["a.md"]);
}

#[tokio::test]
async fn staggered_launches_are_spaced_apart() {
    let backend = MockBackend::new("md\n", 0);
    let files = vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")];
    let config = BatchConfig::builder()
        .max_concurrent(3)
        .poll_interval_ms(1)
        .launch_stagger_ms(50)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");
    assert_eq!(output.stats.completed, 3);

    let mut times = backend.submit_times.lock().unwrap().clone();
    times.sort();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        // Small margin below the 50 ms gap for scheduling jitter on the
        // unstaggered first launch.
        assert!(
            gap >= Duration::from_millis(45),
            "launch gap {gap:?} below the configured stagger"
        );
    }
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let backend = MockBackend::new("eventually\n", 1).fail_submits("flaky.pdf", 2);
    let files = vec![pdf("flaky.pdf")];

    let output = convert_batch(&files, &backend, &fast_config())
        .await
        .expect("third attempt succeeds");

    assert_eq!(output.jobs[0].status, JobStatus::Complete);
    assert_eq!(output.jobs[0].attempts, 3);
    assert_eq!(backend.submits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn duplicate_input_names_are_deconflicted() {
    let backend = MockBackend::new("md\n", 1);
    let files = vec![pdf("doc.pdf"), pdf("doc.pdf")];

    let output = convert_batch(&files, &backend, &fast_config())
        .await
        .expect("batch succeeds");

    let mut entries = archive_entries(&output.archive);
    entries.sort();
    assert_eq!(entries, vec!["doc (1).md", "doc.md"]);
}

#[tokio::test]
async fn filename_map_controls_archive_entries() {
    let backend = MockBackend::new("md\n", 0);
    let files = vec![pdf("scan-001.pdf")];
    let mut map = HashMap::new();
    map.insert(0usize, "chapter-one.md".to_string());
    let config = BatchConfig::builder()
        .poll_interval_ms(1)
        .filename_map(map)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");
    assert_eq!(archive_entries(&output.archive), vec!["chapter-one.md"]);
}

#[tokio::test]
async fn clean_page_breaks_strips_separators() {
    let raw = "page one\n\n{2}------------------------------------------------\n\npage two";
    let backend = MockBackend::new(raw, 0);
    let files = vec![pdf("paged.pdf")];
    let config = BatchConfig::builder()
        .poll_interval_ms(1)
        .clean_page_breaks(true)
        .build()
        .unwrap();

    let output = convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");

    let content = archive_entry_content(&output.archive, "paged.md");
    assert!(!content.contains("{2}"), "got: {content}");
    assert!(content.contains("page one"));
    assert!(content.contains("page two"));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let backend = MockBackend::new("md\n", 0);
    let err = convert_batch(&[], &backend, &fast_config())
        .await
        .expect_err("no files");
    assert!(matches!(err, BatchError::EmptyBatch));
}

#[tokio::test]
async fn progress_snapshots_hold_counter_invariants() {
    let backend = MockBackend::new("md\n", 2);
    let files: Vec<SourceFile> = (0..4).map(|i| pdf(&format!("f{i}.pdf"))).collect();
    let recorder = Arc::new(SnapshotRecorder::default());
    let config = BatchConfig::builder()
        .max_concurrent(2)
        .poll_interval_ms(1)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    convert_batch(&files, &backend, &config)
        .await
        .expect("batch succeeds");

    let snapshots = recorder.snapshots.lock().unwrap();
    assert!(!snapshots.is_empty());

    // First snapshot: every job a Pending placeholder.
    let first = &snapshots[0];
    assert_eq!(first.jobs.len(), 4);
    assert!(first.jobs.iter().all(|j| j.status == JobStatus::Pending));

    let mut prev_settled = 0;
    for snap in snapshots.iter() {
        assert_eq!(
            snap.completed + snap.failed + snap.cancelled + snap.in_progress + snap.pending(),
            snap.total
        );
        assert!(snap.in_progress <= 2, "in_progress {} > 2", snap.in_progress);
        assert!(snap.settled() >= prev_settled, "settled count went backwards");
        prev_settled = snap.settled();
    }

    // Last snapshot: everything terminal.
    assert!(snapshots.last().unwrap().is_done());
}
