//! # marker-batch
//!
//! Batch-convert PDF documents to Markdown via a remote Marker service.
//!
//! ## Why this crate?
//!
//! Marker converts a single PDF very well, but its API is asynchronous
//! (submit, then poll a check URL) and a real workload is rarely a single
//! PDF. Driving fifty submit→poll→complete state machines by hand means
//! hand-rolling concurrency limits, retry backoff, cancellation, and
//! progress reporting — all of it incidental to the actual goal of "give me
//! a ZIP of Markdown files". This crate owns that orchestration.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs (bytes + names)
//!  │
//!  ├─ 1. Schedule  bounded concurrency, optional launch stagger
//!  ├─ 2. Submit    multipart upload → request_id + check URL
//!  ├─ 3. Poll      status checks until complete / error / timeout
//!  ├─ 4. Retry     exponential backoff around the whole submit→poll cycle
//!  ├─ 5. Clean     optional page-break stripping
//!  └─ 6. Package   one ZIP, one .md entry per completed file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marker_batch::{convert_batch, BatchConfig, MarkerBackend, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MarkerBackend::new(std::env::var("DATALAB_API_KEY")?);
//!     let files = vec![
//!         SourceFile::new("report.pdf", std::fs::read("report.pdf")?),
//!         SourceFile::new("paper.pdf", std::fs::read("paper.pdf")?),
//!     ];
//!     let output = convert_batch(&files, &backend, &BatchConfig::default()).await?;
//!     std::fs::write("results.zip", &output.archive)?;
//!     eprintln!("{}/{} converted", output.stats.completed, output.stats.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! | Backend | Deployment | Default concurrency |
//! |---------|-----------|---------------------|
//! | [`MarkerBackend`] | Datalab pay-per-use API | 5 |
//! | [`ModalBackend`]  | Self-hosted GPU endpoint | 2, staggered launches |
//!
//! Both implement [`ConversionBackend`]; the scheduler and retry logic are
//! identical across them.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `marker-batch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! marker-batch = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod backend;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod postprocess;
pub mod progress;
pub mod retry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    ConversionBackend, MarkerBackend, ModalBackend, PollResponse, PollStatus, SourceFile,
    SubmitReceipt, MAX_FILE_SIZE_BYTES,
};
pub use batch::convert_batch;
pub use client::convert_file;
pub use config::{BatchConfig, BatchConfigBuilder, ConversionOptions, OutputFormat};
pub use error::{BatchError, JobError};
pub use output::{BatchOutput, BatchProgress, BatchStats, ConversionJob, JobStatus};
pub use postprocess::clean_markdown;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use retry::convert_with_retry;
