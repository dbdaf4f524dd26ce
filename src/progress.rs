//! Progress-callback trait for batch conversion events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! real-time events as the scheduler moves jobs through their lifecycle.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a broadcast channel, a WebSocket, a database record, or
//! a terminal progress bar without the library knowing anything about how the
//! host application communicates. The trait is `Send + Sync` because callback
//! objects move into futures that the scheduler drives concurrently.
//!
//! All methods are invoked from the scheduler's own update step, never from
//! inside an in-flight network call, so every [`BatchProgress`] snapshot the
//! callback sees satisfies the counter invariants documented on that type.

use crate::output::BatchProgress;
use std::sync::Arc;

/// Called by the batch scheduler as jobs launch and settle.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_progress` is the push-model snapshot from the
/// original design; the granular methods exist for log lines and progress
/// bars that do not want to diff snapshots.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any job is launched.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a job leaves the queue and its first attempt begins.
    fn on_job_start(&self, index: usize, file_name: &str) {
        let _ = (index, file_name);
    }

    /// Called when a job completes with Markdown content.
    fn on_job_complete(&self, index: usize, file_name: &str, markdown_len: usize) {
        let _ = (index, file_name, markdown_len);
    }

    /// Called when a job ends `Failed` or `Cancelled`.
    fn on_job_error(&self, index: usize, file_name: &str, error: String) {
        let _ = (index, file_name, error);
    }

    /// Called after every state transition with a consistent snapshot.
    fn on_progress(&self, progress: &BatchProgress) {
        let _ = progress;
    }

    /// Called once after every job is terminal, before packaging.
    fn on_batch_complete(&self, total: usize, completed: usize) {
        let _ = (total, completed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
