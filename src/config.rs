//! Configuration types for batch conversion.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share configs across tasks, serialise the option subset for logging,
//! and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::BatchError;
use crate::progress::BatchProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output format requested from the Marker service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown (default).
    #[default]
    Markdown,
    /// Structured JSON.
    Json,
    /// HTML.
    Html,
}

impl OutputFormat {
    /// Wire value for the submit form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
        }
    }
}

/// Per-file conversion options forwarded to the backend on submit.
///
/// These mirror the Marker submit form: the backend interprets them, the
/// orchestrator only forwards them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub output_format: OutputFormat,
    /// Comma-separated language hints for OCR (e.g. "en,es").
    pub langs: Option<String>,
    /// Force OCR even when the PDF has an extractable text layer.
    pub force_ocr: bool,
    /// Insert page separators into the output.
    pub paginate: bool,
    /// Enable the LLM-enhancement pass on the backend.
    pub use_llm: bool,
    /// Discard the PDF's existing OCR layer and redo it.
    pub strip_existing_ocr: bool,
    /// Skip image extraction in the output.
    pub disable_image_extraction: bool,
}

/// Configuration for one batch invocation.
///
/// Built via [`BatchConfig::builder()`] or [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use marker_batch::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .max_concurrent(5)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Maximum simultaneously in-flight conversions. `None` uses the
    /// backend's advertised default (larger for the pay-per-use API,
    /// smaller for a self-hosted GPU deployment).
    pub max_concurrent: Option<usize>,

    /// Extra attempts after the first failure. Default: 3 (so 4 total).
    ///
    /// Most submit and poll failures are transient (overloaded backend,
    /// network blip). Permanent errors simply burn through the budget fast;
    /// the backend's own error message is retained from the last attempt.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 1000.
    ///
    /// Doubles after each attempt. Exponential backoff avoids the
    /// thundering-herd problem where N concurrent jobs retry simultaneously
    /// against a recovering backend.
    pub retry_backoff_ms: u64,

    /// Ceiling on a single backoff sleep in milliseconds. Default: 32_000.
    pub retry_backoff_cap_ms: u64,

    /// Delay between status checks in milliseconds. Default: 2000.
    pub poll_interval_ms: u64,

    /// Maximum status checks per submit attempt. Default: 150 (~5 minutes
    /// at the default interval). Exhaustion fails that attempt with a
    /// timeout; the retry budget decides whether to submit again.
    pub max_poll_attempts: u32,

    /// Minimum spacing between worker launches in milliseconds. `None` uses
    /// the backend's default (the self-hosted backend staggers launches to
    /// avoid simultaneous cold-start spikes; the paid API does not).
    pub launch_stagger_ms: Option<u64>,

    /// Strip Marker pagination separators from completed Markdown before
    /// packaging. Default: false.
    pub clean_page_breaks: bool,

    /// Options forwarded to the backend with every submit.
    pub options: ConversionOptions,

    /// Receives a consistent [`crate::output::BatchProgress`] snapshot after
    /// every state transition.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,

    /// Cancellation signal, checked at fixed points (before each launch,
    /// before each retry attempt, around each poll). Clone the token before
    /// building the config to keep a handle for cancelling.
    pub cancel: CancellationToken,

    /// Desired output names keyed by input index, overriding the default
    /// extension swap. Input order is stable, so an index identifies a file
    /// even when two inputs share a name.
    pub filename_map: HashMap<usize, String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            max_retries: 3,
            retry_backoff_ms: 1000,
            retry_backoff_cap_ms: 32_000,
            poll_interval_ms: 2000,
            max_poll_attempts: 150,
            launch_stagger_ms: None,
            clean_page_breaks: false,
            options: ConversionOptions::default(),
            progress_callback: None,
            cancel: CancellationToken::new(),
            filename_map: HashMap::new(),
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("max_concurrent", &self.max_concurrent)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("retry_backoff_cap_ms", &self.retry_backoff_cap_ms)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("launch_stagger_ms", &self.launch_stagger_ms)
            .field("clean_page_breaks", &self.clean_page_breaks)
            .field("options", &self.options)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .field("filename_map", &self.filename_map)
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = Some(n.max(1));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn retry_backoff_cap_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_cap_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n;
        self
    }

    pub fn launch_stagger_ms(mut self, ms: u64) -> Self {
        self.config.launch_stagger_ms = Some(ms);
        self
    }

    pub fn clean_page_breaks(mut self, v: bool) -> Self {
        self.config.clean_page_breaks = v;
        self
    }

    pub fn options(mut self, options: ConversionOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.config.cancel = token;
        self
    }

    pub fn filename_map(mut self, map: HashMap<usize, String>) -> Self {
        self.config.filename_map = map;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.max_concurrent == Some(0) {
            return Err(BatchError::InvalidConfig(
                "max_concurrent must be >= 1".into(),
            ));
        }
        if c.poll_interval_ms == 0 {
            return Err(BatchError::InvalidConfig(
                "poll_interval_ms must be >= 1".into(),
            ));
        }
        if c.max_poll_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "max_poll_attempts must be >= 1".into(),
            ));
        }
        Ok(self.config)
    }
}
