//! Backend strategy: one submit/poll contract, two wire shapes.
//!
//! The two Marker deployments — the pay-per-use Datalab API and a self-hosted
//! GPU endpoint — take differently-named form fields and differ in
//! initial-consistency behaviour, but share an identical logical contract:
//! submit a file, receive a check URL, poll until a terminal status. Rather
//! than duplicating the whole poll loop per deployment, the orchestration in
//! [`crate::client`] is written once against the [`ConversionBackend`] trait
//! and each deployment only describes its own request shape and quirks.
//!
//! Quirks captured by the trait:
//! * `initial_delay` — the self-hosted endpoint may not have registered the
//!   job yet when the first poll arrives, so it asks for a short warm-up wait.
//! * `launch_stagger` — cold-starting several GPU containers at once spikes
//!   the self-hosted backend, so it asks the scheduler to space out launches.
//! * `default_concurrency` — the paid API tolerates more parallel jobs.

use crate::config::ConversionOptions;
use crate::error::JobError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Hard ceiling on a single input file, enforced by the backends themselves.
///
/// The conversion client does not re-validate this — it forwards the file and
/// surfaces the backend's rejection — but callers that want a friendlier
/// error should pre-validate against it (the CLI does).
pub const MAX_FILE_SIZE_BYTES: u64 = 200 * 1024 * 1024;

/// Per-request HTTP timeouts. Submit uploads the whole file; polls are tiny.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// One input file: a name and its bytes.
///
/// Identity is positional (the index in the batch's input slice), never the
/// name — two inputs may legitimately share a name.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// True when the file is over the backends' size ceiling.
    pub fn exceeds_size_limit(&self) -> bool {
        self.bytes.len() as u64 > MAX_FILE_SIZE_BYTES
    }
}

/// Successful submit: where to poll for the result.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub request_id: String,
    pub check_url: String,
}

/// Backend-reported job state for one status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

/// One status check's result.
#[derive(Debug, Clone)]
pub struct PollResponse {
    pub status: PollStatus,
    /// Present when `status == Complete` (a complete response without
    /// content is a contract violation the client turns into an error).
    pub markdown: Option<String>,
    /// Backend-reported completion fraction, when available.
    pub progress: Option<f32>,
    /// Backend-reported message when `status == Error`.
    pub error: Option<String>,
}

/// Strategy object for one Marker deployment.
///
/// Implementations perform exactly one network operation per method; the
/// submit→poll orchestration, retry, and cancellation all live above this
/// seam, so a scripted implementation is enough to test the whole pipeline.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Upload one file with its options; returns where to poll.
    async fn submit(
        &self,
        file: &SourceFile,
        options: &ConversionOptions,
    ) -> Result<SubmitReceipt, JobError>;

    /// One status check against the URL returned by [`Self::submit`].
    async fn poll_once(&self, check_url: &str) -> Result<PollResponse, JobError>;

    /// Short label used as the error-message prefix ("marker", "modal").
    fn label(&self) -> &'static str;

    /// Warm-up wait before the first poll of a freshly submitted job.
    fn initial_delay(&self) -> Option<Duration> {
        None
    }

    /// Minimum spacing between worker launches the scheduler should apply
    /// when the caller does not override it.
    fn launch_stagger(&self) -> Option<Duration> {
        None
    }

    /// In-flight ceiling used when the caller does not override it.
    fn default_concurrency(&self) -> usize;
}

// ── Wire shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitWire {
    success: Option<bool>,
    request_id: Option<String>,
    request_check_url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollWire {
    status: Option<String>,
    success: Option<bool>,
    markdown: Option<String>,
    progress: Option<f32>,
    error: Option<String>,
}

impl PollWire {
    /// Map the wire status string onto [`PollStatus`].
    ///
    /// The paid API reports `status: "complete"` with `success: false` for a
    /// failed job; that combination is an error, not a completion.
    fn into_response(self, backend: &'static str) -> Result<PollResponse, JobError> {
        let status = match self.status.as_deref() {
            Some("pending") => PollStatus::Pending,
            Some("processing") => PollStatus::Processing,
            Some("complete") if self.success == Some(false) => PollStatus::Error,
            Some("complete") => PollStatus::Complete,
            Some("error") | Some("failed") => PollStatus::Error,
            other => {
                return Err(JobError::Poll {
                    backend,
                    detail: format!("unrecognised status {:?} in poll response", other),
                })
            }
        };
        Ok(PollResponse {
            status,
            markdown: self.markdown,
            progress: self.progress,
            error: self.error,
        })
    }
}

// ── Datalab Marker API (pay-per-use) ─────────────────────────────────────

/// The hosted Marker API at datalab.to. Authenticated with an `X-Api-Key`
/// header; the check URL returned by submit is immediately pollable.
pub struct MarkerBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Default submit endpoint for the hosted API.
pub const DATALAB_MARKER_URL: &str = "https://www.datalab.to/api/v1/marker";

impl MarkerBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DATALAB_MARKER_URL)
    }

    /// Point at a non-default deployment of the same API (used in tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn build_form(file: &SourceFile, options: &ConversionOptions) -> Form {
        let mut form = Form::new()
            .part(
                "file",
                Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
            )
            .text("output_format", options.output_format.as_str())
            .text("force_ocr", bool_str(options.force_ocr))
            .text("paginate", bool_str(options.paginate))
            .text("use_llm", bool_str(options.use_llm))
            .text("strip_existing_ocr", bool_str(options.strip_existing_ocr))
            .text(
                "disable_image_extraction",
                bool_str(options.disable_image_extraction),
            );
        if let Some(ref langs) = options.langs {
            form = form.text("langs", langs.clone());
        }
        form
    }
}

#[async_trait]
impl ConversionBackend for MarkerBackend {
    async fn submit(
        &self,
        file: &SourceFile,
        options: &ConversionOptions,
    ) -> Result<SubmitReceipt, JobError> {
        debug!("submitting {} ({} bytes) to {}", file.name, file.bytes.len(), self.base_url);

        let response = self
            .client
            .post(&self.base_url)
            .header("X-Api-Key", &self.api_key)
            .multipart(Self::build_form(file, options))
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| JobError::Submission {
                backend: self.label(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Submission {
                backend: self.label(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let wire: SubmitWire = response.json().await.map_err(|e| JobError::Submission {
            backend: self.label(),
            detail: format!("malformed submit response: {e}"),
        })?;

        if wire.success == Some(false) {
            return Err(JobError::Submission {
                backend: self.label(),
                detail: wire.error.unwrap_or_else(|| "backend rejected submit".into()),
            });
        }

        let check_url = wire.request_check_url.ok_or(JobError::Submission {
            backend: self.label(),
            detail: "submit response missing request_check_url".into(),
        })?;

        Ok(SubmitReceipt {
            request_id: wire.request_id.unwrap_or_default(),
            check_url,
        })
    }

    async fn poll_once(&self, check_url: &str) -> Result<PollResponse, JobError> {
        let response = self
            .client
            .get(check_url)
            .header("X-Api-Key", &self.api_key)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(|e| JobError::Poll {
                backend: self.label(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Poll {
                backend: self.label(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let wire: PollWire = response.json().await.map_err(|e| JobError::Poll {
            backend: self.label(),
            detail: format!("malformed poll response: {e}"),
        })?;
        wire.into_response(self.label())
    }

    fn label(&self) -> &'static str {
        "marker"
    }

    fn default_concurrency(&self) -> usize {
        5
    }
}

// ── Self-hosted Marker deployment (Modal or local marker_server) ────────

/// A self-hosted Marker endpoint (Modal GPU deployment or a local
/// `marker_server`). Submits to `{base}/marker`; the job may not be visible
/// to the status endpoint immediately after submit, so the first poll is
/// delayed and 404/502 responses are read as "still processing".
pub struct ModalBackend {
    client: reqwest::Client,
    base_url: String,
    /// Forwarded to the backend for its LLM-enhancement pass, when enabled.
    llm_api_key: Option<String>,
}

impl ModalBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            llm_api_key: None,
        }
    }

    pub fn with_llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.llm_api_key = Some(key.into());
        self
    }

    fn build_form(&self, file: &SourceFile, options: &ConversionOptions) -> Form {
        let mut form = Form::new()
            .part(
                "file",
                Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
            )
            .text("output_format", options.output_format.as_str())
            .text("paginate", bool_str(options.paginate))
            .text("use_llm", bool_str(options.use_llm))
            .text(
                "disable_image_extraction",
                bool_str(options.disable_image_extraction),
            );
        if let Some(ref langs) = options.langs {
            form = form.text("langs", langs.clone());
        }
        if options.use_llm {
            if let Some(ref key) = self.llm_api_key {
                form = form.text("api_key", key.clone());
            }
        }
        form
    }
}

#[async_trait]
impl ConversionBackend for ModalBackend {
    async fn submit(
        &self,
        file: &SourceFile,
        options: &ConversionOptions,
    ) -> Result<SubmitReceipt, JobError> {
        let url = format!("{}/marker", self.base_url);
        debug!("submitting {} ({} bytes) to {}", file.name, file.bytes.len(), url);

        let response = self
            .client
            .post(&url)
            .multipart(self.build_form(file, options))
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| JobError::Submission {
                backend: self.label(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Submission {
                backend: self.label(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let wire: SubmitWire = response.json().await.map_err(|e| JobError::Submission {
            backend: self.label(),
            detail: format!("malformed submit response: {e}"),
        })?;

        if wire.success == Some(false) {
            return Err(JobError::Submission {
                backend: self.label(),
                detail: wire.error.unwrap_or_else(|| "backend rejected submit".into()),
            });
        }

        let check_url = wire.request_check_url.ok_or(JobError::Submission {
            backend: self.label(),
            detail: "submit response missing request_check_url".into(),
        })?;

        Ok(SubmitReceipt {
            request_id: wire.request_id.unwrap_or_default(),
            check_url,
        })
    }

    async fn poll_once(&self, check_url: &str) -> Result<PollResponse, JobError> {
        let response = self
            .client
            .get(check_url)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(|e| JobError::Poll {
                backend: self.label(),
                detail: e.to_string(),
            })?;

        let status = response.status();

        // Eventual consistency: the job id may not be registered yet, and a
        // cold-starting container answers through a 502 gateway. Neither is
        // a failure — the job is still on its way.
        if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::BAD_GATEWAY
        {
            return Ok(PollResponse {
                status: PollStatus::Processing,
                markdown: None,
                progress: None,
                error: None,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Poll {
                backend: self.label(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let wire: PollWire = response.json().await.map_err(|e| JobError::Poll {
            backend: self.label(),
            detail: format!("malformed poll response: {e}"),
        })?;
        wire.into_response(self.label())
    }

    fn label(&self) -> &'static str {
        "modal"
    }

    fn initial_delay(&self) -> Option<Duration> {
        Some(Duration::from_secs(2))
    }

    fn launch_stagger(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }

    fn default_concurrency(&self) -> usize {
        2
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_poll(json: &str) -> Result<PollResponse, JobError> {
        let wire: PollWire = serde_json::from_str(json).expect("valid test JSON");
        wire.into_response("marker")
    }

    #[test]
    fn poll_complete_with_markdown() {
        let r = parse_poll(r##"{"success": true, "status": "complete", "markdown": "# Hi"}"##)
            .expect("parse");
        assert_eq!(r.status, PollStatus::Complete);
        assert_eq!(r.markdown.as_deref(), Some("# Hi"));
    }

    #[test]
    fn poll_complete_with_success_false_is_error() {
        let r = parse_poll(r#"{"success": false, "status": "complete", "error": "bad pdf"}"#)
            .expect("parse");
        assert_eq!(r.status, PollStatus::Error);
        assert_eq!(r.error.as_deref(), Some("bad pdf"));
    }

    #[test]
    fn poll_processing_with_progress() {
        let r = parse_poll(r#"{"status": "processing", "progress": 0.4}"#).expect("parse");
        assert_eq!(r.status, PollStatus::Processing);
        assert_eq!(r.progress, Some(0.4));
    }

    #[test]
    fn poll_unknown_status_is_malformed() {
        let r = parse_poll(r#"{"status": "exploded"}"#);
        assert!(matches!(r, Err(JobError::Poll { .. })));
    }

    #[test]
    fn submit_wire_tolerates_missing_fields() {
        let wire: SubmitWire =
            serde_json::from_str(r#"{"success": true, "request_check_url": "http://x/s/1"}"#)
                .expect("parse");
        assert_eq!(wire.request_check_url.as_deref(), Some("http://x/s/1"));
        assert!(wire.request_id.is_none());
    }

    #[test]
    fn source_file_size_limit() {
        let small = SourceFile::new("a.pdf", vec![0u8; 16]);
        assert!(!small.exceeds_size_limit());
        assert_eq!(MAX_FILE_SIZE_BYTES, 200 * 1024 * 1024);
    }

    #[test]
    fn backend_defaults_differ_by_deployment() {
        let marker = MarkerBackend::new("key");
        let modal = ModalBackend::new("http://localhost:8000/");
        assert!(marker.default_concurrency() > modal.default_concurrency());
        assert!(marker.launch_stagger().is_none());
        assert!(modal.launch_stagger().is_some());
        assert!(marker.initial_delay().is_none());
        assert!(modal.initial_delay().is_some());
    }

    #[test]
    fn modal_base_url_trailing_slash_trimmed() {
        let modal = ModalBackend::new("http://localhost:8000/");
        assert_eq!(modal.base_url, "http://localhost:8000");
    }
}
