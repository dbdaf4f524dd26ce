//! CLI binary for marker-batch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! reads input PDFs, and writes the result ZIP.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use marker_batch::{
    convert_batch, BatchConfig, BatchProgressCallback, ConversionBackend, ConversionOptions,
    MarkerBackend, ModalBackend, OutputFormat, ProgressCallback, SourceFile, MAX_FILE_SIZE_BYTES,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-file log
/// lines using [indicatif]. Files complete out of order, so per-file timing
/// is keyed by input index.
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-file wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of files that errored out or were cancelled.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total} files…"))
        ));
    }

    fn on_job_start(&self, index: usize, file_name: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(file_name.to_string());
    }

    fn on_job_complete(&self, index: usize, file_name: &str, markdown_len: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} {:<40}  {:<12}  {}",
            green("✓"),
            file_name,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, index: usize, file_name: &str, error: String) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = truncate_message(&error, 79);

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            file_name,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, completed: usize) {
        let failed = total.saturating_sub(completed);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&completed.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                cyan("⚠"),
                bold(&completed.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis.
///
/// Backend error messages are arbitrary UTF-8 (HTTP bodies pass through
/// verbatim), so truncation must land on a char boundary, not a byte index.
fn truncate_message(msg: &str, max_chars: usize) -> String {
    match msg.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}\u{2026}", &msg[..i]),
        None => msg.to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a batch via the hosted Datalab API
  export DATALAB_API_KEY=sk-...
  marker-batch *.pdf -o results.zip

  # Self-hosted GPU endpoint
  marker-batch --backend modal --modal-url https://my-org--marker.modal.run *.pdf

  # Force OCR with language hints, strip page separators
  marker-batch --force-ocr --langs en,es --clean-page-breaks docs/*.pdf

  # Tighter concurrency against a small deployment
  marker-batch --backend modal --modal-url $URL --max-concurrent 1 *.pdf

  # Print the per-file report as JSON alongside the archive
  marker-batch report.pdf --json > report.json

BACKENDS:
  Backend    Deployment                    Default concurrency
  ────────   ───────────────────────────   ───────────────────
  marker     Datalab pay-per-use API       5
  modal      self-hosted GPU endpoint      2, staggered launches

ENVIRONMENT VARIABLES:
  DATALAB_API_KEY       API key for the hosted Marker API
  MARKER_MODAL_URL      Base URL of a self-hosted deployment
  GEMINI_API_KEY        Forwarded to self-hosted deployments for --use-llm
  RUST_LOG              Override log filtering (tracing EnvFilter syntax)
"#;

/// Batch-convert PDF files to Markdown via a remote Marker service.
#[derive(Parser, Debug)]
#[command(
    name = "marker-batch",
    version,
    about = "Batch-convert PDF files to Markdown via a remote Marker service",
    long_about = "Submit many PDF documents to a Marker conversion service (the hosted Datalab \
API or a self-hosted GPU deployment), track each one through submit, poll, and completion with \
retries and bounded concurrency, and package the Markdown results into a single ZIP archive.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to convert.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write the result ZIP to this path.
    #[arg(short, long, default_value = "marker-output.zip")]
    output: PathBuf,

    /// Conversion backend: marker (hosted API) or modal (self-hosted).
    #[arg(long, value_enum, default_value = "marker")]
    backend: BackendArg,

    /// API key for the hosted Marker API.
    #[arg(long, env = "DATALAB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of a self-hosted deployment (required with --backend modal).
    #[arg(long, env = "MARKER_MODAL_URL")]
    modal_url: Option<String>,

    /// API key forwarded to a self-hosted deployment's LLM pass.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Output format: markdown, json, html.
    #[arg(long, value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Comma-separated OCR language hints (e.g. en,es).
    #[arg(long)]
    langs: Option<String>,

    /// Force OCR even when the PDF has an extractable text layer.
    #[arg(long)]
    force_ocr: bool,

    /// Insert page separators into the output.
    #[arg(long)]
    paginate: bool,

    /// Enable the backend's LLM-enhancement pass.
    #[arg(long)]
    use_llm: bool,

    /// Discard the PDF's existing OCR layer and redo it.
    #[arg(long)]
    strip_existing_ocr: bool,

    /// Skip image extraction in the output.
    #[arg(long)]
    no_images: bool,

    /// Strip pagination separators from the output Markdown.
    #[arg(long)]
    clean_page_breaks: bool,

    /// Simultaneous conversions (default: backend-specific).
    #[arg(short = 'c', long)]
    max_concurrent: Option<usize>,

    /// Extra attempts per file after the first failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Delay between status checks in milliseconds.
    #[arg(long, default_value_t = 2000)]
    poll_interval: u64,

    /// Maximum status checks per attempt.
    #[arg(long, default_value_t = 150)]
    max_poll_attempts: u32,

    /// Minimum spacing between job launches in milliseconds
    /// (default: backend-specific).
    #[arg(long)]
    stagger: Option<u64>,

    /// Print the per-file report as JSON to stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Marker,
    Modal,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Json,
    Html,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Html => OutputFormat::Html,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Load and validate inputs ─────────────────────────────────────────
    let mut files = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        if !name.to_lowercase().ends_with(".pdf") {
            anyhow::bail!("{}: only PDF inputs are supported", path.display());
        }
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes.is_empty() {
            anyhow::bail!("{}: file is empty", path.display());
        }
        let file = SourceFile::new(name, bytes);
        if file.exceeds_size_limit() {
            anyhow::bail!(
                "{}: exceeds the {} MB upload limit",
                path.display(),
                MAX_FILE_SIZE_BYTES / (1024 * 1024)
            );
        }
        files.push(file);
    }

    // ── Build backend ────────────────────────────────────────────────────
    let backend: Box<dyn ConversionBackend> = match cli.backend {
        BackendArg::Marker => {
            let key = cli
                .api_key
                .clone()
                .context("--api-key (or DATALAB_API_KEY) is required for the marker backend")?;
            Box::new(MarkerBackend::new(key))
        }
        BackendArg::Modal => {
            let url = cli
                .modal_url
                .clone()
                .context("--modal-url (or MARKER_MODAL_URL) is required for the modal backend")?;
            let mut b = ModalBackend::new(url);
            if let Some(ref key) = cli.llm_api_key {
                b = b.with_llm_api_key(key.clone());
            }
            Box::new(b)
        }
    };

    // ── Cancellation on Ctrl-C ───────────────────────────────────────────
    // First Ctrl-C cancels cooperatively (in-flight jobs settle, queued
    // jobs never launch); a second one aborts the process.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} cancelling… press Ctrl-C again to abort", cyan("◆"));
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    // ── Build config ─────────────────────────────────────────────────────
    let options = ConversionOptions {
        output_format: cli.format.into(),
        langs: cli.langs.clone(),
        force_ocr: cli.force_ocr,
        paginate: cli.paginate,
        use_llm: cli.use_llm,
        strip_existing_ocr: cli.strip_existing_ocr,
        disable_image_extraction: cli.no_images,
    };

    let mut builder = BatchConfig::builder()
        .max_retries(cli.max_retries)
        .poll_interval_ms(cli.poll_interval)
        .max_poll_attempts(cli.max_poll_attempts)
        .clean_page_breaks(cli.clean_page_breaks)
        .options(options)
        .cancel_token(cancel);
    if let Some(n) = cli.max_concurrent {
        builder = builder.max_concurrent(n);
    }
    if let Some(ms) = cli.stagger {
        builder = builder.launch_stagger_ms(ms);
    }
    if show_progress {
        let cb = CliProgressCallback::new(files.len());
        builder = builder.progress_callback(cb as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Run the batch ────────────────────────────────────────────────────
    let output = convert_batch(&files, backend.as_ref(), &config)
        .await
        .context("Batch conversion failed")?;

    tokio::fs::write(&cli.output, &output.archive)
        .await
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output.jobs).context("Failed to serialise report")?
        );
    }

    if !cli.quiet {
        eprintln!(
            "{}  {}/{} files  {}ms  →  {}",
            if output.stats.failed == 0 && output.stats.cancelled == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            output.stats.completed,
            output.stats.total,
            output.stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        for job in output.failed() {
            eprintln!(
                "   {} {}: {}",
                red("✗"),
                job.file_name,
                dim(job.error.as_deref().unwrap_or("unknown error"))
            );
        }
    }

    Ok(())
}
