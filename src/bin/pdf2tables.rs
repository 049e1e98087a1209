//! CLI binary for edgequake-pdf2tables.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2tables::pipeline::input::{document_stem, list_pdfs};
use edgequake_pdf2tables::{
    extract, inspect, BatchOutput, ExtractionConfig, ExtractionProgressCallback, ImageLimits,
    PageSelection, PageState, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting tables and charts from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_skipped(&self, page_num: usize, total: usize, reason: &str) {
        let _ = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            dim("·"),
            page_num,
            total,
            dim(reason),
        ));
        self.bar.inc(1);
    }

    fn on_page_complete(&self, page_num: usize, total: usize, state: PageState, elements: usize) {
        let secs = self.elapsed_secs(page_num);
        let (mark, label) = match state {
            PageState::ManualReviewFlagged => (yellow("⚑"), yellow("review")),
            _ => (green("✓"), dim("validated")),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<9}  {}  {}",
            mark,
            page_num,
            total,
            label,
            dim(&format!("{elements:>2} elements")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_pages: usize, validated: usize, flagged: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);

        eprintln!(
            "{} {} validated, {} flagged, {} failed of {} pages",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&validated.to_string()),
            if flagged > 0 {
                yellow(&flagged.to_string())
            } else {
                flagged.to_string()
            },
            if failed > 0 {
                red(&failed.to_string())
            } else {
                failed.to_string()
            },
            total_pages,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every table and chart into ./bulletin/
  pdf2tables bulletin.pdf

  # Choose the output directory and a page range
  pdf2tables --pages 12-40 -o results/ bulletin.pdf

  # Cheaper pre-check, stronger extraction model
  pdf2tables --precheck-model gpt-4.1-nano --extraction-model gpt-4.1 bulletin.pdf

  # Re-run pages that already have artifacts
  pdf2tables --force bulletin.pdf

  # Portuguese scans: OCR in Portuguese and English
  pdf2tables --ocr-lang por+eng bulletin.pdf

  # Every PDF in a directory, each into results/<stem>/
  pdf2tables -o results/ docs/

  # Inspect PDF metadata (no API key needed)
  pdf2tables --inspect-only bulletin.pdf

  # Full batch record as JSON on stdout
  pdf2tables --json bulletin.pdf > batch.json

OUTPUT LAYOUT:
  <out>/summary.html           every table and chart, merged across runs
  <out>/page-NNN/page.json     page record; its presence marks the page done
  <out>/page-NNN/table-NN.html one standalone HTML file per table
  <out>/page-NNN/chart-NN.json chart series, equations and optima
  <out>/page-NNN/REVIEW.txt    written when the page needs manual review

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider for both tiers (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model for tiers without an explicit model

SETUP:
  0. libpdfium must be on the system library path or in the working directory
  1. Install tesseract (optional, for dense pages): apt install tesseract-ocr
  2. Set API key:     export OPENAI_API_KEY=sk-...
  3. Extract:         pdf2tables bulletin.pdf
"#;

/// Extract tables and charts from scientific PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2tables",
    version,
    about = "Extract tables and charts from scientific PDFs using Vision LLMs",
    long_about = "Extract every table and chart from a PDF (local file or URL) into HTML and \
JSON artifacts. A cheap model pre-checks each page, a stronger model extracts, and the result \
is validated, retried with OCR when sparse, and flagged for review when counts disagree.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path, HTTP/HTTPS URL, or a directory of PDFs.
    input: String,

    /// Output directory. Default: the input's file stem. For a directory
    /// input, each PDF gets a subdirectory named by its stem.
    #[arg(short, long, env = "PDF2TABLES_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Provider for the pre-check tier.
    #[arg(long, env = "PDF2TABLES_PRECHECK_PROVIDER")]
    precheck_provider: Option<String>,

    /// Model for the pre-check tier. Default: gpt-4.1-nano.
    #[arg(long, env = "PDF2TABLES_PRECHECK_MODEL")]
    precheck_model: Option<String>,

    /// Provider for the extraction tier.
    #[arg(long, env = "PDF2TABLES_EXTRACTION_PROVIDER")]
    extraction_provider: Option<String>,

    /// Model for the extraction tier. Default: gpt-4.1.
    #[arg(long, env = "PDF2TABLES_EXTRACTION_MODEL")]
    extraction_model: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2TABLES_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Number of pages processed concurrently.
    #[arg(short, long, env = "PDF2TABLES_CONCURRENCY", default_value_t = 6)]
    concurrency: usize,

    /// Page selection: all, 5, 3-15, or 1,3,10-12.
    #[arg(long, env = "PDF2TABLES_PAGES", default_value = "all")]
    pages: String,

    /// Re-process pages that already have artifacts.
    #[arg(long, env = "PDF2TABLES_FORCE")]
    force: bool,

    /// Empty-cell ratio above which the OCR retry fires (0.0–1.0).
    #[arg(long, env = "PDF2TABLES_OCR_TRIGGER", default_value_t = 0.30)]
    ocr_trigger: f64,

    /// Minimum expected elements for OCR to run.
    #[arg(long, env = "PDF2TABLES_OCR_MIN_ELEMENTS", default_value_t = 2)]
    ocr_min_elements: usize,

    /// Minimum expected elements for a count mismatch to be flagged.
    #[arg(long, env = "PDF2TABLES_REVIEW_MIN_ELEMENTS", default_value_t = 3)]
    review_min_elements: usize,

    /// Tesseract language code(s), e.g. por+eng.
    #[arg(long, env = "PDF2TABLES_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Short image side is upscaled to at least this many pixels.
    #[arg(long, env = "PDF2TABLES_MIN_DIMENSION", default_value_t = 800)]
    min_dimension: u32,

    /// Long image side is downscaled to at most this many pixels.
    #[arg(long, env = "PDF2TABLES_MAX_DIMENSION", default_value_t = 3000)]
    max_dimension: u32,

    /// Encoded image budget per model call, in bytes.
    #[arg(long, env = "PDF2TABLES_MAX_IMAGE_BYTES", default_value_t = 15 * 1024 * 1024)]
    max_image_bytes: usize,

    /// Skip contrast enhancement before encoding.
    #[arg(long, env = "PDF2TABLES_NO_ENHANCE")]
    no_enhance: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TABLES_PASSWORD")]
    password: Option<String>,

    /// Max output tokens per extraction call.
    #[arg(long, env = "PDF2TABLES_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2TABLES_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Transport retries per model call.
    #[arg(long, env = "PDF2TABLES_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Print the full batch record as JSON on stdout.
    #[arg(long, env = "PDF2TABLES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TABLES_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TABLES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TABLES_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2TABLES_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2TABLES_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Inputs ───────────────────────────────────────────────────────────
    let from_directory = Path::new(&cli.input).is_dir();
    let documents: Vec<String> = if from_directory {
        list_pdfs(Path::new(&cli.input))
            .context("Failed to list PDFs")?
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    } else {
        vec![cli.input.clone()]
    };

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let mut builder =
            ExtractionConfig::builder().download_timeout_secs(cli.download_timeout);
        if let Some(ref pwd) = cli.password {
            builder = builder.password(pwd.clone());
        }
        let config = builder.build().context("Invalid configuration")?;

        for document in &documents {
            let meta = inspect(document, &config)
                .await
                .with_context(|| format!("Failed to inspect {document}"))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta)
                        .context("Failed to serialize metadata")?
                );
            } else {
                println!("File:    {}", document);
                if let Some(ref t) = meta.title {
                    println!("Title:   {}", t);
                }
                if let Some(ref a) = meta.author {
                    println!("Author:  {}", a);
                }
                println!("Pages:   {}", meta.page_count);
            }
        }
        return Ok(());
    }

    // ── Run extraction, one document at a time ───────────────────────────
    for document in &documents {
        let output_dir = match (&cli.output_dir, from_directory) {
            (Some(root), true) => root.join(document_stem(document)),
            (Some(dir), false) => dir.clone(),
            (None, _) => PathBuf::from(document_stem(document)),
        };
        if from_directory && !cli.quiet {
            eprintln!("{} {}", cyan("▶"), bold(document));
        }

        let progress_cb: Option<ProgressCallback> = if show_progress {
            let cb = CliProgressCallback::new_dynamic();
            Some(cb as Arc<dyn ExtractionProgressCallback>)
        } else {
            None
        };
        let config = build_config(&cli, progress_cb)?;

        let output = extract(document, &config, Some(&output_dir))
            .await
            .with_context(|| format!("Extraction failed for {document}"))?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        }
        if !cli.quiet {
            report(&output, &output_dir, show_progress);
        }
    }

    Ok(())
}

/// Totals, token usage and flagged pages of one document, on stderr.
fn report(output: &BatchOutput, output_dir: &Path, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        eprintln!(
            "{} validated, {} flagged, {} skipped, {} failed of {} pages in {}ms",
            stats.validated_pages,
            stats.flagged_pages,
            stats.skipped_pages,
            stats.failed_pages,
            stats.selected_pages,
            stats.total_duration_ms
        );
    }
    eprintln!(
        "   {} elements  →  {}",
        bold(&stats.extracted_elements.to_string()),
        bold(&output_dir.join("summary.html").display().to_string()),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out  ({} pre-check / {} extraction calls)",
        dim(&stats.usage.total_input_tokens().to_string()),
        dim(&stats.usage.total_output_tokens().to_string()),
        stats.usage.precheck.calls,
        stats.usage.extraction.calls,
    );
    for page in output.flagged() {
        if let Some(ref v) = page.validation {
            eprintln!(
                "   {} page {}: expected {}, extracted {}",
                yellow("⚑"),
                page.page_num,
                v.expected_count,
                v.extracted_count
            );
        }
    }
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages: PageSelection = cli
        .pages
        .parse()
        .with_context(|| format!("Invalid --pages value '{}'", cli.pages))?;

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .pages(pages)
        .force_reprocess(cli.force)
        .ocr_trigger_ratio(cli.ocr_trigger)
        .ocr_min_elements(cli.ocr_min_elements)
        .review_min_elements(cli.review_min_elements)
        .ocr_language(cli.ocr_lang.clone())
        .image_limits(ImageLimits {
            min_dimension: cli.min_dimension,
            max_dimension: cli.max_dimension,
            max_bytes: cli.max_image_bytes,
        })
        .enhance(!cli.no_enhance)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref p) = cli.precheck_provider {
        builder = builder.precheck_provider_name(p.clone());
    }
    if let Some(ref m) = cli.precheck_model {
        builder = builder.precheck_model(m.clone());
    }
    if let Some(ref p) = cli.extraction_provider {
        builder = builder.extraction_provider_name(p.clone());
    }
    if let Some(ref m) = cli.extraction_model {
        builder = builder.extraction_model(m.clone());
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_limit_flags_reach_the_config() {
        let cli = Cli::parse_from([
            "pdf2tables",
            "--min-dimension",
            "600",
            "--max-dimension",
            "2400",
            "--max-image-bytes",
            "4194304",
            "bulletin.pdf",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.image_limits.min_dimension, 600);
        assert_eq!(config.image_limits.max_dimension, 2400);
        assert_eq!(config.image_limits.max_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn inverted_image_limits_are_rejected() {
        let cli = Cli::parse_from([
            "pdf2tables",
            "--min-dimension",
            "3000",
            "--max-dimension",
            "1000",
            "bulletin.pdf",
        ]);
        assert!(build_config(&cli, None).is_err());
    }
}
