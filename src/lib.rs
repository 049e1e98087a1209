//! # edgequake-pdf2tables
//!
//! Extract tables and chart data from scientific PDFs using Vision Language
//! Models (VLMs).
//!
//! ## Why this crate?
//!
//! Agricultural and laboratory bulletins publish their results as dense,
//! often scanned, sometimes rotated tables and scatter plots with fitted
//! curves. Text extraction loses the grid. Here each page is rasterised and
//! read by a vision model, guided by a cheap pre-check that tells the
//! extractor how many elements to expect and what they look like. The result
//! is validated against that expectation, retried once with OCR text when it
//! comes back sparse, and flagged for a human when the counts disagree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       resolve local file or download from URL
//!  ├─ 2. Render      rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Pre-check   cheap model: content type, element count, rotation
//!  ├─ 4. Rotate/OCR  fix orientation; Tesseract on dense pages
//!  ├─ 5. Extract     primary model, prompt synthesised per element
//!  ├─ 6. Validate    Validated | RetryPending | ManualReviewFlagged
//!  └─ 7. Persist     per-page HTML/JSON artifacts + merged summary.html
//! ```
//!
//! Pages run on a bounded worker pool (default 6) and join at a barrier
//! before the summary is written.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2tables::{extract, ExtractionConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Providers auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let output = extract("bulletin.pdf", &config, Some(Path::new("out"))).await?;
//!     for page in output.flagged() {
//!         eprintln!("page {} needs review", page.page_num);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2tables` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2tables = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! OCR shells out to `tesseract`. When it is missing, dense pages are
//! extracted without OCR text and a warning is logged.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod page;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod stream;
pub mod usage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, ImageLimits, ModelTier, PageSelection,
    DEFAULT_EXTRACTION_MODEL, DEFAULT_PRECHECK_MODEL,
};
pub use error::{ClassificationError, ExtractionError, OcrError, PageError, Pdf2TablesError};
pub use model::{
    CellContentType, ChartData, ChartType, ContentType, ElementDescriptor, ElementKind,
    ElementStructure, Equation, ExtractedElement, ExtractionPayload, PageClassification,
    PageState, PayloadKind, QuadraticOptimum, Rotation, Series, TableStructure,
    ValidationResult, ValidationTrigger,
};
pub use output::{BatchOutput, BatchStats, DocumentMetadata, PageOutcome, PageRecord, SkipReason};
pub use page::{process_page, PageContext};
pub use pipeline::classify::Classifier;
pub use pipeline::encode::PageImage;
pub use pipeline::extract::Extractor;
pub use pipeline::ocr::{BoundingBox, OcrEngine, OcrFragment};
pub use pipeline::synthesize::ExtractionPrompt;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{build_context, extract, extract_from_bytes, extract_sync, inspect, run_batch};
pub use stream::{extract_stream, extract_stream_from_bytes, PageStream};
pub use usage::{TierUsage, UsageSnapshot};
