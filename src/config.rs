//! Configuration types for table and chart extraction.
//!
//! All behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across the worker pool and to log exactly which
//! thresholds produced a given batch.
//!
//! # Two model tiers
//! Every page costs one pre-check call and one or two extraction calls. The
//! pre-check only needs to count and describe elements, so it runs on a
//! cheaper [`ModelTier`] than extraction. Each tier resolves its provider
//! independently (see [`crate::run`]).

use crate::error::Pdf2TablesError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default model for the pre-check tier.
pub const DEFAULT_PRECHECK_MODEL: &str = "gpt-4.1-nano";
/// Default model for the extraction tier.
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4.1";

/// Configuration for one extraction batch.
///
/// # Example
/// ```rust
/// use edgequake_pdf2tables::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .extraction_model("gpt-4.1")
///     .ocr_trigger_ratio(0.25)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    ///
    /// Scientific tables use small fonts and superscripts; 200 DPI keeps
    /// them legible before the preprocessor resizes the image.
    pub dpi: u32,

    /// Number of pages processed concurrently. Default: 6.
    ///
    /// Each page makes two or three sequential model calls, so the pool
    /// bounds in-flight requests to roughly this number. Lower it on `429`s.
    pub concurrency: usize,

    /// Cheap tier used for the pre-check classification.
    pub precheck: ModelTier,

    /// Primary tier used for extraction.
    pub extraction: ModelTier,

    /// Sampling temperature for both tiers. Default: 0.0.
    pub temperature: f32,

    /// Output token cap for extraction calls. Default: 8192.
    ///
    /// A dense compatibility matrix rendered as HTML easily exceeds 4 000 tokens.
    pub max_tokens: usize,

    /// Output token cap for pre-check calls. Default: 1024.
    pub precheck_max_tokens: usize,

    /// Transport retries per model call on a provider error. Default: 2.
    ///
    /// These cover network and 5xx failures only. A response that arrives but
    /// cannot be parsed is handled by the page state machine, not here.
    pub max_retries: u32,

    /// Initial transport retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Re-run pages whose artifacts already exist. Default: false.
    pub force_reprocess: bool,

    /// Empty-cell ratio above which the OCR-augmented retry fires. Default: 0.30.
    pub ocr_trigger_ratio: f64,

    /// Minimum expected element count for OCR to run. Default: 2.
    pub ocr_min_elements: usize,

    /// Minimum expected element count for a count mismatch to be flagged for
    /// manual review. Default: 3 (i.e. more than two elements).
    pub review_min_elements: usize,

    /// Image size bounds applied before any model sees the page.
    pub image_limits: ImageLimits,

    /// Apply contrast and sharpening before encoding. Default: true.
    pub enhance: bool,

    /// Tesseract language code(s), e.g. `"por+eng"`. Default: `"eng"`.
    pub ocr_language: String,

    /// Case-insensitive title markers identifying compatibility matrices.
    pub compatibility_markers: Vec<String>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            concurrency: 6,
            precheck: ModelTier::default(),
            extraction: ModelTier::default(),
            temperature: 0.0,
            max_tokens: 8192,
            precheck_max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            pages: PageSelection::default(),
            force_reprocess: false,
            ocr_trigger_ratio: 0.30,
            ocr_min_elements: 2,
            review_min_elements: 3,
            image_limits: ImageLimits::default(),
            enhance: true,
            ocr_language: "eng".to_string(),
            compatibility_markers: default_compatibility_markers(),
            progress_callback: None,
        }
    }
}

fn default_compatibility_markers() -> Vec<String> {
    ["compatib", "mistura", "mixture"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("precheck", &self.precheck)
            .field("extraction", &self.extraction)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("pages", &self.pages)
            .field("force_reprocess", &self.force_reprocess)
            .field("ocr_trigger_ratio", &self.ocr_trigger_ratio)
            .field("ocr_min_elements", &self.ocr_min_elements)
            .field("review_min_elements", &self.review_min_elements)
            .field("image_limits", &self.image_limits)
            .field("enhance", &self.enhance)
            .field("ocr_language", &self.ocr_language)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn precheck_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.precheck.provider_name = Some(name.into());
        self
    }

    pub fn precheck_model(mut self, model: impl Into<String>) -> Self {
        self.config.precheck.model = Some(model.into());
        self
    }

    pub fn precheck_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.precheck.provider = Some(provider);
        self
    }

    pub fn extraction_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.extraction.provider_name = Some(name.into());
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction.model = Some(model.into());
        self
    }

    pub fn extraction_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.extraction.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn precheck_max_tokens(mut self, n: usize) -> Self {
        self.config.precheck_max_tokens = n;
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

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn force_reprocess(mut self, v: bool) -> Self {
        self.config.force_reprocess = v;
        self
    }

    pub fn ocr_trigger_ratio(mut self, ratio: f64) -> Self {
        self.config.ocr_trigger_ratio = ratio;
        self
    }

    pub fn ocr_min_elements(mut self, n: usize) -> Self {
        self.config.ocr_min_elements = n;
        self
    }

    pub fn review_min_elements(mut self, n: usize) -> Self {
        self.config.review_min_elements = n;
        self
    }

    pub fn image_limits(mut self, limits: ImageLimits) -> Self {
        self.config.image_limits = limits;
        self
    }

    pub fn enhance(mut self, v: bool) -> Self {
        self.config.enhance = v;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn compatibility_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.compatibility_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2TablesError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.ocr_trigger_ratio) || c.ocr_trigger_ratio.is_nan() {
            return Err(Pdf2TablesError::InvalidConfig(format!(
                "OCR trigger ratio must be within 0.0–1.0, got {}",
                c.ocr_trigger_ratio
            )));
        }
        c.image_limits.validate()?;
        if c.ocr_language.trim().is_empty() {
            return Err(Pdf2TablesError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Model tier ───────────────────────────────────────────────────────────

/// Which provider and model serve one tier.
///
/// Resolution order: `provider` → `provider_name` + `model` → environment.
#[derive(Clone, Default)]
pub struct ModelTier {
    /// Provider name (e.g. "openai", "anthropic", "azure", "openrouter").
    pub provider_name: Option<String>,
    /// Model identifier. `None` uses the tier default.
    pub model: Option<String>,
    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,
}

impl fmt::Debug for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelTier")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

// ── Image limits ─────────────────────────────────────────────────────────

/// Size bounds for page images sent to the models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageLimits {
    /// The shorter side is upscaled to at least this many pixels. Default: 800.
    pub min_dimension: u32,
    /// The longer side is downscaled to at most this many pixels. Default: 3000.
    pub max_dimension: u32,
    /// Encoded PNG size cap in bytes. Default: 15 MiB.
    pub max_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            min_dimension: 800,
            max_dimension: 3000,
            max_bytes: 15 * 1024 * 1024,
        }
    }
}

impl ImageLimits {
    fn validate(&self) -> Result<(), Pdf2TablesError> {
        if self.min_dimension == 0 || self.max_dimension < self.min_dimension {
            return Err(Pdf2TablesError::InvalidConfig(format!(
                "image limits need 0 < min_dimension ≤ max_dimension, got {}/{}",
                self.min_dimension, self.max_dimension
            )));
        }
        if self.max_bytes < 64 * 1024 {
            return Err(Pdf2TablesError::InvalidConfig(format!(
                "max image bytes must be at least 64 KiB, got {}",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages and ranges (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let (lo, hi) = if start <= end {
                    (*start, *end)
                } else {
                    (*end, *start)
                };
                let s = lo.max(1) - 1;
                let e = hi.min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl FromStr for PageSelection {
    type Err = Pdf2TablesError;

    /// Parse `all`, `5`, `3-15` or `1,3,10-12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s.is_empty() || s == "all" {
            return Ok(PageSelection::All);
        }

        let parse_page = |p: &str| -> Result<usize, Pdf2TablesError> {
            let n: usize = p.trim().parse().map_err(|_| {
                Pdf2TablesError::InvalidConfig(format!("Invalid page number: '{}'", p.trim()))
            })?;
            if n < 1 {
                return Err(Pdf2TablesError::InvalidConfig(
                    "Pages are 1-indexed, minimum is 1".into(),
                ));
            }
            Ok(n)
        };

        let mut pages = Vec::new();
        let parts: Vec<&str> = s.split(',').filter(|p| !p.trim().is_empty()).collect();
        for part in &parts {
            if let Some((a, b)) = part.split_once('-') {
                let (a, b) = (parse_page(a)?, parse_page(b)?);
                if parts.len() == 1 {
                    return Ok(PageSelection::Range(a, b));
                }
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                pages.extend(lo..=hi);
            } else {
                pages.push(parse_page(part)?);
            }
        }

        match pages.as_slice() {
            [] => Ok(PageSelection::All),
            [single] if parts.len() == 1 => Ok(PageSelection::Single(*single)),
            _ => Ok(PageSelection::Set(pages)),
        }
    }
}
