//! Batch entry points: resolve, render, fan out to the worker pool, join.
//!
//! ## Why a join barrier?
//!
//! Pages are independent, so they run on a bounded pool
//! (`buffer_unordered(concurrency)`) and finish in any order. Anything that
//! needs the whole batch (the sorted page list, the stats, `summary.html`)
//! waits until the stream is drained. Use [`crate::stream::extract_stream`]
//! instead to receive pages as they complete.

use crate::config::{ExtractionConfig, ModelTier, DEFAULT_EXTRACTION_MODEL, DEFAULT_PRECHECK_MODEL};
use crate::error::{PageError, Pdf2TablesError};
use crate::output::{BatchOutput, BatchStats, DocumentMetadata, PageOutcome, PageRecord, SkipReason};
use crate::page::{process_page, PageContext};
use crate::persist;
use crate::progress::ExtractionProgressCallback;
use crate::pipeline::classify::LlmClassifier;
use crate::pipeline::extract::LlmExtractor;
use crate::pipeline::llm::VisionModel;
use crate::pipeline::ocr::{OcrEngine, TesseractOcr};
use crate::pipeline::{input, render};
use crate::usage::{Tier, UsageMeter};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract every table and chart from a PDF file or URL.
///
/// When `output_dir` is set, each page's artifacts are written as soon as
/// the page finishes, pages already checkpointed there are skipped (unless
/// `force_reprocess`), and `summary.html` is merged after the barrier.
///
/// # Errors
/// Only fatal errors: unreadable input, corrupt PDF, no selected page in
/// range, unconfigured provider, or an unwritable summary. Per-page
/// failures are recorded in [`PageRecord::error`].
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
    output_dir: Option<&Path>,
) -> Result<BatchOutput, Pdf2TablesError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input and providers ──────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    let usage = Arc::new(UsageMeter::new());
    let ctx = Arc::new(build_context(config, Arc::clone(&usage))?);

    // ── Step 2: Metadata and page selection ──────────────────────────────
    let metadata = render::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    let total_pages = metadata.page_count;
    let page_indices = config.pages.to_indices(total_pages);
    if page_indices.is_empty() {
        return Err(Pdf2TablesError::PageOutOfRange { total: total_pages });
    }
    debug!("Selected {} of {} pages", page_indices.len(), total_pages);

    // ── Step 3: Checkpoints ──────────────────────────────────────────────
    let (to_render, checkpointed) = split_checkpointed(&page_indices, config, output_dir);
    if !checkpointed.is_empty() {
        info!("{} pages already processed, skipping", checkpointed.len());
    }

    // ── Step 4: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = if to_render.is_empty() {
        Vec::new()
    } else {
        render::render_pages(&pdf_path, config, &to_render).await?
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    let mut images = Vec::with_capacity(rendered.len());
    let mut failed = Vec::new();
    for (idx, result) in rendered {
        match result {
            Ok(img) => images.push((idx + 1, img)),
            Err(detail) => failed.push(PageRecord::failed(
                idx + 1,
                PageError::RenderFailed {
                    page: idx + 1,
                    detail,
                },
            )),
        }
    }

    // ── Step 5: Worker pool and join barrier ─────────────────────────────
    let selected = page_indices.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(selected);
        for record in &checkpointed {
            cb.on_page_skipped(record.page_num, selected, SkipReason::Checkpointed.as_str());
        }
        for record in &failed {
            if let Some(ref e) = record.error {
                cb.on_page_error(record.page_num, selected, &e.to_string());
            }
        }
    }

    let mut pages = run_batch(ctx, images, selected, output_dir).await;
    pages.extend(checkpointed);
    pages.extend(failed);
    pages.sort_by_key(|p| p.page_num);

    // ── Step 6: Summary and stats ────────────────────────────────────────
    if let Some(dir) = output_dir {
        persist::write_summary(dir, &pages)
            .await
            .map_err(|e| Pdf2TablesError::OutputWriteFailed {
                path: dir.join(persist::SUMMARY_FILE),
                source: e,
            })?;
    }

    let mut stats = BatchStats::tally(total_pages, &pages);
    stats.usage = usage.snapshot();
    stats.render_duration_ms = render_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {} validated, {} flagged, {} skipped, {} failed in {}ms",
        stats.validated_pages,
        stats.flagged_pages,
        stats.skipped_pages,
        stats.failed_pages,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(selected, stats.validated_pages, stats.flagged_pages);
    }

    Ok(BatchOutput {
        source: input_str.to_string(),
        metadata,
        pages,
        stats,
    })
}

/// Run the per-page pipeline over already-rendered pages.
///
/// `pages` holds `(page_num, image)` with 1-indexed page numbers. At most
/// `ctx.config.concurrency` pages are in flight. Returns once every page
/// has a record (the join barrier), in completion order.
pub async fn run_batch(
    ctx: Arc<PageContext>,
    pages: Vec<(usize, DynamicImage)>,
    total_pages: usize,
    output_dir: Option<&Path>,
) -> Vec<PageRecord> {
    let concurrency = ctx.config.concurrency.max(1);
    let output_dir: Option<PathBuf> = output_dir.map(Path::to_path_buf);

    stream::iter(pages.into_iter().map(|(page_num, image)| {
        let ctx = Arc::clone(&ctx);
        let output_dir = output_dir.clone();
        async move {
            let cb = ctx.config.progress_callback.clone();
            if let Some(ref cb) = cb {
                cb.on_page_start(page_num, total_pages);
            }

            let mut record = process_page(&ctx, page_num, image).await;

            if let Some(ref dir) = output_dir {
                if let Err(e) = persist::write_page(dir, &record).await {
                    warn!("Page {}: could not write artifacts: {}", page_num, e);
                    if record.error.is_none() {
                        record.error = Some(PageError::PersistFailed {
                            page: page_num,
                            detail: e.to_string(),
                        });
                    }
                }
            }

            if let Some(ref cb) = cb {
                report(cb.as_ref(), &record, total_pages);
            }
            record
        }
    }))
    .buffer_unordered(concurrency)
    .collect()
    .await
}

fn report(cb: &dyn ExtractionProgressCallback, record: &PageRecord, total: usize) {
    match (&record.outcome, &record.validation) {
        (PageOutcome::Skipped(reason), _) => cb.on_page_skipped(record.page_num, total, reason.as_str()),
        (PageOutcome::Failed, _) => {
            let msg = record
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            cb.on_page_error(record.page_num, total, &msg);
        }
        (_, Some(v)) => cb.on_page_complete(record.page_num, total, v.state, v.extracted_count),
        (_, None) => {}
    }
}

/// Split selected indices into pages to render and checkpoint records.
fn split_checkpointed(
    page_indices: &[usize],
    config: &ExtractionConfig,
    output_dir: Option<&Path>,
) -> (Vec<usize>, Vec<PageRecord>) {
    match output_dir {
        Some(dir) if !config.force_reprocess => {
            let (done, todo): (Vec<usize>, Vec<usize>) = page_indices
                .iter()
                .partition(|&&idx| persist::is_checkpointed(dir, idx + 1));
            let records = done
                .into_iter()
                .map(|idx| PageRecord::skipped(idx + 1, SkipReason::Checkpointed))
                .collect();
            (todo, records)
        }
        _ => (page_indices.to_vec(), Vec::new()),
    }
}

/// Synchronous wrapper around [`extract`]. Creates a temporary runtime.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
    output_dir: Option<&Path>,
) -> Result<BatchOutput, Pdf2TablesError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2TablesError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config, output_dir))
}

/// Extract from PDF bytes in memory. The bytes go to a managed temp file
/// that is removed when this returns.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
    output_dir: Option<&Path>,
) -> Result<BatchOutput, Pdf2TablesError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| Pdf2TablesError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Pdf2TablesError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    extract(&path, config, output_dir).await
}

/// Read PDF metadata without rendering or calling any model.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<DocumentMetadata, Pdf2TablesError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    render::extract_metadata(resolved.path(), config.password.as_deref()).await
}

// ── Context and providers ────────────────────────────────────────────────

/// Build the production page context: LLM-backed classifier and extractor
/// plus Tesseract OCR.
pub fn build_context(
    config: &ExtractionConfig,
    usage: Arc<UsageMeter>,
) -> Result<PageContext, Pdf2TablesError> {
    let precheck = resolve_provider(&config.precheck, "pre-check", DEFAULT_PRECHECK_MODEL)?;
    let extraction = resolve_provider(&config.extraction, "extraction", DEFAULT_EXTRACTION_MODEL)?;
    debug!(
        "Model tiers resolved: pre-check {:?}, extraction {:?}",
        config.precheck.model.as_deref().unwrap_or(DEFAULT_PRECHECK_MODEL),
        config.extraction.model.as_deref().unwrap_or(DEFAULT_EXTRACTION_MODEL)
    );

    let classifier = LlmClassifier::new(VisionModel::new(
        precheck,
        Tier::Precheck,
        config,
        Arc::clone(&usage),
    ));
    let extractor = LlmExtractor::new(VisionModel::new(extraction, Tier::Extraction, config, usage));
    let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractOcr::new(config.ocr_language.clone()));

    Ok(PageContext::new(
        Arc::new(classifier),
        Arc::new(extractor),
        Some(ocr),
        config.clone(),
    ))
}

fn create_vision_provider(
    tier: &'static str,
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2TablesError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2TablesError::ProviderNotConfigured {
            tier,
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve one tier's provider, from most to least specific:
///
/// 1. **Pre-built provider** (`tier.provider`), used as-is.
/// 2. **Named provider** (`tier.provider_name`) with `tier.model` or the
///    tier default.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
///    The env model only replaces the tier default; an explicit
///    `tier.model` still wins, so the two tiers can differ.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
fn resolve_provider(
    tier: &ModelTier,
    tier_name: &'static str,
    default_model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2TablesError> {
    if let Some(ref provider) = tier.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = tier.provider_name {
        let model = tier.model.as_deref().unwrap_or(default_model);
        return create_vision_provider(tier_name, name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            let model = tier.model.as_deref().unwrap_or(&env_model);
            return create_vision_provider(tier_name, &prov, model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = tier.model.as_deref().unwrap_or(default_model);
            return create_vision_provider(tier_name, "openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2TablesError::ProviderNotConfigured {
            tier: tier_name,
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpointed_pages_are_split_off() {
        let dir = tempfile::tempdir().unwrap();
        let page2 = persist::page_dir(dir.path(), 2);
        std::fs::create_dir_all(&page2).unwrap();
        std::fs::write(page2.join(persist::PAGE_RECORD_FILE), "{}").unwrap();

        let config = ExtractionConfig::default();
        let (todo, done) = split_checkpointed(&[0, 1, 2], &config, Some(dir.path()));
        assert_eq!(todo, vec![0, 2]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].page_num, 2);
        assert_eq!(done[0].outcome, PageOutcome::Skipped(SkipReason::Checkpointed));
    }

    #[test]
    fn force_reprocess_ignores_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let page1 = persist::page_dir(dir.path(), 1);
        std::fs::create_dir_all(&page1).unwrap();
        std::fs::write(page1.join(persist::PAGE_RECORD_FILE), "{}").unwrap();

        let config = ExtractionConfig::builder().force_reprocess(true).build().unwrap();
        let (todo, done) = split_checkpointed(&[0, 1], &config, Some(dir.path()));
        assert_eq!(todo, vec![0, 1]);
        assert!(done.is_empty());
    }

    #[test]
    fn no_output_dir_means_no_checkpoints() {
        let (todo, done) = split_checkpointed(&[3], &ExtractionConfig::default(), None);
        assert_eq!(todo, vec![3]);
        assert!(done.is_empty());
    }
}
