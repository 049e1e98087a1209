//! Per-page orchestration: one rendered image in, one [`PageRecord`] out.
//!
//! ```text
//! prepare ─▶ classify ─▶ rotate ─▶ (ocr) ─▶ synthesize ─▶ extract ─▶ validate ─▶ postprocess
//!                │                                            ▲           │
//!                └─ text / empty / 0 ─▶ Skipped               └─ retry ◀──┘ (once)
//! ```
//!
//! Nothing in here returns `Err`. Every failure becomes a field of the
//! record so that one bad page never aborts its siblings.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, PageError};
use crate::model::{
    ContentType, ExtractionPayload, PageClassification, PageState, ValidationTrigger,
};
use crate::output::{PageOutcome, PageRecord, SkipReason};
use crate::pipeline::classify::Classifier;
use crate::pipeline::encode::PageImage;
use crate::pipeline::extract::Extractor;
use crate::pipeline::ocr::{fragments_to_text, sort_reading_order, OcrEngine};
use crate::pipeline::postprocess::{default_passes, run_passes, PayloadPass};
use crate::pipeline::preprocess::{correct_rotation, prepare};
use crate::pipeline::synthesize::{synthesize, Escalation};
use crate::pipeline::validate::{assess, Thresholds};
use image::DynamicImage;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a worker needs to process a page. Shared across the pool.
pub struct PageContext {
    pub classifier: Arc<dyn Classifier>,
    pub extractor: Arc<dyn Extractor>,
    /// `None` disables OCR; pages then always take the no-OCR path.
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub config: ExtractionConfig,
    thresholds: Thresholds,
    passes: Vec<Box<dyn PayloadPass>>,
}

impl PageContext {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        extractor: Arc<dyn Extractor>,
        ocr: Option<Arc<dyn OcrEngine>>,
        config: ExtractionConfig,
    ) -> Self {
        let thresholds = Thresholds::from(&config);
        let passes = default_passes(&config.compatibility_markers);
        Self {
            classifier,
            extractor,
            ocr,
            config,
            thresholds,
            passes,
        }
    }
}

/// Run the full pipeline for one page.
pub async fn process_page(ctx: &PageContext, page_num: usize, image: DynamicImage) -> PageRecord {
    let start = Instant::now();
    let mut record = run_page(ctx, page_num, image).await;
    record.duration_ms = start.elapsed().as_millis() as u64;
    record
}

async fn run_page(ctx: &PageContext, page_num: usize, image: DynamicImage) -> PageRecord {
    let cfg = &ctx.config;

    // ── Preprocess ───────────────────────────────────────────────────────
    let limits = cfg.image_limits;
    let enhance = cfg.enhance;
    let prepared = tokio::task::spawn_blocking(move || {
        let img = prepare(&image, &limits, enhance);
        PageImage::encode(page_num, &img, limits.max_bytes).map(|encoded| (img, encoded))
    })
    .await;
    let (prepared_img, mut page_image) = match prepared {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return render_failed(page_num, e.to_string()),
        Err(e) => return render_failed(page_num, format!("preprocess task panicked: {e}")),
    };

    // ── Pre-check ────────────────────────────────────────────────────────
    let classification = match ctx.classifier.classify(&page_image).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Page {}: pre-check rejected, skipping: {}", page_num, e);
            let mut record = PageRecord::skipped(page_num, SkipReason::ClassificationFailed);
            record.error = Some(PageError::ClassificationFailed {
                page: page_num,
                detail: e.to_string(),
            });
            return record;
        }
    };

    if !classification.has_extractable_content() {
        let reason = if classification.content_type == ContentType::Text {
            SkipReason::TextOnly
        } else {
            SkipReason::NoElements
        };
        info!("Page {}: {}, no extraction", page_num, reason.as_str());
        let mut record = PageRecord::skipped(page_num, reason);
        record.classification = Some(classification);
        return record;
    }

    let expected = classification.element_count;
    let mut triggers = Vec::new();

    // ── Rotation ─────────────────────────────────────────────────────────
    let mut upright = prepared_img;
    if !classification.rotation.is_none() {
        let rotated = match correct_rotation(&upright, classification.rotation) {
            Cow::Owned(rotated) => Some(rotated),
            Cow::Borrowed(_) => None,
        };
        if let Some(rotated) = rotated {
            match PageImage::encode(page_num, &rotated, limits.max_bytes) {
                Ok(encoded) => {
                    debug!(
                        "Page {}: rotated {}° clockwise",
                        page_num,
                        classification.rotation.degrees()
                    );
                    page_image = encoded;
                    upright = rotated;
                    triggers.push(ValidationTrigger::RotationCorrected);
                }
                Err(e) => warn!("Page {}: rotated image failed to encode: {}", page_num, e),
            }
        }
    }

    // ── OCR ──────────────────────────────────────────────────────────────
    let ocr_text = if expected >= cfg.ocr_min_elements {
        run_ocr(ctx, page_num, upright, limits.max_bytes).await
    } else {
        None
    };

    // ── Extraction with at most one retry ────────────────────────────────
    let attempt = Attempts::run(ctx, &classification, &page_image, ocr_text.as_deref()).await;

    let (mut payload, mut validation, attempts) = match attempt {
        Attempts::Done { payload, retried } => {
            // Once the retry is spent the verdict is terminal, even when the
            // retry itself was rejected and the first payload kept.
            let validation = assess(expected, &payload, &ctx.thresholds, retried);
            (payload, validation, if retried { 2 } else { 1 })
        }
        Attempts::Failed { error } => {
            warn!("Page {}: extraction failed twice: {}", page_num, error);
            let mut record = PageRecord::failed(
                page_num,
                PageError::ExtractionFailed {
                    page: page_num,
                    attempts: 2,
                    detail: error.to_string(),
                },
            );
            record.classification = Some(classification);
            record.ocr_used = ocr_text.is_some();
            record.extraction_attempts = 2;
            return record;
        }
    };

    // ── Post-process ─────────────────────────────────────────────────────
    validation.triggers.extend(triggers);
    validation
        .triggers
        .extend(run_passes(page_num, &mut payload, &ctx.passes));

    debug_assert!(validation.state.is_terminal());
    info!("Page {}: {}", page_num, validation);

    PageRecord {
        page_num,
        outcome: PageOutcome::from(validation.state),
        classification: Some(classification),
        payload: Some(payload),
        validation: Some(validation),
        ocr_used: ocr_text.is_some(),
        extraction_attempts: attempts,
        duration_ms: 0,
        error: None,
    }
}

fn render_failed(page_num: usize, detail: String) -> PageRecord {
    warn!("Page {}: preprocessing failed: {}", page_num, detail);
    PageRecord::failed(
        page_num,
        PageError::RenderFailed {
            page: page_num,
            detail,
        },
    )
}

/// OCR text in reading order, or `None` when OCR is off, fails or finds
/// nothing. Never fatal.
///
/// The engine sees a grayscale copy of the upright page; the models keep
/// the colour image.
async fn run_ocr(
    ctx: &PageContext,
    page_num: usize,
    upright: DynamicImage,
    max_bytes: usize,
) -> Option<String> {
    let engine = ctx.ocr.as_ref()?;
    let gray = tokio::task::spawn_blocking(move || {
        PageImage::encode(page_num, &upright.grayscale(), max_bytes)
    })
    .await;
    let page = match gray {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => {
            warn!("Page {}: OCR input failed to encode, continuing without: {}", page_num, e);
            return None;
        }
        Err(e) => {
            warn!("Page {}: OCR input task panicked: {}", page_num, e);
            return None;
        }
    };

    match engine.recognize(&page).await {
        Ok(mut fragments) => {
            sort_reading_order(&mut fragments);
            let text = fragments_to_text(&fragments);
            debug!("Page {}: OCR produced {} fragments", page_num, fragments.len());
            (!text.trim().is_empty()).then_some(text)
        }
        Err(e) => {
            warn!("Page {}: OCR unavailable, continuing without: {}", page_num, e);
            None
        }
    }
}

/// Outcome of the extraction loop.
enum Attempts {
    Done {
        payload: ExtractionPayload,
        retried: bool,
    },
    Failed {
        error: ExtractionError,
    },
}

impl Attempts {
    async fn run(
        ctx: &PageContext,
        classification: &PageClassification,
        page: &PageImage,
        ocr_text: Option<&str>,
    ) -> Self {
        let expected = classification.element_count;
        let initial = synthesize(classification, ocr_text, Escalation::Initial);

        let first = match ctx.extractor.extract(page, &initial).await {
            Ok(payload) => {
                let verdict = assess(expected, &payload, &ctx.thresholds, false);
                if verdict.state != PageState::RetryPending {
                    return Attempts::Done {
                        payload,
                        retried: false,
                    };
                }
                info!(
                    "Page {}: {:.0}% empty cells, retrying with escalated prompt",
                    page.page_num,
                    verdict.empty_cell_ratio * 100.0
                );
                Some(payload)
            }
            Err(e) => {
                warn!("Page {}: extraction rejected, retrying: {}", page.page_num, e);
                None
            }
        };

        let retry = synthesize(classification, ocr_text, Escalation::Retry);
        match (ctx.extractor.extract(page, &retry).await, first) {
            (Ok(payload), _) => Attempts::Done {
                payload,
                retried: true,
            },
            (Err(e), Some(payload)) => {
                warn!(
                    "Page {}: retry rejected, keeping first answer: {}",
                    page.page_num, e
                );
                Attempts::Done {
                    payload,
                    retried: true,
                }
            }
            (Err(error), None) => Attempts::Failed { error },
        }
    }
}
