//! Pipeline integration tests with scripted model backends.
//!
//! The classifier, extractor and OCR engine are replaced by fakes that
//! count their calls and answer from a script, so the per-page state
//! machine, the worker pool and persistence run without network access or
//! a pdfium library.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_pdf2tables::persist;
use edgequake_pdf2tables::{
    process_page, run_batch, BoundingBox, ClassificationError, Classifier, ContentType,
    ElementDescriptor, ElementKind, ElementStructure, ExtractedElement, ExtractionConfig,
    ExtractionError, ExtractionPayload, ExtractionPrompt, Extractor, OcrEngine, OcrError,
    OcrFragment, PageClassification, PageContext, PageError, PageImage, PageOutcome, PageState,
    PayloadKind, Rotation, SkipReason, ValidationTrigger,
};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fixtures ─────────────────────────────────────────────────────────────────

const FULL: &str = "<table><tr><th>Dose</th><th>Yield</th></tr>\
                    <tr><td>0</td><td>2.1</td></tr><tr><td>40</td><td>3.4</td></tr></table>";

// 2 of 4 body cells empty.
const SPARSE: &str = "<table><tr><th>Dose</th><th>Yield</th></tr>\
                      <tr><td>0</td><td></td></tr><tr><td></td><td>3.4</td></tr></table>";

const MATRIX: &str = "<table><tr><th></th><th>Urea</th><th>KCl</th><th>MAP</th></tr>\
                      <tr><td>Urea</td><td>C</td><td>L</td><td>I</td></tr>\
                      <tr><td>KCl</td><td>L</td><td>C</td><td>C</td></tr>\
                      <tr><td>MAP</td><td>I</td><td>C</td><td>C</td></tr></table>";

fn page_image() -> DynamicImage {
    DynamicImage::new_rgb8(400, 560)
}

fn classification(content_type: ContentType, count: usize) -> PageClassification {
    PageClassification {
        content_type,
        element_count: count,
        rotation: Rotation::None,
        elements: Vec::new(),
        notes: None,
        legend_text: None,
    }
}

fn tables(htmls: &[&str]) -> ExtractionPayload {
    ExtractionPayload {
        kind: PayloadKind::TableSet,
        elements: htmls
            .iter()
            .enumerate()
            .map(|(i, html)| ExtractedElement {
                title: format!("Table {}", i + 1),
                structure: Some(ElementStructure::Table {
                    html: html.to_string(),
                }),
                notes: None,
            })
            .collect(),
    }
}

// ── Fakes ────────────────────────────────────────────────────────────────────

type ClassifyFn = dyn Fn(usize) -> Result<PageClassification, ClassificationError> + Send + Sync;
type ExtractFn =
    dyn Fn(usize, &ExtractionPrompt, usize) -> Result<ExtractionPayload, ExtractionError> + Send + Sync;

struct FakeClassifier {
    script: Box<ClassifyFn>,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn new(f: impl Fn(usize) -> Result<PageClassification, ClassificationError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(f),
            calls: AtomicUsize::new(0),
        })
    }

    fn always(c: PageClassification) -> Arc<Self> {
        Self::new(move |_| Ok(c.clone()))
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, page: &PageImage) -> Result<PageClassification, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(page.page_num)
    }
}

/// Answers from a script keyed by page number and per-page call index.
/// Records every prompt and the peak number of concurrent calls.
struct FakeExtractor {
    script: Box<ExtractFn>,
    calls: AtomicUsize,
    per_page: Mutex<std::collections::HashMap<usize, usize>>,
    prompts: Mutex<Vec<(usize, ExtractionPrompt)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl FakeExtractor {
    fn new(
        f: impl Fn(usize, &ExtractionPrompt, usize) -> Result<ExtractionPayload, ExtractionError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, f)
    }

    fn with_delay(
        delay: Duration,
        f: impl Fn(usize, &ExtractionPrompt, usize) -> Result<ExtractionPayload, ExtractionError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(f),
            calls: AtomicUsize::new(0),
            per_page: Mutex::new(Default::default()),
            prompts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        })
    }

    fn prompts_for(&self, page: usize) -> Vec<ExtractionPrompt> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        page: &PageImage,
        prompt: &ExtractionPrompt,
    ) -> Result<ExtractionPayload, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let attempt = {
            let mut m = self.per_page.lock().unwrap();
            let n = m.entry(page.page_num).or_insert(0);
            *n += 1;
            *n
        };
        self.prompts
            .lock()
            .unwrap()
            .push((page.page_num, prompt.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.script)(page.page_num, prompt, attempt)
    }
}

struct FakeOcr {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeOcr {
    fn working() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, _page: &PageImage) -> Result<Vec<OcrFragment>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(OcrError::Unavailable("tesseract".into()));
        }
        // Deliberately out of reading order.
        Ok(vec![
            OcrFragment {
                text: "40 3,4".into(),
                bbox: BoundingBox { x: 10, y: 200, width: 80, height: 20 },
            },
            OcrFragment {
                text: "Dose Yield".into(),
                bbox: BoundingBox { x: 10, y: 20, width: 80, height: 20 },
            },
        ])
    }
}

fn context(
    classifier: Arc<FakeClassifier>,
    extractor: Arc<FakeExtractor>,
    ocr: Option<Arc<FakeOcr>>,
    config: ExtractionConfig,
) -> PageContext {
    PageContext::new(
        classifier,
        extractor,
        ocr.map(|o| o as Arc<dyn OcrEngine>),
        config,
    )
}

// ── Single page ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_clean_table_is_validated_without_ocr() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[FULL])));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier.clone(),
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 1, page_image()).await;

    assert_eq!(record.outcome, PageOutcome::Validated);
    assert!(record.error.is_none());
    assert_eq!(record.extraction_attempts, 1);
    assert!(!record.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    let v = record.validation.expect("validation");
    assert_eq!(v.state, PageState::Validated);
    assert_eq!((v.expected_count, v.extracted_count), (1, 1));
    assert!(v.triggers.is_empty());

    let prompts = extractor.prompts_for(1);
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].is_multi_element());
    assert!(prompts[0].ocr_text.is_none());
}

#[tokio::test]
async fn rotated_dense_page_uses_ocr_and_is_flagged_on_count_mismatch() {
    let mut c = classification(ContentType::Mixed, 3);
    c.rotation = Rotation::Cw180;
    c.elements = vec![
        ElementDescriptor::of_kind(ElementKind::Table),
        ElementDescriptor::of_kind(ElementKind::Table),
        ElementDescriptor::of_kind(ElementKind::Chart),
    ];
    let classifier = FakeClassifier::always(c);
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[FULL, FULL])));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 7, page_image()).await;

    assert_eq!(record.outcome, PageOutcome::ManualReviewFlagged);
    assert!(record.is_flagged());
    assert!(record.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    let v = record.validation.expect("validation");
    assert_eq!((v.expected_count, v.extracted_count), (3, 2));
    assert!(v.has(ValidationTrigger::RotationCorrected));
    assert!(v.has(ValidationTrigger::NeedsManualReview));

    let prompt = &extractor.prompts_for(7)[0];
    assert_eq!(prompt.segments.len(), 3);
    assert_eq!(prompt.segments[2].kind, ElementKind::Chart);
    let rendered = prompt.render();
    assert!(rendered.contains("Element 3 of 3"));

    // OCR fragments reach the prompt in reading order.
    let ocr_text = prompt.ocr_text.as_deref().expect("ocr text attached");
    let header = ocr_text.find("Dose Yield").expect("header line");
    let row = ocr_text.find("40 3,4").expect("data line");
    assert!(header < row);
}

#[tokio::test]
async fn sparse_table_is_retried_exactly_once() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[SPARSE])));
    let ctx = context(classifier, extractor.clone(), None, ExtractionConfig::default());

    let record = process_page(&ctx, 2, page_image()).await;

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(record.extraction_attempts, 2);
    assert_eq!(record.outcome, PageOutcome::Validated);

    let v = record.validation.expect("validation");
    assert!(v.state.is_terminal());
    assert!(v.has(ValidationTrigger::NeedsOcrRetry));
    assert!((v.empty_cell_ratio - 0.5).abs() < 1e-9);

    let prompts = extractor.prompts_for(2);
    assert_ne!(prompts[0], prompts[1]);
    assert!(prompts[1].render().contains("exactly one entry"));
}

#[tokio::test]
async fn single_element_retry_never_runs_ocr() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[SPARSE])));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 3, page_image()).await;

    assert_eq!(record.extraction_attempts, 2);
    assert!(!record.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    let prompts = extractor.prompts_for(3);
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| p.ocr_text.is_none()));
}

#[tokio::test]
async fn multi_element_retry_reuses_ocr_text() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 2));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[SPARSE, SPARSE])));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 5, page_image()).await;

    assert_eq!(record.extraction_attempts, 2);
    assert!(record.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    let prompts = extractor.prompts_for(5);
    assert_eq!(prompts.len(), 2);
    let first = prompts[0].ocr_text.as_deref().expect("ocr text on first attempt");
    let retry = prompts[1].ocr_text.as_deref().expect("ocr text on retry");
    assert_eq!(first, retry);
    assert!(retry.contains("Dose Yield"));
}

#[tokio::test]
async fn retry_that_fills_the_table_clears_the_sparse_trigger() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, attempt| {
        Ok(tables(&[if attempt == 1 { SPARSE } else { FULL }]))
    });
    let ctx = context(classifier, extractor.clone(), None, ExtractionConfig::default());

    let record = process_page(&ctx, 1, page_image()).await;

    let v = record.validation.expect("validation");
    assert_eq!(v.state, PageState::Validated);
    assert_eq!(v.empty_cell_ratio, 0.0);
    assert!(!v.has(ValidationTrigger::NeedsOcrRetry));
    assert_eq!(record.extraction_attempts, 2);
}

#[tokio::test]
async fn unparseable_first_answer_is_retried() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, attempt| {
        if attempt == 1 {
            Err(ExtractionError::NotJson("Here is the table you asked for".into()))
        } else {
            Ok(tables(&[FULL]))
        }
    });
    let ctx = context(classifier, extractor.clone(), None, ExtractionConfig::default());

    let record = process_page(&ctx, 1, page_image()).await;

    assert_eq!(record.outcome, PageOutcome::Validated);
    assert_eq!(record.extraction_attempts, 2);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn two_rejected_answers_fail_the_page() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 2));
    let extractor =
        FakeExtractor::new(|_, _, _| Err(ExtractionError::MissingKey("elements")));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 4, page_image()).await;

    assert_eq!(record.outcome, PageOutcome::Failed);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1, "OCR runs once, not per attempt");
    assert!(record.payload.is_none());
    match record.error {
        Some(PageError::ExtractionFailed { page, attempts, .. }) => {
            assert_eq!((page, attempts), (4, 2));
        }
        other => panic!("expected ExtractionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn broken_ocr_does_not_block_extraction() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 2));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[FULL, FULL])));
    let ocr = FakeOcr::broken();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let record = process_page(&ctx, 1, page_image()).await;

    assert_eq!(record.outcome, PageOutcome::Validated);
    assert!(!record.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert!(extractor.prompts_for(1)[0].ocr_text.is_none());
}

#[test]
fn classification_failure_skips_the_page() {
    let classifier =
        FakeClassifier::new(|_| Err(ClassificationError::MissingField("element_count")));
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[FULL])));
    let ctx = context(classifier, extractor.clone(), None, ExtractionConfig::default());

    // Plain runtime from tokio-test: the orchestrator needs nothing beyond
    // spawn_blocking and timers.
    let record = tokio_test::block_on(process_page(&ctx, 9, page_image()));

    assert_eq!(
        record.outcome,
        PageOutcome::Skipped(SkipReason::ClassificationFailed)
    );
    assert!(matches!(
        record.error,
        Some(PageError::ClassificationFailed { page: 9, .. })
    ));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn text_and_empty_pages_short_circuit() {
    let classifier = FakeClassifier::new(|page| {
        Ok(match page {
            1 => classification(ContentType::Text, 0),
            2 => classification(ContentType::Empty, 0),
            _ => classification(ContentType::Table, 0),
        })
    });
    let extractor = FakeExtractor::new(|_, _, _| Ok(tables(&[FULL])));
    let ocr = FakeOcr::working();
    let ctx = context(
        classifier,
        extractor.clone(),
        Some(ocr.clone()),
        ExtractionConfig::default(),
    );

    let text = process_page(&ctx, 1, page_image()).await;
    let empty = process_page(&ctx, 2, page_image()).await;
    let zero = process_page(&ctx, 3, page_image()).await;

    assert_eq!(text.outcome, PageOutcome::Skipped(SkipReason::TextOnly));
    assert_eq!(empty.outcome, PageOutcome::Skipped(SkipReason::NoElements));
    assert_eq!(zero.outcome, PageOutcome::Skipped(SkipReason::NoElements));
    assert!(text.classification.is_some());
    assert!(text.error.is_none());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn compatibility_matrix_columns_are_repaired() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::new(|_, _, _| {
        let mut payload = tables(&[MATRIX]);
        payload.elements[0].title = "Compatibility of fertilizer mixtures".into();
        Ok(payload)
    });
    let ctx = context(classifier, extractor, None, ExtractionConfig::default());

    let record = process_page(&ctx, 1, page_image()).await;

    let v = record.validation.as_ref().expect("validation");
    assert!(v.has(ValidationTrigger::ColumnsReordered));
    let html = record.payload.as_ref().unwrap().elements[0]
        .html()
        .unwrap()
        .to_string();
    let map = html.find("<th>MAP</th>").unwrap();
    let urea = html.find("<th>Urea</th>").unwrap();
    assert!(map < urea, "data columns reversed: {html}");
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_isolates_failures_and_respects_concurrency() {
    let classifier = FakeClassifier::always(classification(ContentType::Table, 1));
    let extractor = FakeExtractor::with_delay(Duration::from_millis(50), |page, _, _| {
        if page == 3 {
            Err(ExtractionError::UnknownKind("figure".into()))
        } else {
            Ok(tables(&[FULL]))
        }
    });
    let config = ExtractionConfig::builder().concurrency(3).build().unwrap();
    let ctx = Arc::new(context(classifier, extractor.clone(), None, config));

    let pages: Vec<_> = (1..=8).map(|n| (n, page_image())).collect();
    let mut records = run_batch(ctx, pages, 8, None).await;
    records.sort_by_key(|r| r.page_num);

    assert_eq!(records.len(), 8);
    assert_eq!(
        records.iter().map(|r| r.page_num).collect::<Vec<_>>(),
        (1..=8).collect::<Vec<_>>()
    );
    for r in &records {
        if r.page_num == 3 {
            assert_eq!(r.outcome, PageOutcome::Failed);
        } else {
            assert_eq!(r.outcome, PageOutcome::Validated, "page {}", r.page_num);
        }
    }
    let peak = extractor.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeds pool size");
    assert!(peak >= 2, "pages should overlap, peak was {peak}");
}

#[tokio::test]
async fn batch_persists_artifacts_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = FakeClassifier::new(|page| {
        Ok(match page {
            3 => classification(ContentType::Text, 0),
            _ => classification(ContentType::Table, 1),
        })
    });
    let extractor = FakeExtractor::new(|page, _, _| {
        if page == 2 {
            Err(ExtractionError::MissingKey("elements"))
        } else {
            Ok(tables(&[FULL]))
        }
    });
    let ctx = Arc::new(context(
        classifier,
        extractor,
        None,
        ExtractionConfig::default(),
    ));

    let pages: Vec<_> = (1..=3).map(|n| (n, page_image())).collect();
    let mut records = run_batch(ctx, pages, 3, Some(dir.path())).await;
    records.sort_by_key(|r| r.page_num);

    let page1 = persist::page_dir(dir.path(), 1);
    assert!(page1.join("table-01.html").is_file());
    assert!(persist::is_checkpointed(dir.path(), 1));
    assert!(!persist::is_checkpointed(dir.path(), 2), "failed pages are retried");
    assert!(persist::is_checkpointed(dir.path(), 3), "text pages are checkpointed");

    let written = persist::write_summary(dir.path(), &records).await.unwrap();
    assert_eq!(written, 1);
    let summary = std::fs::read_to_string(dir.path().join(persist::SUMMARY_FILE)).unwrap();
    assert!(summary.contains("Page 1 - table-01"));
    assert!(!summary.contains("Page 2 -"));
}
