//! Result types returned by the batch runner.

use crate::error::PageError;
use crate::model::{ExtractionPayload, PageClassification, PageState, ValidationResult};
use crate::usage::UsageSnapshot;
use serde::{Deserialize, Serialize};

/// Why a page produced no extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Artifacts from a previous run exist and `force_reprocess` is off.
    Checkpointed,
    /// The pre-check saw running text only.
    TextOnly,
    /// The pre-check saw nothing usable, or counted zero elements.
    NoElements,
    /// The pre-check response could not be parsed.
    ClassificationFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Checkpointed => "already processed",
            SkipReason::TextOnly => "text only",
            SkipReason::NoElements => "no tables or charts",
            SkipReason::ClassificationFailed => "pre-check failed",
        }
    }
}

/// Terminal outcome of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PageOutcome {
    Validated,
    ManualReviewFlagged,
    Skipped(SkipReason),
    Failed,
}

impl From<PageState> for PageOutcome {
    fn from(state: PageState) -> Self {
        match state {
            PageState::ManualReviewFlagged => PageOutcome::ManualReviewFlagged,
            _ => PageOutcome::Validated,
        }
    }
}

/// Everything known about one processed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-indexed page number.
    pub page_num: usize,
    pub outcome: PageOutcome,
    pub classification: Option<PageClassification>,
    pub payload: Option<ExtractionPayload>,
    pub validation: Option<ValidationResult>,
    /// OCR text was attached to at least one extraction call.
    pub ocr_used: bool,
    /// Number of extraction calls made (0, 1 or 2).
    pub extraction_attempts: u8,
    pub duration_ms: u64,
    pub error: Option<PageError>,
}

impl PageRecord {
    /// A record for a page that never reached extraction.
    pub fn skipped(page_num: usize, reason: SkipReason) -> Self {
        Self {
            page_num,
            outcome: PageOutcome::Skipped(reason),
            classification: None,
            payload: None,
            validation: None,
            ocr_used: false,
            extraction_attempts: 0,
            duration_ms: 0,
            error: None,
        }
    }

    /// A record for a page that failed terminally.
    pub fn failed(page_num: usize, error: PageError) -> Self {
        Self {
            outcome: PageOutcome::Failed,
            error: Some(error),
            ..Self::skipped(page_num, SkipReason::NoElements)
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.outcome == PageOutcome::ManualReviewFlagged
    }

    /// Terminal states that carry a payload worth persisting.
    pub fn has_payload(&self) -> bool {
        matches!(
            self.outcome,
            PageOutcome::Validated | PageOutcome::ManualReviewFlagged
        ) && self.payload.is_some()
    }
}

/// Basic document facts read before rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
}

/// Aggregate numbers for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_pages: usize,
    pub selected_pages: usize,
    pub validated_pages: usize,
    pub flagged_pages: usize,
    pub skipped_pages: usize,
    pub failed_pages: usize,
    pub extracted_elements: usize,
    pub usage: UsageSnapshot,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl BatchStats {
    /// Tally page outcomes; timings and usage are filled by the caller.
    pub fn tally(total_pages: usize, pages: &[PageRecord]) -> Self {
        let mut stats = BatchStats {
            total_pages,
            selected_pages: pages.len(),
            ..Default::default()
        };
        for p in pages {
            match p.outcome {
                PageOutcome::Validated => stats.validated_pages += 1,
                PageOutcome::ManualReviewFlagged => stats.flagged_pages += 1,
                PageOutcome::Skipped(_) => stats.skipped_pages += 1,
                PageOutcome::Failed => stats.failed_pages += 1,
            }
            if let Some(ref v) = p.validation {
                stats.extracted_elements += v.extracted_count;
            }
        }
        stats
    }
}

/// Output of a full batch: one record per selected page, in page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub source: String,
    pub metadata: DocumentMetadata,
    pub pages: Vec<PageRecord>,
    pub stats: BatchStats,
}

impl BatchOutput {
    pub fn flagged(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.iter().filter(|p| p.is_flagged())
    }
}
