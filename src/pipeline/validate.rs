//! Validation: the per-page state machine.
//!
//! ```text
//!   Extracted ──ratio > trigger, no retry yet──▶ RetryPending ──▶ (extract again) ──▶ Extracted
//!       │
//!       ├──expected ≥ review_min, count differs──▶ ManualReviewFlagged
//!       └──otherwise────────────────────────────▶ Validated
//! ```
//!
//! The count recorded in [`ValidationResult`] is always the pre-check's
//! `element_count`; a divergence is recorded, never corrected.

use crate::config::ExtractionConfig;
use crate::model::{ExtractionPayload, PageState, ValidationResult, ValidationTrigger};
use crate::pipeline::table::{self, HtmlTable};
use std::collections::BTreeSet;

/// The two thresholds that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Empty-cell ratio above which the OCR-augmented retry fires.
    pub ocr_trigger_ratio: f64,
    /// Pages expecting at least this many elements are flagged on a count
    /// mismatch.
    pub review_min_elements: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ocr_trigger_ratio: 0.30,
            review_min_elements: 3,
        }
    }
}

impl From<&ExtractionConfig> for Thresholds {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            ocr_trigger_ratio: config.ocr_trigger_ratio,
            review_min_elements: config.review_min_elements,
        }
    }
}

/// Empty body cells over all body cells of every table in the payload.
/// Charts and tables without markup contribute nothing.
pub fn payload_empty_cell_ratio(payload: &ExtractionPayload) -> f64 {
    let tables: Vec<HtmlTable> = payload
        .elements
        .iter()
        .filter_map(|el| el.html())
        .filter_map(HtmlTable::parse)
        .collect();
    table::empty_cell_ratio(&tables)
}

/// Judge one extraction attempt.
///
/// `retry_attempted` is `true` once the single retry has been spent; from
/// then on the page always reaches a terminal state.
pub fn assess(
    expected_count: usize,
    payload: &ExtractionPayload,
    thresholds: &Thresholds,
    retry_attempted: bool,
) -> ValidationResult {
    let extracted_count = payload.elements.len();
    let empty_cell_ratio = payload_empty_cell_ratio(payload);
    let mut triggers = BTreeSet::new();

    if empty_cell_ratio > thresholds.ocr_trigger_ratio {
        triggers.insert(ValidationTrigger::NeedsOcrRetry);
    }

    let state = if triggers.contains(&ValidationTrigger::NeedsOcrRetry) && !retry_attempted {
        PageState::RetryPending
    } else if expected_count >= thresholds.review_min_elements && extracted_count != expected_count
    {
        triggers.insert(ValidationTrigger::NeedsManualReview);
        PageState::ManualReviewFlagged
    } else {
        PageState::Validated
    };

    ValidationResult {
        expected_count,
        extracted_count,
        empty_cell_ratio,
        triggers,
        state,
    }
}
