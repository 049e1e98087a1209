//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the worker pool finishes each page.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2tables::{ExtractionConfig, ExtractionProgressCallback, PageState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FlagCounter {
//!     flagged: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for FlagCounter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, state: PageState, _elements: usize) {
//!         if state == PageState::ManualReviewFlagged {
//!             self.flagged.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(FlagCounter { flagged: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::PageState;
use std::sync::Arc;

/// Called by the batch runner as it processes each page.
///
/// Pages run concurrently, so every method may be called from several
/// tasks at once. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after rendering, before any page is classified.
    fn on_batch_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a worker picks up a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page is skipped: checkpointed, text-only or empty.
    fn on_page_skipped(&self, page_num: usize, total_pages: usize, reason: &str) {
        let _ = (page_num, total_pages, reason);
    }

    /// Called when a page reaches a terminal state.
    ///
    /// * `elements`: number of extracted tables and charts
    fn on_page_complete(&self, page_num: usize, total_pages: usize, state: PageState, elements: usize) {
        let _ = (page_num, total_pages, state, elements);
    }

    /// Called when a page fails terminally.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the join barrier.
    fn on_batch_complete(&self, total_pages: usize, validated: usize, flagged: usize) {
        let _ = (total_pages, validated, flagged);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        skipped: AtomicUsize,
        flagged: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_skipped(&self, _page_num: usize, _total_pages: usize, _reason: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _p: usize, _t: usize, state: PageState, _elements: usize) {
            if state == PageState::ManualReviewFlagged {
                self.flagged.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_skipped(2, 5, "text only");
        cb.on_page_complete(1, 5, PageState::Validated, 2);
        cb.on_page_error(3, 5, "boom");
        cb.on_batch_complete(5, 1, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, PageState::ManualReviewFlagged, 2);
        tracker.on_page_start(2, 3);
        tracker.on_page_skipped(2, 3, "empty");
        tracker.on_page_start(3, 3);
        tracker.on_page_error(3, 3, "extraction failed");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.flagged.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_page_complete(1, 10, PageState::Validated, 1);
    }
}
