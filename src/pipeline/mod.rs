//! Pipeline stages for table and chart extraction.
//!
//! Each submodule implements one step. The model-backed steps sit behind
//! traits ([`classify::Classifier`], [`extract::Extractor`],
//! [`ocr::OcrEngine`]) so the orchestration in [`crate::page`] can be
//! driven by fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ encode ──▶ classify ──▶ ocr ──▶ synthesize
//!                                                                         │
//!                       postprocess ◀── validate ◀── extract ◀────────────┘
//! ```
//!
//! 1. [`input`]      resolve a path or URL to a local PDF
//! 2. [`render`]     rasterise selected pages with pdfium in `spawn_blocking`
//! 3. [`preprocess`] clamp size, optional contrast boost, rotation fix
//! 4. [`encode`]     PNG + base64 for the multimodal request
//! 5. [`classify`]   cheap pre-check: content type, element count, rotation
//! 6. [`ocr`]        Tesseract word boxes for dense pages
//! 7. [`synthesize`] per-element extraction prompt
//! 8. [`extract`]    vision call and JSON payload parsing
//! 9. [`validate`]   state machine: retry, manual review, or validated
//! 10. [`postprocess`] deterministic payload repairs
//!
//! [`llm`] wraps the provider call with retry and token metering;
//! [`table`] is the small HTML table model shared by several stages.

pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;
pub mod render;
pub mod synthesize;
pub mod table;
pub mod validate;
