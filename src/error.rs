//! Error types for the edgequake-pdf2tables library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`Pdf2TablesError`] (**fatal**): the batch cannot proceed at all (bad
//!   input file, provider not configured, invalid config, output directory
//!   not writable). Returned as `Err` from the top-level `extract*` functions.
//!
//! * [`ClassificationError`], [`ExtractionError`], [`OcrError`] (**boundary**):
//!   raised where loosely-typed model or engine output enters the
//!   pipeline. The page orchestrator decides what each one means: skip,
//!   retry once, or degrade silently.
//!
//! * [`PageError`] (**non-fatal, recorded**): the terminal failure of a single
//!   page, stored in [`crate::output::PageRecord`] so one bad page never
//!   aborts its siblings.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2tables library.
#[derive(Debug, Error)]
pub enum Pdf2TablesError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    /// A directory input holds no `*.pdf` file.
    #[error("No PDF files in directory '{path}'")]
    NoPdfsInDirectory { path: PathBuf },

    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("PDF '{path}' is encrypted.\nProvide the password with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("No selected page is in range (document has {total} pages)")]
    PageOutOfRange { total: usize },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// A model tier could not be initialised (missing API key etc.).
    #[error("LLM provider '{provider}' for the {tier} tier is not configured.\n{hint}")]
    ProviderNotConfigured {
        tier: &'static str,
        provider: String,
        hint: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The pre-check model returned something that is not a page classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassificationError {
    #[error("pre-check call failed: {0}")]
    Call(String),

    #[error("pre-check response is not JSON: {0}")]
    NotJson(String),

    #[error("pre-check response missing required field '{0}'")]
    MissingField(&'static str),

    #[error("pre-check field '{field}' has invalid value {value}")]
    InvalidField { field: &'static str, value: String },
}

/// The extraction model returned something that is not an extraction payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("extraction call failed: {0}")]
    Call(String),

    #[error("extraction response is not JSON: {0}")]
    NotJson(String),

    #[error("extraction response missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("unknown payload kind '{0}'")]
    UnknownKind(String),

    #[error("element {index}: {detail}")]
    InvalidElement { index: usize, detail: String },
}

/// OCR failure. Always non-fatal: the page continues without OCR evidence.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine '{0}' is not available on this system")]
    Unavailable(String),

    #[error("OCR engine failed: {0}")]
    Failed(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A non-fatal, terminal error for a single page.
///
/// Stored in [`crate::output::PageRecord::error`]. The batch continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Rasterisation or preprocessing failed.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The pre-check response could not be parsed; the page was skipped.
    #[error("Page {page}: classification failed: {detail}")]
    ClassificationFailed { page: usize, detail: String },

    /// Both extraction attempts produced an unusable response.
    #[error("Page {page}: extraction failed after {attempts} attempts: {detail}")]
    ExtractionFailed {
        page: usize,
        attempts: u8,
        detail: String,
    },

    /// Writing the page artifacts failed.
    #[error("Page {page}: could not persist artifacts: {detail}")]
    PersistFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::ClassificationFailed { page, .. }
            | PageError::ExtractionFailed { page, .. }
            | PageError::PersistFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_not_configured_names_tier() {
        let e = Pdf2TablesError::ProviderNotConfigured {
            tier: "pre-check",
            provider: "openai".into(),
            hint: "OPENAI_API_KEY is not set".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pre-check"), "got: {msg}");
        assert!(msg.contains("openai"));
    }

    #[test]
    fn extraction_failed_display() {
        let e = PageError::ExtractionFailed {
            page: 7,
            attempts: 2,
            detail: "missing key 'elements'".into(),
        };
        assert!(e.to_string().contains("Page 7"));
        assert!(e.to_string().contains("2 attempts"));
        assert_eq!(e.page(), 7);
    }

    #[test]
    fn invalid_field_display() {
        let e = ClassificationError::InvalidField {
            field: "rotation",
            value: "45".into(),
        };
        assert!(e.to_string().contains("rotation"));
        assert!(e.to_string().contains("45"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::ClassificationFailed {
            page: 3,
            detail: "not json".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("ClassificationFailed"));
    }
}
