//! PDF rasterisation: render selected pages to `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks while rendering. `tokio::task::spawn_blocking` moves the
//! work off the async worker threads.
//!
//! ## DPI with a pixel ceiling
//!
//! Pages are rendered at the configured DPI (200 by default, enough for
//! superscripts and thin table rules) but never beyond
//! [`crate::config::ImageLimits::max_dimension`] on either edge, so an A0
//! poster cannot produce a 12,000 px bitmap.

use crate::config::ExtractionConfig;
use crate::error::Pdf2TablesError;
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// One rendered page, or the reason it could not be rendered.
pub type RenderedPage = (usize, Result<DynamicImage, String>);

/// Rasterise selected pages (0-based indices).
///
/// Opening the document is fatal; a single page failing to render is not.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, Pdf2TablesError> {
    let path = pdf_path.to_path_buf();
    let dpi = config.dpi;
    let max_dimension = config.image_limits.max_dimension;
    let password = config.password.clone();
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, dpi, max_dimension, password.as_deref(), &indices)
    })
    .await
    .map_err(|e| Pdf2TablesError::Internal(format!("Render task panicked: {}", e)))?
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2TablesError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_lowercase().contains("password") {
            Pdf2TablesError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            Pdf2TablesError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn render_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_dimension: u32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<RenderedPage>, Pdf2TablesError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages, rendering {} at {} DPI", total_pages, page_indices.len(), dpi);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_dimension as i32)
        .set_maximum_height(max_dimension as i32);

    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        if idx >= total_pages {
            warn!("Skipping page {} (out of range, total={})", idx + 1, total_pages);
            continue;
        }

        let rendered = pages
            .get(idx as u16)
            .map_err(|e| format!("{:?}", e))
            .and_then(|page| {
                // The bitmap borrows `page`; convert before it goes out of scope.
                page.render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| format!("{:?}", e))
            });

        match rendered {
            Ok(ref image) => debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            ),
            Err(ref e) => warn!("Page {} failed to render: {}", idx + 1, e),
        }

        results.push((idx, rendered));
    }

    Ok(results)
}

/// Read title, author and page count without rendering.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, Pdf2TablesError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| Pdf2TablesError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, Pdf2TablesError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;
    let metadata = document.metadata();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        page_count: document.pages().len() as usize,
    })
}
