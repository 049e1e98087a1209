//! Streaming extraction API: emit page records as they complete.
//!
//! ## Why stream?
//!
//! A 200-page bulletin takes many minutes. A stream lets callers show
//! partial results, drive their own progress display, or persist each page
//! (see [`crate::persist::write_page`]) without waiting for the barrier.
//!
//! Unlike [`crate::run::extract`], nothing here touches the output
//! directory: checkpoints and `summary.html` are the caller's business.
//! Records arrive in completion order; sort by `page_num` if order matters.

use crate::config::ExtractionConfig;
use crate::error::{PageError, Pdf2TablesError};
use crate::output::PageRecord;
use crate::page::{process_page, PageContext};
use crate::pipeline::{input, render};
use crate::run::build_context;
use crate::usage::UsageMeter;
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page records.
pub type PageStream = Pin<Box<dyn Stream<Item = PageRecord> + Send>>;

/// Extract tables and charts, streaming one [`PageRecord`] per selected page.
///
/// # Errors
/// Fatal errors only (input, PDF, provider); page failures arrive as
/// records with [`PageRecord::error`] set.
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<PageStream, Pdf2TablesError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    let ctx = Arc::new(build_context(config, Arc::new(UsageMeter::new()))?);
    stream_pages(ctx, &pdf_path, config).await
}

/// Build the stream from an explicit page context.
///
/// Rendering completes before this returns, so the PDF file may be removed
/// as soon as the stream is handed back.
pub async fn stream_pages(
    ctx: Arc<PageContext>,
    pdf_path: &std::path::Path,
    config: &ExtractionConfig,
) -> Result<PageStream, Pdf2TablesError> {
    let metadata = render::extract_metadata(pdf_path, config.password.as_deref()).await?;
    let page_indices = config.pages.to_indices(metadata.page_count);
    if page_indices.is_empty() {
        return Err(Pdf2TablesError::PageOutOfRange {
            total: metadata.page_count,
        });
    }

    let rendered = render::render_pages(pdf_path, config, &page_indices).await?;
    let concurrency = config.concurrency.max(1);

    let s = stream::iter(rendered.into_iter().map(move |(idx, result)| {
        let ctx = Arc::clone(&ctx);
        async move {
            let page_num = idx + 1;
            match result {
                Ok(image) => process_page(&ctx, page_num, image).await,
                Err(detail) => PageRecord::failed(
                    page_num,
                    PageError::RenderFailed {
                        page: page_num,
                        detail,
                    },
                ),
            }
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

/// Streaming counterpart of [`crate::run::extract_from_bytes`].
pub async fn extract_stream_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<PageStream, Pdf2TablesError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| Pdf2TablesError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Pdf2TablesError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // Pages are rendered before the stream is returned, so the file can go.
    let stream = extract_stream(&path, config).await?;
    drop(tmp);
    Ok(stream)
}
