//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! PNG is lossless: thin table rules and superscript units survive, which
//! JPEG artefacts would smear. `detail: "high"` asks GPT-4-class models for
//! the full tile budget so small cell text is actually seen.
//!
//! The encoded PNG is kept alongside the base64 payload because the OCR
//! engine reads the same bytes from a temporary file.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::{debug, warn};

/// A page image ready to be sent to a model or an OCR engine.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl PageImage {
    /// Encode `img` as PNG, halving its size until it fits in `max_bytes`.
    pub fn encode(page_num: usize, img: &DynamicImage, max_bytes: usize) -> Result<Self, image::ImageError> {
        let mut png = encode_png(img)?;
        let mut current: Option<DynamicImage> = None;

        while png.len() > max_bytes {
            let src = current.as_ref().unwrap_or(img);
            if src.width() < 64 || src.height() < 64 {
                warn!(
                    "Page {}: image still {} bytes at minimum size, sending as is",
                    page_num,
                    png.len()
                );
                break;
            }
            let smaller = src.resize(src.width() / 2, src.height() / 2, FilterType::Triangle);
            debug!(
                "Page {}: {} bytes over budget, downscaling to {}x{}",
                page_num,
                png.len(),
                smaller.width(),
                smaller.height()
            );
            png = encode_png(&smaller)?;
            current = Some(smaller);
        }

        let final_img = current.as_ref().unwrap_or(img);
        Ok(Self {
            page_num,
            width: final_img.width(),
            height: final_img.height(),
            png,
        })
    }

    /// Base64 `ImageData` for a vision message.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = STANDARD.encode(&self.png);
        debug!("Page {}: encoded image → {} bytes base64", self.page_num, b64.len());
        ImageData::new(b64, "image/png").with_detail("high")
    }
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
