//! OCR segmentation: auxiliary text evidence for dense multi-element pages.
//!
//! OCR never replaces the vision model. It produces text fragments in
//! reading order that are pasted into the extraction prompt, which helps the
//! model keep two adjacent tables apart and read small numerals.
//!
//! Every failure here is non-fatal. [`OcrError`] is logged by the caller
//! and the page continues down the no-OCR path.

use crate::error::OcrError;
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::process::Command;
use tracing::debug;

/// Rows whose top edges fall in the same band of this many pixels are read
/// left to right as one line.
pub const READING_ORDER_BAND_PX: u32 = 50;

/// Axis-aligned box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    fn union(self, other: BoundingBox) -> BoundingBox {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width).max(other.x + other.width);
        let y1 = (self.y + self.height).max(other.y + other.height);
        BoundingBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

/// One recognised line of text and where it sits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrFragment {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Recognises text in a page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Fragments in any order; callers apply [`sort_reading_order`].
    async fn recognize(&self, page: &PageImage) -> Result<Vec<OcrFragment>, OcrError>;
}

/// Sort top-to-bottom in [`READING_ORDER_BAND_PX`] bands, then left-to-right.
pub fn sort_reading_order(fragments: &mut [OcrFragment]) {
    fragments.sort_by_key(|f| (f.bbox.y / READING_ORDER_BAND_PX, f.bbox.x));
}

/// Join fragments into the text block given to the extractor.
pub fn fragments_to_text(fragments: &[OcrFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// [`OcrEngine`] that shells out to the `tesseract` CLI and parses its TSV.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: language.into(),
        }
    }

    /// Use a non-default tesseract executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, page: &PageImage) -> Result<Vec<OcrFragment>, OcrError> {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        tmp.write_all(&page.png)?;
        tmp.flush()?;

        let output = Command::new(&self.binary)
            .arg(tmp.path())
            .arg("stdout")
            .args(["-l", &self.language])
            // Fully automatic segmentation: tables sit among running text.
            .args(["--psm", "3"])
            .arg("tsv")
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::Unavailable(self.binary.clone()),
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let fragments = parse_tsv_lines(&tsv);
        debug!(
            "Page {}: tesseract returned {} lines",
            page.page_num,
            fragments.len()
        );
        Ok(fragments)
    }
}

/// Group word rows (level 5) of tesseract TSV into line fragments.
///
/// Columns: `level page block par line word left top width height conf text`.
/// Rows with negative confidence or blank text are ignored.
pub fn parse_tsv_lines(tsv: &str) -> Vec<OcrFragment> {
    let mut lines: Vec<((u32, u32, u32), OcrFragment)> = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let (Some(block), Some(par), Some(line)) = (num(2), num(3), num(4)) else {
            continue;
        };
        let (Some(x), Some(y), Some(width), Some(height)) = (num(6), num(7), num(8), num(9))
        else {
            continue;
        };
        let bbox = BoundingBox { x, y, width, height };
        let key = (block, par, line);

        match lines.iter_mut().find(|(k, _)| *k == key) {
            Some((_, frag)) => {
                frag.text.push(' ');
                frag.text.push_str(text);
                frag.bbox = frag.bbox.union(bbox);
            }
            None => lines.push((
                key,
                OcrFragment {
                    text: text.to_string(),
                    bbox,
                },
            )),
        }
    }

    lines.into_iter().map(|(_, f)| f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1000\t800\t-1\t
5\t1\t1\t1\t1\t1\t100\t40\t80\t20\t95.1\tTabela
5\t1\t1\t1\t1\t2\t190\t42\t20\t18\t93.0\t3
5\t1\t2\t1\t1\t1\t600\t45\t80\t20\t91.2\tTabela
5\t1\t2\t1\t1\t2\t690\t45\t20\t20\t90.0\t4
5\t1\t1\t2\t1\t1\t100\t300\t60\t20\t-1\tnoise
5\t1\t1\t2\t2\t1\t100\t320\t40\t20\t88.0\tN
";

    #[test]
    fn groups_words_into_lines() {
        let lines = parse_tsv_lines(TSV);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "Tabela 3");
        assert_eq!(
            lines[0].bbox,
            BoundingBox {
                x: 100,
                y: 40,
                width: 110,
                height: 20
            }
        );
        assert_eq!(lines[1].text, "Tabela 4");
        assert_eq!(lines[2].text, "N");
    }

    #[test]
    fn reading_order_buckets_rows() {
        let frag = |t: &str, x, y| OcrFragment {
            text: t.into(),
            bbox: BoundingBox {
                x,
                y,
                width: 10,
                height: 10,
            },
        };
        // "right" sits 12px higher than "left" but in the same 50px band.
        let mut frags = vec![
            frag("below", 0, 120),
            frag("right", 500, 30),
            frag("left", 10, 42),
        ];
        sort_reading_order(&mut frags);
        let order: Vec<_> = frags.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(order, ["left", "right", "below"]);
        assert_eq!(fragments_to_text(&frags), "left\nright\nbelow");
    }

    #[test]
    fn empty_output_is_valid() {
        assert!(parse_tsv_lines("").is_empty());
        assert!(parse_tsv_lines("level\tpage_num\n").is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = TesseractOcr::new("eng").with_binary("definitely-not-a-tesseract-binary");
        let page = PageImage {
            page_num: 1,
            width: 1,
            height: 1,
            png: vec![0x89, b'P', b'N', b'G'],
        };
        let err = engine.recognize(&page).await.unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
    }
}
