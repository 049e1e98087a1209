//! Prompt synthesis: turn pre-check observations into per-element instructions.
//!
//! The synthesizer is a pure function of the [`PageClassification`] (and the
//! optional OCR text). It never adds a structural claim the pre-check did not
//! make: every fact in the prompt is either a fixed template chosen by the
//! element's kind and structure, or a descriptor value interpolated verbatim.
//!
//! On retry a fresh prompt is synthesized with [`Escalation::Retry`]. The
//! structural facts are identical; only the count constraints and rejection
//! criteria are added.

use crate::model::{
    CellContentType, ChartType, ElementDescriptor, ElementKind, PageClassification, TableStructure,
};
use crate::prompts::{ocr_context, templates, ESCALATION_RULES, MULTI_ELEMENT_HEADER};
use serde::Serialize;

/// Whether this is the first extraction attempt or the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Escalation {
    Initial,
    Retry,
}

/// Instructions for one expected element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSegment {
    /// 1-indexed position in reading order.
    pub position: usize,
    pub kind: ElementKind,
    pub instructions: Vec<String>,
}

/// The page-specific user prompt sent with the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionPrompt {
    pub expected_count: usize,
    pub escalation: Escalation,
    pub page_context: Vec<String>,
    pub segments: Vec<PromptSegment>,
    pub ocr_text: Option<String>,
}

impl ExtractionPrompt {
    /// `true` when the prompt carries multi-element disambiguation.
    pub fn is_multi_element(&self) -> bool {
        self.expected_count >= 2
    }

    /// Render to the user-turn text.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.extend(self.page_context.iter().cloned());

        if self.is_multi_element() {
            parts.push(MULTI_ELEMENT_HEADER.replace("{count}", &self.expected_count.to_string()));
        }

        for seg in &self.segments {
            let heading = if self.is_multi_element() {
                format!(
                    "Element {} of {} ({}):",
                    seg.position,
                    self.expected_count,
                    kind_name(seg.kind)
                )
            } else {
                format!("The {}:", kind_name(seg.kind))
            };
            let mut block = heading;
            for line in &seg.instructions {
                block.push_str("\n- ");
                block.push_str(line);
            }
            parts.push(block);
        }

        if self.escalation == Escalation::Retry {
            let count_rule = if self.is_multi_element() {
                format!(
                    "\"elements\" MUST have exactly {} entries, entry N describing element N above.",
                    self.expected_count
                )
            } else {
                "\"elements\" MUST have exactly one entry.".to_string()
            };
            parts.push(count_rule);
            parts.push(ESCALATION_RULES.to_string());
        }

        if let Some(ref ocr) = self.ocr_text {
            parts.push(ocr_context(ocr));
        }

        parts.join("\n\n")
    }
}

/// Build the extraction prompt for a classified page.
pub fn synthesize(
    classification: &PageClassification,
    ocr_text: Option<&str>,
    escalation: Escalation,
) -> ExtractionPrompt {
    let expected = classification.element_count.max(1);

    let mut page_context = Vec::new();
    if let Some(ref legend) = classification.legend_text {
        page_context.push(format!("Page legend, as printed: \"{legend}\"."));
    }

    let segments = (0..expected)
        .map(|i| {
            let d = classification.descriptor(i);
            PromptSegment {
                position: i + 1,
                kind: d.kind,
                instructions: element_instructions(&d),
            }
        })
        .collect();

    ExtractionPrompt {
        expected_count: expected,
        escalation,
        page_context,
        segments,
        ocr_text: ocr_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    }
}

fn kind_name(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Table => "table",
        ElementKind::Chart => "chart",
    }
}

fn element_instructions(d: &ElementDescriptor) -> Vec<String> {
    let mut out = vec![template_for(d).to_string()];

    if let Some(ref title) = d.title {
        out.push(format!("Its caption reads \"{title}\"; use it as the title."));
    }

    if d.kind == ElementKind::Table {
        if d.diagonal_empty {
            out.push("The main diagonal is blank; leave those cells empty.".into());
        }
        match d.cell_content_type {
            Some(CellContentType::Symbols) => {
                out.push("Cells hold symbols; copy each symbol exactly, do not translate it into words.".into())
            }
            Some(CellContentType::Numbers) => {
                out.push("Cells hold numbers; copy digits and significance letters exactly.".into())
            }
            Some(CellContentType::Text) => out.push("Cells hold short text labels.".into()),
            Some(CellContentType::Mixed) | Some(CellContentType::Other) | None => {}
        }
    }

    if d.has_colors {
        match d.color_meaning {
            Some(ref meaning) => out.push(format!(
                "Colours carry meaning ({meaning}); write the meaning of each colour into the cell or notes."
            )),
            None => out.push("Colours carry meaning; describe the colour coding in notes.".into()),
        }
    }

    if d.has_legend {
        match d.legend_text {
            Some(ref legend) => out.push(format!(
                "Its legend reads \"{legend}\"; use it to interpret symbols and copy it into notes."
            )),
            None => out.push("It has a legend; copy the legend into notes.".into()),
        }
    }

    out
}

fn template_for(d: &ElementDescriptor) -> &'static str {
    match d.kind {
        ElementKind::Table => match d.table_structure {
            Some(TableStructure::Simple) => templates::TABLE_SIMPLE,
            Some(TableStructure::MultiLevelHeader) => templates::TABLE_MULTI_LEVEL_HEADER,
            Some(TableStructure::MergedCells) => templates::TABLE_MERGED_CELLS,
            Some(TableStructure::Matrix) => templates::TABLE_MATRIX,
            Some(TableStructure::Other) | None => templates::TABLE_GENERIC,
        },
        ElementKind::Chart => match d.chart_type {
            Some(ChartType::Equations) => templates::CHART_EQUATIONS,
            Some(ChartType::Ternary) => templates::CHART_TERNARY,
            _ => templates::CHART_SERIES,
        },
    }
}
