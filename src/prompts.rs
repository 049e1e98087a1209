//! Fixed instruction templates for the two model tiers.
//!
//! Centralising every prompt here keeps wording changes out of the parsing
//! and retry code, and lets unit tests inspect prompts without a model.
//! Page-specific instructions are assembled from the fragments below by
//! [`crate::pipeline::synthesize`].

/// System prompt for the pre-check tier.
///
/// The JSON schema in this prompt must stay in sync with
/// [`crate::model::PageClassification`].
pub const PRECHECK_SYSTEM_PROMPT: &str = r#"You inspect one page of a scientific document and report which tables and charts it contains. Return ONLY a JSON object, no prose, no code fences.

Schema:
{
  "content_type": "table" | "chart" | "mixed" | "text" | "empty",
  "element_count": <integer, number of DISTINCT tables and charts>,
  "rotation": 0 | 90 | 180 | 270,
  "notes": <string or null>,
  "legend_text": <page-level legend or footnote text, or null>,
  "elements": [
    {
      "kind": "table" | "chart",
      "title": <caption exactly as printed, or null>,
      "table_structure": "simple" | "multi_level_header" | "merged_cells" | "matrix" | null,
      "chart_type": "line" | "bar" | "scatter" | "equations" | "ternary" | null,
      "has_colors": <true if cell or series colours carry meaning>,
      "color_meaning": <what the colours encode, or null>,
      "diagonal_empty": <true if the main diagonal of a matrix is blank>,
      "cell_content_type": "symbols" | "numbers" | "text" | "mixed" | null,
      "has_legend": <true if the element has its own legend>,
      "legend_text": <that legend, verbatim, or null>
    }
  ]
}

Rules:
- element_count counts distinct tables and charts. "Table 3" and "Table 4" on one page → 2.
- Only tables → "table". Only charts → "chart". Both → "mixed".
- Running text only → "text" with element_count 0. Nothing useful → "empty" with element_count 0.
- rotation is how many degrees CLOCKWISE the image must be turned for the text to read upright.
- List elements top to bottom, left to right. Describe only what you see; use null when unsure."#;

/// System prompt for the extraction tier.
///
/// The JSON schema in this prompt must stay in sync with
/// [`crate::pipeline::extract::parse_payload`].
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract tables and chart data from an image of a scientific document page. Return ONLY a JSON object, no prose, no code fences.

Schema:
{
  "kind": "table_set" | "chart_set",
  "elements": [
    {
      "type": "table" | "chart",
      "title": <caption exactly as printed>,
      "html": <for tables: one <table> with <thead> and <tbody>>,
      "chart": <for charts: {"x_label", "y_label", "equations": [{"panel", "a", "b", "c", "r2"}], "x_values": [...], "series": [{"name", "values": [...]}]}>,
      "notes": <footnotes, significance markers, units, or null>
    }
  ]
}

Rules:
1. Transcribe, never invent. Unreadable values are null in charts and empty cells in tables.
2. Keep every row and column in the order printed. Repeat grouped row labels instead of leaving them blank.
3. Keep symbols, superscripts and units as printed. Numbers keep the page's decimal separator.
4. For fitted curves Y = a + bX - cX², report a, b and c as numbers with c POSITIVE, one entry per panel, with R² as r2.
5. For ternary diagrams, return a table of the region names with the min and max of each axis instead of a chart.
6. One entry in "elements" per table or chart, in reading order."#;

/// Heading placed before the per-element instructions of a multi-element page.
pub const MULTI_ELEMENT_HEADER: &str = "This page contains {count} separate elements. \
Return exactly {count} entries in \"elements\", one per element below, in this order. \
Do not merge elements and do not split one element into several.";

/// Escalation appended on the retry.
pub const ESCALATION_RULES: &str = "The previous answer was rejected. \
Reject your own answer and try again if any of these hold: \
the JSON does not parse; \"elements\" has the wrong number of entries; \
a table has a row with fewer cells than its header; \
more than a few cells are empty where the image shows a value.";

/// Per-kind instruction templates. Placeholders are filled verbatim from the
/// pre-check descriptor.
pub mod templates {
    pub const TABLE_SIMPLE: &str =
        "Table. One header row. Transcribe every cell as printed.";
    pub const TABLE_MULTI_LEVEL_HEADER: &str =
        "Table with a multi-level header. Reproduce the header with colspan and rowspan so every data column has its full label.";
    pub const TABLE_MERGED_CELLS: &str =
        "Table with merged body cells. Reproduce merges with rowspan; do not repeat the merged text in the spanned rows.";
    pub const TABLE_MATRIX: &str =
        "Square matrix: the same labels appear across the top and down the left. The top-left header cell is empty. Keep the column labels in the exact left-to-right order printed.";
    pub const TABLE_GENERIC: &str =
        "Table. Transcribe every cell as printed.";

    pub const CHART_EQUATIONS: &str =
        "Chart with fitted response curves. Report one equation per panel or series as a, b, c (c positive) and r2.";
    pub const CHART_TERNARY: &str =
        "Ternary diagram. Return it as a table of region names with the min and max percentage of each axis.";
    pub const CHART_SERIES: &str =
        "Chart. Report x_values in order and one series per legend entry, with null for points you cannot read.";
}

/// Wrap OCR text so the model treats it as evidence, not instructions.
pub fn ocr_context(ocr_text: &str) -> String {
    format!(
        "OCR text of this page, in reading order. Use it to confirm hard-to-read values; the image wins on layout.\n\"\"\"\n{}\n\"\"\"",
        ocr_text
    )
}
