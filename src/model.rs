//! Core data model: what the pre-check sees, what the extractor returns,
//! and what the validator concludes.
//!
//! ## Why strict types at the model boundary?
//!
//! LLM responses are loosely typed JSON. Everything downstream of the parse
//! step (prompt synthesis, column repair, count validation) works on the
//! types in this module, never on `serde_json::Value`. A response that does
//! not fit these types is rejected where it enters, as a
//! [`crate::error::ClassificationError`] or [`crate::error::ExtractionError`].
//!
//! Descriptor enums that only steer prompt wording (`TableStructure`,
//! `ChartType`, `CellContentType`) accept unknown values as `Other`: a novel
//! structure name should not cost a page. `content_type`, `element_count`
//! and `rotation` are load-bearing and stay strict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ── Page classification ──────────────────────────────────────────────────

/// What the pre-check found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Table,
    Chart,
    Mixed,
    #[serde(alias = "text_only")]
    Text,
    #[serde(alias = "none")]
    Empty,
}

impl ContentType {
    /// `true` for pages with nothing to extract.
    pub fn is_short_circuit(self) -> bool {
        matches!(self, ContentType::Text | ContentType::Empty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Table => "table",
            ContentType::Chart => "chart",
            ContentType::Mixed => "mixed",
            ContentType::Text => "text",
            ContentType::Empty => "empty",
        }
    }
}

/// Clockwise rotation that makes the page read upright.
///
/// Only quarter turns exist. Parsing normalises any multiple of 90 into
/// `0..360` and rejects everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Normalise a degree value. `None` when it is not a multiple of 90.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    pub fn is_none(self) -> bool {
        self == Rotation::None
    }
}

impl TryFrom<i64> for Rotation {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rotation::from_degrees(value).ok_or_else(|| format!("{value} is not a multiple of 90"))
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.degrees()
    }
}

/// Whether an element is a table or a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Table,
    Chart,
}

/// Layout family of a table, as seen by the pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStructure {
    /// One header row, one value per cell.
    Simple,
    /// Header cells spanning several columns or rows.
    MultiLevelHeader,
    /// Body cells merged vertically (grouped row labels).
    MergedCells,
    /// Square table with the same labels on both axes.
    Matrix,
    #[serde(other)]
    Other,
}

impl TableStructure {
    pub fn as_str(self) -> &'static str {
        match self {
            TableStructure::Simple => "simple",
            TableStructure::MultiLevelHeader => "multi_level_header",
            TableStructure::MergedCells => "merged_cells",
            TableStructure::Matrix => "matrix",
            TableStructure::Other => "other",
        }
    }
}

/// Chart family, as seen by the pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Scatter,
    /// Response curves annotated with fitted equations.
    Equations,
    Ternary,
    #[serde(other)]
    Other,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Scatter => "scatter",
            ChartType::Equations => "equations",
            ChartType::Ternary => "ternary",
            ChartType::Other => "other",
        }
    }
}

/// What the cells of a table mostly contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellContentType {
    Symbols,
    Numbers,
    Text,
    Mixed,
    #[serde(other)]
    Other,
}

impl CellContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            CellContentType::Symbols => "symbols",
            CellContentType::Numbers => "numbers",
            CellContentType::Text => "text",
            CellContentType::Mixed => "mixed",
            CellContentType::Other => "other",
        }
    }
}

/// Structural observations about one element, used only to steer prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub kind: ElementKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub table_structure: Option<TableStructure>,
    #[serde(default)]
    pub chart_type: Option<ChartType>,
    #[serde(default)]
    pub has_colors: bool,
    #[serde(default)]
    pub color_meaning: Option<String>,
    #[serde(default)]
    pub diagonal_empty: bool,
    #[serde(default)]
    pub cell_content_type: Option<CellContentType>,
    #[serde(default)]
    pub has_legend: bool,
    #[serde(default)]
    pub legend_text: Option<String>,
}

impl ElementDescriptor {
    /// A bare descriptor carrying only the kind.
    pub fn of_kind(kind: ElementKind) -> Self {
        Self {
            kind,
            title: None,
            table_structure: None,
            chart_type: None,
            has_colors: false,
            color_meaning: None,
            diagonal_empty: false,
            cell_content_type: None,
            has_legend: false,
            legend_text: None,
        }
    }
}

/// Output of the pre-check pass. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageClassification {
    pub content_type: ContentType,
    /// The authoritative number of tables and charts on the page.
    pub element_count: usize,
    #[serde(default)]
    pub rotation: Rotation,
    /// Zero or more descriptors; may be shorter than `element_count`.
    #[serde(default)]
    pub elements: Vec<ElementDescriptor>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub legend_text: Option<String>,
}

impl PageClassification {
    /// `true` when the rest of the pipeline should run for this page.
    pub fn has_extractable_content(&self) -> bool {
        !self.content_type.is_short_circuit() && self.element_count > 0
    }

    /// Descriptor for slot `index`, falling back to a bare descriptor whose
    /// kind follows the page content type.
    pub fn descriptor(&self, index: usize) -> ElementDescriptor {
        self.elements.get(index).cloned().unwrap_or_else(|| {
            let kind = match self.content_type {
                ContentType::Chart => ElementKind::Chart,
                _ => ElementKind::Table,
            };
            ElementDescriptor::of_kind(kind)
        })
    }
}

// ── Extraction payload ───────────────────────────────────────────────────

/// Top-level kind of an extraction response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    TableSet,
    ChartSet,
}

/// One fitted response curve `Y = a + bX − cX²`. `c` is stored positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub panel: String,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    #[serde(default)]
    pub r_squared: Option<f64>,
}

/// Agronomic optimum derived from a quadratic response curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticOptimum {
    /// Input level at the curve maximum.
    pub x_max: f64,
    pub y_max: f64,
    /// Smallest non-negative input reaching 90 % of `y_max`.
    pub x_90: Option<f64>,
    pub y_90: Option<f64>,
}

impl Equation {
    /// Curve maximum and the 90 % point. `None` when the curve is linear.
    pub fn optimum(&self) -> Option<QuadraticOptimum> {
        let (a, b, c) = (self.a, self.b, -self.c);
        if c == 0.0 {
            return None;
        }
        let x_max = -b / (2.0 * c);
        let y_max = a + b * x_max + c * x_max * x_max;

        let target = 0.9 * y_max;
        let disc = b * b - 4.0 * c * (a - target);
        let x_90 = if disc >= 0.0 {
            let sq = disc.sqrt();
            [(-b - sq) / (2.0 * c), (-b + sq) / (2.0 * c)]
                .into_iter()
                .filter(|r| *r >= 0.0)
                .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |m| m.min(r))))
        } else {
            None
        };
        let y_90 = x_90.map(|x| a + b * x + c * x * x);

        Some(QuadraticOptimum {
            x_max,
            y_max,
            x_90,
            y_90,
        })
    }
}

/// One named data series; `None` marks an unreadable point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Numeric content of a chart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
    #[serde(default)]
    pub equations: Vec<Equation>,
    /// Category labels or numeric ticks, kept verbatim.
    #[serde(default)]
    pub x_values: Vec<String>,
    #[serde(default)]
    pub series: Vec<Series>,
}

/// The body of one extracted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementStructure {
    Table { html: String },
    Chart { chart: ChartData },
}

/// One element of an extraction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedElement {
    pub title: String,
    /// `None` when the model named the element but returned no body.
    pub structure: Option<ElementStructure>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExtractedElement {
    pub fn html(&self) -> Option<&str> {
        match &self.structure {
            Some(ElementStructure::Table { html }) => Some(html),
            _ => None,
        }
    }
}

/// Parsed extraction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    pub kind: PayloadKind,
    pub elements: Vec<ExtractedElement>,
}

// ── Validation ───────────────────────────────────────────────────────────

/// Per-page state. `Extracted` and `RetryPending` are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Extracted,
    RetryPending,
    Validated,
    ManualReviewFlagged,
}

impl PageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PageState::Validated | PageState::ManualReviewFlagged)
    }
}

/// Conditions raised while validating a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTrigger {
    NeedsOcrRetry,
    NeedsManualReview,
    RotationCorrected,
    ColumnsReordered,
}

/// Verdict for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub expected_count: usize,
    pub extracted_count: usize,
    /// Empty body cells over all body cells of every table, in `[0, 1]`.
    pub empty_cell_ratio: f64,
    pub triggers: BTreeSet<ValidationTrigger>,
    pub state: PageState,
}

impl ValidationResult {
    pub fn has(&self, trigger: ValidationTrigger) -> bool {
        self.triggers.contains(&trigger)
    }

    pub fn count_mismatch(&self) -> bool {
        self.expected_count != self.extracted_count
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {}/{} elements, {:.0}% empty cells",
            self.state,
            self.extracted_count,
            self.expected_count,
            self.empty_cell_ratio * 100.0
        )
    }
}
