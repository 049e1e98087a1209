//! Post-processing: deterministic repairs of extracted payloads.
//!
//! ## Why post-process at all?
//!
//! Even a well-prompted vision model has recurring, recognisable failure
//! modes that are cheaper to undo after the fact than to prompt away:
//!
//! - Invisible Unicode (zero-width spaces, BOM, soft hyphens) inside cells
//! - Loose or inconsistent table markup that downstream tools choke on
//! - Compatibility matrices transcribed with their data columns mirrored
//!
//! Each repair is a [`PayloadPass`]: a `payload → payload` transform with its
//! own precondition, returning the trigger it raised (if any). Passes are
//! independent and individually testable; [`run_passes`] applies them in
//! order and collects the triggers.
//!
//! ## Pass Order
//!
//! Text cleanup runs first so the column repair sees clean titles and cells.
//! Markup normalisation runs last so the repaired grid is what gets rendered.

use crate::model::{ElementStructure, ExtractionPayload, ValidationTrigger};
use crate::pipeline::table::HtmlTable;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// One deterministic repair over an extraction payload.
pub trait PayloadPass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the pass in place. Returns the trigger it raised, if any.
    fn apply(&self, payload: &mut ExtractionPayload) -> Option<ValidationTrigger>;
}

/// The standard pass list.
pub fn default_passes(compatibility_markers: &[String]) -> Vec<Box<dyn PayloadPass>> {
    vec![
        Box::new(StripInvisibleChars),
        Box::new(ColumnOrderRepair::new(compatibility_markers)),
        Box::new(NormaliseTableMarkup),
    ]
}

/// Apply every pass in order and collect the triggers they raised.
pub fn run_passes(
    page_num: usize,
    payload: &mut ExtractionPayload,
    passes: &[Box<dyn PayloadPass>],
) -> BTreeSet<ValidationTrigger> {
    let mut triggers = BTreeSet::new();
    for pass in passes {
        if let Some(trigger) = pass.apply(payload) {
            info!("Page {}: {} raised {:?}", page_num, pass.name(), trigger);
            triggers.insert(trigger);
        } else {
            debug!("Page {}: {} made no change", page_num, pass.name());
        }
    }
    triggers
}

// ── Pass 1: strip invisible characters ──────────────────────────────────────

/// Removes zero-width and formatting characters from titles, notes and
/// table markup.
pub struct StripInvisibleChars;

const INVISIBLE: &[char] = &[
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // BOM
    '\u{00AD}', // soft hyphen
];

fn strip_invisible(s: &mut String) -> bool {
    if s.contains(INVISIBLE) {
        s.retain(|c| !INVISIBLE.contains(&c));
        true
    } else {
        false
    }
}

impl PayloadPass for StripInvisibleChars {
    fn name(&self) -> &'static str {
        "strip_invisible_chars"
    }

    fn apply(&self, payload: &mut ExtractionPayload) -> Option<ValidationTrigger> {
        for el in &mut payload.elements {
            strip_invisible(&mut el.title);
            if let Some(ref mut notes) = el.notes {
                strip_invisible(notes);
            }
            if let Some(ElementStructure::Table { ref mut html }) = el.structure {
                strip_invisible(html);
            }
        }
        None
    }
}

// ── Pass 2: compatibility-matrix column order ───────────────────────────────

/// Reverses the data columns of a compatibility matrix the model mirrored.
///
/// Applies to a table only when all of these hold:
/// 1. the first cell of the column-header row is empty;
/// 2. every body row starts with a non-empty label cell followed by data;
/// 3. the element title contains one of the markers (case-insensitive).
///
/// A table missing any one of these comes out byte-identical. A table is
/// repaired at most once per call.
pub struct ColumnOrderRepair {
    markers: Vec<String>,
}

impl ColumnOrderRepair {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    fn has_marker(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.markers
            .iter()
            .any(|m| !m.is_empty() && title.contains(m.as_str()))
    }

    /// `true` when the header and body shapes match the mirrored-matrix
    /// pattern.
    pub fn matches_shape(table: &HtmlTable) -> bool {
        let Some(header) = table.column_header() else {
            return false;
        };
        let header_starts_empty = header.first().is_some_and(|c| c.is_empty());
        let rows_have_labels = !table.body.is_empty()
            && table
                .body
                .iter()
                .all(|row| row.len() >= 2 && row.first().is_some_and(|c| !c.is_empty()));
        header_starts_empty && rows_have_labels
    }

    fn reverse_data_columns(table: &mut HtmlTable) {
        for row in table.header.iter_mut().chain(table.body.iter_mut()) {
            if row.len() > 2 {
                row[1..].reverse();
            }
        }
    }
}

impl PayloadPass for ColumnOrderRepair {
    fn name(&self) -> &'static str {
        "column_order_repair"
    }

    fn apply(&self, payload: &mut ExtractionPayload) -> Option<ValidationTrigger> {
        let mut repaired = false;
        for el in &mut payload.elements {
            let Some(ElementStructure::Table { ref mut html }) = el.structure else {
                continue;
            };
            if !self.has_marker(&el.title) {
                continue;
            }
            let Some(mut table) = HtmlTable::parse(html) else {
                continue;
            };
            if !Self::matches_shape(&table) {
                continue;
            }
            Self::reverse_data_columns(&mut table);
            *html = table.to_html();
            debug!("Reversed data columns of '{}'", el.title);
            repaired = true;
        }
        repaired.then_some(ValidationTrigger::ColumnsReordered)
    }
}

// ── Pass 3: normalise table markup ──────────────────────────────────────────

/// Re-renders every table through [`HtmlTable`] so persisted markup has one
/// shape: `<caption>`, `<thead>`, `<tbody>`, no attributes besides spans.
/// Inline markup inside cells (`<sup>`, `<sub>`, `<br>`) is kept.
pub struct NormaliseTableMarkup;

impl PayloadPass for NormaliseTableMarkup {
    fn name(&self) -> &'static str {
        "normalise_table_markup"
    }

    fn apply(&self, payload: &mut ExtractionPayload) -> Option<ValidationTrigger> {
        for el in &mut payload.elements {
            if let Some(ElementStructure::Table { ref mut html }) = el.structure {
                if let Some(table) = HtmlTable::parse(html) {
                    *html = table.to_html();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedElement, PayloadKind};

    const MIRRORED: &str = "<table><thead><tr><th></th><th>C</th><th>B</th><th>A</th></tr></thead>\
        <tbody><tr><td>A</td><td>1</td><td>2</td><td>3</td></tr>\
        <tr><td>B</td><td>4</td><td>5</td><td>6</td></tr></tbody></table>";

    fn markers() -> Vec<String> {
        vec!["compatib".into(), "mistura".into(), "mixture".into()]
    }

    fn payload(title: &str, html: &str) -> ExtractionPayload {
        ExtractionPayload {
            kind: PayloadKind::TableSet,
            elements: vec![ExtractedElement {
                title: title.into(),
                structure: Some(ElementStructure::Table { html: html.into() }),
                notes: None,
            }],
        }
    }

    fn header_of(p: &ExtractionPayload) -> Vec<String> {
        let t = HtmlTable::parse(p.elements[0].html().unwrap()).unwrap();
        t.column_header().unwrap().iter().map(|c| c.text.clone()).collect()
    }

    #[test]
    fn repairs_marked_matrix() {
        let mut p = payload("Tabela 5. Compatibilidade de misturas", MIRRORED);
        let trig = ColumnOrderRepair::new(&markers()).apply(&mut p);
        assert_eq!(trig, Some(ValidationTrigger::ColumnsReordered));
        assert_eq!(header_of(&p), ["", "A", "B", "C"]);
        let t = HtmlTable::parse(p.elements[0].html().unwrap()).unwrap();
        assert_eq!(t.body[0][1].text, "3");
        assert_eq!(t.body[0][0].text, "A");
    }

    #[test]
    fn marker_only_in_notes_leaves_table_untouched() {
        let mut p = payload("Table 2. Yield", MIRRORED);
        p.elements[0].notes = Some("Tank MIXTURE trial".into());
        let before = p.clone();
        assert!(ColumnOrderRepair::new(&markers()).apply(&mut p).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn marker_only_in_caption_leaves_table_untouched() {
        let html = MIRRORED.replace("<table>", "<table><caption>Compatibility</caption>");
        let mut p = payload("Table 2. Yield", &html);
        let before = p.clone();
        assert!(ColumnOrderRepair::new(&markers()).apply(&mut p).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn missing_marker_leaves_table_untouched() {
        let mut p = payload("Table 2. Yield", MIRRORED);
        let before = p.clone();
        assert!(ColumnOrderRepair::new(&markers()).apply(&mut p).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn filled_corner_leaves_table_untouched() {
        let html = MIRRORED.replace("<th></th>", "<th>Product</th>");
        let mut p = payload("Compatibility", &html);
        let before = p.clone();
        assert!(ColumnOrderRepair::new(&markers()).apply(&mut p).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn unlabelled_row_leaves_table_untouched() {
        let html = MIRRORED.replace("<td>B</td>", "<td></td>");
        let mut p = payload("Compatibility", &html);
        let before = p.clone();
        assert!(ColumnOrderRepair::new(&markers()).apply(&mut p).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn spanning_cells_do_not_block_repair() {
        let html = MIRRORED.replace("<td>1</td><td>2</td>", "<td colspan=\"2\">1</td>");
        let mut p = payload("Compatibility", &html);
        let trig = ColumnOrderRepair::new(&markers()).apply(&mut p);
        assert_eq!(trig, Some(ValidationTrigger::ColumnsReordered));
        let t = HtmlTable::parse(p.elements[0].html().unwrap()).unwrap();
        assert_eq!(t.body[0][1].text, "3");
        assert_eq!(t.body[0][2].colspan, 2);
    }

    #[test]
    fn strips_invisible_characters() {
        let mut p = payload("Table\u{200B} 1", "<table><tr><td>1\u{FEFF}</td></tr></table>");
        StripInvisibleChars.apply(&mut p);
        assert_eq!(p.elements[0].title, "Table 1");
        assert!(!p.elements[0].html().unwrap().contains('\u{FEFF}'));
    }

    #[test]
    fn normalises_markup() {
        let mut p = payload("T", "<TABLE border=1><TR><TH>a</TH></TR><TR><TD style='x'>1</TD></TR></TABLE>");
        NormaliseTableMarkup.apply(&mut p);
        assert_eq!(
            p.elements[0].html().unwrap(),
            "<table><thead><tr><th>a</th></tr></thead><tbody><tr><td>1</td></tr></tbody></table>"
        );
    }

    #[test]
    fn normalising_keeps_superscripts_and_subscripts() {
        let mut p = payload(
            "T",
            "<table><tr><th>N<sub>2</sub>O</th></tr><tr><td>12,3<sup>a</sup></td></tr></table>",
        );
        NormaliseTableMarkup.apply(&mut p);
        let html = p.elements[0].html().unwrap();
        assert!(html.contains("<th>N<sub>2</sub>O</th>"));
        assert!(html.contains("<td>12,3<sup>a</sup></td>"));
    }

    #[test]
    fn run_passes_collects_triggers() {
        let mut p = payload("Compatibilidade", MIRRORED);
        let triggers = run_passes(1, &mut p, &default_passes(&markers()));
        assert_eq!(
            triggers.into_iter().collect::<Vec<_>>(),
            vec![ValidationTrigger::ColumnsReordered]
        );
    }

    #[test]
    fn charts_pass_through() {
        let mut p = ExtractionPayload {
            kind: PayloadKind::ChartSet,
            elements: vec![ExtractedElement {
                title: "Compatibility chart".into(),
                structure: Some(ElementStructure::Chart {
                    chart: Default::default(),
                }),
                notes: None,
            }],
        };
        let before = p.clone();
        assert!(run_passes(1, &mut p, &default_passes(&markers())).is_empty());
        assert_eq!(p, before);
    }
}
