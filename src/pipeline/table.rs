//! Minimal HTML table model for model-produced `<table>` markup.
//!
//! The extraction model returns each table as an HTML string. Validation needs
//! to count empty cells and the column-order repair needs to move cells
//! around, so the markup is parsed into a small grid, edited, and rendered
//! back. Only the subset of HTML that table markup uses is understood:
//! `caption`, `thead`/`tbody`, `tr`, `th`/`td`, `colspan`/`rowspan`, inline
//! tags inside cells and the common entities.
//!
//! Each cell keeps its inner markup as written (`<sup>`, `<sub>`, `<br>`) for
//! rendering. The decoded plain text is only used for emptiness and label
//! checks.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").unwrap());
static RE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<caption\b[^>]*>(.*?)</caption\s*>").unwrap());
static RE_THEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<thead\b[^>]*>(.*?)</thead\s*>").unwrap());
static RE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").unwrap());
static RE_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(td|th)\b([^>]*)>(.*?)</(?:td|th)\s*>").unwrap());
static RE_COLSPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)colspan\s*=\s*["']?(\d+)"#).unwrap());
static RE_ROWSPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)rowspan\s*=\s*["']?(\d+)"#).unwrap());
static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Decoded text with inline tags removed.
    pub text: String,
    /// Inner markup, rendered back verbatim.
    pub markup: String,
    pub colspan: usize,
    pub rowspan: usize,
}

impl Cell {
    /// A plain-text cell; `text` is escaped into its markup.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            markup: escape_html(&text),
            text,
            colspan: 1,
            rowspan: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Parsed table: header rows and body rows of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    /// Caption inner markup.
    pub caption: Option<String>,
    pub header: Vec<Vec<Cell>>,
    pub body: Vec<Vec<Cell>>,
}

impl HtmlTable {
    /// Parse the first `<table>` in `html`. `None` when there is none.
    ///
    /// Rows inside `<thead>` are header rows. Without a `<thead>`, leading
    /// rows made only of `<th>` cells are header rows.
    pub fn parse(html: &str) -> Option<Self> {
        let inner = RE_TABLE.captures(html)?.get(1)?.as_str();

        let caption = RE_CAPTION
            .captures(inner)
            .map(|c| cell_markup(&c[1]))
            .filter(|c| !cell_text(c).is_empty());

        let mut table = HtmlTable {
            caption,
            ..Default::default()
        };

        let thead = RE_THEAD.captures(inner).and_then(|c| c.get(0));
        if let Some(m) = thead {
            table.header = parse_rows(m.as_str()).into_iter().map(|(cells, _)| cells).collect();
            let rest = format!("{}{}", &inner[..m.start()], &inner[m.end()..]);
            table.body = parse_rows(&rest).into_iter().map(|(cells, _)| cells).collect();
        } else {
            let mut in_header = true;
            for (cells, all_th) in parse_rows(inner) {
                if in_header && all_th {
                    table.header.push(cells);
                } else {
                    in_header = false;
                    table.body.push(cells);
                }
            }
        }

        Some(table)
    }

    /// Last header row: the one whose cells label the data columns.
    pub fn column_header(&self) -> Option<&Vec<Cell>> {
        self.header.last()
    }

    /// `(empty, total)` over body cells.
    pub fn empty_cells(&self) -> (usize, usize) {
        self.body.iter().flatten().fold((0, 0), |(empty, total), cell| {
            (empty + usize::from(cell.is_empty()), total + 1)
        })
    }

    /// Render back to compact HTML with `<thead>`/`<tbody>` sections.
    pub fn to_html(&self) -> String {
        let mut html = String::from("<table>");
        if let Some(ref caption) = self.caption {
            html.push_str(&format!("<caption>{caption}</caption>"));
        }
        if !self.header.is_empty() {
            html.push_str("<thead>");
            for row in &self.header {
                push_row(&mut html, row, "th");
            }
            html.push_str("</thead>");
        }
        html.push_str("<tbody>");
        for row in &self.body {
            push_row(&mut html, row, "td");
        }
        html.push_str("</tbody></table>");
        html
    }
}

/// Empty-cell ratio across several tables. `0.0` when there are no cells.
pub fn empty_cell_ratio<'a>(tables: impl IntoIterator<Item = &'a HtmlTable>) -> f64 {
    let (empty, total) = tables
        .into_iter()
        .map(HtmlTable::empty_cells)
        .fold((0, 0), |(e, t), (de, dt)| (e + de, t + dt));
    if total == 0 {
        0.0
    } else {
        empty as f64 / total as f64
    }
}

fn parse_rows(html: &str) -> Vec<(Vec<Cell>, bool)> {
    RE_ROW
        .captures_iter(html)
        .filter_map(|row| {
            let mut all_th = true;
            let cells: Vec<Cell> = RE_CELL
                .captures_iter(&row[1])
                .map(|c| {
                    if !c[1].eq_ignore_ascii_case("th") {
                        all_th = false;
                    }
                    Cell {
                        text: cell_text(&c[3]),
                        markup: cell_markup(&c[3]),
                        colspan: span(&RE_COLSPAN, &c[2]),
                        rowspan: span(&RE_ROWSPAN, &c[2]),
                    }
                })
                .collect();
            (!cells.is_empty()).then_some((cells, all_th))
        })
        .collect()
}

fn span(re: &Regex, attrs: &str) -> usize {
    re.captures(attrs)
        .and_then(|c| c[1].parse().ok())
        .filter(|n: &usize| *n >= 1)
        .unwrap_or(1)
}

fn cell_markup(raw: &str) -> String {
    RE_WS.replace_all(raw.trim(), " ").into_owned()
}

fn cell_text(raw: &str) -> String {
    let s = RE_BR.replace_all(raw, " ");
    let s = RE_TAG.replace_all(&s, "");
    let s = decode_entities(&s);
    RE_WS.replace_all(s.trim(), " ").into_owned()
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn push_row(html: &mut String, row: &[Cell], tag: &str) {
    html.push_str("<tr>");
    for cell in row {
        html.push('<');
        html.push_str(tag);
        if cell.colspan > 1 {
            html.push_str(&format!(" colspan=\"{}\"", cell.colspan));
        }
        if cell.rowspan > 1 {
            html.push_str(&format!(" rowspan=\"{}\"", cell.rowspan));
        }
        html.push('>');
        html.push_str(&cell.markup);
        html.push_str(&format!("</{tag}>"));
    }
    html.push_str("</tr>");
}
