//! Output directory layout and writers.
//!
//! ```text
//! <out>/
//!   summary.html            every table and chart of every run, merged
//!   page-007/
//!     page.json             the full PageRecord
//!     table-01.html         one standalone document per table
//!     chart-02.json         chart data plus derived optima
//!     REVIEW.txt            only when the page is flagged
//! ```
//!
//! `page.json` doubles as the checkpoint: a page whose record exists is not
//! processed again unless `force_reprocess` is set. Every file is written to
//! a `.tmp` sibling and renamed, so an interrupted run never leaves a
//! half-written checkpoint behind.

use crate::model::{ChartData, ElementStructure, ExtractedElement, QuadraticOptimum};
use crate::output::{PageOutcome, PageRecord, SkipReason};
use crate::pipeline::table::escape_html;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SUMMARY_FILE: &str = "summary.html";
pub const PAGE_RECORD_FILE: &str = "page.json";
pub const REVIEW_FILE: &str = "REVIEW.txt";

static RE_ARTIFACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:table-\d+\.html|chart-\d+\.json|REVIEW\.txt|page\.json)$").unwrap());

static RE_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<section class='table-block'><h3>Page\s+(\d+)\s+-\s+(\S+)</h3>(.*?)</section>")
        .unwrap()
});

/// `<out>/page-NNN`.
pub fn page_dir(root: &Path, page_num: usize) -> PathBuf {
    root.join(format!("page-{page_num:03}"))
}

/// `true` when a previous run already wrote this page's record.
pub fn is_checkpointed(root: &Path, page_num: usize) -> bool {
    page_dir(root, page_num).join(PAGE_RECORD_FILE).is_file()
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

fn element_label(el: &ExtractedElement, position: usize) -> String {
    match el.structure {
        Some(ElementStructure::Chart { .. }) => format!("chart-{position:02}"),
        _ => format!("table-{position:02}"),
    }
}

#[derive(Serialize)]
struct ChartArtifact<'a> {
    page: usize,
    title: &'a str,
    notes: Option<&'a str>,
    chart: &'a ChartData,
    optima: Vec<PanelOptimum<'a>>,
}

#[derive(Serialize)]
struct PanelOptimum<'a> {
    panel: &'a str,
    #[serde(flatten)]
    optimum: QuadraticOptimum,
}

fn chart_optima(chart: &ChartData) -> Vec<PanelOptimum<'_>> {
    chart
        .equations
        .iter()
        .filter_map(|eq| {
            eq.optimum().map(|optimum| PanelOptimum {
                panel: &eq.panel,
                optimum,
            })
        })
        .collect()
}

/// `true` when `record` replaces whatever an earlier run wrote for its page.
fn supersedes_previous(record: &PageRecord) -> bool {
    record.error.is_none() && record.outcome != PageOutcome::Skipped(SkipReason::Checkpointed)
}

/// Remove the artifacts an earlier run left in `dir`. Other files stay.
async fn clear_page_artifacts(dir: &Path) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| RE_ARTIFACT.is_match(n)) {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Write the artifacts of one page.
///
/// Artifacts of an earlier run of the same page are removed first, so a
/// re-extraction with fewer elements leaves nothing stale behind. Records
/// without a payload still get `page.json`, so text-only pages are
/// checkpointed too. Records carrying an error get no `page.json`: the next
/// run retries them.
pub async fn write_page(root: &Path, record: &PageRecord) -> io::Result<()> {
    let dir = page_dir(root, record.page_num);
    if supersedes_previous(record) {
        let removed = clear_page_artifacts(&dir).await?;
        if removed > 0 {
            debug!("Page {}: removed {} stale artifacts", record.page_num, removed);
        }
    }
    tokio::fs::create_dir_all(&dir).await?;

    if let Some(ref payload) = record.payload {
        for (i, el) in payload.elements.iter().enumerate() {
            let label = element_label(el, i + 1);
            match el.structure {
                Some(ElementStructure::Table { ref html }) => {
                    let doc = standalone_table(record.page_num, el, html);
                    atomic_write(&dir.join(format!("{label}.html")), doc.as_bytes()).await?;
                }
                Some(ElementStructure::Chart { ref chart }) => {
                    let artifact = ChartArtifact {
                        page: record.page_num,
                        title: &el.title,
                        notes: el.notes.as_deref(),
                        chart,
                        optima: chart_optima(chart),
                    };
                    let json = serde_json::to_vec_pretty(&artifact).map_err(io::Error::other)?;
                    atomic_write(&dir.join(format!("{label}.json")), &json).await?;
                }
                None => debug!("Page {}: {} has no body, not written", record.page_num, label),
            }
        }
    }

    if record.is_flagged() {
        atomic_write(&dir.join(REVIEW_FILE), review_notice(record).as_bytes()).await?;
    }

    if record.error.is_some() {
        return Ok(());
    }

    // Last, so an interrupted write never looks checkpointed.
    let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    atomic_write(&dir.join(PAGE_RECORD_FILE), &json).await?;
    debug!("Page {}: artifacts written to {}", record.page_num, dir.display());
    Ok(())
}

fn standalone_table(page_num: usize, el: &ExtractedElement, html: &str) -> String {
    let notes = el
        .notes
        .as_deref()
        .map(|n| format!("<p class='notes'>{}</p>", escape_html(n)))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'><title>Page {page_num} - {title}</title>\
         <style>{STYLE}</style></head><body><h3>{title}</h3>{html}{notes}</body></html>\n",
        title = escape_html(&el.title),
    )
}

fn review_notice(record: &PageRecord) -> String {
    let (expected, extracted) = record
        .validation
        .as_ref()
        .map(|v| (v.expected_count, v.extracted_count))
        .unwrap_or_default();
    format!(
        "MANUAL REVIEW REQUIRED\n\
         \n\
         Page: {page}\n\
         Elements counted by the pre-check: {expected}\n\
         Elements extracted:                {extracted}\n\
         \n\
         Check against the source page:\n\
         1. Open page.json and confirm every table and chart is present.\n\
         2. Compare cell values with the PDF, especially numbers.\n\
         3. Note any missing element for correction.\n",
        page = record.page_num,
    )
}

// ── summary.html ─────────────────────────────────────────────────────────────

const STYLE: &str = "body{font-family:Arial,sans-serif;padding:20px;background:#f9f9f9;color:#333;}\
section.table-block{background:#fff;border:1px solid #ddd;margin-bottom:20px;padding:15px;border-radius:6px;}\
section.table-block h3,h3{margin-top:0;font-size:16px;}\
table{border-collapse:collapse;width:100%;margin-top:10px;}table,th,td{border:1px solid #ccc;}\
th,td{padding:6px;font-size:13px;text-align:left;}thead tr{background:#eee;}\
p.notes{color:#666;font-size:12px;}";

/// One `<section>` of the summary, keyed by `(page, label)`.
type SummaryEntries = BTreeMap<(usize, String), String>;

fn section_body(el: &ExtractedElement) -> Option<String> {
    let body = match el.structure {
        Some(ElementStructure::Table { ref html }) => html.clone(),
        Some(ElementStructure::Chart { ref chart }) => chart_table(chart),
        None => return None,
    };
    let notes = el
        .notes
        .as_deref()
        .map(|n| format!("<p class='notes'>{}</p>", escape_html(n)))
        .unwrap_or_default();
    Some(format!("<p><b>{}</b></p>{body}{notes}", escape_html(&el.title)))
}

/// Equations and their optima as an HTML table.
fn chart_table(chart: &ChartData) -> String {
    if chart.equations.is_empty() {
        let mut html = String::from("<table><thead><tr><th>Series</th>");
        for x in &chart.x_values {
            html.push_str(&format!("<th>{}</th>", escape_html(x)));
        }
        html.push_str("</tr></thead><tbody>");
        for s in &chart.series {
            html.push_str(&format!("<tr><td>{}</td>", escape_html(&s.name)));
            for v in &s.values {
                let cell = v.map(|v| v.to_string()).unwrap_or_default();
                html.push_str(&format!("<td>{cell}</td>"));
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        return html;
    }

    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_default();
    let mut html = String::from(
        "<table><thead><tr><th>Panel</th><th>a</th><th>b</th><th>c</th><th>R²</th>\
         <th>X max</th><th>Y max</th><th>X 90%</th></tr></thead><tbody>",
    );
    for eq in &chart.equations {
        let opt = eq.optimum();
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&eq.panel),
            eq.a,
            eq.b,
            eq.c,
            fmt(eq.r_squared),
            fmt(opt.map(|o| o.x_max)),
            fmt(opt.map(|o| o.y_max)),
            fmt(opt.and_then(|o| o.x_90)),
        ));
    }
    html.push_str("</tbody></table>");
    html
}

fn parse_summary(content: &str) -> SummaryEntries {
    RE_SECTION
        .captures_iter(content)
        .filter_map(|c| {
            let page = c[1].parse().ok()?;
            Some(((page, c[2].to_string()), c[3].to_string()))
        })
        .collect()
}

fn render_summary(entries: &SummaryEntries) -> String {
    let sections: Vec<String> = entries
        .iter()
        .map(|((page, label), html)| {
            format!("<section class='table-block'><h3>Page {page} - {label}</h3>{html}</section>")
        })
        .collect();
    format!(
        "<html><head><meta charset='utf-8'><style>{STYLE}</style></head><body>\
         <h1>Extracted tables and charts</h1>\
         <p style='color:#666;font-size:14px;'>Total: {} | Last updated: {}</p>\n{}\n</body></html>\n",
        entries.len(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        sections.join("\n"),
    )
}

/// Merge this run's elements into `summary.html`.
///
/// Sections from earlier runs survive for pages this run did not
/// re-extract. A re-extracted page replaces all of its old sections.
/// Returns the total number of sections.
pub async fn write_summary(root: &Path, records: &[PageRecord]) -> io::Result<usize> {
    let path = root.join(SUMMARY_FILE);

    let mut entries = match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            let existing = parse_summary(&content);
            debug!("Loaded {} sections from existing summary", existing.len());
            existing
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => SummaryEntries::new(),
        Err(e) => {
            warn!("Could not read {}, starting a new summary: {}", path.display(), e);
            SummaryEntries::new()
        }
    };

    for record in records.iter().filter(|r| supersedes_previous(r)) {
        entries.retain(|(page, _), _| *page != record.page_num);
    }

    let mut added = 0;
    for record in records.iter().filter(|r| r.has_payload()) {
        let Some(ref payload) = record.payload else {
            continue;
        };
        for (i, el) in payload.elements.iter().enumerate() {
            if let Some(body) = section_body(el) {
                entries.insert((record.page_num, element_label(el, i + 1)), body);
                added += 1;
            }
        }
    }

    atomic_write(&path, render_summary(&entries).as_bytes()).await?;
    info!(
        "summary.html: {} sections ({} from this run)",
        entries.len(),
        added
    );
    Ok(entries.len())
}
