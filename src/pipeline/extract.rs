//! Extraction: the primary model call and the strict payload parser.
//!
//! [`Extractor`] is the seam; [`LlmExtractor`] sends the page image and the
//! synthesized prompt to the extraction tier. [`parse_payload`] turns the
//! loosely-typed response into an [`ExtractionPayload`] or rejects it with an
//! [`ExtractionError`]:
//!
//! | Response | Result |
//! |----------|--------|
//! | not JSON, or no `kind` / `elements` | `ExtractionError` |
//! | table element whose `html` has no `<table>` | `ExtractionError` |
//! | element without `html` / `chart` | kept, `structure: None` |
//! | coefficient written `"1,25"` | `1.25` |
//!
//! The older `{"type": "table_set", "tables": [...]}` shape is accepted too.

use crate::error::ExtractionError;
use crate::model::{
    ChartData, ElementStructure, Equation, ExtractedElement, ExtractionPayload, PayloadKind, Series,
};
use crate::pipeline::encode::PageImage;
use crate::pipeline::llm::{extract_json, VisionModel};
use crate::pipeline::synthesize::ExtractionPrompt;
use crate::prompts::EXTRACTION_SYSTEM_PROMPT;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Extracts tables and charts from a page image.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        page: &PageImage,
        prompt: &ExtractionPrompt,
    ) -> Result<ExtractionPayload, ExtractionError>;
}

/// [`Extractor`] backed by the extraction model tier.
pub struct LlmExtractor {
    model: VisionModel,
}

impl LlmExtractor {
    pub fn new(model: VisionModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        page: &PageImage,
        prompt: &ExtractionPrompt,
    ) -> Result<ExtractionPayload, ExtractionError> {
        let user_text = prompt.render();
        debug!(
            "Page {}: extraction prompt {} chars ({:?})",
            page.page_num,
            user_text.len(),
            prompt.escalation
        );

        let text = self
            .model
            .complete(
                page.page_num,
                EXTRACTION_SYSTEM_PROMPT,
                &user_text,
                page.to_image_data(),
            )
            .await
            .map_err(ExtractionError::Call)?;

        let payload = parse_payload(&text)?;
        info!(
            "Page {}: extracted {} element(s) as {:?}",
            page.page_num,
            payload.elements.len(),
            payload.kind
        );
        Ok(payload)
    }
}

/// Parse an extraction response into the strict payload schema.
pub fn parse_payload(text: &str) -> Result<ExtractionPayload, ExtractionError> {
    let value = extract_json(text).map_err(ExtractionError::NotJson)?;
    let obj = value
        .as_object()
        .ok_or_else(|| ExtractionError::NotJson("top level is not an object".into()))?;

    let raw_kind = obj
        .get("kind")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .ok_or(ExtractionError::MissingKey("kind"))?;

    // A bare single element: {"type": "table", "html": ...}
    if matches!(raw_kind, "table" | "chart") && !obj.contains_key("elements") {
        let kind = if raw_kind == "table" {
            PayloadKind::TableSet
        } else {
            PayloadKind::ChartSet
        };
        let element = parse_element(0, obj, kind)?;
        return Ok(ExtractionPayload {
            kind,
            elements: vec![element],
        });
    }

    let kind = match raw_kind {
        "table_set" => PayloadKind::TableSet,
        "chart_set" => PayloadKind::ChartSet,
        other => return Err(ExtractionError::UnknownKind(other.to_string())),
    };

    let items = obj
        .get("elements")
        .or_else(|| obj.get("tables"))
        .and_then(Value::as_array)
        .ok_or(ExtractionError::MissingKey("elements"))?;

    let elements = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let el = item.as_object().ok_or_else(|| ExtractionError::InvalidElement {
                index: i + 1,
                detail: "not an object".into(),
            })?;
            parse_element(i, el, kind)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExtractionPayload { kind, elements })
}

fn parse_element(
    index: usize,
    el: &Map<String, Value>,
    payload_kind: PayloadKind,
) -> Result<ExtractedElement, ExtractionError> {
    let invalid = |detail: String| ExtractionError::InvalidElement {
        index: index + 1,
        detail,
    };

    let is_table = match el.get("type").and_then(Value::as_str) {
        Some("table") => true,
        Some("chart") => false,
        Some(other) => return Err(invalid(format!("unknown element type '{other}'"))),
        None if el.contains_key("html") => true,
        None if el.contains_key("chart") => false,
        None => payload_kind == PayloadKind::TableSet,
    };

    let structure = if is_table {
        match el.get("html") {
            None | Some(Value::Null) => None,
            Some(Value::String(html)) if html.trim().is_empty() => None,
            Some(Value::String(html)) => {
                if !html.to_ascii_lowercase().contains("<table") {
                    return Err(invalid("html has no <table>".into()));
                }
                Some(ElementStructure::Table { html: html.clone() })
            }
            Some(other) => return Err(invalid(format!("html is not a string: {other}"))),
        }
    } else {
        match el.get("chart") {
            None | Some(Value::Null) => None,
            Some(Value::Object(chart)) => Some(ElementStructure::Chart {
                chart: parse_chart(chart).map_err(invalid)?,
            }),
            Some(other) => return Err(invalid(format!("chart is not an object: {other}"))),
        }
    };

    Ok(ExtractedElement {
        title: string_field(el, "title").unwrap_or_default(),
        structure,
        notes: string_field(el, "notes"),
    })
}

fn parse_chart(chart: &Map<String, Value>) -> Result<ChartData, String> {
    let equations = match chart.get("equations") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, eq)| parse_equation(i, eq).transpose())
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    let x_values = chart
        .get("x_values")
        .and_then(Value::as_array)
        .map(|xs| {
            xs.iter()
                .map(|x| match x {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let series = chart
        .get("series")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|s| Series {
                    name: string_field(s, "name").unwrap_or_default(),
                    values: s
                        .get("values")
                        .and_then(Value::as_array)
                        .map(|vs| vs.iter().map(number_value).collect())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChartData {
        x_label: string_field(chart, "x_label"),
        y_label: string_field(chart, "y_label"),
        equations,
        x_values,
        series,
    })
}

/// `Ok(None)` when a coefficient is null (unreadable); `Err` when it is
/// present but not a number.
fn parse_equation(index: usize, eq: &Value) -> Result<Option<Equation>, String> {
    let obj = eq
        .as_object()
        .ok_or_else(|| format!("equation {} is not an object", index + 1))?;

    let coef = |key: &str| -> Result<Option<f64>, String> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => number_value(v)
                .map(Some)
                .ok_or_else(|| format!("equation {} coefficient {key} = {v}", index + 1)),
        }
    };

    let (Some(a), Some(b), Some(c)) = (coef("a")?, coef("b")?, coef("c")?) else {
        debug!("Equation {} has unreadable coefficients, dropped", index + 1);
        return Ok(None);
    };

    let r_squared = ["r2", "r_squared", "R2"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(number_value);

    Ok(Some(Equation {
        panel: string_field(obj, "panel").unwrap_or_else(|| (index + 1).to_string()),
        a,
        b,
        c: c.abs(),
        r_squared,
    }))
}

fn number_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a number written with either decimal separator.
///
/// When both `,` and `.` appear, the last one is the decimal separator and
/// the other is a thousands separator. A lone `,` is a decimal comma. A
/// separator repeated on its own (`1.234.567`) is a thousands separator.
/// Unicode minus signs and inner spaces are accepted.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s: String = raw
        .trim()
        .replace(['\u{2212}', '\u{2013}'], "-")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{202f}' && *c != '\u{a0}')
        .collect();
    if s.is_empty() {
        return None;
    }

    let commas = s.matches(',').count();
    let dots = s.matches('.').count();

    let normalised = match (commas, dots) {
        (0, 0) => s,
        (0, 1) => s,
        (0, _) => s.replace('.', ""),
        (1, 0) => s.replace(',', "."),
        (_, 0) => s.replace(',', ""),
        _ => {
            let last_comma = s.rfind(',').unwrap_or(0);
            let last_dot = s.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
    };

    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}
