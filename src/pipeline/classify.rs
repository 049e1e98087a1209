//! Pre-check classification: the cheap first look at every page.
//!
//! The pre-check decides whether a page is worth an extraction call at all,
//! how many elements the extraction must return, whether the page is
//! sideways, and which structural hints go into the extraction prompt.
//!
//! [`Classifier`] is the seam; [`LlmClassifier`] is the production
//! implementation on the cheap model tier. [`parse_classification`] is the
//! strict boundary between model text and [`PageClassification`].

use crate::error::ClassificationError;
use crate::model::{ContentType, ElementDescriptor, PageClassification, Rotation};
use crate::pipeline::encode::PageImage;
use crate::pipeline::llm::{extract_json, VisionModel};
use crate::prompts::PRECHECK_SYSTEM_PROMPT;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Classifies a page image.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, page: &PageImage) -> Result<PageClassification, ClassificationError>;
}

/// [`Classifier`] backed by the pre-check model tier.
pub struct LlmClassifier {
    model: VisionModel,
}

impl LlmClassifier {
    pub fn new(model: VisionModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, page: &PageImage) -> Result<PageClassification, ClassificationError> {
        let text = self
            .model
            .complete(
                page.page_num,
                PRECHECK_SYSTEM_PROMPT,
                "Classify this page.",
                page.to_image_data(),
            )
            .await
            .map_err(ClassificationError::Call)?;

        let classification = parse_classification(&text)?;
        info!(
            "Page {}: pre-check → {} × {} (rotation {}°)",
            page.page_num,
            classification.content_type.as_str(),
            classification.element_count,
            classification.rotation.degrees()
        );
        Ok(classification)
    }
}

/// Parse a pre-check response.
///
/// `content_type` and `element_count` are required (`count` is accepted for
/// the latter). `rotation` defaults to 0 and must be a multiple of 90.
/// Descriptors that are not objects, or lack a `kind`, are dropped.
pub fn parse_classification(text: &str) -> Result<PageClassification, ClassificationError> {
    let value = extract_json(text).map_err(ClassificationError::NotJson)?;
    let obj = value
        .as_object()
        .ok_or_else(|| ClassificationError::NotJson("top level is not an object".into()))?;

    let content_type = parse_content_type(obj)?;
    let element_count = parse_element_count(obj)?;
    let rotation = parse_rotation(obj)?;

    let elements = match obj.get("elements") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                match serde_json::from_value::<ElementDescriptor>(item.clone()) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("Pre-check descriptor {} dropped: {}", i + 1, e);
                        None
                    }
                }
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ClassificationError::InvalidField {
                field: "elements",
                value: other.to_string(),
            })
        }
    };

    if elements.len() > element_count && element_count > 0 {
        debug!(
            "Pre-check listed {} descriptors for {} elements",
            elements.len(),
            element_count
        );
    }

    Ok(PageClassification {
        content_type,
        element_count,
        rotation,
        elements,
        notes: optional_string(obj, "notes"),
        legend_text: optional_string(obj, "legend_text"),
    })
}

fn parse_content_type(obj: &Map<String, Value>) -> Result<ContentType, ClassificationError> {
    let raw = obj
        .get("content_type")
        .ok_or(ClassificationError::MissingField("content_type"))?;
    serde_json::from_value::<ContentType>(raw.clone()).map_err(|_| {
        ClassificationError::InvalidField {
            field: "content_type",
            value: raw.to_string(),
        }
    })
}

fn parse_element_count(obj: &Map<String, Value>) -> Result<usize, ClassificationError> {
    let raw = obj
        .get("element_count")
        .or_else(|| obj.get("count"))
        .ok_or(ClassificationError::MissingField("element_count"))?;
    raw.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| ClassificationError::InvalidField {
            field: "element_count",
            value: raw.to_string(),
        })
}

fn parse_rotation(obj: &Map<String, Value>) -> Result<Rotation, ClassificationError> {
    match obj.get("rotation") {
        None | Some(Value::Null) => Ok(Rotation::None),
        Some(raw) => raw
            .as_i64()
            .and_then(Rotation::from_degrees)
            .ok_or_else(|| ClassificationError::InvalidField {
                field: "rotation",
                value: raw.to_string(),
            }),
    }
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
