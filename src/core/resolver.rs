//! Turns raw model output into extractions.
//!
//! The expected wire format is
//! `{"extractions": [{"<class>": "<text>", "<class>_attributes": {...}}]}`.
//! A bare top-level array is accepted as well. Reasoning models often emit a
//! `<think>` block and markdown fences before the payload; both are stripped.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::data::{Extraction, FormatType};
use crate::handlers::normalize_quotes;

pub const EXTRACTIONS_KEY: &str = "extractions";
pub const ATTRIBUTES_SUFFIX: &str = "_attributes";
pub const INDEX_SUFFIX: &str = "_index";

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Empty model output")]
    EmptyOutput,

    #[error("Failed to parse model output: {0}")]
    Parse(String),

    #[error("Unexpected output shape: {0}")]
    Shape(String),
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|yaml|yml)?\s*\n?(.*?)```").unwrap());

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([\]}])").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    format_type: FormatType,
}

impl Resolver {
    pub fn new(format_type: FormatType) -> Self {
        Self { format_type }
    }

    pub fn parse(&self, raw: &str) -> Result<Vec<Extraction>, ResolverError> {
        let payload = extract_payload(raw);
        if payload.is_empty() {
            return Err(ResolverError::EmptyOutput);
        }

        let value = match self.decode(&payload) {
            Ok(value) => value,
            Err(first_error) => {
                let repaired = repair(&payload);
                debug!("Retrying parse after repair: {}", first_error);
                self.decode(&repaired).map_err(|_| first_error)?
            }
        };

        extractions_from_value(value)
    }

    fn decode(&self, payload: &str) -> Result<Value, ResolverError> {
        match self.format_type {
            FormatType::Json => {
                serde_json::from_str(payload).map_err(|e| ResolverError::Parse(e.to_string()))
            }
            FormatType::Yaml => {
                serde_yaml::from_str(payload).map_err(|e| ResolverError::Parse(e.to_string()))
            }
        }
    }
}

fn extract_payload(raw: &str) -> String {
    let without_think = THINK_BLOCK.replace_all(raw, "");
    let trimmed = without_think.trim();

    if let Some(captures) = FENCED_BLOCK.captures(trimmed) {
        if let Some(inner) = captures.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    trimmed.to_string()
}

fn repair(payload: &str) -> String {
    let normalized = normalize_quotes(payload);
    TRAILING_COMMA.replace_all(&normalized, "$1").into_owned()
}

fn extractions_from_value(value: Value) -> Result<Vec<Extraction>, ResolverError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove(EXTRACTIONS_KEY) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(ResolverError::Shape(format!(
                    "'{}' is not a list: {}",
                    EXTRACTIONS_KEY, other
                )))
            }
            None => {
                return Err(ResolverError::Shape(format!(
                    "missing '{}' key",
                    EXTRACTIONS_KEY
                )))
            }
        },
        other => {
            return Err(ResolverError::Shape(format!(
                "expected an object or a list, got {}",
                other
            )))
        }
    };

    let mut extractions = Vec::new();
    for (group_index, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(object) => extractions.extend(extractions_from_item(object, group_index)),
            other => warn!("Skipping non-object extraction item: {}", other),
        }
    }

    extractions.sort_by_key(|e| (e.extraction_index.unwrap_or(usize::MAX), e.group_index));
    Ok(extractions)
}

/// One item may carry several classes, each paired with its own attributes.
fn extractions_from_item(object: Map<String, Value>, group_index: usize) -> Vec<Extraction> {
    let mut extractions = Vec::new();

    for (key, value) in &object {
        if key.ends_with(ATTRIBUTES_SUFFIX) || key.ends_with(INDEX_SUFFIX) {
            continue;
        }

        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => {
                warn!("Skipping extraction '{}' with non-scalar text: {}", key, other);
                continue;
            }
        };
        if text.is_empty() {
            warn!("Skipping extraction '{}' with empty text", key);
            continue;
        }

        let mut extraction = Extraction::new(key.clone(), text);
        extraction.group_index = Some(group_index);

        if let Some(Value::Object(attributes)) = object.get(&format!("{}{}", key, ATTRIBUTES_SUFFIX)) {
            extraction.attributes = normalize_attributes(attributes);
        }
        extraction.extraction_index = object
            .get(&format!("{}{}", key, INDEX_SUFFIX))
            .and_then(Value::as_u64)
            .map(|i| i as usize);

        extractions.push(extraction);
    }

    extractions
}

/// Attribute values become strings, or lists of strings.
fn normalize_attributes(attributes: &Map<String, Value>) -> Map<String, Value> {
    attributes
        .iter()
        .filter_map(|(name, value)| {
            let normalized = match value {
                Value::Null => return None,
                Value::String(_) => value.clone(),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| Value::String(scalar_to_string(item)))
                        .collect(),
                ),
                other => Value::String(scalar_to_string(other)),
            };
            Some((name.clone(), normalized))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
