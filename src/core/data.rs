use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Attribute mapping attached to an extraction. Values are strings or lists of strings.
pub type Attributes = Map<String, Value>;

/// Character positions (Unicode scalar values) in the original document.
/// `start_pos` is inclusive, `end_pos` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharInterval {
    pub start_pos: usize,
    pub end_pos: usize,
}

impl CharInterval {
    pub fn new(start_pos: usize, end_pos: usize) -> Self {
        debug_assert!(start_pos <= end_pos);
        Self { start_pos, end_pos }
    }

    pub fn len(&self) -> usize {
        self.end_pos - self.start_pos
    }

    pub fn is_empty(&self) -> bool {
        self.start_pos == self.end_pos
    }

    pub fn overlaps(&self, other: &CharInterval) -> bool {
        self.start_pos < other.end_pos && other.start_pos < self.end_pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStatus {
    MatchExact,
    MatchGreater,
    MatchLesser,
    MatchFuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub extraction_class: String,
    pub extraction_text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_interval: Option<CharInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_status: Option<AlignmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_index: Option<usize>,
}

impl Extraction {
    pub fn new(extraction_class: impl Into<String>, extraction_text: impl Into<String>) -> Self {
        Self {
            extraction_class: extraction_class.into(),
            extraction_text: extraction_text.into(),
            attributes: Map::new(),
            char_interval: None,
            alignment_status: None,
            extraction_index: None,
            group_index: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn with_attributes<K, V, I>(mut self, attributes: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in attributes {
            self.attributes.insert(key.into(), Value::String(value.into()));
        }
        self
    }

    pub fn with_char_interval(mut self, start_pos: usize, end_pos: usize) -> Self {
        self.char_interval = Some(CharInterval::new(start_pos, end_pos));
        self
    }

    pub fn is_aligned(&self) -> bool {
        self.char_interval.is_some()
    }
}

/// A few-shot example: source text plus the extractions expected from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleData {
    pub text: String,
    #[serde(default)]
    pub extractions: Vec<Extraction>,
}

impl ExampleData {
    pub fn new(text: impl Into<String>, extractions: Vec<Extraction>) -> Self {
        Self {
            text: text.into(),
            extractions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub text: String,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            document_id: document_id_for(&text),
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub extractions: Vec<Extraction>,
}

impl AnnotatedDocument {
    pub fn new(document: Document, extractions: Vec<Extraction>) -> Self {
        Self {
            document_id: document.document_id,
            text: document.text,
            extractions,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Text covered by an interval, or `None` when it falls outside the document.
    pub fn slice(&self, interval: &CharInterval) -> Option<String> {
        if interval.end_pos > self.char_count() {
            return None;
        }
        Some(
            self.text
                .chars()
                .skip(interval.start_pos)
                .take(interval.len())
                .collect(),
        )
    }
}

/// Stable id derived from the document content.
pub fn document_id_for(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("doc_{}", hex)
}
