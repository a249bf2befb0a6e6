use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::core::data::{ExampleData, Extraction, FormatType};
use crate::core::resolver::{ATTRIBUTES_SUFFIX, EXTRACTIONS_KEY};

const QUESTION_PREFIX: &str = "Q: ";
const ANSWER_PREFIX: &str = "A: ";

pub struct PromptBuilder;

impl PromptBuilder {
    /// Renders the few-shot prompt for one chunk of the document.
    pub fn build_extraction_prompt(
        description: &str,
        examples: &[ExampleData],
        chunk_text: &str,
        format_type: FormatType,
    ) -> Result<String> {
        let mut prompt = String::new();

        prompt.push_str(description.trim_end());
        prompt.push_str("\n\n");

        if !examples.is_empty() {
            prompt.push_str("Examples\n");
            for example in examples {
                prompt.push_str(QUESTION_PREFIX);
                prompt.push_str(&example.text);
                prompt.push('\n');
                prompt.push_str(ANSWER_PREFIX);
                prompt.push_str(&Self::format_answer(&example.extractions, format_type)?);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str(QUESTION_PREFIX);
        prompt.push_str(chunk_text);
        prompt.push('\n');
        prompt.push_str(ANSWER_PREFIX);

        Ok(prompt)
    }

    /// Serializes extractions in the wire format the resolver reads back.
    pub fn format_answer(extractions: &[Extraction], format_type: FormatType) -> Result<String> {
        let items: Vec<Value> = extractions
            .iter()
            .map(|extraction| {
                let mut item = Map::new();
                item.insert(
                    extraction.extraction_class.clone(),
                    Value::String(extraction.extraction_text.clone()),
                );
                item.insert(
                    format!("{}{}", extraction.extraction_class, ATTRIBUTES_SUFFIX),
                    Value::Object(extraction.attributes.clone()),
                );
                Value::Object(item)
            })
            .collect();

        let mut answer = Map::new();
        answer.insert(EXTRACTIONS_KEY.to_string(), Value::Array(items));
        let answer = Value::Object(answer);

        match format_type {
            FormatType::Json => {
                serde_json::to_string_pretty(&answer).context("Failed to format example answer as JSON")
            }
            FormatType::Yaml => {
                serde_yaml::to_string(&answer).context("Failed to format example answer as YAML")
            }
        }
    }

    pub fn get_system_prompt(format_type: FormatType) -> &'static str {
        match format_type {
            FormatType::Json => {
                "You are an information extraction system. Answer every question with a single JSON object \
                 shaped like the examples. Copy extraction text exactly from the input, list entities in order \
                 of appearance, and never wrap the JSON in markdown or add commentary."
            }
            FormatType::Yaml => {
                "You are an information extraction system. Answer every question with a single YAML document \
                 shaped like the examples. Copy extraction text exactly from the input, list entities in order \
                 of appearance, and never add commentary."
            }
        }
    }

    /// Reports example extractions whose text does not occur in the example.
    pub fn check_examples(examples: &[ExampleData]) -> Vec<String> {
        let mut issues = Vec::new();
        for (i, example) in examples.iter().enumerate() {
            for extraction in &example.extractions {
                if !example.text.contains(&extraction.extraction_text) {
                    let issue = format!(
                        "Example {}: '{}' ({}) does not appear verbatim in the example text",
                        i + 1,
                        extraction.extraction_text,
                        extraction.extraction_class
                    );
                    warn!("{}", issue);
                    issues.push(issue);
                }
            }
        }
        issues
    }
}

/// Builds the JSON Schema passed to Ollama's `format` field.
pub struct SchemaBuilder;

impl SchemaBuilder {
    pub fn from_examples(examples: &[ExampleData]) -> Value {
        let mut item_properties = Map::new();

        for extraction in examples.iter().flat_map(|e| &e.extractions) {
            let class = &extraction.extraction_class;
            item_properties
                .entry(class.clone())
                .or_insert_with(|| json!({ "type": "string" }));

            let attributes_key = format!("{}{}", class, ATTRIBUTES_SUFFIX);
            let attributes = item_properties
                .entry(attributes_key)
                .or_insert_with(|| json!({ "type": "object", "properties": {} }));

            if let Some(properties) = attributes
                .get_mut("properties")
                .and_then(Value::as_object_mut)
            {
                for (name, value) in &extraction.attributes {
                    let schema = if value.is_array() {
                        json!({ "type": "array", "items": { "type": "string" } })
                    } else {
                        json!({ "type": "string" })
                    };
                    properties.entry(name.clone()).or_insert(schema);
                }
            }
        }

        json!({
            "type": "object",
            "properties": {
                EXTRACTIONS_KEY: {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": Value::Object(item_properties),
                    }
                }
            },
            "required": [EXTRACTIONS_KEY],
        })
    }
}
