use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use anyhow::{Result, Context};

use crate::core::data::{ExampleData, FormatType};
use crate::core::llm_client::DEFAULT_MODEL_URL;

mod presets;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt_description: String,
    pub examples: Vec<ExampleData>,
    #[serde(default)]
    pub llm_settings: LlmSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackSettings>,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub format_type: FormatType,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default = "default_one")]
    pub extraction_passes: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_char_buffer")]
    pub max_char_buffer: usize,
    #[serde(default = "default_true")]
    pub use_schema_constraints: bool,
    #[serde(default = "default_true")]
    pub tokenize_cjk_by_char: bool,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_alignment_threshold: f32,
    #[serde(default = "default_one")]
    pub max_parse_retries: usize,
    #[serde(default = "default_true")]
    pub normalize_quotes: bool,
}

/// Simpler settings tried once when the primary run fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_description: Option<String>,
    #[serde(default = "default_fallback_temperature")]
    pub temperature: f32,
    #[serde(default = "default_one")]
    pub extraction_passes: usize,
    #[serde(default = "default_fallback_workers")]
    pub max_workers: usize,
    #[serde(default = "default_fallback_buffer")]
    pub max_char_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub visualize: bool,
    #[serde(default = "default_true")]
    pub save_json: bool,
}

fn default_model_url() -> String {
    std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_MODEL_URL.to_string())
}
fn default_model_id() -> String { "qwen3:8b".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_timeout() -> u64 { 120 }
fn default_max_retries() -> u32 { 3 }
fn default_one() -> usize { 1 }
fn default_max_workers() -> usize { 10 }
fn default_max_char_buffer() -> usize { 1000 }
fn default_fuzzy_threshold() -> f32 { 0.75 }
fn default_fallback_temperature() -> f32 { 0.05 }
fn default_fallback_workers() -> usize { 5 }
fn default_fallback_buffer() -> usize { 300 }
fn default_output_dir() -> String { ".".to_string() }
fn default_true() -> bool { true }

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model_url: default_model_url(),
            model_id: default_model_id(),
            temperature: default_temperature(),
            format_type: FormatType::Json,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            num_ctx: None,
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            extraction_passes: 1,
            max_workers: default_max_workers(),
            max_char_buffer: default_max_char_buffer(),
            use_schema_constraints: true,
            tokenize_cjk_by_char: true,
            fuzzy_alignment_threshold: default_fuzzy_threshold(),
            max_parse_retries: 1,
            normalize_quotes: true,
        }
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            prompt_description: None,
            temperature: default_fallback_temperature(),
            extraction_passes: 1,
            max_workers: default_fallback_workers(),
            max_char_buffer: default_fallback_buffer(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            visualize: false,
            save_json: true,
        }
    }
}

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.prompt_description.trim().is_empty() {
            anyhow::bail!("No prompt description defined");
        }

        if self.examples.is_empty() {
            anyhow::bail!("At least one few-shot example is required");
        }

        for (i, example) in self.examples.iter().enumerate() {
            if example.text.trim().is_empty() {
                anyhow::bail!("Example {} has empty text", i + 1);
            }
            for extraction in &example.extractions {
                if extraction.extraction_class.trim().is_empty() {
                    anyhow::bail!("Example {} has an extraction without a class", i + 1);
                }
                if extraction.extraction_text.trim().is_empty() {
                    anyhow::bail!(
                        "Example {} has an empty '{}' extraction",
                        i + 1,
                        extraction.extraction_class
                    );
                }
            }
        }

        let settings = &self.extraction;
        if settings.extraction_passes == 0 {
            anyhow::bail!("extraction_passes must be at least 1");
        }
        if settings.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if settings.max_char_buffer == 0 {
            anyhow::bail!("max_char_buffer must be at least 1");
        }
        if !(0.0..=1.0).contains(&settings.fuzzy_alignment_threshold) {
            anyhow::bail!("fuzzy_alignment_threshold must be within [0, 1]");
        }

        if !(0.0..=2.0).contains(&self.llm_settings.temperature) {
            anyhow::bail!("temperature must be within [0, 2]");
        }
        if self.llm_settings.model_id.trim().is_empty() {
            anyhow::bail!("No model id defined");
        }
        url::Url::parse(&self.llm_settings.model_url)
            .with_context(|| format!("Invalid model URL: {}", self.llm_settings.model_url))?;

        if let Some(fallback) = &self.fallback {
            if fallback.extraction_passes == 0 || fallback.max_workers == 0 || fallback.max_char_buffer == 0 {
                anyhow::bail!("Fallback passes, workers and buffer must be at least 1");
            }
        }

        Ok(())
    }

    /// Company and product extraction from Chinese product brochures.
    pub fn example() -> Self {
        Configuration {
            name: "Company and product extraction".to_string(),
            description: "Extract companies, products and their relationships from product introductions".to_string(),
            prompt_description: presets::COMPANY_PROMPT.to_string(),
            examples: vec![
                presets::company_example(),
                presets::keyboard_product_example(),
                presets::relationship_example(),
            ],
            llm_settings: LlmSettings::default(),
            extraction: ExtractionSettings {
                extraction_passes: 2,
                max_workers: 10,
                max_char_buffer: 500,
                ..ExtractionSettings::default()
            },
            fallback: Some(FallbackSettings {
                prompt_description: Some(presets::COMPANY_FALLBACK_PROMPT.to_string()),
                ..FallbackSettings::default()
            }),
            output: OutputSettings::default(),
        }
    }

    /// Characters, emotions and relationships in literary text.
    pub fn literary_example() -> Self {
        Configuration {
            name: "Literary extraction".to_string(),
            description: "Extract characters, emotions and relationships from plays and novels".to_string(),
            prompt_description: presets::LITERARY_PROMPT.to_string(),
            examples: vec![presets::literary_example()],
            llm_settings: LlmSettings::default(),
            extraction: ExtractionSettings {
                extraction_passes: 3,
                max_workers: 20,
                max_char_buffer: 1000,
                ..ExtractionSettings::default()
            },
            fallback: None,
            output: OutputSettings::default(),
        }
    }

    /// Single-sentence company introduction.
    pub fn quickstart_example() -> Self {
        Configuration {
            name: "Quick start".to_string(),
            description: "Extract a company introduction".to_string(),
            prompt_description: presets::QUICKSTART_PROMPT.to_string(),
            examples: vec![presets::quickstart_example()],
            llm_settings: LlmSettings::default(),
            extraction: ExtractionSettings::default(),
            fallback: None,
            output: OutputSettings::default(),
        }
    }

    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "company" | "product" => Ok(Self::example()),
            "literary" => Ok(Self::literary_example()),
            "quickstart" => Ok(Self::quickstart_example()),
            other => anyhow::bail!(
                "Unknown preset '{}' (expected company, literary or quickstart)",
                other
            ),
        }
    }

    /// Class labels used by the examples, in first-seen order.
    pub fn extraction_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = Vec::new();
        for extraction in self.examples.iter().flat_map(|e| &e.extractions) {
            if !classes.contains(&extraction.extraction_class) {
                classes.push(extraction.extraction_class.clone());
            }
        }
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::Extraction;

    #[test]
    fn test_presets_are_valid() {
        for name in ["company", "literary", "quickstart"] {
            let config = Configuration::preset(name).unwrap();
            config.validate().unwrap();
        }
        assert!(Configuration::preset("medical").is_err());
    }

    #[test]
    fn test_literary_preset_settings() {
        let config = Configuration::literary_example();
        assert_eq!(config.extraction.extraction_passes, 3);
        assert_eq!(config.extraction.max_workers, 20);
        assert_eq!(config.extraction.max_char_buffer, 1000);
        assert_eq!(
            config.extraction_classes(),
            vec!["character", "emotion", "relationship"]
        );
    }

    #[test]
    fn test_yaml_defaults_fill_in() {
        let yaml = r#"
name: minimal
prompt_description: Extract characters.
examples:
  - text: "ROMEO. But soft!"
    extractions:
      - extraction_class: character
        extraction_text: ROMEO
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.extraction.extraction_passes, 1);
        assert_eq!(config.extraction.max_char_buffer, 1000);
        assert!(config.extraction.use_schema_constraints);
        assert_eq!(config.llm_settings.format_type, FormatType::Json);
        assert!(config.fallback.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Configuration::example();
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Configuration::from_file(&path).unwrap();
        assert_eq!(loaded.name, config.name);
        assert_eq!(loaded.examples, config.examples);
        assert_eq!(loaded.extraction.max_char_buffer, 500);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Configuration::literary_example();
        config.extraction.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Configuration::literary_example();
        config.examples.clear();
        assert!(config.validate().is_err());

        let mut config = Configuration::literary_example();
        config.llm_settings.model_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Configuration::literary_example();
        config.examples[0].extractions.push(Extraction::new("character", "  "));
        assert!(config.validate().is_err());
    }
}
