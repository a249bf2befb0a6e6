use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, error};

use llm_entity_extractor::{
    config::Configuration,
    core::{
        llm_client::DEFAULT_MODEL_URL, prompting::PromptBuilder, ExtractionResult, Extractor,
        OllamaClient,
    },
    handlers::collect_sources,
    templates::{visualize_jsonl, Visualizer},
    utils::{output_base_names, save_annotated_documents, save_result_json, split_jsonl_to_json_files},
};

#[derive(Parser)]
#[command(
    name = "llm_entity_extractor",
    about = "Extract grounded entities and relationships from documents with a local Ollama model",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract entities from documents, directories or URLs
    Extract {
        /// Configuration file path
        #[arg(short, long, conflicts_with = "preset")]
        config: Option<PathBuf>,

        /// Built-in configuration: company, literary or quickstart
        #[arg(short, long)]
        preset: Option<String>,

        /// Input documents, directories or URLs
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Ollama server URL
        #[arg(long, env = "OLLAMA_HOST")]
        model_url: Option<String>,

        /// Model to use (overrides config)
        #[arg(short, long, env = "MODEL_ID")]
        model: Option<String>,

        /// Sampling temperature (overrides config)
        #[arg(short, long, env = "TEMPERATURE")]
        temperature: Option<f32>,

        /// Number of extraction passes
        #[arg(long)]
        passes: Option<usize>,

        /// Maximum concurrent requests
        #[arg(long)]
        workers: Option<usize>,

        /// Maximum characters per chunk
        #[arg(long)]
        buffer: Option<usize>,

        /// Disable schema-constrained decoding
        #[arg(long)]
        no_schema: bool,

        /// Do not retry with the fallback settings
        #[arg(long)]
        no_fallback: bool,

        /// Also write an HTML visualization
        #[arg(long)]
        visualize: bool,

        /// Skip the server health check
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Render a saved JSONL result as HTML
    Visualize {
        /// JSONL file written by `extract`
        #[arg(short, long)]
        input: PathBuf,

        /// Output HTML path (defaults next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Split a JSONL file into one JSON file per line
    SplitJsonl {
        /// JSONL file to split
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "temp_out_json")]
        output_dir: PathBuf,
    },

    /// Check Ollama server status
    CheckServer {
        /// Ollama server URL
        #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_MODEL_URL)]
        model_url: String,

        /// Also check that this model is pulled
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,

        /// Built-in configuration to start from
        #[arg(short, long, default_value = "company")]
        preset: String,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

/// Command-line overrides applied on top of the loaded configuration.
struct ExtractOverrides {
    output_dir: Option<PathBuf>,
    model_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    passes: Option<usize>,
    workers: Option<usize>,
    buffer: Option<usize>,
    no_schema: bool,
    no_fallback: bool,
    visualize: bool,
}

impl ExtractOverrides {
    fn apply(self, config: &mut Configuration) {
        if let Some(dir) = self.output_dir {
            config.output.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(url) = self.model_url {
            config.llm_settings.model_url = url;
        }
        if let Some(model) = self.model {
            config.llm_settings.model_id = model;
        }
        if let Some(temperature) = self.temperature {
            config.llm_settings.temperature = temperature;
        }
        if let Some(passes) = self.passes {
            config.extraction.extraction_passes = passes;
        }
        if let Some(workers) = self.workers {
            config.extraction.max_workers = workers;
        }
        if let Some(buffer) = self.buffer {
            config.extraction.max_char_buffer = buffer;
        }
        if self.no_schema {
            config.extraction.use_schema_constraints = false;
        }
        if self.no_fallback {
            config.fallback = None;
        }
        if self.visualize {
            config.output.visualize = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Extract {
            config,
            preset,
            input,
            output_dir,
            model_url,
            model,
            temperature,
            passes,
            workers,
            buffer,
            no_schema,
            no_fallback,
            visualize,
            skip_health_check,
        } => {
            let overrides = ExtractOverrides {
                output_dir,
                model_url,
                model,
                temperature,
                passes,
                workers,
                buffer,
                no_schema,
                no_fallback,
                visualize,
            };
            extract_command(config, preset, input, overrides, skip_health_check).await
        }
        Commands::Visualize { input, output } => visualize_command(input, output).await,
        Commands::SplitJsonl { input, output_dir } => split_jsonl_command(input, output_dir).await,
        Commands::CheckServer { model_url, model } => check_server_command(model_url, model).await,
        Commands::Validate { config } => validate_command(config).await,
        Commands::GenerateConfig { output, format, preset } => {
            generate_config_command(output, format, preset).await
        }
    }
}

async fn extract_command(
    config_path: Option<PathBuf>,
    preset: Option<String>,
    input: Vec<String>,
    overrides: ExtractOverrides,
    skip_health_check: bool,
) -> Result<()> {
    println!("{}", "Starting entity extraction...".bright_blue().bold());

    let mut config = match (&config_path, &preset) {
        (Some(path), _) => Configuration::from_file(path)?,
        (None, Some(name)) => Configuration::preset(name)?,
        (None, None) => Configuration::example(),
    };
    overrides.apply(&mut config);
    config.validate()?;

    let llm = &config.llm_settings;
    println!(" Configuration: {}", config.name.bright_green());
    println!(" Model: {} at {}", llm.model_id.bright_cyan(), llm.model_url);
    println!(
        " Passes: {}, workers: {}, chunk size: {} chars",
        config.extraction.extraction_passes,
        config.extraction.max_workers,
        config.extraction.max_char_buffer
    );

    for issue in PromptBuilder::check_examples(&config.examples) {
        println!(" {} {}", "warning:".yellow(), issue);
    }

    let client = OllamaClient::new(
        llm.model_url.clone(),
        llm.model_id.clone(),
        llm.timeout,
        llm.max_retries,
    )?
    .with_num_ctx(llm.num_ctx);

    if !skip_health_check {
        if !client.check_health().await? {
            error!("Ollama is not responding at {}", client.base_url());
            println!(" {} Make sure Ollama is running: {}", "hint:".yellow(), "ollama serve".bold());
            anyhow::bail!("Ollama health check failed");
        }
        match client.has_model(&llm.model_id).await {
            Ok(true) => println!(" Ollama is healthy, model {} is available", llm.model_id),
            Ok(false) => {
                warn!("Model {} is not pulled on the server", llm.model_id);
                println!(
                    " {} Pull the model first: {}",
                    "hint:".yellow(),
                    format!("ollama pull {}", llm.model_id).bold()
                );
            }
            Err(e) => warn!("Could not list models: {}", e),
        }
    }

    let mut sources = Vec::new();
    for item in &input {
        sources.extend(collect_sources(item)?);
    }
    if sources.is_empty() {
        anyhow::bail!("No supported documents found in the given inputs");
    }
    println!(" Documents: {}", sources.len());

    let model_id = llm.model_id.clone();
    let output_dir = PathBuf::from(&config.output.output_dir);
    let save_json = config.output.save_json;
    let visualize = config.output.visualize;
    let extractor = Extractor::new(config, Arc::new(client)).with_progress(true);

    let results = extractor.extract_from_multiple(&sources).await;
    let result_sources: Vec<&str> = results.iter().map(|r| r.source.as_str()).collect();
    let base_names = output_base_names(&result_sources, &model_id);

    let mut failures = 0;
    for (result, base_name) in results.iter().zip(&base_names) {
        println!("\n{} {}", "Document".bright_blue().bold(), result.source);

        if result.failed {
            failures += 1;
            for error in &result.errors {
                println!(" {} {}", "Extraction failed:".bright_red(), error);
            }
            if let Some(hint) = result.metadata.get("hint") {
                println!(" {} {}", "hint:".yellow(), hint);
            }
            continue;
        }

        for error in &result.errors {
            warn!("{}: {}", result.source, error);
        }
        print_summary(result);

        let jsonl_path = save_annotated_documents(
            std::slice::from_ref(&result.document),
            &output_dir,
            &format!("{}.jsonl", base_name),
        )?;
        println!(" JSONL saved to: {}", jsonl_path.display().to_string().bright_green());

        if save_json {
            let json_path = output_dir.join(format!("{}.json", base_name));
            save_result_json(result, &json_path)?;
            println!(" JSON saved to: {}", json_path.display().to_string().bright_green());
        }

        if visualize {
            let html_path = output_dir.join(format!("{}_visualization.html", base_name));
            let html = Visualizer::new()?.render(&result.document)?;
            tokio::fs::write(&html_path, html).await?;
            println!(" Visualization saved to: {}", html_path.display().to_string().bright_green());
        }
    }

    if failures == sources.len() {
        anyhow::bail!("Extraction failed for every document");
    }
    if failures > 0 {
        println!("\n{} {} of {} documents failed", "warning:".yellow(), failures, sources.len());
    }

    info!("Processed {} documents", sources.len());
    Ok(())
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        format!("{}...", text.chars().take(limit).collect::<String>())
    } else {
        text.to_string()
    }
}

fn print_summary(result: &ExtractionResult) {
    let extractions = result.extractions();

    println!(
        " {} Extracted {} entities from {} characters in {:.2}s",
        "✓".bright_green(),
        extractions.len().to_string().bold(),
        result.document.char_count(),
        result.processing_time_seconds
    );
    if result.used_fallback {
        println!(" {} results come from the fallback settings", "note:".yellow());
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for extraction in extractions {
        *counts.entry(extraction.extraction_class.as_str()).or_default() += 1;
    }
    let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    if !counts.is_empty() {
        println!(" Entity types:");
        for (class, count) in &counts {
            println!("   {}: {}", class.bright_cyan(), count);
        }
    }

    for (i, extraction) in extractions.iter().take(5).enumerate() {
        println!("\n {}. {}", i + 1, extraction.extraction_class.bright_cyan().bold());
        println!("    Text: {}", truncate_chars(&extraction.extraction_text, 100));
        if !extraction.attributes.is_empty() {
            println!(
                "    Attributes: {}",
                serde_json::to_string(&extraction.attributes).unwrap_or_default()
            );
        }
        match extraction.char_interval {
            Some(interval) => println!("    Position: {}-{}", interval.start_pos, interval.end_pos),
            None => println!("    Position: {}", "unaligned".dimmed()),
        }
    }
    if extractions.len() > 5 {
        println!("\n ... and {} more", extractions.len() - 5);
    }
}

async fn visualize_command(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    println!("{}", "Rendering visualization...".bright_blue().bold());

    let html = visualize_jsonl(&input)?;
    let output = output.unwrap_or_else(|| default_html_path(&input));
    tokio::fs::write(&output, html).await?;

    println!(" Visualization saved to: {}", output.display().to_string().bright_green());
    Ok(())
}

fn default_html_path(jsonl: &Path) -> PathBuf {
    let stem = jsonl
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extractions".to_string());
    jsonl.with_file_name(format!("{}_visualization.html", stem))
}

async fn split_jsonl_command(input: PathBuf, output_dir: PathBuf) -> Result<()> {
    println!("{}", "Splitting JSONL file...".bright_blue().bold());

    let report = split_jsonl_to_json_files(&input, &output_dir)?;

    println!(
        " Split {} into {} JSON files under {}",
        input.display(),
        report.written.len().to_string().bright_green(),
        output_dir.display()
    );
    if !report.skipped.is_empty() {
        let lines: Vec<String> = report.skipped.iter().map(|l| l.to_string()).collect();
        println!(" {} skipped invalid lines: {}", "warning:".yellow(), lines.join(", "));
    }
    Ok(())
}

async fn check_server_command(model_url: String, model: Option<String>) -> Result<()> {
    println!("{}", "Checking Ollama server...".bright_blue().bold());

    let client = OllamaClient::new(model_url.clone(), model.clone().unwrap_or_default(), 30, 1)?;

    if client.check_health().await? {
        println!(" Server is healthy at {}", model_url.bright_green());
    } else {
        println!(" Server is not responding at {}", model_url.bright_red());
        println!(" {} Make sure Ollama is running: {}", "hint:".yellow(), "ollama serve".bold());
        return Ok(());
    }

    match client.list_models().await {
        Ok(models) => {
            println!(" Available models:");
            for info in &models {
                let size = info
                    .size
                    .map(|s| format!(" ({:.1} GB)", s as f64 / 1e9))
                    .unwrap_or_default();
                println!("  - {}{}", info.name.bright_cyan(), size);
            }
        }
        Err(e) => {
            warn!("Could not list models: {}", e);
        }
    }

    if let Some(model) = model {
        if client.has_model(&model).await? {
            println!(" Model {} is available", model.bright_green());
        } else {
            println!(" Model {} is not pulled", model.bright_red());
            println!(" {} {}", "hint:".yellow(), format!("ollama pull {}", model).bold());
        }
    }

    Ok(())
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", "Validating configuration...".bright_blue().bold());

    match Configuration::from_file(&config_path) {
        Ok(config) => {
            match config.validate() {
                Ok(()) => {
                    println!(" Configuration is valid!");
                    println!(" Name: {}", config.name.bright_green());
                    println!(" Examples: {}", config.examples.len());
                    println!(" Classes: {}", config.extraction_classes().join(", "));
                    println!(" Model: {}", config.llm_settings.model_id);
                    println!(" Fallback: {}", if config.fallback.is_some() { "yes" } else { "no" });
                    for issue in PromptBuilder::check_examples(&config.examples) {
                        println!(" {} {}", "warning:".yellow(), issue);
                    }
                    Ok(())
                }
                Err(e) => {
                    error!("Configuration validation failed: {}", e);
                    Err(e)
                }
            }
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat, preset: String) -> Result<()> {
    println!("{}", "Generating example configuration...".bright_blue().bold());

    let config = Configuration::preset(&preset)?;

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(" Example configuration generated at: {}", output_path.display().to_string().bright_green());
    println!(" Edit the file to customize for your use case");

    Ok(())
}
