pub mod config;
pub mod core;
pub mod handlers;
pub mod utils;
pub mod templates;

pub use config::Configuration;
pub use core::{Extractor, ExtractionResult, OllamaClient};
pub use handlers::DocumentProcessor;
pub use templates::Visualizer;
