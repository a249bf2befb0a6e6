pub mod data;
pub mod tokenizer;
pub mod chunking;
pub mod prompting;
pub mod resolver;
pub mod alignment;
pub mod merge;
pub mod llm_client;
pub mod extractor;

pub use data::{AnnotatedDocument, CharInterval, Document, ExampleData, Extraction, FormatType};
pub use llm_client::{InferenceError, LanguageModel, OllamaClient};
pub use extractor::{Extractor, ExtractionResult};
