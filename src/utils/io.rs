use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::data::AnnotatedDocument;
use crate::core::extractor::ExtractionResult;

/// Writes one annotated document per line.
pub fn save_annotated_documents(
    documents: &[AnnotatedDocument],
    output_dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let path = output_dir.join(file_name);
    let file = fs::File::create(&path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for document in documents {
        let line = serde_json::to_string(document).context("Failed to serialize document")?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    info!("Saved {} document(s) to {}", documents.len(), path.display());
    Ok(path)
}

pub fn load_annotated_documents(path: &Path) -> Result<Vec<AnnotatedDocument>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open JSONL file: {}", path.display()))?;

    let mut documents = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let document = serde_json::from_str(&line)
            .with_context(|| format!("Invalid document on line {} of {}", index + 1, path.display()))?;
        documents.push(document);
    }

    Ok(documents)
}

/// Writes the compact `{model_id, temperature, input_text, extractions}` view.
pub fn save_result_json(result: &ExtractionResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(&result.summary_json())
        .context("Failed to serialize extraction result")?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct SplitReport {
    pub written: Vec<PathBuf>,
    /// 1-based line numbers that were not valid JSON.
    pub skipped: Vec<usize>,
}

/// Splits a JSONL file into `<line_no>.json` files, pretty-printed.
/// Blank lines are ignored and invalid lines skipped; line numbers stay 1-based.
pub fn split_jsonl_to_json_files(jsonl_path: &Path, output_dir: &Path) -> Result<SplitReport> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let file = fs::File::open(jsonl_path)
        .with_context(|| format!("Failed to open JSONL file: {}", jsonl_path.display()))?;

    let mut report = SplitReport::default();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read {}", jsonl_path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Line {} is not valid JSON, skipping: {}", line_no, e);
                report.skipped.push(line_no);
                continue;
            }
        };

        let output_path = output_dir.join(format!("{}.json", line_no));
        fs::write(&output_path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        report.written.push(output_path);
    }

    info!(
        "Split {} into {} JSON file(s) under {}",
        jsonl_path.display(),
        report.written.len(),
        output_dir.display()
    );
    Ok(report)
}

/// `{doc_name}_{model_id}` with path separators, colons and spaces replaced by `_`.
pub fn output_base_name(source: &str, model_id: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    let last_segment = without_query
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let doc_name = match last_segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last_segment,
    };
    let doc_name = if doc_name.is_empty() { "document" } else { doc_name };

    format!("{}_{}", doc_name, model_id)
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// [`output_base_name`] for each source, with `_2`, `_3`... appended to repeats so
/// that documents sharing a file stem do not overwrite each other's outputs.
pub fn output_base_names(sources: &[&str], model_id: &str) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();

    sources
        .iter()
        .map(|source| {
            let base = output_base_name(source, model_id);
            if taken.insert(base.clone()) {
                return base;
            }
            let mut suffix = 2;
            loop {
                let candidate = format!("{}_{}", base, suffix);
                if taken.insert(candidate.clone()) {
                    warn!("Output name {} is already used, writing {} as {}", base, source, candidate);
                    return candidate;
                }
                suffix += 1;
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::{Document, Extraction};

    fn sample_document() -> AnnotatedDocument {
        AnnotatedDocument::new(
            Document::new("ROMEO. But soft!"),
            vec![
                Extraction::new("character", "ROMEO")
                    .with_attribute("emotional_state", "wonder")
                    .with_char_interval(0, 5),
                Extraction::new("emotion", "But soft!").with_char_interval(7, 16),
            ],
        )
    }

    #[test]
    fn test_jsonl_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let documents = vec![sample_document(), AnnotatedDocument::new(Document::new("创力"), vec![])];

        let path = save_annotated_documents(&documents, &dir.path().join("out"), "romeo_qwen3_8b.jsonl").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("创力"));

        let loaded = load_annotated_documents(&path).unwrap();
        assert_eq!(loaded, documents);
    }

    #[test]
    fn test_split_skips_invalid_lines() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("input.jsonl");
        fs::write(&jsonl, "{\"a\": 1}\n\nnot json\n{\"b\": [1, 2]}\n").unwrap();

        let out = dir.path().join("split");
        let report = split_jsonl_to_json_files(&jsonl, &out).unwrap();
        assert_eq!(report.written, vec![out.join("1.json"), out.join("4.json")]);
        assert_eq!(report.skipped, vec![3]);

        let second: Value = serde_json::from_str(&fs::read_to_string(out.join("4.json")).unwrap()).unwrap();
        assert_eq!(second["b"][1], 2);
        assert!(!out.join("2.json").exists());
    }

    #[test]
    fn test_save_result_json() {
        let dir = tempfile::tempdir().unwrap();
        let result = ExtractionResult::new(sample_document(), "romeo.txt".to_string(), "qwen3:8b".to_string(), 0.3);
        let path = dir.path().join("nested").join("result.json");
        save_result_json(&result, &path).unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["extractions"].as_array().unwrap().len(), 2);
        assert_eq!(saved["extractions"][1]["char_interval"]["start"], 7);
    }

    #[test]
    fn test_output_base_name() {
        assert_eq!(output_base_name("/app/晋控创力产品介绍文字版.docx", "qwen3:8b"), "晋控创力产品介绍文字版_qwen3_8b");
        assert_eq!(
            output_base_name("https://www.gutenberg.org/files/1513/1513-0.txt", "gemma2:2b"),
            "1513-0_gemma2_2b"
        );
        assert_eq!(output_base_name("my notes", "library/qwen3:8b"), "my_notes_library_qwen3_8b");
        assert_eq!(output_base_name("", "qwen3:8b"), "document_qwen3_8b");
    }

    #[test]
    fn test_output_base_names_disambiguate_shared_stems() {
        let names = output_base_names(
            &["a/notes.txt", "b/notes.txt", "c/notes.pdf", "romeo.txt", "a/notes.txt"],
            "qwen3:8b",
        );
        assert_eq!(
            names,
            vec![
                "notes_qwen3_8b",
                "notes_qwen3_8b_2",
                "notes_qwen3_8b_3",
                "romeo_qwen3_8b",
                "notes_qwen3_8b_4",
            ]
        );
    }
}
