use anyhow::{Result, Context};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::core::data::{AnnotatedDocument, CharInterval, Extraction};
use crate::utils::io::load_annotated_documents;

const TEMPLATE_NAME: &str = "visualization";

const VISUALIZATION_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Extractions: {{document_id}}</title>
<style>
  body { font-family: -apple-system, "Segoe UI", "Noto Sans SC", sans-serif; margin: 2em; color: #202124; }
  .legend { margin-bottom: 1em; }
  .legend span { display: inline-block; padding: 2px 8px; margin: 0 6px 6px 0; border-radius: 4px; }
  .text { white-space: pre-wrap; line-height: 1.7; border: 1px solid #dadce0; border-radius: 6px; padding: 1em; }
  .entity { border-radius: 3px; padding: 0 1px; cursor: help; }
  table { border-collapse: collapse; margin-top: 1.5em; width: 100%; }
  th, td { border: 1px solid #dadce0; padding: 4px 8px; text-align: left; vertical-align: top; }
  th { background: #f1f3f4; }
  .unaligned { color: #80868b; }
</style>
</head>
<body>
<h1>{{document_id}}</h1>
<p>{{extraction_count}} extractions, {{char_count}} characters</p>
<div class="legend">
{{#each legend}}<span style="background-color: {{color}}">{{class}} ({{count}})</span>{{/each}}
</div>
<div class="text">{{#each segments}}{{#if class}}<span class="entity" style="background-color: {{color}}" title="{{class}} #{{index}}">{{text}}</span>{{else}}{{text}}{{/if}}{{/each}}</div>
<table>
<thead><tr><th>#</th><th>Class</th><th>Text</th><th>Position</th><th>Alignment</th><th>Attributes</th></tr></thead>
<tbody>
{{#each rows}}<tr{{#unless aligned}} class="unaligned"{{/unless}}>
<td>{{index}}</td><td><span style="background-color: {{color}}">{{class}}</span></td><td>{{truncate text 200}}</td><td>{{position}}</td><td>{{status}}</td><td>{{format_attributes attributes}}</td>
</tr>
{{/each}}</tbody>
</table>
</body>
</html>
"#;

const PALETTE: &[&str] = &[
    "#D2E3FC", "#C8E6C9", "#FEF0C3", "#F9DEDC", "#FFDDBE",
    "#EADDFF", "#C4E9E4", "#FCE4EC", "#E8EAED", "#DDE8E8",
];

#[derive(Debug, Serialize)]
struct Segment {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

/// Renders annotated documents as standalone HTML with highlighted spans.
pub struct Visualizer {
    handlebars: Handlebars<'static>,
}

impl Visualizer {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(|s| html_escape::encode_safe(s).into_owned());
        handlebars.register_helper("truncate", Box::new(truncate_helper));
        handlebars.register_helper("format_attributes", Box::new(format_attributes_helper));
        handlebars
            .register_template_string(TEMPLATE_NAME, VISUALIZATION_TEMPLATE)
            .context("Failed to register visualization template")?;

        Ok(Self { handlebars })
    }

    pub fn render(&self, document: &AnnotatedDocument) -> Result<String> {
        let colors = class_colors(&document.extractions);
        let color_of = |class: &str| colors.get(class).cloned().unwrap_or_else(|| PALETTE[0].to_string());

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for extraction in &document.extractions {
            *counts.entry(extraction.extraction_class.as_str()).or_default() += 1;
        }
        let legend: Vec<Value> = counts
            .iter()
            .map(|(class, count)| json!({ "class": class, "count": count, "color": color_of(class) }))
            .collect();

        let rows: Vec<Value> = document
            .extractions
            .iter()
            .enumerate()
            .map(|(i, e)| {
                json!({
                    "index": i + 1,
                    "class": e.extraction_class,
                    "color": color_of(&e.extraction_class),
                    "text": e.extraction_text,
                    "aligned": e.is_aligned(),
                    "position": e.char_interval
                        .map(|c| format!("{}-{}", c.start_pos, c.end_pos))
                        .unwrap_or_else(|| "unaligned".to_string()),
                    "status": e.alignment_status
                        .and_then(|s| serde_json::to_value(s).ok())
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    "attributes": e.attributes,
                })
            })
            .collect();

        let segments = build_segments(document, &color_of);
        debug!("Rendering {} segments for {}", segments.len(), document.document_id);

        let data = json!({
            "document_id": document.document_id,
            "extraction_count": document.extractions.len(),
            "char_count": document.char_count(),
            "legend": legend,
            "segments": segments,
            "rows": rows,
        });

        self.handlebars
            .render(TEMPLATE_NAME, &data)
            .with_context(|| "Failed to render visualization")
    }
}

/// Renders the first document of a JSONL file.
pub fn visualize_jsonl(path: &Path) -> Result<String> {
    let documents = load_annotated_documents(path)?;
    let document = documents
        .first()
        .ok_or_else(|| anyhow::anyhow!("No documents found in {}", path.display()))?;
    if documents.len() > 1 {
        warn!("{} holds {} documents, visualizing the first", path.display(), documents.len());
    }

    Visualizer::new()?.render(document)
}

fn class_colors(extractions: &[Extraction]) -> BTreeMap<String, String> {
    let mut classes: Vec<&str> = extractions.iter().map(|e| e.extraction_class.as_str()).collect();
    classes.sort_unstable();
    classes.dedup();

    classes
        .into_iter()
        .enumerate()
        .map(|(i, class)| (class.to_string(), PALETTE[i % PALETTE.len()].to_string()))
        .collect()
}

/// Splits the text into plain and highlighted runs. Overlapping spans keep the earlier one.
fn build_segments(document: &AnnotatedDocument, color_of: &dyn Fn(&str) -> String) -> Vec<Segment> {
    let text = &document.text;
    // byte_offsets[i] is the byte index of char i; the last entry is text.len().
    let byte_offsets: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = byte_offsets.len() - 1;
    let byte_at = |char_pos: usize| byte_offsets[char_pos];

    let mut spans: Vec<(usize, &Extraction, CharInterval)> = document
        .extractions
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.char_interval.map(|c| (i, e, c)))
        .filter(|(_, _, c)| c.end_pos <= char_count && !c.is_empty())
        .collect();
    spans.sort_by_key(|(_, _, c)| (c.start_pos, std::cmp::Reverse(c.end_pos)));

    let mut segments = Vec::new();
    let mut cursor = 0;
    for (i, extraction, interval) in spans {
        if interval.start_pos < cursor {
            continue;
        }
        if interval.start_pos > cursor {
            segments.push(Segment {
                text: text[byte_at(cursor)..byte_at(interval.start_pos)].to_string(),
                class: None,
                color: None,
                index: None,
            });
        }
        segments.push(Segment {
            text: text[byte_at(interval.start_pos)..byte_at(interval.end_pos)].to_string(),
            class: Some(extraction.extraction_class.clone()),
            color: Some(color_of(&extraction.extraction_class)),
            index: Some(i + 1),
        });
        cursor = interval.end_pos;
    }
    if cursor < char_count {
        segments.push(Segment {
            text: text[byte_at(cursor)..].to_string(),
            class: None,
            color: None,
            index: None,
        });
    }

    segments
}

// Handlebars helpers
fn truncate_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    if let Some(param) = h.param(0) {
        if let Some(text) = param.value().as_str() {
            let limit = h.param(1)
                .and_then(|p| p.value().as_u64())
                .unwrap_or(100) as usize;

            let truncated = if text.chars().count() > limit {
                format!("{}...", text.chars().take(limit).collect::<String>())
            } else {
                text.to_string()
            };

            out.write(&html_escape::encode_safe(&truncated))?;
        }
    }
    Ok(())
}

fn format_attributes_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    if let Some(attributes) = h.param(0).and_then(|p| p.value().as_object()) {
        let formatted: Vec<String> = attributes
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                };
                format!("{}: {}", key, value)
            })
            .collect();

        out.write(&html_escape::encode_safe(&formatted.join("; ")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::Document;
    use crate::utils::io::save_annotated_documents;

    fn balcony() -> AnnotatedDocument {
        AnnotatedDocument::new(
            Document::new("ROMEO. But soft! <What> light"),
            vec![
                Extraction::new("character", "ROMEO")
                    .with_attribute("emotional_state", "wonder")
                    .with_char_interval(0, 5),
                Extraction::new("emotion", "But soft!")
                    .with_attributes([("feeling", "gentle awe"), ("character", "Romeo")])
                    .with_char_interval(7, 16),
                Extraction::new("emotion", "soft").with_char_interval(11, 15),
                Extraction::new("character", "Mercutio"),
            ],
        )
    }

    #[test]
    fn test_segments_skip_overlaps() {
        let document = balcony();
        let segments = build_segments(&document, &|_| "#fff".to_string());
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["ROMEO", ". ", "But soft!", " <What> light"]);
        assert_eq!(segments[2].index, Some(2));
        assert!(segments[1].class.is_none());
    }

    #[test]
    fn test_render_escapes_and_highlights() {
        let html = Visualizer::new().unwrap().render(&balcony()).unwrap();
        assert!(html.contains("&lt;What&gt;"));
        assert!(!html.contains("<What>"));
        assert!(html.contains(r#"title="character #1">ROMEO</span>"#));
        assert!(html.contains("character (2)"));
        assert!(html.contains("emotional_state: wonder"));
        assert!(html.contains("unaligned"));
    }

    #[test]
    fn test_render_cjk_offsets() {
        let document = AnnotatedDocument::new(
            Document::new("公司成立于2021年9月30日。"),
            vec![Extraction::new("date", "2021年9月30日").with_char_interval(5, 15)],
        );
        let segments = build_segments(&document, &|_| "#fff".to_string());
        assert_eq!(segments[1].text, "2021年9月30日");
        assert_eq!(segments[2].text, "。");
    }

    #[test]
    fn test_segments_cover_long_text_exactly() {
        let text = "晋控创力电磁先导阀。".repeat(2000);
        let extractions: Vec<Extraction> = (0..2000)
            .map(|i| Extraction::new("product", "电磁先导阀").with_char_interval(i * 10 + 4, i * 10 + 9))
            .collect();
        let document = AnnotatedDocument::new(Document::new(text.clone()), extractions);

        let segments = build_segments(&document, &|_| "#fff".to_string());
        assert_eq!(segments.len(), 6000);
        assert_eq!(segments.iter().map(|s| s.text.as_str()).collect::<String>(), text);
        assert_eq!(segments[5999].text, "。");
    }

    #[test]
    fn test_visualize_jsonl_reads_first_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_annotated_documents(&[balcony()], dir.path(), "romeo.jsonl").unwrap();
        let html = visualize_jsonl(&path).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));

        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "").unwrap();
        assert!(visualize_jsonl(&empty).is_err());
    }
}
