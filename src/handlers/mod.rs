use anyhow::{Result, Context};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions the processor knows how to read.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "text", "md", "docx", "pdf"];

#[async_trait]
pub trait DocumentHandler: Send + Sync {
    async fn extract_text(&self, source: &str) -> Result<String>;
    async fn get_metadata(&self, source: &str) -> Result<HashMap<String, String>>;
}

/// Maps curly quotes to their ASCII forms.
pub fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

async fn file_metadata(source: &str, kind: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), source.to_string());
    metadata.insert("type".to_string(), kind.to_string());

    if let Ok(meta) = tokio::fs::metadata(source).await {
        metadata.insert("size".to_string(), meta.len().to_string());
    }
    if let Some(name) = Path::new(source).file_name().and_then(|n| n.to_str()) {
        metadata.insert("file_name".to_string(), name.to_string());
    }

    metadata
}

pub struct PdfHandler;

#[async_trait]
impl DocumentHandler for PdfHandler {
    async fn extract_text(&self, source: &str) -> Result<String> {
        let bytes = tokio::fs::read(source).await
            .with_context(|| format!("Failed to read PDF file: {}", source))?;

        let text = pdf_extract::extract_text_from_mem(&bytes)
            .with_context(|| format!("Failed to extract text from PDF: {}", source))?;

        Ok(text)
    }

    async fn get_metadata(&self, source: &str) -> Result<HashMap<String, String>> {
        Ok(file_metadata(source, "pdf").await)
    }
}

pub struct TextHandler;

impl TextHandler {
    /// Decodes with the encoding named by a byte order mark, UTF-8 otherwise.
    pub fn decode(bytes: &[u8]) -> (String, bool) {
        let encoding = match encoding_rs::Encoding::for_bom(bytes) {
            Some((enc, _)) => enc,
            None => encoding_rs::UTF_8,
        };

        let (text, _, had_errors) = encoding.decode(bytes);
        (text.into_owned(), had_errors)
    }
}

#[async_trait]
impl DocumentHandler for TextHandler {
    async fn extract_text(&self, source: &str) -> Result<String> {
        let bytes = tokio::fs::read(source).await
            .with_context(|| format!("Failed to read text file: {}", source))?;

        let (text, had_errors) = Self::decode(&bytes);
        if had_errors {
            warn!("Encoding errors detected in file: {}", source);
        }

        Ok(text)
    }

    async fn get_metadata(&self, source: &str) -> Result<HashMap<String, String>> {
        Ok(file_metadata(source, "text").await)
    }
}

/// Word documents: paragraph text of `word/document.xml`, one paragraph per line.
pub struct DocxHandler;

impl DocxHandler {
    pub fn paragraphs_from_bytes(bytes: &[u8]) -> Result<Vec<String>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .context("Not a valid DOCX archive")?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .context("DOCX archive has no word/document.xml")?
            .read_to_string(&mut xml)
            .context("Failed to read word/document.xml")?;

        Self::paragraphs_from_xml(&xml)
    }

    fn paragraphs_from_xml(xml: &str) -> Result<Vec<String>> {
        let mut reader = Reader::from_str(xml);
        let mut paragraphs = Vec::new();
        let mut current = String::new();
        let mut in_paragraph = false;
        let mut in_text = false;

        loop {
            match reader.read_event().context("Malformed word/document.xml")? {
                Event::Start(e) => match e.name().as_ref() {
                    b"w:p" => {
                        in_paragraph = true;
                        current.clear();
                    }
                    b"w:t" => in_text = true,
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"w:p" => paragraphs.push(String::new()),
                    b"w:tab" if in_paragraph => current.push('\t'),
                    b"w:br" | b"w:cr" if in_paragraph => current.push('\n'),
                    _ => {}
                },
                Event::Text(t) if in_text => {
                    current.push_str(&t.unescape().context("Bad text in word/document.xml")?);
                }
                Event::End(e) => match e.name().as_ref() {
                    b"w:t" => in_text = false,
                    b"w:p" => {
                        in_paragraph = false;
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(paragraphs)
    }
}

#[async_trait]
impl DocumentHandler for DocxHandler {
    async fn extract_text(&self, source: &str) -> Result<String> {
        let bytes = tokio::fs::read(source).await
            .with_context(|| format!("Failed to read DOCX file: {}", source))?;

        let paragraphs = Self::paragraphs_from_bytes(&bytes)
            .with_context(|| format!("Failed to extract text from DOCX: {}", source))?;
        debug!("Read {} paragraphs from {}", paragraphs.len(), source);

        Ok(paragraphs.join("\n").trim().to_string())
    }

    async fn get_metadata(&self, source: &str) -> Result<HashMap<String, String>> {
        Ok(file_metadata(source, "docx").await)
    }
}

pub struct UrlHandler {
    client: reqwest::Client,
}

impl UrlHandler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self { client }
    }

    /// Visible text of the `<body>`, one text node per line.
    pub fn html_to_text(html: &str) -> String {
        let document = Html::parse_document(html);
        let mut text_parts = Vec::new();

        let root = match Selector::parse("body") {
            Ok(selector) => document.select(&selector).next(),
            Err(_) => None,
        }
        .unwrap_or_else(|| document.root_element());

        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .map(|element| matches!(element.name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            let trimmed = text.trim();
            if !hidden && !trimmed.is_empty() {
                text_parts.push(trimmed.to_string());
            }
        }

        text_parts.join("\n")
    }
}

impl Default for UrlHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentHandler for UrlHandler {
    async fn extract_text(&self, source: &str) -> Result<String> {
        let response = self.client
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {}", source))?
            .error_for_status()
            .with_context(|| format!("Server refused URL: {}", source))?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("html"))
            .unwrap_or(false);

        let body = response.text().await
            .with_context(|| "Failed to read response body")?;

        if is_html {
            Ok(Self::html_to_text(&body))
        } else {
            Ok(body)
        }
    }

    async fn get_metadata(&self, source: &str) -> Result<HashMap<String, String>> {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), source.to_string());
        metadata.insert("type".to_string(), "url".to_string());

        if let Ok(url) = url::Url::parse(source) {
            if let Some(host) = url.host_str() {
                metadata.insert("host".to_string(), host.to_string());
            }
        }

        Ok(metadata)
    }
}

pub struct DocumentProcessor {
    handlers: HashMap<String, Box<dyn DocumentHandler>>,
    normalize_quotes: bool,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Box<dyn DocumentHandler>> = HashMap::new();

        handlers.insert("pdf".to_string(), Box::new(PdfHandler));
        handlers.insert("docx".to_string(), Box::new(DocxHandler));
        handlers.insert("txt".to_string(), Box::new(TextHandler));
        handlers.insert("text".to_string(), Box::new(TextHandler));
        handlers.insert("md".to_string(), Box::new(TextHandler));
        handlers.insert("url".to_string(), Box::new(UrlHandler::new()));

        Self {
            handlers,
            normalize_quotes: false,
        }
    }

    pub fn with_quote_normalization(mut self, normalize_quotes: bool) -> Self {
        self.normalize_quotes = normalize_quotes;
        self
    }

    pub async fn process(&self, source: &str) -> Result<ProcessedDocument> {
        let handler = self.get_handler(source)?;

        let mut text = handler.extract_text(source).await?;
        if self.normalize_quotes {
            text = normalize_quotes(&text);
        }

        let mut metadata = handler.get_metadata(source).await?;
        metadata.insert("chars".to_string(), text.chars().count().to_string());

        Ok(ProcessedDocument {
            source: source.to_string(),
            text,
            metadata,
        })
    }

    fn get_handler(&self, source: &str) -> Result<&dyn DocumentHandler> {
        if is_url(source) {
            return self.handlers.get("url")
                .map(|h| h.as_ref())
                .ok_or_else(|| anyhow::anyhow!("URL handler not found"));
        }

        let extension = Path::new(source)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "txt".to_string());

        self.handlers.get(&extension)
            .or_else(|| self.handlers.get("txt"))
            .map(|h| h.as_ref())
            .ok_or_else(|| anyhow::anyhow!("No handler found for file type: {}", extension))
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub source: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

pub fn is_url(source: &str) -> bool {
    url::Url::parse(source)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

/// Expands an input into document sources: URLs and files pass through,
/// directories are walked for files with a supported extension.
pub fn collect_sources(input: &str) -> Result<Vec<String>> {
    if is_url(input) {
        return Ok(vec![input.to_string()]);
    }

    let path = Path::new(input);
    if !path.exists() {
        anyhow::bail!("Input not found: {}", input);
    }
    if path.is_file() {
        return Ok(vec![input.to_string()]);
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", input))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let supported = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            sources.push(entry.path().to_string_lossy().into_owned());
        }
    }
    sources.sort();

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_docx(path: &Path, body: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_normalize_quotes() {
        assert_eq!(
            normalize_quotes("\u{201c}电磁先导阀\u{201d} is \u{2018}reliable\u{2019}"),
            "\"电磁先导阀\" is 'reliable'"
        );
        assert_eq!(normalize_quotes("plain \"ascii\""), "plain \"ascii\"");
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "创力".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, had_errors) = TextHandler::decode(&bytes);
        assert_eq!(text, "创力");
        assert!(!had_errors);
    }

    #[tokio::test]
    async fn test_docx_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("产品介绍.docx");
        write_docx(
            &path,
            "<w:p><w:r><w:t>FHDA1.6/31.5X</w:t></w:r><w:r><w:t>电磁先导阀</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t xml:space=\"preserve\">结构:</w:t><w:tab/><w:t>卧式 &amp; 紧凑</w:t></w:r></w:p>",
        );

        let processor = DocumentProcessor::new();
        let doc = processor.process(path.to_str().unwrap()).await.unwrap();
        assert_eq!(doc.text, "FHDA1.6/31.5X电磁先导阀\n\n结构:\t卧式 & 紧凑");
        assert_eq!(doc.metadata["type"], "docx");
    }

    #[tokio::test]
    async fn test_invalid_docx_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(DocumentProcessor::new().process(path.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_text_dispatch_and_quote_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.unknown");
        std::fs::write(&path, "公司称之为\u{201c}创力\u{201d}").unwrap();

        let processor = DocumentProcessor::new().with_quote_normalization(true);
        let doc = processor.process(path.to_str().unwrap()).await.unwrap();
        assert_eq!(doc.text, "公司称之为\"创力\"");
        assert_eq!(doc.metadata["type"], "text");
        assert_eq!(doc.metadata["chars"], "9");
    }

    #[tokio::test]
    async fn test_url_plain_text_and_html() {
        let mut server = mockito::Server::new_async().await;
        let _plain = server
            .mock("GET", "/files/1513-0.txt")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body("ROMEO. But soft!")
            .create_async()
            .await;
        let _html = server
            .mock("GET", "/page")
            .with_header("content-type", "text/html")
            .with_body("<html><head><title>t</title></head><body><h1>JULIET</h1><script>var x;</script><p>Wherefore art thou Romeo?</p></body></html>")
            .create_async()
            .await;

        let processor = DocumentProcessor::new();
        let plain = processor.process(&format!("{}/files/1513-0.txt", server.url())).await.unwrap();
        assert_eq!(plain.text, "ROMEO. But soft!");
        assert_eq!(plain.metadata["host"], "127.0.0.1");

        let html = processor.process(&format!("{}/page", server.url())).await.unwrap();
        assert_eq!(html.text, "JULIET\nWherefore art thou Romeo?");
    }

    #[test]
    fn test_collect_sources_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("nested").join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("image.png"), "x").unwrap();

        let sources = collect_sources(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| !s.ends_with(".png")));

        assert_eq!(collect_sources("https://www.gutenberg.org/files/1513/1513-0.txt").unwrap().len(), 1);
        assert!(collect_sources("/definitely/not/here.txt").is_err());
    }
}
