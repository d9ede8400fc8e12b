//! Text and entity extraction boundary
//!
//! Ingestion consumes extraction through the [`ExtractionService`] trait so
//! heavy engines (PDF rendering, OCR, full NER models) can live in the host
//! process. The crate ships [`BuiltinExtractor`], which covers plain text and
//! Markdown uploads and annotates them with a lightweight pattern-based
//! entity pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from an extraction backend
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Document produced no extractable text")]
    EmptyText,
    #[error("Extraction failed: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entity labels recognized by the annotation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityLabel {
    Date,
    Org,
    Person,
}

impl EntityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::Org => "ORG",
            Self::Person => "PERSON",
        }
    }
}

/// A single labelled entity mention
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub label: EntityLabel,
    pub text: String,
}

/// Extraction output: normalized text plus document-level entities,
/// deduplicated and sorted within each label
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub entities: Vec<Entity>,
}

/// Pluggable extraction backend
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Whether this backend can handle the given filename
    fn supports(&self, filename: &str) -> bool;

    /// Extract normalized text and entity annotations from raw file bytes
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Extracted, ExtractError>;
}

/// File formats the built-in extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Markdown,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Built-in extractor for plain text and Markdown uploads
#[derive(Debug, Default)]
pub struct BuiltinExtractor;

impl BuiltinExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionService for BuiltinExtractor {
    fn supports(&self, filename: &str) -> bool {
        DocumentKind::from_filename(filename).is_some()
    }

    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Extracted, ExtractError> {
        let kind = DocumentKind::from_filename(filename).ok_or_else(|| {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)");
            ExtractError::UnsupportedFormat(ext.to_string())
        })?;

        let raw = decode_text(bytes);
        let text = match kind {
            DocumentKind::PlainText => normalize_newlines(&raw),
            DocumentKind::Markdown => markdown_to_text(&raw),
        };

        if text.trim().is_empty() {
            return Err(ExtractError::EmptyText);
        }

        let entities = annotate_entities(&text);
        Ok(Extracted { text, entities })
    }
}

/// Decode file bytes as UTF-8, falling back to Windows-1252 for legacy files.
/// The fallback also handles BOM-marked UTF-16 input.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Flatten Markdown to plain text, keeping paragraph and list structure
/// as blank lines and dashes so the chunker still sees unit boundaries.
fn markdown_to_text(content: &str) -> String {
    use pulldown_cmark::{Event, Parser, Tag, TagEnd};

    let content = normalize_newlines(content);
    let parser = Parser::new(&content);
    let mut text = String::new();

    for event in parser {
        match event {
            Event::Text(t) | Event::Code(t) => {
                text.push_str(&t);
            }
            Event::SoftBreak | Event::HardBreak => {
                text.push('\n');
            }
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Paragraph) => {
                text.push_str("\n\n");
            }
            Event::Start(Tag::Item) => {
                text.push_str("- ");
            }
            Event::End(TagEnd::Item) => {
                text.push('\n');
            }
            Event::End(TagEnd::List(_)) | Event::End(TagEnd::CodeBlock) => {
                text.push('\n');
            }
            _ => {}
        }
    }

    text
}

/// Pattern-based DATE/ORG/PERSON annotation for the built-in path.
/// Hosts with a real NER engine supply richer annotations through their own
/// [`ExtractionService`]. Results are deduplicated and sorted per label.
pub fn annotate_entities(text: &str) -> Vec<Entity> {
    let mut found: BTreeSet<Entity> = BTreeSet::new();

    let date_patterns = [
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
    ];
    for pattern in date_patterns {
        let re = regex_lite::Regex::new(pattern).unwrap();
        for m in re.find_iter(text) {
            found.insert(Entity {
                label: EntityLabel::Date,
                text: m.as_str().trim().to_string(),
            });
        }
    }

    // Organizations: capitalized phrase ending in a corporate suffix.
    let org_re = regex_lite::Regex::new(
        r"\b([A-Z][A-Za-z&]*(?:\s+[A-Z][A-Za-z&]*)*\s+(?:Inc|Corp|Corporation|LLC|Ltd|GmbH|Co)\.?)(?:\s|,|$)",
    )
    .unwrap();
    for cap in org_re.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            found.insert(Entity {
                label: EntityLabel::Org,
                text: m.as_str().trim_end_matches('.').trim().to_string(),
            });
        }
    }

    // People: honorific followed by one or two capitalized names.
    let person_re = regex_lite::Regex::new(
        r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b",
    )
    .unwrap();
    for cap in person_re.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            found.insert(Entity {
                label: EntityLabel::Person,
                text: m.as_str().trim().to_string(),
            });
        }
    }

    // BTreeSet ordering sorts by label then text, matching the summary shape.
    found.into_iter().collect()
}

/// Select the entities whose mention text occurs inside the given chunk.
pub fn entities_in_span(entities: &[Entity], chunk_text: &str) -> Vec<Entity> {
    entities
        .iter()
        .filter(|e| chunk_text.contains(e.text.as_str()))
        .cloned()
        .collect()
}
