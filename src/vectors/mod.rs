//! Vector index for document chunks
//!
//! The index is the system of record for chunk text: each record carries the
//! embedding alongside the chunk body, its entity annotations, and the owning
//! user and document ids. [`LanceVectorIndex`] persists to LanceDB on disk;
//! [`MemoryVectorIndex`] is a brute-force in-process table for tests and
//! embedded hosts.
//!
//! # Security
//! Filter predicates are assembled by string interpolation, so every value
//! that reaches a predicate goes through allowlist or normalization-based
//! sanitization first. See `sanitize_id` and `sanitize_filter_value`.

pub mod lance;
pub mod memory;

pub use lance::LanceVectorIndex;
pub use memory::{cosine_similarity, MemoryVectorIndex};

use async_trait::async_trait;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid id for index filter: {0}")]
    InvalidId(String),
    #[error("vector backend error: {0}")]
    Backend(String),
    #[error("arrow conversion error: {0}")]
    Arrow(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A chunk as stored in the index
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub entities: Vec<String>,
    pub embedding: Vec<f32>,
    pub created_at: String,
}

/// A chunk returned from a similarity query
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub entities: Vec<String>,
    pub score: f32,
}

/// Deterministic vector id for a chunk, stable across re-ingestion
pub fn chunk_vector_id(document_id: &str, chunk_index: usize) -> String {
    format!("doc_{}_chunk_{}", document_id, chunk_index)
}

/// Tenant-scoped vector index over document chunks
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the document's chunk set. Deletes any existing chunks for the
    /// document before adding, so readers see the old set or the new set,
    /// never a mix of both.
    async fn upsert_chunks(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), IndexError>;

    /// Remove every chunk of one document. Returns the number removed; zero
    /// when the document has no chunks.
    async fn delete_document(&self, user_id: &str, document_id: &str)
        -> Result<usize, IndexError>;

    /// Top-k similarity query restricted to the user's listed documents.
    /// An empty document list short-circuits to an empty result without
    /// touching the backend.
    async fn query(
        &self,
        user_id: &str,
        document_ids: &[String],
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>, IndexError>;
}

/// Order hits score-descending; ties break by ascending document id, then
/// ascending chunk index, so equal-score results are deterministic.
pub(crate) fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

/// Validate a generated id for predicate interpolation.
///
/// Allowlist approach: only ASCII alphanumerics, hyphens, and underscores,
/// capped at 256 characters. Anything else is rejected outright rather than
/// escaped.
pub(crate) fn sanitize_id(id: &str) -> Option<String> {
    if id.is_empty() || id.len() > 256 {
        return None;
    }
    if id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some(id.to_string())
    } else {
        None
    }
}

/// Characters that visually stand in for quote, dash, and operator characters
/// in filter injection attempts. Fullwidth forms are absent on purpose: NFKC
/// folds those to plain ASCII before this check runs, where the ASCII rules
/// catch them.
fn is_filter_confusable(c: char) -> bool {
    matches!(
        c,
        '\u{02BC}' | // MODIFIER LETTER APOSTROPHE
        '\u{02B9}' | // MODIFIER LETTER PRIME
        '\u{2018}' | // LEFT SINGLE QUOTATION MARK
        '\u{2019}' | // RIGHT SINGLE QUOTATION MARK
        '\u{201C}' | // LEFT DOUBLE QUOTATION MARK
        '\u{201D}' | // RIGHT DOUBLE QUOTATION MARK
        '\u{0060}' | // GRAVE ACCENT
        '\u{2010}' | // HYPHEN
        '\u{2013}' | // EN DASH
        '\u{2014}' | // EM DASH
        '\u{2212}' | // MINUS SIGN
        '\u{2215}' | // DIVISION SLASH
        '\u{2217}'   // ASTERISK OPERATOR
    )
}

/// Sanitize an opaque value (host-supplied user ids) for predicate
/// interpolation.
///
/// NFKC-normalizes first so normalization tricks cannot smuggle characters
/// past the checks, rejects confusables and SQL keyword patterns, and escapes
/// single quotes in what survives. Returns `None` for anything that looks
/// like injection.
pub(crate) fn sanitize_filter_value(value: &str) -> Option<String> {
    if value.is_empty() || value.len() > 256 {
        return None;
    }

    let normalized: String = value.nfkc().collect();
    if normalized.chars().any(is_filter_confusable) {
        return None;
    }

    // ASCII-only lowering; avoids Unicode case folding surprises while still
    // catching mixed-case keywords.
    let lowered: String = normalized
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect();

    if lowered.contains(';') || lowered.contains("--") || lowered.contains("/*") {
        return None;
    }

    let keywords = [
        "select", "insert", "update", "delete", "drop", "truncate", "union", "exec", "alter",
        "create",
    ];
    for keyword in &keywords {
        let mut from = 0;
        while let Some(rel) = lowered[from..].find(keyword) {
            let pos = from + rel;
            let end = pos + keyword.len();
            let bounded_before = pos == 0
                || !lowered.as_bytes()[pos - 1].is_ascii_alphanumeric();
            let bounded_after =
                end >= lowered.len() || !lowered.as_bytes()[end].is_ascii_alphanumeric();
            if bounded_before && bounded_after {
                return None;
            }
            // Keyword bytes are ASCII, so pos + 1 stays on a char boundary.
            from = pos + 1;
        }
    }

    let exact_patterns = ["' or ", "' and ", "1=1", "1 = 1"];
    for pattern in &exact_patterns {
        if lowered.contains(pattern) {
            return None;
        }
    }

    Some(normalized.replace('\'', "''"))
}
