//! In-process vector index
//!
//! Brute-force cosine similarity over a table held in memory, behind the same
//! trait as the LanceDB index. Serves as the test double and as a fallback
//! for embedded hosts that keep everything in one process.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_hits, ChunkHit, ChunkRecord, IndexError, VectorIndex};

/// Cosine similarity between two vectors. Zero for mismatched lengths or
/// degenerate (near-zero) vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: RwLock<Vec<ChunkRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total chunks held, across all users and documents
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_chunks(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), IndexError> {
        let mut table = self.chunks.write().await;
        table.retain(|c| !(c.user_id == user_id && c.document_id == document_id));
        table.extend(chunks);
        Ok(())
    }

    async fn delete_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<usize, IndexError> {
        let mut table = self.chunks.write().await;
        let before = table.len();
        table.retain(|c| !(c.user_id == user_id && c.document_id == document_id));
        Ok(before - table.len())
    }

    async fn query(
        &self,
        user_id: &str,
        document_ids: &[String],
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>, IndexError> {
        if document_ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let table = self.chunks.read().await;
        let mut hits: Vec<ChunkHit> = table
            .iter()
            .filter(|c| c.user_id == user_id && document_ids.contains(&c.document_id))
            .map(|c| ChunkHit {
                id: c.id.clone(),
                document_id: c.document_id.clone(),
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                entities: c.entities.clone(),
                score: cosine_similarity(embedding, &c.embedding),
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}
