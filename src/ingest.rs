//! Asynchronous document ingestion
//!
//! One pipeline run takes a claimed document from its stored upload file to a
//! READY row: read, extract, chunk, embed, upsert into the vector index, then
//! finalize metadata. Callers perform the status claim before spawning; the
//! pipeline ends every run by marking the row READY or FAILED. A failed run
//! removes any chunks written for the attempt so the index never holds output
//! from a half-finished pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chunker;
use crate::config::ChunkingConfig;
use crate::db::{DbExecutor, DbExecutorError};
use crate::extract::{entities_in_span, Entity, ExtractError, ExtractionService};
use crate::providers::{EmbeddingService, ProviderError};
use crate::vectors::{chunk_vector_id, ChunkRecord, IndexError, VectorIndex};

/// Stage-tagged ingestion failure. The Display form is what lands in the
/// document row's error column.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("read: {0}")]
    Read(#[from] std::io::Error),
    #[error("extract: {0}")]
    Extract(#[from] ExtractError),
    #[error("embed: {0}")]
    Embed(#[from] ProviderError),
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("database: {0}")]
    Db(#[from] DbExecutorError),
}

struct IngestOutcome {
    chunk_count: usize,
    content_hash: String,
    entities: Vec<Entity>,
}

struct Worker {
    db: Arc<DbExecutor>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn ExtractionService>,
    embedder: Arc<dyn EmbeddingService>,
    chunking: ChunkingConfig,
}

/// Drives individual documents through extract -> chunk -> embed -> upsert
pub struct IngestPipeline {
    worker: Arc<Worker>,
    active: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl IngestPipeline {
    pub fn new(
        db: Arc<DbExecutor>,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn ExtractionService>,
        embedder: Arc<dyn EmbeddingService>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                db,
                index,
                extractor,
                embedder,
                chunking,
            }),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a pipeline run for a document already claimed as PROCESSING.
    /// Returns immediately; the run proceeds on its own task.
    pub async fn spawn(
        &self,
        user_id: String,
        document_id: String,
        filename: String,
        source_path: PathBuf,
    ) {
        let worker = Arc::clone(&self.worker);
        let key = document_id.clone();
        let handle = tokio::spawn(async move {
            worker
                .run_to_completion(&user_id, &document_id, &filename, &source_path)
                .await;
        });

        // A stale handle under this id belongs to a finished earlier run; the
        // claim would have failed otherwise.
        self.active.lock().await.insert(key, handle);
    }

    /// Wait for an in-flight run of the given document to finish. Returns
    /// immediately when none is tracked. Hosts use this for shutdown and
    /// tests for determinism.
    pub async fn await_ingestion(&self, document_id: &str) {
        let handle = self.active.lock().await.remove(document_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(
                    "ingestion task for document {} did not finish cleanly: {}",
                    document_id, e
                );
            }
        }
    }
}

impl Worker {
    async fn run_to_completion(
        &self,
        user_id: &str,
        document_id: &str,
        filename: &str,
        source_path: &Path,
    ) {
        info!("ingestion started for document {} ({})", document_id, filename);

        match self
            .run_pipeline(user_id, document_id, filename, source_path)
            .await
        {
            Ok(outcome) => self.finalize_ready(user_id, document_id, outcome).await,
            Err(e) => self.finalize_failed(user_id, document_id, e).await,
        }
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        document_id: &str,
        filename: &str,
        source_path: &Path,
    ) -> Result<IngestOutcome, IngestError> {
        let bytes = tokio::fs::read(source_path).await?;
        let extracted = self.extractor.extract(&bytes, filename).await?;
        let content_hash = hex::encode(Sha256::digest(extracted.text.as_bytes()));

        let spans = chunker::chunk(
            &extracted.text,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );
        if spans.is_empty() {
            return Err(ExtractError::EmptyText.into());
        }
        debug!(
            "document {}: {} chars -> {} chunks, content hash {}",
            document_id,
            extracted.text.chars().count(),
            spans.len(),
            content_hash
        );

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != spans.len() {
            return Err(ProviderError::BadResponse {
                service: "embedding".into(),
                detail: format!("{} vectors for {} chunks", embeddings.len(), spans.len()),
            }
            .into());
        }

        let now = Utc::now().to_rfc3339();
        let records: Vec<ChunkRecord> = spans
            .iter()
            .zip(embeddings)
            .map(|(span, embedding)| ChunkRecord {
                id: chunk_vector_id(document_id, span.index),
                user_id: user_id.to_string(),
                document_id: document_id.to_string(),
                chunk_index: span.index,
                text: span.text.clone(),
                entities: entities_in_span(&extracted.entities, &span.text)
                    .iter()
                    .map(|e| format!("{}:{}", e.label.as_str(), e.text))
                    .collect(),
                embedding,
                created_at: now.clone(),
            })
            .collect();

        let chunk_count = records.len();
        self.index
            .upsert_chunks(user_id, document_id, records)
            .await?;

        Ok(IngestOutcome {
            chunk_count,
            content_hash,
            entities: extracted.entities,
        })
    }

    async fn finalize_ready(&self, user_id: &str, document_id: &str, outcome: IngestOutcome) {
        let entities_json =
            serde_json::to_string(&outcome.entities).unwrap_or_else(|_| "[]".to_string());
        let doc = document_id.to_string();
        let hash = outcome.content_hash;
        let count = outcome.chunk_count as i64;

        match self
            .db
            .run(move |d| d.mark_document_ready(&doc, count, &hash, &entities_json))
            .await
        {
            Ok(true) => {
                info!(
                    "ingestion complete for document {}: {} chunks",
                    document_id, outcome.chunk_count
                );
            }
            Ok(false) => {
                // The row left PROCESSING underneath us. Drop the chunks this
                // run wrote so the index does not outlive the row.
                warn!(
                    "document {} was no longer processing at finalize; removing its chunks",
                    document_id
                );
                if let Err(e) = self.index.delete_document(user_id, document_id).await {
                    error!(
                        "failed to remove chunks for superseded document {}: {}",
                        document_id, e
                    );
                }
            }
            Err(e) => {
                error!("failed to finalize document {}: {}", document_id, e);
            }
        }
    }

    async fn finalize_failed(&self, user_id: &str, document_id: &str, cause: IngestError) {
        warn!("ingestion failed for document {}: {}", document_id, cause);

        // Remove anything the attempt managed to write before the error.
        if let Err(cleanup) = self.index.delete_document(user_id, document_id).await {
            error!(
                "failed to clean up chunks after failed ingestion of {}: {}",
                document_id, cleanup
            );
        }

        let doc = document_id.to_string();
        let message = cause.to_string();
        if let Err(db_err) = self
            .db
            .run(move |d| d.mark_document_failed(&doc, &message))
            .await
        {
            error!(
                "failed to record ingestion failure for document {}: {}",
                document_id, db_err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DocumentStatus};
    use crate::extract::BuiltinExtractor;
    use crate::vectors::MemoryVectorIndex;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedding(usize);

    #[async_trait]
    impl EmbeddingService for FixedEmbedding {
        fn dimension(&self) -> usize {
            self.0
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.0];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    struct BrokenEmbedding;

    #[async_trait]
    impl EmbeddingService for BrokenEmbedding {
        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Embedding("service unavailable".into()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Arc<DbExecutor>,
        index: Arc<MemoryVectorIndex>,
        upload: PathBuf,
    }

    async fn fixture(
        contents: &str,
        embedder: Arc<dyn EmbeddingService>,
    ) -> (Fixture, IngestPipeline) {
        let dir = TempDir::new().unwrap();
        let database = Database::open(&dir.path().join("test.db")).unwrap();
        database.initialize().unwrap();
        let db = Arc::new(DbExecutor::new(database));

        let upload = dir.path().join("doc.txt");
        std::fs::write(&upload, contents).unwrap();

        db.run(|d| d.insert_document("d1", "u1", "doc.txt"))
            .await
            .unwrap();
        db.run(|d| d.claim_document_for_processing("u1", "d1"))
            .await
            .unwrap();

        let index = Arc::new(MemoryVectorIndex::new());
        let pipeline = IngestPipeline::new(
            Arc::clone(&db),
            index.clone() as Arc<dyn VectorIndex>,
            Arc::new(BuiltinExtractor::new()),
            embedder,
            ChunkingConfig {
                max_chars: 64,
                overlap_chars: 8,
            },
        );

        (
            Fixture {
                _dir: dir,
                db,
                index,
                upload,
            },
            pipeline,
        )
    }

    #[tokio::test]
    async fn test_successful_run_marks_ready() {
        let text = "Acme Inc. signed the contract on 2024-01-15. ".repeat(6);
        let (fx, pipeline) = fixture(&text, Arc::new(FixedEmbedding(4))).await;

        pipeline
            .spawn(
                "u1".into(),
                "d1".into(),
                "doc.txt".into(),
                fx.upload.clone(),
            )
            .await;
        pipeline.await_ingestion("d1").await;

        let row = fx
            .db
            .run(|d| d.get_document("u1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DocumentStatus::Ready);
        assert!(row.chunk_count > 0);
        assert_eq!(row.chunk_count as usize, fx.index.len().await);
        assert_eq!(row.content_hash.as_deref().map(|h| h.len()), Some(64));
        assert!(row.entities.iter().any(|e| e.text == "Acme Inc"));
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_failed_and_leaves_no_chunks() {
        let (fx, pipeline) =
            fixture("Some document text to embed.", Arc::new(BrokenEmbedding)).await;

        pipeline
            .spawn(
                "u1".into(),
                "d1".into(),
                "doc.txt".into(),
                fx.upload.clone(),
            )
            .await;
        pipeline.await_ingestion("d1").await;

        let row = fx
            .db
            .run(|d| d.get_document("u1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        let message = row.error.unwrap();
        assert!(message.starts_with("embed:"), "unexpected error: {}", message);
        assert_eq!(fx.index.len().await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_file_marks_failed() {
        let (fx, pipeline) = fixture("%PDF-1.4 fake", Arc::new(FixedEmbedding(4))).await;

        pipeline
            .spawn(
                "u1".into(),
                "d1".into(),
                "doc.pdf".into(),
                fx.upload.clone(),
            )
            .await;
        pipeline.await_ingestion("d1").await;

        let row = fx
            .db
            .run(|d| d.get_document("u1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        assert!(row.error.unwrap().starts_with("extract:"));
    }

    #[tokio::test]
    async fn test_missing_upload_file_marks_failed() {
        let (fx, pipeline) = fixture("irrelevant", Arc::new(FixedEmbedding(4))).await;

        pipeline
            .spawn(
                "u1".into(),
                "d1".into(),
                "doc.txt".into(),
                fx.upload.with_extension("gone"),
            )
            .await;
        pipeline.await_ingestion("d1").await;

        let row = fx
            .db
            .run(|d| d.get_document("u1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        assert!(row.error.unwrap().starts_with("read:"));
    }

    #[tokio::test]
    async fn test_await_ingestion_without_run_returns() {
        let (_fx, pipeline) = fixture("text", Arc::new(FixedEmbedding(4))).await;
        pipeline.await_ingestion("never-spawned").await;
    }
}
