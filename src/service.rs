//! Service facade
//!
//! [`DocService`] is the crate's surface for a host API layer: document
//! upload and lifecycle, session management, and chat. It owns the wiring of
//! store, index, providers, and pipeline. User ids arrive here already
//! authenticated and are treated as opaque tenant keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chat::ChatEngine;
use crate::config::AppConfig;
use crate::db::{
    ClaimOutcome, Database, DbExecutor, DeleteMarkOutcome, DocumentRow, DocumentStatus, MessageRow,
};
use crate::error::AppError;
use crate::extract::{BuiltinExtractor, Entity, ExtractionService};
use crate::ingest::IngestPipeline;
use crate::providers::{
    EmbeddingService, GenerationService, HttpEmbeddingClient, HttpGenerationClient,
};
use crate::sessions::{SessionDetails, SessionManager};
use crate::vectors::{LanceVectorIndex, VectorIndex};

/// Processing state of one document, for polling
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub chunk_count: i64,
}

/// Full document metadata for listings and detail views
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetails {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub chunk_count: i64,
    pub content_hash: Option<String>,
    pub entities: Vec<Entity>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<DocumentRow> for DocumentDetails {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            filename: row.filename,
            status: row.status,
            error: row.error,
            chunk_count: row.chunk_count,
            content_hash: row.content_hash,
            entities: row.entities,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// The document chat service
pub struct DocService {
    db: Arc<DbExecutor>,
    index: Arc<dyn VectorIndex>,
    sessions: Arc<SessionManager>,
    engine: ChatEngine,
    ingest: IngestPipeline,
    uploads_dir: PathBuf,
    max_upload_bytes: usize,
    extractor: Arc<dyn ExtractionService>,
}

impl DocService {
    /// Build the full service from configuration: SQLite metadata store,
    /// LanceDB index under the data dir, HTTP model providers, and the
    /// built-in extractor.
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let database = Database::open(&config.storage.db_path())?;
        database.initialize()?;

        let index = Arc::new(
            LanceVectorIndex::connect(&config.storage.vectors_dir(), config.embedding.dimension)
                .await?,
        );
        let embedder = Arc::new(HttpEmbeddingClient::new(&config.embedding)?);
        let generator = Arc::new(HttpGenerationClient::new(&config.generation)?);

        Self::from_parts(
            &config,
            database,
            index,
            Arc::new(BuiltinExtractor::new()),
            embedder,
            generator,
        )
    }

    /// Wire the service from caller-supplied components. Hosts use this to
    /// substitute their own extraction engine or an in-memory index.
    pub fn from_parts(
        config: &AppConfig,
        database: Database,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn ExtractionService>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
    ) -> Result<Self, AppError> {
        std::fs::create_dir_all(config.storage.uploads_dir())?;

        let db = Arc::new(DbExecutor::new(database));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&db)));
        let ingest = IngestPipeline::new(
            Arc::clone(&db),
            Arc::clone(&index),
            Arc::clone(&extractor),
            Arc::clone(&embedder),
            config.chunking,
        );
        let engine = ChatEngine::new(
            Arc::clone(&db),
            Arc::clone(&sessions),
            Arc::clone(&index),
            embedder,
            generator,
            config.retrieval,
        );

        Ok(Self {
            db,
            index,
            sessions,
            engine,
            ingest,
            uploads_dir: config.storage.uploads_dir(),
            max_upload_bytes: config.storage.max_upload_bytes,
            extractor,
        })
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Accept an upload, persist it, and start ingestion. Returns the new
    /// document id immediately; poll [`document_status`] for progress.
    ///
    /// [`document_status`]: DocService::document_status
    pub async fn upload_document(
        &self,
        user_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, AppError> {
        if filename.trim().is_empty() {
            return Err(AppError::empty_input("filename"));
        }
        if !self.extractor.supports(filename) {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)");
            return Err(AppError::unsupported_format(ext));
        }
        if bytes.is_empty() {
            return Err(AppError::empty_input("file"));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(AppError::input_too_large("file", self.max_upload_bytes));
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let stored_path = self.stored_upload_path(&document_id, filename);
        tokio::fs::write(&stored_path, bytes).await?;

        let (id, uid, name) = (
            document_id.clone(),
            user_id.to_string(),
            filename.to_string(),
        );
        self.db
            .run(move |d| {
                d.insert_document(&id, &uid, &name)?;
                d.claim_document_for_processing(&uid, &id)
            })
            .await?;

        info!(
            "accepted upload {} ({} bytes) as document {}",
            filename,
            bytes.len(),
            document_id
        );
        self.ingest
            .spawn(
                user_id.to_string(),
                document_id.clone(),
                filename.to_string(),
                stored_path,
            )
            .await;

        Ok(document_id)
    }

    /// Current processing state of a document
    pub async fn document_status(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<DocumentStatusReport, AppError> {
        let row = self.fetch_document(user_id, document_id).await?;
        Ok(DocumentStatusReport {
            document_id: row.id,
            status: row.status,
            error: row.error,
            chunk_count: row.chunk_count,
        })
    }

    /// Full metadata for one document
    pub async fn get_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<DocumentDetails, AppError> {
        Ok(self.fetch_document(user_id, document_id).await?.into())
    }

    /// All of the user's documents, newest first
    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentDetails>, AppError> {
        let uid = user_id.to_string();
        let rows = self.db.run(move |d| d.list_documents(&uid)).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Re-run the full ingestion cycle for a document. The fresh chunk set
    /// replaces the old one wholesale. Rejected while a run is in flight or
    /// a deletion is pending.
    pub async fn reprocess_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        let row = self.fetch_document(user_id, document_id).await?;

        let (uid, id) = (user_id.to_string(), document_id.to_string());
        let outcome = self
            .db
            .run(move |d| d.claim_document_for_processing(&uid, &id))
            .await?;
        match outcome {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyProcessing => {
                return Err(AppError::already_processing(document_id))
            }
            ClaimOutcome::DeletePending => return Err(AppError::delete_in_progress(document_id)),
            ClaimOutcome::NotFound => return Err(AppError::document_not_found(document_id)),
        }

        info!("reprocessing document {}", document_id);
        self.ingest
            .spawn(
                user_id.to_string(),
                document_id.to_string(),
                row.filename.clone(),
                self.stored_upload_path(document_id, &row.filename),
            )
            .await;
        Ok(())
    }

    /// Delete a document everywhere: chunks first, then links and metadata,
    /// then the stored upload. If the index delete fails the row stays in
    /// DELETE_PENDING with the error recorded, and the call may be retried.
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<(), AppError> {
        let row = self.fetch_document(user_id, document_id).await?;

        let (uid, id) = (user_id.to_string(), document_id.to_string());
        let marked = self
            .db
            .run(move |d| d.mark_document_delete_pending(&uid, &id))
            .await?;
        match marked {
            DeleteMarkOutcome::Marked => {}
            DeleteMarkOutcome::Processing => {
                return Err(AppError::already_processing(document_id))
            }
            DeleteMarkOutcome::NotFound => return Err(AppError::document_not_found(document_id)),
        }

        if let Err(e) = self.index.delete_document(user_id, document_id).await {
            let detail = e.to_string();
            let (id, msg) = (document_id.to_string(), detail.clone());
            self.db
                .run(move |d| d.record_document_delete_error(&id, &msg))
                .await?;
            return Err(AppError::index_consistency(detail));
        }

        let (uid, id) = (user_id.to_string(), document_id.to_string());
        let finalized = self
            .db
            .run(move |d| d.finalize_document_delete(&uid, &id))
            .await?;
        if !finalized {
            warn!(
                "document {} left DELETE_PENDING before finalize; nothing removed",
                document_id
            );
            return Ok(());
        }

        let stored = self.stored_upload_path(document_id, &row.filename);
        if let Err(e) = tokio::fs::remove_file(&stored).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove stored upload {:?}: {}", stored, e);
            }
        }

        info!("deleted document {}", document_id);
        Ok(())
    }

    /// Block until a spawned ingestion run for the document finishes.
    /// Intended for host shutdown sequencing.
    pub async fn await_ingestion(&self, document_id: &str) {
        self.ingest.await_ingestion(document_id).await;
    }

    // =========================================================================
    // Sessions and chat
    // =========================================================================

    /// Create a session over a set of owned documents; returns its id
    pub async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
        document_ids: Vec<String>,
    ) -> Result<String, AppError> {
        self.sessions.create(user_id, title, document_ids).await
    }

    /// The user's sessions, newest first, with linked document ids
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionDetails>, AppError> {
        self.sessions.list(user_id).await
    }

    /// Replace a session's linked document set
    pub async fn link_documents(
        &self,
        user_id: &str,
        session_id: &str,
        document_ids: Vec<String>,
    ) -> Result<(), AppError> {
        self.sessions
            .link_documents(user_id, session_id, document_ids)
            .await
    }

    /// Delete a session and its transcript; linked documents are unaffected
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), AppError> {
        self.sessions.delete(user_id, session_id).await
    }

    /// Ask a question in a session; the question/answer pair is appended to
    /// the transcript on success
    pub async fn chat(
        &self,
        user_id: &str,
        session_id: &str,
        question: &str,
    ) -> Result<String, AppError> {
        self.engine.answer(user_id, session_id, question).await
    }

    /// Chronological transcript of a session
    pub async fn session_history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<MessageRow>, AppError> {
        self.sessions.history(user_id, session_id).await
    }

    async fn fetch_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<DocumentRow, AppError> {
        let (uid, id) = (user_id.to_string(), document_id.to_string());
        let row = self.db.run(move |d| d.get_document(&uid, &id)).await?;
        row.ok_or_else(|| AppError::document_not_found(document_id))
    }

    fn stored_upload_path(&self, document_id: &str, filename: &str) -> PathBuf {
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => self.uploads_dir.join(format!("{}.{}", document_id, ext)),
            None => self.uploads_dir.join(document_id),
        }
    }
}
