//! Chat turns over the session's document scope
//!
//! A turn resolves the session's READY documents, embeds the question once,
//! runs a single filtered index query across the whole scope, and frames the
//! merged top chunks into the generation prompt. Sessions with no usable
//! documents skip retrieval entirely and answer from general knowledge. The
//! question/answer pair is persisted only after generation succeeds, so a
//! failed turn leaves no trace in the transcript.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::db::DbExecutor;
use crate::error::AppError;
use crate::prompt::{AnswerPrompt, SourcePassage};
use crate::providers::{EmbeddingService, GenerationService, ProviderError};
use crate::sessions::SessionManager;
use crate::vectors::{ChunkHit, VectorIndex};

/// Ceiling on neighbors requested from the index in a single turn, however
/// many documents are linked
const MAX_QUERY_K: usize = 32;

/// Retrieval orchestration for chat turns
pub struct ChatEngine {
    db: Arc<DbExecutor>,
    sessions: Arc<SessionManager>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn GenerationService>,
    retrieval: RetrievalConfig,
}

impl ChatEngine {
    pub fn new(
        db: Arc<DbExecutor>,
        sessions: Arc<SessionManager>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            sessions,
            index,
            embedder,
            generator,
            retrieval,
        }
    }

    /// Answer one question in the context of a session
    pub async fn answer(
        &self,
        user_id: &str,
        session_id: &str,
        question: &str,
    ) -> Result<String, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::empty_input("question"));
        }

        let scope = self.sessions.resolve_scope(user_id, session_id).await?;

        let prompt = if scope.is_empty() {
            debug!(
                "session {} has no ready documents; answering from general knowledge",
                session_id
            );
            AnswerPrompt::new().with_question(question)
        } else {
            let passages = self.retrieve(user_id, &scope, question).await?;
            AnswerPrompt::new()
                .with_passages(passages)
                .with_question(question)
        };

        let answer = self
            .generator
            .generate(prompt.system(), &prompt.build_user_message())
            .await?;

        // Record the turn only once generation has succeeded.
        let sid = session_id.to_string();
        let q = question.to_string();
        let a = answer.clone();
        self.db.run(move |d| d.insert_chat_turn(&sid, &q, &a)).await?;

        info!("chat turn complete for session {}", session_id);
        Ok(answer)
    }

    /// Embed the question and pull the bounded context for the given scope
    async fn retrieve(
        &self,
        user_id: &str,
        scope: &[String],
        question: &str,
    ) -> Result<Vec<SourcePassage>, AppError> {
        let embeddings = self.embedder.embed(&[question.to_string()]).await?;
        let embedding = embeddings.into_iter().next().ok_or_else(|| {
            AppError::from(ProviderError::BadResponse {
                service: "embedding".into(),
                detail: "no vector returned for the question".into(),
            })
        })?;

        let k = (self.retrieval.per_document_k * scope.len()).min(MAX_QUERY_K);
        let hits = self.index.query(user_id, scope, &embedding, k).await?;
        let hits: Vec<ChunkHit> = dedupe_by_chunk_id(hits)
            .into_iter()
            .take(self.retrieval.max_context_chunks)
            .collect();
        debug!(
            "retrieved {} context chunks from {} documents in scope",
            hits.len(),
            scope.len()
        );

        // Attribute each chunk to its document's filename.
        let mut doc_ids: Vec<String> = hits.iter().map(|h| h.document_id.clone()).collect();
        doc_ids.sort();
        doc_ids.dedup();
        let uid = user_id.to_string();
        let names: HashMap<String, String> = self
            .db
            .run(move |d| d.document_filenames(&uid, &doc_ids))
            .await?
            .into_iter()
            .collect();

        Ok(hits
            .into_iter()
            .map(|hit| SourcePassage {
                filename: names
                    .get(&hit.document_id)
                    .cloned()
                    .unwrap_or_else(|| hit.document_id.clone()),
                text: hit.text,
            })
            .collect())
    }
}

/// Drop repeated chunk ids, keeping the first (highest-ranked) occurrence
fn dedupe_by_chunk_id(hits: Vec<ChunkHit>) -> Vec<ChunkHit> {
    let mut seen = HashSet::new();
    hits.into_iter().filter(|h| seen.insert(h.id.clone())).collect()
}
