//! Chat sessions and their document scope
//!
//! Sessions group documents for retrieval. [`SessionManager`] owns their CRUD
//! plus the per-turn scope resolution: which READY documents a chat turn may
//! search. Every lookup is scoped to the requesting user in SQL, so a foreign
//! id and a missing id are indistinguishable to the caller; both come back as
//! not-found.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::db::{DbExecutor, MessageRow};
use crate::error::AppError;

/// Title assigned when the caller does not provide one
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Titles longer than this are cut at a character boundary
pub const MAX_TITLE_CHARS: usize = 100;

/// A session with its linked document ids, newest-first in listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    pub id: String,
    pub title: String,
    pub document_ids: Vec<String>,
    pub created_at: String,
}

/// Session CRUD and retrieval-scope resolution
pub struct SessionManager {
    db: Arc<DbExecutor>,
}

impl SessionManager {
    pub fn new(db: Arc<DbExecutor>) -> Self {
        Self { db }
    }

    /// Create a session, optionally pre-linked to a set of owned documents.
    /// Returns the new session id.
    pub async fn create(
        &self,
        user_id: &str,
        title: Option<String>,
        document_ids: Vec<String>,
    ) -> Result<String, AppError> {
        let title = normalize_title(title);
        let document_ids = dedupe_preserving_order(document_ids);
        self.ensure_owned(user_id, &document_ids).await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let id = session_id.clone();
        let uid = user_id.to_string();
        self.db
            .run(move |d| {
                d.insert_session(&id, &uid, &title)?;
                d.replace_session_documents(&id, &document_ids)
            })
            .await?;

        info!("created session {} for user {}", session_id, user_id);
        Ok(session_id)
    }

    /// List the user's sessions, newest first, each with its linked ids
    pub async fn list(&self, user_id: &str) -> Result<Vec<SessionDetails>, AppError> {
        let uid = user_id.to_string();
        let details = self
            .db
            .run(move |d| {
                d.list_sessions(&uid)?
                    .into_iter()
                    .map(|s| {
                        Ok(SessionDetails {
                            document_ids: d.session_document_ids(&s.id)?,
                            id: s.id,
                            title: s.title,
                            created_at: s.created_at,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .await?;
        Ok(details)
    }

    /// Replace the session's linked document set wholesale
    pub async fn link_documents(
        &self,
        user_id: &str,
        session_id: &str,
        document_ids: Vec<String>,
    ) -> Result<(), AppError> {
        self.ensure_session(user_id, session_id).await?;
        let document_ids = dedupe_preserving_order(document_ids);
        self.ensure_owned(user_id, &document_ids).await?;

        let sid = session_id.to_string();
        self.db
            .run(move |d| d.replace_session_documents(&sid, &document_ids))
            .await?;

        info!("relinked documents for session {}", session_id);
        Ok(())
    }

    /// Delete a session; its links and messages go with it, documents stay
    pub async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), AppError> {
        let uid = user_id.to_string();
        let sid = session_id.to_string();
        let removed = self.db.run(move |d| d.delete_session(&uid, &sid)).await?;
        if !removed {
            return Err(AppError::session_not_found(session_id));
        }
        info!("deleted session {}", session_id);
        Ok(())
    }

    /// Resolve the retrieval scope for a chat turn: the session's linked
    /// documents that are READY right now. Read fresh on every call; a
    /// document that failed or is mid-deletion drops out here.
    pub async fn resolve_scope(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>, AppError> {
        self.ensure_session(user_id, session_id).await?;
        let uid = user_id.to_string();
        let sid = session_id.to_string();
        let ids = self
            .db
            .run(move |d| d.ready_document_ids(&uid, &sid))
            .await?;
        Ok(ids)
    }

    /// Full transcript of a session in chronological order
    pub async fn history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<MessageRow>, AppError> {
        self.ensure_session(user_id, session_id).await?;
        let sid = session_id.to_string();
        let messages = self.db.run(move |d| d.list_messages(&sid)).await?;
        Ok(messages)
    }

    async fn ensure_session(&self, user_id: &str, session_id: &str) -> Result<(), AppError> {
        let uid = user_id.to_string();
        let sid = session_id.to_string();
        let session = self.db.run(move |d| d.get_session(&uid, &sid)).await?;
        if session.is_none() {
            return Err(AppError::session_not_found(session_id));
        }
        Ok(())
    }

    /// Every id must name a document the user owns
    async fn ensure_owned(&self, user_id: &str, document_ids: &[String]) -> Result<(), AppError> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let uid = user_id.to_string();
        let ids = document_ids.to_vec();
        let owned = self
            .db
            .run(move |d| d.document_filenames(&uid, &ids))
            .await?;
        let owned_ids: HashSet<String> = owned.into_iter().map(|(id, _)| id).collect();

        for id in document_ids {
            if !owned_ids.contains(id) {
                return Err(AppError::document_not_found(id));
            }
        }
        Ok(())
    }
}

fn normalize_title(title: Option<String>) -> String {
    let trimmed = title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_SESSION_TITLE);
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

fn dedupe_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
