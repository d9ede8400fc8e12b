//! Metadata store
//!
//! SQLite holds document rows, sessions, session-document links, and chat
//! messages. Chunk bodies live in the vector index, never here. All access
//! from async code goes through [`DbExecutor`], which owns the connection on
//! a dedicated thread.

pub mod executor;

pub use executor::{DbExecutor, DbExecutorError};

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::Entity;

const CURRENT_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("database corruption detected")]
    Corruption,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document ingestion lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
    DeletePending,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
            DocumentStatus::DeletePending => "delete_pending",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            "delete_pending" => Ok(DocumentStatus::DeletePending),
            _ => Err(()),
        }
    }
}

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub content_hash: Option<String>,
    pub chunk_count: i64,
    pub entities: Vec<Entity>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

/// Result of the ingestion claim compare-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyProcessing,
    DeletePending,
    NotFound,
}

/// Result of marking a document for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMarkOutcome {
    Marked,
    Processing,
    NotFound,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// SQLite-backed metadata store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // Foreign key enforcement is required for session cascade deletes.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        // WAL improves concurrent read behavior; fall back silently where the
        // filesystem refuses it.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch("PRAGMA secure_delete = ON;")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }

        Ok(Self { conn })
    }

    /// Run integrity check and bring the schema up to date
    pub fn initialize(&self) -> Result<(), DbError> {
        self.check_integrity()?;

        let version = self.get_schema_version()?;
        if version < CURRENT_SCHEMA_VERSION {
            self.run_migrations(version)?;
        }

        Ok(())
    }

    fn check_integrity(&self) -> Result<(), DbError> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if result != "ok" {
            return Err(DbError::Corruption);
        }
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32, DbError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match version {
            Some(v) => v
                .parse()
                .map_err(|_| DbError::Migration("invalid schema version".into())),
            None => Ok(0),
        }
    }

    fn set_schema_version(&self, version: i32) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn run_migrations(&self, from_version: i32) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;

        if from_version < 1 {
            self.migrate_v1()?;
        }

        tx.commit()?;
        self.set_schema_version(CURRENT_SCHEMA_VERSION)?;

        Ok(())
    }

    /// v1: initial schema
    fn migrate_v1(&self) -> Result<(), DbError> {
        // session_documents has no FK to documents on purpose: document rows
        // are removed explicitly by the deletion saga, links first.
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                content_hash TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                entities TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, created_at);

            CREATE TABLE IF NOT EXISTS session_documents (
                session_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (session_id, document_id),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_session_documents_document
                ON session_documents(document_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Insert a freshly uploaded document row in UPLOADED state
    pub fn insert_document(
        &self,
        id: &str,
        user_id: &str,
        filename: &str,
    ) -> Result<(), DbError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (id, user_id, filename, status, chunk_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                user_id,
                filename,
                DocumentStatus::Uploaded.as_str(),
                now,
                now
            ],
        )?;
        Ok(())
    }

    /// Fetch a document scoped to its owner. Foreign ids return None.
    pub fn get_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRow>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, filename, status, error, content_hash, chunk_count,
                        entities, created_at, updated_at
                 FROM documents WHERE id = ? AND user_id = ?",
                params![document_id, user_id],
                map_document_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List a user's documents, newest first
    pub fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, filename, status, error, content_hash, chunk_count,
                    entities, created_at, updated_at
             FROM documents WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([user_id], map_document_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomically claim a document for processing. The claim succeeds only
    /// from UPLOADED, READY, or FAILED; anything else reports why.
    pub fn claim_document_for_processing(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<ClaimOutcome, DbError> {
        let updated = self.conn.execute(
            "UPDATE documents SET status = 'processing', error = NULL, updated_at = ?
             WHERE id = ? AND user_id = ? AND status IN ('uploaded', 'ready', 'failed')",
            params![now_rfc3339(), document_id, user_id],
        )?;
        if updated == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM documents WHERE id = ? AND user_id = ?",
                params![document_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            None => Ok(ClaimOutcome::NotFound),
            Some("delete_pending") => Ok(ClaimOutcome::DeletePending),
            Some(_) => Ok(ClaimOutcome::AlreadyProcessing),
        }
    }

    /// Finish processing successfully. Only applies while the row is still
    /// PROCESSING, so a deletion that raced ahead is not overwritten.
    pub fn mark_document_ready(
        &self,
        document_id: &str,
        chunk_count: i64,
        content_hash: &str,
        entities_json: &str,
    ) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE documents
             SET status = 'ready', chunk_count = ?, content_hash = ?, entities = ?,
                 error = NULL, updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![
                chunk_count,
                content_hash,
                entities_json,
                now_rfc3339(),
                document_id
            ],
        )?;
        Ok(updated == 1)
    }

    /// Record a processing failure on the row
    pub fn mark_document_failed(&self, document_id: &str, error: &str) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE documents SET status = 'failed', error = ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![error, now_rfc3339(), document_id],
        )?;
        Ok(updated == 1)
    }

    /// First step of the deletion saga: make the pending delete visible.
    /// Re-marking an already DELETE_PENDING row succeeds (saga retry).
    pub fn mark_document_delete_pending(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<DeleteMarkOutcome, DbError> {
        let updated = self.conn.execute(
            "UPDATE documents SET status = 'delete_pending', updated_at = ?
             WHERE id = ? AND user_id = ?
               AND status IN ('uploaded', 'ready', 'failed', 'delete_pending')",
            params![now_rfc3339(), document_id, user_id],
        )?;
        if updated == 1 {
            return Ok(DeleteMarkOutcome::Marked);
        }

        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM documents WHERE id = ? AND user_id = ?",
                params![document_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        match exists {
            None => Ok(DeleteMarkOutcome::NotFound),
            Some(_) => Ok(DeleteMarkOutcome::Processing),
        }
    }

    /// Keep the index failure visible on a DELETE_PENDING row
    pub fn record_document_delete_error(
        &self,
        document_id: &str,
        error: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE documents SET error = ?, updated_at = ?
             WHERE id = ? AND status = 'delete_pending'",
            params![error, now_rfc3339(), document_id],
        )?;
        Ok(())
    }

    /// Final step of the deletion saga: drop links and the metadata row.
    /// Returns false when the row was not in DELETE_PENDING anymore.
    pub fn finalize_document_delete(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<bool, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM session_documents WHERE document_id = ?",
            params![document_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM documents WHERE id = ? AND user_id = ? AND status = 'delete_pending'",
            params![document_id, user_id],
        )?;
        tx.commit()?;
        Ok(removed == 1)
    }

    /// Map document ids to filenames, scoped to the owner
    pub fn document_filenames(
        &self,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<Vec<(String, String)>, DbError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = document_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, filename FROM documents WHERE user_id = ? AND id IN ({})",
            placeholders
        );

        let mut values: Vec<&str> = vec![user_id];
        values.extend(document_ids.iter().map(|s| s.as_str()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// How many of the given ids exist and belong to the user
    pub fn count_owned_documents(
        &self,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<i64, DbError> {
        if document_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = document_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE user_id = ? AND id IN ({})",
            placeholders
        );

        let mut values: Vec<&str> = vec![user_id];
        values.extend(document_ids.iter().map(|s| s.as_str()));

        let count = self.conn.query_row(
            &sql,
            rusqlite::params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn insert_session(&self, id: &str, user_id: &str, title: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, title, created_at) VALUES (?, ?, ?, ?)",
            params![id, user_id, title, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRow>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, title, created_at FROM sessions
                 WHERE id = ? AND user_id = ?",
                params![session_id, user_id],
                map_session_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List a user's sessions, newest first
    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, created_at FROM sessions
             WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([user_id], map_session_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a session; links and messages follow via FK cascade
    pub fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM sessions WHERE id = ? AND user_id = ?",
            params![session_id, user_id],
        )?;
        Ok(removed == 1)
    }

    /// Replace the session's link set wholesale, preserving the given order
    pub fn replace_session_documents(
        &self,
        session_id: &str,
        document_ids: &[String],
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM session_documents WHERE session_id = ?",
            params![session_id],
        )?;
        for (position, document_id) in document_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO session_documents (session_id, document_id, position)
                 VALUES (?, ?, ?)",
                params![session_id, document_id, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// All linked document ids for a session, in link order
    pub fn session_document_ids(&self, session_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT document_id FROM session_documents WHERE session_id = ? ORDER BY position",
        )?;
        let ids = stmt
            .query_map([session_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Linked documents that are READY, in link order. This is the retrieval
    /// scope for a chat turn; every other status drops out here.
    pub fn ready_document_ids(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.id
             FROM session_documents sd
             JOIN documents d ON d.id = sd.document_id
             WHERE sd.session_id = ? AND d.user_id = ? AND d.status = 'ready'
             ORDER BY sd.position",
        )?;
        let ids = stmt
            .query_map(params![session_id, user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append the question/answer pair for a completed chat turn in one
    /// transaction, so a crash never leaves half a turn behind.
    pub fn insert_chat_turn(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), DbError> {
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                uuid::Uuid::new_v4().to_string(),
                session_id,
                MessageRole::User.as_str(),
                question,
                now
            ],
        )?;
        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                uuid::Uuid::new_v4().to_string(),
                session_id,
                MessageRole::Assistant.as_str(),
                answer,
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Session transcript in chronological order
    pub fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM messages
             WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map([session_id], |row| {
                let role_str: String = row.get(2)?;
                Ok(MessageRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: role_str.parse().unwrap_or(MessageRole::User),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_document_row(row: &rusqlite::Row) -> rusqlite::Result<DocumentRow> {
    let status_str: String = row.get(3)?;
    let entities_json: Option<String> = row.get(7)?;
    Ok(DocumentRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        filename: row.get(2)?,
        status: status_str.parse().unwrap_or(DocumentStatus::Failed),
        error: row.get(4)?,
        content_hash: row.get(5)?,
        chunk_count: row.get(6)?,
        entities: entities_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
    })
}
