//! Single-threaded database executor
//!
//! SQLite connections are not Sync, so the [`Database`] lives on one
//! dedicated thread and async callers submit closures to it over a channel.
//! Each closure receives the database, runs synchronously, and its result is
//! sent back through a oneshot.

use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::error;

use super::{Database, DbError};
use crate::error::{AppError, ErrorCategory, ErrorCode};

type DbResult<T> = Result<T, DbError>;

/// Type-erased result passed back over the channel
type BoxedResult = Box<dyn std::any::Any + Send + 'static>;

/// Type-erased operation to run on the database thread
type BoxedDbOp = Box<dyn FnOnce(&Database) -> BoxedResult + Send + 'static>;

struct DbOperation {
    op: BoxedDbOp,
    response: oneshot::Sender<BoxedResult>,
}

#[derive(Debug, Error)]
pub enum DbExecutorError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("database thread is no longer running")]
    ChannelClosed,
    #[error("database result had an unexpected type")]
    TypeMismatch,
}

impl From<DbExecutorError> for AppError {
    fn from(e: DbExecutorError) -> Self {
        match e {
            DbExecutorError::Database(db) => db.into(),
            DbExecutorError::ChannelClosed => AppError::new(
                ErrorCode::DB_QUERY_FAILED,
                "Database is unavailable",
                ErrorCategory::Database,
            )
            .with_detail("executor thread stopped")
            .retryable(),
            DbExecutorError::TypeMismatch => AppError::internal("database result type mismatch"),
        }
    }
}

/// Owns the database on a dedicated thread and runs submitted operations
/// in order. Dropping the executor closes the channel and the thread exits
/// after draining pending work.
pub struct DbExecutor {
    sender: mpsc::Sender<DbOperation>,
    _handle: thread::JoinHandle<()>,
}

impl DbExecutor {
    pub fn new(db: Database) -> Self {
        let (sender, receiver) = mpsc::channel::<DbOperation>();

        let handle = thread::spawn(move || {
            while let Ok(operation) = receiver.recv() {
                let result = (operation.op)(&db);
                if operation.response.send(result).is_err() {
                    // Caller gave up waiting; nothing to do with the result.
                    error!("database executor: caller dropped before receiving result");
                }
            }
        });

        Self {
            sender,
            _handle: handle,
        }
    }

    /// Run a database operation on the executor thread and await its result
    pub async fn run<F, T>(&self, op: F) -> Result<T, DbExecutorError>
    where
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let boxed: BoxedDbOp = Box::new(move |db| Box::new(op(db)) as BoxedResult);
        self.sender
            .send(DbOperation {
                op: boxed,
                response: tx,
            })
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        let result = rx.await.map_err(|_| DbExecutorError::ChannelClosed)?;
        let typed = result
            .downcast::<DbResult<T>>()
            .map_err(|_| DbExecutorError::TypeMismatch)?;
        (*typed).map_err(DbExecutorError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> (TempDir, DbExecutor) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        (dir, DbExecutor::new(db))
    }

    #[tokio::test]
    async fn test_run_returns_typed_result() {
        let (_dir, executor) = executor();

        executor
            .run(|db| db.insert_document("d1", "u1", "a.txt"))
            .await
            .unwrap();

        let row = executor
            .run(|db| db.get_document("u1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.filename, "a.txt");
    }

    #[tokio::test]
    async fn test_operations_run_in_submission_order() {
        let (_dir, executor) = executor();

        executor
            .run(|db| db.insert_session("s1", "u1", "New Chat"))
            .await
            .unwrap();
        executor
            .run(|db| db.insert_chat_turn("s1", "q", "a"))
            .await
            .unwrap();

        let messages = executor.run(|db| db.list_messages("s1")).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_database_errors_propagate() {
        let (_dir, executor) = executor();

        executor
            .run(|db| db.insert_document("d1", "u1", "a.txt"))
            .await
            .unwrap();
        // Duplicate primary key surfaces as a database error.
        let err = executor
            .run(|db| db.insert_document("d1", "u1", "a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbExecutorError::Database(_)));
    }
}
