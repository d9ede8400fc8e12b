//! docuchat - session-scoped chat over a user's uploaded documents
//!
//! Uploads are chunked, embedded, and stored in a tenant-isolated vector
//! index while a state machine tracks each document's progress. Chat sessions
//! link a subset of documents; every turn retrieves from exactly that subset,
//! bounds the merged context, and generates an attributed answer. Hosts drive
//! the whole crate through [`DocService`].

pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod prompt;
pub mod providers;
pub mod service;
pub mod sessions;
pub mod vectors;

pub use config::AppConfig;
pub use db::{DocumentStatus, MessageRole, MessageRow};
pub use error::{AppError, ErrorCategory};
pub use service::{DocService, DocumentDetails, DocumentStatusReport};
pub use sessions::SessionDetails;
