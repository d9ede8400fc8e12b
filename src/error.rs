//! Application error types for docuchat
//!
//! Provides a unified error model across the service facade with:
//! - Stable error codes for API-layer handling
//! - User-friendly messages
//! - Optional internal details for logging
//! - Retry hints for callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error categories for grouping and API mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Input validation errors (bad filename, oversized upload)
    Validation,
    /// Ownership mismatch (user acting on another user's resource)
    NotAuthorized,
    /// Resource not found
    NotFound,
    /// State-machine conflicts (document already processing)
    Conflict,
    /// Extraction-stage errors (unsupported format, unreadable content)
    Extraction,
    /// Remote model provider errors (embedding, generation)
    Provider,
    /// Vector index errors, including cross-store consistency failures
    Index,
    /// Database errors
    Database,
    /// File I/O errors
    Io,
    /// Internal errors (unexpected state, bugs)
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotAuthorized => write!(f, "not_authorized"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Extraction => write!(f, "extraction"),
            Self::Provider => write!(f, "provider"),
            Self::Index => write!(f, "index"),
            Self::Database => write!(f, "database"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Stable error codes for API-layer handling
/// Format: CATEGORY_SPECIFIC_ERROR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode(pub String);

impl ErrorCode {
    // Validation errors
    pub const VALIDATION_EMPTY_INPUT: &'static str = "VALIDATION_EMPTY_INPUT";
    pub const VALIDATION_INPUT_TOO_LARGE: &'static str = "VALIDATION_INPUT_TOO_LARGE";
    pub const VALIDATION_INVALID_FORMAT: &'static str = "VALIDATION_INVALID_FORMAT";
    pub const VALIDATION_INVALID_URL: &'static str = "VALIDATION_INVALID_URL";
    pub const VALIDATION_INVALID_ID: &'static str = "VALIDATION_INVALID_ID";

    // Authorization errors
    pub const AUTH_OWNERSHIP_MISMATCH: &'static str = "AUTH_OWNERSHIP_MISMATCH";

    // Not found errors
    pub const NOT_FOUND_DOCUMENT: &'static str = "NOT_FOUND_DOCUMENT";
    pub const NOT_FOUND_SESSION: &'static str = "NOT_FOUND_SESSION";

    // Conflict errors
    pub const CONFLICT_ALREADY_PROCESSING: &'static str = "CONFLICT_ALREADY_PROCESSING";
    pub const CONFLICT_DELETE_IN_PROGRESS: &'static str = "CONFLICT_DELETE_IN_PROGRESS";

    // Extraction errors
    pub const EXTRACT_UNSUPPORTED_FORMAT: &'static str = "EXTRACT_UNSUPPORTED_FORMAT";
    pub const EXTRACT_FAILED: &'static str = "EXTRACT_FAILED";
    pub const EXTRACT_EMPTY_TEXT: &'static str = "EXTRACT_EMPTY_TEXT";

    // Provider errors
    pub const PROVIDER_EMBEDDING_FAILED: &'static str = "PROVIDER_EMBEDDING_FAILED";
    pub const PROVIDER_GENERATION_FAILED: &'static str = "PROVIDER_GENERATION_FAILED";
    pub const PROVIDER_TIMEOUT: &'static str = "PROVIDER_TIMEOUT";
    pub const PROVIDER_RATE_LIMITED: &'static str = "PROVIDER_RATE_LIMITED";

    // Index errors
    pub const INDEX_CONSISTENCY: &'static str = "INDEX_CONSISTENCY";
    pub const INDEX_QUERY_FAILED: &'static str = "INDEX_QUERY_FAILED";
    pub const INDEX_WRITE_FAILED: &'static str = "INDEX_WRITE_FAILED";

    // Database errors
    pub const DB_NOT_INITIALIZED: &'static str = "DB_NOT_INITIALIZED";
    pub const DB_QUERY_FAILED: &'static str = "DB_QUERY_FAILED";

    // I/O errors
    pub const IO_FILE_NOT_FOUND: &'static str = "IO_FILE_NOT_FOUND";
    pub const IO_PERMISSION_DENIED: &'static str = "IO_PERMISSION_DENIED";
    pub const IO_READ_ERROR: &'static str = "IO_READ_ERROR";
    pub const IO_WRITE_ERROR: &'static str = "IO_WRITE_ERROR";

    // Internal errors
    pub const INTERNAL_ERROR: &'static str = "INTERNAL_ERROR";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application error type for all facade operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    /// Stable error code for API-layer handling
    pub code: String,
    /// User-friendly error message
    pub message: String,
    /// Optional internal details for logging (not shown to user)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Error category for grouping
    pub category: ErrorCategory,
}

impl AppError {
    /// Create a new application error
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
            retryable: false,
            category,
        }
    }

    /// Add internal detail for logging
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    // =========================================================================
    // Convenience constructors for common errors
    // =========================================================================

    /// Validation error: empty input
    pub fn empty_input(field: &str) -> Self {
        Self::new(
            ErrorCode::VALIDATION_EMPTY_INPUT,
            format!("{} cannot be empty", field),
            ErrorCategory::Validation,
        )
    }

    /// Validation error: input too large
    pub fn input_too_large(field: &str, max: usize) -> Self {
        Self::new(
            ErrorCode::VALIDATION_INPUT_TOO_LARGE,
            format!("{} exceeds maximum size of {} bytes", field, max),
            ErrorCategory::Validation,
        )
    }

    /// Validation error: invalid format
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VALIDATION_INVALID_FORMAT,
            message,
            ErrorCategory::Validation,
        )
    }

    /// Validation error: invalid URL
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VALIDATION_INVALID_URL,
            message,
            ErrorCategory::Validation,
        )
    }

    /// Validation error: malformed identifier
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VALIDATION_INVALID_ID,
            message,
            ErrorCategory::Validation,
        )
    }

    /// Ownership mismatch on a document or session
    pub fn not_authorized(resource: &str) -> Self {
        Self::new(
            ErrorCode::AUTH_OWNERSHIP_MISMATCH,
            format!("Not authorized to access this {}", resource),
            ErrorCategory::NotAuthorized,
        )
    }

    /// Not found error: document
    pub fn document_not_found(id: &str) -> Self {
        Self::new(
            ErrorCode::NOT_FOUND_DOCUMENT,
            format!("Document not found: {}", id),
            ErrorCategory::NotFound,
        )
    }

    /// Not found error: session
    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            ErrorCode::NOT_FOUND_SESSION,
            format!("Session not found: {}", id),
            ErrorCategory::NotFound,
        )
    }

    /// Conflict: document is already being processed
    pub fn already_processing(id: &str) -> Self {
        Self::new(
            ErrorCode::CONFLICT_ALREADY_PROCESSING,
            format!("Document is already being processed: {}", id),
            ErrorCategory::Conflict,
        )
    }

    /// Conflict: document is mid-deletion
    pub fn delete_in_progress(id: &str) -> Self {
        Self::new(
            ErrorCode::CONFLICT_DELETE_IN_PROGRESS,
            format!("Document deletion is in progress: {}", id),
            ErrorCategory::Conflict,
        )
        .retryable()
    }

    /// Extraction error: format not handled by any registered extractor
    pub fn unsupported_format(extension: &str) -> Self {
        Self::new(
            ErrorCode::EXTRACT_UNSUPPORTED_FORMAT,
            format!("Unsupported file type: {}", extension),
            ErrorCategory::Extraction,
        )
    }

    /// Extraction error: content could not be read
    pub fn extraction_failed(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::EXTRACT_FAILED,
            "Failed to extract text from the document",
            ErrorCategory::Extraction,
        )
        .with_detail(detail)
    }

    /// Provider error: embedding call failed
    pub fn embedding_failed(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PROVIDER_EMBEDDING_FAILED,
            "Embedding service request failed",
            ErrorCategory::Provider,
        )
        .with_detail(detail)
        .retryable()
    }

    /// Provider error: generation call failed
    pub fn generation_failed(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PROVIDER_GENERATION_FAILED,
            "Generation service request failed",
            ErrorCategory::Provider,
        )
        .with_detail(detail)
        .retryable()
    }

    /// Provider error: call exceeded its deadline
    pub fn provider_timeout(service: &str) -> Self {
        Self::new(
            ErrorCode::PROVIDER_TIMEOUT,
            format!("{} request timed out", service),
            ErrorCategory::Provider,
        )
        .retryable()
    }

    /// Index error: cross-store consistency could not be maintained
    pub fn index_consistency(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::INDEX_CONSISTENCY,
            "Vector index cleanup failed; the document remains pending deletion",
            ErrorCategory::Index,
        )
        .with_detail(detail)
        .retryable()
    }

    /// Database error: not initialized
    pub fn db_not_initialized() -> Self {
        Self::new(
            ErrorCode::DB_NOT_INITIALIZED,
            "Database not initialized",
            ErrorCategory::Database,
        )
    }

    /// Database error: query failed
    pub fn db_query_failed(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DB_QUERY_FAILED,
            "Database operation failed",
            ErrorCategory::Database,
        )
        .with_detail(detail)
    }

    /// Internal error
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::INTERNAL_ERROR,
            "An internal error occurred",
            ErrorCategory::Internal,
        )
        .with_detail(detail)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

// Convert from common error types
impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        Self::db_query_failed(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::new(
                ErrorCode::IO_FILE_NOT_FOUND,
                "File or directory not found",
                ErrorCategory::Io,
            )
            .with_detail(e.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::new(
                ErrorCode::IO_PERMISSION_DENIED,
                "Permission denied",
                ErrorCategory::Io,
            )
            .with_detail(e.to_string()),
            _ => Self::new(ErrorCode::IO_READ_ERROR, "I/O error", ErrorCategory::Io)
                .with_detail(e.to_string()),
        }
    }
}

impl From<crate::extract::ExtractError> for AppError {
    fn from(e: crate::extract::ExtractError) -> Self {
        use crate::extract::ExtractError;
        match e {
            ExtractError::UnsupportedFormat(ext) => Self::unsupported_format(&ext),
            ExtractError::EmptyText => Self::new(
                ErrorCode::EXTRACT_EMPTY_TEXT,
                "Document produced no extractable text",
                ErrorCategory::Extraction,
            ),
            ExtractError::Failed(msg) => Self::extraction_failed(msg),
            ExtractError::Io(io) => io.into(),
        }
    }
}

impl From<crate::providers::ProviderError> for AppError {
    fn from(e: crate::providers::ProviderError) -> Self {
        use crate::providers::ProviderError;
        match e {
            ProviderError::Timeout { service } => Self::provider_timeout(&service),
            ProviderError::RateLimited { service } => Self::new(
                ErrorCode::PROVIDER_RATE_LIMITED,
                format!("{} request was rate limited", service),
                ErrorCategory::Provider,
            )
            .retryable(),
            ProviderError::Embedding(msg) => Self::embedding_failed(msg),
            ProviderError::Generation(msg) => Self::generation_failed(msg),
            ProviderError::BadResponse { service, detail } => Self::new(
                ErrorCode::INTERNAL_ERROR,
                format!("{} returned an unusable response", service),
                ErrorCategory::Provider,
            )
            .with_detail(detail),
        }
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(e: crate::db::DbError) -> Self {
        use crate::db::DbError;
        match e {
            DbError::Sqlite(err) => err.into(),
            DbError::Migration(msg) => Self::db_not_initialized().with_detail(msg),
            DbError::Corruption => {
                Self::db_not_initialized().with_detail("integrity check failed")
            }
            DbError::Io(io) => io.into(),
        }
    }
}

impl From<crate::vectors::IndexError> for AppError {
    fn from(e: crate::vectors::IndexError) -> Self {
        use crate::vectors::IndexError;
        match e {
            IndexError::InvalidId(msg) => Self::invalid_id(msg),
            IndexError::Backend(msg) => Self::new(
                ErrorCode::INDEX_QUERY_FAILED,
                "Vector index operation failed",
                ErrorCategory::Index,
            )
            .with_detail(msg)
            .retryable(),
            IndexError::Arrow(msg) => Self::new(
                ErrorCode::INDEX_WRITE_FAILED,
                "Vector index data conversion failed",
                ErrorCategory::Index,
            )
            .with_detail(msg),
            IndexError::Io(io) => io.into(),
        }
    }
}
