//! Runtime configuration for the docuchat service
//!
//! All sections carry serde defaults so a host can supply a partial YAML file
//! (or none at all) and still get working settings. Provider sections are
//! validated before clients are built from them.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, AppError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AppError::invalid_format(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn from_yaml_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check cross-field constraints and provider endpoints
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunking.max_chars == 0 {
            return Err(AppError::invalid_format("chunking.max_chars must be > 0"));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(AppError::invalid_format(
                "chunking.overlap_chars must be smaller than chunking.max_chars",
            ));
        }
        if self.retrieval.per_document_k == 0 {
            return Err(AppError::invalid_format(
                "retrieval.per_document_k must be > 0",
            ));
        }
        if self.retrieval.max_context_chunks == 0 {
            return Err(AppError::invalid_format(
                "retrieval.max_context_chunks must be > 0",
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(AppError::invalid_format("embedding.dimension must be > 0"));
        }
        validate_base_url("embedding.base_url", &self.embedding.base_url)?;
        validate_base_url("generation.base_url", &self.generation.base_url)?;
        Ok(())
    }
}

fn validate_base_url(field: &str, value: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::invalid_url(format!("{}: {}", field, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::invalid_url(format!(
            "{}: unsupported scheme '{}'",
            field,
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Filesystem layout for persistent state
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the SQLite database, the vector table, and uploads
    pub data_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_upload_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("docuchat.db")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

/// Text segmentation parameters
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub max_chars: usize,
    /// Characters of carry-over between consecutive chunks
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1024,
            overlap_chars: 48,
        }
    }
}

/// Per-turn retrieval budget
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Neighbors requested per linked document when sizing the index query
    pub per_document_k: usize,
    /// Hard cap on chunks handed to generation, independent of link count
    pub max_context_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_document_k: 4,
            max_context_chunks: 8,
        }
    }
}

/// Remote embedding service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint
    pub base_url: String,
    /// API key sent as a bearer token; empty disables the Authorization header
    pub api_key: String,
    /// Model identifier passed through to the service
    pub model: String,
    /// Vector width the index is created with
    pub dimension: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.jina.ai/v1".into(),
            api_key: String::new(),
            model: "jina-embeddings-v2-base-en".into(),
            dimension: 768,
            timeout_secs: 30,
        }
    }
}

/// Remote generation service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub base_url: String,
    /// API key sent as a bearer token; empty disables the Authorization header
    pub api_key: String,
    /// Model identifier passed through to the service
    pub model: String,
    /// Sampling temperature; low by default to stay close to the context
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".into(),
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".into(),
            temperature: 0.1,
            timeout_secs: 60,
        }
    }
}
