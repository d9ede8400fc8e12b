//! Shared harness for the integration suites: a full [`DocService`] wired
//! over an in-memory vector index and deterministic provider doubles.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use docuchat::config::AppConfig;
use docuchat::db::Database;
use docuchat::extract::BuiltinExtractor;
use docuchat::providers::{EmbeddingService, GenerationService, ProviderError};
use docuchat::service::DocService;
use docuchat::vectors::{ChunkHit, ChunkRecord, IndexError, MemoryVectorIndex, VectorIndex};

pub const EMBED_DIM: usize = 16;

/// Bag-of-words embedding into hashed buckets. Deterministic, so similarity
/// ordering in tests follows token overlap.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        v[(fnv1a(token) % EMBED_DIM as u64) as usize] += 1.0;
    }
    v
}

fn fnv1a(s: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub struct DeterministicEmbedding;

#[async_trait]
impl EmbeddingService for DeterministicEmbedding {
    fn dimension(&self) -> usize {
        EMBED_DIM
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Generation double that records every prompt and returns a scripted reply
pub struct RecordingGeneration {
    pub calls: Mutex<Vec<(String, String)>>,
    reply: std::sync::Mutex<String>,
}

impl RecordingGeneration {
    pub fn new(reply: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: std::sync::Mutex::new(reply.to_string()),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// The user message of the most recent generation call
    pub async fn last_user_message(&self) -> String {
        self.calls
            .lock()
            .await
            .last()
            .expect("no generation call recorded")
            .1
            .clone()
    }
}

#[async_trait]
impl GenerationService for RecordingGeneration {
    async fn generate(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .await
            .push((system.to_string(), user.to_string()));
        let reply = self.reply.lock().unwrap().clone();
        Ok(reply)
    }
}

/// In-memory index wrapper that counts queries and can simulate a backend
/// outage on delete
pub struct CountingIndex {
    inner: MemoryVectorIndex,
    pub queries: AtomicUsize,
    pub fail_deletes: AtomicBool,
}

impl CountingIndex {
    pub fn new() -> Self {
        Self {
            inner: MemoryVectorIndex::new(),
            queries: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn chunk_count(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert_chunks(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), IndexError> {
        self.inner.upsert_chunks(user_id, document_id, chunks).await
    }

    async fn delete_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<usize, IndexError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(IndexError::Backend("simulated index outage".into()));
        }
        self.inner.delete_document(user_id, document_id).await
    }

    async fn query(
        &self,
        user_id: &str,
        document_ids: &[String],
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>, IndexError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(user_id, document_ids, embedding, k).await
    }
}

pub struct TestContext {
    pub service: DocService,
    pub index: Arc<CountingIndex>,
    pub generator: Arc<RecordingGeneration>,
    pub data_dir: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    /// Filesystem path of a stored upload, for tests that change a document
    /// between ingestion runs
    pub fn stored_upload_path(&self, document_id: &str, extension: &str) -> PathBuf {
        self.data_dir
            .join("uploads")
            .join(format!("{}.{}", document_id, extension))
    }
}

pub fn test_context() -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let dir = TempDir::new().expect("temp dir");
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    // Small chunks so short fixtures still span several of them.
    config.chunking.max_chars = 80;
    config.chunking.overlap_chars = 8;
    config.embedding.dimension = EMBED_DIM;

    std::fs::create_dir_all(&config.storage.data_dir).expect("data dir");
    let database = Database::open(&config.storage.db_path()).expect("open database");
    database.initialize().expect("initialize database");

    let index = Arc::new(CountingIndex::new());
    let generator = Arc::new(RecordingGeneration::new("A grounded answer. [Source 1]"));
    let service = DocService::from_parts(
        &config,
        database,
        index.clone() as Arc<dyn VectorIndex>,
        Arc::new(BuiltinExtractor::new()),
        Arc::new(DeterministicEmbedding),
        generator.clone() as Arc<dyn GenerationService>,
    )
    .expect("wire service");

    TestContext {
        service,
        index,
        generator,
        data_dir: dir.path().to_path_buf(),
        _dir: dir,
    }
}

/// Upload a document and block until its ingestion run finishes
pub async fn upload_and_wait(
    ctx: &TestContext,
    user: &str,
    filename: &str,
    contents: &str,
) -> String {
    let id = ctx
        .service
        .upload_document(user, filename, contents.as_bytes())
        .await
        .expect("upload accepted");
    ctx.service.await_ingestion(&id).await;
    id
}

/// A two-part lease document used across suites
pub fn lease_text() -> String {
    let page_one = "LEASE AGREEMENT between Landlord Acme Corp and the tenant. \
        The effective date of this lease is 2024-03-01. \
        Monthly rent is due on the first day of each month.";
    let page_two = "Renewal terms: the tenant must give notice 60 days before expiry. \
        Security deposit equals one month of rent. \
        Signed by Ms. Jane Smith for Acme Corp.";
    format!("{}\n\n{}", page_one, page_two)
}
