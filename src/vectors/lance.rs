//! LanceDB-backed vector index
//!
//! One `chunks` table holds every user's chunks; tenant isolation happens in
//! the filter predicate of each operation, never in table layout. Predicates
//! are interpolated strings, so ids and user values are sanitized first (see
//! the module root).

use std::path::Path;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Table};
use tracing::debug;

use super::{
    sanitize_filter_value, sanitize_id, sort_hits, ChunkHit, ChunkRecord, IndexError, VectorIndex,
};

const TABLE_NAME: &str = "chunks";

pub struct LanceVectorIndex {
    table: Table,
    dimension: usize,
}

impl LanceVectorIndex {
    /// Open the index at `dir`, creating the table on first use.
    pub async fn connect(dir: &Path, dimension: usize) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir)?;

        let db_path = dir.to_string_lossy().to_string();
        let conn = connect(&db_path)
            .execute()
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let table_names = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let table = if table_names.contains(&TABLE_NAME.to_string()) {
            conn.open_table(TABLE_NAME)
                .execute()
                .await
                .map_err(|e| IndexError::Backend(e.to_string()))?
        } else {
            let schema = chunk_schema(dimension);
            let batch = empty_batch(&schema, dimension)?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            conn.create_table(TABLE_NAME, Box::new(batches))
                .execute()
                .await
                .map_err(|e| IndexError::Backend(e.to_string()))?
        };

        Ok(Self { table, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total rows in the table, across all users and documents
    pub async fn count(&self) -> Result<usize, IndexError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert_chunks(
        &self,
        user_id: &str,
        document_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), IndexError> {
        let predicate = document_predicate(user_id, document_id)?;

        // Validate before deleting anything so a malformed batch cannot wipe
        // the previous chunk set.
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(IndexError::Arrow(format!(
                    "embedding length {} does not match index dimension {}",
                    chunk.embedding.len(),
                    self.dimension
                )));
            }
        }

        // Delete-then-add: a scoped reader sees the old chunk set or the new
        // one, never a mix.
        self.table
            .delete(&predicate)
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        if chunks.is_empty() {
            return Ok(());
        }

        let schema = chunk_schema(self.dimension);

        let id_array = StringArray::from(chunks.iter().map(|c| c.id.clone()).collect::<Vec<_>>());
        let vector_iter = chunks
            .iter()
            .map(|c| Some(c.embedding.iter().map(|&v| Some(v)).collect::<Vec<_>>()));
        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vector_iter,
            self.dimension as i32,
        );
        let user_array =
            StringArray::from(chunks.iter().map(|c| c.user_id.clone()).collect::<Vec<_>>());
        let document_array = StringArray::from(
            chunks
                .iter()
                .map(|c| c.document_id.clone())
                .collect::<Vec<_>>(),
        );
        let index_array =
            Int64Array::from(chunks.iter().map(|c| c.chunk_index as i64).collect::<Vec<_>>());
        let text_array =
            StringArray::from(chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>());
        let entities_array = StringArray::from(
            chunks
                .iter()
                .map(|c| {
                    serde_json::to_string(&c.entities).unwrap_or_else(|_| "[]".to_string())
                })
                .collect::<Vec<_>>(),
        );
        let created_array = StringArray::from(
            chunks
                .iter()
                .map(|c| c.created_at.clone())
                .collect::<Vec<_>>(),
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(id_array),
                Arc::new(vector_array),
                Arc::new(user_array),
                Arc::new(document_array),
                Arc::new(index_array),
                Arc::new(text_array),
                Arc::new(entities_array),
                Arc::new(created_array),
            ],
        )
        .map_err(|e| IndexError::Arrow(e.to_string()))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        debug!(document_id, count = chunks.len(), "replaced document chunk set");
        Ok(())
    }

    async fn delete_document(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<usize, IndexError> {
        let predicate = document_predicate(user_id, document_id)?;

        let count = self
            .table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        if count > 0 {
            self.table
                .delete(&predicate)
                .await
                .map_err(|e| IndexError::Backend(e.to_string()))?;
        }

        debug!(document_id, removed = count, "deleted document chunks");
        Ok(count)
    }

    async fn query(
        &self,
        user_id: &str,
        document_ids: &[String],
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>, IndexError> {
        if document_ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let predicate = scope_predicate(user_id, document_ids)?;

        let results = self
            .table
            .vector_search(embedding)
            .map_err(|e| IndexError::Backend(e.to_string()))?
            .only_if(predicate)
            .limit(k)
            .execute()
            .await
            .map_err(|e: lancedb::Error| IndexError::Backend(e.to_string()))?;

        let batches: Vec<Result<RecordBatch, lancedb::Error>> = results.collect().await;

        let mut hits = Vec::new();
        for batch_result in batches {
            let batch =
                batch_result.map_err(|e: lancedb::Error| IndexError::Backend(e.to_string()))?;
            collect_hits(&batch, &mut hits)?;
        }

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

fn chunk_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("entities", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn empty_batch(schema: &Arc<Schema>, dimension: usize) -> Result<RecordBatch, IndexError> {
    let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        std::iter::empty::<Option<Vec<Option<f32>>>>(),
        dimension as i32,
    );

    RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(Vec::<String>::new())),
            Arc::new(vector_array),
            Arc::new(StringArray::from(Vec::<String>::new())),
            Arc::new(StringArray::from(Vec::<String>::new())),
            Arc::new(Int64Array::from(Vec::<i64>::new())),
            Arc::new(StringArray::from(Vec::<String>::new())),
            Arc::new(StringArray::from(Vec::<String>::new())),
            Arc::new(StringArray::from(Vec::<String>::new())),
        ],
    )
    .map_err(|e| IndexError::Arrow(e.to_string()))
}

/// Predicate scoping one document for one user, sanitized for interpolation
fn document_predicate(user_id: &str, document_id: &str) -> Result<String, IndexError> {
    let safe_user = sanitize_filter_value(user_id)
        .ok_or_else(|| IndexError::InvalidId(user_id.to_string()))?;
    let safe_doc =
        sanitize_id(document_id).ok_or_else(|| IndexError::InvalidId(document_id.to_string()))?;
    Ok(format!(
        "user_id = '{}' AND document_id = '{}'",
        safe_user, safe_doc
    ))
}

/// Predicate scoping a set of documents for one user
fn scope_predicate(user_id: &str, document_ids: &[String]) -> Result<String, IndexError> {
    let safe_user = sanitize_filter_value(user_id)
        .ok_or_else(|| IndexError::InvalidId(user_id.to_string()))?;

    let mut quoted = Vec::with_capacity(document_ids.len());
    for id in document_ids {
        let safe = sanitize_id(id).ok_or_else(|| IndexError::InvalidId(id.clone()))?;
        quoted.push(format!("'{}'", safe));
    }

    Ok(format!(
        "user_id = '{}' AND document_id IN ({})",
        safe_user,
        quoted.join(", ")
    ))
}

fn collect_hits(batch: &RecordBatch, out: &mut Vec<ChunkHit>) -> Result<(), IndexError> {
    let ids = string_column(batch, "id")?;
    let documents = string_column(batch, "document_id")?;
    let texts = string_column(batch, "text")?;
    let entity_blobs = string_column(batch, "entities")?;

    let indexes = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| IndexError::Backend("missing chunk_index column".into()))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| IndexError::Arrow("invalid chunk_index column type".into()))?;

    let distances = batch
        .column_by_name("_distance")
        .ok_or_else(|| IndexError::Backend("missing _distance column".into()))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| IndexError::Arrow("invalid _distance column type".into()))?;

    for i in 0..batch.num_rows() {
        let entities: Vec<String> = serde_json::from_str(entity_blobs.value(i)).unwrap_or_default();
        out.push(ChunkHit {
            id: ids.value(i).to_string(),
            document_id: documents.value(i).to_string(),
            chunk_index: indexes.value(i) as usize,
            text: texts.value(i).to_string(),
            entities,
            // Smaller distance is closer; flip so callers sort descending.
            score: 1.0 - distances.value(i),
        });
    }
    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Backend(format!("missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::Arrow(format!("invalid {} column type", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_predicate() {
        let predicate = document_predicate("u1", "abc-123").unwrap();
        assert_eq!(predicate, "user_id = 'u1' AND document_id = 'abc-123'");
    }

    #[test]
    fn test_document_predicate_escapes_user_quotes() {
        let predicate = document_predicate("o'brien", "abc").unwrap();
        assert_eq!(predicate, "user_id = 'o''brien' AND document_id = 'abc'");
    }

    #[test]
    fn test_document_predicate_rejects_bad_document_id() {
        assert!(matches!(
            document_predicate("u1", "abc'; DROP TABLE chunks --"),
            Err(IndexError::InvalidId(_))
        ));
    }

    #[test]
    fn test_scope_predicate_in_list() {
        let ids = vec!["d1".to_string(), "d2".to_string()];
        let predicate = scope_predicate("u1", &ids).unwrap();
        assert_eq!(predicate, "user_id = 'u1' AND document_id IN ('d1', 'd2')");
    }

    #[test]
    fn test_scope_predicate_rejects_any_bad_id() {
        let ids = vec!["d1".to_string(), "d2' OR '1'='1".to_string()];
        assert!(matches!(
            scope_predicate("u1", &ids),
            Err(IndexError::InvalidId(_))
        ));
    }

    #[test]
    fn test_chunk_schema_shape() {
        let schema = chunk_schema(768);
        assert_eq!(schema.fields().len(), 8);
        match schema.field_with_name("vector").unwrap().data_type() {
            DataType::FixedSizeList(_, size) => assert_eq!(*size, 768),
            other => panic!("unexpected vector type: {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch_matches_schema() {
        let schema = chunk_schema(4);
        let batch = empty_batch(&schema, 4).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), schema.fields().len());
    }
}
