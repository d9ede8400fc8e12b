//! End-to-end ingestion: upload through extraction, chunking, embedding and
//! indexing, plus reprocessing and failure handling.

mod common;

use common::{lease_text, test_context, upload_and_wait};
use docuchat::error::ErrorCode;
use docuchat::extract::EntityLabel;
use docuchat::DocumentStatus;

#[tokio::test]
async fn upload_runs_to_ready_and_indexes_every_chunk() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;

    let status = ctx.service.document_status("u1", &doc).await.unwrap();
    assert_eq!(status.status, DocumentStatus::Ready);
    assert!(status.error.is_none());
    assert!(status.chunk_count > 1, "fixture should span several chunks");
    assert_eq!(ctx.index.chunk_count().await, status.chunk_count as usize);

    let details = ctx.service.get_document("u1", &doc).await.unwrap();
    let hash = details.content_hash.unwrap();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn extracted_entities_cover_dates_orgs_and_people() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;

    let details = ctx.service.get_document("u1", &doc).await.unwrap();
    let has = |label: EntityLabel, needle: &str| {
        details
            .entities
            .iter()
            .any(|e| e.label == label && e.text.contains(needle))
    };
    assert!(has(EntityLabel::Date, "2024-03-01"));
    assert!(has(EntityLabel::Org, "Acme"));
    assert!(has(EntityLabel::Person, "Jane Smith"));
}

#[tokio::test]
async fn markdown_is_accepted_and_normalized() {
    let ctx = test_context();
    let doc = upload_and_wait(
        &ctx,
        "u1",
        "notes.md",
        "# Quarterly Review\n\nRevenue grew **12 percent** over the prior quarter.",
    )
    .await;

    let status = ctx.service.document_status("u1", &doc).await.unwrap();
    assert_eq!(status.status, DocumentStatus::Ready);
    assert!(status.chunk_count >= 1);
}

#[tokio::test]
async fn unsupported_extension_is_rejected_synchronously() {
    let ctx = test_context();
    let err = ctx
        .service
        .upload_document("u1", "report.pdf", b"%PDF-1.4")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::EXTRACT_UNSUPPORTED_FORMAT);

    // Nothing was stored or indexed.
    assert!(ctx.service.list_documents("u1").await.unwrap().is_empty());
    assert_eq!(ctx.index.chunk_count().await, 0);
}

#[tokio::test]
async fn blank_content_fails_with_extraction_error() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "blank.txt", "   \n\n\t  ").await;

    let status = ctx.service.document_status("u1", &doc).await.unwrap();
    assert_eq!(status.status, DocumentStatus::Failed);
    let error = status.error.unwrap();
    assert!(error.starts_with("extract:"), "got {error}");
    assert_eq!(status.chunk_count, 0);
    assert_eq!(ctx.index.chunk_count().await, 0);
}

#[tokio::test]
async fn reprocess_replaces_the_chunk_set_wholesale() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;

    let before = ctx.service.get_document("u1", &doc).await.unwrap();
    assert!(before.chunk_count > 1);

    std::fs::write(
        ctx.stored_upload_path(&doc, "txt"),
        "Replacement memo. One short paragraph only.",
    )
    .unwrap();
    ctx.service.reprocess_document("u1", &doc).await.unwrap();
    ctx.service.await_ingestion(&doc).await;

    let after = ctx.service.get_document("u1", &doc).await.unwrap();
    assert_eq!(after.status, DocumentStatus::Ready);
    assert_eq!(after.chunk_count, 1);
    assert_ne!(after.content_hash, before.content_hash);
    // No chunks from the first run survive.
    assert_eq!(ctx.index.chunk_count().await, 1);
}

#[tokio::test]
async fn parallel_uploads_complete_independently() {
    let ctx = test_context();
    let a = ctx
        .service
        .upload_document("u1", "a.txt", lease_text().as_bytes())
        .await
        .unwrap();
    let b = ctx
        .service
        .upload_document("u1", "b.txt", b"A single short note about roadmaps.")
        .await
        .unwrap();
    ctx.service.await_ingestion(&a).await;
    ctx.service.await_ingestion(&b).await;

    let sa = ctx.service.document_status("u1", &a).await.unwrap();
    let sb = ctx.service.document_status("u1", &b).await.unwrap();
    assert_eq!(sa.status, DocumentStatus::Ready);
    assert_eq!(sb.status, DocumentStatus::Ready);
    assert_eq!(
        ctx.index.chunk_count().await,
        (sa.chunk_count + sb.chunk_count) as usize
    );
}
