//! Deletion and cross-store consistency: removing a document clears its
//! chunks everywhere, a failed index cleanup parks the row instead of
//! leaking chunks, and session deletion never touches documents.

mod common;

use std::sync::atomic::Ordering;

use common::{embed_text, lease_text, test_context, upload_and_wait};
use docuchat::error::ErrorCode;
use docuchat::vectors::VectorIndex;
use docuchat::DocumentStatus;

#[tokio::test]
async fn deleted_document_chunks_are_gone_and_stay_gone() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    assert!(ctx.index.chunk_count().await > 1);

    ctx.service.delete_document("u1", &doc).await.unwrap();
    assert_eq!(ctx.index.chunk_count().await, 0);
    let hits = ctx
        .index
        .query("u1", &[doc.clone()], &embed_text("lease"), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    // A later ingestion of the same content gets a fresh document, with no
    // chunks resurrected under the old id.
    let again = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    assert_ne!(again, doc);
    let status = ctx.service.document_status("u1", &again).await.unwrap();
    assert_eq!(status.status, DocumentStatus::Ready);
    let hits = ctx
        .index
        .query("u1", &[doc], &embed_text("lease"), 10)
        .await
        .unwrap();
    assert!(hits.is_empty(), "chunks reappeared under the deleted id");
}

#[tokio::test]
async fn delete_removes_row_links_and_stored_upload() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    let session = ctx
        .service
        .create_session("u1", None, vec![doc.clone()])
        .await
        .unwrap();
    let stored = ctx.stored_upload_path(&doc, "txt");
    assert!(stored.exists());

    ctx.service.delete_document("u1", &doc).await.unwrap();

    let err = ctx.service.get_document("u1", &doc).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NOT_FOUND_DOCUMENT);
    assert!(!stored.exists());

    // The session survives with the link removed.
    let sessions = ctx.service.list_sessions("u1").await.unwrap();
    let listed = sessions.iter().find(|s| s.id == session).unwrap();
    assert!(listed.document_ids.is_empty());
}

#[tokio::test]
async fn failed_index_delete_parks_the_document_as_pending() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    let session = ctx
        .service
        .create_session("u1", None, vec![doc.clone()])
        .await
        .unwrap();

    ctx.index.fail_deletes.store(true, Ordering::SeqCst);
    let err = ctx.service.delete_document("u1", &doc).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::INDEX_CONSISTENCY);
    assert!(err.retryable);

    // The row is parked, visible, and excluded from retrieval scope.
    let status = ctx.service.document_status("u1", &doc).await.unwrap();
    assert_eq!(status.status, DocumentStatus::DeletePending);
    assert!(status.error.unwrap().contains("simulated index outage"));

    ctx.service
        .chat("u1", &session, "When does the lease start?")
        .await
        .unwrap();
    let prompt = ctx.generator.last_user_message().await;
    assert_eq!(prompt, "When does the lease start?");

    // No new ingestion may start while deletion is pending.
    let err = ctx.service.reprocess_document("u1", &doc).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::CONFLICT_DELETE_IN_PROGRESS);

    // Retrying the delete finishes the job once the index recovers.
    ctx.index.fail_deletes.store(false, Ordering::SeqCst);
    ctx.service.delete_document("u1", &doc).await.unwrap();
    let err = ctx.service.document_status("u1", &doc).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NOT_FOUND_DOCUMENT);
    assert_eq!(ctx.index.chunk_count().await, 0);
}

#[tokio::test]
async fn session_delete_keeps_documents_and_their_chunks() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    let session = ctx
        .service
        .create_session("u1", None, vec![doc.clone()])
        .await
        .unwrap();
    ctx.service
        .chat("u1", &session, "When does the lease start?")
        .await
        .unwrap();
    let chunks_before = ctx.index.chunk_count().await;

    ctx.service.delete_session("u1", &session).await.unwrap();

    let err = ctx
        .service
        .session_history("u1", &session)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NOT_FOUND_SESSION);

    let status = ctx.service.document_status("u1", &doc).await.unwrap();
    assert_eq!(status.status, DocumentStatus::Ready);
    assert_eq!(ctx.index.chunk_count().await, chunks_before);
}
