//! Tenant isolation and session scoping: queries and lookups must never
//! cross user boundaries, and retrieval must follow the link set as it
//! changes between turns.

mod common;

use common::{embed_text, lease_text, test_context, upload_and_wait};
use docuchat::error::ErrorCode;
use docuchat::vectors::VectorIndex;

#[tokio::test]
async fn queries_never_cross_user_boundaries_even_with_explicit_ids() {
    let ctx = test_context();
    let secret = upload_and_wait(&ctx, "u1", "secret.txt", "The launch codes are 4711.").await;
    let own = upload_and_wait(&ctx, "u2", "own.txt", "My own note about launch planning.").await;

    let probe = embed_text("launch codes");

    // Passing another user's document id explicitly returns nothing.
    let hits = ctx
        .index
        .query("u2", &[secret.clone()], &probe, 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Mixing a foreign id into an otherwise valid scope leaks nothing either.
    let hits = ctx
        .index
        .query("u2", &[own.clone(), secret.clone()], &probe, 10)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.document_id == own));
    assert!(hits.iter().all(|h| !h.text.contains("4711")));
}

#[tokio::test]
async fn foreign_documents_cannot_be_linked() {
    let ctx = test_context();
    let secret = upload_and_wait(&ctx, "u1", "secret.txt", "Confidential terms.").await;

    let err = ctx
        .service
        .create_session("u2", None, vec![secret.clone()])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NOT_FOUND_DOCUMENT);

    let session = ctx.service.create_session("u2", None, vec![]).await.unwrap();
    let err = ctx
        .service
        .link_documents("u2", &session, vec![secret])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NOT_FOUND_DOCUMENT);
}

#[tokio::test]
async fn foreign_document_lookups_read_as_missing() {
    let ctx = test_context();
    let doc = upload_and_wait(&ctx, "u1", "a.txt", "Some owned content.").await;

    for err in [
        ctx.service.document_status("u2", &doc).await.unwrap_err(),
        ctx.service.get_document("u2", &doc).await.unwrap_err(),
        ctx.service.delete_document("u2", &doc).await.unwrap_err(),
        ctx.service.reprocess_document("u2", &doc).await.unwrap_err(),
    ] {
        assert_eq!(err.code, ErrorCode::NOT_FOUND_DOCUMENT);
    }
    assert!(ctx.service.list_documents("u2").await.unwrap().is_empty());

    // The owner still sees it untouched.
    assert_eq!(ctx.service.list_documents("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn chat_context_stays_inside_the_linked_scope() {
    let ctx = test_context();
    let lease = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    let _recipe = upload_and_wait(
        &ctx,
        "u1",
        "recipe.txt",
        "The soup recipe needs basil and tomatoes.",
    )
    .await;

    let session = ctx
        .service
        .create_session("u1", None, vec![lease])
        .await
        .unwrap();
    ctx.service
        .chat("u1", &session, "What is the effective date of the lease?")
        .await
        .unwrap();

    let prompt = ctx.generator.last_user_message().await;
    assert!(prompt.contains("effective date"));
    assert!(prompt.contains("[Source 1: lease.txt]"));
    assert!(
        !prompt.contains("basil"),
        "unlinked document leaked into the context"
    );
}

#[tokio::test]
async fn relinking_documents_changes_the_next_turn() {
    let ctx = test_context();
    let lease = upload_and_wait(&ctx, "u1", "lease.txt", &lease_text()).await;
    let recipe = upload_and_wait(
        &ctx,
        "u1",
        "recipe.txt",
        "The soup recipe needs basil and tomatoes.",
    )
    .await;

    let session = ctx
        .service
        .create_session("u1", None, vec![lease])
        .await
        .unwrap();

    ctx.service
        .chat("u1", &session, "When does the lease start?")
        .await
        .unwrap();
    assert!(ctx
        .generator
        .last_user_message()
        .await
        .contains("[Source 1: lease.txt]"));

    // Swap the scope; the very next turn must follow it.
    ctx.service
        .link_documents("u1", &session, vec![recipe])
        .await
        .unwrap();
    ctx.service
        .chat("u1", &session, "What does the soup need?")
        .await
        .unwrap();
    let prompt = ctx.generator.last_user_message().await;
    assert!(prompt.contains("basil"));
    assert!(!prompt.contains("effective date"));

    // Unlink everything; the turn after falls back to general knowledge.
    ctx.service
        .link_documents("u1", &session, vec![])
        .await
        .unwrap();
    ctx.service
        .chat("u1", &session, "What is a lease?")
        .await
        .unwrap();
    let prompt = ctx.generator.last_user_message().await;
    assert_eq!(prompt, "What is a lease?");
    assert!(!prompt.contains("Context:"));
}

#[tokio::test]
async fn foreign_sessions_read_as_missing() {
    let ctx = test_context();
    let session = ctx.service.create_session("u1", None, vec![]).await.unwrap();

    for err in [
        ctx.service.chat("u2", &session, "hello").await.unwrap_err(),
        ctx.service.session_history("u2", &session).await.unwrap_err(),
        ctx.service
            .link_documents("u2", &session, vec![])
            .await
            .unwrap_err(),
        ctx.service.delete_session("u2", &session).await.unwrap_err(),
    ] {
        assert_eq!(err.code, ErrorCode::NOT_FOUND_SESSION);
    }
    assert_eq!(ctx.generator.call_count().await, 0);
}
