//! Message append, backlog and caption repair integration tests.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chatdesk_service::maintenance::{CaptionRepair, MaintenanceJob};
use chatdesk_service::models::{IdentityAttributes, IdentityKind, NewMessage, Role, SenderKind};
use chatdesk_service::repositories::{ChatStore, MessageRepository};
use chatdesk_service::services::MediaValidator;
use chatdesk_test_utils::TestChatServer;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

const CONVERSATION: &str = "5511999990000";

async fn send(
    server: &TestChatServer,
    token: &str,
    media_type: Option<&str>,
    content: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(server
        .client()
        .post(format!(
            "{}/v1/conversations/{}/messages",
            server.url(),
            CONVERSATION
        ))
        .bearer_auth(token)
        .json(&json!({"media_type": media_type, "content": content}))
        .send()
        .await?)
}

async fn backlog(
    server: &TestChatServer,
    token: &str,
    after_seq: i64,
) -> Result<Vec<Value>, anyhow::Error> {
    let body: Value = server
        .client()
        .get(format!(
            "{}/v1/conversations/{}/messages?after_seq={}",
            server.url(),
            CONVERSATION,
            after_seq
        ))
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body["messages"].as_array().cloned().unwrap_or_default())
}

#[tokio::test]
async fn test_placeholder_caption_is_cleared_on_append() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;

    let response = send(&server, &token, Some("image"), "Imagem").await?;
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await?;
    assert_eq!(body["message"]["content"], "");
    assert_eq!(body["message"]["media_type"], "image");
    assert_eq!(body["message"]["seq"], 1);
    assert_eq!(body["message"]["sender_kind"], "agent");
    assert_eq!(body["delivered"], 0);

    Ok(())
}

#[tokio::test]
async fn test_plain_text_passes_through() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;

    let body: Value = send(&server, &token, None, "Imagem").await?.json().await?;
    assert_eq!(body["message"]["content"], "Imagem");
    assert!(body["message"]["media_type"].is_null());

    Ok(())
}

#[tokio::test]
async fn test_unknown_media_type_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;

    let response = send(&server, &token, Some("hologram"), "hi").await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    assert!(backlog(&server, &token, 0).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_backlog_returns_messages_after_sequence() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;

    for i in 1..=5 {
        send(&server, &token, None, &format!("message {i}")).await?;
    }

    let all = backlog(&server, &token, 0).await?;
    let seqs: Vec<i64> = all.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    let missed = backlog(&server, &token, 3).await?;
    let seqs: Vec<i64> = missed.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![4, 5]);

    Ok(())
}

#[tokio::test]
async fn test_backlog_limit_is_applied() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;
    for i in 1..=3 {
        send(&server, &token, None, &format!("message {i}")).await?;
    }

    let body: Value = server
        .client()
        .get(format!(
            "{}/v1/conversations/{}/messages?limit=2",
            server.url(),
            CONVERSATION
        ))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["messages"].as_array().unwrap().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_conversations_are_isolated_by_tenant() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;
    send(&server, &token, None, "tenant one only").await?;

    // Second tenant with its own administrator
    let state = server.state();
    let other = state.tenants.create_tenant("Outra Empresa", json!({})).await?;
    let hash = bcrypt::hash("other-password", 10)?;
    state
        .identities
        .provision(
            other.id,
            "admin",
            &IdentityAttributes {
                display_name: "Other Admin".to_string(),
                role: Role::Administrator,
                kind: IdentityKind::SystemUser,
                credential_hash: Some(hash),
            },
        )
        .await?;

    let response = server
        .client()
        .post(format!("{}/v1/auth/login", server.url()))
        .json(&json!({"tenant_id": other.id, "username": "admin", "password": "other-password"}))
        .send()
        .await?;
    let other_token = response.json::<Value>().await?["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    assert!(backlog(&server, &other_token, 0).await?.is_empty());

    // Same conversation reference, independent sequence
    let body: Value = send(&server, &other_token, None, "tenant two").await?.json().await?;
    assert_eq!(body["message"]["seq"], 1);
    assert_eq!(backlog(&server, &token, 0).await?.len(), 1);

    Ok(())
}

/// Legacy rows written before sanitation existed are fixed by the repair
/// job, and a second run finds nothing.
#[tokio::test]
async fn test_caption_repair_fixes_legacy_rows() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let token = server.admin_token().await?;

    server
        .store()
        .insert_message(&NewMessage {
            tenant_id: server.tenant_id(),
            conversation_ref: CONVERSATION.to_string(),
            sender_kind: SenderKind::Contact,
            media_type: Some("video".to_string()),
            content: "Vídeo".to_string(),
            created_at: Utc::now(),
        })
        .await?;
    assert_eq!(backlog(&server, &token, 0).await?[0]["content"], "Vídeo");

    let store: Arc<dyn ChatStore> = server.store().clone();
    let job = CaptionRepair::new(Arc::new(MediaValidator::default()), 100);

    let first = job.run(store.clone()).await?;
    assert_eq!(first.fixed, 1);
    assert_eq!(backlog(&server, &token, 0).await?[0]["content"], "");

    let second = job.run(store).await?;
    assert_eq!(second.fixed, 0);

    Ok(())
}
