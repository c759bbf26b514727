//! Live delivery and presence integration tests.
//!
//! Sessions are opened over `GET /v1/events` with [`EventReader`]; messages
//! are sent through the HTTP API and must show up on every staff session of
//! the tenant, in sequence order.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chatdesk_service::models::{IdentityAttributes, IdentityKind, Role};
use chatdesk_test_utils::{EventReader, TestChatServer};
use serde_json::{json, Value};
use std::time::Duration;

const CONVERSATION: &str = "5511988887777";
const WAIT: Duration = Duration::from_secs(5);

async fn send(
    server: &TestChatServer,
    token: &str,
    media_type: Option<&str>,
    content: &str,
) -> Result<Value, anyhow::Error> {
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
        .await?
        .error_for_status()?
        .json()
        .await?)
}

async fn presence(
    server: &TestChatServer,
    token: &str,
    identity_id: i64,
) -> Result<Value, anyhow::Error> {
    Ok(server
        .client()
        .get(format!("{}/v1/presence/{}", server.url(), identity_id))
        .bearer_auth(token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

#[tokio::test]
async fn test_agent_session_receives_sanitized_message() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let agent = server.agent_token("ana").await?;

    let mut reader = EventReader::open(server.client(), &server.url(), &agent).await?;

    let sent = send(&server, &admin, Some("audio"), "Áudio").await?;
    assert_eq!(sent["delivered"], 1);

    let received = reader.next_message(WAIT).await?;
    assert_eq!(received, sent["message"]);
    assert_eq!(received["content"], "");
    assert_eq!(received["conversation_ref"], CONVERSATION);

    Ok(())
}

#[tokio::test]
async fn test_every_staff_session_gets_messages_in_order() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let ana = server.agent_token("ana").await?;
    let bia = server.agent_token("bia").await?;

    let mut first = EventReader::open(server.client(), &server.url(), &ana).await?;
    let mut second = EventReader::open(server.client(), &server.url(), &bia).await?;

    let sends = (1..=20).map(|i| {
        let admin = admin.clone();
        let server = &server;
        async move { send(server, &admin, None, &format!("mensagem {i}")).await }
    });
    for result in futures::future::join_all(sends).await {
        result?;
    }

    for reader in [&mut first, &mut second] {
        let mut seqs = Vec::new();
        for _ in 0..20 {
            seqs.push(reader.next_message(WAIT).await?["seq"].as_i64().unwrap());
        }
        assert_eq!(seqs, (1..=20).collect::<Vec<i64>>());
    }

    Ok(())
}

#[tokio::test]
async fn test_sessions_of_other_tenants_see_nothing() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let state = server.state();
    let other = state.tenants.create_tenant("Outra Empresa", json!({})).await?;
    state
        .identities
        .provision(
            other.id,
            "ana",
            &IdentityAttributes {
                display_name: "Ana".to_string(),
                role: Role::Agent,
                kind: IdentityKind::SystemUser,
                credential_hash: Some(bcrypt::hash("other-password", 10)?),
            },
        )
        .await?;
    let outsider: Value = server
        .client()
        .post(format!("{}/v1/auth/login", server.url()))
        .json(&json!({"tenant_id": other.id, "username": "ana", "password": "other-password"}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let outsider = outsider["access_token"].as_str().unwrap().to_string();

    let mut reader = EventReader::open(server.client(), &server.url(), &outsider).await?;

    let sent = send(&server, &admin, None, "só para a empresa padrão").await?;
    assert_eq!(sent["delivered"], 0);
    assert!(reader.is_quiet_for(Duration::from_millis(300)).await);

    Ok(())
}

#[tokio::test]
async fn test_presence_follows_live_session() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let agent = server.agent_token("ana").await?;
    let ana_id = server
        .state()
        .identities
        .find_by_username(server.tenant_id(), "ana")
        .await?
        .unwrap()
        .identity_id
        .0;

    let before = presence(&server, &admin, ana_id).await?;
    assert_eq!(before["state"], "offline");
    assert_eq!(before["online"], false);

    let reader = EventReader::open(server.client(), &server.url(), &agent).await?;
    let during = presence(&server, &admin, ana_id).await?;
    assert_eq!(during["state"], "online");
    assert_eq!(during["connections"], 1);

    drop(reader);

    // Grace window is zero in the harness; the server notices the closed
    // connection asynchronously, at the latest on the next keep-alive.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let after = presence(&server, &admin, ana_id).await?;
        if after["state"] == "offline" {
            assert_eq!(after["connections"], 0);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "still {after}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

#[tokio::test]
async fn test_presence_of_unknown_identity_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let response = server
        .client()
        .get(format!("{}/v1/presence/9999", server.url()))
        .bearer_auth(&admin)
        .send()
        .await?;

    assert_eq!(response.status(), 404);

    Ok(())
}

/// Agent connects, misses messages while away, then catches up from the
/// backlog and keeps receiving live ones without gaps or repeats.
#[tokio::test]
async fn test_reconnect_catches_up_from_backlog() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let agent = server.agent_token("ana").await?;

    let mut reader = EventReader::open(server.client(), &server.url(), &agent).await?;
    send(&server, &admin, Some("image"), "Imagem").await?;
    let last_seen = reader.next_message(WAIT).await?["seq"].as_i64().unwrap();
    assert_eq!(last_seen, 1);
    drop(reader);

    send(&server, &admin, None, "enquanto offline 1").await?;
    send(&server, &admin, None, "enquanto offline 2").await?;

    let mut reader = EventReader::open(server.client(), &server.url(), &agent).await?;
    let backlog: Value = server
        .client()
        .get(format!(
            "{}/v1/conversations/{}/messages?after_seq={}",
            server.url(),
            CONVERSATION,
            last_seen
        ))
        .bearer_auth(&agent)
        .send()
        .await?
        .json()
        .await?;
    let missed: Vec<i64> = backlog["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(missed, vec![2, 3]);

    send(&server, &admin, None, "de volta").await?;
    let live = reader.next_message(WAIT).await?;
    assert_eq!(live["seq"], 4);
    assert_eq!(live["content"], "de volta");

    Ok(())
}
