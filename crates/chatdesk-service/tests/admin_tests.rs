//! Identity provisioning integration tests.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chatdesk_test_utils::TestChatServer;
use serde_json::{json, Value};

#[tokio::test]
async fn test_provisioning_is_idempotent() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let first = server
        .provision(&admin, Some("ana"), "Ana Souza", "agent", Some("ana-password"))
        .await?;
    let second = server
        .provision(&admin, Some("ana"), "Someone Else", "agent", None)
        .await?;

    assert_eq!(first["identity"]["identity_id"], 2);
    assert_eq!(first["identity"], second["identity"]);
    assert_eq!(second["identity"]["display_name"], "Ana Souza");
    assert_eq!(second["membership_tenant_id"], server.tenant_id().0);
    assert_eq!(second["membership_primary"], true);
    // Seeded admin plus ana
    assert_eq!(server.store().membership_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_provisioning_yields_one_identity() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let (a, b, c) = tokio::join!(
        server.provision(&admin, Some("bia"), "Bia", "agent", None),
        server.provision(&admin, Some("bia"), "Bia", "agent", None),
        server.provision(&admin, Some("bia"), "Bia", "agent", None),
    );
    let (a, b, c) = (a?, b?, c?);

    assert_eq!(a["identity"]["identity_id"], b["identity"]["identity_id"]);
    assert_eq!(b["identity"]["identity_id"], c["identity"]["identity_id"]);
    assert_eq!(server.store().membership_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_contact_without_username_is_registered() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let contact = server
        .provision(&admin, None, "Cliente WhatsApp", "contact", None)
        .await?;

    assert!(contact["identity"]["username"].is_null());
    assert_eq!(contact["identity"]["kind"], "external_contact");
    assert_eq!(contact["membership_primary"], true);

    Ok(())
}

#[tokio::test]
async fn test_agents_cannot_provision() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let agent = server.agent_token("ana").await?;

    let response = server
        .client()
        .post(format!("{}/v1/admin/identities", server.url()))
        .bearer_auth(&agent)
        .json(&json!({"username": "x", "display_name": "X", "role": "agent"}))
        .send()
        .await?;

    assert_eq!(response.status(), 403);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    Ok(())
}

#[tokio::test]
async fn test_blank_display_name_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let response = server
        .client()
        .post(format!("{}/v1/admin/identities", server.url()))
        .bearer_auth(&admin)
        .json(&json!({"username": "x", "display_name": "   ", "role": "agent"}))
        .send()
        .await?;

    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn test_delete_identity() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let ana = server
        .provision(&admin, Some("ana"), "Ana", "agent", None)
        .await?;
    let id = ana["identity"]["identity_id"].as_i64().unwrap();

    let url = format!("{}/v1/admin/identities/{}", server.url(), id);
    let response = server.client().delete(&url).bearer_auth(&admin).send().await?;
    assert_eq!(response.status(), 204);
    assert_eq!(server.store().membership_count(), 1);

    let again = server.client().delete(&url).bearer_auth(&admin).send().await?;
    assert_eq!(again.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_delete_self() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;

    let response = server
        .client()
        .delete(format!(
            "{}/v1/admin/identities/{}",
            server.url(),
            server.admin_id()
        ))
        .bearer_auth(&admin)
        .send()
        .await?;

    assert_eq!(response.status(), 403);

    Ok(())
}

/// A token issued for a deleted identity must not resolve to whoever is
/// provisioned next.
#[tokio::test]
async fn test_deleted_identity_id_is_not_reassigned() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    let stale = server.agent_token("ana").await?;
    let ana_id = server
        .state()
        .identities
        .find_by_username(server.tenant_id(), "ana")
        .await?
        .unwrap()
        .identity_id
        .0;

    let response = server
        .client()
        .delete(format!("{}/v1/admin/identities/{}", server.url(), ana_id))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    let bia = server
        .provision(&admin, Some("bia"), "Bia", "agent", None)
        .await?;
    let bia_id = bia["identity"]["identity_id"].as_i64().unwrap();
    assert_ne!(bia_id, ana_id);
    assert_eq!(bia_id, ana_id + 1);

    // The stale token names an identity that no longer exists
    let events = server
        .client()
        .get(format!("{}/v1/events", server.url()))
        .bearer_auth(&stale)
        .send()
        .await?;
    assert_eq!(events.status(), 404);

    let presence: Value = server
        .client()
        .get(format!("{}/v1/presence/{}", server.url(), bia_id))
        .bearer_auth(&admin)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(presence["state"], "offline");
    assert_eq!(presence["connections"], 0);

    Ok(())
}
