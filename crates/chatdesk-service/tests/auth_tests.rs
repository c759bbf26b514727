//! Login and bearer-token integration tests.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chatdesk_test_utils::{TestChatServer, ADMIN_PASSWORD, ADMIN_USERNAME};
use serde_json::{json, Value};

#[tokio::test]
async fn test_login_returns_bearer_token() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;

    let response = server
        .client()
        .post(format!("{}/v1/auth/login", server.url()))
        .json(&json!({
            "tenant_id": server.tenant_id(),
            "username": ADMIN_USERNAME,
            "password": ADMIN_PASSWORD,
        }))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["expires_in"].as_i64().unwrap() > 0);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert_eq!(body["identity"]["role"], "administrator");
    assert!(body["identity"].get("credential_hash").is_none());

    Ok(())
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;

    let mut bodies = Vec::new();
    for (username, password) in [(ADMIN_USERNAME, "wrong"), ("nobody", ADMIN_PASSWORD)] {
        let response = server
            .client()
            .post(format!("{}/v1/auth/login", server.url()))
            .json(&json!({
                "tenant_id": server.tenant_id(),
                "username": username,
                "password": password,
            }))
            .send()
            .await?;
        assert_eq!(response.status(), 401);
        assert!(response.headers().get("www-authenticate").is_none());
        bodies.push(response.json::<Value>().await?);
    }

    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[0]["error"]["code"], "INVALID_CREDENTIALS");

    Ok(())
}

#[tokio::test]
async fn test_login_is_scoped_to_tenant() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;

    let response = server
        .client()
        .post(format!("{}/v1/auth/login", server.url()))
        .json(&json!({
            "tenant_id": 999,
            "username": ADMIN_USERNAME,
            "password": ADMIN_PASSWORD,
        }))
        .send()
        .await?;

    assert_eq!(response.status(), 401);

    Ok(())
}

#[tokio::test]
async fn test_protected_route_requires_token() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;

    let response = server
        .client()
        .get(format!("{}/v1/conversations/5511999990000/messages", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    assert!(response.headers().get("www-authenticate").is_some());
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    Ok(())
}

#[tokio::test]
async fn test_garbage_token_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;

    let response = server
        .client()
        .get(format!("{}/v1/presence/1", server.url()))
        .bearer_auth("not-a-jwt")
        .send()
        .await?;

    assert_eq!(response.status(), 401);

    Ok(())
}

#[tokio::test]
async fn test_contacts_cannot_log_in() -> Result<(), anyhow::Error> {
    let server = TestChatServer::spawn().await?;
    let admin = server.admin_token().await?;
    server
        .provision(&admin, Some("cliente"), "Cliente", "contact", Some("cliente-password"))
        .await?;

    assert!(server.login("cliente", "cliente-password").await.is_err());

    Ok(())
}
