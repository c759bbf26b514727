//! Test server harness for E2E testing
//!
//! Provides `TestChatServer` for spawning real Chatdesk server instances in
//! tests, backed by the in-memory store.

use anyhow::{anyhow, Context};
use chatdesk_service::actors::PresenceActor;
use chatdesk_service::bootstrap;
use chatdesk_service::config::Config;
use chatdesk_service::models::{Identity, Tenant};
use chatdesk_service::repositories::{ChatStore, InMemoryChatStore};
use chatdesk_service::routes::{self, AppState};
use chatdesk_service::services::IdentityStore;
use chatdesk_service::tasks::start_presence_sync;
use common::types::{IdentityId, TenantId};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Username of the seeded administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// Password of the seeded administrator.
pub const ADMIN_PASSWORD: &str = "test-admin-password";

/// Name of the seeded tenant.
pub const TENANT_NAME: &str = "Empresa Padrão";

const TEST_SIGNING_SECRET: &str = "test-signing-secret-that-is-long-enough-for-hs256";

/// Test harness for spawning the Chatdesk server in E2E tests.
///
/// The server runs the real router, presence actor and presence sync task
/// over an `InMemoryChatStore`. The store is seeded with one tenant and an
/// administrator (`ADMIN_USERNAME` / `ADMIN_PASSWORD`).
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> anyhow::Result<()> {
///     let server = TestChatServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestChatServer {
    addr: SocketAddr,
    store: Arc<InMemoryChatStore>,
    state: Arc<AppState>,
    tenant: Tenant,
    admin: Identity,
    client: reqwest::Client,
    cancel_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestChatServer {
    /// Spawn a server with zero presence grace, so disconnects are
    /// immediately visible.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(&[]).await
    }

    /// Spawn a server with extra environment-style overrides, e.g.
    /// `[("CHATDESK_SESSION_BUFFER", "1")]`.
    pub async fn spawn_with_vars(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "CHATDESK_SIGNING_SECRET".to_string(),
                TEST_SIGNING_SECRET.to_string(),
            ),
            ("CHATDESK_PRESENCE_GRACE_MS".to_string(), "0".to_string()),
            ("CHATDESK_BCRYPT_COST".to_string(), "10".to_string()),
            ("CHATDESK_SEED_TENANT_NAME".to_string(), TENANT_NAME.to_string()),
            (
                "CHATDESK_SEED_ADMIN_USERNAME".to_string(),
                ADMIN_USERNAME.to_string(),
            ),
            (
                "CHATDESK_SEED_ADMIN_PASSWORD".to_string(),
                ADMIN_PASSWORD.to_string(),
            ),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(InMemoryChatStore::new());
        let dyn_store: Arc<dyn ChatStore> = store.clone();

        let seed = bootstrap::ensure_defaults(dyn_store.clone(), &config.seed)
            .await
            .map_err(|e| anyhow!("Failed to seed store: {}", e))?;

        let cancel_token = CancellationToken::new();
        let (presence, _presence_task) = PresenceActor::spawn(
            IdentityStore::new(dyn_store.clone()),
            config.presence_grace,
            cancel_token.child_token(),
        );
        tokio::spawn(start_presence_sync(
            dyn_store.clone(),
            presence.subscribe(),
            cancel_token.child_token(),
        ));

        let state = Arc::new(AppState::new(dyn_store, config, presence));

        // Render handle without installing a global recorder
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state.clone(), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            state,
            tenant: seed.tenant,
            admin: seed.admin,
            client: reqwest::Client::new(),
            cancel_token,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The in-memory store behind the server, for seeding and assertions.
    pub fn store(&self) -> &Arc<InMemoryChatStore> {
        &self.store
    }

    /// Shared application state (services, presence handle, router).
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant.id
    }

    pub fn admin_id(&self) -> IdentityId {
        self.admin.identity_id
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Log in to the seeded tenant and return the bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/v1/auth/login", self.url()))
            .json(&json!({
                "tenant_id": self.tenant.id,
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("login for '{}' failed with {}", username, status));
        }

        let body: Value = response.json().await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .context("login response has no access_token")
    }

    /// Bearer token for the seeded administrator.
    pub async fn admin_token(&self) -> Result<String, anyhow::Error> {
        self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await
    }

    /// Provision an identity through the admin API and return the response
    /// body.
    pub async fn provision(
        &self,
        admin_token: &str,
        username: Option<&str>,
        display_name: &str,
        role: &str,
        password: Option<&str>,
    ) -> Result<Value, anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/v1/admin/identities", self.url()))
            .bearer_auth(admin_token)
            .json(&json!({
                "username": username,
                "display_name": display_name,
                "role": role,
                "password": password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("provisioning failed with {}: {}", status, body));
        }
        Ok(response.json().await?)
    }

    /// Provision a staff identity with a password and log it in.
    pub async fn agent_token(&self, username: &str) -> Result<String, anyhow::Error> {
        let admin = self.admin_token().await?;
        let password = format!("{username}-password");
        self.provision(&admin, Some(username), username, "agent", Some(&password))
            .await?;
        self.login(username, &password).await
    }
}

impl Drop for TestChatServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestChatServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_seeded_admin_can_log_in() -> Result<(), anyhow::Error> {
        let server = TestChatServer::spawn().await?;

        let token = server.admin_token().await?;
        assert!(!token.is_empty());
        assert_eq!(server.tenant_id(), TenantId(1));
        assert_eq!(server.admin_id(), IdentityId(1));

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestChatServer::spawn().await?;
        let server2 = TestChatServer::spawn().await?;

        assert_ne!(server1.addr(), server2.addr());

        let response1 = reqwest::get(format!("{}/health", server1.url())).await?;
        assert_eq!(response1.status(), 200);

        let response2 = reqwest::get(format!("{}/health", server2.url())).await?;
        assert_eq!(response2.status(), 200);

        Ok(())
    }

    #[tokio::test]
    async fn test_overrides_reach_config() -> Result<(), anyhow::Error> {
        let server = TestChatServer::spawn_with_vars(&[("CHATDESK_SESSION_BUFFER", "3")]).await?;
        assert_eq!(server.state().config.session_buffer, 3);
        Ok(())
    }
}
