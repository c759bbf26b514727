//! HTTP routes for the Chatdesk service.
//!
//! Defines the Axum router and application state.

use crate::actors::PresenceHandle;
use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::repositories::ChatStore;
use crate::services::{
    DeliveryRouter, IdentityStore, MediaValidator, MessagePipeline, MessageStore,
    TenantRegistry, TenantStaffResolver,
};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence backend.
    pub store: Arc<dyn ChatStore>,

    /// Service configuration.
    pub config: Config,

    pub tenants: TenantRegistry,

    pub identities: IdentityStore,

    /// Message persistence with content sanitation.
    pub messages: MessageStore,

    /// Append-then-deliver path for new messages.
    pub pipeline: Arc<MessagePipeline>,

    /// Fan-out to live sessions.
    pub router: Arc<DeliveryRouter>,

    /// Handle to the presence actor.
    pub presence: PresenceHandle,

    /// Access token issuer and validator.
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    /// Wire the services on top of a store and a running presence actor.
    pub fn new(store: Arc<dyn ChatStore>, config: Config, presence: PresenceHandle) -> Self {
        let validator = Arc::new(MediaValidator::new(
            config.content.blocked_placeholders.iter().cloned(),
        ));
        let messages = MessageStore::new(store.clone(), validator);
        let router = Arc::new(DeliveryRouter::new(
            presence.clone(),
            Arc::new(TenantStaffResolver),
            config.session_buffer,
        ));
        let pipeline = Arc::new(MessagePipeline::new(messages.clone(), router.clone()));
        let tokens = Arc::new(TokenIssuer::new(
            config.signing_key(),
            config.token_ttl_seconds,
        ));

        Self {
            tenants: TenantRegistry::new(store.clone()),
            identities: IdentityStore::new(store.clone()),
            store,
            config,
            messages,
            pipeline,
            router,
            presence,
            tokens,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public
/// - `/ready` - Readiness probe (checks the store) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/v1/auth/login` - Exchange credentials for an access token - public
/// - `/v1/conversations/:conversation_ref/messages` - Send and pull backlog
/// - `/v1/events` - Live session (Server-Sent Events)
/// - `/v1/admin/identities` - Provision and delete identities (administrators)
/// - `/v1/presence/:identity_id` - Presence lookup
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        tokens: state.tokens.clone(),
    });
    let max_upload_bytes = state.config.max_upload_bytes;
    let cors = cors_layer(&state.config.cors_allowed_origins);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/v1/auth/login", post(handlers::login))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route(
            "/v1/conversations/:conversation_ref/messages",
            post(handlers::send_message).get(handlers::list_messages),
        )
        .route("/v1/events", get(handlers::events))
        .route("/v1/admin/identities", post(handlers::provision_identity))
        .route(
            "/v1/admin/identities/:identity_id",
            delete(handlers::delete_identity),
        )
        .route("/v1/presence/:identity_id", get(handlers::get_presence))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    let app = public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    let app = match cors {
        Some(cors) => app.layer(cors),
        None => app,
    };

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    // The timeout does not cover streaming bodies, so live sessions stay open.
    app.layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// CORS for browser clients. `None` when no origin is configured.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "chatdesk.routes", origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
