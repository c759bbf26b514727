//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, validates it and
//! injects the claims into request extensions.

use crate::auth::TokenIssuer;
use crate::errors::ChatError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenIssuer>,
}

/// Validate `Authorization: Bearer <token>`.
///
/// Missing or invalid tokens get 401 with a WWW-Authenticate header.
#[instrument(skip_all, name = "chatdesk.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ChatError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "chatdesk.middleware.auth", "Missing Authorization header");
            ChatError::InvalidToken("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "chatdesk.middleware.auth", "Invalid Authorization header format");
        ChatError::InvalidToken("Invalid Authorization header format".to_string())
    })?;

    let claims = state.tokens.validate(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::models::{Identity, IdentityKind, Role};
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use chrono::Utc;
    use common::types::{IdentityId, TenantId};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"an-hs256-signing-secret-of-32-bytes!";

    async fn whoami(Extension(claims): Extension<Claims>) -> String {
        format!("{}/{}", claims.tenant_id, claims.sub)
    }

    fn app() -> (Router, Arc<TokenIssuer>) {
        let tokens = Arc::new(TokenIssuer::new(SECRET, 3600));
        let state = Arc::new(AuthState {
            tokens: tokens.clone(),
        });
        let router = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, require_auth));
        (router, tokens)
    }

    fn agent() -> Identity {
        let now = Utc::now();
        Identity {
            tenant_id: TenantId(3),
            identity_id: IdentityId(8),
            username: Some("ana".to_string()),
            display_name: "Ana".to_string(),
            role: Role::Agent,
            kind: IdentityKind::SystemUser,
            credential_hash: None,
            online: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let (app, tokens) = app();
        let token = tokens.issue(&agent()).unwrap();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let (app, _) = app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let (app, _) = app();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .header("authorization", "Basic YWRtaW46YWRtaW4=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
