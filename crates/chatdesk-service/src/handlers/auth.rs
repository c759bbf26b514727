//! Login handler.

use crate::auth;
use crate::errors::ChatError;
use crate::models::{IdentitySummary, LoginRequest, LoginResponse};
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /v1/auth/login
///
/// Exchanges tenant id, username and password for a bearer token.
#[instrument(skip_all, name = "chatdesk.handlers.login")]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ChatError> {
    if request.username.trim().is_empty() {
        return Err(ChatError::Validation("username is required".to_string()));
    }

    let identity = auth::authenticate(
        &state.identities,
        request.tenant_id,
        &request.username,
        request.password,
    )
    .await?;

    let access_token = state.tokens.issue(&identity)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.ttl_seconds(),
        identity: IdentitySummary::from(&identity),
    }))
}
