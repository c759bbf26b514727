//! Presence lookup.

use crate::auth::Claims;
use crate::errors::ChatError;
use crate::models::PresenceResponse;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::types::IdentityId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/presence/:identity_id
///
/// Presence of an identity in the caller's tenant. `NotFound` if the
/// identity does not exist there.
#[instrument(skip_all, name = "chatdesk.handlers.presence")]
pub async fn get_presence(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(identity_id): Path<i64>,
) -> Result<Json<PresenceResponse>, ChatError> {
    let identity = state
        .identities
        .get_identity(claims.tenant_id, IdentityId(identity_id))
        .await?;
    let status = state
        .presence
        .status(identity.tenant_id, identity.identity_id)
        .await?;

    Ok(Json(PresenceResponse {
        identity_id: identity.identity_id,
        state: status.state,
        online: status.state.is_online(),
        connections: status.connections,
    }))
}
