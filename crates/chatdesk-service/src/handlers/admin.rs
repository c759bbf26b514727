//! Administrative identity provisioning.
//!
//! Restricted to administrators and always scoped to the caller's tenant.

use crate::auth::{password, Claims};
use crate::errors::ChatError;
use crate::models::{
    IdentityAttributes, IdentityKind, IdentitySummary, ProvisionIdentityRequest,
    ProvisionIdentityResponse,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::IdentityId;
use std::sync::Arc;
use tracing::instrument;

/// Maximum display name length.
const MAX_DISPLAY_NAME_LENGTH: usize = 120;

/// Handler for POST /v1/admin/identities
///
/// Idempotent: an existing username is returned unchanged, and its
/// membership is reconciled. Without a username the identity is registered
/// as an external contact.
#[instrument(skip_all, name = "chatdesk.handlers.provision_identity")]
pub async fn provision_identity(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<ProvisionIdentityRequest>,
) -> Result<Json<ProvisionIdentityResponse>, ChatError> {
    claims.require_administrator()?;

    let display_name = request.display_name.trim();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ChatError::Validation(format!(
            "display_name must be 1 to {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }

    let credential_hash = match request.password {
        Some(password) => {
            Some(password::hash_credential(password, state.config.seed.bcrypt_cost).await?)
        }
        None => None,
    };

    let username = request
        .username
        .as_deref()
        .map(str::trim)
        .filter(|username| !username.is_empty());

    let attrs = IdentityAttributes {
        display_name: display_name.to_string(),
        role: request.role,
        kind: if username.is_some() && request.role.is_staff() {
            IdentityKind::SystemUser
        } else {
            IdentityKind::ExternalContact
        },
        credential_hash,
    };

    let identity = match username {
        Some(username) => {
            state
                .identities
                .find_or_create_identity(claims.tenant_id, username, &attrs)
                .await?
        }
        None => state.identities.register_contact(claims.tenant_id, &attrs).await?,
    };
    let membership = state
        .identities
        .ensure_membership(claims.tenant_id, identity.identity_id)
        .await?;

    Ok(Json(ProvisionIdentityResponse {
        identity: IdentitySummary::from(&identity),
        membership_tenant_id: membership.tenant_id,
        membership_primary: membership.is_primary,
    }))
}

/// Handler for DELETE /v1/admin/identities/:identity_id
#[instrument(skip_all, name = "chatdesk.handlers.delete_identity")]
pub async fn delete_identity(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(identity_id): Path<i64>,
) -> Result<StatusCode, ChatError> {
    claims.require_administrator()?;

    let identity_id = IdentityId(identity_id);
    if claims.identity_id()? == identity_id {
        return Err(ChatError::Forbidden(
            "administrators cannot delete their own identity".to_string(),
        ));
    }

    state
        .identities
        .delete_identity(claims.tenant_id, identity_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
