//! Authentication for Chatdesk.
//!
//! Identities with a stored credential hash log in with their tenant id,
//! username and password and receive an HS256 bearer token. Every
//! authenticated route takes its tenant from the token, never from the
//! request.

pub mod claims;
pub mod password;
pub mod token;

pub use claims::Claims;
pub use token::TokenIssuer;

use crate::errors::ChatError;
use crate::models::{Identity, IdentityKind};
use crate::services::IdentityStore;
use common::secret::SecretString;
use common::types::TenantId;
use tracing::{info, instrument, warn};

/// Check a login attempt. Unknown usernames, contacts and wrong passwords
/// all fail with the same `InvalidCredentials`.
#[instrument(skip_all, name = "chatdesk.auth.authenticate", fields(tenant_id = %tenant_id))]
pub async fn authenticate(
    identities: &IdentityStore,
    tenant_id: TenantId,
    username: &str,
    password: SecretString,
) -> Result<Identity, ChatError> {
    let identity = identities.find_by_username(tenant_id, username).await?;
    let hash = identity
        .as_ref()
        .filter(|i| i.kind == IdentityKind::SystemUser)
        .and_then(|i| i.credential_hash.clone());

    let valid = password::verify_credential(password, hash).await?;

    match identity {
        Some(identity) if valid => {
            info!(
                target: "chatdesk.auth",
                identity_id = %identity.identity_id,
                "Login succeeded"
            );
            Ok(identity)
        }
        _ => {
            warn!(target: "chatdesk.auth", "Login failed");
            Err(ChatError::InvalidCredentials)
        }
    }
}
