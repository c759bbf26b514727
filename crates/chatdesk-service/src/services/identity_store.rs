//! Identity and membership provisioning.
//!
//! Every entry point reconciles on read: load what exists, compare with what
//! the caller wants, write only the missing piece. A uniqueness violation on
//! insert means a concurrent caller won the race, so the row is reloaded and
//! returned instead of surfacing the conflict. Running any of these N times
//! leaves the same state as running it once.

use crate::errors::ChatError;
use crate::models::{Identity, IdentityAttributes, Membership};
use crate::repositories::ChatStore;
use common::types::{IdentityId, IdentityKey, TenantId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Bound on reload-and-retry rounds after losing an insert race.
pub const MAX_PROVISION_ATTEMPTS: u32 = 5;

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 64;

#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn ChatStore>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Return the identity with this username, creating it with the tenant's
    /// next identity id if it does not exist. An existing identity is
    /// returned unchanged, whatever `attrs` say.
    #[instrument(skip_all, name = "chatdesk.identities.find_or_create", fields(tenant_id = %tenant_id))]
    pub async fn find_or_create_identity(
        &self,
        tenant_id: TenantId,
        username: &str,
        attrs: &IdentityAttributes,
    ) -> Result<Identity, ChatError> {
        validate_username(username)?;

        for attempt in 1..=MAX_PROVISION_ATTEMPTS {
            if let Some(existing) = self
                .store
                .find_identity_by_username(tenant_id, username)
                .await?
            {
                debug!(
                    target: "chatdesk.identities",
                    identity_id = %existing.identity_id,
                    "Identity found"
                );
                return Ok(existing);
            }

            match self
                .store
                .insert_identity(tenant_id, Some(username), attrs)
                .await
            {
                Ok(identity) => {
                    info!(
                        target: "chatdesk.identities",
                        identity_id = %identity.identity_id,
                        role = identity.role.as_str(),
                        "Identity created"
                    );
                    return Ok(identity);
                }
                Err(ChatError::Conflict(reason)) => {
                    debug!(
                        target: "chatdesk.identities",
                        attempt,
                        reason = %reason,
                        "Lost identity insert race, reloading"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(ChatError::Internal(format!(
            "identity insert kept conflicting after {MAX_PROVISION_ATTEMPTS} attempts"
        )))
    }

    /// Create an identity without a username (typically an external contact).
    /// Username backfill assigns one later.
    #[instrument(skip_all, name = "chatdesk.identities.register_contact", fields(tenant_id = %tenant_id))]
    pub async fn register_contact(
        &self,
        tenant_id: TenantId,
        attrs: &IdentityAttributes,
    ) -> Result<Identity, ChatError> {
        for attempt in 1..=MAX_PROVISION_ATTEMPTS {
            match self.store.insert_identity(tenant_id, None, attrs).await {
                Ok(identity) => {
                    info!(
                        target: "chatdesk.identities",
                        identity_id = %identity.identity_id,
                        "Contact identity created"
                    );
                    return Ok(identity);
                }
                Err(ChatError::Conflict(_)) => {
                    debug!(target: "chatdesk.identities", attempt, "Identity id collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ChatError::Internal(format!(
            "identity id kept colliding after {MAX_PROVISION_ATTEMPTS} attempts"
        )))
    }

    /// Make sure the identity has exactly one primary membership in its own
    /// tenant.
    ///
    /// - missing row: create it (`primary = true`); a concurrent creator
    ///   winning the race is reloaded, not reported
    /// - row in the right tenant but not primary: flag it primary
    /// - row pointing at another tenant: `Conflict`, left untouched
    #[instrument(
        skip_all,
        name = "chatdesk.identities.ensure_membership",
        fields(tenant_id = %tenant_id, identity_id = %identity_id)
    )]
    pub async fn ensure_membership(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Membership, ChatError> {
        if self
            .store
            .get_identity(tenant_id, identity_id)
            .await?
            .is_none()
        {
            return Err(ChatError::NotFound(format!(
                "identity {identity_id} in tenant {tenant_id}"
            )));
        }

        let key = IdentityKey::new(tenant_id, identity_id);

        for attempt in 1..=MAX_PROVISION_ATTEMPTS {
            match self.store.find_membership(tenant_id, identity_id).await? {
                Some(existing) if existing.tenant_id != tenant_id => {
                    warn!(
                        target: "chatdesk.identities",
                        linked_tenant_id = %existing.tenant_id,
                        "Membership points at another tenant, not overwriting"
                    );
                    return Err(ChatError::Conflict(format!(
                        "identity {identity_id} is linked to tenant {}, not {tenant_id}",
                        existing.tenant_id
                    )));
                }
                Some(existing) if !existing.is_primary => {
                    let repaired = self.store.mark_membership_primary(key).await?;
                    info!(target: "chatdesk.identities", "Membership found without primary flag, fixed");
                    return Ok(repaired);
                }
                Some(existing) => {
                    debug!(target: "chatdesk.identities", "Membership found");
                    return Ok(existing);
                }
                None => match self.store.insert_membership(key, tenant_id, true).await {
                    Ok(created) => {
                        info!(target: "chatdesk.identities", "Membership missing, created");
                        return Ok(created);
                    }
                    Err(ChatError::Conflict(_)) => {
                        debug!(
                            target: "chatdesk.identities",
                            attempt,
                            "Concurrent membership insert won, reloading"
                        );
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        Err(ChatError::Internal(format!(
            "membership reconciliation did not settle after {MAX_PROVISION_ATTEMPTS} attempts"
        )))
    }

    /// `find_or_create_identity` followed by `ensure_membership`.
    pub async fn provision(
        &self,
        tenant_id: TenantId,
        username: &str,
        attrs: &IdentityAttributes,
    ) -> Result<(Identity, Membership), ChatError> {
        let identity = self
            .find_or_create_identity(tenant_id, username, attrs)
            .await?;
        let membership = self
            .ensure_membership(tenant_id, identity.identity_id)
            .await?;
        Ok((identity, membership))
    }

    /// Remove an identity and its membership. `NotFound` if absent.
    #[instrument(skip_all, name = "chatdesk.identities.delete", fields(tenant_id = %tenant_id, identity_id = %identity_id))]
    pub async fn delete_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<(), ChatError> {
        if self.store.delete_identity(tenant_id, identity_id).await? {
            info!(target: "chatdesk.identities", "Identity deleted");
            Ok(())
        } else {
            Err(ChatError::NotFound(format!(
                "identity {identity_id} in tenant {tenant_id}"
            )))
        }
    }

    pub async fn get_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Identity, ChatError> {
        self.store
            .get_identity(tenant_id, identity_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("identity {identity_id} in tenant {tenant_id}")))
    }

    pub async fn find_by_username(
        &self,
        tenant_id: TenantId,
        username: &str,
    ) -> Result<Option<Identity>, ChatError> {
        self.store.find_identity_by_username(tenant_id, username).await
    }
}

fn validate_username(username: &str) -> Result<(), ChatError> {
    if username.trim().is_empty() {
        return Err(ChatError::Validation("username must not be empty".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ChatError::Validation(format!(
            "username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }
    Ok(())
}
