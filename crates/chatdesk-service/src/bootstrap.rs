//! Default tenant and administrator.
//!
//! Runs at every server start and from `chatdesk-maintenance seed`. Each step
//! looks at what is stored, creates only what is missing and logs which of
//! the two happened, so repeated runs converge on the same state.

use crate::auth::password;
use crate::config::SeedConfig;
use crate::errors::ChatError;
use crate::models::{Identity, IdentityAttributes, IdentityKind, Membership, Role, Tenant};
use crate::repositories::ChatStore;
use crate::services::{IdentityStore, TenantRegistry};
use common::secret::SecretString;
use common::types::TenantId;
use std::sync::Arc;
use tracing::{info, instrument};

/// What the seed found or created.
pub struct SeedOutcome {
    pub tenant: Tenant,
    pub admin: Identity,
    pub membership: Membership,
    /// Set only when this run created the administrator with a generated
    /// credential. The caller shows it once; it is never logged.
    pub generated_password: Option<SecretString>,
}

/// Ensure the seed tenant, its administrator and the administrator's
/// membership exist.
#[instrument(skip_all, name = "chatdesk.bootstrap.ensure_defaults")]
pub async fn ensure_defaults(
    store: Arc<dyn ChatStore>,
    seed: &SeedConfig,
) -> Result<SeedOutcome, ChatError> {
    let tenants = TenantRegistry::new(store.clone());
    let identities = IdentityStore::new(store);

    let tenant = ensure_tenant(&tenants, &seed.tenant_name).await?;

    let (admin, generated_password) = match identities
        .find_by_username(tenant.id, &seed.admin_username)
        .await?
    {
        Some(existing) => {
            info!(
                target: "chatdesk.bootstrap",
                tenant_id = %tenant.id,
                identity_id = %existing.identity_id,
                "Administrator found"
            );
            (existing, None)
        }
        None => create_admin(&identities, tenant.id, seed).await?,
    };

    let membership = identities
        .ensure_membership(tenant.id, admin.identity_id)
        .await?;

    Ok(SeedOutcome {
        tenant,
        admin,
        membership,
        generated_password,
    })
}

async fn ensure_tenant(tenants: &TenantRegistry, name: &str) -> Result<Tenant, ChatError> {
    if let Some(tenant) = tenants.find_by_name(name).await? {
        info!(target: "chatdesk.bootstrap", tenant_id = %tenant.id, "Tenant found");
        return Ok(tenant);
    }

    match tenants
        .create_tenant(name, serde_json::Value::Object(serde_json::Map::new()))
        .await
    {
        Ok(tenant) => {
            info!(target: "chatdesk.bootstrap", tenant_id = %tenant.id, "Tenant created");
            Ok(tenant)
        }
        Err(ChatError::Conflict(_)) => {
            // Another process created it between the lookup and the insert.
            let tenant = tenants.find_by_name(name).await?.ok_or_else(|| {
                ChatError::Internal(format!("tenant '{name}' vanished after conflict"))
            })?;
            info!(target: "chatdesk.bootstrap", tenant_id = %tenant.id, "Tenant found");
            Ok(tenant)
        }
        Err(e) => Err(e),
    }
}

async fn create_admin(
    identities: &IdentityStore,
    tenant_id: TenantId,
    seed: &SeedConfig,
) -> Result<(Identity, Option<SecretString>), ChatError> {
    let (credential, generated) = match &seed.admin_password {
        Some(configured) => (configured.clone(), false),
        None => (password::generate_credential()?, true),
    };
    let credential_hash = password::hash_credential(credential.clone(), seed.bcrypt_cost).await?;

    let attrs = IdentityAttributes {
        display_name: "Administrator".to_string(),
        role: Role::Administrator,
        kind: IdentityKind::SystemUser,
        credential_hash: Some(credential_hash.clone()),
    };
    let admin = identities
        .find_or_create_identity(tenant_id, &seed.admin_username, &attrs)
        .await?;

    // A concurrent seed may have won the insert; its credential is not ours.
    let created = admin.credential_hash.as_deref() == Some(credential_hash.as_str());
    if created {
        info!(
            target: "chatdesk.bootstrap",
            tenant_id = %tenant_id,
            identity_id = %admin.identity_id,
            "Administrator created"
        );
    } else {
        info!(
            target: "chatdesk.bootstrap",
            tenant_id = %tenant_id,
            identity_id = %admin.identity_id,
            "Administrator found"
        );
    }

    let generated_password = (created && generated).then_some(credential);
    Ok((admin, generated_password))
}
