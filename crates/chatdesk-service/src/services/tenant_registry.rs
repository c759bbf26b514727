//! Tenant (company) records.

use crate::errors::ChatError;
use crate::models::Tenant;
use crate::repositories::ChatStore;
use common::types::TenantId;
use std::sync::Arc;
use tracing::{info, instrument};

/// Maximum tenant name length.
pub const MAX_TENANT_NAME_LENGTH: usize = 120;

#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn ChatStore>,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Create a tenant. Fails with `Conflict` if the name is taken; callers
    /// that want idempotence should look the name up first.
    #[instrument(skip_all, name = "chatdesk.tenants.create")]
    pub async fn create_tenant(
        &self,
        name: &str,
        settings: serde_json::Value,
    ) -> Result<Tenant, ChatError> {
        let name = validate_name(name)?;
        let tenant = self.store.insert_tenant(name, &settings).await?;
        info!(target: "chatdesk.tenants", tenant_id = %tenant.id, "Tenant created");
        Ok(tenant)
    }

    /// Administrative rename, the only mutation a tenant allows.
    #[instrument(skip_all, name = "chatdesk.tenants.rename")]
    pub async fn rename_tenant(&self, id: TenantId, name: &str) -> Result<Tenant, ChatError> {
        let name = validate_name(name)?;
        let tenant = self.store.rename_tenant(id, name).await?;
        info!(target: "chatdesk.tenants", tenant_id = %id, "Tenant renamed");
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: TenantId) -> Result<Tenant, ChatError> {
        self.store
            .get_tenant(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("tenant {id}")))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>, ChatError> {
        self.store.find_tenant_by_name(name.trim()).await
    }
}

fn validate_name(name: &str) -> Result<&str, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("tenant name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_TENANT_NAME_LENGTH {
        return Err(ChatError::Validation(format!(
            "tenant name must be at most {MAX_TENANT_NAME_LENGTH} characters"
        )));
    }
    Ok(name)
}
