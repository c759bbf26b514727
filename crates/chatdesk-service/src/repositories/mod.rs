//! Repository layer.
//!
//! Services talk to storage through these traits so the reconciliation and
//! repair logic can run against [`InMemoryChatStore`] in tests and against
//! [`PgChatStore`] in production. Both implementations enforce the same
//! uniqueness rules and report violations as `ChatError::Conflict`:
//!
//! - tenant name
//! - (tenant, username) and (tenant, identity id)
//! - one membership per identity

mod memory;
mod postgres;

pub use memory::InMemoryChatStore;
pub use postgres::PgChatStore;

use crate::errors::ChatError;
use crate::models::{Identity, IdentityAttributes, Membership, Message, NewMessage, Tenant};
use async_trait::async_trait;
use common::types::{IdentityId, IdentityKey, MessageId, TenantId};

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Insert a tenant. `Conflict` if the name is taken.
    async fn insert_tenant(
        &self,
        name: &str,
        settings: &serde_json::Value,
    ) -> Result<Tenant, ChatError>;

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, ChatError>;

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, ChatError>;

    /// `NotFound` if the tenant is absent, `Conflict` if the name is taken.
    async fn rename_tenant(&self, id: TenantId, name: &str) -> Result<Tenant, ChatError>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn get_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Identity>, ChatError>;

    async fn find_identity_by_username(
        &self,
        tenant_id: TenantId,
        username: &str,
    ) -> Result<Option<Identity>, ChatError>;

    /// Insert with the next unused identity id for the tenant.
    ///
    /// `Conflict` when the username is taken or a concurrent insert claimed
    /// the same id; `NotFound` when the tenant does not exist.
    async fn insert_identity(
        &self,
        tenant_id: TenantId,
        username: Option<&str>,
        attrs: &IdentityAttributes,
    ) -> Result<Identity, ChatError>;

    /// Delete the identity and its membership. Returns false if absent.
    async fn delete_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<bool, ChatError>;

    async fn set_identity_online(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        online: bool,
    ) -> Result<(), ChatError>;

    /// Identities without a username, ordered by key, strictly after `after`.
    async fn list_identities_without_username(
        &self,
        after: Option<IdentityKey>,
        limit: u32,
    ) -> Result<Vec<Identity>, ChatError>;

    async fn count_identities_without_username(&self) -> Result<u64, ChatError>;

    /// Set the username only if it is still unset. Returns false if the
    /// identity already has one. `Conflict` if the username is taken.
    async fn assign_username(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        username: &str,
    ) -> Result<bool, ChatError>;

    /// Membership row for the identity addressed by (`tenant_id`, `identity_id`).
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Membership>, ChatError>;

    /// `Conflict` if the identity already has a membership.
    async fn insert_membership(
        &self,
        identity: IdentityKey,
        tenant_id: TenantId,
        is_primary: bool,
    ) -> Result<Membership, ChatError>;

    async fn mark_membership_primary(&self, identity: IdentityKey)
        -> Result<Membership, ChatError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist with the next sequence number of the conversation.
    /// `NotFound` if the tenant is unknown.
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, ChatError>;

    async fn list_messages_after(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        after_seq: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError>;

    /// Messages with a media type, ordered by id, strictly after `after`.
    async fn scan_media_messages(
        &self,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError>;

    /// Replace content only if it still equals `expected`.
    async fn replace_content(
        &self,
        id: MessageId,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, ChatError>;
}

/// Everything the service needs from storage.
#[async_trait]
pub trait ChatStore: TenantRepository + IdentityRepository + MessageRepository {
    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), ChatError>;
}
