//! In-memory `ChatStore`.
//!
//! Enforces the same uniqueness rules as the Postgres schema so provisioning
//! and repair logic behaves identically against it. Used by unit and
//! integration tests, and by the test server harness.

use super::{ChatStore, IdentityRepository, MessageRepository, TenantRepository};
use crate::errors::ChatError;
use crate::models::{Identity, IdentityAttributes, Membership, Message, NewMessage, Tenant};
use async_trait::async_trait;
use chrono::Utc;
use common::types::{IdentityId, IdentityKey, MessageId, TenantId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    tenants: BTreeMap<TenantId, Tenant>,
    identities: BTreeMap<IdentityKey, Identity>,
    memberships: HashMap<IdentityKey, Membership>,
    messages: BTreeMap<MessageId, Message>,
    sequences: HashMap<(TenantId, String), i64>,
    /// Last identity id handed out per tenant. Never decreases, so ids of
    /// deleted identities are not reused.
    identity_counters: HashMap<TenantId, i64>,
    next_tenant_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn require_tenant(&self, tenant_id: TenantId) -> Result<(), ChatError> {
        if self.tenants.contains_key(&tenant_id) {
            Ok(())
        } else {
            Err(ChatError::NotFound(format!("tenant {tenant_id}")))
        }
    }

    fn username_taken(&self, tenant_id: TenantId, username: &str) -> bool {
        self.identities
            .values()
            .any(|i| i.tenant_id == tenant_id && i.username.as_deref() == Some(username))
    }
}

/// Mutex-guarded tables. Every operation holds the lock for its whole
/// duration, which makes each call atomic.
#[derive(Default)]
pub struct InMemoryChatStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    failing_updates: Mutex<HashSet<MessageId>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate lost connectivity: every call fails with `Database`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make content updates for one message fail with `Database`.
    pub fn fail_updates_for(&self, id: MessageId) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.insert(id);
        }
    }

    /// Number of membership rows, for assertions.
    pub fn membership_count(&self) -> usize {
        self.tables.lock().map(|t| t.memberships.len()).unwrap_or(0)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, ChatError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::Database("store unavailable".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| ChatError::Internal("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TenantRepository for InMemoryChatStore {
    async fn insert_tenant(
        &self,
        name: &str,
        settings: &serde_json::Value,
    ) -> Result<Tenant, ChatError> {
        let mut tables = self.tables()?;
        if tables.tenants.values().any(|t| t.name == name) {
            return Err(ChatError::Conflict(
                "unique constraint tenants_name_unique violated".to_string(),
            ));
        }

        tables.next_tenant_id += 1;
        let now = Utc::now();
        let tenant = Tenant {
            id: TenantId(tables.next_tenant_id),
            name: name.to_string(),
            settings: settings.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, ChatError> {
        Ok(self.tables()?.tenants.get(&id).cloned())
    }

    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, ChatError> {
        Ok(self
            .tables()?
            .tenants
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn rename_tenant(&self, id: TenantId, name: &str) -> Result<Tenant, ChatError> {
        let mut tables = self.tables()?;
        if tables.tenants.values().any(|t| t.name == name && t.id != id) {
            return Err(ChatError::Conflict(
                "unique constraint tenants_name_unique violated".to_string(),
            ));
        }
        let tenant = tables
            .tenants
            .get_mut(&id)
            .ok_or_else(|| ChatError::NotFound(format!("tenant {id}")))?;
        tenant.name = name.to_string();
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }
}

#[async_trait]
impl IdentityRepository for InMemoryChatStore {
    async fn get_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Identity>, ChatError> {
        Ok(self
            .tables()?
            .identities
            .get(&IdentityKey::new(tenant_id, identity_id))
            .cloned())
    }

    async fn find_identity_by_username(
        &self,
        tenant_id: TenantId,
        username: &str,
    ) -> Result<Option<Identity>, ChatError> {
        Ok(self
            .tables()?
            .identities
            .values()
            .find(|i| i.tenant_id == tenant_id && i.username.as_deref() == Some(username))
            .cloned())
    }

    async fn insert_identity(
        &self,
        tenant_id: TenantId,
        username: Option<&str>,
        attrs: &IdentityAttributes,
    ) -> Result<Identity, ChatError> {
        let mut tables = self.tables()?;
        tables.require_tenant(tenant_id)?;

        if let Some(username) = username {
            if tables.username_taken(tenant_id, username) {
                return Err(ChatError::Conflict(
                    "unique constraint identities_tenant_username_unique violated".to_string(),
                ));
            }
        }

        let counter = tables.identity_counters.entry(tenant_id).or_insert(0);
        *counter += 1;
        let next_id = *counter;

        let now = Utc::now();
        let identity = Identity {
            tenant_id,
            identity_id: IdentityId(next_id),
            username: username.map(ToString::to_string),
            display_name: attrs.display_name.clone(),
            role: attrs.role,
            kind: attrs.kind,
            credential_hash: attrs.credential_hash.clone(),
            online: false,
            created_at: now,
            updated_at: now,
        };
        tables.identities.insert(identity.key(), identity.clone());
        Ok(identity)
    }

    async fn delete_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<bool, ChatError> {
        let mut tables = self.tables()?;
        let key = IdentityKey::new(tenant_id, identity_id);
        let removed = tables.identities.remove(&key).is_some();
        if removed {
            tables.memberships.remove(&key);
        }
        Ok(removed)
    }

    async fn set_identity_online(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        online: bool,
    ) -> Result<(), ChatError> {
        let mut tables = self.tables()?;
        if let Some(identity) = tables
            .identities
            .get_mut(&IdentityKey::new(tenant_id, identity_id))
        {
            identity.online = online;
            identity.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_identities_without_username(
        &self,
        after: Option<IdentityKey>,
        limit: u32,
    ) -> Result<Vec<Identity>, ChatError> {
        let tables = self.tables()?;
        Ok(tables
            .identities
            .values()
            .filter(|i| i.username.is_none())
            .filter(|i| after.map_or(true, |after| i.key() > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_identities_without_username(&self) -> Result<u64, ChatError> {
        let tables = self.tables()?;
        Ok(tables
            .identities
            .values()
            .filter(|i| i.username.is_none())
            .count() as u64)
    }

    async fn assign_username(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        username: &str,
    ) -> Result<bool, ChatError> {
        let mut tables = self.tables()?;
        let key = IdentityKey::new(tenant_id, identity_id);

        match tables.identities.get(&key) {
            None => return Ok(false),
            Some(identity) if identity.username.is_some() => return Ok(false),
            Some(_) => {}
        }
        if tables.username_taken(tenant_id, username) {
            return Err(ChatError::Conflict(
                "unique constraint identities_tenant_username_unique violated".to_string(),
            ));
        }

        if let Some(identity) = tables.identities.get_mut(&key) {
            identity.username = Some(username.to_string());
            identity.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn find_membership(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Membership>, ChatError> {
        Ok(self
            .tables()?
            .memberships
            .get(&IdentityKey::new(tenant_id, identity_id))
            .cloned())
    }

    async fn insert_membership(
        &self,
        identity: IdentityKey,
        tenant_id: TenantId,
        is_primary: bool,
    ) -> Result<Membership, ChatError> {
        let mut tables = self.tables()?;
        tables.require_tenant(tenant_id)?;
        if !tables.identities.contains_key(&identity) {
            return Err(ChatError::NotFound(format!("identity {identity}")));
        }
        if tables.memberships.contains_key(&identity) {
            return Err(ChatError::Conflict(
                "unique constraint memberships_identity_unique violated".to_string(),
            ));
        }

        let membership = Membership {
            identity_tenant_id: identity.tenant_id,
            identity_id: identity.identity_id,
            tenant_id,
            is_primary,
            created_at: Utc::now(),
        };
        tables.memberships.insert(identity, membership.clone());
        Ok(membership)
    }

    async fn mark_membership_primary(
        &self,
        identity: IdentityKey,
    ) -> Result<Membership, ChatError> {
        let mut tables = self.tables()?;
        let membership = tables
            .memberships
            .get_mut(&identity)
            .ok_or_else(|| ChatError::NotFound(format!("membership for {identity}")))?;
        membership.is_primary = true;
        Ok(membership.clone())
    }
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, ChatError> {
        let mut tables = self.tables()?;
        tables.require_tenant(message.tenant_id)?;

        let seq = {
            let counter = tables
                .sequences
                .entry((message.tenant_id, message.conversation_ref.clone()))
                .or_insert(0);
            *counter += 1;
            *counter
        };
        tables.next_message_id += 1;

        let stored = Message {
            id: MessageId(tables.next_message_id),
            tenant_id: message.tenant_id,
            conversation_ref: message.conversation_ref.clone(),
            seq,
            sender_kind: message.sender_kind,
            media_type: message.media_type.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
        };
        tables.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_messages_after(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        after_seq: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        let tables = self.tables()?;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| {
                m.tenant_id == tenant_id
                    && m.conversation_ref == conversation_ref
                    && m.seq > after_seq
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.seq);
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn scan_media_messages(
        &self,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        let tables = self.tables()?;
        Ok(tables
            .messages
            .values()
            .filter(|m| m.media_type.is_some())
            .filter(|m| after.map_or(true, |after| m.id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn replace_content(
        &self,
        id: MessageId,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, ChatError> {
        let failing = self
            .failing_updates
            .lock()
            .map(|failing| failing.contains(&id))
            .unwrap_or(false);
        if failing {
            return Err(ChatError::Database(format!("update of message {id} failed")));
        }

        let mut tables = self.tables()?;
        match tables.messages.get_mut(&id) {
            Some(message) if message.content == expected => {
                message.content = replacement.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn ping(&self) -> Result<(), ChatError> {
        self.tables().map(|_| ())
    }
}
