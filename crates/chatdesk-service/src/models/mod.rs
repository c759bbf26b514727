//! Chatdesk models.
//!
//! Domain records shared by the repositories and services, followed by the
//! HTTP request/response shapes.

use chrono::{DateTime, Utc};
use common::types::{IdentityId, IdentityKey, MessageId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity role within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Agent,
    Contact,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Agent => "agent",
            Role::Contact => "contact",
        }
    }

    /// Administrators and agents operate the inbox; contacts do not.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Administrator | Role::Agent)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrator" => Ok(Role::Administrator),
            "agent" => Ok(Role::Agent),
            "contact" => Ok(Role::Contact),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Whether an identity logs in to the system or is an external chat party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    SystemUser,
    ExternalContact,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::SystemUser => "system_user",
            IdentityKind::ExternalContact => "external_contact",
        }
    }
}

impl FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system_user" => Ok(IdentityKind::SystemUser),
            "external_contact" => Ok(IdentityKind::ExternalContact),
            other => Err(format!("unknown identity kind '{other}'")),
        }
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Contact,
    Agent,
    System,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::Contact => "contact",
            SenderKind::Agent => "agent",
            SenderKind::System => "system",
        }
    }
}

impl FromStr for SenderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(SenderKind::Contact),
            "agent" => Ok(SenderKind::Agent),
            "system" => Ok(SenderKind::System),
            other => Err(format!("unknown sender kind '{other}'")),
        }
    }
}

/// Media tag carried by a message.
///
/// Stored as its lowercase tag. Legacy rows may carry tags this enum does not
/// know; those are kept as raw strings on [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
            MediaType::Sticker => "sticker",
            MediaType::Location => "location",
            MediaType::Contact => "contact",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    /// Case-insensitive; accepts the aliases upstream clients send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" | "photo" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            "audio" | "voice" | "ptt" => Ok(MediaType::Audio),
            "document" | "file" => Ok(MediaType::Document),
            "sticker" => Ok(MediaType::Sticker),
            "location" => Ok(MediaType::Location),
            "contact" | "vcard" => Ok(MediaType::Contact),
            _ => Err(format!("unknown media type '{s}'")),
        }
    }
}

/// Tenant (company) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Opaque to the core (storage paths, access codes).
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for a new identity.
#[derive(Clone)]
pub struct IdentityAttributes {
    pub display_name: String,
    pub role: Role,
    pub kind: IdentityKind,
    /// bcrypt hash; `None` for identities that never log in.
    pub credential_hash: Option<String>,
}

impl fmt::Debug for IdentityAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAttributes")
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field(
                "credential_hash",
                &self.credential_hash.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Identity record. `identity_id` is only unique within `tenant_id`.
#[derive(Clone, PartialEq, Serialize)]
pub struct Identity {
    pub tenant_id: TenantId,
    pub identity_id: IdentityId,
    pub username: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub kind: IdentityKind,
    #[serde(skip_serializing)]
    pub credential_hash: Option<String>,
    /// Derived from presence; written by the presence sync task.
    pub online: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.tenant_id, self.identity_id)
    }
}

/// Custom Debug implementation that redacts the credential hash.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("tenant_id", &self.tenant_id)
            .field("identity_id", &self.identity_id)
            .field("username", &self.username)
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("credential_hash", &"[REDACTED]")
            .field("online", &self.online)
            .finish()
    }
}

/// Link between an identity and the tenant it belongs to.
///
/// At most one row exists per identity (`identity_tenant_id`, `identity_id`).
/// A healthy row has `tenant_id == identity_tenant_id` and `is_primary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub identity_tenant_id: TenantId,
    pub identity_id: IdentityId,
    pub tenant_id: TenantId,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// Message ready to be persisted. `content` has already been sanitized by
/// the write path; legacy writers may insert unsanitized content directly.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: TenantId,
    pub conversation_ref: String,
    pub sender_kind: SenderKind,
    pub media_type: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub conversation_ref: String,
    /// Strictly increasing within (`tenant_id`, `conversation_ref`).
    pub seq: i64,
    pub sender_kind: SenderKind,
    pub media_type: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// HTTP API Models
// ============================================================================

/// Maximum accepted conversation reference length.
pub const MAX_CONVERSATION_REF_LENGTH: usize = 200;

/// Default and maximum page size for backlog pulls.
pub const DEFAULT_BACKLOG_LIMIT: u32 = 100;
pub const MAX_BACKLOG_LIMIT: u32 = 500;

/// Readiness probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: String,

    /// Storage connectivity ("healthy" or "unhealthy").
    pub database: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub tenant_id: TenantId,
    pub username: String,
    pub password: common::secret::SecretString,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub identity: IdentitySummary,
}

/// Public view of an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub tenant_id: TenantId,
    pub identity_id: IdentityId,
    pub username: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub kind: IdentityKind,
}

impl From<&Identity> for IdentitySummary {
    fn from(identity: &Identity) -> Self {
        Self {
            tenant_id: identity.tenant_id,
            identity_id: identity.identity_id,
            username: identity.username.clone(),
            display_name: identity.display_name.clone(),
            role: identity.role,
            kind: identity.kind,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Media tag; unknown tags are rejected.
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: Message,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
pub struct BacklogQuery {
    #[serde(default)]
    pub after_seq: i64,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BacklogResponse {
    pub messages: Vec<Message>,
}

/// Administrative provisioning request. Without a username the identity is
/// created as an external contact and picked up later by username backfill.
#[derive(Debug, Deserialize)]
pub struct ProvisionIdentityRequest {
    #[serde(default)]
    pub username: Option<String>,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub password: Option<common::secret::SecretString>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProvisionIdentityResponse {
    pub identity: IdentitySummary,
    pub membership_tenant_id: TenantId,
    pub membership_primary: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub identity_id: IdentityId,
    pub state: crate::actors::PresenceState,
    pub online: bool,
    pub connections: usize,
}
