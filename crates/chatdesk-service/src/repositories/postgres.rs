//! Postgres `ChatStore`.
//!
//! Uniqueness is enforced by the schema (see `migrations/`); violations come
//! back through `From<sqlx::Error> for ChatError` as `Conflict`, foreign key
//! violations as `NotFound`.

use super::{ChatStore, IdentityRepository, MessageRepository, TenantRepository};
use crate::errors::ChatError;
use crate::models::{Identity, IdentityAttributes, Membership, Message, NewMessage, Tenant};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::DatabaseConfig;
use common::secret::ExposeSecret;
use common::types::{IdentityId, IdentityKey, MessageId, TenantId};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::instrument;

const IDENTITY_COLUMNS: &str = "tenant_id, identity_id, username, display_name, role, kind, \
     credential_hash, online, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "message_id, tenant_id, conversation_ref, seq, sender_kind, media_type, content, created_at";

/// Record query timing and map the error.
fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, ChatError> {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_db_query(operation, status, start.elapsed());
    result.map_err(ChatError::from)
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    tenant_id: i64,
    name: String,
    settings: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: TenantId(row.tenant_id),
            name: row.name,
            settings: row.settings,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    tenant_id: i64,
    identity_id: i64,
    username: Option<String>,
    display_name: String,
    role: String,
    kind: String,
    credential_hash: Option<String>,
    online: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = ChatError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            tenant_id: TenantId(row.tenant_id),
            identity_id: IdentityId(row.identity_id),
            username: row.username,
            display_name: row.display_name,
            role: row.role.parse().map_err(ChatError::Database)?,
            kind: row.kind.parse().map_err(ChatError::Database)?,
            credential_hash: row.credential_hash,
            online: row.online,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    identity_tenant_id: i64,
    identity_id: i64,
    tenant_id: i64,
    is_primary: bool,
    created_at: DateTime<Utc>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Membership {
            identity_tenant_id: TenantId(row.identity_tenant_id),
            identity_id: IdentityId(row.identity_id),
            tenant_id: TenantId(row.tenant_id),
            is_primary: row.is_primary,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: i64,
    tenant_id: i64,
    conversation_ref: String,
    seq: i64,
    sender_kind: String,
    media_type: Option<String>,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = ChatError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId(row.message_id),
            tenant_id: TenantId(row.tenant_id),
            conversation_ref: row.conversation_ref,
            seq: row.seq,
            sender_kind: row.sender_kind.parse().map_err(ChatError::Database)?,
            media_type: row.media_type,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

fn identities(rows: Vec<IdentityRow>) -> Result<Vec<Identity>, ChatError> {
    rows.into_iter().map(Identity::try_from).collect()
}

fn messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, ChatError> {
    rows.into_iter().map(Message::try_from).collect()
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and apply pending migrations.
    pub async fn connect(database: &DatabaseConfig) -> Result<Self, ChatError> {
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database.url.expose_secret())
            .await?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| ChatError::Database(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantRepository for PgChatStore {
    #[instrument(skip_all, name = "chatdesk.repo.insert_tenant")]
    async fn insert_tenant(
        &self,
        name: &str,
        settings: &serde_json::Value,
    ) -> Result<Tenant, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, TenantRow>(
            r#"
            INSERT INTO tenants (name, settings)
            VALUES ($1, $2)
            RETURNING tenant_id, name, settings, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(settings)
        .fetch_one(&self.pool)
        .await;

        observe("insert_tenant", start, result).map(Tenant::from)
    }

    #[instrument(skip_all, name = "chatdesk.repo.get_tenant")]
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT tenant_id, name, settings, created_at, updated_at
            FROM tenants
            WHERE tenant_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await;

        Ok(observe("get_tenant", start, result)?.map(Tenant::from))
    }

    #[instrument(skip_all, name = "chatdesk.repo.find_tenant_by_name")]
    async fn find_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT tenant_id, name, settings, created_at, updated_at
            FROM tenants
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await;

        Ok(observe("find_tenant_by_name", start, result)?.map(Tenant::from))
    }

    #[instrument(skip_all, name = "chatdesk.repo.rename_tenant")]
    async fn rename_tenant(&self, id: TenantId, name: &str) -> Result<Tenant, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, TenantRow>(
            r#"
            UPDATE tenants
            SET name = $2, updated_at = NOW()
            WHERE tenant_id = $1
            RETURNING tenant_id, name, settings, created_at, updated_at
            "#,
        )
        .bind(id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await;

        observe("rename_tenant", start, result)?
            .map(Tenant::from)
            .ok_or_else(|| ChatError::NotFound(format!("tenant {id}")))
    }
}

#[async_trait]
impl IdentityRepository for PgChatStore {
    #[instrument(skip_all, name = "chatdesk.repo.get_identity")]
    async fn get_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Identity>, ChatError> {
        let start = Instant::now();
        let sql =
            format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE tenant_id = $1 AND identity_id = $2");
        let result = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(tenant_id.0)
            .bind(identity_id.0)
            .fetch_optional(&self.pool)
            .await;

        observe("get_identity", start, result)?
            .map(Identity::try_from)
            .transpose()
    }

    #[instrument(skip_all, name = "chatdesk.repo.find_identity_by_username")]
    async fn find_identity_by_username(
        &self,
        tenant_id: TenantId,
        username: &str,
    ) -> Result<Option<Identity>, ChatError> {
        let start = Instant::now();
        let sql =
            format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE tenant_id = $1 AND username = $2");
        let result = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(tenant_id.0)
            .bind(username)
            .fetch_optional(&self.pool)
            .await;

        observe("find_identity_by_username", start, result)?
            .map(Identity::try_from)
            .transpose()
    }

    /// Next id is computed inside the INSERT. Two concurrent inserts can pick
    /// the same id; the loser gets a primary key violation (`Conflict`).
    #[instrument(skip_all, name = "chatdesk.repo.insert_identity")]
    async fn insert_identity(
        &self,
        tenant_id: TenantId,
        username: Option<&str>,
        attrs: &IdentityAttributes,
    ) -> Result<Identity, ChatError> {
        let start = Instant::now();
        // The counter row lock serializes inserts per tenant; a failed insert
        // rolls the bump back with the statement.
        let sql = format!(
            r#"
            WITH next AS (
                UPDATE tenants
                SET last_identity_id = last_identity_id + 1
                WHERE tenant_id = $1
                RETURNING last_identity_id
            )
            INSERT INTO identities
                (tenant_id, identity_id, username, display_name, role, kind, credential_hash)
            SELECT $1, next.last_identity_id, $2, $3, $4, $5, $6
            FROM next
            RETURNING {IDENTITY_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(tenant_id.0)
            .bind(username)
            .bind(&attrs.display_name)
            .bind(attrs.role.as_str())
            .bind(attrs.kind.as_str())
            .bind(attrs.credential_hash.as_deref())
            .fetch_optional(&self.pool)
            .await;

        match observe("insert_identity", start, result)? {
            Some(row) => Identity::try_from(row),
            None => Err(ChatError::NotFound(format!("tenant {tenant_id}"))),
        }
    }

    #[instrument(skip_all, name = "chatdesk.repo.delete_identity")]
    async fn delete_identity(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<bool, ChatError> {
        let start = Instant::now();
        // memberships cascade through memberships_identity_fk
        let result = sqlx::query(
            r#"
            DELETE FROM identities
            WHERE tenant_id = $1 AND identity_id = $2
            "#,
        )
        .bind(tenant_id.0)
        .bind(identity_id.0)
        .execute(&self.pool)
        .await;

        Ok(observe("delete_identity", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "chatdesk.repo.set_identity_online")]
    async fn set_identity_online(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        online: bool,
    ) -> Result<(), ChatError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET online = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND identity_id = $2
            "#,
        )
        .bind(tenant_id.0)
        .bind(identity_id.0)
        .bind(online)
        .execute(&self.pool)
        .await;

        observe("set_identity_online", start, result).map(|_| ())
    }

    #[instrument(skip_all, name = "chatdesk.repo.list_identities_without_username")]
    async fn list_identities_without_username(
        &self,
        after: Option<IdentityKey>,
        limit: u32,
    ) -> Result<Vec<Identity>, ChatError> {
        let start = Instant::now();
        let (after_tenant, after_identity) =
            after.map_or((0, 0), |key| (key.tenant_id.0, key.identity_id.0));
        let sql = format!(
            r#"
            SELECT {IDENTITY_COLUMNS}
            FROM identities
            WHERE username IS NULL AND (tenant_id, identity_id) > ($1, $2)
            ORDER BY tenant_id, identity_id
            LIMIT $3
            "#
        );
        let result = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(after_tenant)
            .bind(after_identity)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await;

        identities(observe("list_identities_without_username", start, result)?)
    }

    #[instrument(skip_all, name = "chatdesk.repo.count_identities_without_username")]
    async fn count_identities_without_username(&self) -> Result<u64, ChatError> {
        let start = Instant::now();
        let result: Result<(i64,), sqlx::Error> =
            sqlx::query_as("SELECT COUNT(*) FROM identities WHERE username IS NULL")
                .fetch_one(&self.pool)
                .await;

        let (count,) = observe("count_identities_without_username", start, result)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip_all, name = "chatdesk.repo.assign_username")]
    async fn assign_username(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        username: &str,
    ) -> Result<bool, ChatError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET username = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND identity_id = $2 AND username IS NULL
            "#,
        )
        .bind(tenant_id.0)
        .bind(identity_id.0)
        .bind(username)
        .execute(&self.pool)
        .await;

        Ok(observe("assign_username", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "chatdesk.repo.find_membership")]
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<Option<Membership>, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT identity_tenant_id, identity_id, tenant_id, is_primary, created_at
            FROM memberships
            WHERE identity_tenant_id = $1 AND identity_id = $2
            "#,
        )
        .bind(tenant_id.0)
        .bind(identity_id.0)
        .fetch_optional(&self.pool)
        .await;

        Ok(observe("find_membership", start, result)?.map(Membership::from))
    }

    #[instrument(skip_all, name = "chatdesk.repo.insert_membership")]
    async fn insert_membership(
        &self,
        identity: IdentityKey,
        tenant_id: TenantId,
        is_primary: bool,
    ) -> Result<Membership, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, MembershipRow>(
            r#"
            INSERT INTO memberships (identity_tenant_id, identity_id, tenant_id, is_primary)
            VALUES ($1, $2, $3, $4)
            RETURNING identity_tenant_id, identity_id, tenant_id, is_primary, created_at
            "#,
        )
        .bind(identity.tenant_id.0)
        .bind(identity.identity_id.0)
        .bind(tenant_id.0)
        .bind(is_primary)
        .fetch_one(&self.pool)
        .await;

        observe("insert_membership", start, result).map(Membership::from)
    }

    #[instrument(skip_all, name = "chatdesk.repo.mark_membership_primary")]
    async fn mark_membership_primary(
        &self,
        identity: IdentityKey,
    ) -> Result<Membership, ChatError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, MembershipRow>(
            r#"
            UPDATE memberships
            SET is_primary = TRUE
            WHERE identity_tenant_id = $1 AND identity_id = $2
            RETURNING identity_tenant_id, identity_id, tenant_id, is_primary, created_at
            "#,
        )
        .bind(identity.tenant_id.0)
        .bind(identity.identity_id.0)
        .fetch_optional(&self.pool)
        .await;

        observe("mark_membership_primary", start, result)?
            .map(Membership::from)
            .ok_or_else(|| ChatError::NotFound(format!("membership for {identity}")))
    }
}

#[async_trait]
impl MessageRepository for PgChatStore {
    /// Bumps the conversation counter and inserts the row in one transaction,
    /// so sequence numbers are gap-free and strictly increasing.
    #[instrument(skip_all, name = "chatdesk.repo.insert_message")]
    async fn insert_message(&self, message: &NewMessage) -> Result<Message, ChatError> {
        let start = Instant::now();
        let result = async {
            let mut tx = self.pool.begin().await?;

            let (seq,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO conversation_sequences (tenant_id, conversation_ref, last_seq)
                VALUES ($1, $2, 1)
                ON CONFLICT (tenant_id, conversation_ref)
                DO UPDATE SET last_seq = conversation_sequences.last_seq + 1
                RETURNING last_seq
                "#,
            )
            .bind(message.tenant_id.0)
            .bind(&message.conversation_ref)
            .fetch_one(&mut *tx)
            .await?;

            let sql = format!(
                r#"
                INSERT INTO messages
                    (tenant_id, conversation_ref, seq, sender_kind, media_type, content, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {MESSAGE_COLUMNS}
                "#
            );
            let row = sqlx::query_as::<_, MessageRow>(&sql)
                .bind(message.tenant_id.0)
                .bind(&message.conversation_ref)
                .bind(seq)
                .bind(message.sender_kind.as_str())
                .bind(message.media_type.as_deref())
                .bind(&message.content)
                .bind(message.created_at)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(row)
        }
        .await;

        Message::try_from(observe("insert_message", start, result)?)
    }

    #[instrument(skip_all, name = "chatdesk.repo.list_messages_after")]
    async fn list_messages_after(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        after_seq: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE tenant_id = $1 AND conversation_ref = $2 AND seq > $3
            ORDER BY seq
            LIMIT $4
            "#
        );
        let result = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(tenant_id.0)
            .bind(conversation_ref)
            .bind(after_seq)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await;

        messages(observe("list_messages_after", start, result)?)
    }

    #[instrument(skip_all, name = "chatdesk.repo.scan_media_messages")]
    async fn scan_media_messages(
        &self,
        after: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE media_type IS NOT NULL AND message_id > $1
            ORDER BY message_id
            LIMIT $2
            "#
        );
        let result = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(after.map_or(0, |id| id.0))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await;

        messages(observe("scan_media_messages", start, result)?)
    }

    #[instrument(skip_all, name = "chatdesk.repo.replace_content")]
    async fn replace_content(
        &self,
        id: MessageId,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, ChatError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $3
            WHERE message_id = $1 AND content = $2
            "#,
        )
        .bind(id.0)
        .bind(expected)
        .bind(replacement)
        .execute(&self.pool)
        .await;

        Ok(observe("replace_content", start, result)?.rows_affected() > 0)
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn ping(&self) -> Result<(), ChatError> {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        observe("ping", start, result).map(|_| ())
    }
}
