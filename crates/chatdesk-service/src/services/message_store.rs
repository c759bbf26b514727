//! Message persistence.
//!
//! `append` sanitizes the caption before it reaches storage, so no message
//! written through it violates the placeholder rule. Rows written by older
//! clients are brought in line by `repair_existing`.

use crate::errors::ChatError;
use crate::models::{MediaType, Message, NewMessage, SenderKind, MAX_CONVERSATION_REF_LENGTH};
use crate::observability::metrics;
use crate::repositories::ChatStore;
use crate::services::media_validator::MediaValidator;
use chrono::{DateTime, Utc};
use common::types::{MessageId, TenantId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Counts from one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Media rows examined.
    pub scanned: u64,
    /// Rows whose content was cleared.
    pub fixed: u64,
    /// Rows whose update failed; they still carry a placeholder.
    pub failed: u64,
}

#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn ChatStore>,
    validator: Arc<MediaValidator>,
}

impl MessageStore {
    pub fn new(store: Arc<dyn ChatStore>, validator: Arc<MediaValidator>) -> Self {
        Self { store, validator }
    }

    pub fn validator(&self) -> &MediaValidator {
        &self.validator
    }

    /// Sanitize and persist a message. The returned record carries the
    /// conversation's next sequence number.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unknown media tag or a malformed conversation ref
    /// - `NotFound` if the tenant does not exist
    #[instrument(skip_all, name = "chatdesk.messages.append", fields(tenant_id = %tenant_id))]
    pub async fn append(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        sender_kind: SenderKind,
        media_type: Option<&str>,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Message, ChatError> {
        validate_conversation_ref(conversation_ref)?;
        let media_type = parse_media_type(media_type)?;

        let tag = media_type.map(|m| m.as_str());
        let sanitized = self.validator.sanitize(tag, content);
        if sanitized.rewritten {
            debug!(
                target: "chatdesk.messages",
                media_type = tag.unwrap_or_default(),
                "Placeholder caption cleared"
            );
        }

        let message = self
            .store
            .insert_message(&NewMessage {
                tenant_id,
                conversation_ref: conversation_ref.to_string(),
                sender_kind,
                media_type: tag.map(ToString::to_string),
                content: sanitized.content,
                created_at,
            })
            .await?;

        metrics::record_message_appended(media_type.is_some(), sanitized.rewritten);
        debug!(
            target: "chatdesk.messages",
            message_id = %message.id,
            seq = message.seq,
            "Message appended"
        );
        Ok(message)
    }

    /// Messages of a conversation with `seq > after_seq`, oldest first.
    pub async fn backlog(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        after_seq: i64,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        validate_conversation_ref(conversation_ref)?;
        self.store
            .list_messages_after(tenant_id, conversation_ref, after_seq.max(0), limit)
            .await
    }

    /// Re-apply the validator to every stored media message and clear the
    /// placeholders it finds, `batch_size` rows at a time.
    ///
    /// Updates are compare-and-set against the content that was read, so a
    /// row changed concurrently is skipped rather than overwritten. A failed
    /// row update is counted and the scan continues; a failed batch read
    /// aborts the pass.
    #[instrument(skip_all, name = "chatdesk.messages.repair_existing")]
    pub async fn repair_existing(&self, batch_size: u32) -> Result<RepairReport, ChatError> {
        let batch_size = batch_size.max(1);
        let mut report = RepairReport::default();
        let mut cursor: Option<MessageId> = None;

        loop {
            let batch = self.store.scan_media_messages(cursor, batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            let exhausted = batch.len() < batch_size as usize;

            for row in &batch {
                report.scanned += 1;
                let sanitized = self.validator.sanitize(row.media_type.as_deref(), &row.content);
                if !sanitized.rewritten {
                    continue;
                }

                match self
                    .store
                    .replace_content(row.id, &row.content, &sanitized.content)
                    .await
                {
                    Ok(true) => {
                        report.fixed += 1;
                        metrics::record_placeholder_rewrite("repair");
                    }
                    Ok(false) => {
                        debug!(
                            target: "chatdesk.messages",
                            message_id = %row.id,
                            "Row changed since it was read, skipped"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            target: "chatdesk.messages",
                            message_id = %row.id,
                            error = %e,
                            "Placeholder repair failed for row"
                        );
                    }
                }
            }

            debug!(
                target: "chatdesk.messages",
                scanned = report.scanned,
                fixed = report.fixed,
                "Repair batch committed"
            );
            if exhausted {
                break;
            }
        }

        info!(
            target: "chatdesk.messages",
            scanned = report.scanned,
            fixed = report.fixed,
            failed = report.failed,
            "Placeholder repair finished"
        );
        Ok(report)
    }
}

/// Blank tags count as no media. Unknown tags are rejected.
fn parse_media_type(raw: Option<&str>) -> Result<Option<MediaType>, ChatError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(tag) => tag.parse::<MediaType>().map(Some).map_err(ChatError::Validation),
    }
}

pub(crate) fn validate_conversation_ref(conversation_ref: &str) -> Result<(), ChatError> {
    if conversation_ref.trim().is_empty() {
        return Err(ChatError::Validation(
            "conversation reference must not be empty".to_string(),
        ));
    }
    if conversation_ref.len() > MAX_CONVERSATION_REF_LENGTH {
        return Err(ChatError::Validation(format!(
            "conversation reference must be at most {MAX_CONVERSATION_REF_LENGTH} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryChatStore, MessageRepository, TenantRepository};
    use serde_json::json;

    async fn setup() -> (Arc<InMemoryChatStore>, MessageStore, TenantId) {
        let store = Arc::new(InMemoryChatStore::new());
        let tenant = store.insert_tenant("Empresa Padrão", &json!({})).await.unwrap();
        let messages = MessageStore::new(store.clone(), Arc::new(MediaValidator::default()));
        (store, messages, tenant.id)
    }

    /// Insert the way a legacy writer did, skipping the validator.
    async fn legacy_insert(
        store: &InMemoryChatStore,
        tenant_id: TenantId,
        media_type: &str,
        content: &str,
    ) -> Message {
        store
            .insert_message(&NewMessage {
                tenant_id,
                conversation_ref: "5511999990000".to_string(),
                sender_kind: SenderKind::Contact,
                media_type: Some(media_type.to_string()),
                content: content.to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_clears_placeholder_caption() {
        let (_, messages, tenant) = setup().await;
        let message = messages
            .append(tenant, "conv", SenderKind::Contact, Some("image"), "Imagem", Utc::now())
            .await
            .unwrap();

        assert_eq!(message.content, "");
        assert_eq!(message.media_type.as_deref(), Some("image"));
        assert_eq!(message.seq, 1);
    }

    #[tokio::test]
    async fn test_append_canonicalizes_media_alias() {
        let (_, messages, tenant) = setup().await;
        let message = messages
            .append(tenant, "conv", SenderKind::Contact, Some("PTT"), "", Utc::now())
            .await
            .unwrap();
        assert_eq!(message.media_type.as_deref(), Some("audio"));
    }

    #[tokio::test]
    async fn test_append_keeps_text_without_media() {
        let (_, messages, tenant) = setup().await;
        let message = messages
            .append(tenant, "conv", SenderKind::Agent, Some("  "), "Imagem", Utc::now())
            .await
            .unwrap();
        assert_eq!(message.content, "Imagem");
        assert_eq!(message.media_type, None);
    }

    #[tokio::test]
    async fn test_unknown_media_type_is_rejected() {
        let (store, messages, tenant) = setup().await;
        let err = messages
            .append(tenant, "conv", SenderKind::Contact, Some("hologram"), "hi", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(store.list_messages_after(tenant, "conv", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_to_unknown_tenant_is_not_found() {
        let (_, messages, _) = setup().await;
        let err = messages
            .append(TenantId(9), "conv", SenderKind::Contact, None, "oi", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sequence_is_strictly_increasing_under_concurrency() {
        let (_, messages, tenant) = setup().await;
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let messages = messages.clone();
                tokio::spawn(async move {
                    messages
                        .append(tenant, "conv", SenderKind::Contact, None, &format!("m{i}"), Utc::now())
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let backlog = messages.backlog(tenant, "conv", 0, 100).await.unwrap();
        let seqs: Vec<i64> = backlog.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_repair_fixes_legacy_rows_once() {
        let (store, messages, tenant) = setup().await;
        let broken = legacy_insert(&store, tenant, "video", "Vídeo").await;
        legacy_insert(&store, tenant, "image", "Foto do contrato").await;
        messages
            .append(tenant, "conv", SenderKind::Agent, None, "Imagem", Utc::now())
            .await
            .unwrap();

        let first = messages.repair_existing(1).await.unwrap();
        assert_eq!(first, RepairReport { scanned: 2, fixed: 1, failed: 0 });

        let fixed = store
            .list_messages_after(tenant, "5511999990000", 0, 10)
            .await
            .unwrap();
        assert_eq!(fixed[0].id, broken.id);
        assert_eq!(fixed[0].content, "");
        assert_eq!(fixed[1].content, "Foto do contrato");

        let second = messages.repair_existing(1).await.unwrap();
        assert_eq!(second.fixed, 0);
        assert_eq!(second.scanned, 2);
    }

    #[tokio::test]
    async fn test_repair_continues_past_row_failures() {
        let (store, messages, tenant) = setup().await;
        let stuck = legacy_insert(&store, tenant, "video", "video").await;
        legacy_insert(&store, tenant, "audio", "'Áudio'").await;
        store.fail_updates_for(stuck.id);

        let report = messages.repair_existing(10).await.unwrap();
        assert_eq!(report, RepairReport { scanned: 2, fixed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_repair_aborts_when_store_is_unreachable() {
        let (store, messages, tenant) = setup().await;
        legacy_insert(&store, tenant, "video", "video").await;
        store.set_unavailable(true);

        let err = messages.repair_existing(10).await.unwrap_err();
        assert!(matches!(err, ChatError::Database(_)));
    }

    #[tokio::test]
    async fn test_blank_conversation_ref_is_rejected() {
        let (_, messages, tenant) = setup().await;
        let err = messages.backlog(tenant, " ", 0, 10).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
