//! Append-then-publish for a single conversation.
//!
//! Persistence and fan-out are separate steps: the message is durable before
//! any session sees it, and a failed push never undoes the write. Both steps
//! run under a per-conversation lock so sessions receive a conversation's
//! messages in sequence order.

use crate::errors::ChatError;
use crate::models::{Message, SenderKind};
use crate::services::delivery::{DeliveryOutcome, DeliveryRouter};
use crate::services::message_store::MessageStore;
use chrono::Utc;
use common::types::TenantId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::instrument;

type ConversationKey = (TenantId, String);

#[derive(Debug)]
pub struct SendOutcome {
    pub message: Message,
    pub delivery: DeliveryOutcome,
}

pub struct MessagePipeline {
    messages: MessageStore,
    router: Arc<DeliveryRouter>,
    locks: Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl MessagePipeline {
    pub fn new(messages: MessageStore, router: Arc<DeliveryRouter>) -> Self {
        Self {
            messages,
            router,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a message, then push it to live sessions.
    ///
    /// Errors come only from the append; delivery failures are reported in
    /// the outcome.
    #[instrument(skip_all, name = "chatdesk.pipeline.send", fields(tenant_id = %tenant_id))]
    pub async fn send(
        &self,
        tenant_id: TenantId,
        conversation_ref: &str,
        sender_kind: SenderKind,
        media_type: Option<&str>,
        content: &str,
    ) -> Result<SendOutcome, ChatError> {
        let key = (tenant_id, conversation_ref.to_string());
        // Declared before the lock so it drops after it, on every exit path
        // including cancellation.
        let _release = Release {
            pipeline: self,
            key: &key,
        };
        let lock = self.conversation_lock(&key)?;
        let _turn = lock.lock().await;

        let message = self
            .messages
            .append(tenant_id, conversation_ref, sender_kind, media_type, content, Utc::now())
            .await?;
        let delivery = self.router.publish(&message).await;
        Ok(SendOutcome { message, delivery })
    }

    /// Number of conversations with a lock currently held or awaited.
    pub fn active_conversations(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn conversation_lock(
        &self,
        key: &ConversationKey,
    ) -> Result<Arc<tokio::sync::Mutex<()>>, ChatError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ChatError::Internal("conversation lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }

    /// Drop the lock entry once nobody holds or awaits it.
    fn release(&self, key: &ConversationKey) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

struct Release<'a> {
    pipeline: &'a MessagePipeline,
    key: &'a ConversationKey,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.pipeline.release(self.key);
    }
}
