//! Live fan-out of persisted messages.
//!
//! Each attached session owns one bounded FIFO queue. `publish` asks the
//! presence registry for the tenant's live connections, filters them through
//! the [`RecipientResolver`] and pushes the message into each queue without
//! waiting. A full queue evicts the session (its queue is closed); the
//! client reconnects and pulls the backlog. A closed queue is simply
//! dropped. Neither failure affects the other sessions or the sender.
//!
//! The router remembers the highest sequence number each session has been
//! sent per conversation and never pushes one that does not advance it.

use crate::actors::PresenceHandle;
use crate::errors::{ChatError, DeliveryError};
use crate::models::{Message, Role};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, IdentityId, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// An authenticated live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub tenant_id: TenantId,
    pub identity_id: IdentityId,
    pub connection_id: ConnectionId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(tenant_id: TenantId, identity_id: IdentityId, role: Role) -> Self {
        Self {
            tenant_id,
            identity_id,
            connection_id: ConnectionId::new(),
            role,
            created_at: Utc::now(),
        }
    }
}

/// Decides which live sessions of the message's tenant receive it.
pub trait RecipientResolver: Send + Sync {
    fn is_recipient(&self, message: &Message, session: &Session) -> bool;
}

/// Every administrator and agent session of the tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantStaffResolver;

impl RecipientResolver for TenantStaffResolver {
    fn is_recipient(&self, _message: &Message, session: &Session) -> bool {
        session.role.is_staff()
    }
}

/// Result of one `publish`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Sessions the message was queued for.
    pub delivered: usize,
    /// Sessions that could not take the message.
    pub failed: Vec<(ConnectionId, DeliveryError)>,
    /// Sessions skipped because they already had this sequence number.
    pub duplicates: usize,
}

struct SessionSlot {
    session: Session,
    sender: mpsc::Sender<Arc<Message>>,
    /// Highest seq pushed, per conversation.
    high_water: Mutex<HashMap<String, i64>>,
}

enum Push {
    Sent,
    Duplicate,
    Failed(DeliveryError),
}

impl SessionSlot {
    fn push(&self, message: &Arc<Message>) -> Push {
        let Ok(mut high_water) = self.high_water.lock() else {
            return Push::Failed(DeliveryError::SessionClosed);
        };
        if high_water
            .get(&message.conversation_ref)
            .is_some_and(|seq| message.seq <= *seq)
        {
            return Push::Duplicate;
        }

        match self.sender.try_send(Arc::clone(message)) {
            Ok(()) => {
                high_water.insert(message.conversation_ref.clone(), message.seq);
                Push::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => Push::Failed(DeliveryError::SessionBusy),
            Err(mpsc::error::TrySendError::Closed(_)) => Push::Failed(DeliveryError::SessionClosed),
        }
    }
}

pub struct DeliveryRouter {
    presence: PresenceHandle,
    resolver: Arc<dyn RecipientResolver>,
    sessions: RwLock<HashMap<ConnectionId, Arc<SessionSlot>>>,
    buffer: usize,
}

impl DeliveryRouter {
    /// `buffer` is the per-session queue depth.
    pub fn new(presence: PresenceHandle, resolver: Arc<dyn RecipientResolver>, buffer: usize) -> Self {
        Self {
            presence,
            resolver,
            sessions: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a session and mark its identity connected.
    ///
    /// The returned subscription yields the session's messages; dropping it
    /// detaches the session and disconnects it from presence.
    #[instrument(
        skip_all,
        name = "chatdesk.delivery.attach",
        fields(tenant_id = %session.tenant_id, identity_id = %session.identity_id)
    )]
    pub async fn attach(self: &Arc<Self>, session: Session) -> Result<Subscription, ChatError> {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let connection_id = session.connection_id;

        self.insert_slot(Arc::new(SessionSlot {
            session: session.clone(),
            sender,
            high_water: Mutex::new(HashMap::new()),
        }))?;
        // From here on the slot is owned by the guard, including when this
        // future is dropped before presence answers.
        let guard = SessionGuard {
            router: Arc::clone(self),
            session: session.clone(),
        };

        self.presence
            .connect(session.tenant_id, session.identity_id, connection_id)
            .await?;

        info!(
            target: "chatdesk.delivery",
            connection_id = %connection_id,
            role = session.role.as_str(),
            "Session attached"
        );

        Ok(Subscription { receiver, guard })
    }

    /// Queue `message` for every live recipient session of its tenant.
    ///
    /// Never fails; per-session failures are logged and returned in the
    /// outcome.
    #[instrument(
        skip_all,
        name = "chatdesk.delivery.publish",
        fields(tenant_id = %message.tenant_id, seq = message.seq)
    )]
    pub async fn publish(&self, message: &Message) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();

        let live = match self.presence.live_connections(message.tenant_id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(
                    target: "chatdesk.delivery",
                    error = %e,
                    "Presence lookup failed, live push skipped"
                );
                return outcome;
            }
        };

        let slots: Vec<Arc<SessionSlot>> = match self.sessions.read() {
            Ok(sessions) => live
                .iter()
                .filter_map(|conn| sessions.get(&conn.connection_id).cloned())
                .collect(),
            Err(_) => {
                warn!(target: "chatdesk.delivery", "Session table lock poisoned, live push skipped");
                return outcome;
            }
        };

        let shared = Arc::new(message.clone());
        let mut evicted = Vec::new();

        for slot in slots {
            if slot.session.tenant_id != message.tenant_id
                || !self.resolver.is_recipient(message, &slot.session)
            {
                continue;
            }

            match slot.push(&shared) {
                Push::Sent => outcome.delivered += 1,
                Push::Duplicate => outcome.duplicates += 1,
                Push::Failed(reason) => {
                    warn!(
                        target: "chatdesk.delivery",
                        connection_id = %slot.session.connection_id,
                        identity_id = %slot.session.identity_id,
                        reason = %reason,
                        "Live push failed, session dropped"
                    );
                    evicted.push(slot.session.connection_id);
                    outcome.failed.push((slot.session.connection_id, reason));
                }
            }
        }

        for connection_id in evicted {
            self.remove_slot(connection_id);
        }

        let busy = outcome
            .failed
            .iter()
            .filter(|(_, e)| *e == DeliveryError::SessionBusy)
            .count();
        metrics::record_delivery("delivered", outcome.delivered as u64);
        metrics::record_delivery("duplicate", outcome.duplicates as u64);
        metrics::record_delivery("busy", busy as u64);
        metrics::record_delivery("closed", (outcome.failed.len() - busy) as u64);

        debug!(
            target: "chatdesk.delivery",
            delivered = outcome.delivered,
            failed = outcome.failed.len(),
            duplicates = outcome.duplicates,
            "Message published"
        );
        outcome
    }

    /// Detach every session. Their streams end once queued messages are
    /// drained. Used on shutdown so long-lived streams do not hold the
    /// server open.
    pub fn close_all(&self) {
        if let Ok(mut sessions) = self.sessions.write() {
            let closed = sessions.len();
            sessions.clear();
            metrics::set_live_sessions(0);
            info!(target: "chatdesk.delivery", closed, "All sessions closed");
        }
    }

    /// Number of attached sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn insert_slot(&self, slot: Arc<SessionSlot>) -> Result<(), ChatError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ChatError::Internal("session table lock poisoned".to_string()))?;
        sessions.insert(slot.session.connection_id, slot);
        metrics::set_live_sessions(sessions.len());
        Ok(())
    }

    fn remove_slot(&self, connection_id: ConnectionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            if sessions.remove(&connection_id).is_some() {
                metrics::set_live_sessions(sessions.len());
            }
        }
    }
}

/// Messages for one attached session.
pub struct Subscription {
    receiver: mpsc::Receiver<Arc<Message>>,
    guard: SessionGuard,
}

impl Subscription {
    pub fn session(&self) -> &Session {
        &self.guard.session
    }

    /// Next message, or `None` once the session has been evicted and its
    /// queue drained.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }
}

struct SessionGuard {
    router: Arc<DeliveryRouter>,
    session: Session,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.router.remove_slot(self.session.connection_id);
        self.router.presence.disconnect_detached(
            self.session.tenant_id,
            self.session.identity_id,
            self.session.connection_id,
        );
        debug!(
            target: "chatdesk.delivery",
            connection_id = %self.session.connection_id,
            "Session detached"
        );
    }
}
