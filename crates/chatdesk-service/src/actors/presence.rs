//! `PresenceActor` - owns the live connection table.
//!
//! Presence is kept per (tenant, identity) as the set of live connection ids.
//! An identity with at least one connection is `Online`. When its last
//! connection goes away it moves to `Disconnecting` and a cancellable grace
//! timer is armed; only when that timer fires without a reconnect in between
//! does the identity become `Offline`.
//!
//! All mutations go through the actor mailbox, so add/remove and timer
//! cancellation are serialized per registry. Grace timers are tagged with a
//! generation number; a timer whose generation no longer matches is stale
//! and ignored.
//!
//! Transitions across the online boundary are published on a broadcast
//! channel as [`PresenceEvent`]s.

use crate::errors::ChatError;
use crate::observability::metrics;
use crate::services::identity_store::IdentityStore;
use common::types::{ConnectionId, IdentityId, IdentityKey, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox depth for the presence actor.
const PRESENCE_CHANNEL_BUFFER: usize = 1024;

/// Capacity of the presence event broadcast channel.
const PRESENCE_EVENT_BUFFER: usize = 256;

/// Presence of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Offline,
    /// A connection is being admitted and none is live yet.
    Connecting,
    Online,
    /// No live connection; the grace timer is running.
    Disconnecting,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Offline => "offline",
            PresenceState::Connecting => "connecting",
            PresenceState::Online => "online",
            PresenceState::Disconnecting => "disconnecting",
        }
    }

    /// `Disconnecting` still reads as online: the grace window hides flaps.
    pub fn is_online(&self) -> bool {
        matches!(self, PresenceState::Online | PresenceState::Disconnecting)
    }
}

/// Published when an identity crosses the online/offline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEvent {
    pub tenant_id: TenantId,
    pub identity_id: IdentityId,
    pub state: PresenceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStatus {
    pub state: PresenceState,
    pub connections: usize,
}

/// One live connection, as returned by [`PresenceHandle::live_connections`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConnection {
    pub identity_id: IdentityId,
    pub connection_id: ConnectionId,
}

enum PresenceMessage {
    BeginConnect {
        key: IdentityKey,
        respond_to: oneshot::Sender<()>,
    },
    Connect {
        key: IdentityKey,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<PresenceState>,
    },
    AbortConnect {
        key: IdentityKey,
    },
    Disconnect {
        key: IdentityKey,
        connection_id: ConnectionId,
        respond_to: Option<oneshot::Sender<bool>>,
    },
    GraceExpired {
        key: IdentityKey,
        generation: u64,
    },
    Status {
        key: IdentityKey,
        respond_to: oneshot::Sender<PresenceStatus>,
    },
    LiveConnections {
        tenant_id: TenantId,
        respond_to: oneshot::Sender<Vec<LiveConnection>>,
    },
}

/// Handle to the `PresenceActor`.
#[derive(Clone)]
pub struct PresenceHandle {
    sender: mpsc::Sender<PresenceMessage>,
    events: broadcast::Sender<PresenceEvent>,
    identities: IdentityStore,
    cancel_token: CancellationToken,
}

impl PresenceHandle {
    /// Register a live connection for an identity.
    ///
    /// The identity must exist (`NotFound` otherwise). While the lookup is in
    /// flight the identity reads as `Connecting` unless it is already online.
    /// Returns the state after the connection was added.
    #[instrument(
        skip_all,
        name = "chatdesk.presence.connect",
        fields(tenant_id = %tenant_id, identity_id = %identity_id)
    )]
    pub async fn connect(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        connection_id: ConnectionId,
    ) -> Result<PresenceState, ChatError> {
        let key = IdentityKey::new(tenant_id, identity_id);

        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::BeginConnect {
            key,
            respond_to: tx,
        })
        .await?;
        let mut admission = Admission {
            handle: self,
            key,
            stage: AdmissionStage::Admitting,
        };
        rx.await.map_err(|_| stopped())?;

        self.identities.get_identity(tenant_id, identity_id).await?;

        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::Connect {
            key,
            connection_id,
            respond_to: tx,
        })
        .await?;
        admission.stage = AdmissionStage::Connected(connection_id);
        let state = rx.await.map_err(|_| stopped())?;

        admission.stage = AdmissionStage::Done;
        Ok(state)
    }

    /// Remove a connection. Returns false if it was not registered.
    pub async fn disconnect(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        connection_id: ConnectionId,
    ) -> Result<bool, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::Disconnect {
            key: IdentityKey::new(tenant_id, identity_id),
            connection_id,
            respond_to: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Remove a connection without waiting, for use from `Drop`.
    ///
    /// Falls back to a spawned send when the mailbox is full.
    pub fn disconnect_detached(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
        connection_id: ConnectionId,
    ) {
        self.send_detached(PresenceMessage::Disconnect {
            key: IdentityKey::new(tenant_id, identity_id),
            connection_id,
            respond_to: None,
        });
    }

    pub async fn status(
        &self,
        tenant_id: TenantId,
        identity_id: IdentityId,
    ) -> Result<PresenceStatus, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::Status {
            key: IdentityKey::new(tenant_id, identity_id),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Every live connection in the tenant.
    pub async fn live_connections(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<LiveConnection>, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(PresenceMessage::LiveConnections {
            tenant_id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| stopped())
    }

    /// Subscribe to online/offline transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. Pending grace timers are dropped.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, message: PresenceMessage) -> Result<(), ChatError> {
        self.sender.send(message).await.map_err(|_| stopped())
    }

    /// Enqueue without waiting. Falls back to a spawned send when the
    /// mailbox is full.
    fn send_detached(&self, message: PresenceMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(message).await;
                    });
                } else {
                    warn!(target: "chatdesk.presence", "No runtime to deliver presence update");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(target: "chatdesk.presence", "Presence actor stopped, update dropped");
            }
        }
    }
}

enum AdmissionStage {
    Admitting,
    Connected(ConnectionId),
    Done,
}

/// Unwinds a `connect` that did not run to completion, whether it failed or
/// its future was dropped. Messages enqueued here land behind the ones the
/// connect already sent, so the actor sees them in order.
struct Admission<'a> {
    handle: &'a PresenceHandle,
    key: IdentityKey,
    stage: AdmissionStage,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let message = match self.stage {
            AdmissionStage::Admitting => PresenceMessage::AbortConnect { key: self.key },
            AdmissionStage::Connected(connection_id) => PresenceMessage::Disconnect {
                key: self.key,
                connection_id,
                respond_to: None,
            },
            AdmissionStage::Done => return,
        };
        self.handle.send_detached(message);
    }
}

fn stopped() -> ChatError {
    ChatError::ServiceUnavailable("presence registry stopped".to_string())
}

struct PendingOffline {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Entry {
    connections: HashSet<ConnectionId>,
    admitting: usize,
    pending_offline: Option<PendingOffline>,
}

impl Entry {
    fn state(&self) -> PresenceState {
        if !self.connections.is_empty() {
            PresenceState::Online
        } else if self.pending_offline.is_some() {
            PresenceState::Disconnecting
        } else if self.admitting > 0 {
            PresenceState::Connecting
        } else {
            PresenceState::Offline
        }
    }
}

/// The `PresenceActor` implementation.
pub struct PresenceActor {
    receiver: mpsc::Receiver<PresenceMessage>,
    /// Timers report back through a weak sender so they never keep the
    /// mailbox open on their own.
    timer_sender: mpsc::WeakSender<PresenceMessage>,
    events: broadcast::Sender<PresenceEvent>,
    cancel_token: CancellationToken,
    grace: Duration,
    entries: BTreeMap<IdentityKey, Entry>,
    next_generation: u64,
}

impl PresenceActor {
    /// Spawn the presence actor.
    ///
    /// `grace` is the delay between losing the last connection and going
    /// offline. Zero makes the transition immediate.
    pub fn spawn(
        identities: IdentityStore,
        grace: Duration,
        cancel_token: CancellationToken,
    ) -> (PresenceHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PRESENCE_CHANNEL_BUFFER);
        let (events, _) = broadcast::channel(PRESENCE_EVENT_BUFFER);

        let actor = Self {
            receiver,
            timer_sender: sender.downgrade(),
            events: events.clone(),
            cancel_token: cancel_token.clone(),
            grace,
            entries: BTreeMap::new(),
            next_generation: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PresenceHandle {
            sender,
            events,
            identities,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "chatdesk.actor.presence")]
    async fn run(mut self) {
        debug!(
            target: "chatdesk.presence",
            grace_ms = self.grace.as_millis() as u64,
            "PresenceActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "chatdesk.presence", "PresenceActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "chatdesk.presence", "PresenceActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        for entry in self.entries.values() {
            if let Some(pending) = &entry.pending_offline {
                pending.cancel.cancel();
            }
        }

        info!(
            target: "chatdesk.presence",
            tracked_identities = self.entries.len(),
            "PresenceActor stopped"
        );
    }

    fn handle_message(&mut self, message: PresenceMessage) {
        match message {
            PresenceMessage::BeginConnect { key, respond_to } => {
                let before = self.state_of(key);
                self.entries.entry(key).or_default().admitting += 1;
                self.after_change(key, before);
                let _ = respond_to.send(());
            }

            PresenceMessage::Connect {
                key,
                connection_id,
                respond_to,
            } => {
                let before = self.state_of(key);
                let entry = self.entries.entry(key).or_default();
                entry.admitting = entry.admitting.saturating_sub(1);
                entry.connections.insert(connection_id);
                if let Some(pending) = entry.pending_offline.take() {
                    pending.cancel.cancel();
                    debug!(
                        target: "chatdesk.presence",
                        identity = %key,
                        "Reconnect inside grace window, offline transition cancelled"
                    );
                }
                let connections = entry.connections.len();
                let after = self.after_change(key, before);
                debug!(
                    target: "chatdesk.presence",
                    identity = %key,
                    connection_id = %connection_id,
                    connections,
                    "Connection added"
                );
                let _ = respond_to.send(after);
            }

            PresenceMessage::AbortConnect { key } => {
                let before = self.state_of(key);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.admitting = entry.admitting.saturating_sub(1);
                }
                self.after_change(key, before);
            }

            PresenceMessage::Disconnect {
                key,
                connection_id,
                respond_to,
            } => {
                let removed = self.handle_disconnect(key, connection_id);
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(removed);
                }
            }

            PresenceMessage::GraceExpired { key, generation } => {
                self.handle_grace_expired(key, generation);
            }

            PresenceMessage::Status { key, respond_to } => {
                let status = self.entries.get(&key).map_or(
                    PresenceStatus {
                        state: PresenceState::Offline,
                        connections: 0,
                    },
                    |entry| PresenceStatus {
                        state: entry.state(),
                        connections: entry.connections.len(),
                    },
                );
                let _ = respond_to.send(status);
            }

            PresenceMessage::LiveConnections {
                tenant_id,
                respond_to,
            } => {
                let live = self
                    .entries
                    .iter()
                    .filter(|(key, _)| key.tenant_id == tenant_id)
                    .flat_map(|(key, entry)| {
                        entry.connections.iter().map(move |connection_id| LiveConnection {
                            identity_id: key.identity_id,
                            connection_id: *connection_id,
                        })
                    })
                    .collect();
                let _ = respond_to.send(live);
            }
        }
    }

    fn handle_disconnect(&mut self, key: IdentityKey, connection_id: ConnectionId) -> bool {
        let before = self.state_of(key);
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(target: "chatdesk.presence", identity = %key, "Disconnect for untracked identity ignored");
            return false;
        };
        if !entry.connections.remove(&connection_id) {
            debug!(
                target: "chatdesk.presence",
                identity = %key,
                connection_id = %connection_id,
                "Disconnect for unknown connection ignored"
            );
            return false;
        }

        if entry.connections.is_empty() && !self.grace.is_zero() {
            self.next_generation += 1;
            let generation = self.next_generation;
            let cancel = self.cancel_token.child_token();
            entry.pending_offline = Some(PendingOffline {
                generation,
                cancel: cancel.clone(),
            });
            self.arm_grace_timer(key, generation, cancel);
        }

        self.after_change(key, before);
        true
    }

    fn arm_grace_timer(&self, key: IdentityKey, generation: u64, cancel: CancellationToken) {
        let grace = self.grace;
        let sender = self.timer_sender.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender.send(PresenceMessage::GraceExpired { key, generation }).await;
                    }
                }
            }
        });
    }

    fn handle_grace_expired(&mut self, key: IdentityKey, generation: u64) {
        let before = self.state_of(key);
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        let current = entry
            .pending_offline
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if current {
            entry.pending_offline = None;
            self.after_change(key, before);
        } else {
            debug!(
                target: "chatdesk.presence",
                identity = %key,
                generation,
                "Stale grace timer ignored"
            );
        }
    }

    fn state_of(&self, key: IdentityKey) -> PresenceState {
        self.entries
            .get(&key)
            .map_or(PresenceState::Offline, Entry::state)
    }

    /// Record the transition from `before`, publish boundary crossings and
    /// drop entries that went fully offline.
    fn after_change(&mut self, key: IdentityKey, before: PresenceState) -> PresenceState {
        let after = self.state_of(key);
        if after == PresenceState::Offline {
            self.entries.remove(&key);
        }
        if after == before {
            return after;
        }

        metrics::record_presence_transition(after.as_str());
        debug!(
            target: "chatdesk.presence",
            identity = %key,
            from = before.as_str(),
            to = after.as_str(),
            "Presence transition"
        );

        if before.is_online() != after.is_online() {
            let online = self.entries.values().filter(|e| e.state().is_online()).count();
            metrics::set_online_identities(online);
            info!(
                target: "chatdesk.presence",
                identity = %key,
                state = after.as_str(),
                "Identity presence changed"
            );
            // No subscribers is fine.
            let _ = self.events.send(PresenceEvent {
                tenant_id: key.tenant_id,
                identity_id: key.identity_id,
                state: after,
            });
        }
        after
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{IdentityAttributes, IdentityKind, Role};
    use crate::repositories::{InMemoryChatStore, TenantRepository};
    use serde_json::json;
    use std::sync::Arc;

    const GRACE: Duration = Duration::from_secs(5);

    async fn setup() -> (PresenceHandle, TenantId, IdentityId) {
        setup_with_grace(GRACE).await
    }

    async fn setup_with_grace(grace: Duration) -> (PresenceHandle, TenantId, IdentityId) {
        let store = Arc::new(InMemoryChatStore::new());
        let tenant = store.insert_tenant("Empresa Padrão", &json!({})).await.unwrap();
        let identities = IdentityStore::new(store);
        let agent = identities
            .find_or_create_identity(
                tenant.id,
                "ana",
                &IdentityAttributes {
                    display_name: "Ana".to_string(),
                    role: Role::Agent,
                    kind: IdentityKind::SystemUser,
                    credential_hash: None,
                },
            )
            .await
            .unwrap();
        let (handle, _task) = PresenceActor::spawn(identities, grace, CancellationToken::new());
        (handle, tenant.id, agent.identity_id)
    }

    /// Let spawned timers and the actor drain their queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_goes_online_immediately() {
        let (presence, tenant, agent) = setup().await;
        let mut events = presence.subscribe();

        let state = presence.connect(tenant, agent, ConnectionId::new()).await.unwrap();
        assert_eq!(state, PresenceState::Online);

        let event = events.recv().await.unwrap();
        assert_eq!(event.identity_id, agent);
        assert_eq!(event.state, PresenceState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_identity_is_rejected_and_left_offline() {
        let (presence, tenant, _) = setup().await;
        let err = presence
            .connect(tenant, IdentityId(99), ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let status = presence.status(tenant, IdentityId(99)).await.unwrap();
        assert_eq!(status.state, PresenceState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_connections_then_one_disconnect_stays_online() {
        let (presence, tenant, agent) = setup().await;
        let phone = ConnectionId::new();
        let laptop = ConnectionId::new();
        presence.connect(tenant, agent, phone).await.unwrap();
        presence.connect(tenant, agent, laptop).await.unwrap();

        assert!(presence.disconnect(tenant, agent, phone).await.unwrap());
        tokio::time::advance(GRACE * 2).await;
        settle().await;

        let status = presence.status(tenant, agent).await.unwrap();
        assert_eq!(status.state, PresenceState::Online);
        assert_eq!(status.connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_only_after_grace_window() {
        let (presence, tenant, agent) = setup().await;
        let mut events = presence.subscribe();
        let conn = ConnectionId::new();
        presence.connect(tenant, agent, conn).await.unwrap();
        assert_eq!(events.recv().await.unwrap().state, PresenceState::Online);

        presence.disconnect(tenant, agent, conn).await.unwrap();
        let status = presence.status(tenant, agent).await.unwrap();
        assert_eq!(status.state, PresenceState::Disconnecting);
        assert!(status.state.is_online());

        tokio::time::advance(GRACE - Duration::from_millis(10)).await;
        settle().await;
        assert_eq!(
            presence.status(tenant, agent).await.unwrap().state,
            PresenceState::Disconnecting
        );

        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(
            presence.status(tenant, agent).await.unwrap().state,
            PresenceState::Offline
        );
        assert_eq!(events.recv().await.unwrap().state, PresenceState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_inside_grace_window_stays_online() {
        let (presence, tenant, agent) = setup().await;
        let mut events = presence.subscribe();
        let first = ConnectionId::new();
        presence.connect(tenant, agent, first).await.unwrap();
        events.recv().await.unwrap();

        presence.disconnect(tenant, agent, first).await.unwrap();
        tokio::time::advance(GRACE / 2).await;
        let state = presence.connect(tenant, agent, ConnectionId::new()).await.unwrap();
        assert_eq!(state, PresenceState::Online);

        tokio::time::advance(GRACE * 2).await;
        settle().await;
        assert_eq!(
            presence.status(tenant, agent).await.unwrap().state,
            PresenceState::Online
        );
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_disconnect_is_ignored() {
        let (presence, tenant, agent) = setup().await;
        assert!(!presence.disconnect(tenant, agent, ConnectionId::new()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_connections_are_scoped_by_tenant() {
        let (presence, tenant, agent) = setup().await;
        let conn = ConnectionId::new();
        presence.connect(tenant, agent, conn).await.unwrap();

        let live = presence.live_connections(tenant).await.unwrap();
        assert_eq!(
            live,
            vec![LiveConnection {
                identity_id: agent,
                connection_id: conn,
            }]
        );
        assert!(presence.live_connections(TenantId(2)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_disconnect_is_processed() {
        let (presence, tenant, agent) = setup().await;
        let conn = ConnectionId::new();
        presence.connect(tenant, agent, conn).await.unwrap();

        presence.disconnect_detached(tenant, agent, conn);
        let status = presence.status(tenant, agent).await.unwrap();
        assert_eq!(status.connections, 0);
        assert_eq!(status.state, PresenceState::Disconnecting);
    }

    /// Dropping `connect` at any await point must not leave the identity
    /// stuck in `Connecting` or `Online`.
    #[tokio::test]
    async fn test_dropped_connect_is_unwound() {
        for polls in 1..=4 {
            let (presence, tenant, agent) = setup_with_grace(Duration::ZERO).await;
            let conn = ConnectionId::new();

            let mut completed = false;
            {
                let mut connect = std::pin::pin!(presence.connect(tenant, agent, conn));
                for _ in 0..polls {
                    if let std::task::Poll::Ready(result) = futures::poll!(connect.as_mut()) {
                        result.unwrap();
                        completed = true;
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            }
            if completed {
                assert!(presence.disconnect(tenant, agent, conn).await.unwrap());
            }

            let status = presence.status(tenant, agent).await.unwrap();
            assert_eq!(status.state, PresenceState::Offline, "after {polls} polls");
            assert_eq!(status.connections, 0, "after {polls} polls");
        }
    }

    #[tokio::test]
    async fn test_cancelled_registry_reports_unavailable() {
        let (presence, tenant, agent) = setup().await;
        presence.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = presence.status(tenant, agent).await.unwrap_err();
        assert!(matches!(err, ChatError::ServiceUnavailable(_)));
    }
}
