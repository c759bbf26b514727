//! Presence sync background task.
//!
//! Mirrors presence transitions into the identity row's `online` flag. The
//! flag is derived data: the presence registry stays authoritative and a
//! failed write is only logged.
//!
//! # Graceful Shutdown
//!
//! Exits when the cancellation token fires or the event channel closes.

use crate::actors::PresenceEvent;
use crate::repositories::ChatStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[instrument(skip_all, name = "chatdesk.task.presence_sync")]
pub async fn start_presence_sync(
    store: Arc<dyn ChatStore>,
    mut events: broadcast::Receiver<PresenceEvent>,
    cancel_token: CancellationToken,
) {
    info!(target: "chatdesk.task.presence_sync", "Starting presence sync task");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(
                    target: "chatdesk.task.presence_sync",
                    "Presence sync task received shutdown signal, exiting"
                );
                break;
            }

            event = events.recv() => {
                match event {
                    Ok(event) => apply(store.as_ref(), event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "chatdesk.task.presence_sync",
                            skipped,
                            "Presence sync lagged, some online flags may be stale until the next transition"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(target: "chatdesk.task.presence_sync", "Presence event channel closed");
                        break;
                    }
                }
            }
        }
    }

    info!(target: "chatdesk.task.presence_sync", "Presence sync task stopped");
}

pub(crate) async fn apply(store: &dyn ChatStore, event: PresenceEvent) {
    let online = event.state.is_online();
    match store
        .set_identity_online(event.tenant_id, event.identity_id, online)
        .await
    {
        Ok(()) => debug!(
            target: "chatdesk.task.presence_sync",
            tenant_id = %event.tenant_id,
            identity_id = %event.identity_id,
            online,
            "Online flag updated"
        ),
        Err(e) => warn!(
            target: "chatdesk.task.presence_sync",
            tenant_id = %event.tenant_id,
            identity_id = %event.identity_id,
            error = %e,
            "Failed to update online flag"
        ),
    }
}
