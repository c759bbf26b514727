//! Live session over Server-Sent Events.
//!
//! Opening the stream attaches a session to the delivery router and marks
//! the identity connected. The session lives as long as the response body;
//! when the client goes away the stream is dropped, which detaches the
//! session and disconnects it from presence.
//!
//! Each message arrives as an event named `message` whose data is the stored
//! message as JSON. If the stream ends without the client closing it, the
//! session was evicted; the client reconnects and pulls the backlog from its
//! last seen sequence number.

use crate::auth::Claims;
use crate::errors::ChatError;
use crate::routes::AppState;
use crate::services::Session;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/events
#[instrument(skip_all, name = "chatdesk.handlers.events")]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let identity_id = claims.identity_id()?;
    let session = Session::new(claims.tenant_id, identity_id, claims.role);
    let subscription = state.router.attach(session).await?;

    let stream = stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.recv().await?;
        let event = Event::default()
            .event("message")
            .id(message.id.to_string())
            .json_data(message.as_ref());
        Some((event, subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
