//! Conversation message handlers.

use crate::auth::Claims;
use crate::errors::ChatError;
use crate::models::{
    BacklogQuery, BacklogResponse, SendMessageRequest, SendMessageResponse, SenderKind,
    DEFAULT_BACKLOG_LIMIT, MAX_BACKLOG_LIMIT,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /v1/conversations/:conversation_ref/messages
///
/// Persists the message, then pushes it to live sessions. The response
/// carries the stored record (sanitized content, sequence number) and how
/// many sessions took it. A failed push does not fail the request.
#[instrument(skip_all, name = "chatdesk.handlers.send_message")]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(conversation_ref): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ChatError> {
    let sender_kind = if claims.role.is_staff() {
        SenderKind::Agent
    } else {
        SenderKind::Contact
    };

    let outcome = state
        .pipeline
        .send(
            claims.tenant_id,
            &conversation_ref,
            sender_kind,
            request.media_type.as_deref(),
            &request.content,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: outcome.message,
            delivered: outcome.delivery.delivered,
            failed: outcome.delivery.failed.len(),
        }),
    ))
}

/// Handler for GET /v1/conversations/:conversation_ref/messages
///
/// Backlog pull: messages with `seq > after_seq`, oldest first.
#[instrument(skip_all, name = "chatdesk.handlers.list_messages")]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(conversation_ref): Path<String>,
    Query(query): Query<BacklogQuery>,
) -> Result<Json<BacklogResponse>, ChatError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_BACKLOG_LIMIT)
        .clamp(1, MAX_BACKLOG_LIMIT);

    let messages = state
        .messages
        .backlog(claims.tenant_id, &conversation_ref, query.after_seq, limit)
        .await?;

    Ok(Json(BacklogResponse { messages }))
}
