use axum::{
    Extension, Json,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use classline_chat::contacts::resolve_contacts;
use classline_types::api::SendMessageRequest;
use classline_types::error::ChatError;
use classline_types::models::Actor;

use crate::AppState;

/// Resolve the bearer credential to a directory actor.
///
/// The credential is an opaque session reference issued by the platform
/// gateway; here it carries the user id, which is looked up in the
/// directory. Unknown or missing references are rejected before any
/// handler runs.
pub async fn resolve_actor(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let reference = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = reference.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let entry = tokio::task::spawn_blocking(move || state.store.get_user(user_id))
        .await
        .map_err(join_err)?
        .map_err(|e| {
            error!("actor lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(Actor {
        id: entry.id,
        role: entry.role,
    });
    Ok(next.run(req).await)
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    // Run blocking DB reads off the async runtime
    let contacts =
        tokio::task::spawn_blocking(move || resolve_contacts(&state.store, Some(&actor)))
            .await
            .map_err(join_err)?
            .map_err(error_status)?;

    Ok(Json(contacts))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.min(200);

    let transcript =
        tokio::task::spawn_blocking(move || state.messages.history(Some(&actor), contact_id))
            .await
            .map_err(join_err)?
            .map_err(error_status)?;

    // Newest `limit` messages, still ascending.
    let start = transcript.len().saturating_sub(limit);
    Ok(Json(transcript[start..].to_vec()))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let message =
        tokio::task::spawn_blocking(move || state.messages.send(Some(&actor), contact_id, &req.content))
            .await
            .map_err(join_err)?
            .map_err(error_status)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, StatusCode> {
    tokio::task::spawn_blocking(move || state.messages.mark_read(Some(&actor), contact_id))
        .await
        .map_err(join_err)?
        .map_err(error_status)?;

    Ok(StatusCode::NO_CONTENT)
}

fn error_status(err: ChatError) -> StatusCode {
    match err {
        ChatError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ChatError::Store(e) => {
            error!("store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn join_err(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
