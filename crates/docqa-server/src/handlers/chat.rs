use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use crate::database::models::ChatSession;
use crate::models::{ChatChunk, ChatRequestBody, CreateSessionRequest, MessageDto, SessionDto, StreamParams};
use crate::services::ChatAsk;
use crate::state::AppState;
use crate::utils::error::AppError;

/// POST /api/chat/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<SessionDto>, AppError> {
    let document_ids: Vec<String> = body
        .document_id
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for id in &document_ids {
        if state.repository.get_document(id).await?.is_none() {
            return Err(AppError::NotFound(format!("document {}", id)));
        }
    }

    let session = ChatSession::new(document_ids);
    state.repository.insert_session(session.clone()).await?;

    info!("created chat session {}", session.id);
    Ok(Json(SessionDto::from(session)))
}

/// GET /api/chat/sessions/{id}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageDto>>, AppError> {
    if state.repository.get_session(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("session {}", id)));
    }
    let messages = state.repository.get_messages(&id).await?;
    Ok(Json(messages.into_iter().map(MessageDto::from).collect()))
}

/// POST /api/chat — one-shot answer collected from the stream.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<ChatChunk>, AppError> {
    if body.query.trim().is_empty() {
        return Err(AppError::InvalidArgument("query cannot be empty".into()));
    }

    let chunk = state
        .orchestrator
        .answer_once(ChatAsk {
            query: body.query,
            session_id: body.session_id,
            document_id: body.document_id,
            model_type: body.model_type,
        })
        .await;

    Ok(Json(chunk))
}

/// GET /api/chat/stream — SSE frames, one `data: <json>` per chunk; the
/// stream ends after the `complete: true` frame.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if params.query.trim().is_empty() {
        return Err(AppError::InvalidArgument("query cannot be empty".into()));
    }

    info!(
        "chat stream: session={} document={:?}",
        params.session_id, params.document_id
    );

    let stream = state
        .orchestrator
        .answer_stream(ChatAsk {
            query: params.query,
            session_id: params.session_id,
            document_id: params.document_id,
            model_type: params.model,
        })
        .map(|chunk| {
            let data = serde_json::to_string(&chunk).unwrap_or_default();
            Ok(Event::default().data(data))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
