use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::models::{ChunkDto, ContentDto, DocumentDto, UploadParams};
use crate::state::AppState;
use crate::utils::error::AppError;

/// POST /api/documents — multipart upload. Returns the PROCESSING record;
/// parsing and indexing continue off-thread.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Json<DocumentDto>, AppError> {
    let mut filename: Option<String> = None;
    let mut file_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidArgument(format!("failed to read field: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidArgument(format!("failed to read file: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| AppError::InvalidArgument("filename required".into()))?;
    let data = file_data.ok_or_else(|| AppError::InvalidArgument("file field required".into()))?;

    info!("upload: {} ({} bytes)", filename, data.len());

    let document = state.ingest.create_document(&filename, &data).await?;

    let ingest = state.ingest.clone();
    let document_id = document.id.clone();
    tokio::spawn(async move {
        ingest
            .process_document(&document_id, data, params.skip_enrichment)
            .await;
    });

    Ok(Json(DocumentDto::from_document(document, false)))
}

/// GET /api/documents
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DocumentDto>>, AppError> {
    let documents = state.repository.list_documents().await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|d| DocumentDto::from_document(d, false))
            .collect(),
    ))
}

/// GET /api/documents/{id} — includes the canonical text.
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDto>, AppError> {
    let document = state
        .repository
        .get_document(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
    Ok(Json(DocumentDto::from_document(document, true)))
}

/// GET /api/documents/{id}/content
pub async fn get_document_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContentDto>, AppError> {
    let document = state
        .repository
        .get_document(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
    Ok(Json(ContentDto {
        content: document.full_text.unwrap_or_default(),
    }))
}

/// GET /api/documents/{id}/chunks — ordered by chunk index.
pub async fn list_chunks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChunkDto>>, AppError> {
    if state.repository.get_document(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("document {}", id)));
    }
    let chunks = state.repository.get_chunks(&id).await?;
    Ok(Json(chunks.into_iter().map(ChunkDto::from).collect()))
}

/// DELETE /api/documents/{id} — cascades to chunks and both indices.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.ingest.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/documents/{id}/reindex — rebuild the secondary indices from
/// the chunk table.
pub async fn reindex_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDto>, AppError> {
    state.ingest.reindex(&id).await?;
    let document = state
        .repository
        .get_document(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
    Ok(Json(DocumentDto::from_document(document, false)))
}
