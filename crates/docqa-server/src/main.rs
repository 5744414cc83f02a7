use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

mod config;
mod database;
mod document;
mod embedding;
mod handlers;
mod index;
mod llm;
mod models;
mod services;
mod state;
mod utils;

use config::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,docqa_server=debug".to_string()),
        )
        .with_target(true)
        .init();

    info!("starting document QA server");

    let settings = Settings::load()?;
    info!(
        "configuration loaded: vector={}, embedding={}, primary llm={}",
        settings.vector.kind, settings.embedding.kind, settings.llm.primary.model
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::build(settings);
    let app = build_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    // leave headroom over the configured file cap so the handler, not the
    // body limit layer, produces the 413
    let body_limit = state.settings.document.max_file_size as usize + 1024 * 1024;

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/documents",
            post(handlers::documents::upload_document).get(handlers::documents::list_documents),
        )
        .route(
            "/api/documents/{id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )
        .route(
            "/api/documents/{id}/content",
            get(handlers::documents::get_document_content),
        )
        .route(
            "/api/documents/{id}/chunks",
            get(handlers::documents::list_chunks),
        )
        .route(
            "/api/documents/{id}/reindex",
            post(handlers::documents::reindex_document),
        )
        .route("/api/chat/sessions", post(handlers::chat::create_session))
        .route(
            "/api/chat/sessions/{id}/messages",
            get(handlers::chat::list_messages),
        )
        .route("/api/chat", post(handlers::chat::chat))
        .route("/api/chat/stream", get(handlers::chat::chat_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
