use axum::{
    middleware::from_fn,
    routing::{delete, get},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::history::SqliteHistory;
use crate::orchestrator::SearchOrchestrator;

pub mod handlers;
pub mod middleware;
pub mod responses;

pub use handlers::{
    clear_cache, health_check, list_stores, price_history, recent_searches, search, search_stream, stats,
};
pub use responses::*;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SearchOrchestrator,
    pub history: SqliteHistory,
}

impl AppState {
    pub fn new(orchestrator: SearchOrchestrator, history: SqliteHistory) -> Self {
        Self { orchestrator, history }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/search/stream", get(search_stream))
        .route("/search/stores", get(list_stores))
        .route("/products/recent", get(recent_searches))
        .route("/products/history", get(price_history))
        .route("/stats", get(stats))
        .route("/cache", delete(clear_cache))
        .layer(from_fn(middleware::request_logging))
}
