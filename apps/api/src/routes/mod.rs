pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/documents/:id/analyze",
            post(handlers::handle_analyze),
        )
        .route(
            "/api/v1/documents/:id/analyses",
            get(handlers::handle_list_analyses),
        )
        .with_state(state)
}
