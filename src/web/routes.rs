use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::app_state::AppState;

use super::handlers;

pub fn build_router(state: Arc<AppState>) -> Router {
    let stills_dir = state.config.stills_dir.clone();

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/command", post(handlers::command))
        .route("/still", get(handlers::still))
        .route("/histogram", get(handlers::histogram))
        .route("/stream", get(handlers::stream))
        .nest_service("/static", ServeDir::new("static"))
        .nest_service("/stills", ServeDir::new(stills_dir))
        .with_state(state)
}
