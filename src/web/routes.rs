use axum::{
    http::header,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::handlers;
use crate::input::websocket::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::LOCATION]);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/processes", get(handlers::process_status))
        .route("/ws", any(ws_handler));

    // Static client for everything else, `.gz` siblings preferred when accepted
    let assets = ServeDir::new(&state.config.assets_dir).precompressed_gzip();

    Router::new()
        .route("/whep", post(handlers::whep_offer))
        .nest("/api", api_routes)
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
