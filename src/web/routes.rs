use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::app_state::{AppState, FRAMES_ROUTE, PHOTOS_ROUTE};

use super::handlers;

/// Overlay uploads are full-resolution PNGs.
const UPLOAD_LIMIT_BYTES: usize = 25 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/capture", post(handlers::capture))
        .route("/capture/burst", post(handlers::capture_burst))
        .route("/camera-info", get(handlers::camera_info))
        .route(
            "/config/frame/{mode}",
            get(handlers::get_frame_config).post(handlers::save_frame_config),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .layer(middleware::from_fn(super::middleware::api_request_log));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .nest_service(PHOTOS_ROUTE, ServeDir::new(&state.config.photo_dir))
        .nest_service(FRAMES_ROUTE, ServeDir::new(&state.config.frame_dir))
        .fallback_service(ServeDir::new(&state.config.public_dir))
        .with_state(state)
}
