use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::{auth, handlers};
use crate::AppState;

/// Uploaded images larger than this are rejected at the framing layer.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/upload-face", post(handlers::upload_face))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/images/:filename", get(handlers::serve_image))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
