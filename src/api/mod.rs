pub mod files;
pub mod middleware;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::header;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the HTTP router / 构建路由
///
/// Every path is an object path, so there is a single fallback handler.
/// Paths are validated first; valid requests are then logged with their
/// content type and transfer encoding.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(files::dispatch)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let content_type = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let transfer_encoding = req
                .headers()
                .get(header::TRANSFER_ENCODING)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
                content_type,
                transfer_encoding,
            )
        }))
        .layer(axum::middleware::from_fn(middleware::path_validation))
        .layer(CorsLayer::permissive())
        // Upload size is enforced by the handlers
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
