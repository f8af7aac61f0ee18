use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::Json;

use storage_gateway::error::GatewayError;
use storage_gateway::storage::{DriverBox, StorageError};
use storage_gateway::streaming::ActiveUpload;
use storage_gateway::utils::{get_ext, mime_from_path};

use super::resolve_driver;
use crate::state::AppState;

/// GET/HEAD: active upload, then object, then prefix listing / 下载或列出
///
/// Paths with an extension are objects. A path without one is served as an
/// object when one exists there and listed as a prefix otherwise. An upload
/// still in progress is served from memory before any backend is consulted.
pub async fn handle(state: &AppState, path: String, req: Request) -> Result<Response, GatewayError> {
    if let Some(upload) = state.streaming.lookup(&path) {
        if req.version() == Version::HTTP_10 {
            return Err(GatewayError::StreamingUnsupported(format!(
                "{} is still uploading and HTTP/1.0 cannot stream it",
                path
            )));
        }
        return Ok(serve_active_upload(state, upload));
    }

    let driver = resolve_driver(state, req.headers(), req.uri()).await?;
    if !get_ext(&path).is_empty() {
        return serve_file(&driver, &path, mime_from_path(&path)).await;
    }

    match driver.stat(&path).await {
        // Extensionless object: the stored metadata carries its type
        Ok(stat) => serve_file(&driver, &path, Some(stat.content_type)).await,
        Err(StorageError::NotExist) => list_files(&driver, &path).await,
        Err(e) => Err(GatewayError::from_storage(e, &path)),
    }
}

fn serve_active_upload(state: &AppState, upload: Arc<ActiveUpload>) -> Response {
    tracing::debug!("Serving active upload {} ({} bytes so far)", upload.path(), upload.len());
    let content_type = upload.content_type().to_string();
    let body = Body::from_stream(state.streaming.tail(upload));
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn serve_file(
    driver: &DriverBox,
    path: &str,
    content_type: Option<String>,
) -> Result<Response, GatewayError> {
    let stream = driver
        .open(path)
        .await
        .map_err(|e| GatewayError::from_storage(e, path))?;

    let mut response = Body::from_stream(stream).into_response();
    if let Some(content_type) = content_type {
        if let Ok(value) = content_type.parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

async fn list_files(driver: &DriverBox, prefix: &str) -> Result<Response, GatewayError> {
    let files = driver
        .list(prefix)
        .await
        .map_err(|e| GatewayError::from_storage(e, prefix))?;
    tracing::debug!("Listed {} objects under {} via {}", files.len(), prefix, driver.name());
    Ok(Json(files).into_response())
}
