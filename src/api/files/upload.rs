use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use storage_gateway::error::GatewayError;
use storage_gateway::storage::{bytes_stream, DriverBox};
use storage_gateway::streaming::ReceiveError;
use storage_gateway::task::Task;
use storage_gateway::utils::determine_content_type;

use super::{resolve_driver, submit_write};
use crate::state::AppState;

/// POST/PUT: store the body at `path` / 上传
///
/// Chunked bodies are published as an active upload while they arrive so
/// readers can follow them; other bodies are buffered up to the size limit.
/// Either way the backend write runs on the upload pool.
pub async fn handle(state: &AppState, path: String, req: Request) -> Result<Response, GatewayError> {
    let chunked = is_chunked(req.headers());
    // Declared oversize bodies are refused before any backend is touched
    if !chunked {
        check_content_length(req.headers(), state.config.upload.max_body_size)?;
    }

    let driver = resolve_driver(state, req.headers(), req.uri()).await?;
    if chunked {
        chunked_upload(state, driver, path, req).await
    } else {
        plain_upload(state, driver, path, req).await
    }
}

async fn plain_upload(
    state: &AppState,
    driver: DriverBox,
    path: String,
    req: Request,
) -> Result<Response, GatewayError> {
    let limit = state.config.upload.max_body_size;
    let content_type = determine_content_type(header_str(req.headers(), header::CONTENT_TYPE), &path);
    let data = read_body(req.into_body(), limit).await?;
    let size = data.len();

    let task_path = path.clone();
    let task = Task::new(format!("save {}", path), async move {
        driver.save(&task_path, bytes_stream(data), Some(content_type.as_str())).await?;
        anyhow::Ok(())
    });
    submit_write(state, &state.upload_pool, task, "upload", &path).await?;

    tracing::info!("Upload accepted: {} ({} bytes)", path, size);
    Ok(StatusCode::CREATED.into_response())
}

async fn chunked_upload(
    state: &AppState,
    driver: DriverBox,
    path: String,
    req: Request,
) -> Result<Response, GatewayError> {
    let limit = state.config.upload.max_body_size;
    let upload = state.streaming.register(&path, req.headers());
    let content_type = upload.content_type().to_string();

    let body = Box::pin(req.into_body().into_data_stream());
    let size = match state.streaming.receive(&upload, body, limit).await {
        Ok(size) => size,
        Err(e) => {
            tracing::warn!("Chunked upload of {} failed: {}", path, e);
            state.streaming.finalize(&upload);
            return Err(e.into());
        }
    };

    let data = upload.contents();
    let streaming = state.streaming.clone();
    let finished = upload.clone();
    let task_path = path.clone();
    let task = Task::new(format!("save {}", path), async move {
        let result = driver.save(&task_path, bytes_stream(data), Some(content_type.as_str())).await;
        // Readers switch to the backend copy only once it exists
        streaming.finalize(&finished);
        result?;
        anyhow::Ok(())
    });

    if let Err(e) = submit_write(state, &state.upload_pool, task, "upload", &path).await {
        state.streaming.finalize(&upload);
        return Err(e);
    }

    tracing::info!("Chunked upload accepted: {} ({} bytes)", path, size);
    Ok(StatusCode::CREATED.into_response())
}

/// Whether the request declares `Transfer-Encoding: chunked` / 是否分块传输
fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn check_content_length(headers: &HeaderMap, limit: usize) -> Result<(), GatewayError> {
    let length = header_str(headers, header::CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
    match length {
        Some(length) if length > limit as u64 => Err(GatewayError::PayloadTooLarge(limit)),
        _ => Ok(()),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Buffer a whole body, refusing more than `limit` bytes / 读取请求体
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ReceiveError> {
    collect_limited(Box::pin(body.into_data_stream()), limit).await
}

async fn collect_limited<S, E>(mut stream: S, limit: usize) -> Result<Bytes, ReceiveError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buf = BytesMut::new();
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| ReceiveError::Body(e.to_string()))?;
        if buf.len() + frame.len() > limit {
            return Err(ReceiveError::TooLarge { limit });
        }
        buf.extend_from_slice(&frame);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_is_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(&headers));

        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("gzip, Chunked"));
        assert!(is_chunked(&headers));

        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        assert!(!is_chunked(&headers));
    }

    #[test]
    fn test_check_content_length() {
        let mut headers = HeaderMap::new();
        assert!(check_content_length(&headers, 8).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("8"));
        assert!(check_content_length(&headers, 8).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("9"));
        assert!(matches!(check_content_length(&headers, 8), Err(GatewayError::PayloadTooLarge(8))));
    }

    #[tokio::test]
    async fn test_collect_limited() {
        let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abcd")), Ok(Bytes::from_static(b"ef"))];

        let data = collect_limited(futures::stream::iter(chunks), 6).await.unwrap();
        assert_eq!(&data[..], b"abcdef");

        let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abcd")), Ok(Bytes::from_static(b"ef"))];
        let err = collect_limited(futures::stream::iter(chunks), 5).await.unwrap_err();
        assert!(matches!(err, ReceiveError::TooLarge { limit: 5 }));
    }
}
