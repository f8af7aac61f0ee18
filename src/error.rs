//! HTTP facing error taxonomy / 网关错误
//!
//! Every handler returns `GatewayError`; the status mapping lives in
//! `IntoResponse` and the body is plain text `"<message>: <detail>"`.

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::storage::credentials::CredentialError;
use crate::storage::manager::DriverError;
use crate::storage::StorageError;
use crate::streaming::ReceiveError;
use crate::task::{PoolError, TaskError};
use crate::utils::PathInvalid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid path: {0}")]
    PathInvalid(String),

    #[error("missing storage config: no credential supplied and no default backend")]
    MissingCredentials,

    #[error("invalid storage credential: {0}")]
    InvalidCredentials(#[from] CredentialError),

    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("server busy: {0}")]
    PoolBusy(String),

    #[error("server shutting down: {0}")]
    PoolClosed(String),

    #[error("file does not exist: {0}")]
    NotExist(String),

    #[error("payload too large: limit is {0} bytes")]
    PayloadTooLarge(usize),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(Method),

    #[error("streaming unsupported: {0}")]
    StreamingUnsupported(String),

    #[error("backend failure: {0:#}")]
    Backend(anyhow::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PathInvalid(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidCredentials(_) | Self::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PoolBusy(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::PoolClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotExist(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::StreamingUnsupported(_) | Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the object path to a storage error / 附加对象路径
    pub fn from_storage(err: StorageError, path: &str) -> Self {
        match err {
            StorageError::NotExist => Self::NotExist(path.to_string()),
            StorageError::Backend(e) => Self::Backend(e),
        }
    }

    /// Map a pool submission failure for the task named `what` / 提交失败
    pub fn from_pool(err: PoolError, what: &str) -> Self {
        match err {
            PoolError::Busy => Self::PoolBusy(format!("{} queue is full", what)),
            PoolError::Closed => Self::PoolClosed(format!("{} pool is closed", what)),
        }
    }

    /// Map the outcome of an awaited task / 任务失败
    pub fn from_task(err: TaskError, path: &str) -> Self {
        match err {
            TaskError::Failed(e) => match e.downcast::<StorageError>() {
                Ok(storage) => Self::from_storage(storage, path),
                Err(other) => Self::Backend(other),
            },
            other => Self::Backend(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl From<PathInvalid> for GatewayError {
    fn from(err: PathInvalid) -> Self {
        Self::PathInvalid(err.0)
    }
}

impl From<DriverError> for GatewayError {
    fn from(err: DriverError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<ReceiveError> for GatewayError {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::TooLarge { limit } => Self::PayloadTooLarge(limit),
            ReceiveError::Body(msg) => Self::BadRequest(msg),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response();

        if let Self::MethodNotAllowed(_) = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, POST, PUT, DELETE"));
        }
        response
    }
}
