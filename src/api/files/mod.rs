//! Object endpoints: one catch-all route dispatched on method / 文件接口

pub mod delete;
pub mod download;
pub mod upload;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::Extension;

use storage_gateway::config::WriteMode;
use storage_gateway::error::GatewayError;
use storage_gateway::storage::DriverBox;
use storage_gateway::task::{Task, WorkerPool};

use crate::api::middleware::{resolve_storage_config, ValidatedPath};
use crate::state::AppState;

/// Route a request by method / 按方法分发
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Extension(ValidatedPath(path)): Extension<ValidatedPath>,
    req: Request,
) -> Result<Response, GatewayError> {
    match *req.method() {
        Method::GET | Method::HEAD => download::handle(&state, path, req).await,
        Method::POST | Method::PUT => upload::handle(&state, path, req).await,
        Method::DELETE => delete::handle(&state, path, req).await,
        ref other => Err(GatewayError::MethodNotAllowed(other.clone())),
    }
}

/// Driver for the backend the request targets / 获取请求对应的驱动
pub(crate) async fn resolve_driver(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<DriverBox, GatewayError> {
    let config = resolve_storage_config(headers, uri, state.config.storage.default.as_ref())?;
    Ok(state.storage_manager.get_driver(&config).await?)
}

/// Hand a write to its pool and wait as far as the write mode requires
///
/// `what` names the pool in error messages, `path` the object.
pub(crate) async fn submit_write(
    state: &AppState,
    pool: &WorkerPool,
    task: Task,
    what: &str,
    path: &str,
) -> Result<(), GatewayError> {
    match state.config.upload.write_mode {
        WriteMode::Detached => pool.submit(task).map_err(|e| GatewayError::from_pool(e, what)),
        WriteMode::Durable => {
            let handle = pool
                .submit_with_handle(task)
                .map_err(|e| GatewayError::from_pool(e, what))?;
            handle.await.map_err(|e| GatewayError::from_task(e, path))
        }
    }
}
