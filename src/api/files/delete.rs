use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use storage_gateway::error::GatewayError;
use storage_gateway::task::Task;

use super::{resolve_driver, submit_write};
use crate::state::AppState;

/// DELETE: remove the object on the delete pool / 删除
pub async fn handle(state: &AppState, path: String, req: Request) -> Result<Response, GatewayError> {
    let driver = resolve_driver(state, req.headers(), req.uri()).await?;

    let task_path = path.clone();
    let task = Task::new(format!("delete {}", path), async move {
        driver.delete(&task_path).await?;
        anyhow::Ok(())
    });
    submit_write(state, &state.delete_pool, task, "delete", &path).await?;

    tracing::info!("Delete accepted: {}", path);
    Ok(StatusCode::NO_CONTENT.into_response())
}
