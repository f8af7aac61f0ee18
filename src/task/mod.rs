//! Deferred work executed on bounded worker pools / 任务与工作池
//!
//! A [`Task`] submitted with [`WorkerPool::submit`] gives its submitter no
//! completion signal: once accepted it runs exactly once, and any error or
//! panic it produces is logged by the pool and then dropped. Callers that
//! need the outcome use [`WorkerPool::submit_with_handle`] and await the
//! returned [`TaskHandle`].

pub mod pool;

pub use pool::WorkerPool;

use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Unit of work owned by a pool / 任务
pub struct Task {
    label: String,
    future: BoxFuture<'static, anyhow::Result<()>>,
}

impl Task {
    pub fn new<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            future: Box::pin(future),
        }
    }

    /// Task label used in logs / 任务标签
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Submission refused by a pool / 提交失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool queue is full")]
    Busy,

    #[error("worker pool is shut down")]
    Closed,
}

/// Failure of an accepted task / 任务执行失败
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task dropped before completion")]
    Dropped,
}

/// Completion handle of a task submitted with `submit_with_handle` / 任务完成句柄
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<(), TaskError>>,
}

impl TaskHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), TaskError>>) -> Self {
        Self { rx }
    }
}

impl Future for TaskHandle {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(TaskError::Dropped)))
    }
}
