use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{PoolError, Task, TaskError, TaskHandle};

struct Job {
    task: Task,
    done: Option<oneshot::Sender<Result<(), TaskError>>>,
}

/// Fixed-size worker pool with a bounded queue / 固定大小工作池
///
/// At most `size` tasks run at once. Submissions never wait: when the queue
/// already holds `queue_capacity` tasks the call fails with `PoolError::Busy`.
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `size` workers. `queue_capacity` defaults to twice the size.
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, size: usize, queue_capacity: Option<usize>) -> Self {
        let name = name.into();
        let size = size.max(1);
        let capacity = queue_capacity.unwrap_or(size * 2).max(1);

        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let running = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|id| {
                let rx = rx.clone();
                let running = running.clone();
                let queued = queued.clone();
                let pool = name.clone();
                tokio::spawn(async move {
                    loop {
                        // Only one idle worker waits on the queue at a time
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };

                        queued.fetch_sub(1, Ordering::SeqCst);
                        running.fetch_add(1, Ordering::SeqCst);
                        let outcome = run_job(&pool, job.task).await;
                        running.fetch_sub(1, Ordering::SeqCst);

                        if let Some(done) = job.done {
                            let _ = done.send(outcome);
                        }
                    }
                    tracing::debug!("Worker {}#{} stopped", pool, id);
                })
            })
            .collect();

        tracing::info!("Worker pool {} started: size={}, queue={}", name, size, capacity);

        Self {
            name,
            size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            running,
            queued,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks currently executing / 正在执行的任务数
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Tasks accepted but not yet started / 排队中的任务数
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Submit without a completion signal / 提交任务（不等待结果）
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        self.enqueue(Job { task, done: None })
    }

    /// Submit and get a handle resolving to the task outcome / 提交任务并返回完成句柄
    pub fn submit_with_handle(&self, task: Task) -> Result<TaskHandle, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job { task, done: Some(tx) })?;
        Ok(TaskHandle::new(rx))
    }

    fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::Closed);
        };

        // Count before sending so a fast worker never sees the counter at zero
        self.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!("Worker pool {} busy, rejected task {}", self.name, job.task.label());
                Err(PoolError::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(PoolError::Closed)
            }
        }
    }

    /// Stop accepting tasks and wait for queued and running ones / 关闭并等待任务完成
    ///
    /// Returns `false` if the workers did not finish within `timeout`.
    pub async fn release(&self, timeout: Duration) -> bool {
        drop(self.sender.lock().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());

        tracing::info!(
            "Releasing worker pool {}: running={}, queued={}",
            self.name,
            self.running(),
            self.queued()
        );

        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "Worker pool {} release timed out after {:?}: running={}, queued={}",
                    self.name,
                    timeout,
                    self.running(),
                    self.queued()
                );
                false
            }
        }
    }
}

/// Run one task, containing errors and panics / 执行任务
async fn run_job(pool: &str, task: Task) -> Result<(), TaskError> {
    let Task { label, future } = task;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => {
            tracing::debug!("Task {} finished on {}", label, pool);
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!("Task {} failed on {}: {:#}", label, pool, e);
            Err(TaskError::Failed(e))
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Task {} panicked on {}: {}", label, pool, msg);
            Err(TaskError::Panicked(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Semaphore;

    async fn explode() -> anyhow::Result<()> {
        panic!("boom")
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_each_task_runs_once() {
        let pool = WorkerPool::new("test", 4, Some(64));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..50 {
            let counter = counter.clone();
            let handle = pool
                .submit_with_handle(Task::new(format!("t{}", i), async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }))
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_size() {
        let pool = WorkerPool::new("bounded", 2, Some(32));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..16 {
            let current = current.clone();
            let peak = peak.clone();
            let handle = pool
                .submit_with_handle(Task::new(format!("t{}", i), async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }))
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_busy_when_queue_full() {
        let pool = WorkerPool::new("busy", 1, Some(1));
        let gate = Arc::new(Semaphore::new(0));

        let g = gate.clone();
        pool.submit(Task::new("first", async move {
            let _ = g.acquire().await;
            anyhow::Ok(())
        }))
        .unwrap();
        wait_until(|| pool.running() == 1).await;

        let g = gate.clone();
        pool.submit(Task::new("second", async move {
            let _ = g.acquire().await;
            anyhow::Ok(())
        }))
        .unwrap();
        assert_eq!(pool.queued(), 1);

        let third = pool.submit(Task::new("third", async { anyhow::Ok(()) }));
        assert_eq!(third.unwrap_err(), PoolError::Busy);

        gate.add_permits(1);
        assert!(pool.release(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let pool = WorkerPool::new("panics", 1, None);

        let handle = pool
            .submit_with_handle(Task::new("boom", explode()))
            .unwrap();
        assert!(matches!(handle.await, Err(TaskError::Panicked(msg)) if msg == "boom"));

        let handle = pool
            .submit_with_handle(Task::new("err", async { Err::<(), _>(anyhow::anyhow!("backend down")) }))
            .unwrap();
        assert!(matches!(handle.await, Err(TaskError::Failed(_))));

        // The single worker is still alive
        let handle = pool.submit_with_handle(Task::new("ok", async { anyhow::Ok(()) })).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_release_drains_queue() {
        let pool = WorkerPool::new("drain", 1, Some(8));
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let done = done.clone();
            pool.submit(Task::new(format!("t{}", i), async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                done.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }))
            .unwrap();
        }

        assert!(pool.release(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(pool.submit(Task::new("late", async { anyhow::Ok(()) })).unwrap_err(), PoolError::Closed);
    }

    #[tokio::test]
    async fn test_release_timeout() {
        let pool = WorkerPool::new("slow", 1, None);
        let started = Arc::new(AtomicBool::new(false));
        let s = started.clone();
        pool.submit(Task::new("forever", async move {
            s.store(true, Ordering::SeqCst);
            futures::future::pending::<()>().await;
            anyhow::Ok(())
        }))
        .unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;

        assert!(!pool.release(Duration::from_millis(20)).await);
    }
}
