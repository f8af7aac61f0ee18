use std::sync::Arc;

use storage_gateway::config::AppConfig;
use storage_gateway::storage::StorageManager;
use storage_gateway::streaming::StreamingCoordinator;
use storage_gateway::task::WorkerPool;

/// Shared per-process state handed to every request / 全局共享状态
pub struct AppState {
    pub config: AppConfig,
    pub storage_manager: StorageManager,
    pub upload_pool: WorkerPool,
    pub delete_pool: WorkerPool,
    /// Active upload registry / 进行中上传
    pub streaming: Arc<StreamingCoordinator>,
}

impl AppState {
    /// Build the state and register every storage driver factory / 初始化状态
    ///
    /// Spawns the pool workers, so it must run inside a tokio runtime. The
    /// streaming coordinator is created but not started.
    pub async fn new(config: AppConfig) -> Self {
        let storage_manager = StorageManager::new(config.storage.driver_cache_size);
        storage_gateway::register_storage_drivers(&storage_manager, &config.storage.rclone_binary).await;

        let upload_pool = WorkerPool::new("upload", config.upload.pool_size, config.upload.queue_capacity);
        let delete_pool = WorkerPool::new("delete", config.delete.pool_size, config.delete.queue_capacity);
        let streaming = Arc::new(StreamingCoordinator::new(config.streaming.clone()));

        Self {
            config,
            storage_manager,
            upload_pool,
            delete_pool,
            streaming,
        }
    }

    /// Stop the coordinator, then drain both pools / 关闭
    pub async fn shutdown(&self) {
        let timeout = self.config.shutdown_timeout();
        self.streaming.stop().await;

        let (uploads, deletes) = tokio::join!(
            self.upload_pool.release(timeout),
            self.delete_pool.release(timeout)
        );
        if uploads && deletes {
            tracing::info!("All pending writes finished");
        } else {
            tracing::warn!(
                "Shutdown timed out with pending writes: upload running={} queued={}, delete running={} queued={}",
                self.upload_pool.running(),
                self.upload_pool.queued(),
                self.delete_pool.running(),
                self.delete_pool.queued()
            );
        }
    }
}
