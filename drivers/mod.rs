// Driver package / 驱动包
pub mod local;
pub mod s3;
pub mod gcs;
pub mod remote;

use std::sync::Arc;

use crate::storage::StorageManager;

/// Register all drivers to StorageManager / 注册所有驱动
pub async fn register_all(manager: &StorageManager, rclone_binary: &str) {
    // Register local filesystem driver / 注册本地驱动
    manager.register_factory(Arc::new(local::LocalDriverFactory)).await;
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Arc::new(s3::S3DriverFactory)).await;
    // Register Google Cloud Storage driver / 注册GCS驱动
    manager.register_factory(Arc::new(gcs::GcsDriverFactory)).await;
    // Register rclone remote driver / 注册rclone远程驱动
    manager.register_factory(Arc::new(remote::RemoteDriverFactory::new(rclone_binary))).await;
}
