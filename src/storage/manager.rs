use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use anyhow::anyhow;
use sha2::{Digest, Sha256};

use super::{StorageConfig, StorageDriver};

pub type DriverBox = Arc<dyn StorageDriver>;

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Driver kind, matches `StorageConfig::kind` / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// Build a driver for one storage config / 创建驱动实例
    fn create_driver(&self, config: &StorageConfig) -> anyhow::Result<Box<dyn StorageDriver>>;
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("storage driver not registered: {0}")]
    Unsupported(&'static str),

    #[error("invalid storage config: {0:#}")]
    InvalidConfig(anyhow::Error),
}

/// Storage manager: builds drivers from configs and caches them / 存储管理器
///
/// Drivers are keyed by a SHA-256 fingerprint of the config so requests that
/// carry the same credentials share one client.
#[derive(Clone)]
pub struct StorageManager {
    drivers: Arc<RwLock<HashMap<String, DriverBox>>>,
    factories: Arc<RwLock<HashMap<&'static str, Arc<dyn DriverFactory>>>>,
    cache_size: usize,
}

impl StorageManager {
    pub fn new(cache_size: usize) -> Self {
        Self {
            drivers: Arc::new(RwLock::new(HashMap::new())),
            factories: Arc::new(RwLock::new(HashMap::new())),
            cache_size: cache_size.max(1),
        }
    }

    /// Register driver factory / 注册驱动工厂
    pub async fn register_factory(&self, factory: Arc<dyn DriverFactory>) {
        let driver_type = factory.driver_type();
        self.factories.write().await.insert(driver_type, factory);
        tracing::info!("Driver factory registered: {}", driver_type);
    }

    /// Get the cached driver for `config`, creating it on first use / 获取或创建驱动
    pub async fn get_driver(&self, config: &StorageConfig) -> Result<DriverBox, DriverError> {
        let key = fingerprint(config);

        if let Some(driver) = self.drivers.read().await.get(&key) {
            return Ok(driver.clone());
        }

        let factory = self
            .factories
            .read()
            .await
            .get(config.kind())
            .cloned()
            .ok_or(DriverError::Unsupported(config.kind()))?;

        let driver: DriverBox = Arc::from(
            factory
                .create_driver(config)
                .map_err(DriverError::InvalidConfig)?,
        );

        let mut drivers = self.drivers.write().await;
        // Another request may have built the same driver meanwhile
        if let Some(existing) = drivers.get(&key) {
            return Ok(existing.clone());
        }
        if drivers.len() >= self.cache_size {
            if let Some(evict) = drivers.keys().next().cloned() {
                drivers.remove(&evict);
            }
        }
        drivers.insert(key, driver.clone());
        tracing::debug!("Driver created: {} ({} cached)", config.kind(), drivers.len());

        Ok(driver)
    }

    /// Number of cached drivers / 已缓存驱动数量
    pub async fn cached_drivers(&self) -> usize {
        self.drivers.read().await.len()
    }

    /// List all registered driver kinds / 列出所有驱动类型
    pub async fn list_driver_types(&self) -> Vec<&'static str> {
        self.factories.read().await.keys().copied().collect()
    }
}

fn fingerprint(config: &StorageConfig) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

/// Factory error for a config handed to the wrong factory / 配置类型不匹配
pub(crate) fn mismatched(expected: &str, config: &StorageConfig) -> anyhow::Error {
    anyhow!("{} factory cannot build a {} driver", expected, config.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ByteStream, Stat, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullDriver;

    #[async_trait]
    impl StorageDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }
        async fn save(&self, _: &str, _: ByteStream, _: Option<&str>) -> StorageResult<()> {
            Ok(())
        }
        async fn stat(&self, _: &str) -> StorageResult<Stat> {
            Err(crate::storage::StorageError::NotExist)
        }
        async fn open(&self, _: &str) -> StorageResult<ByteStream> {
            Err(crate::storage::StorageError::NotExist)
        }
        async fn delete(&self, _: &str) -> StorageResult<()> {
            Ok(())
        }
        async fn list(&self, _: &str) -> StorageResult<Vec<Stat>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
    }

    impl DriverFactory for CountingFactory {
        fn driver_type(&self) -> &'static str {
            "filesystem"
        }

        fn create_driver(&self, config: &StorageConfig) -> anyhow::Result<Box<dyn StorageDriver>> {
            match config {
                StorageConfig::Filesystem { root } if root.is_empty() => Err(anyhow!("root is empty")),
                StorageConfig::Filesystem { .. } => {
                    self.built.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(NullDriver))
                }
                other => Err(mismatched("filesystem", other)),
            }
        }
    }

    #[tokio::test]
    async fn test_driver_cache() {
        let manager = StorageManager::new(2);
        let factory = Arc::new(CountingFactory::default());
        manager.register_factory(factory.clone()).await;

        let a = StorageConfig::Filesystem { root: "/a".into() };
        let b = StorageConfig::Filesystem { root: "/b".into() };
        let c = StorageConfig::Filesystem { root: "/c".into() };

        manager.get_driver(&a).await.unwrap();
        manager.get_driver(&a).await.unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        manager.get_driver(&b).await.unwrap();
        manager.get_driver(&c).await.unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 3);
        assert_eq!(manager.cached_drivers().await, 2);
    }

    #[tokio::test]
    async fn test_driver_errors() {
        let manager = StorageManager::new(4);
        manager.register_factory(Arc::new(CountingFactory::default())).await;

        let empty = StorageConfig::Filesystem { root: String::new() };
        assert!(matches!(manager.get_driver(&empty).await, Err(DriverError::InvalidConfig(_))));

        let remote = StorageConfig::Remote { driver_name: "sftp".into(), location: "x".into() };
        assert!(matches!(manager.get_driver(&remote).await, Err(DriverError::Unsupported("remote"))));
    }
}
