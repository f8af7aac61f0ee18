//! Local filesystem driver / 本地文件系统驱动

mod driver;

pub use driver::LocalDriver;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::storage::manager::{mismatched, DriverFactory};
use crate::storage::{StorageConfig, StorageDriver};

pub struct LocalDriverFactory;

impl DriverFactory for LocalDriverFactory {
    fn driver_type(&self) -> &'static str {
        "filesystem"
    }

    fn create_driver(&self, config: &StorageConfig) -> Result<Box<dyn StorageDriver>> {
        let StorageConfig::Filesystem { root } = config else {
            return Err(mismatched(self.driver_type(), config));
        };
        if root.trim().is_empty() {
            return Err(anyhow!("filesystem root is empty"));
        }

        let root = PathBuf::from(root);
        // Factory is sync, create the root up front / 同步创建根目录
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Box::new(LocalDriver::new(root)))
    }
}
