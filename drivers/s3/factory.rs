//! S3驱动工厂

use anyhow::Result;

use crate::storage::manager::{mismatched, DriverFactory};
use crate::storage::{StorageConfig, StorageDriver};
use super::config::S3Config;
use super::driver::S3Driver;

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn create_driver(&self, config: &StorageConfig) -> Result<Box<dyn StorageDriver>> {
        if !matches!(config, StorageConfig::S3 { .. }) {
            return Err(mismatched(self.driver_type(), config));
        }
        let config = S3Config::from_storage_config(config)?;
        Ok(Box::new(S3Driver::new(config)?))
    }
}
