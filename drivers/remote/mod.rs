//! Remote connectors through the rclone CLI / rclone 远程驱动

mod driver;

pub use driver::{RcloneDriver, remote_root};

use anyhow::{anyhow, Result};

use crate::storage::manager::{mismatched, DriverFactory};
use crate::storage::{StorageConfig, StorageDriver};

pub struct RemoteDriverFactory {
    binary: String,
}

impl RemoteDriverFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl DriverFactory for RemoteDriverFactory {
    fn driver_type(&self) -> &'static str {
        "remote"
    }

    fn create_driver(&self, config: &StorageConfig) -> Result<Box<dyn StorageDriver>> {
        let StorageConfig::Remote { driver_name, location } = config else {
            return Err(mismatched(self.driver_type(), config));
        };
        let driver_name = driver_name.trim();
        if driver_name.is_empty() {
            return Err(anyhow!("remote driverName is empty"));
        }
        if driver_name.contains(':') {
            return Err(anyhow!("remote driverName must not contain ':'"));
        }

        Ok(Box::new(RcloneDriver::new(&self.binary, remote_root(driver_name, location))))
    }
}
