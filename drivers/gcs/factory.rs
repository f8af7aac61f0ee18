//! GCS 驱动工厂

use anyhow::{anyhow, Result};

use crate::storage::manager::{mismatched, DriverFactory};
use crate::storage::{StorageConfig, StorageDriver};
use super::auth::ServiceAccountKey;
use super::driver::GcsDriver;

pub struct GcsDriverFactory;

impl DriverFactory for GcsDriverFactory {
    fn driver_type(&self) -> &'static str {
        "gcs"
    }

    fn create_driver(&self, config: &StorageConfig) -> Result<Box<dyn StorageDriver>> {
        let StorageConfig::Gcs { credentials_file, bucket, endpoint } = config else {
            return Err(mismatched(self.driver_type(), config));
        };
        if bucket.trim().is_empty() {
            return Err(anyhow!("gcs bucket is empty"));
        }

        // No credentials file means anonymous access (emulators, public buckets)
        let key = match credentials_file.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(file) => Some(ServiceAccountKey::from_file(file)?),
            None => None,
        };

        Ok(Box::new(GcsDriver::new(bucket.trim(), endpoint.as_deref(), key)))
    }
}
