//! S3驱动配置

use anyhow::{anyhow, Result};

use crate::storage::StorageConfig;

/// Resolved S3 settings / S3配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址, with or without scheme
    /// MinIO: localhost:9000
    pub endpoint: String,
    /// 区域
    pub region: String,
    /// Access Key ID
    pub access_key: String,
    /// Secret Access Key
    pub secret_key: String,
    /// Use https when the endpoint carries no scheme
    pub ssl: bool,
    /// 强制使用路径风格（MinIO等需要）
    pub path_style: bool,
}

impl S3Config {
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self> {
        let StorageConfig::S3 { endpoint, access_key, secret_key, bucket, ssl, region, path_style } = config else {
            return Err(anyhow!("not an s3 config: {}", config.kind()));
        };

        let cfg = Self {
            bucket: bucket.trim().to_string(),
            endpoint: endpoint.trim().to_string(),
            region: region.trim().to_string(),
            access_key: access_key.clone(),
            secret_key: secret_key.clone(),
            ssl: *ssl,
            path_style: *path_style,
        };

        if cfg.bucket.is_empty() {
            return Err(anyhow!("s3 bucket is empty"));
        }
        if cfg.endpoint.is_empty() {
            return Err(anyhow!("s3 endpoint is empty"));
        }
        Ok(cfg)
    }

    /// Endpoint URL with scheme / 带协议的端点地址
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.trim_end_matches('/').to_string();
        }
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_config(endpoint: &str, ssl: bool) -> StorageConfig {
        StorageConfig::S3 {
            endpoint: endpoint.into(),
            access_key: "minio".into(),
            secret_key: "minio123".into(),
            bucket: "media".into(),
            ssl,
            region: "us-east-1".into(),
            path_style: true,
        }
    }

    #[test]
    fn test_endpoint_url() {
        let cfg = S3Config::from_storage_config(&storage_config("localhost:9000", false)).unwrap();
        assert_eq!(cfg.endpoint_url(), "http://localhost:9000");

        let cfg = S3Config::from_storage_config(&storage_config("s3.example.com/", true)).unwrap();
        assert_eq!(cfg.endpoint_url(), "https://s3.example.com");

        let cfg = S3Config::from_storage_config(&storage_config("http://minio:9000", true)).unwrap();
        assert_eq!(cfg.endpoint_url(), "http://minio:9000");
    }

    #[test]
    fn test_rejects_missing_fields() {
        assert!(S3Config::from_storage_config(&storage_config("", true)).is_err());
        let fs = StorageConfig::Filesystem { root: "/tmp".into() };
        assert!(S3Config::from_storage_config(&fs).is_err());
    }
}
