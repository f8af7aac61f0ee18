//! S3驱动核心实现
//!
//! - Objects are read and written whole; rust-s3 returns complete responses
//! - 404 from any call is reported as `StorageError::NotExist`

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::Region;

use crate::storage::{bytes_stream, collect_stream, ByteStream, Stat, StorageDriver, StorageError, StorageResult};
use crate::utils::{base_name, determine_content_type};
use super::config::S3Config;

/// S3驱动
pub struct S3Driver {
    config: S3Config,
    bucket: Box<Bucket>,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(config: S3Config) -> Result<Self> {
        let bucket = Self::create_bucket(&config)?;
        Ok(Self { config, bucket })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        ).map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url(),
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

        let bucket = if config.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }

    fn object_key(path: &str) -> &str {
        path.trim_start_matches('/')
    }
}

/// Map a rust-s3 error, folding HTTP 404 into NotExist / 错误转换
fn s3_error(err: S3Error, action: &str) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotExist,
        other => StorageError::backend(anyhow!("S3 {}失败: {}", action, other)),
    }
}

/// Map a non-success status code / 状态码检查
fn check_status(code: u16, action: &str) -> StorageResult<()> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotExist),
        other => Err(StorageError::backend(anyhow!("S3 {}失败: HTTP {}", action, other))),
    }
}

fn parse_time(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| {
            DateTime::parse_from_rfc3339(v)
                .or_else(|_| DateTime::parse_from_rfc2822(v))
                .ok()
        })
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &str {
        "s3"
    }

    async fn save(&self, path: &str, content: ByteStream, content_type: Option<&str>) -> StorageResult<()> {
        let key = Self::object_key(path);
        let content_type = determine_content_type(content_type, path);
        let data = collect_stream(content).await.map_err(StorageError::backend)?;

        let resp = self
            .bucket
            .put_object_with_content_type(key, &data, &content_type)
            .await
            .map_err(|e| s3_error(e, "上传"))?;
        check_status(resp.status_code(), "上传")?;

        tracing::debug!("S3 put: bucket={}, key={}, size={}", self.config.bucket, key, data.len());
        Ok(())
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let key = Self::object_key(path);
        let (head, code) = self
            .bucket
            .head_object(key)
            .await
            .map_err(|e| s3_error(e, "获取对象信息"))?;
        check_status(code, "获取对象信息")?;

        Ok(Stat {
            name: base_name(key).to_string(),
            path: key.to_string(),
            size: head.content_length.unwrap_or(0).max(0) as u64,
            modified_time: parse_time(head.last_modified.as_deref()),
            content_type: determine_content_type(head.content_type.as_deref(), key),
        })
    }

    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        let key = Self::object_key(path);
        let resp = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| s3_error(e, "获取对象"))?;
        check_status(resp.status_code(), "获取对象")?;

        Ok(bytes_stream(Bytes::copy_from_slice(resp.bytes())))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        // S3 DeleteObject succeeds for missing keys, so check first
        self.stat(path).await?;

        let key = Self::object_key(path);
        let resp = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| s3_error(e, "删除对象"))?;
        check_status(resp.status_code(), "删除对象")
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Stat>> {
        let prefix = Self::object_key(prefix).to_string();
        let results = self
            .bucket
            .list(prefix, None)
            .await
            .map_err(|e| s3_error(e, "列出对象"))?;

        let mut stats = Vec::new();
        for result in results {
            for obj in result.contents {
                // 跳过目录标记
                if obj.key.ends_with('/') {
                    continue;
                }
                stats.push(Stat {
                    name: base_name(&obj.key).to_string(),
                    size: obj.size,
                    modified_time: parse_time(Some(&obj.last_modified)),
                    content_type: determine_content_type(None, &obj.key),
                    path: obj.key,
                });
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status(200, "x").is_ok());
        assert!(check_status(204, "x").is_ok());
        assert!(check_status(404, "x").unwrap_err().is_not_exist());
        assert!(!check_status(500, "x").unwrap_err().is_not_exist());
    }

    #[test]
    fn test_s3_error_mapping() {
        assert!(s3_error(S3Error::HttpFailWithBody(404, "NoSuchKey".into()), "x").is_not_exist());
        assert!(!s3_error(S3Error::HttpFailWithBody(403, "Denied".into()), "x").is_not_exist());
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time(Some("2009-10-12T17:50:30.000Z"));
        assert_eq!(t.to_rfc3339(), "2009-10-12T17:50:30+00:00");
        let t = parse_time(Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(t.timestamp(), 1445412480);
    }

    #[test]
    fn test_driver_builds_without_network() {
        let config = S3Config {
            bucket: "media".into(),
            endpoint: "localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: "minio".into(),
            secret_key: "minio123".into(),
            ssl: false,
            path_style: true,
        };
        let driver = S3Driver::new(config).unwrap();
        assert_eq!(driver.name(), "s3");
        assert_eq!(S3Driver::object_key("/a/b.mp4"), "a/b.mp4");
    }
}
