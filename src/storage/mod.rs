use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod credentials;
pub mod manager;

pub use manager::{DriverBox, StorageManager};

/// Byte stream passed into `save` and returned from `open` / 字节流
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error shared by every backend / 所有后端共用的存储错误
///
/// Each driver translates its native "object not found" signal into
/// `NotExist` at its own boundary; everything else is `Backend`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file does not exist")]
    NotExist,

    #[error("backend failure: {0:#}")]
    Backend(anyhow::Error),
}

impl StorageError {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        Self::Backend(err.into())
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotExist
        } else {
            Self::Backend(err.into())
        }
    }
}

/// Object metadata returned by `stat` and `list` / 对象元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub content_type: String,
}

/// Backend configuration, discriminated by `driver` / 后端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum StorageConfig {
    #[serde(alias = "fs")]
    Filesystem { root: String },

    #[serde(rename_all = "camelCase")]
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        #[serde(default = "default_true")]
        ssl: bool,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default = "default_true")]
        path_style: bool,
    },

    #[serde(rename_all = "camelCase")]
    Gcs {
        #[serde(default)]
        credentials_file: Option<String>,
        bucket: String,
        #[serde(default)]
        endpoint: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Remote {
        driver_name: String,
        location: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl StorageConfig {
    /// Backend kind name / 后端类型名称
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem { .. } => "filesystem",
            Self::S3 { .. } => "s3",
            Self::Gcs { .. } => "gcs",
            Self::Remote { .. } => "remote",
        }
    }
}

/// Storage driver interface / 存储驱动接口
///
/// Implementations must be safe for concurrent use by many tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Write `content` to `path`. `content_type` falls back to the extension
    /// MIME type, then to `application/octet-stream`.
    async fn save(&self, path: &str, content: ByteStream, content_type: Option<&str>) -> StorageResult<()>;

    /// Object metadata / 获取元数据
    async fn stat(&self, path: &str) -> StorageResult<Stat>;

    /// Open object for reading / 打开对象读取
    async fn open(&self, path: &str) -> StorageResult<ByteStream>;

    /// Delete object / 删除对象
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Every object whose path starts with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> StorageResult<Vec<Stat>>;
}

/// Wrap an in-memory buffer as a single-chunk byte stream / 内存数据转字节流
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a byte stream into one buffer / 读取全部字节
pub async fn collect_stream(mut stream: ByteStream) -> std::io::Result<Bytes> {
    use futures::StreamExt;

    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let cfg: StorageConfig = serde_json::from_str(r#"{"driver":"fs","root":"/data"}"#).unwrap();
        assert_eq!(cfg, StorageConfig::Filesystem { root: "/data".into() });

        let cfg: StorageConfig = serde_json::from_str(
            r#"{"driver":"s3","endpoint":"localhost:9000","accessKey":"a","secretKey":"b","bucket":"media","ssl":false}"#,
        )
        .unwrap();
        match cfg {
            StorageConfig::S3 { ssl, region, path_style, .. } => {
                assert!(!ssl);
                assert_eq!(region, "us-east-1");
                assert!(path_style);
            }
            other => panic!("unexpected config: {:?}", other),
        }

        let cfg: StorageConfig =
            serde_json::from_str(r#"{"driver":"remote","driverName":"sftp","location":"host:/srv"}"#).unwrap();
        assert_eq!(cfg.kind(), "remote");

        assert!(serde_json::from_str::<StorageConfig>(r#"{"driver":"ftp"}"#).is_err());
    }

    #[test]
    fn test_io_error_translation() {
        let err: StorageError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(err.is_not_exist());
        let err: StorageError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(!err.is_not_exist());
    }

    #[test]
    fn test_stat_serializes_camel_case() {
        let stat = Stat {
            name: "a.json".into(),
            path: "dir/a.json".into(),
            size: 3,
            modified_time: DateTime::from_timestamp(0, 0).unwrap(),
            content_type: "application/json".into(),
        };
        let value = serde_json::to_value(&stat).unwrap();
        assert_eq!(value["modifiedTime"], "1970-01-01T00:00:00Z");
        assert_eq!(value["contentType"], "application/json");
    }
}
