use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::storage::{collect_stream, ByteStream, Stat, StorageDriver, StorageError, StorageResult};
use crate::utils::{base_name, determine_content_type};
use super::auth::{ServiceAccountKey, TokenProvider};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

// ============ API 数据结构 ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    /// int64 encoded as a JSON string
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

impl GcsObject {
    fn into_stat(self) -> Stat {
        let modified_time = self
            .updated
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Stat {
            name: base_name(&self.name).to_string(),
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            modified_time,
            content_type: determine_content_type(self.content_type.as_deref(), &self.name),
            path: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

// ============ 驱动主体 ============

/// Google Cloud Storage 驱动
pub struct GcsDriver {
    bucket: String,
    endpoint: String,
    client: Client,
    /// None when running anonymously
    tokens: Option<TokenProvider>,
}

impl GcsDriver {
    pub fn new(bucket: &str, endpoint: Option<&str>, key: Option<ServiceAccountKey>) -> Self {
        let client = Client::new();
        let endpoint = endpoint
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();

        Self {
            bucket: bucket.to_string(),
            endpoint,
            tokens: key.map(|k| TokenProvider::new(k, client.clone())),
            client,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(path.trim_start_matches('/'))
        )
    }

    fn objects_url(&self) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }

    /// Attach the bearer token if authenticated / 添加认证头
    async fn authorize(&self, request: RequestBuilder) -> StorageResult<RequestBuilder> {
        match &self.tokens {
            Some(tokens) => {
                let token = tokens.access_token().await.map_err(StorageError::Backend)?;
                Ok(request.bearer_auth(token))
            }
            None => Ok(request),
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> StorageResult<Response> {
        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(StorageError::backend)?;
        check_response(response, action).await
    }
}

/// 404 becomes NotExist, other failures keep the response body / 响应检查
async fn check_response(response: Response, action: &str) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotExist);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::backend(anyhow!("GCS {}失败: HTTP {} {}", action, status, body)))
}

#[async_trait]
impl StorageDriver for GcsDriver {
    fn name(&self) -> &str {
        "gcs"
    }

    async fn save(&self, path: &str, content: ByteStream, content_type: Option<&str>) -> StorageResult<()> {
        let name = path.trim_start_matches('/');
        let content_type = determine_content_type(content_type, name);
        // Body::wrap_stream needs a Sync stream, so send the collected buffer
        let data = collect_stream(content).await.map_err(StorageError::backend)?;
        let request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", name)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);

        self.send(request, "上传").await?;
        tracing::debug!("GCS upload: bucket={}, name={}", self.bucket, name);
        Ok(())
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let request = self.client.get(self.object_url(path));
        let object: GcsObject = self
            .send(request, "获取对象信息")
            .await?
            .json()
            .await
            .map_err(StorageError::backend)?;
        Ok(object.into_stat())
    }

    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        let request = self.client.get(self.object_url(path)).query(&[("alt", "media")]);
        let response = self.send(request, "下载").await?;

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let request = self.client.delete(self.object_url(path));
        self.send(request, "删除").await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Stat>> {
        let prefix = prefix.trim_start_matches('/');
        let mut stats = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.objects_url()).query(&[("prefix", prefix)]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ObjectList = self
                .send(request, "列出对象")
                .await?
                .json()
                .await
                .map_err(StorageError::backend)?;

            stats.extend(
                page.items
                    .into_iter()
                    .filter(|o| !o.name.ends_with('/'))
                    .map(GcsObject::into_stat),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let driver = GcsDriver::new("media", None, None);
        assert_eq!(
            driver.object_url("/video/part1.mp4"),
            "https://storage.googleapis.com/storage/v1/b/media/o/video%2Fpart1.mp4"
        );
        assert_eq!(driver.upload_url(), "https://storage.googleapis.com/upload/storage/v1/b/media/o");

        let driver = GcsDriver::new("media", Some("http://localhost:4443/"), None);
        assert_eq!(driver.objects_url(), "http://localhost:4443/storage/v1/b/media/o");
    }

    #[test]
    fn test_object_into_stat() {
        let object: GcsObject = serde_json::from_str(
            r#"{"name":"video/part1.mp4","size":"1024","updated":"2024-01-02T03:04:05.000Z","contentType":"video/mp4"}"#,
        )
        .unwrap();
        let stat = object.into_stat();
        assert_eq!(stat.name, "part1.mp4");
        assert_eq!(stat.path, "video/part1.mp4");
        assert_eq!(stat.size, 1024);
        assert_eq!(stat.content_type, "video/mp4");
        assert_eq!(stat.modified_time.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_object_list_defaults() {
        let page: ObjectList = serde_json::from_str(r#"{"kind":"storage#objects"}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
