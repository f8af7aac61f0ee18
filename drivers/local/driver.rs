use async_trait::async_trait;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::storage::{ByteStream, Stat, StorageDriver, StorageError, StorageResult};
use crate::utils::{base_name, determine_content_type};

pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Resolve a relative object path under root, refusing traversal / 规范化路径
    fn normalize_path(&self, path: &str) -> StorageResult<PathBuf> {
        let path = path.trim_start_matches('/').replace('\\', "/");

        let normalized: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
        if normalized.iter().any(|component| *component == "..") {
            return Err(StorageError::backend(anyhow!("Access path exceeds root directory scope")));
        }

        Ok(self.root.join(normalized.join("/")))
    }

    /// Relative `/`-separated path of an absolute file under root / 相对路径
    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    fn to_stat(path: &str, metadata: &std::fs::Metadata) -> Stat {
        let modified_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Stat {
            name: base_name(path).to_string(),
            path: path.to_string(),
            size: metadata.len(),
            modified_time,
            content_type: determine_content_type(None, path),
        }
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn save(&self, path: &str, mut content: ByteStream, _content_type: Option<&str>) -> StorageResult<()> {
        let full_path = self.normalize_path(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(StorageError::backend)?;
        }

        let mut file = tokio::fs::File::create(&full_path).await.map_err(StorageError::backend)?;
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(StorageError::backend)?;
            file.write_all(&chunk).await.map_err(StorageError::backend)?;
        }
        file.flush().await.map_err(StorageError::backend)?;

        tracing::debug!("Local save: {} -> {:?}", path, full_path);
        Ok(())
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let full_path = self.normalize_path(path)?;
        let metadata = tokio::fs::metadata(&full_path).await?;
        // Directories are not objects
        if !metadata.is_file() {
            return Err(StorageError::NotExist);
        }
        Ok(Self::to_stat(path, &metadata))
    }

    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        let full_path = self.normalize_path(path)?;
        let metadata = tokio::fs::metadata(&full_path).await?;
        if !metadata.is_file() {
            return Err(StorageError::NotExist);
        }
        let file = tokio::fs::File::open(&full_path).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full_path = self.normalize_path(path)?;
        tokio::fs::remove_file(full_path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Stat>> {
        let prefix = prefix.trim_start_matches('/');
        // Walk from the directory part of the prefix; the rest is matched by name
        let dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.normalize_path(dir)?;
        if !tokio::fs::metadata(&start).await?.is_dir() {
            return Err(StorageError::NotExist);
        }

        let mut result = Vec::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await.map_err(StorageError::backend)?;
            while let Some(entry) = entries.next_entry().await.map_err(StorageError::backend)? {
                let full = entry.path();
                let Some(rel) = self.relative(&full) else { continue };
                let metadata = entry.metadata().await.map_err(StorageError::backend)?;

                if metadata.is_dir() {
                    // Descend only where something below can still match
                    if rel.starts_with(prefix) || prefix.starts_with(&format!("{}/", rel)) {
                        pending.push(full);
                    }
                } else if metadata.is_file() && rel.starts_with(prefix) {
                    result.push(Self::to_stat(&rel, &metadata));
                }
            }
        }

        // A prefix that names nothing is missing; an empty directory is not
        if result.is_empty() && !self.normalize_path(prefix)?.is_dir() {
            return Err(StorageError::NotExist);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{bytes_stream, collect_stream};
    use bytes::Bytes;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(dir.path().to_path_buf());
        (dir, driver)
    }

    #[tokio::test]
    async fn test_save_stat_open_delete() {
        let (_dir, driver) = driver();

        driver
            .save("a/b/c.json", bytes_stream(Bytes::from_static(b"{}")), None)
            .await
            .unwrap();

        let stat = driver.stat("a/b/c.json").await.unwrap();
        assert_eq!(stat.name, "c.json");
        assert_eq!(stat.path, "a/b/c.json");
        assert_eq!(stat.size, 2);
        assert_eq!(stat.content_type, "application/json");

        let body = collect_stream(driver.open("a/b/c.json").await.unwrap()).await.unwrap();
        assert_eq!(&body[..], b"{}");

        driver.delete("a/b/c.json").await.unwrap();
        assert!(driver.stat("a/b/c.json").await.unwrap_err().is_not_exist());
        assert!(driver.open("a/b/c.json").await.err().unwrap().is_not_exist());
        assert!(driver.delete("a/b/c.json").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_stat_directory_is_not_object() {
        let (_dir, driver) = driver();
        driver.save("dir/file.txt", bytes_stream(Bytes::from_static(b"x")), None).await.unwrap();
        assert!(driver.stat("dir").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let (_dir, driver) = driver();
        for path in ["video/part1.mp4", "video/part2.mp4", "video/hd/part3.mp4", "videos/other.mp4", "audio/a.mp3"] {
            driver.save(path, bytes_stream(Bytes::from_static(b"data")), None).await.unwrap();
        }

        let mut paths: Vec<String> = driver.list("video/").await.unwrap().into_iter().map(|s| s.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["video/hd/part3.mp4", "video/part1.mp4", "video/part2.mp4"]);

        let all = driver.list("video").await.unwrap();
        assert_eq!(all.len(), 4);

        let parts = driver.list("video/part").await.unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|s| s.content_type == "video/mp4" && s.size == 4));

        assert!(driver.list("missing/dir/").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_list_missing_prefix_at_any_depth() {
        let (_dir, driver) = driver();
        driver.save("video/part1.mp4", bytes_stream(Bytes::from_static(b"data")), None).await.unwrap();

        assert!(driver.list("missingdir").await.unwrap_err().is_not_exist());
        assert!(driver.list("missingdir/deeper").await.unwrap_err().is_not_exist());
        assert!(driver.list("video/nothing").await.unwrap_err().is_not_exist());

        std::fs::create_dir_all(driver.root().join("empty")).unwrap();
        assert!(driver.list("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let (_dir, driver) = driver();
        assert!(driver.stat("../etc/passwd").await.is_err());
    }
}
