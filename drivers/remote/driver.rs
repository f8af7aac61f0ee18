use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;

use crate::storage::{ByteStream, Stat, StorageDriver, StorageError, StorageResult};
use crate::utils::{base_name, determine_content_type};

/// rclone exit codes for "directory not found" and "file not found"
const EXIT_DIR_NOT_FOUND: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;

/// On-the-fly rclone remote `:<driver>:<location>` / 连接字符串
pub fn remote_root(driver_name: &str, location: &str) -> String {
    format!(":{}:{}", driver_name.trim(), location.trim().trim_end_matches('/'))
}

/// Entry printed by `rclone lsjson`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsEntry {
    path: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    is_dir: bool,
}

impl LsEntry {
    fn into_stat(self, path: String) -> Stat {
        let modified_time = self
            .mod_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Stat {
            name: base_name(&path).to_string(),
            size: self.size.max(0) as u64,
            modified_time,
            content_type: determine_content_type(self.mime_type.as_deref(), &path),
            path,
        }
    }
}

/// rclone backed driver / rclone 驱动
pub struct RcloneDriver {
    binary: String,
    root: String,
}

impl RcloneDriver {
    pub fn new(binary: &str, root: String) -> Self {
        Self {
            binary: binary.to_string(),
            root,
        }
    }

    /// Remote path for a relative object path / 远程完整路径
    fn target(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.root.clone()
        } else if self.root.ends_with(':') {
            format!("{}{}", self.root, path)
        } else {
            format!("{}/{}", self.root, path)
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout / 执行命令
    async fn run(&self, args: &[&str]) -> StorageResult<Vec<u8>> {
        tracing::debug!("rclone {}", args.join(" "));
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| StorageError::backend(anyhow!("启动 rclone 失败: {}", e)))?;

        check_exit(output.status, &output.stderr, args.first().copied().unwrap_or(""))?;
        Ok(output.stdout)
    }
}

/// Map an rclone exit status / 退出码转换
fn check_exit(status: ExitStatus, stderr: &[u8], action: &str) -> StorageResult<()> {
    match status.code() {
        Some(0) => Ok(()),
        Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND) => Err(StorageError::NotExist),
        code => Err(StorageError::backend(anyhow!(
            "rclone {} failed ({:?}): {}",
            action,
            code,
            String::from_utf8_lossy(stderr).trim()
        ))),
    }
}

/// Stream stdout of a running `rclone cat`, failing at the end if it exits non-zero
fn child_stream(mut child: Child) -> StorageResult<ByteStream> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StorageError::backend(anyhow!("rclone stdout not captured")))?;

    let body = ReaderStream::new(stdout);
    let tail = futures::stream::once(async move {
        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok::<Option<Bytes>, std::io::Error>(None)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("rclone cat failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
            ))
        }
    });

    let stream = body
        .map(|chunk| chunk.map(Some))
        .chain(tail)
        .filter_map(|item| async move { item.transpose() });
    Ok(stream.boxed())
}

#[async_trait]
impl StorageDriver for RcloneDriver {
    fn name(&self) -> &str {
        "remote"
    }

    async fn save(&self, path: &str, mut content: ByteStream, _content_type: Option<&str>) -> StorageResult<()> {
        let target = self.target(path);
        let mut child = self
            .command(&["rcat", &target])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| StorageError::backend(anyhow!("启动 rclone 失败: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| StorageError::backend(anyhow!("rclone stdin not captured")))?;

        let mut copy_result = Ok(());
        while let Some(chunk) = content.next().await {
            let written = match chunk {
                Ok(chunk) => stdin.write_all(&chunk).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                copy_result = Err(e);
                break;
            }
        }
        // Closing stdin tells rcat the upload is complete
        drop(stdin);

        if let Err(e) = copy_result {
            let _ = child.kill().await;
            return Err(StorageError::backend(e));
        }

        let output = child.wait_with_output().await.map_err(StorageError::backend)?;
        check_exit(output.status, &output.stderr, "rcat")
    }

    async fn stat(&self, path: &str) -> StorageResult<Stat> {
        let target = self.target(path);
        let stdout = self.run(&["lsjson", "--stat", &target]).await?;
        let entry: LsEntry = serde_json::from_slice(&stdout).map_err(StorageError::backend)?;
        if entry.is_dir {
            return Err(StorageError::NotExist);
        }
        Ok(entry.into_stat(path.trim_matches('/').to_string()))
    }

    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        // `rclone cat` prints nothing for missing files, so stat first
        self.stat(path).await?;

        let target = self.target(path);
        let child = self
            .command(&["cat", &target])
            .spawn()
            .map_err(|e| StorageError::backend(anyhow!("启动 rclone 失败: {}", e)))?;
        child_stream(child)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let target = self.target(path);
        self.run(&["deletefile", &target]).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<Stat>> {
        let prefix = prefix.trim_start_matches('/');
        let dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };

        let target = self.target(dir);
        let stdout = self.run(&["lsjson", "-R", "--files-only", &target]).await?;
        let entries: Vec<LsEntry> = serde_json::from_slice(&stdout).map_err(StorageError::backend)?;

        Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| {
                let full = if dir.is_empty() {
                    e.path.clone()
                } else {
                    format!("{}/{}", dir, e.path)
                };
                full.starts_with(prefix).then(|| e.into_stat(full))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn exit(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_remote_root_and_target() {
        let driver = RcloneDriver::new("rclone", remote_root("sftp", "host/srv/"));
        assert_eq!(driver.target("/a/b.mp4"), ":sftp:host/srv/a/b.mp4");
        assert_eq!(driver.target(""), ":sftp:host/srv");

        let driver = RcloneDriver::new("rclone", remote_root("memory", ""));
        assert_eq!(driver.target("a.txt"), ":memory:a.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_check_exit() {
        assert!(check_exit(exit(0), b"", "cat").is_ok());
        assert!(check_exit(exit(EXIT_DIR_NOT_FOUND), b"", "lsjson").unwrap_err().is_not_exist());
        assert!(check_exit(exit(EXIT_FILE_NOT_FOUND), b"", "deletefile").unwrap_err().is_not_exist());
        let err = check_exit(exit(1), b"syntax error", "rcat").unwrap_err();
        assert!(!err.is_not_exist());
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_ls_entry() {
        let entries: Vec<LsEntry> = serde_json::from_str(
            r#"[{"Path":"hd/part3.mp4","Name":"part3.mp4","Size":12,"MimeType":"video/mp4","ModTime":"2024-01-02T03:04:05.123456789Z","IsDir":false}]"#,
        )
        .unwrap();
        let stat = entries.into_iter().next().unwrap().into_stat("video/hd/part3.mp4".into());
        assert_eq!(stat.name, "part3.mp4");
        assert_eq!(stat.size, 12);
        assert_eq!(stat.content_type, "video/mp4");
        assert_eq!(stat.modified_time.timestamp(), 1704164645);
    }

    #[tokio::test]
    async fn test_missing_binary_is_backend_error() {
        let driver = RcloneDriver::new("/nonexistent/rclone", remote_root("memory", ""));
        let err = driver.delete("a.txt").await.unwrap_err();
        assert!(!err.is_not_exist());
    }
}
