use axum::http::HeaderMap;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Buffer {
    data: Vec<u8>,
    eof: bool,
    aborted: bool,
}

/// Bytes read from an upload at some offset / 读取快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Newly available bytes, possibly empty
    pub bytes: Bytes,
    pub eof: bool,
    pub aborted: bool,
}

/// An upload whose body is still arriving / 进行中的上传
///
/// The producer is the only writer. Readers copy what they need under the
/// shared lock and never hold it across an await point.
#[derive(Debug)]
pub struct ActiveUpload {
    path: String,
    content_type: String,
    headers: HeaderMap,
    created_at: Instant,
    max_age: Option<Duration>,
    buffer: RwLock<Buffer>,
}

impl ActiveUpload {
    pub fn new(
        path: impl Into<String>,
        content_type: impl Into<String>,
        headers: HeaderMap,
        max_age: Option<Duration>,
    ) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.into(),
            headers,
            created_at: Instant::now(),
            max_age,
            buffer: RwLock::new(Buffer::default()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Request headers captured when the upload began / 上传开始时的请求头
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Append a chunk. Returns `false` once the upload is complete or aborted.
    pub fn append(&self, chunk: &[u8]) -> bool {
        let mut buffer = self.buffer.write();
        if buffer.eof || buffer.aborted {
            return false;
        }
        buffer.data.extend_from_slice(chunk);
        true
    }

    /// Mark the body as fully received / 标记接收完成
    pub fn finish(&self) {
        let mut buffer = self.buffer.write();
        if !buffer.aborted {
            buffer.eof = true;
        }
    }

    /// Mark the upload as failed before completion / 标记上传失败
    pub fn abort(&self) {
        let mut buffer = self.buffer.write();
        if !buffer.eof {
            buffer.aborted = true;
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_eof(&self) -> bool {
        self.buffer.read().eof
    }

    pub fn is_aborted(&self) -> bool {
        self.buffer.read().aborted
    }

    /// Copy up to `max` bytes starting at `offset` / 从偏移量读取
    pub fn read_from(&self, offset: usize, max: usize) -> Snapshot {
        let buffer = self.buffer.read();
        let start = offset.min(buffer.data.len());
        let end = start.saturating_add(max).min(buffer.data.len());
        Snapshot {
            bytes: Bytes::copy_from_slice(&buffer.data[start..end]),
            eof: buffer.eof,
            aborted: buffer.aborted,
        }
    }

    /// Copy of the whole buffer / 完整内容
    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer.read().data)
    }

    /// Whether `created_at + max_age` has passed at `now` / 是否过期
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.max_age {
            Some(max_age) => now.saturating_duration_since(self.created_at) >= max_age,
            None => false,
        }
    }
}

/// Path to active upload map / 进行中上传的注册表
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<ActiveUpload>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing and returning any upload already at the path
    pub fn insert(&self, upload: Arc<ActiveUpload>) -> Option<Arc<ActiveUpload>> {
        self.entries.write().insert(upload.path().to_string(), upload)
    }

    pub fn get(&self, path: &str) -> Option<Arc<ActiveUpload>> {
        self.entries.read().get(path).cloned()
    }

    /// Remove the entry only if it is still `upload` / 仅移除同一个上传
    pub fn remove_if_same(&self, upload: &Arc<ActiveUpload>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(upload.path()) {
            Some(current) if Arc::ptr_eq(current, upload) => {
                entries.remove(upload.path());
                true
            }
            _ => false,
        }
    }

    /// Remove entries matching `evict`, returning their paths
    pub fn evict_where<F>(&self, mut evict: F) -> Vec<String>
    where
        F: FnMut(&ActiveUpload) -> bool,
    {
        let mut removed = Vec::new();
        self.entries.write().retain(|path, upload| {
            if evict(upload) {
                removed.push(path.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
