use axum::http::{header, HeaderMap};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::{ActiveUpload, Registry};
use crate::config::StreamingConfig;
use crate::storage::ByteStream;
use crate::utils::{determine_content_type, parse_max_age};

/// Why receiving a chunked body stopped early / 接收失败原因
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(String),
}

/// Owns the active upload registry and its expiry sweep / 流式上传协调器
///
/// `start` spawns the sweep task; `stop` cancels it and ends every tailing
/// reader. Nothing here is global, each instance is independent.
pub struct StreamingCoordinator {
    registry: Registry,
    config: StreamingConfig,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingCoordinator {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Spawn the periodic expiry sweep / 启动过期清理任务
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let coordinator = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.sweep_interval();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.sweep_expired(Instant::now());
                    }
                }
            }
            tracing::debug!("Streaming sweep stopped");
        }));

        tracing::info!(
            "Streaming coordinator started: sweep every {:?}, default max-age {:?}",
            period,
            self.config.default_max_age()
        );
    }

    /// Stop the sweep and end all tailing readers / 停止
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Streaming coordinator stopped, {} active uploads dropped", self.registry.len());
    }

    /// Register a new upload at `path`, replacing any previous one / 注册上传
    pub fn register(&self, path: &str, headers: &HeaderMap) -> Arc<ActiveUpload> {
        let header_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let max_age = headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .or_else(|| self.config.default_max_age());

        let upload = Arc::new(ActiveUpload::new(
            path,
            determine_content_type(header_type, path),
            headers.clone(),
            max_age,
        ));

        if self.registry.insert(upload.clone()).is_some() {
            tracing::debug!("Active upload replaced: {}", path);
        }
        tracing::debug!("Active upload registered: {} (max-age {:?})", path, max_age);
        upload
    }

    /// Active upload at `path`, if any / 查找进行中的上传
    pub fn lookup(&self, path: &str) -> Option<Arc<ActiveUpload>> {
        self.registry.get(path)
    }

    /// Remove `upload` after its save finished; a newer upload at the same path stays
    pub fn finalize(&self, upload: &Arc<ActiveUpload>) {
        if self.registry.remove_if_same(upload) {
            tracing::debug!("Active upload removed: {} ({} bytes)", upload.path(), upload.len());
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Evict expired entries, returning how many were removed / 清理过期上传
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let evict_active = self.config.evict_active;
        let removed = self
            .registry
            .evict_where(|upload| upload.is_expired(now) && (evict_active || upload.is_eof() || upload.is_aborted()));

        for path in &removed {
            tracing::info!("Active upload expired: {}", path);
        }
        removed.len()
    }

    /// Copy a request body into `upload` in bounded chunks / 接收请求体
    ///
    /// Marks the upload finished on success and aborted on any failure.
    pub async fn receive<S, E>(
        &self,
        upload: &ActiveUpload,
        mut body: S,
        max_size: usize,
    ) -> Result<usize, ReceiveError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let chunk_size = self.config.chunk_size.max(1);
        let mut received = 0usize;

        while let Some(frame) = body.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    upload.abort();
                    return Err(ReceiveError::Body(e.to_string()));
                }
            };

            received += frame.len();
            if received > max_size {
                upload.abort();
                return Err(ReceiveError::TooLarge { limit: max_size });
            }

            for chunk in frame.chunks(chunk_size) {
                upload.append(chunk);
            }
        }

        upload.finish();
        Ok(received)
    }

    /// Stream the upload from offset zero until it completes / 跟随读取
    ///
    /// Newly appended bytes are picked up every poll interval. The stream
    /// ends after the last byte once the upload is complete, with an error
    /// if the upload aborted, or silently when the coordinator stops.
    pub fn tail(&self, upload: Arc<ActiveUpload>) -> ByteStream {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = TailState {
            upload,
            offset: 0,
            chunk_size: self.config.chunk_size.max(1),
            interval,
            cancel: self.cancel.clone(),
            done: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                let snapshot = state.upload.read_from(state.offset, state.chunk_size);
                if !snapshot.bytes.is_empty() {
                    state.offset += snapshot.bytes.len();
                    return Some((Ok(snapshot.bytes), state));
                }
                if snapshot.aborted {
                    state.done = true;
                    let err = std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("upload of {} aborted", state.upload.path()),
                    );
                    return Some((Err(err), state));
                }
                if snapshot.eof {
                    return None;
                }

                tokio::select! {
                    _ = state.cancel.cancelled() => return None,
                    _ = state.interval.tick() => {}
                }
            }
        })
        .boxed()
    }
}

struct TailState {
    upload: Arc<ActiveUpload>,
    offset: usize,
    chunk_size: usize,
    interval: Interval,
    cancel: CancellationToken,
    done: bool,
}
