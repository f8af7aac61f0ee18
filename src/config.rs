//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::StorageConfig;

/// Environment variable overriding the config file path / 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "STORAGE_GATEWAY_CONFIG";

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Upload handling / 上传配置
    pub upload: UploadConfig,
    /// Delete handling / 删除配置
    pub delete: DeleteConfig,
    /// Active upload streaming / 流式上传配置
    pub streaming: StreamingConfig,
    /// Storage backends / 存储配置
    pub storage: StorageSettings,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
    /// Upper bound for draining pools on shutdown / 关闭时等待任务的超时
    pub shutdown_timeout_secs: u64,
}

/// How write requests report completion / 写入完成语义
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Respond once the pool accepted the task; failures are only logged
    #[default]
    Detached,
    /// Respond after the task finished, reporting its error
    Durable,
}

/// Upload configuration / 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum buffered request body in bytes / 最大请求体
    pub max_body_size: usize,
    /// Concurrent upload tasks / 上传并发数
    pub pool_size: usize,
    /// Queued upload tasks, defaults to twice the pool size / 上传队列容量
    pub queue_capacity: Option<usize>,
    pub write_mode: WriteMode,
}

/// Delete configuration / 删除配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    pub pool_size: usize,
    pub queue_capacity: Option<usize>,
}

/// Active upload streaming configuration / 流式上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes appended or copied per step / 每次读写的块大小
    pub chunk_size: usize,
    /// Reader poll interval / 读取轮询间隔
    pub poll_interval_ms: u64,
    /// Expired entry sweep interval / 过期清理间隔
    pub sweep_interval_secs: u64,
    /// TTL when the upload sends no `Cache-Control: max-age`; null means no expiry
    pub default_max_age_secs: Option<u64>,
    /// Whether the sweep may evict uploads that are still receiving
    pub evict_active: bool,
}

/// Storage configuration / 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend used when a request carries no credential / 默认存储
    pub default: Option<StorageConfig>,
    /// Cached drivers / 驱动缓存数量
    pub driver_cache_size: usize,
    /// rclone executable for remote backends / rclone 可执行文件
    pub rclone_binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_body_size: 50 * 1024 * 1024,
            pool_size: 1,
            queue_capacity: None,
            write_mode: WriteMode::Detached,
        }
    }
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            queue_capacity: None,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            poll_interval_ms: 100,
            sweep_interval_secs: 300,
            default_max_age_secs: None,
            evict_active: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            default: None,
            driver_cache_size: 64,
            rclone_binary: "rclone".to_string(),
        }
    }
}

impl StreamingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn default_max_age(&self) -> Option<Duration> {
        self.default_max_age_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Reject settings the server cannot run with / 校验配置
    pub fn validate(&self) -> Result<(), String> {
        self.get_bind_address()
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid bind address {}: {}", self.get_bind_address(), e))?;

        if self.upload.pool_size == 0 || self.delete.pool_size == 0 {
            return Err("Pool size must be at least 1".to_string());
        }
        if self.upload.queue_capacity == Some(0) || self.delete.queue_capacity == Some(0) {
            return Err("Queue capacity must be at least 1".to_string());
        }
        if self.upload.max_body_size == 0 {
            return Err("upload.max_body_size must be positive".to_string());
        }
        if self.streaming.chunk_size == 0 {
            return Err("streaming.chunk_size must be positive".to_string());
        }
        if self.streaming.poll_interval_ms == 0 || self.streaming.sweep_interval_secs == 0 {
            return Err("Streaming intervals must be positive".to_string());
        }
        if self.storage.driver_cache_size == 0 {
            return Err("storage.driver_cache_size must be positive".to_string());
        }
        Ok(())
    }
}

/// Get the config file path / 获取配置文件路径
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    load_config_from(&get_config_path())
}

/// Load configuration from an explicit path / 从指定路径加载配置
pub fn load_config_from(config_path: &Path) -> Result<AppConfig, String> {
    let config = if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        config
    } else {
        // Create default config / 创建默认配置
        let config = AppConfig::default();
        save_config(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        config
    };

    config.validate()?;
    Ok(config)
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}
