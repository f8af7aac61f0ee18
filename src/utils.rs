/// Path and header utility functions / 路径与请求头工具函数

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Generic binary MIME type used when nothing better is known / 默认二进制类型
pub const OCTET_STREAM: &str = "application/octet-stream";

static MAX_AGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"max-age=(\d+)").expect("max-age pattern is valid")
});

/// Invalid request path / 非法请求路径
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path: {0}")]
pub struct PathInvalid(pub String);

/// Validate and normalize a request path / 校验并规范化请求路径
///
/// 1. Percent-decode the raw path / 解码百分号编码
/// 2. Strip one leading `/` / 去掉开头的 /
/// 3. Reject empty paths and any `..` segment / 拒绝空路径和 .. 段
/// 4. Reject paths whose cleaned form differs from the input / 拒绝非规范路径
pub fn validate_path(raw_path: &str) -> Result<String, PathInvalid> {
    let decoded = urlencoding::decode(raw_path)
        .map_err(|_| PathInvalid(raw_path.to_string()))?;
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);

    if path.is_empty() {
        return Err(PathInvalid(raw_path.to_string()));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(PathInvalid(raw_path.to_string()));
    }
    if clean_path(path) != path {
        return Err(PathInvalid(raw_path.to_string()));
    }

    Ok(path.to_string())
}

/// Clean relative path: drop empty and `.` segments / 清理相对路径
fn clean_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Get file extension (lowercase) / 获取文件扩展名
pub fn get_ext(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Last path segment / 路径最后一段
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// MIME type derived from the path extension, if any / 根据扩展名推断 MIME
pub fn mime_from_path(path: &str) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// Explicit header value, else extension MIME, else generic binary / 确定内容类型
pub fn determine_content_type(header_type: Option<&str>, path: &str) -> String {
    if let Some(ct) = header_type.map(str::trim).filter(|ct| !ct.is_empty()) {
        return ct.to_string();
    }
    mime_from_path(path).unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Parse `max-age=<seconds>` from a Cache-Control value / 解析 max-age
pub fn parse_max_age(cache_control: &str) -> Option<Duration> {
    MAX_AGE_RE
        .captures(cache_control)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}
