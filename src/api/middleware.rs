//! Request path validation and credential resolution / 路径校验与凭证解析

use std::collections::HashMap;

use axum::extract::{Query, Request};
use axum::http::{header, HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use storage_gateway::error::GatewayError;
use storage_gateway::storage::{credentials, StorageConfig};
use storage_gateway::utils::validate_path;

/// Header carrying the opaque storage credential / 存储凭证请求头
pub const STORAGE_CONFIG_HEADER: &str = "x-storage-config";

/// Normalized object path stored in request extensions / 已校验的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath(pub String);

/// Reject bad paths before anything else runs / 路径校验中间件
pub async fn path_validation(mut req: Request, next: Next) -> Response {
    match validate_path(req.uri().path()) {
        Ok(path) => {
            req.extensions_mut().insert(ValidatedPath(path));
            next.run(req).await
        }
        Err(e) => GatewayError::from(e).into_response(),
    }
}

/// Pick the backend a request targets / 解析请求的存储配置
///
/// Lookup order: `Authorization: Bearer`, `X-Storage-Config`, `?token=`,
/// then `User-Agent`. An explicit credential that does not decode is an
/// error; a user agent that does not decode is ignored. Without any usable
/// credential the server default applies.
pub fn resolve_storage_config(
    headers: &HeaderMap,
    uri: &Uri,
    default: Option<&StorageConfig>,
) -> Result<StorageConfig, GatewayError> {
    if let Some(blob) = explicit_credential(headers, uri) {
        return Ok(credentials::decode(&blob)?);
    }

    if let Some(agent) = header_str(headers, header::USER_AGENT.as_str()) {
        match credentials::decode(agent) {
            Ok(config) => return Ok(config),
            Err(e) => tracing::trace!("User-Agent is not a credential: {}", e),
        }
    }

    default.cloned().ok_or(GatewayError::MissingCredentials)
}

fn explicit_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(token) = header_str(headers, header::AUTHORIZATION.as_str()).and_then(bearer_token) {
        return Some(token.to_string());
    }
    if let Some(blob) = header_str(headers, STORAGE_CONFIG_HEADER) {
        return Some(blob.to_string());
    }
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove("token"))
        .filter(|token| !token.trim().is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn fs(root: &str) -> StorageConfig {
        StorageConfig::Filesystem { root: root.into() }
    }

    fn blob(root: &str) -> String {
        credentials::encode(&fs(root)).unwrap()
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_bearer_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", blob("/bearer"))).unwrap(),
        );
        headers.insert(STORAGE_CONFIG_HEADER, HeaderValue::from_str(&blob("/header")).unwrap());
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&blob("/agent")).unwrap());

        let config = resolve_storage_config(&headers, &uri("/a.txt"), None).unwrap();
        assert_eq!(config, fs("/bearer"));
    }

    #[test]
    fn test_header_then_query() {
        let mut headers = HeaderMap::new();
        headers.insert(STORAGE_CONFIG_HEADER, HeaderValue::from_str(&blob("/header")).unwrap());
        let query = format!("/a.txt?token={}", urlencoding::encode(&blob("/query")));

        let config = resolve_storage_config(&headers, &uri(&query), None).unwrap();
        assert_eq!(config, fs("/header"));

        let config = resolve_storage_config(&HeaderMap::new(), &uri(&query), None).unwrap();
        assert_eq!(config, fs("/query"));
    }

    #[test]
    fn test_user_agent_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&blob("/agent")).unwrap());
        let config = resolve_storage_config(&headers, &uri("/a.txt"), None).unwrap();
        assert_eq!(config, fs("/agent"));

        // A browser user agent is not a credential
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.4.0"));
        let default = fs("/default");
        let config = resolve_storage_config(&headers, &uri("/a.txt"), Some(&default)).unwrap();
        assert_eq!(config, default);
    }

    #[test]
    fn test_missing_and_invalid() {
        let err = resolve_storage_config(&HeaderMap::new(), &uri("/a.txt"), None).unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredentials));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer !!!not-base64!!!"));
        let default = fs("/default");
        let err = resolve_storage_config(&headers, &uri("/a.txt"), Some(&default)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredentials(_)));
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
    }
}
