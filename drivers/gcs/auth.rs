//! Service account OAuth tokens / 服务账号令牌
//!
//! A signed RS256 JWT is exchanged at the account's token URI for a short
//! lived access token, which is cached until shortly before it expires.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the reported expiry
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service account key file / 服务账号密钥文件
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取GCS凭证文件失败: {}", path))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(content).context("解析GCS凭证失败")?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(anyhow!("GCS凭证缺少 client_email 或 private_key"));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Access token source for one service account / 令牌提供者
pub struct TokenProvider {
    key: ServiceAccountKey,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(key: ServiceAccountKey, client: Client) -> Self {
        Self {
            key,
            client,
            cached: Mutex::new(None),
        }
    }

    /// 获取访问令牌
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(ref t) = *cached {
            if Instant::now() + REFRESH_MARGIN < t.expires_at {
                return Ok(t.token.clone());
            }
        }

        let assertion = self.signed_jwt(chrono::Utc::now().timestamp())?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GCS令牌获取失败: HTTP {} {}", status, body));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        tracing::debug!("GCS token refreshed for {}, valid {:?}", self.key.client_email, lifetime);

        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// `header.claims` signed with the account key / 生成签名 JWT
    fn signed_jwt(&self, now: i64) -> Result<String> {
        let message = jwt_message(&self.key, now)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&self.key.private_key)
            .map_err(|e| anyhow!("GCS私钥无效: {}", e))?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let signature = signing_key.sign(message.as_bytes());
        Ok(format!("{}.{}", message, URL_SAFE_NO_PAD.encode(signature.to_bytes())))
    }
}

/// Unsigned JWT part: base64url(header).base64url(claims)
fn jwt_message(key: &ServiceAccountKey, now: i64) -> Result<String> {
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = Claims {
        iss: &key.client_email,
        scope: SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?),
    ))
}
