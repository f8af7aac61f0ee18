//! Opaque credential blob codec / 凭证编解码
//!
//! A credential is the base64 encoding of a `StorageConfig` JSON document.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

use super::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is not valid base64")]
    Base64,

    #[error("credential is not a valid storage config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a storage config into an opaque credential / 编码
pub fn encode(config: &StorageConfig) -> Result<String, CredentialError> {
    let json = serde_json::to_vec(config)?;
    Ok(STANDARD.encode(json))
}

/// Decode an opaque credential back into a storage config / 解码
pub fn decode(opaque: &str) -> Result<StorageConfig, CredentialError> {
    let opaque = opaque.trim();
    let json = STANDARD
        .decode(opaque)
        .or_else(|_| URL_SAFE.decode(opaque))
        .or_else(|_| URL_SAFE_NO_PAD.decode(opaque))
        .map_err(|_| CredentialError::Base64)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let cfg = StorageConfig::Gcs {
            credentials_file: Some("./path/to/credentials.json".into()),
            bucket: "bucket-name".into(),
            endpoint: None,
        };
        let encoded = encode(&cfg).unwrap();
        assert!(!encoded.is_empty());
        assert_eq!(decode(&encoded).unwrap(), cfg);
    }

    #[test]
    fn test_decode_url_safe() {
        let json = br#"{"driver":"filesystem","root":"/tmp/a?b"}"#;
        let encoded = URL_SAFE_NO_PAD.encode(json);
        assert_eq!(
            decode(&encoded).unwrap(),
            StorageConfig::Filesystem { root: "/tmp/a?b".into() }
        );
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(decode("invalid_base64_string!"), Err(CredentialError::Base64)));
        assert!(matches!(decode("curl/8.4.0"), Err(CredentialError::Base64)));
        let not_config = STANDARD.encode(br#"{"hello":"world"}"#);
        assert!(matches!(decode(&not_config), Err(CredentialError::Json(_))));
    }
}
