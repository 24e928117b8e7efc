//! Kubernetes Secret API response shape and the credential payload it
//! carries, plus the defaulting rules applied when decoding it.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct SecretResponse {
    pub metadata: SecretMetadata,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SecretMetadata {
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,
}

#[derive(Debug, Deserialize)]
struct RawTokenPayload {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scope: String,
}

/// The decoded, defaulted credential payload carried by `data.token_data`.
#[derive(Debug, PartialEq)]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

/// Base64-decodes `data.token_data`, parses it as JSON, and applies the
/// defaulting rules: `expires_at` defaults to `now + 24h` if absent,
/// `token_type` to `"Bearer"` if empty, `scope` to `"read"` if empty.
/// `access_token`/`refresh_token` are mandatory.
pub fn decode_token_payload(secret: &SecretResponse) -> Result<TokenPayload> {
    let encoded = secret
        .data
        .get("token_data")
        .ok_or_else(|| Error::MissingKey("token_data".into()))?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| Error::Base64(e.to_string()))?;
    let raw: RawTokenPayload =
        serde_json::from_slice(&decoded).map_err(|e| Error::InvalidPayload(e.to_string()))?;

    if raw.access_token.is_empty() || raw.refresh_token.is_empty() {
        return Err(Error::InvalidPayload(
            "access_token and refresh_token are required".into(),
        ));
    }

    Ok(TokenPayload {
        access_token: raw.access_token,
        refresh_token: raw.refresh_token,
        token_type: if raw.token_type.is_empty() {
            "Bearer".to_string()
        } else {
            raw.token_type
        },
        expires_at: raw
            .expires_at
            .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(24)),
        scope: if raw.scope.is_empty() {
            "read".to_string()
        } else {
            raw.scope
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_with(token_data_json: &str) -> SecretResponse {
        let mut data = HashMap::new();
        data.insert("token_data".to_string(), BASE64.encode(token_data_json));
        SecretResponse {
            metadata: SecretMetadata { resource_version: "1".into() },
            data,
        }
    }

    #[test]
    fn decodes_well_formed_payload() {
        let secret = secret_with(
            r#"{"access_token":"at","refresh_token":"rt","token_type":"Bearer","expires_at":"2030-01-01T00:00:00Z","scope":"read"}"#,
        );
        let payload = decode_token_payload(&secret).unwrap();
        assert_eq!(payload.access_token, "at");
        assert_eq!(payload.refresh_token, "rt");
        assert_eq!(payload.token_type, "Bearer");
        assert_eq!(payload.scope, "read");
    }

    #[test]
    fn defaults_missing_expires_at_to_24h_from_now() {
        let secret = secret_with(r#"{"access_token":"at","refresh_token":"rt"}"#);
        let payload = decode_token_payload(&secret).unwrap();
        let delta = payload.expires_at - Utc::now();
        assert!(delta.num_minutes() > (24 * 60 - 2) && delta.num_minutes() <= 24 * 60);
    }

    #[test]
    fn defaults_empty_token_type_to_bearer() {
        let secret = secret_with(r#"{"access_token":"at","refresh_token":"rt","token_type":""}"#);
        let payload = decode_token_payload(&secret).unwrap();
        assert_eq!(payload.token_type, "Bearer");
    }

    #[test]
    fn defaults_empty_scope_to_read() {
        let secret = secret_with(r#"{"access_token":"at","refresh_token":"rt","scope":""}"#);
        let payload = decode_token_payload(&secret).unwrap();
        assert_eq!(payload.scope, "read");
    }

    #[test]
    fn rejects_missing_access_token() {
        let secret = secret_with(r#"{"access_token":"","refresh_token":"rt"}"#);
        assert!(decode_token_payload(&secret).is_err());
    }

    #[test]
    fn rejects_missing_token_data_key() {
        let secret = SecretResponse {
            metadata: SecretMetadata { resource_version: "1".into() },
            data: HashMap::new(),
        };
        assert!(matches!(decode_token_payload(&secret), Err(Error::MissingKey(_))));
    }
}
