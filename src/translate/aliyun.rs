//! Alibaba Cloud machine translation (RPC-style API).
//!
//! Parameters are signed with HMAC-SHA1 over the canonical query string,
//! keyed with `secret + "&"`. The MAC is an injected [`HmacSha1`]; the
//! base64 step and the canonicalization live here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{preview, TranslateError, TranslationBackend, TranslationRequest};
use crate::config::Settings;

pub const API_URL: &str = "https://mt.cn-hangzhou.aliyuncs.com";
const API_VERSION: &str = "2018-10-12";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// RFC 3986 unreserved characters stay as they are.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Codes that mean the account or keys are wrong, not the service.
const CREDENTIAL_ERROR_MARKERS: &[&str] = &[
    "NoPermission",
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];

/// Keyed MAC used for request signing.
pub trait HmacSha1: Send + Sync {
    fn hmac_sha1(&self, key: &[u8], message: &[u8]) -> Vec<u8>;
}

#[derive(Clone)]
pub struct AliyunCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl AliyunCredentials {
    /// Read `ALIYUN_ACCESS_KEY_ID` / `ALIYUN_ACCESS_KEY_SECRET`.
    pub fn from_env() -> Option<Self> {
        let id = std::env::var("ALIYUN_ACCESS_KEY_ID").ok()?;
        let secret = std::env::var("ALIYUN_ACCESS_KEY_SECRET").ok()?;
        if id.trim().is_empty() || secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            access_key_id: id.trim().to_string(),
            access_key_secret: secret.trim().to_string(),
        })
    }
}

impl std::fmt::Debug for AliyunCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliyunCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"***")
            .finish()
    }
}

pub struct AliyunBackend {
    http: reqwest::Client,
    credentials: Option<AliyunCredentials>,
    mac: Arc<dyn HmacSha1>,
    url: String,
}

impl AliyunBackend {
    pub fn new(
        credentials: Option<AliyunCredentials>,
        mac: Arc<dyn HmacSha1>,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| TranslateError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            mac,
            url: API_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// All request parameters including `Signature`.
    fn signed_params(
        &self,
        request: &TranslationRequest,
        timestamp: &str,
        nonce: &str,
    ) -> Result<BTreeMap<&'static str, String>, TranslateError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            TranslateError::Configuration(
                "ALIYUN_ACCESS_KEY_ID / ALIYUN_ACCESS_KEY_SECRET are not set".into(),
            )
        })?;

        let mut params = BTreeMap::new();
        params.insert("Format", "JSON".to_string());
        params.insert("Version", API_VERSION.to_string());
        params.insert("AccessKeyId", credentials.access_key_id.clone());
        params.insert("SignatureMethod", "HMAC-SHA1".to_string());
        params.insert("SignatureVersion", "1.0".to_string());
        params.insert("Timestamp", timestamp.to_string());
        params.insert("SignatureNonce", nonce.to_string());
        params.insert("Action", "TranslateGeneral".to_string());
        params.insert("FormatType", "text".to_string());
        params.insert("Scene", "general".to_string());
        params.insert("SourceLanguage", request.source_lang.clone());
        params.insert("TargetLanguage", request.target_lang.clone());
        params.insert("SourceText", request.source_text().to_string());

        let canonical = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let string_to_sign = format!("POST&{}&{}", encode("/"), encode(&canonical));
        let key = format!("{}&", credentials.access_key_secret);
        let mac = self.mac.hmac_sha1(key.as_bytes(), string_to_sign.as_bytes());
        params.insert("Signature", STANDARD.encode(mac));
        Ok(params)
    }

    async fn call(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let params = self.signed_params(request, &timestamp, &nonce)?;

        debug!(text = %preview(request.source_text()), "aliyun_request");

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Connectivity(e.to_string())
                }
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TranslateError::Connectivity(e.to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "aliyun_error_status");
            // Error bodies carry a Code; fall back to the status when they don't.
            return Err(match parse_response(&bytes) {
                Err(e @ (TranslateError::Backend { .. } | TranslateError::Configuration(_))) => e,
                _ => TranslateError::backend(
                    status.as_u16().to_string(),
                    status.canonical_reason().unwrap_or("HTTP error"),
                ),
            });
        }
        parse_response(&bytes)
    }
}

impl TranslationBackend for AliyunBackend {
    fn name(&self) -> &str {
        "aliyun"
    }

    fn timeout(&self) -> Duration {
        REQUEST_TIMEOUT
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.call(request))
    }
}

fn encode(text: &str) -> String {
    utf8_percent_encode(text, RFC3986).to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiResponse {
    code: Option<serde_json::Value>,
    message: Option<String>,
    data: Option<ApiData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiData {
    translated: Option<String>,
}

fn parse_response(bytes: &[u8]) -> Result<String, TranslateError> {
    let parsed: ApiResponse = serde_json::from_slice(bytes)
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

    if let Some(code) = parsed.code {
        let code = match code {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        if code != "200" {
            let message = parsed.message.unwrap_or_default();
            if CREDENTIAL_ERROR_MARKERS.iter().any(|m| code.contains(m)) {
                return Err(TranslateError::Configuration(format!("{code}: {message}")));
            }
            return Err(TranslateError::backend(code, message));
        }
    }

    parsed
        .data
        .and_then(|d| d.translated)
        .ok_or_else(|| TranslateError::InvalidResponse("response has no Data.Translated".into()))
}
