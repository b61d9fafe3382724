//! Baidu cloud translation API.
//!
//! Requests are signed with `sign(appid + q + salt + secret)`; the digest
//! itself is an injected [`Signer`]. Credentials come from the environment.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{preview, TranslateError, TranslationBackend, TranslationRequest};
use crate::config::Settings;

pub const API_URL: &str = "https://fanyi-api.baidu.com/api/trans/vip/translate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes that mean the credentials (not the service) are wrong.
const CREDENTIAL_ERROR_CODES: &[&str] = &["52003", "54001", "58000", "90107"];

/// Request-signing capability (hex digest of the payload).
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &str) -> String;
}

#[derive(Clone)]
pub struct BaiduCredentials {
    pub app_id: String,
    pub secret: String,
}

impl BaiduCredentials {
    /// Read `BAIDU_APP_ID` / `BAIDU_SECRET`. `None` if either is missing or blank.
    pub fn from_env() -> Option<Self> {
        let app_id = std::env::var("BAIDU_APP_ID").ok()?;
        let secret = std::env::var("BAIDU_SECRET").ok()?;
        if app_id.trim().is_empty() || secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            app_id: app_id.trim().to_string(),
            secret: secret.trim().to_string(),
        })
    }
}

impl std::fmt::Debug for BaiduCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaiduCredentials")
            .field("app_id", &self.app_id)
            .field("secret", &"***")
            .finish()
    }
}

pub struct BaiduBackend {
    http: reqwest::Client,
    credentials: Option<BaiduCredentials>,
    signer: Arc<dyn Signer>,
    url: String,
}

impl BaiduBackend {
    pub fn new(
        credentials: Option<BaiduCredentials>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| TranslateError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            signer,
            url: API_URL.to_string(),
        })
    }

    /// Point the backend at a different API URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn form(&self, request: &TranslationRequest, salt: &str) -> Result<Vec<(&'static str, String)>, TranslateError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            TranslateError::Configuration("BAIDU_APP_ID / BAIDU_SECRET are not set".into())
        })?;
        let q = request.source_text();
        let sign = self.signer.sign(&format!(
            "{}{}{}{}",
            credentials.app_id, q, salt, credentials.secret
        ));
        Ok(vec![
            ("q", q.to_string()),
            ("from", request.source_lang.clone()),
            ("to", request.target_lang.clone()),
            ("appid", credentials.app_id.clone()),
            ("salt", salt.to_string()),
            ("sign", sign),
        ])
    }

    async fn call(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let salt = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string();
        let form = self.form(request, &salt)?;

        debug!(text = %preview(request.source_text()), "baidu_request");

        let response = self
            .http
            .post(&self.url)
            .form(&form)
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
        if !status.is_success() {
            warn!(status = status.as_u16(), "baidu_error_status");
            return Err(TranslateError::backend(
                status.as_u16().to_string(),
                status.canonical_reason().unwrap_or("HTTP error"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TranslateError::Connectivity(e.to_string()))?;
        parse_response(&bytes)
    }
}

impl TranslationBackend for BaiduBackend {
    fn name(&self) -> &str {
        "baidu"
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

#[derive(Deserialize)]
struct ApiResponse {
    error_code: Option<serde_json::Value>,
    error_msg: Option<String>,
    #[serde(default)]
    trans_result: Vec<TransResult>,
}

#[derive(Deserialize)]
struct TransResult {
    dst: String,
}

fn parse_response(bytes: &[u8]) -> Result<String, TranslateError> {
    let parsed: ApiResponse = serde_json::from_slice(bytes)
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;

    if let Some(code) = parsed.error_code {
        // The API sends the code as a string, older docs show a number.
        let code = match code {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let message = parsed.error_msg.unwrap_or_default();
        if CREDENTIAL_ERROR_CODES.contains(&code.as_str()) {
            return Err(TranslateError::Configuration(format!("{code}: {message}")));
        }
        return Err(TranslateError::backend(code, message));
    }

    if parsed.trans_result.is_empty() {
        return Err(TranslateError::InvalidResponse("empty trans_result".into()));
    }
    Ok(parsed
        .trans_result
        .into_iter()
        .map(|r| r.dst)
        .collect::<Vec<_>>()
        .join("\n"))
}
