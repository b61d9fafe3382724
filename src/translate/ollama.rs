//! Local-model translation via the Ollama HTTP API.
//! One non-streaming `POST {endpoint}/api/generate` per call; endpoint and
//! model come from the live settings. Failures are classified for the circuit.
//! `GET {endpoint}/api/tags` lists the installed models.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{preview, TranslateError, TranslationBackend, TranslationRequest, AUTO_LANG};
use crate::config::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Answer prefixes models like to add despite being told not to.
const ANSWER_PREFIXES: &[&str] = &[
    "翻译结果：",
    "翻译:",
    "翻译：",
    "译文：",
    "译文:",
    "Translation:",
    "Translated text:",
    "Result:",
    "以下是翻译：",
    "以下是中文翻译：",
];

/// Lists the models a local backend can serve.
pub trait ModelCatalog: Send + Sync {
    fn list_models<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Vec<String>, TranslateError>>;
}

pub struct OllamaBackend {
    http: reqwest::Client,
}

impl OllamaBackend {
    pub fn new() -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TranslateError::Configuration(e.to_string()))?;
        Ok(Self { http })
    }

    async fn generate(
        &self,
        request: &TranslationRequest,
        settings: &Settings,
    ) -> Result<String, TranslateError> {
        let endpoint = settings.backend_endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(TranslateError::Configuration("Ollama endpoint is not set".into()));
        }
        let model = settings.backend_model.as_str();
        if model.is_empty() {
            return Err(TranslateError::Configuration("Ollama model is not set".into()));
        }

        let body = serde_json::json!({
            "model": model,
            "prompt": build_prompt(request),
            "stream": false,
        });

        debug!(endpoint, model, text = %preview(request.source_text()), "ollama_request");

        let response = self
            .http
            .post(format!("{endpoint}/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let body_text: String = body_text.chars().take(200).collect();
            warn!(status = status.as_u16(), body = %body_text, "ollama_error_status");
            return Err(match status.as_u16() {
                404 => TranslateError::Configuration(format!(
                    "model \"{model}\" not found, pull it or check the name"
                )),
                code => TranslateError::backend(code.to_string(), body_text),
            });
        }

        let bytes = response.bytes().await.map_err(classify_transport)?;
        parse_generate_response(&bytes)
    }

    async fn tags(&self, endpoint: &str) -> Result<Vec<String>, TranslateError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(TranslateError::Configuration("Ollama endpoint is not set".into()));
        }
        debug!(endpoint, "ollama_list_models");
        let response = self
            .http
            .get(format!("{endpoint}/api/tags"))
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body_text: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            warn!(status = status.as_u16(), body = %body_text, "ollama_list_failed");
            return Err(TranslateError::backend(
                status.as_u16().to_string(),
                format!("failed to list models: {body_text}"),
            ));
        }
        let bytes = response.bytes().await.map_err(classify_transport)?;
        parse_model_list(&bytes)
    }
}

impl ModelCatalog for OllamaBackend {
    fn list_models<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Vec<String>, TranslateError>> {
        Box::pin(self.tags(endpoint))
    }
}

impl TranslationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn timeout(&self) -> Duration {
        REQUEST_TIMEOUT
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.generate(request, settings))
    }
}

fn classify_transport(e: reqwest::Error) -> TranslateError {
    if e.is_timeout() {
        TranslateError::Timeout
    } else if e.is_connect() || e.is_request() {
        TranslateError::Connectivity(e.to_string())
    } else if e.is_decode() || e.is_body() {
        TranslateError::InvalidResponse(e.to_string())
    } else {
        TranslateError::Connectivity(e.to_string())
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

fn parse_generate_response(bytes: &[u8]) -> Result<String, TranslateError> {
    let parsed: GenerateResponse = serde_json::from_slice(bytes)
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;
    match parsed.response {
        Some(text) => Ok(strip_answer_prefix(text.trim()).to_string()),
        None => Err(TranslateError::InvalidResponse(
            "response has no `response` field".into(),
        )),
    }
}

/// `models` holds either bare names or objects with a `name`.
fn parse_model_list(bytes: &[u8]) -> Result<Vec<String>, TranslateError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| TranslateError::InvalidResponse(e.to_string()))?;
    let models = value
        .get("models")
        .and_then(|m| m.as_array())
        .ok_or_else(|| TranslateError::InvalidResponse("model list has no `models` array".into()))?;
    Ok(models
        .iter()
        .filter_map(|m| m.as_str().or_else(|| m.get("name").and_then(|n| n.as_str())))
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect())
}

fn strip_answer_prefix(text: &str) -> &str {
    ANSWER_PREFIXES
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .map_or(text, str::trim)
}

/// Target-language specific instruction followed by the text.
fn build_prompt(request: &TranslationRequest) -> String {
    let from = request.source_lang.as_str();
    let to = request.target_lang.as_str();
    let text = request.source_text();
    match to {
        "zh" | "zh-CN" | "zh-Hans" => {
            let source = if from != AUTO_LANG && from != "zh" {
                format!("{from}语言的")
            } else {
                String::new()
            };
            format!("请将以下{source}文本翻译成中文，只返回翻译结果，不要包含原文，不要有任何前缀说明:\n\n{text}")
        }
        "en" => {
            let source = if from != AUTO_LANG && from != "en" {
                format!("{from} ")
            } else {
                String::new()
            };
            format!("Please translate the following {source}text to English. Only return the translation result without including the original text or any prefixes:\n\n{text}")
        }
        other => format!("Please translate the following text to {other} language. Only return the translation result without including the original text or any prefixes:\n\n{text}"),
    }
}
