//! Translation pipeline: request types, error taxonomy, backend adapters,
//! FIFO cache, error circuit, gateway and the in-flight deduplicator.

pub mod aliyun;
pub mod baidu;
pub mod cache;
pub mod circuit;
pub mod dedup;
pub mod gateway;
pub mod ollama;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use cache::CacheKey;

/// Default source language tag.
pub const AUTO_LANG: &str = "auto";

/// One logical translation job. `source_text` is trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationRequest {
    source_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(
        text: &str,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<Self, TranslateError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TranslateError::InvalidInput("text is empty".into()));
        }
        let source_lang = source_lang.into();
        Ok(Self {
            source_text: trimmed.to_string(),
            source_lang: if source_lang.is_empty() {
                AUTO_LANG.to_string()
            } else {
                source_lang
            },
            target_lang: target_lang.into(),
        })
    }

    /// Request using the language pair from the current settings.
    pub fn with_settings(text: &str, settings: &Settings) -> Result<Self, TranslateError> {
        Self::new(text, settings.source_lang.clone(), settings.target_lang.clone())
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Identity key shared by the cache and the deduplicator.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::compute(&self.source_lang, &self.target_lang, &self.source_text)
    }
}

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connectivity,
    Configuration,
    Backend,
    InvalidResponse,
    CircuitOpen,
    InvalidInput,
}

impl ErrorKind {
    /// Only transport-level failures count towards tripping the circuit.
    pub fn trips_circuit(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Connectivity)
    }

    /// "Service unavailable" family, subject to notice suppression.
    pub fn is_connectivity_class(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Connectivity | ErrorKind::CircuitOpen
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request timed out")]
    Timeout,
    #[error("cannot reach translation service: {0}")]
    Connectivity(String),
    #[error("translation backend misconfigured: {0}")]
    Configuration(String),
    #[error("translation backend error {code}: {message}")]
    Backend { code: String, message: String },
    #[error("invalid response from translation backend: {0}")]
    InvalidResponse(String),
    #[error("translation service temporarily unavailable, try again later")]
    CircuitOpen,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::Timeout => ErrorKind::Timeout,
            TranslateError::Connectivity(_) => ErrorKind::Connectivity,
            TranslateError::Configuration(_) => ErrorKind::Configuration,
            TranslateError::Backend { .. } => ErrorKind::Backend,
            TranslateError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            TranslateError::CircuitOpen => ErrorKind::CircuitOpen,
            TranslateError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        TranslateError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Rebuild an error from its wire parts (kind, detail message, optional code).
    pub fn from_parts(kind: ErrorKind, detail: String, code: Option<String>) -> Self {
        match kind {
            ErrorKind::Timeout => TranslateError::Timeout,
            ErrorKind::Connectivity => TranslateError::Connectivity(detail),
            ErrorKind::Configuration => TranslateError::Configuration(detail),
            ErrorKind::Backend => TranslateError::Backend {
                code: code.unwrap_or_else(|| "remote".into()),
                message: detail,
            },
            ErrorKind::InvalidResponse => TranslateError::InvalidResponse(detail),
            ErrorKind::CircuitOpen => TranslateError::CircuitOpen,
            ErrorKind::InvalidInput => TranslateError::InvalidInput(detail),
        }
    }

    /// Detail text without the kind prefix, paired with `from_parts`.
    pub fn detail(&self) -> String {
        match self {
            TranslateError::Connectivity(d)
            | TranslateError::Configuration(d)
            | TranslateError::InvalidResponse(d)
            | TranslateError::InvalidInput(d) => d.clone(),
            TranslateError::Backend { message, .. } => message.clone(),
            TranslateError::Timeout | TranslateError::CircuitOpen => self.to_string(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            TranslateError::Backend { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Adapter for one concrete translation service.
/// Implementations issue exactly one network attempt per call; the gateway
/// owns the timeout.
pub trait TranslationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Hard deadline the gateway applies to `translate`.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>>;
}

/// Dry-run backend: echoes the source text with a marker, no network.
pub struct StubBackend;

impl TranslationBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(async move {
            Ok(format!(
                "[{}] {}",
                request.target_lang,
                request.source_text()
            ))
        })
    }
}

/// Engine name → backend. Resolved per call from the live settings.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn TranslationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn TranslationBackend>) -> &mut Self {
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with(mut self, backend: Arc<dyn TranslationBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn resolve(&self, engine: &str) -> Result<Arc<dyn TranslationBackend>, TranslateError> {
        self.backends.get(engine).cloned().ok_or_else(|| {
            TranslateError::Configuration(format!("unknown translation engine: {engine}"))
        })
    }

    pub fn engines(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// First 50 chars of `text`, for log lines.
pub(crate) fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(50).collect();
    if text.chars().nth(50).is_some() {
        out.push_str("...");
    }
    out
}
