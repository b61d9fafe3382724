//! Uniform async entry to the remote translation capability.
//! Resolves the backend for the live engine setting, applies the backend's
//! hard timeout and makes exactly one attempt. Retries are not done here.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::{preview, BackendRegistry, TranslateError, TranslationRequest};
use crate::config::SettingsStore;

pub struct Gateway {
    registry: BackendRegistry,
    settings: Arc<SettingsStore>,
}

impl Gateway {
    pub fn new(registry: BackendRegistry, settings: Arc<SettingsStore>) -> Self {
        Self { registry, settings }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let settings = self.settings.current();
        let backend = self.registry.resolve(&settings.translation_engine)?;
        let deadline = backend.timeout();
        let start = Instant::now();

        debug!(
            engine = backend.name(),
            chars = request.source_text().chars().count(),
            text = %preview(request.source_text()),
            "gateway_call"
        );

        // Dropping the backend future on timeout aborts the network request.
        let result = match tokio::time::timeout(deadline, backend.translate(request, &settings)).await
        {
            Ok(result) => result,
            Err(_) => Err(TranslateError::Timeout),
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => debug!(engine = backend.name(), elapsed_ms, "gateway_ok"),
            Err(e) => warn!(engine = backend.name(), elapsed_ms, error = %e, "gateway_failed"),
        }
        result
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }
}
