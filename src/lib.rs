//! inline-translate: in-page translation orchestration.
//! Decides what on a live page to translate, shares one backend call per
//! distinct text, caches results, contains connectivity failures and keeps
//! overlays in step with an asynchronous, cancelable pipeline.

pub mod batch;
pub mod config;
pub mod heuristic;
pub mod messaging;
pub mod metrics;
pub mod overlay;
pub mod page;
pub mod scheduler;
pub mod selector;
pub mod target;
pub mod translate;

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use config::{ConfigError, EngineConfig, Settings, SettingsStore};
use messaging::{ChannelTransport, MessageHandler, RemoteBackend, RpcClient, RpcError};
use metrics::MetricsRegistry;
use translate::cache::TranslationCache;
use translate::circuit::ErrorCircuit;
use translate::dedup::Deduplicator;
use translate::gateway::Gateway;
use translate::ollama::OllamaBackend;
use translate::{BackendRegistry, StubBackend, TranslationBackend, TranslationRequest};

/// Env var naming an optional JSON settings file for the CLI.
pub const SETTINGS_ENV: &str = "INLINE_TRANSLATE_SETTINGS";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("background context unreachable: {0}")]
    Rpc(#[from] RpcError),
    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
}

/// Env var switching log output to JSON lines when set to `json`.
pub const LOG_FORMAT_ENV: &str = "INLINE_TRANSLATE_LOG";

/// Install the fmt subscriber. A second call is a no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("inline_translate=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = if std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v == "json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Backends available in this build. Baidu and Aliyun need an injected
/// signer, so they are left to embedders.
pub fn default_registry() -> BackendRegistry {
    background_backends().0
}

fn background_backends() -> (BackendRegistry, Option<Arc<OllamaBackend>>) {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(StubBackend));
    let ollama = match OllamaBackend::new() {
        Ok(ollama) => Some(Arc::new(ollama)),
        Err(e) => {
            warn!(error = %e, "ollama backend unavailable");
            None
        }
    };
    if let Some(ollama) = &ollama {
        registry.register(Arc::clone(ollama) as Arc<dyn TranslationBackend>);
    }
    (registry, ollama)
}

fn load_settings() -> Result<Settings, ConfigError> {
    match std::env::var(SETTINGS_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            let settings = Settings::load_from_file(Path::new(path.trim()))?;
            info!(path = %path, "settings_loaded");
            Ok(settings)
        }
        _ => Ok(Settings::default()),
    }
}

/// CLI: an in-process background context answers RPC; stdin lines that need
/// translation go through the page-side dedup/cache/circuit path.
pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let settings = load_settings()?;
    let config = EngineConfig::default();
    let metrics = Arc::new(MetricsRegistry::new());
    info!(engine = %settings.translation_engine, target = %settings.target_lang, "inline_translate_starting");

    // Background side.
    let background_settings = Arc::new(SettingsStore::new(settings.clone()));
    let (registry, ollama) = background_backends();
    let background = Arc::new(Gateway::new(registry, background_settings));
    let mut handler = MessageHandler::new(background);
    if let Some(ollama) = ollama {
        handler = handler.with_catalog(ollama);
    }
    let (transport, rx) = ChannelTransport::new(64);
    messaging::serve(rx, Arc::new(handler));

    let client = Arc::new(RpcClient::new(
        Arc::new(transport),
        config.rpc_timeout,
        Arc::clone(&metrics),
    ));
    client.ping().await?;
    info!("background_ready");
    if settings.translation_engine == "ollama" {
        match client.fetch_models().await {
            Ok(models) => info!(?models, selected = %settings.backend_model, "ollama_models"),
            Err(e) => warn!(error = %e, "ollama_models_unavailable"),
        }
    }

    // Page side: every call is forwarded over RPC.
    let page_settings = Arc::new(SettingsStore::new(Settings {
        translation_engine: "remote".into(),
        ..settings
    }));
    let registry = BackendRegistry::new().with(Arc::new(RemoteBackend::new(client)));
    let dedup = Arc::new(Deduplicator::new(
        Arc::new(TranslationCache::new(config.cache_capacity)),
        Arc::new(Gateway::new(registry, Arc::clone(&page_settings))),
        Arc::new(ErrorCircuit::new(config.failure_threshold, config.cool_down)),
        Arc::clone(&metrics),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if !heuristic::needs_translation(text) {
            println!("{text}");
            continue;
        }
        let outcome = match TranslationRequest::with_settings(text, &page_settings.current()) {
            Ok(request) => dedup.request_translation(&request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(translation) => println!("{translation}"),
            Err(e) => eprintln!("error ({:?}): {e}", e.kind()),
        }
    }

    info!(metrics = ?metrics.summary(), "inline_translate_done");
    Ok(())
}
