//! Persisted user settings and injected engine tunables.
//!
//! `Settings` mirrors what the settings page stores. Writes are owned by that
//! page; this crate only reads them and reacts to pushes through
//! `SettingsStore::subscribe`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::translate::{cache, circuit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    /// Headings and paragraphs of the main content only.
    #[default]
    Light,
    /// Every text-bearing block on the page.
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub translation_mode: TranslationMode,
    pub translation_engine: String,
    pub backend_endpoint: String,
    pub backend_model: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            translation_mode: TranslationMode::Light,
            translation_engine: "ollama".into(),
            backend_endpoint: "http://localhost:11434".into(),
            backend_model: String::new(),
            source_lang: "auto".into(),
            target_lang: "zh".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("settings IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Settings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }
}

/// Push-based settings holder. Every `replace`/`update` notifies subscribers.
pub struct SettingsStore {
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, settings: Settings) {
        self.tx.send_replace(settings);
        info!("settings_replaced");
    }

    /// Apply `f` to the stored settings; subscribers are notified only when
    /// something changed.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let changed = self.tx.send_if_modified(|settings| {
            let before = settings.clone();
            f(settings);
            *settings != before
        });
        if changed {
            info!("settings_updated");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

/// Tunables injected into the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Simultaneous in-flight targets, system-wide.
    pub max_concurrent: usize,
    /// Consecutive connectivity failures that trip the circuit.
    pub failure_threshold: u32,
    pub cool_down: Duration,
    pub cache_capacity: usize,
    /// Quiet interval coalescing scroll/mutation rescans.
    pub rescan_quiet: Duration,
    /// Minimum visible characters for a candidate.
    pub min_chars: usize,
    /// Snapshots longer than this are truncated.
    pub max_text_chars: usize,
    pub vertical_margin: f64,
    pub horizontal_margin: f64,
    /// Caller-side deadline for cross-context requests.
    pub rpc_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            failure_threshold: circuit::DEFAULT_FAILURE_THRESHOLD,
            cool_down: circuit::DEFAULT_COOL_DOWN,
            cache_capacity: cache::DEFAULT_CAPACITY,
            rescan_quiet: Duration::from_millis(300),
            min_chars: 10,
            max_text_chars: 5000,
            vertical_margin: 500.0,
            horizontal_margin: 200.0,
            rpc_timeout: Duration::from_secs(30),
        }
    }
}
