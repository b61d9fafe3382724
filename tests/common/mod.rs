//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use inline_translate::config::{EngineConfig, Settings, SettingsStore};
use inline_translate::metrics::MetricsRegistry;
use inline_translate::page::MemoryPage;
use inline_translate::scheduler::Scheduler;
use inline_translate::translate::cache::TranslationCache;
use inline_translate::translate::circuit::ErrorCircuit;
use inline_translate::translate::dedup::Deduplicator;
use inline_translate::translate::gateway::Gateway;
use inline_translate::translate::{
    BackendRegistry, TranslateError, TranslationBackend, TranslationRequest,
};

pub const ENGINE: &str = "fake";

/// Scriptable backend: echoes or fails, optionally after a delay or behind a
/// gate the test opens permit by permit. Counts every call it receives.
pub struct FakeBackend {
    failure: Mutex<Option<TranslateError>>,
    delay: Mutex<Duration>,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn build(gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            gate,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        })
    }

    /// Answers immediately.
    pub fn echo() -> Arc<Self> {
        Self::build(None)
    }

    /// Each call waits for a permit from `release`.
    pub fn gated() -> Arc<Self> {
        Self::build(Some(Semaphore::new(0)))
    }

    pub fn failing(error: TranslateError) -> Arc<Self> {
        let backend = Self::build(None);
        backend.fail_with(Some(error));
        backend
    }

    pub fn gated_failing(error: TranslateError) -> Arc<Self> {
        let backend = Self::gated();
        backend.fail_with(Some(error));
        backend
    }

    pub fn fail_with(&self, error: Option<TranslateError>) {
        *self.failure.lock() = error;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    async fn run(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().push(request.source_text().to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(translated(request.source_text())),
        }
    }
}

impl TranslationBackend for FakeBackend {
    fn name(&self) -> &str {
        ENGINE
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.run(request))
    }
}

/// What `FakeBackend` answers for `text`.
pub fn translated(text: &str) -> String {
    format!("译:{text}")
}

pub fn request(text: &str) -> TranslationRequest {
    TranslationRequest::new(text, "auto", "zh").unwrap()
}

/// Deduplicator wired to one backend with fresh cache and circuit.
pub struct Pipeline {
    pub settings: Arc<SettingsStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub dedup: Arc<Deduplicator>,
}

impl Pipeline {
    pub fn new(backend: Arc<FakeBackend>, config: &EngineConfig) -> Self {
        let settings = Arc::new(SettingsStore::new(Settings {
            translation_engine: ENGINE.into(),
            ..Settings::default()
        }));
        let metrics = Arc::new(MetricsRegistry::new());
        let gateway = Arc::new(Gateway::new(
            BackendRegistry::new().with(backend),
            Arc::clone(&settings),
        ));
        let dedup = Arc::new(Deduplicator::new(
            Arc::new(TranslationCache::new(config.cache_capacity)),
            gateway,
            Arc::new(ErrorCircuit::new(config.failure_threshold, config.cool_down)),
            Arc::clone(&metrics),
        ));
        Self {
            settings,
            metrics,
            dedup,
        }
    }
}

/// Page + scheduler over a fake backend.
pub struct Harness {
    pub page: Arc<MemoryPage>,
    pub backend: Arc<FakeBackend>,
    pub pipeline: Pipeline,
    pub scheduler: Arc<Scheduler>,
}

impl Harness {
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<FakeBackend>, config: EngineConfig) -> Self {
        let page = Arc::new(MemoryPage::new());
        let pipeline = Pipeline::new(Arc::clone(&backend), &config);
        let scheduler = Scheduler::new(
            page.clone(),
            Arc::clone(&pipeline.dedup),
            Arc::clone(&pipeline.settings),
            config,
            Arc::clone(&pipeline.metrics),
        );
        Self {
            page,
            backend,
            pipeline,
            scheduler,
        }
    }
}

/// Let spawned tasks run until `cond` holds. Panics after ~1s of virtual time.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a few turns without advancing much time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
