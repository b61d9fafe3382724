//! In-flight request deduplication.
//!
//! At most one backend call exists per cache key. Callers for a key that is
//! already in flight join it as waiters and receive the same outcome, in join
//! order. The backend call runs on its own task, so it completes (and fills
//! the cache) even when every caller has gone away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use super::cache::{CacheKey, TranslationCache};
use super::circuit::{CallTicket, ErrorCircuit};
use super::gateway::Gateway;
use super::{preview, TranslateError, TranslationRequest};
use crate::metrics::{metric_names, MetricsRegistry};

/// How a caller's result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served from the cache; no backend call.
    Cache,
    /// This caller started the backend call.
    Lead,
    /// Joined a call another caller started.
    Joined,
    /// Refused locally by the tripped circuit; no backend call.
    Rejected,
}

/// Outcome delivered to one caller.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub outcome: Result<String, TranslateError>,
    pub origin: Origin,
    /// Backend call this caller led or joined; `None` when no call was made.
    pub call: Option<u64>,
}

impl Settlement {
    pub fn local(outcome: Result<String, TranslateError>, origin: Origin) -> Self {
        Self {
            outcome,
            origin,
            call: None,
        }
    }
}

struct PendingCall {
    id: u64,
    waiters: Vec<oneshot::Sender<Result<String, TranslateError>>>,
    started_at: Instant,
}

pub struct Deduplicator {
    cache: Arc<TranslationCache>,
    gateway: Arc<Gateway>,
    circuit: Arc<ErrorCircuit>,
    metrics: Arc<MetricsRegistry>,
    pending: Mutex<HashMap<CacheKey, PendingCall>>,
    calls_started: AtomicU64,
}

impl Deduplicator {
    pub fn new(
        cache: Arc<TranslationCache>,
        gateway: Arc<Gateway>,
        circuit: Arc<ErrorCircuit>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cache,
            gateway,
            circuit,
            metrics,
            pending: Mutex::new(HashMap::new()),
            calls_started: AtomicU64::new(0),
        }
    }

    /// Translate through cache → in-flight join → new backend call.
    pub async fn request_translation(
        self: &Arc<Self>,
        request: &TranslationRequest,
    ) -> Result<String, TranslateError> {
        self.settle(request).await.outcome
    }

    /// Like `request_translation`, but also reports how the result was obtained.
    pub async fn settle(self: &Arc<Self>, request: &TranslationRequest) -> Settlement {
        let key = request.cache_key();
        let (rx, origin, call) = {
            let mut pending = self.pending.lock();

            if let Some(hit) = self.cache.get(&key) {
                self.metrics.increment(metric_names::CACHE_HIT);
                return Settlement::local(Ok(hit), Origin::Cache);
            }

            let (tx, rx) = oneshot::channel();
            if let Some(call) = pending.get_mut(&key) {
                call.waiters.push(tx);
                self.metrics.increment(metric_names::DEDUP_JOINED);
                debug!(call = call.id, waiters = call.waiters.len(), "dedup_joined");
                (rx, Origin::Joined, call.id)
            } else {
                let Some(ticket) = self.circuit.should_admit_call() else {
                    self.metrics.increment(metric_names::CIRCUIT_REJECTED);
                    debug!(text = %preview(request.source_text()), "circuit_rejected_call");
                    return Settlement::local(Err(TranslateError::CircuitOpen), Origin::Rejected);
                };
                let id = self.calls_started.fetch_add(1, Ordering::Relaxed) + 1;
                pending.insert(
                    key,
                    PendingCall {
                        id,
                        waiters: vec![tx],
                        started_at: Instant::now(),
                    },
                );
                self.metrics.increment(metric_names::NETWORK_CALL);
                tokio::spawn(Arc::clone(self).run_call(key, request.clone(), ticket));
                (rx, Origin::Lead, id)
            }
        };

        match rx.await {
            Ok(outcome) => Settlement {
                outcome,
                origin,
                call: Some(call),
            },
            // Only reachable if the call task was torn down with the runtime.
            Err(_) => Settlement {
                outcome: Err(TranslateError::Connectivity(
                    "translation call was dropped".into(),
                )),
                origin,
                call: Some(call),
            },
        }
    }

    async fn run_call(self: Arc<Self>, key: CacheKey, request: TranslationRequest, ticket: CallTicket) {
        let span = self.metrics.span(metric_names::GATEWAY_CALL);
        let outcome = self.gateway.translate(&request).await;
        span.finish();

        match &outcome {
            Ok(_) => self.circuit.record_success(),
            Err(e) => self.circuit.record_failure(ticket, e.kind()),
        }

        // Snapshot the waiter list and retire the call under one lock; a later
        // caller either hits the cache or starts a fresh call.
        let call = {
            let mut pending = self.pending.lock();
            if let Ok(translation) = &outcome {
                self.cache.put(key, translation.clone());
            }
            pending.remove(&key)
        };

        let Some(call) = call else {
            return;
        };
        info!(
            call = call.id,
            trial = ticket.is_trial(),
            waiters = call.waiters.len(),
            ok = outcome.is_ok(),
            elapsed_ms = call.started_at.elapsed().as_millis() as u64,
            "call_settled"
        );
        for waiter in call.waiters {
            // A waiter that stopped listening is fine; the result is cached.
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Number of distinct texts currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn circuit(&self) -> &Arc<ErrorCircuit> {
        &self.circuit
    }
}
