//! Batch scheduler: the per-page orchestrator.
//!
//! Scans the page for candidates, queues them, and keeps at most
//! `max_concurrent` targets in flight system-wide. Each settled target frees
//! its slot and the next queued target is admitted right away. Results from
//! an older batch still reach the cache (through the deduplicator) but are
//! never painted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{BatchClock, BatchGuard};
use crate::config::{EngineConfig, SettingsStore, TranslationMode};
use crate::heuristic;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::overlay::{Overlay, PopupBody};
use crate::page::{NodeId, Page};
use crate::selector::Selector;
use crate::target::{Progress, TargetRecord, TargetRegistry, TargetState};
use crate::translate::circuit::ErrorCircuit;
use crate::translate::dedup::{Deduplicator, Origin, Settlement};
use crate::translate::{TranslateError, TranslationRequest};

/// Selections shorter than this are ignored.
pub const MIN_SELECTION_CHARS: usize = 2;

/// Why a rescan was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanTrigger {
    Activation,
    /// Coalesced with other scroll/mutation triggers.
    Scroll,
    /// Coalesced with other scroll/mutation triggers.
    Mutation,
    Manual,
}

impl RescanTrigger {
    fn is_debounced(self) -> bool {
        matches!(self, RescanTrigger::Scroll | RescanTrigger::Mutation)
    }
}

#[derive(Default)]
struct Inner {
    active: bool,
    in_flight: usize,
    targets: TargetRegistry,
    /// Latest deadline for the pending coalesced rescan.
    rescan_deadline: Option<Instant>,
    rescan_pending: bool,
    /// Backend calls whose error this batch has already painted.
    painted_calls: HashSet<u64>,
}

pub struct Scheduler {
    page: Arc<dyn Page>,
    overlay: Overlay,
    selector: Selector,
    dedup: Arc<Deduplicator>,
    settings: Arc<SettingsStore>,
    config: EngineConfig,
    metrics: Arc<MetricsRegistry>,
    batch: BatchClock,
    inner: Mutex<Inner>,
    popup_seq: AtomicU64,
}

impl Scheduler {
    pub fn new(
        page: Arc<dyn Page>,
        dedup: Arc<Deduplicator>,
        settings: Arc<SettingsStore>,
        config: EngineConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            overlay: Overlay::new(Arc::clone(&page)),
            selector: Selector::new(&config),
            page,
            dedup,
            settings,
            config,
            metrics,
            batch: BatchClock::new(),
            inner: Mutex::new(Inner::default()),
            popup_seq: AtomicU64::new(0),
        })
    }

    /// Activate and scan immediately. No-op while already active.
    pub fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.active {
                return;
            }
            inner.active = true;
            inner.painted_calls.clear();
            let batch = self.batch.advance();
            info!(batch, "translation_started");
        }
        self.scan_and_admit(RescanTrigger::Activation);
    }

    /// Stop admitting work. In-flight calls run to completion and fill the
    /// cache, but their results are not painted. Loading indicators go away
    /// now; painted translations stay.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let was_active = inner.active;
        inner.active = false;
        inner.rescan_deadline = None;
        inner.rescan_pending = false;
        inner.targets.clear();
        inner.painted_calls.clear();
        let batch = self.batch.advance();
        let removed = self.overlay.remove_all_loading();
        if was_active {
            info!(batch, in_flight = inner.in_flight, removed, "translation_stopped");
        }
    }

    /// Stop and remove every overlay node: the page looks untouched again.
    pub fn reset(&self) {
        self.stop();
        let removed = self.overlay.clear_all();
        info!(removed, "translation_reset");
    }

    /// Re-run the selector. Scroll and mutation triggers are coalesced into one
    /// scan after `rescan_quiet` without further triggers.
    pub fn request_rescan(self: &Arc<Self>, trigger: RescanTrigger) {
        if !trigger.is_debounced() {
            self.scan_and_admit(trigger);
            return;
        }

        let guard = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            inner.rescan_deadline = Some(Instant::now() + self.config.rescan_quiet);
            if inner.rescan_pending {
                return;
            }
            inner.rescan_pending = true;
            self.batch.guard()
        };
        tokio::spawn(Arc::clone(self).debounced_rescan(trigger, guard));
    }

    async fn debounced_rescan(self: Arc<Self>, trigger: RescanTrigger, guard: BatchGuard) {
        loop {
            if guard.is_cancelled() {
                return;
            }
            let deadline = {
                let mut inner = self.inner.lock();
                match inner.rescan_deadline {
                    Some(deadline) if deadline > Instant::now() => deadline,
                    _ => {
                        inner.rescan_deadline = None;
                        inner.rescan_pending = false;
                        break;
                    }
                }
            };
            tokio::select! {
                _ = guard.token().cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        if guard.is_current() {
            self.scan_and_admit(trigger);
        }
    }

    /// Forward triggers from a page observer until its sender is dropped.
    pub fn subscribe_triggers(self: &Arc<Self>, mut rx: mpsc::Receiver<RescanTrigger>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                scheduler.request_rescan(trigger);
            }
            debug!("trigger_stream_closed");
        })
    }

    /// React to pushed settings: a mode change while active restarts from a
    /// clean page.
    pub fn watch_settings(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.settings.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut mode = rx.borrow_and_update().translation_mode;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().translation_mode;
                if next == mode {
                    continue;
                }
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                info!(from = ?mode, to = ?next, "translation_mode_changed");
                mode = next;
                if scheduler.is_active() {
                    scheduler.reset();
                    scheduler.start();
                }
            }
        })
    }

    fn scan_and_admit(self: &Arc<Self>, trigger: RescanTrigger) {
        if !self.is_active() {
            return;
        }
        let span = self.metrics.span(metric_names::SCAN);
        let mode: TranslationMode = self.settings.current().translation_mode;
        let candidates = self.selector.collect_candidates(self.page.as_ref(), mode);
        let found = candidates.len();

        let admitted = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            candidates
                .into_iter()
                .filter(|c| inner.targets.enqueue(c.node, c.text.clone()))
                .count()
        };
        let scan_ms = span.finish();
        debug!(trigger = ?trigger, found, admitted, scan_ms, "scan_completed");
        self.pump();
    }

    /// Admit queued targets while below the concurrency bound.
    fn pump(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        while inner.active && inner.in_flight < self.config.max_concurrent {
            let Some(node) = inner.targets.pop_queued() else {
                break;
            };
            if !self.page.contains(node) {
                inner.targets.transition(node, TargetState::Skipped);
                debug!(node = node.0, "target_vanished_before_admission");
                continue;
            }
            let Some((snapshot, queued_at)) = inner
                .targets
                .get(node)
                .map(|r| (r.snapshot.clone(), r.queued_at))
            else {
                continue;
            };
            inner.targets.transition(node, TargetState::InFlight);
            inner.in_flight += 1;
            let waited_ms = queued_at.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record(metric_names::QUEUE_WAIT, waited_ms);

            self.overlay.show_loading(node);
            let guard = self.batch.guard();
            debug!(batch = guard.batch_id(), node = node.0, in_flight = inner.in_flight, "target_admitted");
            tokio::spawn(Arc::clone(self).run_target(node, snapshot, guard));
        }
    }

    async fn run_target(self: Arc<Self>, node: NodeId, snapshot: String, guard: BatchGuard) {
        let settings = self.settings.current();
        let settlement = match TranslationRequest::with_settings(&snapshot, &settings) {
            Ok(request) => self.dedup.settle(&request).await,
            Err(e) => Settlement::local(Err(e), Origin::Rejected),
        };
        self.finish(node, guard, settlement);
    }

    fn finish(self: &Arc<Self>, node: NodeId, guard: BatchGuard, settlement: Settlement) {
        {
            let mut inner = self.inner.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);

            if !guard.is_current() {
                self.metrics.increment(metric_names::STALE_RESULT);
                debug!(
                    batch = guard.batch_id(),
                    current = self.batch.current(),
                    node = node.0,
                    ok = settlement.outcome.is_ok(),
                    "stale_result_not_painted"
                );
            } else {
                self.settle_target(&mut inner, node, settlement);
            }
        }
        self.pump();
    }

    fn settle_target(&self, inner: &mut Inner, node: NodeId, settlement: Settlement) {
        let Inner {
            targets,
            painted_calls,
            ..
        } = inner;
        self.overlay.remove_loading(node);
        if let Some(record) = targets.get(node) {
            let settled_ms = record.queued_at.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record(metric_names::TARGET_SETTLED, settled_ms);
        }

        if !self.page.contains(node) {
            targets.transition(node, TargetState::Skipped);
            debug!(node = node.0, "target_vanished_before_paint");
            return;
        }

        match settlement.outcome {
            Ok(translation) => {
                self.overlay.show_result(node, &translation);
                targets.transition(node, TargetState::Translated);
                debug!(node = node.0, chars = translation.chars().count(), "target_translated");
            }
            Err(e) => {
                let message = e.to_string();
                // The first target of this batch to see a call's error owns
                // its notice, whether it led the call or joined it.
                let owner = settlement.call.map_or(true, |call| painted_calls.insert(call));
                if self.should_paint_error(owner, &e) {
                    self.overlay.show_error(node, &message);
                } else {
                    debug!(node = node.0, error = %e, "error_notice_suppressed");
                }
                warn!(node = node.0, kind = ?e.kind(), error = %e, "target_errored");
                targets.mark_errored(node, message);
            }
        }
    }

    /// One painted error per call; connectivity-class errors additionally at
    /// most once per cool-down window.
    fn should_paint_error(&self, owner: bool, error: &TranslateError) -> bool {
        if !owner {
            return false;
        }
        !error.kind().is_connectivity_class() || self.circuit().claim_notice()
    }

    /// Translate a user selection into the floating popup. `None` when the
    /// selection is too short or already in the target language.
    pub async fn translate_selection(
        self: &Arc<Self>,
        anchor: NodeId,
        text: &str,
    ) -> Option<Result<String, TranslateError>> {
        let text = text.trim();
        if text.chars().count() < MIN_SELECTION_CHARS || !heuristic::needs_translation(text) {
            return None;
        }
        let seq = self.popup_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.overlay.show_popup(anchor, PopupBody::Loading);

        let settings = self.settings.current();
        let outcome = match TranslationRequest::with_settings(text, &settings) {
            Ok(request) => self.dedup.request_translation(&request).await,
            Err(e) => Err(e),
        };

        // A newer selection owns the popup now.
        if self.popup_seq.load(Ordering::SeqCst) == seq {
            let body = match &outcome {
                Ok(translation) => PopupBody::Translation(translation.clone()),
                Err(e) => PopupBody::Error(e.to_string()),
            };
            self.overlay.show_popup(anchor, body);
        }
        Some(outcome)
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn progress(&self) -> Progress {
        self.inner.lock().targets.progress()
    }

    pub fn target(&self, node: NodeId) -> Option<TargetRecord> {
        self.inner.lock().targets.get(node).cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn batch_id(&self) -> u64 {
        self.batch.current()
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn circuit(&self) -> &Arc<ErrorCircuit> {
        self.dedup.circuit()
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
