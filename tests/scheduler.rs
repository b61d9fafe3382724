mod common;

use std::time::Duration;

use common::{request, settle, translated, wait_until, FakeBackend, Harness};
use inline_translate::config::{EngineConfig, TranslationMode};
use inline_translate::metrics::metric_names;
use inline_translate::overlay::{ANNOTATION_CLASS, ERROR_CLASS, LOADING_CLASS, MARKER_CLASS};
use inline_translate::page::{NodeId, Page, Rect};
use inline_translate::scheduler::RescanTrigger;
use inline_translate::target::TargetState;
use inline_translate::translate::TranslateError;
use tokio::sync::mpsc;

const PARAGRAPH: &str = "The quick brown fox jumps over the lazy dog.";

fn paragraph(h: &Harness, text: &str) -> NodeId {
    h.page.append_element(h.page.body(), "p", text)
}

#[tokio::test(start_paused = true)]
async fn single_paragraph_end_to_end() {
    let h = Harness::new(FakeBackend::gated());
    let para = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;

    let loading = h.page.next_element_sibling(para).unwrap();
    assert!(h.page.has_class(loading, LOADING_CLASS));
    assert_eq!(h.scheduler.target(para).unwrap().state, TargetState::InFlight);

    h.backend.release(1);
    wait_until(|| h.scheduler.progress().translated == 1).await;

    let note = h.page.next_element_sibling(para).unwrap();
    assert!(h.page.has_class(note, ANNOTATION_CLASS));
    assert_eq!(h.page.text_content(note), Some(translated(PARAGRAPH)));
    assert!(!h.page.contains(loading));
    assert!(h.page.nodes_with_class(LOADING_CLASS).is_empty());
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn unchanged_content_is_not_retranslated() {
    let h = Harness::new(FakeBackend::echo());
    paragraph(&h, PARAGRAPH);
    paragraph(&h, "Another paragraph with enough English words.");

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 2).await;
    let inserts = h.page.insert_count();

    h.scheduler.request_rescan(RescanTrigger::Scroll);
    h.scheduler.request_rescan(RescanTrigger::Scroll);
    tokio::time::sleep(Duration::from_millis(400)).await;
    h.scheduler.request_rescan(RescanTrigger::Manual);
    settle().await;

    assert_eq!(h.backend.calls(), 2);
    assert_eq!(h.page.insert_count(), inserts);
    assert_eq!(h.page.nodes_with_class(ANNOTATION_CLASS).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn result_of_stopped_batch_is_cached_but_not_painted() {
    let h = Harness::new(FakeBackend::gated());
    let para = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;
    h.scheduler.stop();

    // Loading indicators go immediately; target state is forgotten.
    assert!(h.page.nodes_with_class(LOADING_CLASS).is_empty());
    assert!(h.scheduler.target(para).is_none());

    h.backend.release(1);
    let key = request(PARAGRAPH).cache_key();
    let cache = h.pipeline.dedup.cache().clone();
    wait_until(|| cache.has(&key)).await;
    wait_until(|| h.scheduler.in_flight() == 0).await;

    assert!(h.page.nodes_with_class(ANNOTATION_CLASS).is_empty());
    assert_eq!(h.page.insert_count(), 1, "only the loading indicator was ever inserted");
    assert_eq!(h.pipeline.metrics.counter(metric_names::STALE_RESULT), 1);

    // Restart paints from the cache with no new call.
    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_targets_are_bounded() {
    let h = Harness::new(FakeBackend::gated());
    for i in 0..5 {
        paragraph(&h, &format!("Paragraph number {i} with some English text."));
    }

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 2).await;
    settle().await;
    assert_eq!(h.backend.calls(), 2);
    let progress = h.scheduler.progress();
    assert_eq!(progress.in_flight, 2);
    assert_eq!(progress.queued, 3);

    // One settles, the next is admitted right away.
    h.backend.release(1);
    wait_until(|| h.backend.calls() == 3).await;
    assert_eq!(h.scheduler.in_flight(), 2);

    h.backend.release(10);
    wait_until(|| h.scheduler.progress().translated == 5).await;
    assert_eq!(h.backend.calls(), 5);
    assert!(h.backend.max_active() <= 2);
}

#[tokio::test(start_paused = true)]
async fn identical_paragraphs_share_one_call() {
    let h = Harness::new(FakeBackend::gated());
    let nodes: Vec<_> = (0..3).map(|_| paragraph(&h, PARAGRAPH)).collect();

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;
    h.backend.release(1);
    wait_until(|| h.scheduler.progress().translated == 3).await;

    assert_eq!(h.backend.calls(), 1);
    for node in nodes {
        let note = h.page.next_element_sibling(node).unwrap();
        assert_eq!(h.page.text_content(note), Some(translated(PARAGRAPH)));
    }
}

#[tokio::test(start_paused = true)]
async fn connectivity_errors_paint_one_notice() {
    let h = Harness::new(FakeBackend::failing(TranslateError::Connectivity(
        "connection refused".into(),
    )));
    let nodes: Vec<_> = (0..4)
        .map(|i| paragraph(&h, &format!("Unreachable paragraph {i} in English.")))
        .collect();

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().errored == 4).await;

    assert_eq!(h.page.nodes_with_class(ERROR_CLASS).len(), 1);
    assert!(h.scheduler.circuit().is_tripped());
    assert!(h.backend.calls() <= 4);
    // Suppressed errors are still recorded.
    for node in nodes {
        let record = h.scheduler.target(node).unwrap();
        assert_eq!(record.state, TargetState::Errored);
        assert!(record.error.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn configuration_errors_are_painted_per_call() {
    let h = Harness::new(FakeBackend::failing(TranslateError::Configuration(
        "model \"qwen\" not found".into(),
    )));
    paragraph(&h, "First paragraph that needs a model.");
    paragraph(&h, "Second paragraph that needs a model.");

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().errored == 2).await;
    assert_eq!(h.page.nodes_with_class(ERROR_CLASS).len(), 2);
    assert!(!h.scheduler.circuit().is_tripped());
}

#[tokio::test(start_paused = true)]
async fn joined_waiter_does_not_repaint_the_error() {
    let h = Harness::new(FakeBackend::gated_failing(TranslateError::backend(
        "54004",
        "insufficient balance",
    )));
    let first = paragraph(&h, PARAGRAPH);
    let second = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;
    settle().await;
    h.backend.release(1);
    wait_until(|| h.scheduler.progress().errored == 2).await;

    assert_eq!(h.page.nodes_with_class(ERROR_CLASS).len(), 1);
    assert!(h.page.has_class(h.page.next_element_sibling(first).unwrap(), ERROR_CLASS));
    let joined = h.scheduler.target(second).unwrap();
    assert!(joined.error.unwrap().contains("insufficient balance"));
}

#[tokio::test(start_paused = true)]
async fn restarted_batch_paints_the_error_of_a_call_it_joined() {
    let h = Harness::new(FakeBackend::gated_failing(TranslateError::Configuration(
        "model \"qwen\" not found".into(),
    )));
    let para = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;
    h.scheduler.stop();
    h.scheduler.start();
    // The new batch's target joins the call its stopped predecessor started.
    wait_until(|| h.pipeline.metrics.counter(metric_names::DEDUP_JOINED) == 1).await;

    h.backend.release(1);
    wait_until(|| h.scheduler.progress().errored == 1).await;

    assert_eq!(h.backend.calls(), 1);
    let errors = h.page.nodes_with_class(ERROR_CLASS);
    assert_eq!(errors.len(), 1);
    assert_eq!(h.page.next_element_sibling(para), Some(errors[0]));
}

#[tokio::test(start_paused = true)]
async fn translated_outer_block_is_not_split_on_rescan() {
    let h = Harness::new(FakeBackend::echo());
    h.pipeline
        .settings
        .update(|s| s.translation_mode = TranslationMode::Normal);
    let quote = h.page.append_element(h.page.body(), "blockquote", "");
    h.page.append_element(quote, "p", PARAGRAPH);
    h.page.append_element(quote, "p", "A second quoted paragraph in English.");

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;
    assert_eq!(h.scheduler.target(quote).unwrap().state, TargetState::Translated);

    h.scheduler.request_rescan(RescanTrigger::Manual);
    settle().await;

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.page.nodes_with_class(ANNOTATION_CLASS).len(), 1);
    assert_eq!(h.scheduler.progress().total(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_restores_the_page_and_allows_a_fresh_run() {
    let h = Harness::new(FakeBackend::echo());
    let para = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;

    h.scheduler.reset();
    assert!(!h.scheduler.is_active());
    assert!(h.page.nodes_with_class(MARKER_CLASS).is_empty());
    assert_eq!(h.page.children(h.page.body()), vec![para]);
    assert_eq!(h.scheduler.progress().total(), 0);

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;
    assert_eq!(h.backend.calls(), 1, "second run is served from the cache");
    assert!(h.page.has_class(h.page.next_element_sibling(para).unwrap(), ANNOTATION_CLASS));
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_translations_and_restart_skips_them() {
    let h = Harness::new(FakeBackend::echo());
    paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;
    let inserts = h.page.insert_count();

    h.scheduler.stop();
    assert_eq!(h.page.nodes_with_class(ANNOTATION_CLASS).len(), 1);

    h.scheduler.start();
    settle().await;
    assert_eq!(h.page.insert_count(), inserts);
    assert_eq!(h.scheduler.progress().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn scroll_triggers_are_coalesced() {
    let h = Harness::new(FakeBackend::echo());
    paragraph(&h, PARAGRAPH);
    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;

    let below = paragraph(&h, "A paragraph that starts far below the fold.");
    h.page.set_rect(below, Rect::new(2000.0, 0.0, 600.0, 20.0));
    h.page.scroll_by(1500.0);

    for _ in 0..5 {
        h.scheduler.request_rescan(RescanTrigger::Scroll);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Still inside the quiet window of the last trigger.
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.pipeline.metrics.summary()[metric_names::SCAN].count, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    wait_until(|| h.scheduler.progress().translated == 2).await;
    assert_eq!(h.pipeline.metrics.summary()[metric_names::SCAN].count, 2);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_pending_rescan() {
    let h = Harness::new(FakeBackend::echo());
    h.scheduler.start();
    h.scheduler.request_rescan(RescanTrigger::Mutation);
    h.scheduler.stop();

    paragraph(&h, PARAGRAPH);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(h.pipeline.metrics.summary()[metric_names::SCAN].count, 1);
}

#[tokio::test(start_paused = true)]
async fn observer_triggers_drive_rescans() {
    let h = Harness::new(FakeBackend::echo());
    let (tx, rx) = mpsc::channel(8);
    h.scheduler.subscribe_triggers(rx);
    h.scheduler.start();

    paragraph(&h, PARAGRAPH);
    tx.send(RescanTrigger::Mutation).await.unwrap();
    wait_until(|| h.scheduler.progress().translated == 1).await;
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn vanished_target_is_skipped() {
    let h = Harness::new(FakeBackend::gated());
    let para = paragraph(&h, PARAGRAPH);

    h.scheduler.start();
    wait_until(|| h.backend.calls() == 1).await;
    h.page.remove(para);
    h.backend.release(1);

    wait_until(|| h.scheduler.progress().skipped == 1).await;
    assert!(h.page.nodes_with_class(MARKER_CLASS).is_empty());
    assert!(h.pipeline.dedup.cache().has(&request(PARAGRAPH).cache_key()));
}

#[tokio::test(start_paused = true)]
async fn mode_change_restarts_with_new_selection() {
    let h = Harness::with_config(
        FakeBackend::echo(),
        EngineConfig {
            max_concurrent: 3,
            ..EngineConfig::default()
        },
    );
    let body = h.page.body();
    let outside = h.page.append_element(body, "p", "Sidebar text that sits outside the article.");
    let article = h.page.append_element(body, "article", "");
    h.page.append_element(article, "h2", "An article heading in English");
    h.page.append_element(article, "p", PARAGRAPH);
    let list = h.page.append_element(article, "ul", "");
    let item = h.page.append_element(list, "li", "A list item with enough English text.");

    h.scheduler.watch_settings();
    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 2).await;
    assert!(h.scheduler.target(outside).is_none());
    assert!(h.scheduler.target(item).is_none());

    h.pipeline
        .settings
        .update(|s| s.translation_mode = TranslationMode::Normal);
    wait_until(|| h.scheduler.progress().translated == 4).await;

    assert!(h.scheduler.is_active());
    assert_eq!(h.scheduler.target(outside).unwrap().state, TargetState::Translated);
    assert_eq!(h.scheduler.target(item).unwrap().state, TargetState::Translated);
    assert_eq!(h.page.nodes_with_class(ANNOTATION_CLASS).len(), 4);
    // Heading and paragraph came from the cache.
    assert_eq!(h.backend.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn selection_popup_uses_the_shared_cache() {
    let h = Harness::new(FakeBackend::echo());
    let para = paragraph(&h, PARAGRAPH);
    h.scheduler.start();
    wait_until(|| h.scheduler.progress().translated == 1).await;

    let out = h.scheduler.translate_selection(para, PARAGRAPH).await;
    assert_eq!(out, Some(Ok(translated(PARAGRAPH))));
    assert_eq!(h.backend.calls(), 1);
    let popup = h.scheduler.overlay().popup().unwrap();
    assert_eq!(h.page.text_content(popup), Some(translated(PARAGRAPH)));
    assert!(h.scheduler.overlay().hide_popup());
}
