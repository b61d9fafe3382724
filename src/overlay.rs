//! Overlay renderer: loading indicators, inline translations, error notices
//! and the selection popup. Everything it creates carries [`MARKER_CLASS`],
//! so `clear_all` never has to guess at page structure.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::page::{NewElement, NodeId, Page};

pub const MARKER_CLASS: &str = "translator-overlay";
pub const LOADING_CLASS: &str = "translator-loading";
pub const ANNOTATION_CLASS: &str = "translator-paragraph-translation";
pub const ERROR_CLASS: &str = "translator-error";
pub const POPUP_CLASS: &str = "translator-popup";

const LOADING_TEXT: &str = "翻译中...";

/// Content of the floating selection popup.
#[derive(Debug, Clone, PartialEq)]
pub enum PopupBody {
    Loading,
    Translation(String),
    Error(String),
}

pub struct Overlay {
    page: Arc<dyn Page>,
    /// Target → the overlay element currently anchored after it.
    anchors: Mutex<HashMap<NodeId, NodeId>>,
    popup: Mutex<Option<NodeId>>,
}

impl Overlay {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self {
            page,
            anchors: Mutex::new(HashMap::new()),
            popup: Mutex::new(None),
        }
    }

    pub fn show_loading(&self, target: NodeId) -> Option<NodeId> {
        self.place(target, LOADING_CLASS, LOADING_TEXT.to_string())
    }

    pub fn show_result(&self, target: NodeId, text: &str) -> Option<NodeId> {
        self.place(target, ANNOTATION_CLASS, text.to_string())
    }

    pub fn show_error(&self, target: NodeId, message: &str) -> Option<NodeId> {
        self.place(target, ERROR_CLASS, format!("翻译失败: {message}"))
    }

    /// Remove the loading indicator of `target`, if there is one. Works even
    /// when the target itself has left the page.
    pub fn remove_loading(&self, target: NodeId) -> bool {
        let mut anchors = self.anchors.lock();
        match anchors.get(&target).copied() {
            Some(node) if self.page.has_class(node, LOADING_CLASS) => {
                anchors.remove(&target);
                self.page.remove(node)
            }
            _ => false,
        }
    }

    /// Remove every loading indicator on the page. The selection popup is
    /// not a batch indicator and stays.
    pub fn remove_all_loading(&self) -> usize {
        let nodes: Vec<NodeId> = self
            .page
            .nodes_with_class(LOADING_CLASS)
            .into_iter()
            .filter(|&n| !self.page.has_class(n, POPUP_CLASS))
            .collect();
        self.anchors.lock().retain(|_, overlay| !nodes.contains(overlay));
        nodes.into_iter().filter(|&n| self.page.remove(n)).count()
    }

    /// Remove everything this renderer created.
    pub fn clear_all(&self) -> usize {
        self.anchors.lock().clear();
        *self.popup.lock() = None;
        let removed = self
            .page
            .nodes_with_class(MARKER_CLASS)
            .into_iter()
            .filter(|&n| self.page.remove(n))
            .count();
        debug!(removed, "overlay_cleared");
        removed
    }

    /// Manual dismissal: a double-clicked translation or error notice is removed.
    pub fn handle_double_click(&self, node: NodeId) -> bool {
        let dismissible = self.page.has_class(node, ANNOTATION_CLASS)
            || self.page.has_class(node, ERROR_CLASS);
        if !dismissible {
            return false;
        }
        self.anchors.lock().retain(|_, overlay| *overlay != node);
        let mut popup = self.popup.lock();
        if *popup == Some(node) {
            *popup = None;
        }
        self.page.remove(node)
    }

    /// The overlay element currently anchored to `target`.
    pub fn anchored(&self, target: NodeId) -> Option<NodeId> {
        self.anchors
            .lock()
            .get(&target)
            .copied()
            .filter(|&n| self.page.contains(n))
    }

    /// Show the floating popup near `anchor`, replacing any previous one.
    pub fn show_popup(&self, anchor: NodeId, body: PopupBody) -> Option<NodeId> {
        let (classes, text): (&[&str], String) = match body {
            PopupBody::Loading => (&[MARKER_CLASS, POPUP_CLASS, LOADING_CLASS][..], LOADING_TEXT.into()),
            PopupBody::Translation(text) => (&[MARKER_CLASS, POPUP_CLASS][..], text),
            PopupBody::Error(message) => (
                &[MARKER_CLASS, POPUP_CLASS, ERROR_CLASS][..],
                format!("翻译失败: {message}"),
            ),
        };
        let mut popup = self.popup.lock();
        if let Some(old) = popup.take() {
            self.page.remove(old);
        }
        // Floating: attached to the body, positioned by the host near the anchor.
        if !self.page.contains(anchor) {
            return None;
        }
        let node = self
            .page
            .append_child(self.page.body(), NewElement::new("div", classes, text))?;
        *popup = Some(node);
        Some(node)
    }

    pub fn hide_popup(&self) -> bool {
        match self.popup.lock().take() {
            Some(node) => self.page.remove(node),
            None => false,
        }
    }

    pub fn popup(&self) -> Option<NodeId> {
        *self.popup.lock()
    }

    /// Replace whatever overlay is anchored after `target` with a new one.
    fn place(&self, target: NodeId, class: &str, text: String) -> Option<NodeId> {
        if !self.page.contains(target) {
            return None;
        }
        let mut anchors = self.anchors.lock();
        if let Some(existing) = anchors.remove(&target) {
            self.page.remove(existing);
        }
        let node = self
            .page
            .insert_after(target, NewElement::new("div", &[MARKER_CLASS, class], text))?;
        anchors.insert(target, node);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPage;

    fn setup() -> (Arc<MemoryPage>, Overlay, NodeId) {
        let page = Arc::new(MemoryPage::new());
        let para = page.append_element(page.body(), "p", "Hello world, translate me");
        page.append_element(page.body(), "p", "Next paragraph");
        let overlay = Overlay::new(page.clone());
        (page, overlay, para)
    }

    #[test]
    fn result_replaces_loading_right_after_target() {
        let (page, overlay, para) = setup();
        let loading = overlay.show_loading(para).unwrap();
        assert_eq!(page.next_element_sibling(para), Some(loading));

        let note = overlay.show_result(para, "你好世界").unwrap();
        assert!(!page.contains(loading));
        assert_eq!(page.next_element_sibling(para), Some(note));
        assert!(page.has_class(note, ANNOTATION_CLASS));
        assert_eq!(page.text_content(note).as_deref(), Some("你好世界"));
        assert!(!overlay.remove_loading(para));
    }

    #[test]
    fn clear_all_removes_only_marked_nodes() {
        let (page, overlay, para) = setup();
        overlay.show_result(para, "译文");
        overlay.show_popup(para, PopupBody::Translation("弹窗".into()));
        assert_eq!(overlay.clear_all(), 2);
        assert_eq!(page.children(page.body()).len(), 2);
        assert!(page.contains(para));
        assert_eq!(overlay.popup(), None);
    }

    #[test]
    fn double_click_dismisses_annotations_only() {
        let (page, overlay, para) = setup();
        let loading = overlay.show_loading(para).unwrap();
        assert!(!overlay.handle_double_click(loading));
        assert!(!overlay.handle_double_click(para));
        let note = overlay.show_result(para, "译文").unwrap();
        assert!(overlay.handle_double_click(note));
        assert!(!page.contains(note));
        assert!(page.contains(para));
        assert_eq!(overlay.anchored(para), None);
    }

    #[test]
    fn loading_of_removed_target_is_still_cleaned_up() {
        let (page, overlay, para) = setup();
        let loading = overlay.show_loading(para).unwrap();
        page.remove(para);
        assert!(overlay.remove_loading(para));
        assert!(!page.contains(loading));
    }

    #[test]
    fn popup_is_replaced_not_stacked() {
        let (page, overlay, para) = setup();
        let first = overlay.show_popup(para, PopupBody::Loading).unwrap();
        let second = overlay
            .show_popup(para, PopupBody::Error("timed out".into()))
            .unwrap();
        assert!(!page.contains(first));
        assert_eq!(page.nodes_with_class(POPUP_CLASS), vec![second]);
        assert!(overlay.hide_popup());
        assert!(page.nodes_with_class(POPUP_CLASS).is_empty());
    }

    #[test]
    fn loading_popup_survives_batch_cleanup() {
        let (page, overlay, para) = setup();
        let loading = overlay.show_loading(para).unwrap();
        let popup = overlay.show_popup(para, PopupBody::Loading).unwrap();

        assert_eq!(overlay.remove_all_loading(), 1);
        assert!(!page.contains(loading));
        assert!(page.contains(popup));
        assert_eq!(overlay.popup(), Some(popup));

        let done = overlay
            .show_popup(para, PopupBody::Translation("译文".into()))
            .unwrap();
        assert!(!page.contains(popup));
        assert_eq!(page.nodes_with_class(POPUP_CLASS), vec![done]);
    }
}
