//! Visible-content selector: which page blocks are worth translating right now.

use std::collections::HashSet;

use tracing::trace;

use crate::config::{EngineConfig, TranslationMode};
use crate::heuristic;
use crate::overlay::{ANNOTATION_CLASS, MARKER_CLASS};
use crate::page::{NodeId, Page};

const LIGHT_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "p"];
const NORMAL_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "td", "th", "blockquote", "dd", "dt",
    "figcaption",
];

/// Containers whose text is never translated.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "code", "pre", "textarea", "input", "button", "select",
    "option",
];

/// One block selected for translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    /// Trimmed, possibly truncated text captured now.
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Selector {
    min_chars: usize,
    max_text_chars: usize,
    vertical_margin: f64,
    horizontal_margin: f64,
}

impl Selector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            max_text_chars: config.max_text_chars,
            vertical_margin: config.vertical_margin,
            horizontal_margin: config.horizontal_margin,
        }
    }

    /// Candidates in document order.
    pub fn collect_candidates(&self, page: &dyn Page, mode: TranslationMode) -> Vec<Candidate> {
        let (root, tags) = match mode {
            TranslationMode::Light => (main_content_root(page), LIGHT_TAGS),
            TranslationMode::Normal => (page.body(), NORMAL_TAGS),
        };

        let mut picked: HashSet<NodeId> = HashSet::new();
        let mut out = Vec::new();
        for node in page.query_tags(root, tags) {
            let Some(text) = self.accept(page, node, &picked) else {
                continue;
            };
            picked.insert(node);
            out.push(Candidate { node, text });
        }
        out
    }

    fn accept(&self, page: &dyn Page, node: NodeId, picked: &HashSet<NodeId>) -> Option<String> {
        if !self.near_viewport(page, node) || !page.is_rendered(node) {
            return None;
        }
        if is_annotated(page, node) {
            trace!(node = node.0, "already_annotated");
            return None;
        }
        if is_excluded(page, node, picked) {
            return None;
        }
        let text = page.text_content(node)?;
        let text = text.trim();
        if text.chars().count() < self.min_chars || !heuristic::needs_translation(text) {
            return None;
        }
        Some(truncate(text, self.max_text_chars))
    }

    /// Within the proximity margin of the viewport; exact intersection not needed.
    fn near_viewport(&self, page: &dyn Page, node: NodeId) -> bool {
        let Some(rect) = page.bounding_rect(node) else {
            return false;
        };
        if rect.is_empty() {
            return false;
        }
        let viewport = page.viewport();
        rect.bottom() >= -self.vertical_margin
            && rect.top <= viewport.height + self.vertical_margin
            && rect.right() >= -self.horizontal_margin
            && rect.left <= viewport.width + self.horizontal_margin
    }
}

/// First `article`, else first `main`, else the body.
fn main_content_root(page: &dyn Page) -> NodeId {
    let body = page.body();
    ["article", "main"]
        .iter()
        .find_map(|tag| page.query_tags(body, &[*tag]).into_iter().next())
        .unwrap_or(body)
}

fn is_annotated(page: &dyn Page, node: NodeId) -> bool {
    has_annotation_sibling(page, node) || page.has_descendant_with_class(node, ANNOTATION_CLASS)
}

fn has_annotation_sibling(page: &dyn Page, node: NodeId) -> bool {
    page.next_element_sibling(node)
        .is_some_and(|next| page.has_class(next, ANNOTATION_CLASS))
}

/// Self or an ancestor is excluded or is one of our overlays. Nested blocks
/// are translated once, as the outer one: an ancestor picked in this pass or
/// already annotated covers the node.
fn is_excluded(page: &dyn Page, node: NodeId, picked: &HashSet<NodeId>) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n != node && (picked.contains(&n) || has_annotation_sibling(page, n)) {
            return true;
        }
        if page.has_class(n, MARKER_CLASS) {
            return true;
        }
        if page
            .tag_name(n)
            .is_some_and(|tag| EXCLUDED_TAGS.contains(&tag.as_str()))
        {
            return true;
        }
        if page.attribute(n, "data-no-translate").as_deref() == Some("true") {
            return true;
        }
        if page
            .attribute(n, "contenteditable")
            .is_some_and(|v| v != "false")
        {
            return true;
        }
        current = page.parent(n);
    }
    false
}

/// Cut to `max_chars` on a char boundary, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemoryPage, NewElement, Rect};

    const ENGLISH: &str = "The quick brown fox jumps over the lazy dog.";

    fn selector() -> Selector {
        Selector::new(&EngineConfig::default())
    }

    fn nodes(candidates: &[Candidate]) -> Vec<NodeId> {
        candidates.iter().map(|c| c.node).collect()
    }

    #[test]
    fn filters_in_document_order() {
        let page = MemoryPage::new();
        let body = page.body();
        let first = page.append_element(body, "p", ENGLISH);
        let short = page.append_element(body, "p", "Too short");
        let chinese = page.append_element(body, "p", "这是一个已经是中文的段落，不需要翻译。");
        let pre = page.append_element(body, "pre", "");
        let code_para = page.append_element(pre, "p", ENGLISH);
        let opted_out = page.append_element(body, "p", ENGLISH);
        page.set_attribute(opted_out, "data-no-translate", "true");
        let far = page.append_element(body, "p", ENGLISH);
        page.set_rect(far, Rect::new(3000.0, 0.0, 600.0, 20.0));
        let near = page.append_element(body, "p", ENGLISH);
        page.set_rect(near, Rect::new(1200.0, 0.0, 600.0, 20.0));
        let hidden = page.append_element(body, "p", ENGLISH);
        page.set_hidden(hidden, true);

        let picked = nodes(&selector().collect_candidates(&page, TranslationMode::Normal));
        assert_eq!(picked, vec![first, near]);
        for skipped in [short, chinese, code_para, opted_out, far, hidden] {
            assert!(!picked.contains(&skipped));
        }
    }

    #[test]
    fn light_mode_reads_article_headings_and_paragraphs() {
        let page = MemoryPage::new();
        let body = page.body();
        let nav = page.append_element(body, "p", "Navigation text outside the article");
        let article = page.append_element(body, "article", "");
        let heading = page.append_element(article, "h2", "A heading worth translating");
        let list = page.append_element(article, "ul", "");
        let item = page.append_element(list, "li", "A list item that light mode ignores");
        let para = page.append_element(article, "p", ENGLISH);

        let light = nodes(&selector().collect_candidates(&page, TranslationMode::Light));
        assert_eq!(light, vec![heading, para]);

        let normal = nodes(&selector().collect_candidates(&page, TranslationMode::Normal));
        assert_eq!(normal, vec![nav, heading, item, para]);
    }

    #[test]
    fn annotated_and_nested_blocks_are_skipped() {
        let page = MemoryPage::new();
        let body = page.body();
        let done = page.append_element(body, "p", ENGLISH);
        let note = page.append_element(body, "div", "译文");
        page.add_class(note, MARKER_CLASS);
        page.add_class(note, ANNOTATION_CLASS);
        let quote = page.append_element(body, "blockquote", "");
        let inner = page.append_element(quote, "p", ENGLISH);

        let picked = nodes(&selector().collect_candidates(&page, TranslationMode::Normal));
        assert_eq!(picked, vec![quote]);
        assert!(!picked.contains(&done));
        assert!(!picked.contains(&inner));
    }

    #[test]
    fn translated_outer_block_covers_its_paragraphs() {
        let page = MemoryPage::new();
        let body = page.body();
        let quote = page.append_element(body, "blockquote", "");
        page.append_element(quote, "p", ENGLISH);
        page.append_element(quote, "p", "Another quoted sentence in plain English.");
        let loose = page.append_element(body, "p", ENGLISH);

        let first = nodes(&selector().collect_candidates(&page, TranslationMode::Normal));
        assert_eq!(first, vec![quote, loose]);

        // Annotate both the way the overlay does, then scan again.
        for node in [quote, loose] {
            let note = page.insert_after(
                node,
                NewElement::new("div", &[MARKER_CLASS, ANNOTATION_CLASS], "译文"),
            );
            assert!(note.is_some());
        }
        assert!(selector()
            .collect_candidates(&page, TranslationMode::Normal)
            .is_empty());
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        assert_eq!(truncate("héllo wörld", 4), "héll...");
        assert_eq!(truncate("short", 10), "short");
        let page = MemoryPage::new();
        let long = "word ".repeat(2000);
        page.append_element(page.body(), "p", &long);
        let candidates = selector().collect_candidates(&page, TranslationMode::Normal);
        assert_eq!(candidates[0].text.chars().count(), 5003);
        assert!(candidates[0].text.ends_with("..."));
    }
}
