//! In-memory document used by tests and the CLI. Nodes live in an arena;
//! removal detaches a subtree but keeps its slots so stale ids read as absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{NewElement, NodeId, Page, Rect, Viewport};

const DEFAULT_RECT: Rect = Rect {
    top: 0.0,
    left: 0.0,
    width: 600.0,
    height: 20.0,
};

struct Node {
    tag: String,
    text: String,
    classes: Vec<String>,
    attributes: HashMap<String, String>,
    rect: Rect,
    hidden: bool,
    parent: Option<usize>,
    children: Vec<usize>,
    detached: bool,
}

impl Node {
    fn new(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            text: text.to_string(),
            classes: Vec::new(),
            attributes: HashMap::new(),
            rect: DEFAULT_RECT,
            hidden: false,
            parent: None,
            children: Vec::new(),
            detached: false,
        }
    }
}

struct Document {
    nodes: Vec<Node>,
    viewport: Viewport,
}

impl Document {
    fn live(&self, id: NodeId) -> Option<&Node> {
        let node = self.nodes.get(id.0 as usize)?;
        (!node.detached).then_some(node)
    }

    fn push(&mut self, mut node: Node, parent: usize) -> usize {
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Pre-order walk below `root`.
    fn descendants(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[root].children.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            out.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev().copied());
        }
        out
    }

    fn text_of(&self, idx: usize, out: &mut String) {
        out.push_str(&self.nodes[idx].text);
        for &child in &self.nodes[idx].children {
            self.text_of(child, out);
        }
    }

    fn detach(&mut self, idx: usize) {
        self.nodes[idx].detached = true;
        let children = self.nodes[idx].children.clone();
        for child in children {
            self.detach(child);
        }
    }
}

/// Arena-backed [`Page`]. Node 0 is `body`.
pub struct MemoryPage {
    doc: RwLock<Document>,
    inserted: AtomicUsize,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self {
            doc: RwLock::new(Document {
                nodes: vec![Node::new("body", "")],
                viewport: Viewport::default(),
            }),
            inserted: AtomicUsize::new(0),
        }
    }

    /// Append an element with its own text to `parent`.
    pub fn append_element(&self, parent: NodeId, tag: &str, text: &str) -> NodeId {
        let mut doc = self.doc.write();
        let parent_idx = parent.0 as usize;
        let idx = doc.push(Node::new(tag, text), parent_idx);
        doc.nodes[parent_idx].children.push(idx);
        NodeId(idx as u64)
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.doc.write().nodes.get_mut(node.0 as usize) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn add_class(&self, node: NodeId, class: &str) {
        if let Some(n) = self.doc.write().nodes.get_mut(node.0 as usize) {
            n.classes.push(class.to_string());
        }
    }

    pub fn set_rect(&self, node: NodeId, rect: Rect) {
        if let Some(n) = self.doc.write().nodes.get_mut(node.0 as usize) {
            n.rect = rect;
        }
    }

    pub fn set_hidden(&self, node: NodeId, hidden: bool) {
        if let Some(n) = self.doc.write().nodes.get_mut(node.0 as usize) {
            n.hidden = hidden;
        }
    }

    pub fn set_text(&self, node: NodeId, text: &str) {
        if let Some(n) = self.doc.write().nodes.get_mut(node.0 as usize) {
            n.text = text.to_string();
        }
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.doc.write().viewport = viewport;
    }

    /// Shift every element as if the page scrolled down by `dy` pixels.
    pub fn scroll_by(&self, dy: f64) {
        for node in self.doc.write().nodes.iter_mut() {
            node.rect.top -= dy;
        }
    }

    /// Attached children of `node`, in order.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let doc = self.doc.read();
        doc.live(node)
            .map(|n| n.children.iter().map(|&c| NodeId(c as u64)).collect())
            .unwrap_or_default()
    }

    /// Elements created through `insert_after`/`append_child` so far.
    pub fn insert_count(&self) -> usize {
        self.inserted.load(Ordering::SeqCst)
    }

    fn insert_at(&self, parent_idx: usize, position: usize, element: NewElement) -> NodeId {
        let mut doc = self.doc.write();
        let mut node = Node::new(&element.tag, &element.text);
        node.classes = element.classes;
        let idx = doc.push(node, parent_idx);
        doc.nodes[parent_idx].children.insert(position, idx);
        self.inserted.fetch_add(1, Ordering::SeqCst);
        NodeId(idx as u64)
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl Page for MemoryPage {
    fn body(&self) -> NodeId {
        NodeId(0)
    }

    fn query_tags(&self, root: NodeId, tags: &[&str]) -> Vec<NodeId> {
        let doc = self.doc.read();
        if doc.live(root).is_none() {
            return Vec::new();
        }
        doc.descendants(root.0 as usize)
            .into_iter()
            .filter(|&idx| tags.contains(&doc.nodes[idx].tag.as_str()))
            .map(|idx| NodeId(idx as u64))
            .collect()
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.doc.read().live(node).map(|n| n.tag.clone())
    }

    fn text_content(&self, node: NodeId) -> Option<String> {
        let doc = self.doc.read();
        doc.live(node)?;
        let mut out = String::new();
        doc.text_of(node.0 as usize, &mut out);
        Some(out)
    }

    fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        self.doc.read().live(node).map(|n| n.rect)
    }

    fn viewport(&self) -> Viewport {
        self.doc.read().viewport
    }

    fn is_rendered(&self, node: NodeId) -> bool {
        let doc = self.doc.read();
        let mut current = Some(node.0 as usize);
        while let Some(idx) = current {
            match doc.nodes.get(idx) {
                Some(n) if !n.detached && !n.hidden => current = n.parent,
                _ => return false,
            }
        }
        true
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.doc.read().live(node)?.attributes.get(name).cloned()
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.doc
            .read()
            .live(node)
            .is_some_and(|n| n.classes.iter().any(|c| c == class))
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.doc
            .read()
            .live(node)?
            .parent
            .map(|p| NodeId(p as u64))
    }

    fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let doc = self.doc.read();
        let parent = doc.live(node)?.parent?;
        let siblings = &doc.nodes[parent].children;
        let pos = siblings.iter().position(|&c| c == node.0 as usize)?;
        siblings.get(pos + 1).map(|&c| NodeId(c as u64))
    }

    fn contains(&self, node: NodeId) -> bool {
        self.doc.read().live(node).is_some()
    }

    fn has_descendant_with_class(&self, node: NodeId, class: &str) -> bool {
        let doc = self.doc.read();
        if doc.live(node).is_none() {
            return false;
        }
        doc.descendants(node.0 as usize)
            .into_iter()
            .any(|idx| doc.nodes[idx].classes.iter().any(|c| c == class))
    }

    fn insert_after(&self, anchor: NodeId, element: NewElement) -> Option<NodeId> {
        let (parent, position) = {
            let doc = self.doc.read();
            let parent = doc.live(anchor)?.parent?;
            let pos = doc.nodes[parent]
                .children
                .iter()
                .position(|&c| c == anchor.0 as usize)?;
            (parent, pos + 1)
        };
        Some(self.insert_at(parent, position, element))
    }

    fn append_child(&self, parent: NodeId, element: NewElement) -> Option<NodeId> {
        let position = self.doc.read().live(parent)?.children.len();
        Some(self.insert_at(parent.0 as usize, position, element))
    }

    fn remove(&self, node: NodeId) -> bool {
        let mut doc = self.doc.write();
        let idx = node.0 as usize;
        if idx == 0 || doc.live(node).is_none() {
            return false;
        }
        if let Some(parent) = doc.nodes[idx].parent {
            doc.nodes[parent].children.retain(|&c| c != idx);
        }
        doc.detach(idx);
        true
    }

    fn nodes_with_class(&self, class: &str) -> Vec<NodeId> {
        let doc = self.doc.read();
        doc.descendants(0)
            .into_iter()
            .filter(|&idx| doc.nodes[idx].classes.iter().any(|c| c == class))
            .map(|idx| NodeId(idx as u64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_after_lands_between_siblings() {
        let page = MemoryPage::new();
        let body = page.body();
        let first = page.append_element(body, "p", "one");
        let second = page.append_element(body, "p", "two");

        let note = page
            .insert_after(first, NewElement::new("div", &["note"], "uno"))
            .unwrap();
        assert_eq!(page.children(body), vec![first, note, second]);
        assert_eq!(page.next_element_sibling(first), Some(note));
        assert_eq!(page.nodes_with_class("note"), vec![note]);
        assert_eq!(page.insert_count(), 1);
    }

    #[test]
    fn removed_subtree_reads_as_absent() {
        let page = MemoryPage::new();
        let article = page.append_element(page.body(), "article", "");
        let para = page.append_element(article, "p", "inside");
        assert_eq!(page.text_content(article).as_deref(), Some("inside"));

        assert!(page.remove(article));
        assert!(!page.contains(para));
        assert!(!page.is_rendered(para));
        assert!(page.query_tags(page.body(), &["p"]).is_empty());
        assert!(!page.remove(article));
    }

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let page = MemoryPage::new();
        let section = page.append_element(page.body(), "section", "");
        let para = page.append_element(section, "p", "text");
        assert!(page.is_rendered(para));
        page.set_hidden(section, true);
        assert!(!page.is_rendered(para));
    }
}
