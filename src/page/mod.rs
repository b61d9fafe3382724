//! Page boundary. The orchestrator reads and annotates the document only
//! through [`Page`]; it never owns node lifetimes and tolerates nodes
//! vanishing between any two calls.

pub mod memory;

use serde::Serialize;

pub use memory::MemoryPage;

/// Opaque handle to a page element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u64);

/// Viewport-relative box, like a client bounding rect.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self { top, left, width, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 && self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

/// Element to be created by the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct NewElement {
    pub tag: String,
    pub classes: Vec<String>,
    pub text: String,
}

impl NewElement {
    pub fn new(tag: &str, classes: &[&str], text: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            text: text.into(),
        }
    }
}

/// Live document access. Every query answers for the document as it is now;
/// a removed or unknown node reads as absent.
pub trait Page: Send + Sync {
    fn body(&self) -> NodeId;

    /// Descendants of `root` whose tag is in `tags`, in document order.
    fn query_tags(&self, root: NodeId, tags: &[&str]) -> Vec<NodeId>;

    /// Lower-case tag name.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    /// Concatenated text of the node and its descendants.
    fn text_content(&self, node: NodeId) -> Option<String>;

    fn bounding_rect(&self, node: NodeId) -> Option<Rect>;

    fn viewport(&self) -> Viewport;

    /// False when the node or an ancestor is hidden by style
    /// (`display: none`, `visibility: hidden`, `opacity: 0`).
    fn is_rendered(&self, node: NodeId) -> bool;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn has_class(&self, node: NodeId, class: &str) -> bool;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn next_element_sibling(&self, node: NodeId) -> Option<NodeId>;

    /// Whether the node is still attached to the document.
    fn contains(&self, node: NodeId) -> bool;

    fn has_descendant_with_class(&self, node: NodeId, class: &str) -> bool;

    /// Insert a new element as the immediate next sibling of `anchor`.
    fn insert_after(&self, anchor: NodeId, element: NewElement) -> Option<NodeId>;

    fn append_child(&self, parent: NodeId, element: NewElement) -> Option<NodeId>;

    /// Detach the node and its subtree. False if it was already gone.
    fn remove(&self, node: NodeId) -> bool;

    /// Attached nodes carrying `class`, in document order.
    fn nodes_with_class(&self, class: &str) -> Vec<NodeId>;
}
