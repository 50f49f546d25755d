//! Immutable syntax roots
//!
//! A root is split into two layers:
//! - the **green** layer ([`GreenNode`]): immutable, `Arc`-shared, position
//!   independent and serializable
//! - the [`SyntaxRoot`] handle: a green tree plus the [`TreeId`] of the
//!   containing tree that currently owns it
//!
//! Re-parenting a root into another tree only allocates a new handle; the
//! green layer is shared.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

/// Shared handle to a syntax root
pub type Root = Arc<SyntaxRoot>;

/// Identity of a containing tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreeId(pub Ulid);

impl TreeId {
    /// Generate new tree identity
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a green node or token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxKind {
    /// Whole-file node
    Root,
    /// A regular source line
    Line,
    /// A preprocessor-style directive line
    Directive,
    /// Run of non-whitespace characters
    Word,
    /// Run of horizontal whitespace
    Whitespace,
    /// Line terminator
    Newline,
}

/// Leaf of the green tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenToken {
    kind: SyntaxKind,
    text: String,
}

impl GreenToken {
    /// Create token
    #[must_use]
    pub fn new(kind: SyntaxKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Token kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SyntaxKind {
        self.kind
    }

    /// Token text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Child of a green node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreenElement {
    /// Interior node (shared)
    Node(Arc<GreenNode>),
    /// Leaf token
    Token(GreenToken),
}

impl GreenElement {
    /// Text width of this element
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Node(node) => node.width(),
            Self::Token(token) => token.text.len(),
        }
    }
}

/// Interior node of the green tree
///
/// # Invariants
/// - `width` is the sum of the children's widths
/// - `has_directives` is true iff this node or a descendant is a directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenNode {
    kind: SyntaxKind,
    width: usize,
    has_directives: bool,
    children: Vec<GreenElement>,
}

impl GreenNode {
    /// Build node from children, computing cached width and directive flag
    #[must_use]
    pub fn new(kind: SyntaxKind, children: Vec<GreenElement>) -> Self {
        let width = children.iter().map(GreenElement::width).sum();
        let has_directives = kind == SyntaxKind::Directive
            || children.iter().any(|child| match child {
                GreenElement::Node(node) => node.has_directives,
                GreenElement::Token(_) => false,
            });
        Self {
            kind,
            width,
            has_directives,
            children,
        }
    }

    /// Node kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SyntaxKind {
        self.kind
    }

    /// Full text width
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Children in source order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[GreenElement] {
        &self.children
    }

    /// Whether any directive appears under this node
    #[inline]
    #[must_use]
    pub fn contains_directives(&self) -> bool {
        self.has_directives
    }

    fn write_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                GreenElement::Node(node) => node.write_text(out),
                GreenElement::Token(token) => out.push_str(&token.text),
            }
        }
    }
}

/// A green tree owned by one containing tree
#[derive(Debug)]
pub struct SyntaxRoot {
    tree: TreeId,
    green: Arc<GreenNode>,
}

impl SyntaxRoot {
    /// Create a root owned by `tree`
    #[must_use]
    pub fn new(tree: TreeId, green: Arc<GreenNode>) -> Root {
        Arc::new(Self { tree, green })
    }

    /// Create a root under a fresh ad-hoc tree identity
    #[must_use]
    pub fn detached(green: Arc<GreenNode>) -> Root {
        Self::new(TreeId::new(), green)
    }

    /// Identity of the owning tree
    #[inline]
    #[must_use]
    pub fn tree_id(&self) -> TreeId {
        self.tree
    }

    /// Shared green tree
    #[inline]
    #[must_use]
    pub fn green(&self) -> &Arc<GreenNode> {
        &self.green
    }

    /// Full text width
    #[inline]
    #[must_use]
    pub fn full_width(&self) -> usize {
        self.green.width()
    }

    /// Whether the root contains any directive
    #[inline]
    #[must_use]
    pub fn contains_directives(&self) -> bool {
        self.green.contains_directives()
    }

    /// Same green tree, owned by `tree`
    #[must_use]
    pub fn with_tree(&self, tree: TreeId) -> Root {
        Self::new(tree, Arc::clone(&self.green))
    }

    /// Structural equality of the green layers, ignoring ownership
    #[must_use]
    pub fn is_equivalent_to(&self, other: &SyntaxRoot) -> bool {
        Arc::ptr_eq(&self.green, &other.green) || self.green == other.green
    }

    /// Reconstruct the source text
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.full_width());
        self.green.write_text(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(words: &[&str]) -> GreenElement {
        let children = words
            .iter()
            .map(|w| GreenElement::Token(GreenToken::new(SyntaxKind::Word, *w)))
            .collect();
        GreenElement::Node(Arc::new(GreenNode::new(SyntaxKind::Line, children)))
    }

    #[test]
    fn width_is_cached_sum() {
        let green = GreenNode::new(SyntaxKind::Root, vec![line(&["ab", "cde"]), line(&["f"])]);
        assert_eq!(green.width(), 6);
        assert!(!green.contains_directives());
    }

    #[test]
    fn directive_flag_propagates() {
        let directive = GreenElement::Node(Arc::new(GreenNode::new(
            SyntaxKind::Directive,
            vec![GreenElement::Token(GreenToken::new(SyntaxKind::Word, "#if"))],
        )));
        let green = GreenNode::new(SyntaxKind::Root, vec![line(&["x"]), directive]);
        assert!(green.contains_directives());
    }

    #[test]
    fn with_tree_shares_green() {
        let root = SyntaxRoot::detached(Arc::new(GreenNode::new(SyntaxKind::Root, vec![line(&["a"])])));
        let owner = TreeId::new();
        let moved = root.with_tree(owner);

        assert_eq!(moved.tree_id(), owner);
        assert_ne!(root.tree_id(), owner);
        assert!(Arc::ptr_eq(root.green(), moved.green()));
        assert!(root.is_equivalent_to(&moved));
    }

    #[test]
    fn text_reconstruction() {
        let root = SyntaxRoot::detached(Arc::new(GreenNode::new(
            SyntaxKind::Root,
            vec![line(&["let", " ", "x"])],
        )));
        assert_eq!(root.text(), "let x");
        assert_eq!(root.full_width(), 5);
    }
}
