//! # Function-Body AST
//!
//! Both the request and response interpreters walk the same tree shape, built
//! once by the [loader](crate::loader) and read-only thereafter. Nodes live in
//! a flat arena (`Vec<AstNode>`) addressed by [`NodeId`] rather than owning
//! their children directly — a literal parent/child/sibling pointer encoding
//! would form a reference cycle the borrow checker can't express. Freeing an
//! `Ast` is just dropping the `Vec`; no recursive walk is needed.

use std::fmt;

/// Index into an [`Ast`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// The recognized tag names from the schema's element vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Integer,
    Long,
    Double,
    String,
    IpAddress,
    If,
    For,
    Set,
    Error,
    Break,
    /// Recognized by name, rejected wherever encountered in a function body.
    Call,
    Parameter,
    Message,
    Shift,
    Remove,
    Unknown,
}

impl NodeKind {
    /// Case-insensitive lookup against the fixed element-name table.
    pub fn node_kind_from_name(s: &str) -> NodeKind {
        match s.to_ascii_lowercase().as_str() {
            "root" => NodeKind::Root,
            "integer" => NodeKind::Integer,
            "long" => NodeKind::Long,
            "double" => NodeKind::Double,
            "string" => NodeKind::String,
            "ip_address" => NodeKind::IpAddress,
            "if" => NodeKind::If,
            "for" => NodeKind::For,
            "set" => NodeKind::Set,
            "error" => NodeKind::Error,
            "break" => NodeKind::Break,
            "call" => NodeKind::Call,
            "parameter" => NodeKind::Parameter,
            "message" => NodeKind::Message,
            "shift" => NodeKind::Shift,
            "remove" => NodeKind::Remove,
            _ => NodeKind::Unknown,
        }
    }

    /// Inverse of [`NodeKind::node_kind_from_name`], with an `"UNKNOWN"` fallback.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            NodeKind::Root => "ROOT",
            NodeKind::Integer => "INTEGER",
            NodeKind::Long => "LONG",
            NodeKind::Double => "DOUBLE",
            NodeKind::String => "STRING",
            NodeKind::IpAddress => "IP_ADDRESS",
            NodeKind::If => "IF",
            NodeKind::For => "FOR",
            NodeKind::Set => "SET",
            NodeKind::Error => "ERROR",
            NodeKind::Break => "BREAK",
            NodeKind::Call => "CALL",
            NodeKind::Parameter => "PARAMETER",
            NodeKind::Message => "MESSAGE",
            NodeKind::Shift => "SHIFT",
            NodeKind::Remove => "REMOVE",
            NodeKind::Unknown => "UNKNOWN",
        }
    }

    /// True for the leaf-parameter kinds (`INTEGER`, `LONG`, `DOUBLE`,
    /// `STRING`, `IP_ADDRESS`).
    pub fn is_leaf_param(&self) -> bool {
        matches!(
            self,
            NodeKind::Integer | NodeKind::Long | NodeKind::Double | NodeKind::String | NodeKind::IpAddress
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// An EQ/NE comparison used by an `IF` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCondition {
    Eq,
    Ne,
}

impl IfCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(IfCondition::Eq),
            "ne" => Some(IfCondition::Ne),
            _ => None,
        }
    }
}

/// Kind-specific payload for one AST node.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub name: Option<String>,
    pub array_index: Option<String>,
    pub defval: Option<String>,
    pub variable: Option<String>,
    pub condition: Option<IfCondition>,
    pub value: Option<String>,
    pub from: Option<String>,
    pub count: Option<String>,
    pub array_name: Option<String>,
    pub src: Option<String>,
    pub src_index: Option<String>,
    pub dst: Option<String>,
    pub dst_index: Option<String>,
    pub code: Option<i64>,
    pub comment: Option<String>,
}

/// One node in a function-body [`Ast`].
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: NodeKind,
    pub data: NodeData,
    pub parent: Option<NodeId>,
    pub next: Option<NodeId>,
    pub first_child: Option<NodeId>,
}

impl AstNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            data: NodeData::default(),
            parent: None,
            next: None,
            first_child: None,
        }
    }
}

/// A function body: an arena of nodes rooted at a synthetic `ROOT`.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: NodeId,
}

impl Ast {
    /// An `Ast` containing only the synthetic `ROOT`, with no children.
    pub fn empty() -> Self {
        let root_node = AstNode::new(NodeKind::Root);
        Ast {
            nodes: vec![root_node],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn children(&self, id: NodeId) -> AstChildren<'_> {
        AstChildren {
            ast: self,
            next: self.node(id).first_child,
        }
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.node(id).first_child.is_some()
    }

    /// Appends a freshly allocated node of `kind` as the last child of
    /// `parent` (if it has none yet) or as the last sibling in `parent`'s
    /// child chain otherwise. Returns the new node's id.
    pub fn push_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AstNode::new(kind));
        self.node_mut(id).parent = Some(parent);

        match self.node(parent).first_child {
            None => self.node_mut(parent).first_child = Some(id),
            Some(first) => {
                let mut cursor = first;
                while let Some(next) = self.node(cursor).next {
                    cursor = next;
                }
                self.node_mut(cursor).next = Some(id);
            }
        }
        id
    }

    pub fn set_data(&mut self, id: NodeId, data: NodeData) {
        self.node_mut(id).data = data;
    }

    /// True if `id` has an ancestor (not counting itself) whose kind is
    /// [`NodeKind::For`]. Used to validate `BREAK` placement.
    pub fn has_enclosing_for(&self, id: NodeId) -> bool {
        let mut cursor = self.node(id).parent;
        while let Some(p) = cursor {
            if self.node(p).kind == NodeKind::For {
                return true;
            }
            cursor = self.node(p).parent;
        }
        false
    }

    /// Counts `FOR` siblings under `parent` preceding (and not including) a
    /// node about to be inserted there; used to derive `array_name`.
    pub fn count_preceding_for_siblings(&self, parent: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.node(parent).first_child;
        while let Some(id) = cursor {
            if self.node(id).kind == NodeKind::For {
                count += 1;
            }
            cursor = self.node(id).next;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

pub struct AstChildren<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl<'a> Iterator for AstChildren<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.ast.node(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_round_trips_through_canonical_name() {
        for name in [
            "integer", "string", "long", "double", "ip_address", "if", "for", "set", "error",
            "ROOT", "break", "call", "parameter", "message", "shift", "remove",
        ] {
            let kind = NodeKind::node_kind_from_name(name);
            assert_ne!(kind, NodeKind::Unknown, "{name} should be recognized");
            let round_tripped = NodeKind::node_kind_from_name(kind.canonical_name());
            assert_eq!(round_tripped.canonical_name(), kind.canonical_name());
        }
    }

    #[test]
    fn unknown_name_maps_to_unknown() {
        assert_eq!(NodeKind::node_kind_from_name("bogus"), NodeKind::Unknown);
        assert_eq!(NodeKind::Unknown.canonical_name(), "UNKNOWN");
    }

    #[test]
    fn push_child_links_siblings_in_order() {
        let mut ast = Ast::empty();
        let root = ast.root();
        let a = ast.push_child(root, NodeKind::Integer);
        let b = ast.push_child(root, NodeKind::String);
        let c = ast.push_child(root, NodeKind::Long);

        let ids: Vec<_> = ast.children(root).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn has_enclosing_for_detects_ancestor() {
        let mut ast = Ast::empty();
        let root = ast.root();
        let for_node = ast.push_child(root, NodeKind::For);
        let break_node = ast.push_child(for_node, NodeKind::Break);
        let stray_break = ast.push_child(root, NodeKind::Break);

        assert!(ast.has_enclosing_for(break_node));
        assert!(!ast.has_enclosing_for(stray_break));
    }

    #[test]
    fn for_array_name_counts_prior_for_siblings() {
        let mut ast = Ast::empty();
        let root = ast.root();
        assert_eq!(ast.count_preceding_for_siblings(root), 0);
        ast.push_child(root, NodeKind::For);
        assert_eq!(ast.count_preceding_for_siblings(root), 1);
        ast.push_child(root, NodeKind::Integer);
        assert_eq!(ast.count_preceding_for_siblings(root), 1);
        ast.push_child(root, NodeKind::For);
        assert_eq!(ast.count_preceding_for_siblings(root), 2);
    }
}
