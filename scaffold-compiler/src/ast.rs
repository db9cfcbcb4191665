//! Arena-backed blueprint AST.
//!
//! Nodes live in one `Vec` and refer to their children by [`NodeId`]; the
//! root is always index 0. Children are appended in document order, so a
//! node's child list is already sorted by line.

use scaffold_core::types::{MutationOp, Permissions};

use crate::lexer::Directive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A planned entry before template substitution and parent-path joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTemplate {
    pub path: String,
    pub is_dir: bool,
    pub content: Option<String>,
    pub seed: Option<String>,
    pub permissions: Option<Permissions>,
    pub mutation: MutationOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicNode {
    pub directive: Directive,
    /// Condition, loop header (`name in expr`) or message text.
    pub argument: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Logic(LogicNode),
    Form(EntryTemplate),
    /// Anchor for orchestration commands: the source lines to dereference.
    Commands(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: usize,
    pub indent: usize,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                line: 0,
                indent: 0,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append `kind` as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        line: usize,
        indent: usize,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            line,
            indent,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].children.last().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Deepest chain of nested nodes below the root.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut work = vec![(self.root(), 0usize)];
        while let Some((id, depth)) = work.pop() {
            deepest = deepest.max(depth);
            for child in self.children(id) {
                work.push((*child, depth + 1));
            }
        }
        deepest
    }
}
