//! The node arena.
//!
//! Nodes live in a slab owned by [`Ast`]; children are stored as [`NodeId`]
//! indices and the parent back-edge is kept alongside. Detached nodes stay in
//! the slab until the whole tree is dropped, which ties all memory to the
//! query lifetime. Symbol tables are an external map keyed by the scope
//! node's id, rebuilt by the well-formedness checker (or [`Ast::build_symbols`])
//! at each pass boundary.

use std::collections::HashMap;

use crate::kind::NodeKind;
use crate::location::Location;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Raw index, for diagnostics.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    location: Location,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// The tree arena.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<NodeData>,
    symbols: HashMap<NodeId, HashMap<String, Vec<NodeId>>>,
    fresh_counter: u64,
}

impl Ast {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached node of the given kind with an empty location.
    pub fn node(&mut self, kind: NodeKind) -> NodeId {
        self.node_at(kind, Location::default())
    }

    /// Creates a detached node with an explicit location.
    pub fn node_at(&mut self, kind: NodeKind, location: Location) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("arena overflow"));
        self.nodes.push(NodeData {
            kind,
            location,
            children: Vec::new(),
            parent: None,
        });
        id
    }

    /// Creates a detached node whose location is the given synthetic text.
    pub fn token(&mut self, kind: NodeKind, text: impl AsRef<str>) -> NodeId {
        self.node_at(kind, Location::synthetic(text))
    }

    /// Returns the kind of a node.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.index()].kind
    }

    /// Replaces the kind of a node in place.
    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].kind = kind;
    }

    /// Returns the location of a node.
    #[must_use]
    pub fn loc(&self, id: NodeId) -> &Location {
        &self.nodes[id.index()].location
    }

    /// Replaces the location of a node.
    pub fn set_loc(&mut self, id: NodeId, location: Location) {
        self.nodes[id.index()].location = location;
    }

    /// Returns the text view of a node's location.
    #[must_use]
    pub fn text(&self, id: NodeId) -> &str {
        self.nodes[id.index()].location.view()
    }

    /// Returns the children of a node.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self, id: NodeId) -> usize {
        self.nodes[id.index()].children.len()
    }

    /// True when the node has no children.
    #[must_use]
    pub fn is_empty(&self, id: NodeId) -> bool {
        self.nodes[id.index()].children.is_empty()
    }

    /// Returns the `i`-th child.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds; pipeline shapes are guaranteed
    /// by the well-formedness checker before positional access happens.
    #[must_use]
    pub fn child(&self, id: NodeId, i: usize) -> NodeId {
        self.nodes[id.index()].children[i]
    }

    /// First child, if any.
    #[must_use]
    pub fn front(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].children.first().copied()
    }

    /// Last child, if any.
    #[must_use]
    pub fn back(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].children.last().copied()
    }

    /// Parent of a node, if attached.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// First child of the given kind.
    #[must_use]
    pub fn child_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.children(id).iter().copied().find(|&c| self.kind(c) == kind)
    }

    /// Appends a child, detaching it from any previous parent.
    pub fn push_back(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    /// Prepends a child, detaching it from any previous parent.
    pub fn push_front(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.insert(0, child);
    }

    /// Inserts a child at a position, detaching it from any previous parent.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.insert(index, child);
    }

    /// Detaches a node from its parent. No-op for detached nodes.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|&c| c != id);
        }
    }

    /// Removes the children in `range` from `parent` and returns them
    /// detached, preserving order.
    pub fn remove_range(&mut self, parent: NodeId, range: std::ops::Range<usize>) -> Vec<NodeId> {
        let removed: Vec<NodeId> = self.nodes[parent.index()].children.drain(range).collect();
        for &child in &removed {
            self.nodes[child.index()].parent = None;
        }
        removed
    }

    /// Splices `replacement` into `parent` at `index`.
    pub fn splice(&mut self, parent: NodeId, index: usize, replacement: Vec<NodeId>) {
        for (offset, child) in replacement.into_iter().enumerate() {
            self.insert_child(parent, index + offset, child);
        }
    }

    /// Replaces `old` (a child of `parent`) with `new`, detaching `old`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let index = self.position(parent, old).expect("old is not a child of parent");
        self.detach(old);
        self.insert_child(parent, index, new);
    }

    /// Replaces the `i`-th child, detaching the previous occupant.
    pub fn set_child(&mut self, parent: NodeId, index: usize, new: NodeId) {
        let old = self.child(parent, index);
        self.detach(old);
        self.insert_child(parent, index, new);
    }

    /// Index of `child` within `parent`, if present.
    #[must_use]
    pub fn position(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    /// Deep-clones a subtree via a post-order rebuild. The clone is detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let kind = self.kind(id);
        let location = self.loc(id).clone();
        let children: Vec<NodeId> = self.children(id).to_vec();
        let clone = self.node_at(kind, location);
        for child in children {
            let child_clone = self.deep_clone(child);
            self.push_back(clone, child_clone);
        }
        clone
    }

    /// Returns `id` if detached, or a deep clone when `id` is attached
    /// somewhere. Used when inserting a node that may belong to another
    /// subtree (for example a data document).
    pub fn adopt(&mut self, id: NodeId) -> NodeId {
        if self.parent(id).is_some() {
            self.deep_clone(id)
        } else {
            id
        }
    }

    /// Generates a fresh name with the given prefix, unique within this tree.
    pub fn fresh(&mut self, prefix: &str) -> Location {
        let n = self.fresh_counter;
        self.fresh_counter += 1;
        Location::synthetic(format!("{prefix}${n}"))
    }

    /// Pre-order traversal of a subtree.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Collects every `Error` node in the subtree, in document order.
    #[must_use]
    pub fn collect_errors(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.kind(n) == NodeKind::Error)
            .collect()
    }

    /// True when the subtree contains an `Error` node.
    #[must_use]
    pub fn has_error(&self, id: NodeId) -> bool {
        self.descendants(id)
            .iter()
            .any(|&n| self.kind(n) == NodeKind::Error)
    }

    /// Builds an `Error` node: `Error <<= ErrorMsg * ErrorAst`.
    pub fn error(&mut self, at: NodeId, message: impl AsRef<str>) -> NodeId {
        let location = self.loc(at).clone();
        let error = self.node_at(NodeKind::Error, location.clone());
        let msg = self.node_at(NodeKind::ErrorMsg, Location::synthetic(message));
        let ast = self.node_at(NodeKind::ErrorAst, location);
        let subject = self.deep_clone(at);
        self.push_back(ast, subject);
        self.push_back(error, msg);
        self.push_back(error, ast);
        error
    }

    /// Message text of an `Error` node.
    #[must_use]
    pub fn error_message(&self, error: NodeId) -> &str {
        debug_assert_eq!(self.kind(error), NodeKind::Error);
        self.text(self.child(error, 0))
    }

    // ---- scopes and symbols ------------------------------------------------

    /// Nearest ancestor (or self) that bears a symbol table.
    #[must_use]
    pub fn scope(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.kind(node).has_symbols() {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Nearest common ancestor of two attached nodes.
    #[must_use]
    pub fn common_parent(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut current = Some(a);
        while let Some(node) = current {
            seen.insert(node);
            current = self.parent(node);
        }
        let mut current = Some(b);
        while let Some(node) = current {
            if seen.contains(&node) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Drops all symbol tables.
    pub fn clear_symbols(&mut self) {
        self.symbols.clear();
    }

    /// Rebuilds the symbol tables for the subtree rooted at `root`.
    ///
    /// Every node whose kind names a key child inserts that child's text into
    /// the nearest enclosing scope's table, in document order.
    pub fn build_symbols(&mut self, root: NodeId) {
        self.clear_symbols();
        let order = self.descendants(root);
        for id in order {
            let kind = self.kind(id);
            let Some(key_index) = kind.key_child() else {
                continue;
            };
            if self.len(id) <= key_index {
                continue;
            }
            let key = self.text(self.child(id, key_index)).to_string();
            let scope = self
                .parent(id)
                .and_then(|p| self.scope(p))
                .unwrap_or(root);
            self.symbols
                .entry(scope)
                .or_default()
                .entry(key)
                .or_default()
                .push(id);
        }
    }

    /// Resolves a `Var` (or any named node) against its enclosing scopes,
    /// returning candidate definitions in lexical order. The innermost scope
    /// that knows the name wins.
    #[must_use]
    pub fn lookup(&self, var: NodeId) -> Vec<NodeId> {
        let name = self.text(var);
        let mut scope = self.parent(var).and_then(|p| self.scope(p));
        while let Some(node) = scope {
            if let Some(defs) = self.symbols.get(&node).and_then(|table| table.get(name)) {
                return defs.clone();
            }
            scope = self.parent(node).and_then(|p| self.scope(p));
        }
        Vec::new()
    }

    /// Resolves `key` within the symbol table of `node` itself.
    #[must_use]
    pub fn lookdown(&self, node: NodeId, key: &str) -> Vec<NodeId> {
        self.symbols
            .get(&node)
            .and_then(|table| table.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

/// Builds a subtree in one expression.
///
/// Forms:
/// - `(Kind child...)` — node with children
/// - `(Kind ^ text)` — leaf node with synthetic location text
/// - `@name` — splice an existing `NodeId` held in a local binding
/// - `@@name` — splice a `Vec<NodeId>` held in a local binding
///
/// ```ignore
/// let expr = build!(ast, (Expr (RefTerm (Var ^ "x"))));
/// ```
#[macro_export]
macro_rules! build {
    ($ast:expr, @ $id:expr) => { $id };
    ($ast:expr, ( $kind:ident ^ $text:expr )) => {
        $ast.token($crate::NodeKind::$kind, $text)
    };
    ($ast:expr, ( $kind:ident $( $child:tt )* )) => {{
        let node = $ast.node($crate::NodeKind::$kind);
        $crate::build_children!($ast, node, $( $child )*);
        node
    }};
}

/// Helper for [`build!`]; not used directly.
#[macro_export]
macro_rules! build_children {
    ($ast:expr, $parent:expr $(,)?) => {};
    ($ast:expr, $parent:expr, @@ $ids:ident $( $rest:tt )*) => {
        for id in $ids {
            $ast.push_back($parent, id);
        }
        $crate::build_children!($ast, $parent, $( $rest )*);
    };
    ($ast:expr, $parent:expr, @ $id:ident $( $rest:tt )*) => {
        let child = $id;
        $ast.push_back($parent, child);
        $crate::build_children!($ast, $parent, $( $rest )*);
    };
    ($ast:expr, $parent:expr, ( $( $inner:tt )* ) $( $rest:tt )*) => {
        let child = $crate::build!($ast, ( $( $inner )* ));
        $ast.push_back($parent, child);
        $crate::build_children!($ast, $parent, $( $rest )*);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build;

    #[test]
    fn test_push_and_children() {
        let mut ast = Ast::new();
        let parent = ast.node(NodeKind::UnifyBody);
        let a = ast.token(NodeKind::Var, "a");
        let b = ast.token(NodeKind::Var, "b");
        ast.push_back(parent, a);
        ast.push_front(parent, b);
        assert_eq!(ast.children(parent), &[b, a]);
        assert_eq!(ast.parent(a), Some(parent));
    }

    #[test]
    fn test_detach_and_replace() {
        let mut ast = Ast::new();
        let parent = ast.node(NodeKind::Expr);
        let a = ast.token(NodeKind::Var, "a");
        let b = ast.token(NodeKind::Var, "b");
        ast.push_back(parent, a);
        ast.replace_child(parent, a, b);
        assert_eq!(ast.children(parent), &[b]);
        assert_eq!(ast.parent(a), None);
    }

    #[test]
    fn test_deep_clone_is_detached_copy() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "42"))));
        let clone = ast.deep_clone(term);
        assert_ne!(term, clone);
        assert_eq!(ast.parent(clone), None);
        let scalar = ast.child(clone, 0);
        assert_eq!(ast.text(ast.child(scalar, 0)), "42");
    }

    #[test]
    fn test_build_macro() {
        let mut ast = Ast::new();
        let existing = ast.token(NodeKind::Var, "x");
        let expr = build!(ast, (Expr (RefTerm @existing) (Unify)));
        assert_eq!(ast.kind(expr), NodeKind::Expr);
        assert_eq!(ast.len(expr), 2);
        let refterm = ast.child(expr, 0);
        assert_eq!(ast.child(refterm, 0), existing);
    }

    #[test]
    fn test_symbols_lookup() {
        let mut ast = Ast::new();
        let rule = build!(
            ast,
            (RuleComp (Var ^ "r")
                (UnifyBody
                    (Local (Var ^ "x") (Undefined))
                    (UnifyExpr (Var ^ "x") (Scalar (JSONInt ^ "1")))))
        );
        ast.build_symbols(rule);
        let body = ast.child(rule, 1);
        let unify_expr = ast.child(body, 1);
        let use_site = ast.child(unify_expr, 0);
        let defs = ast.lookup(use_site);
        assert_eq!(defs.len(), 1);
        assert_eq!(ast.kind(defs[0]), NodeKind::Local);
    }

    #[test]
    fn test_lookdown_object() {
        let mut ast = Ast::new();
        let object = build!(
            ast,
            (Object
                (ObjectItem (Key ^ "name") (Term (Scalar (JSONString ^ "\"dike\""))))
                (ObjectItem (Key ^ "kind") (Term (Scalar (JSONString ^ "\"interpreter\"")))))
        );
        ast.build_symbols(object);
        let defs = ast.lookdown(object, "name");
        assert_eq!(defs.len(), 1);
        assert_eq!(ast.kind(defs[0]), NodeKind::ObjectItem);
        assert!(ast.lookdown(object, "missing").is_empty());
    }

    #[test]
    fn test_common_parent() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "x") (Undefined))
                (UnifyExpr (Var ^ "x") (Scalar (JSONTrue ^ "true"))))
        );
        let local = ast.child(body, 0);
        let expr = ast.child(body, 1);
        let var_use = ast.child(expr, 0);
        assert_eq!(ast.common_parent(local, var_use), Some(body));
    }

    #[test]
    fn test_collect_errors() {
        let mut ast = Ast::new();
        let var = ast.token(NodeKind::Var, "bad");
        let error = ast.error(var, "Invalid variable");
        let root = ast.node(NodeKind::Query);
        ast.push_back(root, error);
        let errors = ast.collect_errors(root);
        assert_eq!(errors.len(), 1);
        assert_eq!(ast.error_message(errors[0]), "Invalid variable");
    }

    #[test]
    fn test_fresh_names_unique() {
        let mut ast = Ast::new();
        let a = ast.fresh("unify");
        let b = ast.fresh("unify");
        assert_ne!(a.view(), b.view());
        assert!(a.view().starts_with("unify$"));
    }
}
