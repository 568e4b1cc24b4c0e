//! Candidate values.
//!
//! A [`Value`] is one candidate for a variable: a term node, the location of
//! the variable it is bound to, the source values it was derived from, a rank
//! (defaults carry the maximum rank), and a validity flag. Invalidation
//! cascades backward through sources, which is how a failed unification
//! prunes the upstream candidates that produced it, without any control-flow
//! exceptions.

use std::cell::Cell;
use std::rc::Rc;

use dike_ast::{to_json, Ast, Location, NodeId, NodeKind};

/// Rank carried by default-rule candidates.
pub const DEFAULT_RANK: i64 = i64::MAX;

/// A candidate value for a variable.
#[derive(Debug)]
pub struct ValueDef {
    var: Location,
    node: NodeId,
    sources: Vec<Value>,
    rank: i64,
    invalid: Cell<bool>,
    pinned: Cell<bool>,
}

/// Shared handle to a candidate value.
pub type Value = Rc<ValueDef>;

/// A collection of candidates.
pub type Values = Vec<Value>;

impl ValueDef {
    /// A free-standing value (no variable binding, no sources).
    #[must_use]
    pub fn new(node: NodeId) -> Value {
        Self::build(Location::default(), node, Vec::new(), 0)
    }

    /// A value bound to a variable.
    #[must_use]
    pub fn new_for(var: Location, node: NodeId) -> Value {
        Self::build(var, node, Vec::new(), 0)
    }

    /// A value bound to a variable, derived from `sources`.
    #[must_use]
    pub fn with_sources(var: Location, node: NodeId, sources: Values) -> Value {
        Self::build(var, node, sources, 0)
    }

    /// A value from a ranked rule resolution.
    #[must_use]
    pub fn from_ranked(ranked: (i64, NodeId)) -> Value {
        Self::build(Location::default(), ranked.1, Vec::new(), ranked.0)
    }

    /// A ranked value bound to a variable, derived from `sources`.
    #[must_use]
    pub fn from_ranked_for(var: Location, ranked: (i64, NodeId), sources: Values) -> Value {
        Self::build(var, ranked.1, sources, ranked.0)
    }

    /// Rebinds a value to another variable, keeping the original as a source
    /// so invalidation cascades through the copy.
    #[must_use]
    pub fn copy_to(value: &Value, var: Location) -> Value {
        Self::build(var, value.node, vec![Rc::clone(value)], value.rank)
    }

    fn build(var: Location, node: NodeId, sources: Values, rank: i64) -> Value {
        Rc::new(Self {
            var,
            node,
            sources,
            rank,
            invalid: Cell::new(false),
            pinned: Cell::new(false),
        })
    }

    /// The variable this candidate is bound to.
    #[must_use]
    pub fn var(&self) -> &Location {
        &self.var
    }

    /// The term node.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The rank (lower wins; [`DEFAULT_RANK`] marks default terms).
    #[must_use]
    pub fn rank(&self) -> i64 {
        self.rank
    }

    /// Marks this value invalid and cascades to its sources. Pinned values
    /// (enumeration items) are immune.
    pub fn mark_as_invalid(&self) {
        if self.pinned.get() {
            return;
        }
        self.invalid.set(true);
        for source in &self.sources {
            source.mark_as_invalid();
        }
    }

    /// Pins this value as valid; invalidation no longer touches it.
    pub fn mark_as_valid(&self) {
        self.invalid.set(false);
        self.pinned.set(true);
    }

    /// A value is valid when neither it nor any value it was derived from has
    /// been invalidated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.invalid.get() && self.sources.iter().all(|source| source.is_valid())
    }

    /// Canonical rendering of the term.
    #[must_use]
    pub fn json(&self, ast: &Ast) -> String {
        to_json(ast, self.node)
    }

    /// The term wrapped as a `Term` (or `TermSet`) node, cloned out of any
    /// tree it is attached to.
    pub fn to_term(&self, ast: &mut Ast) -> NodeId {
        node_to_term(ast, self.node)
    }
}

/// Wraps a node as a `Term` unless it already is one, deep-cloning attached
/// nodes so the result can be inserted anywhere. Bare scalar tokens gain
/// their `Scalar` layer.
pub fn node_to_term(ast: &mut Ast, node: NodeId) -> NodeId {
    match ast.kind(node) {
        NodeKind::Term | NodeKind::TermSet | NodeKind::Undefined | NodeKind::Error => {
            ast.adopt(node)
        }
        NodeKind::DefaultTerm => {
            let content = ast.front(node).expect("default term content");
            let content = ast.deep_clone(content);
            let term = ast.node(NodeKind::Term);
            ast.push_back(term, content);
            term
        }
        kind if kind.is_json_scalar() => {
            let token = ast.adopt(node);
            let scalar = ast.node(NodeKind::Scalar);
            ast.push_back(scalar, token);
            let term = ast.node(NodeKind::Term);
            ast.push_back(term, scalar);
            term
        }
        NodeKind::Input | NodeKind::Data => {
            // binding a whole document materializes it as an object term
            match ast.back(node) {
                Some(payload) if ast.kind(payload) == NodeKind::DataItemSeq => {
                    let object = ast.node(NodeKind::Object);
                    for &item in ast.children(payload).to_vec().iter() {
                        let key = ast.deep_clone(ast.child(item, 0));
                        let value = ast.deep_clone(ast.child(item, 1));
                        let object_item = ast.node(NodeKind::ObjectItem);
                        ast.push_back(object_item, key);
                        ast.push_back(object_item, value);
                        ast.push_back(object, object_item);
                    }
                    let term = ast.node(NodeKind::Term);
                    ast.push_back(term, object);
                    term
                }
                Some(payload) if ast.kind(payload) == NodeKind::Term => ast.deep_clone(payload),
                _ => ast.node(NodeKind::Undefined),
            }
        }
        _ => {
            let content = ast.adopt(node);
            let term = ast.node(NodeKind::Term);
            ast.push_back(term, content);
            term
        }
    }
}

/// True for nodes that fail a unification statement: `false` scalars and
/// `Undefined`.
#[must_use]
pub fn is_falsy_node(ast: &Ast, node: NodeId) -> bool {
    match ast.kind(node) {
        NodeKind::Undefined => true,
        NodeKind::JSONFalse => true,
        NodeKind::Scalar | NodeKind::Term | NodeKind::DataTerm => ast
            .front(node)
            .is_some_and(|front| is_falsy_node(ast, front)),
        _ => false,
    }
}

/// Keeps only the minimum-rank non-default candidates; falls back to the
/// defaults (unwrapped to plain terms) when nothing else survived.
#[must_use]
pub fn filter_by_rank(ast: &mut Ast, values: Values) -> Values {
    let min_rank = values
        .iter()
        .filter(|v| v.rank() < DEFAULT_RANK)
        .map(|v| v.rank())
        .min();
    match min_rank {
        Some(rank) => values.into_iter().filter(|v| v.rank() == rank).collect(),
        None => values
            .into_iter()
            .map(|v| {
                if ast.kind(v.node()) == NodeKind::DefaultTerm {
                    let term = node_to_term(ast, v.node());
                    ValueDef::with_sources(v.var().clone(), term, vec![Rc::clone(&v)])
                } else {
                    v
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::build;

    #[test]
    fn test_invalidation_cascades_to_sources() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let source = ValueDef::new_for(Location::synthetic("x"), term);
        let derived = ValueDef::copy_to(&source, Location::synthetic("y"));
        derived.mark_as_invalid();
        assert!(!source.is_valid());
        assert!(!derived.is_valid());
    }

    #[test]
    fn test_pinned_values_resist_invalidation() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let value = ValueDef::new_for(Location::synthetic("item"), term);
        value.mark_as_valid();
        value.mark_as_invalid();
        assert!(value.is_valid());
    }

    #[test]
    fn test_invalid_source_invalidates_derived() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "2"))));
        let source = ValueDef::new_for(Location::synthetic("x"), term);
        let derived = ValueDef::copy_to(&source, Location::synthetic("y"));
        source.mark_as_invalid();
        assert!(!derived.is_valid());
    }

    #[test]
    fn test_falsy_detection() {
        let mut ast = Ast::new();
        let falsy = build!(ast, (Term (Scalar (JSONFalse ^ "false"))));
        let truthy = build!(ast, (Term (Scalar (JSONInt ^ "0"))));
        let undef = ast.node(NodeKind::Undefined);
        assert!(is_falsy_node(&ast, falsy));
        assert!(!is_falsy_node(&ast, truthy));
        assert!(is_falsy_node(&ast, undef));
    }

    #[test]
    fn test_default_dominance() {
        let mut ast = Ast::new();
        let default_term = build!(ast, (DefaultTerm (Scalar (JSONFalse ^ "false"))));
        let regular = build!(ast, (Term (Scalar (JSONTrue ^ "true"))));

        // Non-default present: default suppressed.
        let values = vec![
            ValueDef::from_ranked((DEFAULT_RANK, default_term)),
            ValueDef::from_ranked((0, regular)),
        ];
        let filtered = filter_by_rank(&mut ast, values);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].json(&ast), "true");

        // Only the default: chosen and unwrapped to a plain term.
        let values = vec![ValueDef::from_ranked((DEFAULT_RANK, default_term))];
        let filtered = filter_by_rank(&mut ast, values);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].json(&ast), "false");
        assert_eq!(ast.kind(filtered[0].node()), NodeKind::Term);
    }

    #[test]
    fn test_min_rank_wins() {
        let mut ast = Ast::new();
        let first = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let second = build!(ast, (Term (Scalar (JSONInt ^ "2"))));
        let values = vec![
            ValueDef::from_ranked((1, second)),
            ValueDef::from_ranked((0, first)),
        ];
        let filtered = filter_by_rank(&mut ast, values);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].json(&ast), "1");
    }
}
