//! Well-formedness schemas.
//!
//! A [`Schema`] maps node kinds to productions describing the allowed child
//! sequences. Each lowering pass owns a schema, usually derived from its
//! predecessor's via [`Schema::with`]. The checker walks the tree post-order,
//! rebuilds the symbol tables, and reports every violation.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::arena::{Ast, NodeId};
use crate::kind::NodeKind;

/// One element of a production: a choice of kinds with a multiplicity.
#[derive(Debug, Clone, Copy)]
pub enum Field {
    /// Exactly one child drawn from the set.
    One(&'static [NodeKind]),
    /// Zero or one child drawn from the set.
    Opt(&'static [NodeKind]),
    /// Zero or more children drawn from the set.
    Rep(&'static [NodeKind]),
    /// One or more children drawn from the set.
    Rep1(&'static [NodeKind]),
}

/// Exactly one child from `kinds`.
#[must_use]
pub const fn one(kinds: &'static [NodeKind]) -> Field {
    Field::One(kinds)
}

/// Zero or one child from `kinds`.
#[must_use]
pub const fn opt(kinds: &'static [NodeKind]) -> Field {
    Field::Opt(kinds)
}

/// Zero or more children from `kinds`.
#[must_use]
pub const fn rep(kinds: &'static [NodeKind]) -> Field {
    Field::Rep(kinds)
}

/// One or more children from `kinds`.
#[must_use]
pub const fn rep1(kinds: &'static [NodeKind]) -> Field {
    Field::Rep1(kinds)
}

/// A schema violation, reported with the offending node.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct Violation {
    /// The node whose children do not match its production.
    pub node: NodeId,
    /// Human-readable description.
    pub message: String,
}

/// Mapping from node kind to allowed child sequence.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    productions: HashMap<NodeKind, Vec<Field>>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overrides the production for a kind.
    #[must_use]
    pub fn def(mut self, kind: NodeKind, fields: &[Field]) -> Self {
        self.productions.insert(kind, fields.to_vec());
        self
    }

    /// Derives a new schema by applying `deltas` on top of this one.
    #[must_use]
    pub fn with(&self, deltas: &[(NodeKind, &[Field])]) -> Self {
        let mut next = self.clone();
        for (kind, fields) in deltas {
            next.productions.insert(*kind, fields.to_vec());
        }
        next
    }

    /// Returns the production for a kind, if defined.
    #[must_use]
    pub fn production(&self, kind: NodeKind) -> Option<&[Field]> {
        self.productions.get(&kind).map(Vec::as_slice)
    }

    /// Checks the subtree at `root`, rebuilding symbol tables first.
    ///
    /// Kinds without a production are treated as leaves: children under them
    /// are violations. `Error` subtrees are self-describing (their payload
    /// holds clones of offending nodes) and are not checked against the
    /// grammar. Returns all violations in document order.
    pub fn check(&self, ast: &mut Ast, root: NodeId) -> Vec<Violation> {
        ast.build_symbols(root);
        let mut violations = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let kind = ast.kind(id);
            if kind == NodeKind::Error {
                continue;
            }
            for &child in ast.children(id).iter().rev() {
                stack.push(child);
            }
            match self.production(kind) {
                Some(fields) => {
                    if let Err(message) = match_fields(ast, id, fields) {
                        violations.push(Violation { node: id, message });
                    }
                }
                None => {
                    if !ast.is_empty(id) {
                        violations.push(Violation {
                            node: id,
                            message: format!(
                                "{} has no production but has children",
                                kind.name()
                            ),
                        });
                    }
                }
            }
        }
        if !violations.is_empty() {
            debug!(count = violations.len(), "well-formedness violations");
        }
        violations
    }
}

fn match_fields(ast: &Ast, id: NodeId, fields: &[Field]) -> Result<(), String> {
    // Error nodes are legal anywhere; the pipeline's fail-fast scan reports
    // them.
    let children: Vec<NodeId> = ast
        .children(id)
        .iter()
        .copied()
        .filter(|&c| ast.kind(c) != NodeKind::Error)
        .collect();
    let children = children.as_slice();
    let mut pos = 0;
    for field in fields {
        match field {
            Field::One(kinds) => {
                if pos < children.len() && kinds.contains(&ast.kind(children[pos])) {
                    pos += 1;
                } else {
                    return Err(mismatch(ast, id, children, pos, kinds));
                }
            }
            Field::Opt(kinds) => {
                if pos < children.len() && kinds.contains(&ast.kind(children[pos])) {
                    pos += 1;
                }
            }
            Field::Rep(kinds) => {
                while pos < children.len() && kinds.contains(&ast.kind(children[pos])) {
                    pos += 1;
                }
            }
            Field::Rep1(kinds) => {
                let start = pos;
                while pos < children.len() && kinds.contains(&ast.kind(children[pos])) {
                    pos += 1;
                }
                if pos == start {
                    return Err(mismatch(ast, id, children, pos, kinds));
                }
            }
        }
    }
    if pos != children.len() {
        return Err(format!(
            "{}: unexpected trailing child {} at index {pos}",
            ast.kind(id).name(),
            ast.kind(children[pos]).name(),
        ));
    }
    Ok(())
}

fn mismatch(
    ast: &Ast,
    id: NodeId,
    children: &[NodeId],
    pos: usize,
    expected: &[NodeKind],
) -> String {
    let found = if pos < children.len() {
        ast.kind(children[pos]).name()
    } else {
        "end of children"
    };
    let names: Vec<&str> = expected.iter().map(|k| k.name()).collect();
    format!(
        "{}: expected one of [{}] at index {pos}, found {found}",
        ast.kind(id).name(),
        names.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build;
    use NodeKind::*;

    fn tiny_schema() -> Schema {
        Schema::new()
            .def(UnifyBody, &[rep1(&[Local, UnifyExpr])])
            .def(Local, &[one(&[Var]), one(&[Term, Undefined])])
            .def(UnifyExpr, &[one(&[Var]), one(&[Var, Scalar])])
            .def(Term, &[one(&[Scalar])])
            .def(Scalar, &[one(&[JSONInt, JSONTrue])])
            .def(Var, &[])
            .def(JSONInt, &[])
            .def(JSONTrue, &[])
            .def(Undefined, &[])
    }

    #[test]
    fn test_accepts_well_formed() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "x") (Undefined))
                (UnifyExpr (Var ^ "x") (Scalar (JSONInt ^ "1"))))
        );
        let violations = tiny_schema().check(&mut ast, body);
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_rejects_wrong_child() {
        let mut ast = Ast::new();
        let body = build!(ast, (UnifyBody (Local (Var ^ "x") (Var ^ "y"))));
        let violations = tiny_schema().check(&mut ast, body);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("Local"));
    }

    #[test]
    fn test_rejects_empty_rep1() {
        let mut ast = Ast::new();
        let body = ast.node(UnifyBody);
        let violations = tiny_schema().check(&mut ast, body);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_rejects_children_under_leaf() {
        let mut ast = Ast::new();
        let var = ast.token(Var, "x");
        let stray = ast.token(JSONInt, "1");
        ast.push_back(var, stray);
        let violations = tiny_schema().check(&mut ast, var);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("no production"));
    }

    #[test]
    fn test_with_overrides() {
        let base = tiny_schema();
        let derived = base.with(&[(UnifyBody, &[rep(&[Local])])]);
        let mut ast = Ast::new();
        let body = ast.node(UnifyBody);
        assert!(derived.check(&mut ast, body).is_empty());
        assert_eq!(base.check(&mut ast, body).len(), 1);
    }
}
