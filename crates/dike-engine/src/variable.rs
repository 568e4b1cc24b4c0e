//! Unification variables.
//!
//! A [`Variable`] is owned by one unifier invocation. It tracks the local it
//! declares, the names it depends on, its dependency score (which orders
//! statement execution), and its candidate [`Values`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use dike_ast::{Ast, Location, NodeId, NodeKind};
use tracing::trace;

use crate::value::{is_falsy_node, Values};

/// A variable of a rule body under unification.
#[derive(Debug)]
pub struct Variable {
    local: NodeId,
    name: Location,
    dependencies: BTreeSet<String>,
    dependency_score: usize,
    values: Values,
    is_unify: bool,
    is_user_var: bool,
}

impl Variable {
    /// Creates a variable from its `Local` (or `ArgVar`) declaration.
    #[must_use]
    pub fn new(ast: &Ast, local: NodeId) -> Self {
        let var = ast.child(local, 0);
        let name = ast.loc(var).clone();
        let text = name.view();
        let is_unify = text.starts_with("unify$");
        let is_user_var = !text.contains('$') || text.starts_with('$');
        Self {
            local,
            name,
            dependencies: BTreeSet::new(),
            dependency_score: 0,
            values: Vec::new(),
            is_unify,
            is_user_var,
        }
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &Location {
        &self.name
    }

    /// The declaring `Local`/`ArgVar` node.
    #[must_use]
    pub fn local(&self) -> NodeId {
        self.local
    }

    /// True for `unify$`-named unification targets.
    #[must_use]
    pub fn is_unify(&self) -> bool {
        self.is_unify
    }

    /// True for user-written variables (no `$`, or a leading `$`).
    #[must_use]
    pub fn is_user_var(&self) -> bool {
        self.is_user_var
    }

    /// Names of body locals this variable depends on.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Adds dependencies on body locals.
    pub fn insert_dependencies(&mut self, deps: impl IntoIterator<Item = String>) {
        self.dependencies.extend(deps);
    }

    /// The memoized dependency score.
    #[must_use]
    pub fn dependency_score(&self) -> usize {
        self.dependency_score
    }

    /// Overwrites the dependency score.
    pub fn set_dependency_score(&mut self, score: usize) {
        self.dependency_score = score;
    }

    /// Adds to the dependency score (foreign variable references).
    pub fn increase_dependency_score(&mut self, amount: usize) {
        self.dependency_score += amount;
    }

    /// Candidate values that are still valid.
    #[must_use]
    pub fn valid_values(&self) -> Values {
        self.values.iter().filter(|v| v.is_valid()).cloned().collect()
    }

    /// Clears candidates for a fresh unification run.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Merges incoming candidates with the current set.
    ///
    /// `Undefined` candidates are dropped. A unification target intersects by
    /// structural equality of the rendered term once it holds candidates; a
    /// user variable accumulates all distinct candidates.
    pub fn unify(&mut self, ast: &Ast, incoming: Values) {
        let incoming: Values = incoming
            .into_iter()
            .filter(|v| ast.kind(v.node()) != NodeKind::Undefined)
            .collect();
        if self.is_unify && !self.values.is_empty() {
            let existing: HashSet<String> = self.values.iter().map(|v| v.json(ast)).collect();
            let narrowed: HashSet<String> = incoming
                .iter()
                .map(|v| v.json(ast))
                .filter(|repr| existing.contains(repr))
                .collect();
            self.values.retain(|v| narrowed.contains(&v.json(ast)));
        } else {
            let mut seen: HashSet<String> = self.values.iter().map(|v| v.json(ast)).collect();
            for value in incoming {
                let repr = value.json(ast);
                if seen.insert(repr) {
                    self.values.push(value);
                }
            }
        }
        trace!(name = %self.name, count = self.values.len(), "unified");
    }

    /// Marks falsy candidates invalid. Only meaningful for unification
    /// targets; the cascade through sources is what fails the statements that
    /// produced them.
    pub fn mark_invalid_values(&mut self, ast: &Ast) {
        for value in &self.values {
            if is_falsy_node(ast, value.node()) {
                value.mark_as_invalid();
            }
        }
    }

    /// Drops candidates that have been invalidated (directly or through their
    /// sources).
    pub fn remove_invalid_values(&mut self) {
        self.values.retain(|v| v.is_valid());
    }

    /// Binds the surviving candidates into the declaring local and returns
    /// the bound node: a single `Term`, a `TermSet`, or the first `Error`.
    pub fn bind(&self, ast: &mut Ast) -> NodeId {
        let mut terms: Vec<NodeId> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for value in &self.values {
            if !value.is_valid() || ast.kind(value.node()) == NodeKind::Undefined {
                continue;
            }
            if ast.kind(value.node()) == NodeKind::Error {
                let error = ast.adopt(value.node());
                ast.set_child(self.local, 1, error);
                return error;
            }
            if seen.insert(value.json(ast)) {
                let term = value.to_term(ast);
                terms.push(term);
            }
        }
        let bound = if terms.len() == 1 {
            terms[0]
        } else {
            let set = ast.node(NodeKind::TermSet);
            for term in terms {
                ast.push_back(set, term);
            }
            set
        };
        ast.set_child(self.local, 1, bound);
        bound
    }
}

/// Counts the back edges of the dependency graph; the count is the number of
/// extra evaluation passes needed to converge.
#[must_use]
pub fn detect_cycles(variables: &BTreeMap<String, Variable>) -> usize {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        name: &str,
        variables: &BTreeMap<String, Variable>,
        colors: &mut BTreeMap<String, Color>,
    ) -> usize {
        colors.insert(name.to_string(), Color::Gray);
        let mut back_edges = 0;
        if let Some(variable) = variables.get(name) {
            for dep in variable.dependencies() {
                match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => back_edges += 1,
                    Color::White => back_edges += visit(dep, variables, colors),
                    Color::Black => {}
                }
            }
        }
        colors.insert(name.to_string(), Color::Black);
        back_edges
    }

    let mut colors: BTreeMap<String, Color> = BTreeMap::new();
    let mut total = 0;
    for name in variables.keys() {
        if colors.get(name.as_str()).copied().unwrap_or(Color::White) == Color::White {
            total += visit(name, variables, &mut colors);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueDef};
    use dike_ast::build;

    fn local(ast: &mut Ast, name: &str) -> NodeId {
        build!(ast, (Local (Var ^ name) (Undefined)))
    }

    fn int_value(ast: &mut Ast, text: &str) -> Value {
        let term = build!(ast, (Term (Scalar (JSONInt ^ text))));
        ValueDef::new(term)
    }

    #[test]
    fn test_classification() {
        let mut ast = Ast::new();
        let user_decl = local(&mut ast, "x");
        let user = Variable::new(&ast, user_decl);
        assert!(user.is_user_var() && !user.is_unify());
        let unify_decl = local(&mut ast, "unify$3");
        let unify = Variable::new(&ast, unify_decl);
        assert!(unify.is_unify() && !unify.is_user_var());
        let internal_decl = local(&mut ast, "value$0");
        let internal = Variable::new(&ast, internal_decl);
        assert!(!internal.is_unify() && !internal.is_user_var());
        let fuzz_decl = local(&mut ast, "$1");
        let fuzz = Variable::new(&ast, fuzz_decl);
        assert!(fuzz.is_user_var());
    }

    #[test]
    fn test_user_var_accumulates_distinct() {
        let mut ast = Ast::new();
        let decl = local(&mut ast, "x");
        let mut var = Variable::new(&ast, decl);
        let a = int_value(&mut ast, "1");
        let b = int_value(&mut ast, "2");
        let a_again = int_value(&mut ast, "1");
        var.unify(&ast, vec![a, b]);
        var.unify(&ast, vec![a_again]);
        assert_eq!(var.valid_values().len(), 2);
    }

    #[test]
    fn test_unify_var_intersects() {
        let mut ast = Ast::new();
        let decl = local(&mut ast, "unify$0");
        let mut var = Variable::new(&ast, decl);
        let one = int_value(&mut ast, "1");
        let two = int_value(&mut ast, "2");
        let two_again = int_value(&mut ast, "2");
        let three = int_value(&mut ast, "3");
        var.unify(&ast, vec![one, two]);
        var.unify(&ast, vec![two_again, three]);
        let values = var.valid_values();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].json(&ast), "2");
    }

    #[test]
    fn test_undefined_dropped() {
        let mut ast = Ast::new();
        let decl = local(&mut ast, "x");
        let mut var = Variable::new(&ast, decl);
        let undef = ast.node(NodeKind::Undefined);
        var.unify(&ast, vec![ValueDef::new(undef)]);
        assert!(var.valid_values().is_empty());
    }

    #[test]
    fn test_bind_single_and_set() {
        let mut ast = Ast::new();
        let decl = local(&mut ast, "x");
        let mut var = Variable::new(&ast, decl);
        let one = int_value(&mut ast, "1");
        var.unify(&ast, vec![one]);
        let bound = var.bind(&mut ast);
        assert_eq!(ast.kind(bound), NodeKind::Term);
        assert_eq!(ast.kind(ast.child(decl, 1)), NodeKind::Term);

        let two = int_value(&mut ast, "2");
        var.unify(&ast, vec![two]);
        let bound = var.bind(&mut ast);
        assert_eq!(ast.kind(bound), NodeKind::TermSet);
        assert_eq!(ast.len(bound), 2);
    }

    #[test]
    fn test_mark_invalid_kills_falsy() {
        let mut ast = Ast::new();
        let decl = local(&mut ast, "unify$1");
        let mut var = Variable::new(&ast, decl);
        let t = build!(ast, (Term (Scalar (JSONTrue ^ "true"))));
        let f = build!(ast, (Term (Scalar (JSONFalse ^ "false"))));
        var.unify(&ast, vec![ValueDef::new(t), ValueDef::new(f)]);
        var.mark_invalid_values(&ast);
        var.remove_invalid_values();
        let values = var.valid_values();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].json(&ast), "true");
    }

    #[test]
    fn test_detect_cycles() {
        let mut ast = Ast::new();
        let mut vars = BTreeMap::new();
        let a_decl = local(&mut ast, "a");
        let mut a = Variable::new(&ast, a_decl);
        a.insert_dependencies(["b".to_string()]);
        let b_decl = local(&mut ast, "b");
        let mut b = Variable::new(&ast, b_decl);
        b.insert_dependencies(["a".to_string()]);
        vars.insert("a".to_string(), a);
        vars.insert("b".to_string(), b);
        assert_eq!(detect_cycles(&vars), 1);

        let mut acyclic = BTreeMap::new();
        let c_decl = local(&mut ast, "c");
        let mut c = Variable::new(&ast, c_decl);
        c.insert_dependencies(["d".to_string()]);
        let d_decl = local(&mut ast, "d");
        let d = Variable::new(&ast, d_decl);
        acyclic.insert("c".to_string(), c);
        acyclic.insert("d".to_string(), d);
        assert_eq!(detect_cycles(&acyclic), 0);
    }
}
