//! The rewriter engine.
//!
//! A pass is an ordered list of rules, each `(pattern, action)`. Patterns
//! match a window of consecutive siblings under a parent whose kind satisfies
//! the rule's `In` context; actions build a replacement subtree. The driver
//! sweeps the tree (top-down or bottom-up) until no rule fires, splicing
//! replacements in place and re-anchoring `Lift` nodes after every sweep.
//!
//! Replacement conventions:
//! - a `Seq` node is inlined (its children replace the window),
//! - a `Lift` node (`Lift <<= <target-kind marker> * payload...`) is moved to
//!   the front of the nearest enclosing ancestor of the target kind,
//! - any other node replaces the window directly.

use std::collections::HashMap;
use std::rc::Rc;

use dike_ast::{Ast, NodeId, NodeKind};
use tracing::trace;

/// Match environment: named captures of nodes or sibling ranges.
#[derive(Debug, Default)]
pub struct Env {
    bindings: HashMap<&'static str, Vec<NodeId>>,
}

impl Env {
    /// The single node captured under `name`.
    ///
    /// # Panics
    ///
    /// Panics when the name is unbound; rule actions only read names their
    /// own pattern binds.
    #[must_use]
    pub fn node(&self, name: &'static str) -> NodeId {
        self.bindings[name][0]
    }

    /// The node range captured under `name` (empty if unbound).
    #[must_use]
    pub fn nodes(&self, name: &'static str) -> &[NodeId] {
        self.bindings.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether `name` captured anything.
    #[must_use]
    pub fn has(&self, name: &'static str) -> bool {
        self.bindings.get(name).is_some_and(|nodes| !nodes.is_empty())
    }

    fn bind(&mut self, name: &'static str, nodes: Vec<NodeId>) {
        self.bindings.insert(name, nodes);
    }
}

type Predicate = Rc<dyn Fn(&Ast, NodeId) -> bool>;

/// A pattern over one sibling position (or an assertion).
#[derive(Clone)]
pub enum Pat {
    /// One node whose kind is in the set.
    Kind(&'static [NodeKind]),
    /// One node of any kind.
    Any,
    /// Asserts that no siblings remain; consumes nothing.
    End,
    /// Zero or more nodes matching the inner pattern (greedy).
    Rep(Box<Pat>),
    /// A node matching the head pattern whose children match the given
    /// sequence as a prefix.
    Children(Box<Pat>, Vec<Pat>),
    /// Captures whatever the inner pattern consumes.
    Bind(&'static str, Box<Pat>),
    /// The inner pattern, subject to a predicate on its first matched node.
    Guard(Box<Pat>, Predicate),
}

impl Pat {
    /// Captures this pattern's match under `name`.
    #[must_use]
    pub fn bind(self, name: &'static str) -> Self {
        Self::Bind(name, Box::new(self))
    }

    /// Adds a predicate on the first node this pattern matches.
    #[must_use]
    pub fn guard(self, pred: impl Fn(&Ast, NodeId) -> bool + 'static) -> Self {
        Self::Guard(Box::new(self), Rc::new(pred))
    }

    /// Requires the matched node's children to match `pats` as a prefix.
    #[must_use]
    pub fn children(self, pats: Vec<Pat>) -> Self {
        Self::Children(Box::new(self), pats)
    }
}

/// One node of any of `kinds`.
#[must_use]
pub fn t(kinds: &'static [NodeKind]) -> Pat {
    Pat::Kind(kinds)
}

/// One node of any kind.
#[must_use]
pub fn any() -> Pat {
    Pat::Any
}

/// End-of-siblings assertion.
#[must_use]
pub fn end() -> Pat {
    Pat::End
}

/// Zero or more nodes matching `pat`.
#[must_use]
pub fn rep(pat: Pat) -> Pat {
    Pat::Rep(Box::new(pat))
}

type Action = Rc<dyn Fn(&mut Ast, &Env) -> NodeId>;

/// A rewrite rule: context guard, sibling pattern, action.
#[derive(Clone)]
pub struct Rule {
    in_kinds: Option<&'static [NodeKind]>,
    pats: Vec<Pat>,
    action: Action,
}

impl Rule {
    /// A rule applying under any parent.
    pub fn any(pats: Vec<Pat>, action: impl Fn(&mut Ast, &Env) -> NodeId + 'static) -> Self {
        Self {
            in_kinds: None,
            pats,
            action: Rc::new(action),
        }
    }

    /// A rule applying only when the parent's kind is in `in_kinds`.
    pub fn new(
        in_kinds: &'static [NodeKind],
        pats: Vec<Pat>,
        action: impl Fn(&mut Ast, &Env) -> NodeId + 'static,
    ) -> Self {
        Self {
            in_kinds: Some(in_kinds),
            pats,
            action: Rc::new(action),
        }
    }
}

/// Sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Parents are rewritten before their children.
    TopDown,
    /// Children are rewritten before their parents.
    BottomUp,
}

type Hook = Rc<dyn Fn(&mut Ast, NodeId)>;

/// A named rewrite pass.
#[derive(Clone)]
pub struct PassDef {
    /// Pass name, used in diagnostics and debug dumps.
    pub name: &'static str,
    /// Sweep direction.
    pub direction: Direction,
    /// When true the pass runs exactly one sweep instead of to fixpoint.
    pub once: bool,
    /// Rules, tried in order at every window.
    pub rules: Vec<Rule>,
    /// Runs before the first sweep.
    pub pre: Option<Hook>,
    /// Runs after the last sweep.
    pub post: Option<Hook>,
}

impl PassDef {
    /// Creates a top-down fixpoint pass.
    #[must_use]
    pub fn new(name: &'static str, rules: Vec<Rule>) -> Self {
        Self {
            name,
            direction: Direction::TopDown,
            once: false,
            rules,
            pre: None,
            post: None,
        }
    }

    /// Switches the pass to bottom-up order.
    #[must_use]
    pub fn bottom_up(mut self) -> Self {
        self.direction = Direction::BottomUp;
        self
    }

    /// Limits the pass to a single sweep.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Installs a pre-sweep hook.
    #[must_use]
    pub fn with_pre(mut self, hook: impl Fn(&mut Ast, NodeId) + 'static) -> Self {
        self.pre = Some(Rc::new(hook));
        self
    }

    /// Installs a post-sweep hook.
    #[must_use]
    pub fn with_post(mut self, hook: impl Fn(&mut Ast, NodeId) + 'static) -> Self {
        self.post = Some(Rc::new(hook));
        self
    }
}

/// Outcome of running a pass to fixpoint.
#[derive(Debug, Clone, Copy)]
pub struct PassReport {
    /// Nodes in the tree after the pass.
    pub node_count: usize,
    /// Total number of rule firings.
    pub change_count: usize,
}

const MAX_SWEEPS: usize = 1_000;

/// Runs a pass over the tree rooted at `root`.
///
/// Symbol tables are rebuilt before the first sweep so pattern guards can use
/// `lookup`. Returns the report, or an error message when the pass fails to
/// reach fixpoint within the sweep limit.
pub fn run_pass(ast: &mut Ast, root: NodeId, pass: &PassDef) -> Result<PassReport, String> {
    if let Some(pre) = &pass.pre {
        ast.build_symbols(root);
        pre(ast, root);
    }
    let mut total_changes = 0;
    for sweep_index in 0..MAX_SWEEPS {
        ast.build_symbols(root);
        let changes = sweep(ast, root, pass);
        lift_pending(ast, root);
        total_changes += changes;
        trace!(pass = pass.name, sweep_index, changes, "sweep complete");
        if changes == 0 || pass.once {
            if let Some(post) = &pass.post {
                ast.build_symbols(root);
                post(ast, root);
            }
            return Ok(PassReport {
                node_count: ast.descendants(root).len(),
                change_count: total_changes,
            });
        }
    }
    Err(format!("pass {} did not reach fixpoint", pass.name))
}

fn sweep(ast: &mut Ast, root: NodeId, pass: &PassDef) -> usize {
    let mut changes = 0;
    match pass.direction {
        Direction::TopDown => sweep_topdown(ast, root, pass, &mut changes),
        Direction::BottomUp => sweep_bottomup(ast, root, pass, &mut changes),
    }
    changes
}

fn sweep_topdown(ast: &mut Ast, node: NodeId, pass: &PassDef, changes: &mut usize) {
    if ast.kind(node) == NodeKind::Error {
        return;
    }
    rewrite_children(ast, node, pass, changes);
    let children: Vec<NodeId> = ast.children(node).to_vec();
    for child in children {
        // A rule may have detached this child already.
        if ast.parent(child) == Some(node) {
            sweep_topdown(ast, child, pass, changes);
        }
    }
}

fn sweep_bottomup(ast: &mut Ast, node: NodeId, pass: &PassDef, changes: &mut usize) {
    if ast.kind(node) == NodeKind::Error {
        return;
    }
    let children: Vec<NodeId> = ast.children(node).to_vec();
    for child in children {
        if ast.parent(child) == Some(node) {
            sweep_bottomup(ast, child, pass, changes);
        }
    }
    rewrite_children(ast, node, pass, changes);
}

fn rewrite_children(ast: &mut Ast, parent: NodeId, pass: &PassDef, changes: &mut usize) {
    let parent_kind = ast.kind(parent);
    let mut index = 0;
    let mut fuel = MAX_SWEEPS * 10;
    while index <= ast.len(parent) {
        let mut fired = false;
        for rule in &pass.rules {
            if let Some(kinds) = rule.in_kinds {
                if !kinds.contains(&parent_kind) {
                    continue;
                }
            }
            let mut env = Env::default();
            let Some(consumed) = match_window(ast, parent, index, &rule.pats, &mut env) else {
                continue;
            };
            if consumed == 0 {
                // Zero-width matches cannot make progress.
                continue;
            }
            let window: Vec<NodeId> = ast.children(parent)[index..index + consumed].to_vec();
            let replacement = (rule.action)(ast, &env);
            // The action may have detached window nodes and reused them in the
            // replacement, so remove what is left by identity, not by range.
            let insert_at = window
                .iter()
                .filter_map(|&n| ast.position(parent, n))
                .min()
                .unwrap_or_else(|| index.min(ast.len(parent)));
            for &node in &window {
                if ast.parent(node) == Some(parent) {
                    ast.detach(node);
                }
            }
            let insert: Vec<NodeId> = if ast.kind(replacement) == NodeKind::Seq {
                let items = ast.children(replacement).to_vec();
                for &item in &items {
                    ast.detach(item);
                }
                items
            } else {
                vec![replacement]
            };
            let insert_at = insert_at.min(ast.len(parent));
            ast.splice(parent, insert_at, insert);
            *changes += 1;
            fired = true;
            break;
        }
        if !fired {
            if index >= ast.len(parent) {
                break;
            }
            index += 1;
        } else {
            fuel -= 1;
            if fuel == 0 {
                break;
            }
        }
    }
}

/// Matches a pattern sequence against `parent`'s children starting at
/// `start`. Returns the number of children consumed.
fn match_window(
    ast: &Ast,
    parent: NodeId,
    start: usize,
    pats: &[Pat],
    env: &mut Env,
) -> Option<usize> {
    let children: Vec<NodeId> = ast.children(parent).to_vec();
    let mut pos = start;
    for pat in pats {
        pos = match_one(ast, &children, pos, pat, env)?;
    }
    Some(pos - start)
}

fn match_one(
    ast: &Ast,
    siblings: &[NodeId],
    pos: usize,
    pat: &Pat,
    env: &mut Env,
) -> Option<usize> {
    match pat {
        Pat::Kind(kinds) => {
            let node = *siblings.get(pos)?;
            kinds.contains(&ast.kind(node)).then_some(pos + 1)
        }
        Pat::Any => {
            siblings.get(pos)?;
            Some(pos + 1)
        }
        Pat::End => (pos == siblings.len()).then_some(pos),
        Pat::Rep(inner) => {
            let mut current = pos;
            while let Some(next) = match_one(ast, siblings, current, inner, env) {
                if next == current {
                    break;
                }
                current = next;
            }
            Some(current)
        }
        Pat::Children(head, child_pats) => {
            let node = *siblings.get(pos)?;
            let next = match_one(ast, siblings, pos, head, env)?;
            let grandchildren: Vec<NodeId> = ast.children(node).to_vec();
            let mut child_pos = 0;
            for child_pat in child_pats {
                child_pos = match_one(ast, &grandchildren, child_pos, child_pat, env)?;
            }
            Some(next)
        }
        Pat::Bind(name, inner) => {
            let next = match_one(ast, siblings, pos, inner, env)?;
            env.bind(name, siblings[pos..next].to_vec());
            Some(next)
        }
        Pat::Guard(inner, pred) => {
            let next = match_one(ast, siblings, pos, inner, env)?;
            let subject = if next > pos {
                siblings[pos]
            } else {
                *siblings.get(pos)?
            };
            pred(ast, subject).then_some(next)
        }
    }
}

/// Re-anchors pending `Lift` nodes: each payload moves to the front of the
/// nearest enclosing ancestor of the marked kind.
fn lift_pending(ast: &mut Ast, root: NodeId) {
    let lifts: Vec<NodeId> = ast
        .descendants(root)
        .into_iter()
        .filter(|&n| ast.kind(n) == NodeKind::Lift)
        .collect();
    // Later lifts insert at the front after earlier ones, so walk in reverse
    // to preserve document order at the target.
    for &lift in lifts.iter().rev() {
        let target_kind = ast.kind(ast.child(lift, 0));
        let payload: Vec<NodeId> = ast.children(lift)[1..].to_vec();
        let mut target = ast.parent(lift);
        while let Some(node) = target {
            if ast.kind(node) == target_kind && node != lift {
                break;
            }
            target = ast.parent(node);
        }
        ast.detach(lift);
        if let Some(target) = target {
            for &item in payload.iter().rev() {
                ast.push_front(target, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::build;
    use NodeKind::*;

    #[test]
    fn test_simple_replacement() {
        let mut ast = Ast::new();
        let group = build!(ast, (Group (Var ^ "x") (Unify) (JSONInt ^ "1")));
        let pass = PassDef::new(
            "test",
            vec![super::Rule::new(
                &[Group],
                vec![
                    t(&[Var]).bind("var"),
                    t(&[Unify]),
                    t(&[JSONInt]).bind("val"),
                ],
                |ast, env| {
                    let var = env.node("var");
                    let val = env.node("val");
                    build!(ast, (UnifyExpr @var (Scalar @val)))
                },
            )],
        );
        let report = run_pass(&mut ast, group, &pass).unwrap();
        assert_eq!(report.change_count, 1);
        assert_eq!(ast.len(group), 1);
        assert_eq!(ast.kind(ast.child(group, 0)), UnifyExpr);
    }

    #[test]
    fn test_seq_inlines() {
        let mut ast = Ast::new();
        let group = build!(ast, (Group (Colon)));
        let pass = PassDef::new(
            "test",
            vec![super::Rule::new(&[Group], vec![t(&[Colon])], |ast, _| {
                build!(ast, (Seq (Var ^ "a") (Var ^ "b")))
            })],
        );
        run_pass(&mut ast, group, &pass).unwrap();
        assert_eq!(ast.len(group), 2);
        assert_eq!(ast.text(ast.child(group, 0)), "a");
    }

    #[test]
    fn test_fixpoint_runs_until_no_change() {
        let mut ast = Ast::new();
        let group = build!(
            ast,
            (Group (JSONInt ^ "1") (Add) (JSONInt ^ "2") (Add) (JSONInt ^ "3"))
        );
        let pass = PassDef::new(
            "fold",
            vec![super::Rule::new(
                &[Group],
                vec![
                    t(&[JSONInt]).bind("lhs"),
                    t(&[Add]),
                    t(&[JSONInt]).bind("rhs"),
                ],
                |ast, env| {
                    let sum: i64 = ast.text(env.node("lhs")).parse::<i64>().unwrap()
                        + ast.text(env.node("rhs")).parse::<i64>().unwrap();
                    ast.token(JSONInt, sum.to_string())
                },
            )],
        );
        let report = run_pass(&mut ast, group, &pass).unwrap();
        assert_eq!(report.change_count, 2);
        assert_eq!(ast.text(ast.child(group, 0)), "6");
    }

    #[test]
    fn test_children_pattern() {
        let mut ast = Ast::new();
        let expr = build!(ast, (Expr (Term (Var ^ "x"))));
        let pass = PassDef::new(
            "unwrap",
            vec![super::Rule::new(
                &[Expr],
                vec![t(&[Term]).children(vec![t(&[Var]).bind("var"), end()])],
                |ast, env| {
                    let var = env.node("var");
                    build!(ast, (RefTerm @var))
                },
            )],
        );
        run_pass(&mut ast, expr, &pass).unwrap();
        assert_eq!(ast.kind(ast.child(expr, 0)), RefTerm);
    }

    #[test]
    fn test_rep_and_end() {
        let mut ast = Ast::new();
        let body = build!(ast, (UnifyBody (Group (Var ^ "a")) (Group (Var ^ "b"))));
        let pass = PassDef::new(
            "gather",
            vec![super::Rule::new(
                &[UnifyBody],
                vec![t(&[Group]).bind("head"), rep(t(&[Group])).bind("tail"), end()],
                |ast, env| {
                    let head = env.node("head");
                    let tail: Vec<NodeId> = env.nodes("tail").to_vec();
                    build!(ast, (Literal @head @@tail))
                },
            )],
        );
        let report = run_pass(&mut ast, body, &pass).unwrap();
        assert_eq!(report.change_count, 1);
        assert_eq!(ast.len(body), 1);
        assert_eq!(ast.len(ast.child(body, 0)), 2);
    }

    #[test]
    fn test_lift_to_ancestor() {
        let mut ast = Ast::new();
        let body = build!(ast, (UnifyBody (Literal (Expr (Var ^ "x")))));
        let pass = PassDef::new(
            "lift-local",
            vec![super::Rule::new(&[Expr], vec![t(&[Var]).bind("var")], |ast, env| {
                let name = ast.text(env.node("var")).to_string();
                build!(
                    ast,
                    (Seq
                        (Lift (UnifyBody) (Local (Var ^ &name) (Undefined)))
                        (RefTerm (Var ^ &name)))
                )
            })],
        );
        run_pass(&mut ast, body, &pass).unwrap();
        assert_eq!(ast.len(body), 2);
        assert_eq!(ast.kind(ast.child(body, 0)), Local);
        assert_eq!(ast.kind(ast.child(body, 1)), Literal);
    }

    #[test]
    fn test_guard_blocks_match() {
        let mut ast = Ast::new();
        let group = build!(ast, (Group (Var ^ "keep") (Var ^ "drop")));
        let pass = PassDef::new(
            "drop",
            vec![super::Rule::new(
                &[Group],
                vec![t(&[Var]).guard(|ast, n| ast.text(n) == "drop")],
                |ast, _| ast.node(Seq),
            )],
        );
        run_pass(&mut ast, group, &pass).unwrap();
        assert_eq!(ast.len(group), 1);
        assert_eq!(ast.text(ast.child(group, 0)), "keep");
    }
}
