//! Enumeration passes: explicit `some … in`, implicit `val = ref[idx]`, and
//! comprehension shaping.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use super::{is_in, STATEMENT_KINDS};
use crate::rewrite::{end, rep, t, PassDef, Rule};

/// Nests the statements that follow a `some … in` declaration under a
/// `LiteralEnum` over a fresh item variable.
pub fn explicit_enums() -> PassDef {
    PassDef::new(
        "explicit_enums",
        vec![Rule::new(
            &[UnifyBody],
            vec![
                t(&[LiteralEnum])
                    .guard(|ast, n| ast.len(n) == 2 && ast.kind(ast.child(n, 0)) == VarSeq)
                    .bind("enum"),
                rep(t(STATEMENT_KINDS)).bind("tail"),
                end(),
            ],
            |ast, env| {
                let literal_enum = env.node("enum");
                let tail: Vec<NodeId> = env.nodes("tail").to_vec();
                let varseq = ast.child(literal_enum, 0);
                let domain = ast.child(literal_enum, 1);
                let targets: Vec<NodeId> = ast.children(varseq).to_vec();
                if targets.is_empty() || targets.len() > 2 {
                    return ast.error(literal_enum, "Invalid some declaration");
                }
                let itemseq = ast.fresh("itemseq");
                let itemseq_name = itemseq.view().to_string();
                let item = ast.fresh("item");
                let item_name = item.view().to_string();

                let body = ast.node(UnifyBody);
                // project the declared variables out of the enumerated tuple
                for (position, &target) in targets.iter().enumerate() {
                    let tuple_index = if targets.len() == 1 { 1 } else { position };
                    let target = ast.deep_clone(target);
                    let index_text = tuple_index.to_string();
                    let projection = build!(
                        ast,
                        (Literal
                            (Expr
                                (RefTerm @target)
                                (Unify)
                                (RefTerm
                                    (Ref (RefHead (Var ^ &item_name))
                                        (RefArgSeq
                                            (RefArgBrack (Scalar (JSONInt ^ &index_text))))))))
                    );
                    ast.push_back(body, projection);
                }
                for &stmt in &tail {
                    ast.detach(stmt);
                    ast.push_back(body, stmt);
                }
                let domain_tokens: Vec<NodeId> = ast.children(domain).to_vec();
                for &token in &domain_tokens {
                    ast.detach(token);
                }
                build!(
                    ast,
                    (Seq
                        (Local (Var ^ &itemseq_name) (Undefined))
                        (Literal
                            (Expr (RefTerm (Var ^ &itemseq_name)) (Unify) @@domain_tokens))
                        (Local (Var ^ &item_name) (Undefined))
                        (LiteralEnum (Var ^ &item_name) (Var ^ &itemseq_name) @body))
                )
            },
        )],
    )
}

/// Shapes comprehensions to `(Var, NestedBody)`: the head expression is
/// unified with a fresh collection variable inside the body.
pub fn compr() -> PassDef {
    PassDef::new(
        "compr",
        vec![
            Rule::any(
                vec![t(&[ArrayCompr, SetCompr])
                    .guard(|ast, n| ast.len(n) == 2 && ast.kind(ast.child(n, 0)) == Expr)
                    .bind("compr")],
                |ast, env| {
                    let compr = env.node("compr");
                    let kind = ast.kind(compr);
                    let head = ast.child(compr, 0);
                    let body = ast.child(compr, 1);
                    let var = ast.fresh("compr");
                    let var_name = var.view().to_string();
                    let key = ast.fresh("comprbody");
                    let key_name = key.view().to_string();
                    let head_tokens: Vec<NodeId> = ast.children(head).to_vec();
                    for &token in &head_tokens {
                        ast.detach(token);
                    }
                    let collect = build!(
                        ast,
                        (Literal
                            (Expr (RefTerm (Var ^ &var_name)) (Unify) @@head_tokens))
                    );
                    ast.detach(body);
                    ast.push_back(body, collect);
                    let local = build!(ast, (Local (Var ^ &var_name) (Undefined)));
                    ast.push_front(body, local);
                    let result = ast.node(kind);
                    let var_node = ast.token(Var, &var_name);
                    ast.push_back(result, var_node);
                    let nested = build!(ast, (NestedBody (Key ^ &key_name) @body));
                    ast.push_back(result, nested);
                    result
                },
            ),
            Rule::any(
                vec![t(&[ObjectCompr])
                    .guard(|ast, n| ast.len(n) == 3 && ast.kind(ast.child(n, 0)) == Expr)
                    .bind("compr")],
                |ast, env| {
                    let compr = env.node("compr");
                    let key_expr = ast.child(compr, 0);
                    let value_expr = ast.child(compr, 1);
                    let body = ast.child(compr, 2);
                    let var = ast.fresh("compr");
                    let var_name = var.view().to_string();
                    let key = ast.fresh("comprbody");
                    let key_name = key.view().to_string();
                    ast.detach(key_expr);
                    ast.detach(value_expr);
                    let collect = build!(
                        ast,
                        (Literal
                            (Expr
                                (RefTerm (Var ^ &var_name))
                                (Unify)
                                (Term (Array @key_expr @value_expr))))
                    );
                    ast.detach(body);
                    ast.push_back(body, collect);
                    let local = build!(ast, (Local (Var ^ &var_name) (Undefined)));
                    ast.push_front(body, local);
                    build!(
                        ast,
                        (ObjectCompr (Var ^ &var_name)
                            (NestedBody (Key ^ &key_name) @body))
                    )
                },
            ),
        ],
    )
}

/// Finds enumerations hiding as `val = ref[idx]` where `idx` is a body local,
/// and re-parents locals that an enumeration captured but that are referenced
/// outside it.
pub fn implicit_enums() -> PassDef {
    PassDef::new(
        "implicit_enums",
        vec![
            Rule::new(
                &[UnifyBody],
                vec![
                    t(&[Literal])
                        .guard(|ast, n| implicit_enum_parts(ast, n).is_some())
                        .bind("literal"),
                    rep(t(STATEMENT_KINDS)).bind("tail"),
                    end(),
                ],
                |ast, env| {
                    let literal = env.node("literal");
                    let tail: Vec<NodeId> = env.nodes("tail").to_vec();
                    let (val, itemseq, idx) =
                        implicit_enum_parts(ast, literal).expect("guarded");
                    let item = ast.fresh("item");
                    let item_name = item.view().to_string();
                    let val = ast.deep_clone(val);
                    let itemseq = ast.deep_clone(itemseq);
                    let idx = ast.deep_clone(idx);
                    let body = ast.node(UnifyBody);
                    for (target, tuple_index) in [(idx, "0"), (val, "1")] {
                        let projection = build!(
                            ast,
                            (Literal
                                (Expr
                                    (AssignInfix
                                        (AssignArg (RefTerm @target))
                                        (AssignArg
                                            (RefTerm
                                                (SimpleRef (Var ^ &item_name)
                                                    (RefArgBrack
                                                        (Scalar (JSONInt ^ tuple_index)))))))))
                        );
                        ast.push_back(body, projection);
                    }
                    for &stmt in &tail {
                        ast.detach(stmt);
                        ast.push_back(body, stmt);
                    }
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &item_name) (Undefined))
                            (LiteralEnum (Var ^ &item_name) @itemseq @body))
                    )
                },
            ),
            // a local captured by an enumeration but referenced outside it
            // climbs out, one level per sweep
            Rule::new(
                &[UnifyBody],
                vec![t(&[Local])
                    .guard(|ast, n| is_in(ast, n, LiteralEnum) && !can_grab(ast, n))
                    .bind("local")],
                |ast, env| {
                    let local = env.node("local");
                    ast.detach(local);
                    build!(ast, (Lift (LiteralEnum) @local))
                },
            ),
            Rule::new(
                &[LiteralEnum],
                vec![t(&[Local]).bind("local")],
                |ast, env| {
                    let local = env.node("local");
                    ast.detach(local);
                    build!(ast, (Lift (UnifyBody) @local))
                },
            ),
        ],
    )
}

/// Matches `val = itemseq[idx]` with `idx` declared as a local, in either
/// argument order. Returns `(val, itemseq, idx)`.
fn implicit_enum_parts(ast: &Ast, literal: NodeId) -> Option<(NodeId, NodeId, NodeId)> {
    let expr = ast.child(literal, 0);
    if ast.kind(expr) != Expr || ast.len(expr) != 1 {
        return None;
    }
    let assign = ast.child(expr, 0);
    if ast.kind(assign) != AssignInfix {
        return None;
    }
    let left = ast.child(ast.child(assign, 0), 0);
    let right = ast.child(ast.child(assign, 1), 0);
    let as_var = |node: NodeId| -> Option<NodeId> {
        (ast.kind(node) == RefTerm && ast.kind(ast.child(node, 0)) == Var)
            .then(|| ast.child(node, 0))
    };
    let as_indexed = |node: NodeId| -> Option<(NodeId, NodeId)> {
        if ast.kind(node) != RefTerm {
            return None;
        }
        let simple = ast.child(node, 0);
        if ast.kind(simple) != SimpleRef {
            return None;
        }
        let brack = ast.child(simple, 1);
        if ast.kind(brack) != RefArgBrack {
            return None;
        }
        let index = ast.child(brack, 0);
        if ast.kind(index) != RefTerm || ast.kind(ast.child(index, 0)) != Var {
            return None;
        }
        let idx_var = ast.child(index, 0);
        let defs = ast.lookup(idx_var);
        let is_local = defs
            .first()
            .is_some_and(|&d| matches!(ast.kind(d), Local | ArgVar));
        is_local.then(|| (ast.child(simple, 0), idx_var))
    };
    if let (Some(val), Some((itemseq, idx))) = (as_var(left), as_indexed(right)) {
        return Some((val, itemseq, idx));
    }
    if let (Some(val), Some((itemseq, idx))) = (as_var(right), as_indexed(left)) {
        return Some((val, itemseq, idx));
    }
    None
}

/// A captured local may stay in the enumeration body only if every reference
/// to it shares that body as the common ancestor.
fn can_grab(ast: &Ast, local: NodeId) -> bool {
    let Some(body) = ast.parent(local) else {
        return true;
    };
    let Some(scope) = ast.scope(local) else {
        return true;
    };
    let name = ast.text(ast.child(local, 0)).to_string();
    let refs = collect_refs(ast, scope, &name);
    for reference in refs {
        if ast.parent(reference) == Some(local) {
            continue;
        }
        if ast.common_parent(local, reference) != Some(body) {
            return false;
        }
    }
    true
}

fn collect_refs(ast: &Ast, scope: NodeId, name: &str) -> Vec<NodeId> {
    let mut refs = Vec::new();
    let mut stack = vec![scope];
    while let Some(node) = stack.pop() {
        if ast.kind(node) == RefArgDot {
            continue;
        }
        if ast.kind(node) == Var && ast.text(node) == name {
            refs.push(node);
            continue;
        }
        stack.extend(ast.children(node).iter().copied());
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    #[test]
    fn test_explicit_enum_nests_tail() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "x") (Undefined))
                (LiteralEnum (VarSeq (Var ^ "x")) (Expr (RefTerm (Var ^ "xs"))))
                (Literal (Expr (RefTerm (Var ^ "x")))))
        );
        run_pass(&mut ast, body, &explicit_enums()).unwrap();
        let kinds: Vec<NodeKind> = ast.children(body).iter().map(|&c| ast.kind(c)).collect();
        assert!(kinds.contains(&LiteralEnum));
        let literal_enum = ast
            .children(body)
            .iter()
            .copied()
            .find(|&c| ast.kind(c) == LiteralEnum)
            .unwrap();
        assert_eq!(ast.len(literal_enum), 3);
        let nested = ast.child(literal_enum, 2);
        // projection plus the captured trailing statement
        assert_eq!(ast.len(nested), 2);
    }

    #[test]
    fn test_compr_shape() {
        let mut ast = Ast::new();
        let wrapper = build!(
            ast,
            (Expr (Term (SetCompr
                (Expr (RefTerm (Var ^ "n")))
                (UnifyBody (Literal (Expr (RefTerm (Var ^ "n"))))))))
        );
        run_pass(&mut ast, wrapper, &compr()).unwrap();
        let term = ast.child(wrapper, 0);
        let set_compr = ast.child(term, 0);
        assert_eq!(ast.len(set_compr), 2);
        assert_eq!(ast.kind(ast.child(set_compr, 0)), Var);
        let nested = ast.child(set_compr, 1);
        assert_eq!(ast.kind(nested), NestedBody);
        // head collection statement appended to the body
        let inner_body = ast.child(nested, 1);
        assert_eq!(ast.len(inner_body), 3);
    }

    #[test]
    fn test_implicit_enum_detected() {
        let mut ast = Ast::new();
        let rule = build!(
            ast,
            (RuleComp (Var ^ "r")
                (UnifyBody
                    (Local (Var ^ "n") (Undefined))
                    (Local (Var ^ "$0") (Undefined))
                    (Literal
                        (Expr
                            (AssignInfix
                                (AssignArg (RefTerm (Var ^ "n")))
                                (AssignArg
                                    (RefTerm
                                        (SimpleRef (Var ^ "xs")
                                            (RefArgBrack (RefTerm (Var ^ "$0"))))))))))
                (DataTerm (Scalar (JSONTrue ^ "true")))
                (JSONInt ^ "0"))
        );
        run_pass(&mut ast, rule, &implicit_enums()).unwrap();
        let enums: Vec<NodeId> = ast
            .descendants(rule)
            .into_iter()
            .filter(|&n| ast.kind(n) == LiteralEnum)
            .collect();
        assert_eq!(enums.len(), 1);
        assert_eq!(ast.text(ast.child(enums[0], 1)), "xs");
    }
}
