//! Statement normalization: binding initialization and the rule-body pass
//! that reduces every statement to the unification normal form.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

/// True when the assign argument is a plain variable reference.
fn assign_arg_var(ast: &Ast, arg: NodeId) -> Option<NodeId> {
    let inner = ast.child(arg, 0);
    (ast.kind(inner) == RefTerm && ast.kind(ast.child(inner, 0)) == Var)
        .then(|| ast.child(inner, 0))
}

/// Recognizes binding initializations: an equality whose variable side has no
/// declaration yet declares it.
pub fn init() -> PassDef {
    PassDef::new(
        "init",
        vec![Rule::new(
            &[UnifyBody],
            vec![t(&[Literal])
                .guard(|ast, n| init_target(ast, n).is_some())
                .bind("literal")],
            |ast, env| {
                let literal = env.node("literal");
                let (var, flipped) = init_target(ast, literal).expect("guarded");
                let name = ast.text(var).to_string();
                let expr = ast.child(literal, 0);
                let assign = ast.child(expr, 0);
                let assign = if flipped {
                    // normalize the variable to the left side
                    let left = ast.child(assign, 0);
                    let right = ast.child(assign, 1);
                    ast.detach(left);
                    ast.detach(right);
                    build!(ast, (AssignInfix @right @left))
                } else {
                    ast.detach(assign);
                    assign
                };
                let parent = ast.parent(literal);
                let already_declared = parent.is_some_and(|body| {
                    ast.children(body).iter().any(|&c| {
                        ast.kind(c) == Local && ast.text(ast.child(c, 0)) == name
                    })
                });
                if already_declared {
                    build!(ast, (LiteralInit @assign))
                } else {
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &name) (Undefined))
                            (LiteralInit @assign))
                    )
                }
            },
        )],
    )
}

/// The variable side of an undeclared-variable equality, and whether the
/// variable sits on the right.
fn init_target(ast: &Ast, literal: NodeId) -> Option<(NodeId, bool)> {
    let expr = ast.child(literal, 0);
    if ast.kind(expr) != Expr || ast.len(expr) != 1 {
        return None;
    }
    let assign = ast.child(expr, 0);
    if ast.kind(assign) != AssignInfix {
        return None;
    }
    let undeclared = |var: NodeId| ast.lookup(var).is_empty();
    if let Some(var) = assign_arg_var(ast, ast.child(assign, 0)) {
        if undeclared(var) {
            return Some((var, false));
        }
    }
    if let Some(var) = assign_arg_var(ast, ast.child(assign, 1)) {
        if undeclared(var) {
            return Some((var, true));
        }
    }
    None
}

/// Normalizes every statement to `Local`, `UnifyExpr`, `UnifyExprWith`,
/// `UnifyExprCompr`, or `UnifyExprEnum`.
#[allow(clippy::too_many_lines)]
pub fn rulebody() -> PassDef {
    PassDef::new(
        "rulebody",
        vec![
            Rule::new(
                &[UnifyBody],
                vec![t(&[LiteralInit]).bind("stmt")],
                |ast, env| {
                    let assign = ast.child(env.node("stmt"), 0);
                    let var = assign_arg_var(ast, ast.child(assign, 0)).expect("init shape");
                    let rhs = ast.child(ast.child(assign, 1), 0);
                    let var = ast.deep_clone(var);
                    ast.detach(rhs);
                    build!(ast, (UnifyExpr @var (Expr @rhs)))
                },
            ),
            Rule::new(
                &[UnifyBody],
                vec![t(&[LiteralEnum])
                    .guard(|ast, n| ast.len(n) == 3)
                    .bind("stmt")],
                |ast, env| {
                    let stmt = env.node("stmt");
                    let item = ast.child(stmt, 0);
                    let itemseq = ast.child(stmt, 1);
                    let body = ast.child(stmt, 2);
                    let unify = ast.fresh("unify");
                    let unify_name = unify.view().to_string();
                    for &node in &[item, itemseq, body] {
                        ast.detach(node);
                    }
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &unify_name) (Undefined))
                            (UnifyExprEnum (Var ^ &unify_name) @item @itemseq @body))
                    )
                },
            ),
            Rule::new(
                &[UnifyBody],
                vec![t(&[LiteralWith]).bind("stmt")],
                |ast, env| {
                    let stmt = env.node("stmt");
                    let body = ast.child(stmt, 0);
                    let withseq = ast.child(stmt, 1);
                    ast.detach(body);
                    ast.detach(withseq);
                    build!(ast, (UnifyExprWith @body @withseq))
                },
            ),
            // with values must be variables by evaluation time
            Rule::new(
                &[WithSeq],
                vec![t(&[With])
                    .guard(|ast, n| ast.kind(ast.child(n, 1)) == Expr)
                    .bind("with")],
                |ast, env| {
                    let with = env.node("with");
                    let varseq = ast.child(with, 0);
                    let value = ast.child(with, 1);
                    let name = ast.fresh("with");
                    let name_text = name.view().to_string();
                    ast.detach(varseq);
                    ast.detach(value);
                    build!(
                        ast,
                        (Seq
                            (Lift (UnifyBody) (Local (Var ^ &name_text) (Undefined)))
                            (Lift (UnifyBody)
                                (UnifyExpr (Var ^ &name_text) @value))
                            (With @varseq (Var ^ &name_text)))
                    )
                },
            ),
            // comprehension values split out their nested bodies
            Rule::new(
                &[UnifyBody],
                vec![t(&[UnifyExpr])
                    .guard(|ast, n| compr_of(ast, n).is_some())
                    .bind("stmt")],
                |ast, env| {
                    let stmt = env.node("stmt");
                    let target = ast.child(stmt, 0);
                    let compr = compr_of(ast, stmt).expect("guarded");
                    let kind = ast.kind(compr);
                    let var = ast.child(compr, 0);
                    let nested = ast.child(compr, 1);
                    let target = ast.deep_clone(target);
                    let var = ast.deep_clone(var);
                    ast.detach(nested);
                    let compr_node = ast.node(kind);
                    ast.push_back(compr_node, var);
                    build!(ast, (UnifyExprCompr @target @compr_node @nested))
                },
            ),
            // equalities
            Rule::new(
                &[UnifyBody],
                vec![t(&[Literal])
                    .guard(|ast, n| {
                        let expr = ast.child(n, 0);
                        ast.kind(expr) == Expr
                            && ast.len(expr) == 1
                            && ast.kind(ast.child(expr, 0)) == AssignInfix
                    })
                    .bind("stmt")],
                |ast, env| {
                    let stmt = env.node("stmt");
                    let assign = ast.child(ast.child(stmt, 0), 0);
                    let left = ast.child(assign, 0);
                    let right = ast.child(assign, 1);
                    let declared = |ast: &Ast, var: NodeId| {
                        ast.lookup(var)
                            .first()
                            .is_some_and(|&d| matches!(ast.kind(d), Local | ArgVar))
                    };
                    if let Some(var) = assign_arg_var(ast, left) {
                        if declared(ast, var) {
                            let var = ast.deep_clone(var);
                            let rhs = ast.child(right, 0);
                            ast.detach(rhs);
                            return build!(ast, (UnifyExpr @var (Expr @rhs)));
                        }
                    }
                    if let Some(var) = assign_arg_var(ast, right) {
                        if declared(ast, var) {
                            let var = ast.deep_clone(var);
                            let lhs = ast.child(left, 0);
                            ast.detach(lhs);
                            return build!(ast, (UnifyExpr @var (Expr @lhs)));
                        }
                    }
                    // neither side is a body local: both sides narrow a fresh
                    // unification target
                    let unify = ast.fresh("unify");
                    let unify_name = unify.view().to_string();
                    let lhs = ast.child(left, 0);
                    let rhs = ast.child(right, 0);
                    ast.detach(lhs);
                    ast.detach(rhs);
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &unify_name) (Undefined))
                            (UnifyExpr (Var ^ &unify_name) (Expr @lhs))
                            (UnifyExpr (Var ^ &unify_name) (Expr @rhs)))
                    )
                },
            ),
            // negation
            Rule::new(
                &[UnifyBody],
                vec![t(&[Literal])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == NotExpr)
                    .bind("stmt")],
                |ast, env| {
                    let not_expr = ast.child(env.node("stmt"), 0);
                    let unify = ast.fresh("unify");
                    let unify_name = unify.view().to_string();
                    ast.detach(not_expr);
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &unify_name) (Undefined))
                            (UnifyExpr (Var ^ &unify_name) @not_expr))
                    )
                },
            ),
            // plain expressions assert truthiness through a fresh target
            Rule::new(
                &[UnifyBody],
                vec![t(&[Literal])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Expr)
                    .bind("stmt")],
                |ast, env| {
                    let expr = ast.child(env.node("stmt"), 0);
                    let unify = ast.fresh("unify");
                    let unify_name = unify.view().to_string();
                    ast.detach(expr);
                    build!(
                        ast,
                        (Seq
                            (Local (Var ^ &unify_name) (Undefined))
                            (UnifyExpr (Var ^ &unify_name) @expr))
                    )
                },
            ),
        ],
    )
}

/// The comprehension value of a `UnifyExpr`, when its right-hand side is a
/// shaped comprehension term.
fn compr_of(ast: &Ast, stmt: NodeId) -> Option<NodeId> {
    let val = ast.child(stmt, 1);
    if ast.kind(val) != Expr || ast.len(val) != 1 {
        return None;
    }
    let mut inner = ast.child(val, 0);
    if ast.kind(inner) == Term {
        inner = ast.child(inner, 0);
    }
    (matches!(ast.kind(inner), ArrayCompr | SetCompr | ObjectCompr)
        && ast.len(inner) == 2
        && ast.kind(ast.child(inner, 1)) == NestedBody)
        .then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    #[test]
    fn test_init_declares_local() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Literal
                    (Expr
                        (AssignInfix
                            (AssignArg (RefTerm (Var ^ "x")))
                            (AssignArg (NumTerm (JSONInt ^ "5")))))))
        );
        run_pass(&mut ast, body, &init()).unwrap();
        assert_eq!(ast.kind(ast.child(body, 0)), Local);
        assert_eq!(ast.kind(ast.child(body, 1)), LiteralInit);
    }

    #[test]
    fn test_rulebody_normal_form() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "x") (Undefined))
                (LiteralInit
                    (AssignInfix
                        (AssignArg (RefTerm (Var ^ "x")))
                        (AssignArg (NumTerm (JSONInt ^ "5")))))
                (Literal
                    (Expr
                        (BoolInfix
                            (BoolArg (RefTerm (Var ^ "x")))
                            (GreaterThan)
                            (BoolArg (NumTerm (JSONInt ^ "4")))))))
        );
        run_pass(&mut ast, body, &rulebody()).unwrap();
        let kinds: Vec<NodeKind> = ast.children(body).iter().map(|&c| ast.kind(c)).collect();
        assert!(kinds.iter().all(|k| matches!(
            k,
            Local | UnifyExpr | UnifyExprWith | UnifyExprCompr | UnifyExprEnum
        )));
        let unify_exprs = kinds.iter().filter(|&&k| k == UnifyExpr).count();
        assert_eq!(unify_exprs, 2);
    }

    #[test]
    fn test_double_unification_for_non_locals() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Literal
                    (Expr
                        (AssignInfix
                            (AssignArg (NumTerm (JSONInt ^ "1")))
                            (AssignArg (NumTerm (JSONInt ^ "2")))))))
        );
        run_pass(&mut ast, body, &rulebody()).unwrap();
        // one local and two unify statements against the same target
        assert_eq!(ast.len(body), 3);
        let first_target = ast.text(ast.child(ast.child(body, 1), 0)).to_string();
        let second_target = ast.text(ast.child(ast.child(body, 2), 0)).to_string();
        assert_eq!(first_target, second_target);
        assert!(first_target.starts_with("unify$"));
    }

    #[test]
    fn test_with_value_becomes_var() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (LiteralWith
                    (UnifyBody
                        (Literal (Expr (RefTerm (Var ^ "allow")))))
                    (WithSeq
                        (With (VarSeq (Var ^ "input"))
                            (Expr (Term (Object)))))))
        );
        run_pass(&mut ast, body, &rulebody()).unwrap();
        let with_stmt = ast
            .children(body)
            .iter()
            .copied()
            .find(|&c| ast.kind(c) == UnifyExprWith)
            .unwrap();
        let withseq = ast.child(with_stmt, 1);
        let with = ast.child(withseq, 0);
        assert_eq!(ast.kind(ast.child(with, 1)), Var);
        // the with value landed in the outer body as a unification
        assert!(ast
            .children(body)
            .iter()
            .any(|&c| ast.kind(c) == UnifyExpr));
    }
}
