//! Reference chain decomposition: every reference becomes a sequence of
//! single-operator `SimpleRef` steps over fresh locals.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

/// Rewrites `a.b[c]` chains into `SimpleRef` steps, lifting intermediate
/// results into body locals.
pub fn simple_refs() -> PassDef {
    PassDef::new(
        "simple_refs",
        vec![Rule::any(
            vec![t(&[RefTerm])
                .guard(|ast, n| ast.kind(ast.child(n, 0)) == Ref)
                .bind("refterm")],
            |ast, env| {
                let refterm = env.node("refterm");
                let reference = ast.child(refterm, 0);
                let head = ast.child(ast.child(reference, 0), 0);
                let args: Vec<NodeId> = ast.children(ast.child(reference, 1)).to_vec();

                let seq = ast.node(Seq);

                // call heads land in a temporary first
                let mut current = if ast.kind(head) == ExprCall {
                    let temp = ast.fresh("ref");
                    let temp_name = temp.view().to_string();
                    ast.detach(head);
                    let local = build!(
                        ast,
                        (Lift (UnifyBody) (Local (Var ^ &temp_name) (Undefined)))
                    );
                    ast.push_back(seq, local);
                    let stmt = build!(
                        ast,
                        (Lift (UnifyBody)
                            (Literal
                                (Expr
                                    (AssignInfix
                                        (AssignArg (RefTerm (Var ^ &temp_name)))
                                        (AssignArg @head)))))
                    );
                    ast.push_back(seq, stmt);
                    ast.token(Var, &temp_name)
                } else {
                    let head = ast.deep_clone(head);
                    head
                };

                if args.is_empty() {
                    let result = build!(ast, (RefTerm @current));
                    ast.push_back(seq, result);
                    return seq;
                }

                for &arg in &args[..args.len() - 1] {
                    let temp = ast.fresh("ref");
                    let temp_name = temp.view().to_string();
                    ast.detach(arg);
                    let local = build!(
                        ast,
                        (Lift (UnifyBody) (Local (Var ^ &temp_name) (Undefined)))
                    );
                    ast.push_back(seq, local);
                    let stmt = build!(
                        ast,
                        (Lift (UnifyBody)
                            (Literal
                                (Expr
                                    (AssignInfix
                                        (AssignArg (RefTerm (Var ^ &temp_name)))
                                        (AssignArg
                                            (RefTerm (SimpleRef @current @arg)))))))
                    );
                    ast.push_back(seq, stmt);
                    current = ast.token(Var, &temp_name);
                }

                let last = *args.last().expect("non-empty");
                ast.detach(last);
                let result = build!(ast, (RefTerm (SimpleRef @current @last)));
                ast.push_back(seq, result);
                seq
            },
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    #[test]
    fn test_single_step_stays_inline() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Literal
                    (Expr
                        (AssignInfix
                            (AssignArg (RefTerm (Var ^ "x")))
                            (AssignArg
                                (RefTerm
                                    (Ref (RefHead (Var ^ "xs"))
                                        (RefArgSeq (RefArgDot (Var ^ "field"))))))))))
        );
        run_pass(&mut ast, body, &simple_refs()).unwrap();
        let simple: Vec<NodeId> = ast
            .descendants(body)
            .into_iter()
            .filter(|&n| ast.kind(n) == SimpleRef)
            .collect();
        assert_eq!(simple.len(), 1);
        assert_eq!(ast.len(body), 1);
    }

    #[test]
    fn test_chain_lifts_temporaries() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Literal
                    (Expr
                        (AssignInfix
                            (AssignArg (RefTerm (Var ^ "x")))
                            (AssignArg
                                (RefTerm
                                    (Ref (RefHead (Var ^ "a"))
                                        (RefArgSeq
                                            (RefArgDot (Var ^ "b"))
                                            (RefArgDot (Var ^ "c"))))))))))
        );
        run_pass(&mut ast, body, &simple_refs()).unwrap();
        // a lifted local, a lifted step statement, and the original statement
        assert_eq!(ast.len(body), 3);
        let simple: Vec<NodeId> = ast
            .descendants(body)
            .into_iter()
            .filter(|&n| ast.kind(n) == SimpleRef)
            .collect();
        assert_eq!(simple.len(), 2);
    }
}
