//! Synthesizes module-level rules from enumeration bodies and
//! comprehensions, leaving call sites behind.

use std::collections::{BTreeMap, BTreeSet};

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

/// A variable used inside `body` but declared outside it.
fn is_captured(ast: &Ast, body: NodeId, var: NodeId) -> bool {
    let defs = ast.lookup(var);
    let [def] = defs.as_slice() else {
        return false;
    };
    matches!(ast.kind(*def), Local | ArgVar) && ast.parent(*def) != Some(body)
}

fn add_captures(ast: &Ast, body: NodeId, node: NodeId, captured: &mut BTreeSet<String>) {
    if matches!(ast.kind(node), RefArgDot | NestedBody) {
        return;
    }
    if ast.kind(node) == Var {
        if is_captured(ast, body, node) {
            captured.insert(ast.text(node).to_string());
        }
        return;
    }
    for &child in ast.children(node) {
        add_captures(ast, body, child, captured);
    }
}

/// Captured variables read by the body (arguments of the lifted rule).
fn find_invars(ast: &Ast, body: NodeId) -> BTreeSet<String> {
    let mut invars = BTreeSet::new();
    for &stmt in ast.children(body) {
        if ast.kind(stmt) == UnifyExpr {
            add_captures(ast, body, ast.child(stmt, 1), &mut invars);
        }
    }
    invars
}

/// Captured variables written by the body (returned by the lifted rule).
fn find_outvars(ast: &Ast, body: NodeId) -> BTreeSet<String> {
    let mut outvars = BTreeSet::new();
    for &stmt in ast.children(body) {
        if ast.kind(stmt) == UnifyExpr {
            let target = ast.child(stmt, 0);
            if is_captured(ast, body, target) {
                outvars.insert(ast.text(target).to_string());
            }
        }
    }
    outvars
}

fn rule_call_args(ast: &mut Ast, invars: &BTreeSet<String>) -> (NodeId, NodeId) {
    let ruleargs = ast.node(RuleArgs);
    let argseq = ast.node(ArgSeq);
    for invar in invars {
        let formal = build!(ast, (ArgVar (Var ^ invar) (Undefined)));
        ast.push_back(ruleargs, formal);
        let actual = build!(ast, (Expr (RefTerm (Var ^ invar))));
        ast.push_back(argseq, actual);
    }
    (ruleargs, argseq)
}

/// Replaces enumeration bodies and comprehensions with synthetic rules lifted
/// to the enclosing module.
pub fn lift_to_rule() -> PassDef {
    PassDef::new(
        "lift_to_rule",
        vec![
            Rule::new(
                &[UnifyBody],
                vec![t(&[UnifyExprEnum]).bind("stmt")],
                |ast, env| lift_enum(ast, env.node("stmt")),
            ),
            Rule::new(
                &[UnifyBody],
                vec![t(&[UnifyExprCompr]).bind("stmt")],
                |ast, env| lift_compr(ast, env.node("stmt")),
            ),
            // errors
            Rule::new(
                &[ExprCall],
                vec![t(&[ArgSeq]).guard(|ast, n| ast.is_empty(n)).bind("args")],
                |ast, env| {
                    ast.error(env.node("args"), "Syntax error: empty argument sequence")
                },
            ),
            Rule::new(
                &[RuleFunc],
                vec![t(&[RuleArgs]).guard(|ast, n| ast.is_empty(n)).bind("args")],
                |ast, env| ast.error(env.node("args"), "Syntax error: no rule arguments"),
            ),
        ],
    )
    .bottom_up()
}

fn lift_enum(ast: &mut Ast, stmt: NodeId) -> NodeId {
    let target = ast.child(stmt, 0);
    let item = ast.child(stmt, 1);
    let itemseq = ast.child(stmt, 2);
    let body = ast.child(stmt, 3);

    let invars = find_invars(ast, body);
    let outvars = find_outvars(ast, body);

    // each returned variable gets a private name inside the lifted rule
    let mut out_map: BTreeMap<String, String> = BTreeMap::new();
    for outvar in &outvars {
        let fresh = ast.fresh("out");
        out_map.insert(outvar.clone(), fresh.view().to_string());
    }
    for (from, to) in &out_map {
        super::rename_vars(ast, body, from, to);
    }
    let mut invars = invars;
    for (outvar, renamed) in &out_map {
        // returned values come back through the result object, never as
        // arguments
        invars.remove(outvar);
        let local = build!(ast, (Local (Var ^ renamed) (Undefined)));
        ast.push_front(body, local);
    }

    let (ruleargs, argseq) = rule_call_args(ast, &invars);
    let rulename = ast.fresh("enum");
    let rulename_text = rulename.view().to_string();

    let rulevalue = if out_map.is_empty() {
        build!(ast, (DataTerm (Scalar (JSONTrue ^ "true"))))
    } else {
        let object = ast.node(Object);
        for (outvar, renamed) in &out_map {
            let object_item = build!(
                ast,
                (ObjectItem (Key ^ outvar) (Expr (RefTerm (Var ^ renamed))))
            );
            ast.push_back(object, object_item);
        }
        let value = ast.fresh("value");
        let value_name = value.view().to_string();
        build!(
            ast,
            (UnifyBody
                (Local (Var ^ &value_name) (Undefined))
                (UnifyExpr (Var ^ &value_name) (Expr (Term @object))))
        )
    };

    ast.detach(body);
    let result = ast.node(Seq);
    let lifted = build!(
        ast,
        (Lift (Module)
            (RuleFunc (Var ^ &rulename_text) @ruleargs @body @rulevalue (JSONInt ^ "0")))
    );
    ast.push_back(result, lifted);
    let item = ast.deep_clone(item);
    let itemseq = ast.deep_clone(itemseq);
    let enumerate = build!(
        ast,
        (UnifyExpr @item (Expr (Enumerate (Expr (RefTerm @itemseq)))))
    );
    ast.push_back(result, enumerate);
    let target = ast.deep_clone(target);
    let call = build!(
        ast,
        (UnifyExpr @target (Expr (ExprCall (Var ^ &rulename_text) @argseq)))
    );
    ast.push_back(result, call);
    for outvar in out_map.keys() {
        let enum_target = ast.deep_clone(ast.child(stmt, 0));
        let projection = build!(
            ast,
            (UnifyExpr (Var ^ outvar)
                (Expr
                    (RefTerm
                        (SimpleRef @enum_target (RefArgDot (Var ^ outvar))))))
        );
        ast.push_back(result, projection);
    }
    result
}

fn lift_compr(ast: &mut Ast, stmt: NodeId) -> NodeId {
    let target = ast.child(stmt, 0);
    let compr = ast.child(stmt, 1);
    let nested = ast.child(stmt, 2);
    let compr_kind = ast.kind(compr);
    let compr_var = ast.child(compr, 0);
    let rulename = ast.text(ast.child(nested, 0)).to_string();
    let body = ast.child(nested, 1);

    let invars = find_invars(ast, body);
    let value = ast.fresh("value");
    let value_name = value.view().to_string();
    let compr_var = ast.deep_clone(compr_var);
    let compr_value = ast.node(compr_kind);
    ast.push_back(compr_value, compr_var);
    let rulevalue = build!(
        ast,
        (UnifyBody
            (Local (Var ^ &value_name) (Undefined))
            (UnifyExpr (Var ^ &value_name) (Expr @compr_value)))
    );
    ast.detach(body);
    let target = ast.deep_clone(target);

    if invars.is_empty() {
        // no captures: a plain comprehension rule
        build!(
            ast,
            (Seq
                (Lift (Module)
                    (RuleComp (Var ^ &rulename) @body @rulevalue (JSONInt ^ "0")))
                (UnifyExpr @target (Expr (RefTerm (Var ^ &rulename)))))
        )
    } else {
        let (ruleargs, argseq) = rule_call_args(ast, &invars);
        let partial = ast.fresh("partial");
        let partial_name = partial.view().to_string();
        build!(
            ast,
            (Seq
                (Lift (Module)
                    (RuleFunc (Var ^ &rulename) @ruleargs @body @rulevalue (JSONInt ^ "0")))
                (Local (Var ^ &partial_name) (Undefined))
                (UnifyExpr (Var ^ &partial_name)
                    (Expr (ExprCall (Var ^ &rulename) @argseq)))
                (UnifyExpr @target (Expr (Merge (Var ^ &partial_name)))))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    fn enum_module(ast: &mut Ast) -> NodeId {
        build!(
            ast,
            (Module
                (RuleComp (Var ^ "r")
                    (UnifyBody
                        (Local (Var ^ "item$1") (Undefined))
                        (Local (Var ^ "itemseq$2") (Undefined))
                        (Local (Var ^ "n") (Undefined))
                        (Local (Var ^ "unify$3") (Undefined))
                        (UnifyExpr (Var ^ "itemseq$2") (Expr (RefTerm (Var ^ "data.p.xs"))))
                        (UnifyExprEnum (Var ^ "unify$3") (Var ^ "item$1") (Var ^ "itemseq$2")
                            (UnifyBody
                                (UnifyExpr (Var ^ "n")
                                    (Expr
                                        (RefTerm
                                            (SimpleRef (Var ^ "item$1")
                                                (RefArgBrack (Scalar (JSONInt ^ "1"))))))))))
                    (DataTerm (Scalar (JSONTrue ^ "true")))
                    (JSONInt ^ "0")))
        )
    }

    #[test]
    fn test_enum_lifted_to_rule() {
        let mut ast = Ast::new();
        let module = enum_module(&mut ast);
        run_pass(&mut ast, module, &lift_to_rule()).unwrap();
        // the synthetic rule landed in the module
        let funcs: Vec<NodeId> = ast
            .children(module)
            .iter()
            .copied()
            .filter(|&c| ast.kind(c) == RuleFunc)
            .collect();
        assert_eq!(funcs.len(), 1);
        // the body now enumerates and calls
        let rule = ast
            .children(module)
            .iter()
            .copied()
            .find(|&c| ast.kind(c) == RuleComp)
            .unwrap();
        let body = ast.child(rule, 1);
        let has_enumerate = ast
            .descendants(body)
            .iter()
            .any(|&n| ast.kind(n) == Enumerate);
        let has_call = ast
            .descendants(body)
            .iter()
            .any(|&n| ast.kind(n) == ExprCall);
        assert!(has_enumerate && has_call);
        // no enumeration statements remain
        assert!(!ast
            .descendants(module)
            .iter()
            .any(|&n| ast.kind(n) == UnifyExprEnum));
        // n is an out variable: the rule returns it through an object and the
        // call site projects it back
        let has_projection = ast
            .descendants(body)
            .iter()
            .any(|&n| ast.kind(n) == RefArgDot);
        assert!(has_projection);
    }

    #[test]
    fn test_compr_without_captures_becomes_rulecomp() {
        let mut ast = Ast::new();
        let module = build!(
            ast,
            (Module
                (RuleComp (Var ^ "r")
                    (UnifyBody
                        (Local (Var ^ "evens") (Undefined))
                        (UnifyExprCompr (Var ^ "evens") (SetCompr (Var ^ "compr$1"))
                            (NestedBody (Key ^ "comprbody$2")
                                (UnifyBody
                                    (Local (Var ^ "compr$1") (Undefined))
                                    (UnifyExpr (Var ^ "compr$1")
                                        (Expr (Scalar (JSONInt ^ "2"))))))))
                    (DataTerm (Scalar (JSONTrue ^ "true")))
                    (JSONInt ^ "0")))
        );
        run_pass(&mut ast, module, &lift_to_rule()).unwrap();
        let comps: Vec<NodeId> = ast
            .children(module)
            .iter()
            .copied()
            .filter(|&c| ast.kind(c) == RuleComp)
            .collect();
        assert_eq!(comps.len(), 2);
        assert!(!ast
            .descendants(module)
            .iter()
            .any(|&n| ast.kind(n) == UnifyExprCompr));
    }
}
