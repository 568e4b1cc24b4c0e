//! The final lowering: every unification right-hand side becomes a variable,
//! a scalar, or a named function over variable and scalar arguments.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use super::is_in;
use crate::rewrite::{t, PassDef, Rule};

const EXPR_HOSTS: &[NodeKind] = &[UnifyExpr, ArgSeq];

fn lift_temp(ast: &mut Ast, rhs: NodeId, prefix: &str) -> NodeId {
    let temp = ast.fresh(prefix);
    let temp_name = temp.view().to_string();
    build!(
        ast,
        (Seq
            (Lift (UnifyBody) (Local (Var ^ &temp_name) (Undefined)))
            (Lift (UnifyBody) (UnifyExpr (Var ^ &temp_name) @rhs))
            (Var ^ &temp_name))
    )
}

fn function(ast: &mut Ast, name: &str, args: Vec<NodeId>) -> NodeId {
    let argseq = ast.node(ArgSeq);
    for arg in args {
        ast.push_back(argseq, arg);
    }
    build!(ast, (Function (JSONString ^ name) @argseq))
}

/// Converts every statement value to `Var | Scalar | Function(name, args)`.
#[allow(clippy::too_many_lines)]
pub fn functions() -> PassDef {
    PassDef::new(
        "functions",
        vec![
            // expression unwrapping
            Rule::new(
                &[UnifyExpr, ArgSeq],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1)
                    .bind("expr")],
                |ast, env| {
                    let inner = ast.child(env.node("expr"), 0);
                    ast.detach(inner);
                    inner
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Scalar)
                    .bind("term")],
                |ast, env| {
                    let scalar = ast.child(env.node("term"), 0);
                    ast.detach(scalar);
                    scalar
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Undefined)
                    .bind("term")],
                |ast, env| {
                    let undefined = ast.child(env.node("term"), 0);
                    ast.detach(undefined);
                    let scalar = ast.node(Scalar);
                    let token = ast.token(JSONNull, "null");
                    ast.push_back(scalar, token);
                    scalar
                },
            ),
            Rule::new(&[UnifyExpr, ArgSeq], vec![t(&[NumTerm]).bind("num")], |ast, env| {
                let token = ast.child(env.node("num"), 0);
                ast.detach(token);
                build!(ast, (Scalar @token))
            }),
            // container construction lifts through temporaries
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Object)
                    .bind("term")],
                |ast, env| {
                    let object = ast.child(env.node("term"), 0);
                    let items: Vec<NodeId> = ast.children(object).to_vec();
                    for &item in &items {
                        ast.detach(item);
                    }
                    let call = function(ast, "object", items);
                    lift_temp(ast, call, "obj")
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Array)
                    .bind("term")],
                |ast, env| {
                    let array = ast.child(env.node("term"), 0);
                    let members: Vec<NodeId> = ast.children(array).to_vec();
                    for &member in &members {
                        ast.detach(member);
                    }
                    let call = function(ast, "array", members);
                    lift_temp(ast, call, "array")
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Set)
                    .bind("term")],
                |ast, env| {
                    let set = ast.child(env.node("term"), 0);
                    let members: Vec<NodeId> = ast.children(set).to_vec();
                    for &member in &members {
                        ast.detach(member);
                    }
                    let call = function(ast, "set", members);
                    lift_temp(ast, call, "set")
                },
            ),
            // object items flatten into key/value argument pairs
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[ObjectItem]).bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let key = ast.child(item, 0);
                    let value = ast.child(item, 1);
                    ast.detach(key);
                    ast.detach(value);
                    build!(ast, (Seq @key @value))
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[RefObjectItem]).bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let key = ast.child(item, 0);
                    let value = ast.child(item, 1);
                    ast.detach(key);
                    ast.detach(value);
                    build!(ast, (Seq @key @value))
                },
            ),
            Rule::new(&[ArgSeq], vec![t(&[Key]).bind("key")], |ast, env| {
                let text = ast.text(env.node("key")).to_string();
                let quoted = format!("\"{text}\"");
                build!(ast, (Scalar (JSONString ^ &quoted)))
            }),
            // iteration and aggregation markers
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Enumerate])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Expr)
                    .bind("marker")],
                |ast, env| {
                    let expr = ast.child(env.node("marker"), 0);
                    ast.detach(expr);
                    function(ast, "enumerate", vec![expr])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Merge])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Var)
                    .bind("marker")],
                |ast, env| {
                    let var = ast.child(env.node("marker"), 0);
                    ast.detach(var);
                    function(ast, "merge", vec![var])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[ToValues]).bind("marker")],
                |ast, env| {
                    let expr = ast.child(env.node("marker"), 0);
                    ast.detach(expr);
                    function(ast, "to-values", vec![expr])
                },
            ),
            // comprehension collectors
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[ArrayCompr, SetCompr, ObjectCompr])
                    .guard(|ast, n| ast.len(n) == 1)
                    .bind("compr")],
                |ast, env| {
                    let compr = env.node("compr");
                    let name = match ast.kind(compr) {
                        ArrayCompr => "array-compr",
                        SetCompr => "set-compr",
                        _ => "object-compr",
                    };
                    let var = ast.child(compr, 0);
                    ast.detach(var);
                    function(ast, name, vec![var])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[Term])
                    .guard(|ast, n| {
                        matches!(ast.kind(ast.child(n, 0)), ArrayCompr | SetCompr | ObjectCompr)
                    })
                    .bind("term")],
                |ast, env| {
                    let compr = ast.child(env.node("term"), 0);
                    ast.detach(compr);
                    compr
                },
            ),
            // negation
            Rule::new(
                &[UnifyExpr],
                vec![t(&[NotExpr]).bind("not")],
                |ast, env| {
                    let expr = ast.child(env.node("not"), 0);
                    ast.detach(expr);
                    let temp = lift_temp(ast, expr, "expr");
                    // the lifted Seq tail is the fresh variable
                    let var = ast.back(temp).expect("seq shape");
                    ast.detach(var);
                    let call = function(ast, "not", vec![var]);
                    ast.push_back(temp, call);
                    temp
                },
            ),
            // every
            Rule::new(
                &[UnifyExpr],
                vec![t(&[ExprEvery]).bind("every")],
                |ast, env| {
                    let every = env.node("every");
                    let varseq = ast.child(every, 0);
                    let nested = ast.child(every, 1);
                    ast.detach(varseq);
                    ast.detach(nested);
                    function(ast, "every", vec![varseq, nested])
                },
            ),
            // infix operators
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[UnaryExpr]).bind("unary")],
                |ast, env| {
                    let arg = ast.child(ast.child(env.node("unary"), 0), 0);
                    ast.detach(arg);
                    function(ast, "unary", vec![arg])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[ArithInfix]).bind("infix")],
                |ast, env| {
                    let infix = env.node("infix");
                    let lhs = ast.child(ast.child(infix, 0), 0);
                    let op = ast.child(infix, 1);
                    let rhs = ast.child(ast.child(infix, 2), 0);
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    function(ast, "arithinfix", vec![op, lhs, rhs])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[BinInfix]).bind("infix")],
                |ast, env| {
                    let infix = env.node("infix");
                    let lhs = ast.child(ast.child(infix, 0), 0);
                    let op = ast.child(infix, 1);
                    let rhs = ast.child(ast.child(infix, 2), 0);
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    function(ast, "bininfix", vec![op, lhs, rhs])
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[BoolInfix]).bind("infix")],
                |ast, env| {
                    let infix = env.node("infix");
                    let lhs = ast.child(ast.child(infix, 0), 0);
                    let op = ast.child(infix, 1);
                    let rhs = ast.child(ast.child(infix, 2), 0);
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    function(ast, "boolinfix", vec![op, lhs, rhs])
                },
            ),
            // references
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[RefTerm])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Var)
                    .bind("ref")],
                |ast, env| {
                    let var = ast.child(env.node("ref"), 0);
                    ast.detach(var);
                    var
                },
            ),
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[RefTerm])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == SimpleRef)
                    .bind("ref")],
                |ast, env| {
                    let simple = ast.child(env.node("ref"), 0);
                    let var = ast.child(simple, 0);
                    let op = ast.child(simple, 1);
                    ast.detach(var);
                    match ast.kind(op) {
                        RefArgDot => {
                            let field = ast.text(ast.child(op, 0)).to_string();
                            let quoted = format!("\"{field}\"");
                            let key = build!(ast, (Scalar (JSONString ^ &quoted)));
                            function(ast, "apply_access", vec![var, key])
                        }
                        _ => {
                            let index = ast.child(op, 0);
                            ast.detach(index);
                            let index = match ast.kind(index) {
                                RefTerm => index,
                                Scalar => index,
                                _ => build!(ast, (Term @index)),
                            };
                            function(ast, "apply_access", vec![var, index])
                        }
                    }
                },
            ),
            // calls
            Rule::new(
                EXPR_HOSTS,
                vec![t(&[ExprCall]).bind("call")],
                |ast, env| {
                    let call = env.node("call");
                    let name = ast.child(call, 0);
                    let argseq = ast.child(call, 1);
                    let args: Vec<NodeId> = ast.children(argseq).to_vec();
                    ast.detach(name);
                    for &arg in &args {
                        ast.detach(arg);
                    }
                    let mut all = vec![name];
                    all.extend(args);
                    function(ast, "call", all)
                },
            ),
            // nested functions in argument position evaluate through a local
            Rule::new(
                &[ArgSeq],
                vec![t(&[Function])
                    .guard(|ast, n| is_in(ast, n, UnifyBody))
                    .bind("function")],
                |ast, env| {
                    let func = env.node("function");
                    ast.detach(func);
                    lift_temp(ast, func, "func")
                },
            ),
            // container members settle to terms
            Rule::new(
                &[Array, Set, ObjectItem],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Term)
                    .bind("expr")],
                |ast, env| {
                    let term = ast.child(env.node("expr"), 0);
                    ast.detach(term);
                    term
                },
            ),
            Rule::new(
                &[Array, Set, ObjectItem],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == NumTerm)
                    .bind("expr")],
                |ast, env| {
                    let token = ast.child(ast.child(env.node("expr"), 0), 0);
                    ast.detach(token);
                    build!(ast, (Term (Scalar @token)))
                },
            ),
            // data-to-term conversions
            Rule::new(
                &[RuleComp, RuleFunc, RuleObj, RuleSet, DataItem, DefaultRule, ArgVar, Input],
                vec![t(&[DataTerm]).bind("data")],
                |ast, env| {
                    let data = env.node("data");
                    let content = ast.child(data, 0);
                    ast.detach(content);
                    build!(ast, (Term @content))
                },
            ),
            Rule::new(&[Term], vec![t(&[DataArray]).bind("data")], |ast, env| {
                let data = env.node("data");
                let children: Vec<NodeId> = ast.children(data).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (Array @@children))
            }),
            Rule::new(&[Term], vec![t(&[DataSet]).bind("data")], |ast, env| {
                let data = env.node("data");
                let children: Vec<NodeId> = ast.children(data).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (Set @@children))
            }),
            Rule::new(&[Term], vec![t(&[DataObject]).bind("data")], |ast, env| {
                let data = env.node("data");
                let children: Vec<NodeId> = ast.children(data).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (Object @@children))
            }),
            Rule::new(
                &[Object, ObjectItemSeq],
                vec![t(&[DataItem]).bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let key = ast.child(item, 0);
                    let value = ast.child(item, 1);
                    ast.detach(key);
                    ast.detach(value);
                    build!(ast, (ObjectItem @key @value))
                },
            ),
            Rule::new(
                &[ObjectItem, Array, Set],
                vec![t(&[DataTerm]).bind("data")],
                |ast, env| {
                    let content = ast.child(env.node("data"), 0);
                    ast.detach(content);
                    build!(ast, (Term @content))
                },
            ),
            // errors
            Rule::new(EXPR_HOSTS, vec![t(&[RefTerm]).bind("bad")], |ast, env| {
                ast.error(env.node("bad"), "Invalid reference")
            }),
            Rule::new(&[ArgSeq], vec![t(&[Ref]).bind("bad")], |ast, env| {
                ast.error(env.node("bad"), "Invalid reference")
            }),
            Rule::new(&[ArgSeq], vec![t(&[ExprEvery]).bind("bad")], |ast, env| {
                ast.error(env.node("bad"), "Invalid every statement")
            }),
            Rule::new(&[UnifyExpr], vec![t(&[Expr]).bind("bad")], |ast, env| {
                ast.error(env.node("bad"), "Invalid expression")
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    #[test]
    fn test_boolinfix_becomes_function() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "unify$0") (Undefined))
                (UnifyExpr (Var ^ "unify$0")
                    (Expr
                        (BoolInfix
                            (BoolArg (RefTerm (Var ^ "x")))
                            (GreaterThan)
                            (BoolArg (NumTerm (JSONInt ^ "4")))))))
        );
        run_pass(&mut ast, body, &functions()).unwrap();
        let stmt = ast.child(body, 1);
        let val = ast.child(stmt, 1);
        assert_eq!(ast.kind(val), Function);
        assert_eq!(ast.text(ast.child(val, 0)), "boolinfix");
        let argseq = ast.child(val, 1);
        assert_eq!(ast.len(argseq), 3);
        assert_eq!(ast.kind(ast.child(argseq, 0)), GreaterThan);
        assert_eq!(ast.kind(ast.child(argseq, 1)), Var);
        assert_eq!(ast.kind(ast.child(argseq, 2)), Scalar);
    }

    #[test]
    fn test_array_literal_lifts_temporary() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "x") (Undefined))
                (UnifyExpr (Var ^ "x")
                    (Expr
                        (Term (Array
                            (Expr (Term (Scalar (JSONInt ^ "1"))))
                            (Expr (Term (Scalar (JSONInt ^ "2")))))))))
        );
        run_pass(&mut ast, body, &functions()).unwrap();
        // a fresh local and statement appeared for the array constructor
        assert_eq!(ast.len(body), 4);
        let array_stmt = ast
            .children(body)
            .iter()
            .copied()
            .find(|&c| {
                ast.kind(c) == UnifyExpr
                    && ast.kind(ast.child(c, 1)) == Function
                    && ast.text(ast.child(ast.child(c, 1), 0)) == "array"
            })
            .unwrap();
        let argseq = ast.child(ast.child(array_stmt, 1), 1);
        assert_eq!(ast.len(argseq), 2);
    }

    #[test]
    fn test_call_shape() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "n") (Undefined))
                (UnifyExpr (Var ^ "n")
                    (Expr (ExprCall (Var ^ "count") (ArgSeq (Expr (RefTerm (Var ^ "xs"))))))))
        );
        run_pass(&mut ast, body, &functions()).unwrap();
        let stmt = ast.child(body, 1);
        let val = ast.child(stmt, 1);
        assert_eq!(ast.text(ast.child(val, 0)), "call");
        let argseq = ast.child(val, 1);
        assert_eq!(ast.len(argseq), 2);
        assert_eq!(ast.text(ast.child(argseq, 0)), "count");
        assert_eq!(ast.text(ast.child(argseq, 1)), "xs");
    }

    #[test]
    fn test_simple_ref_becomes_apply_access() {
        let mut ast = Ast::new();
        let body = build!(
            ast,
            (UnifyBody
                (Local (Var ^ "v") (Undefined))
                (UnifyExpr (Var ^ "v")
                    (Expr
                        (RefTerm
                            (SimpleRef (Var ^ "input") (RefArgDot (Var ^ "user")))))))
        );
        run_pass(&mut ast, body, &functions()).unwrap();
        let stmt = ast.child(body, 1);
        let val = ast.child(stmt, 1);
        assert_eq!(ast.text(ast.child(val, 0)), "apply_access");
        let argseq = ast.child(val, 1);
        assert_eq!(ast.text(ast.child(argseq, 0)), "input");
        assert_eq!(ast.kind(ast.child(argseq, 1)), Scalar);
    }
}
