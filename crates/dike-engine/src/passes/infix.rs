//! Operator precedence passes: `* / %` and `&` bind tightest, then `+ -` and
//! `|`, then comparisons and negation, then `=`/`:=`.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

const MATH_OPERAND: &[NodeKind] = &[RefTerm, NumTerm, UnaryExpr, ArithInfix, ExprCall, Expr, Term];
const BIN_OPERAND: &[NodeKind] = &[RefTerm, Set, SetCompr, ExprCall, BinInfix, Expr, Term];
const BOOL_OPERAND: &[NodeKind] = &[
    Term, RefTerm, NumTerm, UnaryExpr, ArithInfix, BinInfix, ExprCall, Expr,
];
const ASSIGN_OPERAND: &[NodeKind] = &[
    Term, RefTerm, NumTerm, UnaryExpr, ArithInfix, BinInfix, BoolInfix, ExprCall, Enumerate,
    Expr, ExprEvery,
];
const ANY_OP: &[NodeKind] = &[
    Add, Subtract, Multiply, Divide, Modulo, And, Or, Equals, NotEquals, LessThan,
    LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf, Assign, Unify,
];

/// Converts a leading minus in every expression into a unary negation. Runs
/// before the binary rules so `x = -1` parses.
fn promote_leading_minus(ast: &mut Ast, root: NodeId) {
    let exprs: Vec<NodeId> = ast
        .descendants(root)
        .into_iter()
        .filter(|&n| ast.kind(n) == Expr)
        .collect();
    for expr in exprs {
        if ast.len(expr) < 2 {
            continue;
        }
        let first = ast.child(expr, 0);
        let second = ast.child(expr, 1);
        if ast.kind(first) == Subtract && MATH_OPERAND.contains(&ast.kind(second)) {
            ast.detach(first);
            ast.detach(second);
            let unary = build!(ast, (UnaryExpr (ArithArg @second)));
            ast.insert_child(expr, 0, unary);
        }
    }
}

/// Multiplicative operators and set intersection.
pub fn multiply_divide() -> PassDef {
    PassDef::new(
        "multiply_divide",
        vec![
            // a minus directly after another operator is a negation
            Rule::new(
                &[Expr],
                vec![
                    t(ANY_OP).bind("prev"),
                    t(&[Subtract]),
                    t(MATH_OPERAND).bind("operand"),
                ],
                |ast, env| {
                    let prev = env.node("prev");
                    let operand = env.node("operand");
                    ast.detach(prev);
                    ast.detach(operand);
                    build!(ast, (Seq @prev (UnaryExpr (ArithArg @operand))))
                },
            ),
            Rule::new(
                &[Expr],
                vec![
                    t(MATH_OPERAND).bind("lhs"),
                    t(&[Multiply, Divide, Modulo]).bind("op"),
                    t(MATH_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let op = env.node("op");
                    let rhs = env.node("rhs");
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    build!(ast, (ArithInfix (ArithArg @lhs) @op (ArithArg @rhs)))
                },
            ),
            Rule::new(
                &[Expr],
                vec![
                    t(BIN_OPERAND).bind("lhs"),
                    t(&[And]).bind("op"),
                    t(BIN_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let op = env.node("op");
                    let rhs = env.node("rhs");
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    build!(ast, (BinInfix (BinArg @lhs) @op (BinArg @rhs)))
                },
            ),
        ],
    )
    .with_pre(promote_leading_minus)
}

/// Additive operators, set union, and set difference.
pub fn add_subtract() -> PassDef {
    PassDef::new(
        "add_subtract",
        vec![
            Rule::new(
                &[Expr],
                vec![
                    t(MATH_OPERAND).bind("lhs"),
                    t(&[Add, Subtract]).bind("op"),
                    t(MATH_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let op = env.node("op");
                    let rhs = env.node("rhs");
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    build!(ast, (ArithInfix (ArithArg @lhs) @op (ArithArg @rhs)))
                },
            ),
            Rule::new(
                &[Expr],
                vec![
                    t(BIN_OPERAND).bind("lhs"),
                    t(&[Or]).bind("op"),
                    t(BIN_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let op = env.node("op");
                    let rhs = env.node("rhs");
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    build!(ast, (BinInfix (BinArg @lhs) @op (BinArg @rhs)))
                },
            ),
            // collapse single-operand wrappers left over from the previous
            // precedence level
            Rule::new(
                &[ArithArg, BinArg],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1)
                    .bind("expr")],
                |ast, env| {
                    let inner = ast.child(env.node("expr"), 0);
                    ast.detach(inner);
                    inner
                },
            ),
        ],
    )
}

/// Comparison operators, membership, and negation.
pub fn comparison() -> PassDef {
    PassDef::new(
        "comparison",
        vec![
            Rule::new(
                &[Expr],
                vec![
                    t(BOOL_OPERAND).bind("lhs"),
                    t(&[
                        Equals,
                        NotEquals,
                        LessThan,
                        LessThanOrEquals,
                        GreaterThan,
                        GreaterThanOrEquals,
                        MemberOf,
                    ])
                    .bind("op"),
                    t(BOOL_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let op = env.node("op");
                    let rhs = env.node("rhs");
                    for &node in &[lhs, op, rhs] {
                        ast.detach(node);
                    }
                    build!(ast, (BoolInfix (BoolArg @lhs) @op (BoolArg @rhs)))
                },
            ),
            // `not expr` becomes a negated literal
            Rule::new(
                &[Literal],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == Not))
                    .bind("expr")],
                |ast, env| {
                    let expr = env.node("expr");
                    let not_token = ast.child(expr, 0);
                    ast.detach(not_token);
                    ast.detach(expr);
                    build!(ast, (NotExpr @expr))
                },
            ),
        ],
    )
}

/// Unification and assignment.
pub fn assign() -> PassDef {
    PassDef::new(
        "assign",
        vec![
            Rule::new(
                &[Expr],
                vec![
                    t(ASSIGN_OPERAND).bind("lhs"),
                    t(&[Assign, Unify]),
                    t(ASSIGN_OPERAND).bind("rhs"),
                ],
                |ast, env| {
                    let lhs = env.node("lhs");
                    let rhs = env.node("rhs");
                    ast.detach(lhs);
                    ast.detach(rhs);
                    build!(ast, (AssignInfix (AssignArg @lhs) (AssignArg @rhs)))
                },
            ),
            // unwrap nested single-child expressions
            Rule::new(
                &[Expr, AssignArg, BoolArg, ArithArg, BinArg],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1)
                    .bind("expr")],
                |ast, env| {
                    let inner = ast.child(env.node("expr"), 0);
                    ast.detach(inner);
                    inner
                },
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    fn run_all(ast: &mut Ast, root: NodeId) {
        for pass in [multiply_divide(), add_subtract(), comparison(), assign()] {
            run_pass(ast, root, &pass).unwrap();
        }
    }

    #[test]
    fn test_precedence() {
        let mut ast = Ast::new();
        // 2 + 3 * 4 > x
        let literal = build!(
            ast,
            (Literal (Expr
                (NumTerm (JSONInt ^ "2"))
                (Add)
                (NumTerm (JSONInt ^ "3"))
                (Multiply)
                (NumTerm (JSONInt ^ "4"))
                (GreaterThan)
                (RefTerm (Var ^ "x"))))
        );
        run_all(&mut ast, literal);
        let expr = ast.child(literal, 0);
        assert_eq!(ast.len(expr), 1);
        let bool_infix = ast.child(expr, 0);
        assert_eq!(ast.kind(bool_infix), BoolInfix);
        let lhs = ast.child(ast.child(bool_infix, 0), 0);
        assert_eq!(ast.kind(lhs), ArithInfix);
        // lhs of the addition is 2, rhs is the multiplication
        assert_eq!(ast.kind(ast.child(lhs, 1)), Add);
        let rhs_arg = ast.child(ast.child(lhs, 2), 0);
        assert_eq!(ast.kind(rhs_arg), ArithInfix);
        assert_eq!(ast.kind(ast.child(rhs_arg, 1)), Multiply);
    }

    #[test]
    fn test_assignment() {
        let mut ast = Ast::new();
        let literal = build!(
            ast,
            (Literal (Expr
                (RefTerm (Var ^ "x"))
                (Assign)
                (NumTerm (JSONInt ^ "5"))))
        );
        run_all(&mut ast, literal);
        let expr = ast.child(literal, 0);
        let assign_infix = ast.child(expr, 0);
        assert_eq!(ast.kind(assign_infix), AssignInfix);
        assert_eq!(ast.len(assign_infix), 2);
    }

    #[test]
    fn test_not_literal() {
        let mut ast = Ast::new();
        let literal = build!(
            ast,
            (Literal (Expr (Not) (RefTerm (Var ^ "denied"))))
        );
        run_all(&mut ast, literal);
        let inner = ast.child(literal, 0);
        assert_eq!(ast.kind(inner), NotExpr);
        assert_eq!(ast.kind(ast.child(inner, 0)), Expr);
    }

    #[test]
    fn test_unary_minus() {
        let mut ast = Ast::new();
        let literal = build!(
            ast,
            (Literal (Expr
                (RefTerm (Var ^ "x"))
                (Unify)
                (Subtract)
                (NumTerm (JSONInt ^ "1"))))
        );
        run_all(&mut ast, literal);
        let expr = ast.child(literal, 0);
        let assign_infix = ast.child(expr, 0);
        assert_eq!(ast.kind(assign_infix), AssignInfix);
        let rhs = ast.child(ast.child(assign_infix, 1), 0);
        assert_eq!(ast.kind(rhs), UnaryExpr);
    }

    #[test]
    fn test_membership() {
        let mut ast = Ast::new();
        let literal = build!(
            ast,
            (Literal (Expr
                (RefTerm (Var ^ "x"))
                (MemberOf ^ "in")
                (RefTerm (Var ^ "xs"))))
        );
        run_all(&mut ast, literal);
        let expr = ast.child(literal, 0);
        let bool_infix = ast.child(expr, 0);
        assert_eq!(ast.kind(bool_infix), BoolInfix);
        assert_eq!(ast.kind(ast.child(bool_infix, 1)), MemberOf);
    }
}
