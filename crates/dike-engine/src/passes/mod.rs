//! The lowering pipeline.
//!
//! An ordered list of rewrite passes takes the parse-shaped tree down to the
//! unification normal form. Each pass carries the well-formedness schema its
//! output must satisfy; the pipeline runner checks the schema and fails fast
//! on violations or embedded `Error` nodes.

mod data;
mod enums;
mod functions;
mod infix;
mod lift;
mod modules_merge;
mod refs;
mod rulebody;
mod schemas;
mod simple_refs;
mod surface;
mod symbols;

use dike_ast::{Ast, NodeId, NodeKind, Schema};

use crate::builtins::BuiltIns;
use crate::rewrite::PassDef;

/// A pipeline stage: the rewrite pass plus the schema of its output.
pub struct Pass {
    /// The rewrite rules.
    pub def: PassDef,
    /// Schema the output tree must satisfy.
    pub schema: Schema,
}

/// Builds the full lowering pipeline in order.
#[must_use]
pub fn pipeline(builtins: &BuiltIns) -> Vec<Pass> {
    let schemas = schemas::chain();
    let defs = vec![
        surface::input_data(),
        surface::modules(),
        surface::imports(),
        surface::keywords(),
        surface::lists(),
        surface::ifs(),
        surface::elses(),
        surface::rules(),
        refs::build_calls(),
        refs::build_refs(),
        refs::structure(),
        refs::strings(),
        data::merge_data(),
        symbols::symbols(),
        symbols::replace_argvals(),
        symbols::lift_query(),
        symbols::constants(),
        enums::explicit_enums(),
        enums::compr(),
        modules_merge::absolute_refs(),
        modules_merge::merge_modules(),
        modules_merge::skips(builtins.clone()),
        infix::multiply_divide(),
        infix::add_subtract(),
        infix::comparison(),
        infix::assign(),
        simple_refs::simple_refs(),
        enums::implicit_enums(),
        rulebody::init(),
        rulebody::rulebody(),
        lift::lift_to_rule(),
        functions::functions(),
    ];
    defs.into_iter()
        .zip(schemas)
        .map(|(def, schema)| Pass { def, schema })
        .collect()
}

/// Schema for the parser output, checked before the first pass.
#[must_use]
pub fn parser_schema() -> Schema {
    schemas::parser()
}

/// Schema for the tree after the `unify` step.
#[must_use]
pub fn unify_schema() -> Schema {
    schemas::unify()
}

/// Schema for the final tree after the `query` step.
#[must_use]
pub fn query_schema() -> Schema {
    schemas::query()
}

// ---- helpers shared by pass modules ---------------------------------------

/// True when the node's subtree contains none of the kinds that require
/// evaluation.
pub(crate) fn is_constant(ast: &Ast, node: NodeId) -> bool {
    !ast.descendants(node).iter().any(|&n| {
        matches!(
            ast.kind(n),
            NodeKind::Var
                | NodeKind::Ref
                | NodeKind::RefTerm
                | NodeKind::ExprCall
                | NodeKind::ExprEvery
                | NodeKind::ArrayCompr
                | NodeKind::SetCompr
                | NodeKind::ObjectCompr
                | NodeKind::RefObjectItem
                | NodeKind::Placeholder
                | NodeKind::Enumerate
        )
    })
}

/// True when the node has an ancestor of the given kind.
pub(crate) fn is_in(ast: &Ast, node: NodeId, kind: NodeKind) -> bool {
    let mut current = ast.parent(node);
    while let Some(n) = current {
        if ast.kind(n) == kind {
            return true;
        }
        current = ast.parent(n);
    }
    false
}

/// Index of the first direct child of `group` with the given kind.
pub(crate) fn find_child(ast: &Ast, group: NodeId, kind: NodeKind) -> Option<usize> {
    ast.children(group)
        .iter()
        .position(|&c| ast.kind(c) == kind)
}

/// Replaces every `Var` named `from` in the subtree with a `Var` named `to`,
/// leaving field names (`RefArgDot`) alone.
pub(crate) fn rename_vars(ast: &mut Ast, node: NodeId, from: &str, to: &str) {
    if ast.kind(node) == NodeKind::RefArgDot {
        return;
    }
    if ast.kind(node) == NodeKind::Var && ast.text(node) == from {
        ast.set_loc(node, dike_ast::Location::synthetic(to));
        return;
    }
    let children: Vec<NodeId> = ast.children(node).to_vec();
    for child in children {
        rename_vars(ast, child, from, to);
    }
}

/// The statement kinds that may follow an enumeration and get captured into
/// its body.
pub(crate) const STATEMENT_KINDS: &[NodeKind] = &[
    NodeKind::Literal,
    NodeKind::LiteralWith,
    NodeKind::LiteralEnum,
    NodeKind::LiteralInit,
    NodeKind::Local,
];

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::build;

    #[test]
    fn test_pipeline_order() {
        let passes = pipeline(&BuiltIns::standard());
        assert_eq!(passes.len(), 32);
        assert_eq!(passes[0].def.name, "input_data");
        assert_eq!(passes[13].def.name, "symbols");
        assert_eq!(passes.last().unwrap().def.name, "functions");
    }

    #[test]
    fn test_is_constant() {
        let mut ast = Ast::new();
        let constant = build!(ast, (Term (Array (Expr (Term (Scalar (JSONInt ^ "1")))))));
        assert!(is_constant(&ast, constant));
        let dynamic = build!(ast, (Term (Array (Expr (RefTerm (Var ^ "x"))))));
        assert!(!is_constant(&ast, dynamic));
    }

    #[test]
    fn test_rename_vars_skips_field_names() {
        let mut ast = Ast::new();
        let expr = build!(
            ast,
            (Expr
                (RefTerm (SimpleRef (Var ^ "x") (RefArgDot (Var ^ "x")))))
        );
        rename_vars(&mut ast, expr, "x", "out$0");
        let simple = ast.child(ast.child(expr, 0), 0);
        assert_eq!(ast.text(ast.child(simple, 0)), "out$0");
        let dot = ast.child(simple, 1);
        assert_eq!(ast.text(ast.child(dot, 0)), "x");
    }
}
