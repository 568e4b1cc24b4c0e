//! Well-formedness schemas, one per pass.
//!
//! Each schema derives from its predecessor; only the deltas are stated.
//! Group content is necessarily wide during the surface passes and narrows as
//! structure appears; the structured kinds are exact throughout.

use dike_ast::{one, rep, rep1, NodeKind, Schema};
use NodeKind::*;

const JSON_SCALARS: &[NodeKind] = &[JSONString, JSONInt, JSONFloat, JSONTrue, JSONFalse, JSONNull];

const SCALAR_CONTENT: &[NodeKind] = &[
    JSONString, RawString, JSONInt, JSONFloat, JSONTrue, JSONFalse, JSONNull,
];

/// Everything a token `Group` may hold before structuring.
const GROUP_TOKENS: &[NodeKind] = &[
    Var, JSONString, RawString, JSONInt, JSONFloat, JSONTrue, JSONFalse, JSONNull, Placeholder,
    Add, Subtract, Multiply, Divide, Modulo, And, Or, Equals, NotEquals, LessThan,
    LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf, Not, Assign, Unify, Dot, Colon,
    EmptySet, Package, Import, Default, SomeKw, Else, As, With, IfTruthy, InSome, Contains, Every,
    Brace, Square, Paren, List, Undefined,
    // structured kinds that appear inside groups as lowering progresses
    Object, Array, Set, UnifyBody, ObjectItemSeq, SomeDecl, ExprEvery, ObjectCompr, ArrayCompr,
    SetCompr, ExprCall, Ref, Term, RefTerm, NumTerm, Enumerate, ArithInfix, BinInfix, BoolInfix,
    AssignInfix, UnaryExpr, NotExpr, Expr, SimpleRef, Merge, ToValues,
];

const DATA_TERM_CONTENT: &[NodeKind] = &[Scalar, DataArray, DataObject, DataSet];

const EXPR_CONTENT: &[NodeKind] = &[
    Term, RefTerm, NumTerm, Add, Subtract, Multiply, Divide, Modulo, And, Or, Equals, NotEquals,
    LessThan, LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf, Not, Assign, Unify,
    Dot, Expr, ExprCall, ExprEvery, Enumerate, ArithInfix, BinInfix, BoolInfix, AssignInfix,
    UnaryExpr, InSome, Placeholder,
];

const ARITH_ARG: &[NodeKind] = &[
    RefTerm, NumTerm, UnaryExpr, ArithInfix, ExprCall, Expr, Term, Add, Subtract,
];

const BIN_ARG: &[NodeKind] = &[RefTerm, Set, SetCompr, ExprCall, BinInfix, Expr, Term, Or];

const BOOL_ARG: &[NodeKind] = &[Term, RefTerm, NumTerm, UnaryExpr, ArithInfix, BinInfix, ExprCall, Expr];

const ASSIGN_ARG: &[NodeKind] = &[
    Term, RefTerm, NumTerm, UnaryExpr, ArithInfix, BinInfix, BoolInfix, ExprCall, Enumerate, Expr,
    ExprEvery,
];

/// Schema of the reader output.
#[must_use]
pub fn parser() -> Schema {
    let mut schema = Schema::new()
        .def(Top, &[one(&[Rego])])
        .def(Rego, &[one(&[Query]), one(&[Input]), one(&[DataSeq]), one(&[ModuleSeq])])
        .def(Query, &[rep(&[Group])])
        .def(Input, &[one(&[DataItemSeq, DataTerm, Undefined])])
        .def(DataSeq, &[rep(&[DataItemSeq])])
        .def(ModuleSeq, &[rep(&[File])])
        .def(File, &[rep(&[Group])])
        .def(Group, &[rep1(GROUP_TOKENS)])
        .def(Brace, &[rep(&[List, Group, ObjectItem])])
        .def(Square, &[rep(&[List, Group])])
        .def(Paren, &[rep(&[List, Group])])
        .def(List, &[rep(&[Group, ObjectItem])])
        .def(DataItemSeq, &[rep(&[DataItem])])
        .def(DataItem, &[one(&[Key]), one(&[DataTerm])])
        .def(DataTerm, &[one(DATA_TERM_CONTENT)])
        .def(DataArray, &[rep(&[DataTerm])])
        .def(DataSet, &[rep(&[DataTerm])])
        .def(DataObject, &[rep(&[DataItem])])
        .def(Scalar, &[one(SCALAR_CONTENT)]);
    for &leaf in GROUP_TOKENS {
        if !matches!(leaf, Brace | Square | Paren | List | Object | Array | Set
            | UnifyBody | ObjectItemSeq | SomeDecl | ExprEvery | ObjectCompr | ArrayCompr
            | SetCompr | ExprCall | Ref | Term | RefTerm | NumTerm | Enumerate | ArithInfix
            | BinInfix | BoolInfix | AssignInfix | UnaryExpr | NotExpr | Expr | SimpleRef
            | Merge | ToValues)
        {
            schema = schema.def(leaf, &[]);
        }
    }
    schema.def(Key, &[])
}

/// The full schema chain, one entry per pipeline pass.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn chain() -> Vec<Schema> {
    let mut chain = Vec::with_capacity(32);

    // input_data
    let input_data = parser().with(&[(Input, &[one(&[Var]), one(&[DataItemSeq, DataTerm, Undefined])])]);
    chain.push(input_data.clone());

    // modules
    let modules = input_data.with(&[
        (ModuleSeq, &[rep(&[Module])]),
        (Module, &[one(&[Package]), one(&[ImportSeq]), one(&[Policy])]),
        (Package, &[one(&[Group])]),
        (ImportSeq, &[rep(&[Import])]),
        (Import, &[one(&[Group])]),
        (Policy, &[rep(&[Group])]),
        (ObjectItem, &[one(&[Group]), one(&[Group])]),
    ]);
    chain.push(modules.clone());

    // imports
    let imports = modules.with(&[
        (ImportSeq, &[rep(&[Import, Keyword])]),
        (Import, &[one(&[ImportRef]), one(&[As]), one(&[Var, Undefined])]),
        (ImportRef, &[one(&[Group])]),
        (Keyword, &[one(&[Var])]),
    ]);
    chain.push(imports.clone());

    // keywords (token promotion only)
    chain.push(imports.clone());

    // lists
    let lists = imports.with(&[
        (Query, &[rep(&[Group, SomeDecl])]),
        (Object, &[rep(&[ObjectItem])]),
        (Array, &[rep(&[Group, Expr])]),
        (Set, &[rep(&[Group, Expr])]),
        (UnifyBody, &[rep1(&[Group, SomeDecl, Literal, LiteralWith, Local, LiteralEnum, LiteralInit])]),
        (SomeDecl, &[one(&[VarSeq]), one(&[Group])]),
        (VarSeq, &[rep(&[Var])]),
        (ExprEvery, &[one(&[VarSeq]), one(&[UnifyBody]), one(&[EverySeq, InSome])]),
        (EverySeq, &[one(&[Group])]),
        (ArrayCompr, &[one(&[Group, Expr]), one(&[UnifyBody])]),
        (SetCompr, &[one(&[Group, Expr]), one(&[UnifyBody])]),
        (ObjectCompr, &[one(&[Group, Expr]), one(&[Group, Expr]), one(&[UnifyBody])]),
    ]);
    chain.push(lists.clone());

    // ifs
    chain.push(lists.clone());

    // elses
    let elses = lists.with(&[(Else, &[one(&[Group, Undefined]), one(&[UnifyBody])])]);
    chain.push(elses.clone());

    // rules
    let rules = elses.with(&[
        (Policy, &[rep(&[Rule, DefaultRule])]),
        (DefaultRule, &[one(&[Var]), one(&[Group, Term])]),
        (Rule, &[one(&[RuleHead]), one(&[UnifyBody, Empty]), one(&[ElseSeq])]),
        (RuleHead, &[one(&[Var]), one(&[RuleHeadComp, RuleHeadFunc, RuleHeadSet, RuleHeadObj])]),
        (RuleHeadComp, &[one(&[AssignOperator]), one(&[Group, Expr])]),
        (RuleHeadFunc, &[one(&[RuleArgs]), one(&[AssignOperator]), one(&[Group, Expr])]),
        (RuleHeadSet, &[one(&[Group, Expr])]),
        (RuleHeadObj, &[one(&[Group, Expr]), one(&[AssignOperator]), one(&[Group, Expr])]),
        (RuleArgs, &[rep1(&[Group, Term, ArgVar, ArgVal])]),
        (AssignOperator, &[one(&[Assign, Unify])]),
        (ElseSeq, &[rep(&[Else])]),
        (Empty, &[]),
    ]);
    chain.push(rules.clone());

    // build_calls
    let build_calls = rules.with(&[
        (ExprCall, &[one(&[VarSeq]), one(&[ArgSeq])]),
        (ArgSeq, &[rep1(&[Group, Expr])]),
    ]);
    chain.push(build_calls.clone());

    // build_refs
    let build_refs = build_calls.with(&[
        (Ref, &[one(&[RefHead]), one(&[RefArgSeq])]),
        (RefHead, &[one(&[Var, ExprCall, Array, Object, Set])]),
        (RefArgSeq, &[rep(&[RefArgDot, RefArgBrack])]),
        (RefArgDot, &[one(&[Var])]),
        (RefArgBrack, &[one(&[Group, Scalar, Var, Placeholder, RefTerm, Object, Array, Set])]),
    ]);
    chain.push(build_refs.clone());

    // structure
    let structure = build_refs.with(&[
        (Query, &[rep1(&[Literal, LiteralWith])]),
        (Package, &[one(&[Ref])]),
        (Import, &[one(&[Ref]), one(&[As]), one(&[Var])]),
        (Else, &[one(&[Expr, Undefined]), one(&[UnifyBody])]),
        (Policy, &[rep(&[Rule, DefaultRule])]),
        (DefaultRule, &[one(&[Var]), one(&[Term])]),
        (RuleHeadComp, &[one(&[AssignOperator]), one(&[Expr])]),
        (RuleHeadFunc, &[one(&[RuleArgs]), one(&[AssignOperator]), one(&[Expr])]),
        (RuleHeadSet, &[one(&[Expr])]),
        (RuleHeadObj, &[one(&[Expr]), one(&[AssignOperator]), one(&[Expr])]),
        (RuleArgs, &[rep1(&[Term])]),
        (UnifyBody, &[rep1(&[Literal, LiteralWith])]),
        (Literal, &[one(&[Expr, SomeDecl])]),
        (LiteralWith, &[one(&[UnifyBody]), one(&[WithSeq])]),
        (WithSeq, &[rep(&[With])]),
        (With, &[one(&[VarSeq]), one(&[Expr])]),
        (SomeDecl, &[one(&[VarSeq]), one(&[InSome])]),
        (InSome, &[one(&[Expr, Undefined])]),
        (Expr, &[rep1(EXPR_CONTENT)]),
        (ExprEvery, &[one(&[VarSeq]), one(&[UnifyBody]), one(&[InSome])]),
        (ArgSeq, &[rep1(&[Expr])]),
        (Term, &[one(&[Ref, Var, Scalar, Array, Object, Set, ArrayCompr, ObjectCompr, SetCompr])]),
        (Array, &[rep(&[Expr])]),
        (Set, &[rep(&[Expr])]),
        (Object, &[rep(&[ObjectItem, RefObjectItem])]),
        (ObjectItem, &[one(&[ObjectItemHead, Key]), one(&[Expr])]),
        (ObjectItemHead, &[one(&[Var, Ref, Scalar])]),
        (ObjectCompr, &[one(&[Expr]), one(&[Expr]), one(&[UnifyBody])]),
        (ArrayCompr, &[one(&[Expr]), one(&[UnifyBody])]),
        (SetCompr, &[one(&[Expr]), one(&[UnifyBody])]),
    ]);
    chain.push(structure.clone());

    // strings
    let strings = structure.with(&[(Scalar, &[one(JSON_SCALARS)])]);
    chain.push(strings.clone());

    // merge_data
    let merge_data = strings.with(&[
        (Rego, &[one(&[Query]), one(&[Input]), one(&[Data]), one(&[ModuleSeq])]),
        (Data, &[one(&[Var]), one(&[DataItemSeq])]),
    ]);
    chain.push(merge_data.clone());

    // symbols
    let symbols = merge_data.with(&[
        (Module, &[one(&[Var]), one(&[Policy])]),
        (Policy, &[rep(&[Import, RuleComp, RuleFunc, RuleSet, RuleObj, DefaultRule])]),
        (Import, &[one(&[Var]), one(&[Ref])]),
        (RuleComp, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[Expr, UnifyBody, Term]), one(&[JSONInt])]),
        (RuleFunc, &[one(&[Var]), one(&[RuleArgs]), one(&[UnifyBody, Empty]), one(&[Expr, Term]), one(&[JSONInt])]),
        (RuleSet, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[Expr, Term])]),
        (RuleObj, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[Expr, Term])]),
        (RuleArgs, &[rep1(&[ArgVar, ArgVal])]),
        (ArgVar, &[one(&[Var]), one(&[Undefined, Term, TermSet, Error, Scalar, Array, Object, Set])]),
        (ArgVal, &[one(&[Scalar, Array, Object, Set])]),
        (UnifyBody, &[rep1(&[Local, Literal, LiteralWith, LiteralEnum])]),
        (LiteralEnum, &[one(&[VarSeq]), one(&[Expr])]),
        (Local, &[one(&[Var]), one(&[Undefined, Term, TermSet, Error])]),
        (Query, &[one(&[UnifyBody])]),
        (Object, &[rep(&[ObjectItem, RefObjectItem])]),
        (ObjectItem, &[one(&[Key]), one(&[Expr])]),
        (RefObjectItem, &[one(&[RefTerm]), one(&[Expr])]),
        (Term, &[one(&[Scalar, Array, Object, Set, ArrayCompr, SetCompr, ObjectCompr])]),
        (RefTerm, &[one(&[Ref, Var, SimpleRef])]),
        (NumTerm, &[one(&[JSONInt, JSONFloat])]),
        (RefArgBrack, &[one(&[RefTerm, Scalar, Object, Array, Set])]),
        (ExprEvery, &[one(&[VarSeq]), one(&[NestedBody])]),
        (NestedBody, &[one(&[Key]), one(&[UnifyBody])]),
        (Enumerate, &[one(&[Expr])]),
    ]);
    chain.push(symbols.clone());

    // replace_argvals
    let replace_argvals = symbols.with(&[(RuleArgs, &[rep1(&[ArgVar])])]);
    chain.push(replace_argvals.clone());

    // lift_query
    let lift_query = replace_argvals.with(&[(Query, &[one(&[VarSeq])])]);
    chain.push(lift_query.clone());

    // constants
    let constants = lift_query.with(&[
        (RuleComp, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, DataTerm]), one(&[JSONInt])]),
        (RuleFunc, &[one(&[Var]), one(&[RuleArgs]), one(&[UnifyBody, Empty]), one(&[UnifyBody, DataTerm]), one(&[JSONInt])]),
        (RuleSet, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, DataTerm])]),
        (RuleObj, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, DataTerm])]),
        (DefaultRule, &[one(&[Var]), one(&[DataTerm])]),
    ]);
    chain.push(constants.clone());

    // explicit_enums
    let explicit_enums = constants.with(&[(LiteralEnum, &[one(&[Var]), one(&[Var]), one(&[UnifyBody])])]);
    chain.push(explicit_enums.clone());

    // compr
    let compr = explicit_enums.with(&[
        (ObjectCompr, &[one(&[Var]), one(&[NestedBody])]),
        (ArrayCompr, &[one(&[Var]), one(&[NestedBody])]),
        (SetCompr, &[one(&[Var]), one(&[NestedBody])]),
    ]);
    chain.push(compr.clone());

    // absolute_refs
    chain.push(compr.clone());

    // merge_modules
    let merge_modules = compr.with(&[
        (Rego, &[one(&[Query]), one(&[Input]), one(&[Data])]),
        (Module, &[rep(&[RuleComp, DefaultRule, RuleFunc, RuleSet, RuleObj, Submodule])]),
        (Submodule, &[one(&[Key]), one(&[Module])]),
        (DataItem, &[one(&[Key]), one(&[Module, DataTerm])]),
    ]);
    chain.push(merge_modules.clone());

    // skips
    let skips = merge_modules.with(&[
        (Rego, &[one(&[Query]), one(&[Input]), one(&[Data]), one(&[SkipSeq])]),
        (SkipSeq, &[rep(&[Skip])]),
        (Skip, &[one(&[Key]), one(&[VarSeq, RuleRef, BuiltInHook, Undefined])]),
        (RuleRef, &[one(&[VarSeq])]),
        (ExprCall, &[one(&[Var]), one(&[ArgSeq])]),
    ]);
    chain.push(skips.clone());

    // multiply_divide
    let multiply_divide = skips.with(&[
        (ArithInfix, &[one(&[ArithArg]), one(&[Multiply, Divide, Modulo, Add, Subtract]), one(&[ArithArg])]),
        (ArithArg, &[rep1(ARITH_ARG)]),
        (BinInfix, &[one(&[BinArg]), one(&[And, Or, Subtract]), one(&[BinArg])]),
        (BinArg, &[rep1(BIN_ARG)]),
        (UnaryExpr, &[one(&[ArithArg])]),
    ]);
    chain.push(multiply_divide.clone());

    // add_subtract
    let add_subtract = multiply_divide.with(&[
        (ArithArg, &[one(ARITH_ARG)]),
        (BinArg, &[one(BIN_ARG)]),
    ]);
    chain.push(add_subtract.clone());

    // comparison
    let comparison = add_subtract.with(&[
        (BoolInfix, &[one(&[BoolArg]), one(&[Equals, NotEquals, LessThan, LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf]), one(&[BoolArg])]),
        (BoolArg, &[one(BOOL_ARG)]),
        (Literal, &[one(&[Expr, NotExpr])]),
        (NotExpr, &[one(&[Expr])]),
        (Enumerate, &[one(&[Expr])]),
    ]);
    chain.push(comparison.clone());

    // assign
    let assign = comparison.with(&[
        (AssignInfix, &[one(&[AssignArg]), one(&[AssignArg])]),
        (AssignArg, &[one(ASSIGN_ARG)]),
        (Expr, &[rep1(&[NumTerm, RefTerm, Term, UnaryExpr, ArithInfix, BinInfix, BoolInfix, AssignInfix, ExprCall, ExprEvery, Enumerate, Expr])]),
    ]);
    chain.push(assign.clone());

    // simple_refs
    let simple_refs = assign.with(&[
        (RefTerm, &[one(&[Var, SimpleRef])]),
        (SimpleRef, &[one(&[Var]), one(&[RefArgDot, RefArgBrack])]),
        (RefHead, &[one(&[Var])]),
    ]);
    chain.push(simple_refs.clone());

    // implicit_enums
    chain.push(simple_refs.clone());

    // init
    let init = simple_refs.with(&[
        (UnifyBody, &[rep1(&[Local, Literal, LiteralWith, LiteralEnum, LiteralInit])]),
        (LiteralInit, &[one(&[AssignInfix])]),
    ]);
    chain.push(init.clone());

    // rulebody
    let rulebody = init.with(&[
        (UnifyBody, &[rep1(&[Local, UnifyExpr, UnifyExprWith, UnifyExprCompr, UnifyExprEnum])]),
        (UnifyExpr, &[one(&[Var]), one(&[NotExpr, Expr])]),
        (UnifyExprWith, &[one(&[UnifyBody]), one(&[WithSeq])]),
        (UnifyExprCompr, &[one(&[Var]), one(&[ArrayCompr, SetCompr, ObjectCompr]), one(&[NestedBody])]),
        (UnifyExprEnum, &[one(&[Var]), one(&[Var]), one(&[Var]), one(&[UnifyBody])]),
        (ArrayCompr, &[one(&[Var])]),
        (SetCompr, &[one(&[Var])]),
        (ObjectCompr, &[one(&[Var])]),
        (With, &[one(&[VarSeq]), one(&[Var])]),
        (Expr, &[one(&[NumTerm, RefTerm, Term, UnaryExpr, ArithInfix, BinInfix, BoolInfix, ExprCall, ExprEvery, Enumerate])]),
    ]);
    chain.push(rulebody.clone());

    // lift_to_rule
    let lift_to_rule = rulebody.with(&[
        (UnifyBody, &[rep1(&[Local, UnifyExpr, UnifyExprWith])]),
        (Expr, &[one(&[NumTerm, RefTerm, Term, UnaryExpr, ArithInfix, BinInfix, BoolInfix, ExprCall, ExprEvery, Enumerate, ArrayCompr, SetCompr, ObjectCompr, Merge, ToValues])]),
        (Merge, &[one(&[Var])]),
        (ToValues, &[one(&[Expr])]),
    ]);
    chain.push(lift_to_rule.clone());

    // functions
    let functions = lift_to_rule.with(&[
        (UnifyExpr, &[one(&[Var]), one(&[Var, Scalar, Function])]),
        (Function, &[one(&[JSONString]), one(&[ArgSeq])]),
        (ArgSeq, &[rep(&[Scalar, Var, Term, Add, Subtract, Multiply, Divide, Modulo, And, Or, Equals, NotEquals, LessThan, LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf, NestedBody, VarSeq, BuiltInHook])]),
        (Array, &[rep(&[Term])]),
        (Set, &[rep(&[Term])]),
        (Object, &[rep(&[ObjectItem])]),
        (ObjectItem, &[one(&[Key]), one(&[Term])]),
        (DataItem, &[one(&[Key]), one(&[Module, Term])]),
        (RuleComp, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, Term]), one(&[JSONInt])]),
        (RuleFunc, &[one(&[Var]), one(&[RuleArgs]), one(&[UnifyBody, Empty]), one(&[UnifyBody, Term]), one(&[JSONInt])]),
        (RuleSet, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, Term])]),
        (RuleObj, &[one(&[Var]), one(&[UnifyBody, Empty]), one(&[UnifyBody, Term])]),
        (DefaultRule, &[one(&[Var]), one(&[Term])]),
        (Term, &[one(&[Scalar, Array, Object, Set, Undefined, Module])]),
        (TermSet, &[rep(&[Term])]),
        (Input, &[one(&[Var]), one(&[DataItemSeq, Term, Undefined])]),
    ]);
    chain.push(functions.clone());

    debug_assert_eq!(chain.len(), 32);
    chain
}

/// Schema after the `unify` step.
#[must_use]
pub fn unify() -> Schema {
    let functions = chain().pop().expect("chain is non-empty");
    functions.with(&[
        (Query, &[rep1(&[Term, TermSet, Binding, Undefined, Error])]),
        (Binding, &[one(&[Var]), one(&[Term, TermSet])]),
    ])
}

/// Schema after the final `query` lift.
#[must_use]
pub fn query() -> Schema {
    unify().with(&[(Top, &[rep1(&[Binding, Term, TermSet, Undefined, Error])])])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_length_matches_pipeline() {
        assert_eq!(chain().len(), 32);
    }

    #[test]
    fn test_inheritance_carries_forward() {
        let schemas = chain();
        // The parser-era DataItem production survives until functions changes it.
        let symbols_schema = &schemas[13];
        assert!(symbols_schema.production(DataItem).is_some());
        assert!(symbols_schema.production(UnifyExpr).is_none());
        let functions_schema = schemas.last().unwrap();
        assert!(functions_schema.production(UnifyExpr).is_some());
    }
}
