//! The closed vocabulary of node kinds.
//!
//! Every tree node carries one of these tags. The vocabulary covers the
//! surface parse shapes, every intermediate form of the lowering pipeline,
//! and the normal form consumed by the unifier.

/// Tag identifying the grammatical role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    // Root shapes
    Top,
    Rego,
    Query,
    Input,
    Data,
    DataSeq,
    ModuleSeq,
    File,

    // Surface parse containers
    Group,
    Brace,
    Square,
    Paren,
    List,

    // Scalars and leaf tokens
    Var,
    JSONString,
    RawString,
    JSONInt,
    JSONFloat,
    JSONTrue,
    JSONFalse,
    JSONNull,
    Placeholder,

    // Operator tokens
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    MemberOf,
    Not,
    Assign,
    Unify,
    Dot,
    Colon,
    EmptySet,

    // Keyword tokens
    Package,
    Import,
    Default,
    SomeKw,
    Else,
    As,
    With,
    IfTruthy,
    InSome,
    Contains,
    Every,

    // Module structure
    Module,
    Submodule,
    Policy,
    ImportSeq,
    ImportRef,
    Keyword,
    Rule,
    RuleHead,
    RuleHeadComp,
    RuleHeadFunc,
    RuleHeadSet,
    RuleHeadObj,
    RuleArgs,
    AssignOperator,
    ElseSeq,
    Empty,

    // Expression structure
    Literal,
    LiteralWith,
    LiteralEnum,
    LiteralInit,
    NotExpr,
    Expr,
    ExprCall,
    ExprEvery,
    SomeDecl,
    VarSeq,
    WithSeq,
    WithRef,
    WithExpr,
    EverySeq,
    Term,
    Scalar,
    NumTerm,
    RefTerm,
    Array,
    Object,
    Set,
    ObjectItem,
    ObjectItemHead,
    ObjectItemSeq,
    RefObjectItem,
    Ref,
    RefHead,
    RefArgSeq,
    RefArgDot,
    RefArgBrack,
    SimpleRef,
    ArrayCompr,
    SetCompr,
    ObjectCompr,
    NestedBody,
    Key,

    // Infix structure
    ArithInfix,
    ArithArg,
    UnaryExpr,
    BinInfix,
    BinArg,
    BoolInfix,
    BoolArg,
    AssignInfix,
    AssignArg,
    Enumerate,
    Merge,
    ToValues,

    // Data documents
    DataItemSeq,
    DataItem,
    DataTerm,
    DataArray,
    DataObject,
    DataSet,

    // Reference resolution
    SkipSeq,
    Skip,
    RuleRef,
    BuiltInHook,

    // Rules in normal form
    DefaultRule,
    RuleComp,
    RuleFunc,
    RuleSet,
    RuleObj,
    ArgVar,
    ArgVal,

    // Unification normal form
    UnifyBody,
    UnifyExpr,
    UnifyExprWith,
    UnifyExprCompr,
    UnifyExprEnum,
    Local,
    Function,
    ArgSeq,
    Binding,
    TermSet,
    DefaultTerm,

    // Outcomes
    Undefined,
    Error,
    ErrorMsg,
    ErrorAst,

    // Rewrite-internal markers
    Seq,
    Lift,
}

impl NodeKind {
    /// Name of the kind as it appears in debug dumps.
    #[must_use]
    pub fn name(self) -> &'static str {
        // Debug repr matches the variant name, which is what the dump format
        // wants.
        kind_name(self)
    }

    /// True for JSON scalar token kinds.
    #[must_use]
    pub fn is_json_scalar(self) -> bool {
        matches!(
            self,
            Self::JSONString
                | Self::JSONInt
                | Self::JSONFloat
                | Self::JSONTrue
                | Self::JSONFalse
                | Self::JSONNull
        )
    }

    /// True for arithmetic operator tokens.
    #[must_use]
    pub fn is_arith_op(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo
        )
    }

    /// True for set operator tokens.
    #[must_use]
    pub fn is_bin_op(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Subtract)
    }

    /// True for comparison operator tokens.
    #[must_use]
    pub fn is_bool_op(self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEquals
                | Self::GreaterThan
                | Self::GreaterThanOrEquals
                | Self::MemberOf
        )
    }

    /// True for the kinds that carry a symbol table.
    #[must_use]
    pub fn has_symbols(self) -> bool {
        matches!(
            self,
            Self::Rego
                | Self::Module
                | Self::Input
                | Self::Data
                | Self::DataObject
                | Self::Object
                | Self::Query
                | Self::RuleComp
                | Self::RuleFunc
                | Self::RuleSet
                | Self::RuleObj
                | Self::DefaultRule
        )
    }

    /// For symbol-introducing kinds, the index of the child that provides the
    /// symbol key.
    #[must_use]
    pub fn key_child(self) -> Option<usize> {
        match self {
            Self::Local
            | Self::ArgVar
            | Self::Module
            | Self::Submodule
            | Self::DataItem
            | Self::ObjectItem
            | Self::Skip
            | Self::Binding
            | Self::Keyword
            | Self::Input
            | Self::Data
            | Self::Import
            | Self::RuleComp
            | Self::RuleFunc
            | Self::RuleSet
            | Self::RuleObj
            | Self::DefaultRule => Some(0),
            _ => None,
        }
    }
}

fn kind_name(kind: NodeKind) -> &'static str {
    macro_rules! names {
        ($($variant:ident),* $(,)?) => {
            match kind {
                $(NodeKind::$variant => stringify!($variant),)*
            }
        };
    }
    names!(
        Top, Rego, Query, Input, Data, DataSeq, ModuleSeq, File, Group, Brace, Square, Paren,
        List, Var, JSONString, RawString, JSONInt, JSONFloat, JSONTrue, JSONFalse, JSONNull,
        Placeholder, Add, Subtract, Multiply, Divide, Modulo, And, Or, Equals, NotEquals,
        LessThan, LessThanOrEquals, GreaterThan, GreaterThanOrEquals, MemberOf, Not, Assign,
        Unify, Dot, Colon, EmptySet, Package, Import, Default, SomeKw, Else, As, With, IfTruthy,
        InSome, Contains, Every, Module, Submodule, Policy, ImportSeq, ImportRef, Keyword, Rule,
        RuleHead, RuleHeadComp, RuleHeadFunc, RuleHeadSet, RuleHeadObj, RuleArgs, AssignOperator,
        ElseSeq, Empty, Literal, LiteralWith, LiteralEnum, LiteralInit, NotExpr, Expr, ExprCall,
        ExprEvery, SomeDecl, VarSeq, WithSeq, WithRef, WithExpr, EverySeq, Term, Scalar,
        NumTerm, RefTerm, Array, Object, Set, ObjectItem, ObjectItemHead, ObjectItemSeq,
        RefObjectItem, Ref, RefHead, RefArgSeq, RefArgDot, RefArgBrack, SimpleRef, ArrayCompr,
        SetCompr, ObjectCompr, NestedBody, Key, ArithInfix, ArithArg, UnaryExpr, BinInfix,
        BinArg, BoolInfix, BoolArg, AssignInfix, AssignArg, Enumerate, Merge, ToValues,
        DataItemSeq, DataItem, DataTerm, DataArray, DataObject, DataSet, SkipSeq, Skip, RuleRef,
        BuiltInHook, DefaultRule, RuleComp, RuleFunc, RuleSet, RuleObj, ArgVar, ArgVal,
        UnifyBody, UnifyExpr, UnifyExprWith, UnifyExprCompr, UnifyExprEnum, Local, Function,
        ArgSeq, Binding, TermSet, DefaultTerm, Undefined, Error, ErrorMsg, ErrorAst, Seq, Lift,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name() {
        assert_eq!(NodeKind::UnifyBody.name(), "UnifyBody");
        assert_eq!(NodeKind::JSONInt.name(), "JSONInt");
    }

    #[test]
    fn test_classification() {
        assert!(NodeKind::JSONFloat.is_json_scalar());
        assert!(NodeKind::Modulo.is_arith_op());
        assert!(NodeKind::Subtract.is_bin_op());
        assert!(NodeKind::MemberOf.is_bool_op());
        assert!(!NodeKind::Var.is_json_scalar());
    }

    #[test]
    fn test_key_child() {
        assert_eq!(NodeKind::Local.key_child(), Some(0));
        assert_eq!(NodeKind::Expr.key_child(), None);
    }
}
