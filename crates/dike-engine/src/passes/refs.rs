//! Call and reference recognition, and the structure pass that conforms the
//! tree to the canonical policy grammar.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

const SCALAR_TOKENS: &[NodeKind] = &[JSONInt, JSONFloat, JSONTrue, JSONFalse, JSONNull];
const STRING_TOKENS: &[NodeKind] = &[JSONString, RawString];
const TERM_TOKENS: &[NodeKind] = &[
    Var, Ref, Array, Object, Set, ArrayCompr, SetCompr, ObjectCompr,
];

fn paren_to_argseq(ast: &mut Ast, paren: NodeId) -> Option<NodeId> {
    let argseq = ast.node(ArgSeq);
    match ast.front(paren).map(|c| ast.kind(c)) {
        Some(List) => {
            let list = ast.front(paren)?;
            for group in ast.children(list).to_vec() {
                ast.push_back(argseq, group);
            }
        }
        Some(Group) => {
            let group = ast.front(paren)?;
            ast.push_back(argseq, group);
        }
        _ => return None,
    }
    Some(argseq)
}

/// Recognizes `f(args)` and dotted call heads into `ExprCall`.
pub fn build_calls() -> PassDef {
    PassDef::new(
        "build_calls",
        vec![
            Rule::new(
                &[Group],
                vec![t(&[Var]).bind("name"), t(&[Paren]).bind("args")],
                |ast, env| {
                    let name = env.node("name");
                    let paren = env.node("args");
                    let Some(argseq) = paren_to_argseq(ast, paren) else {
                        return ast.error(paren, "Syntax error: empty argument sequence");
                    };
                    ast.detach(name);
                    build!(ast, (ExprCall (VarSeq @name) @argseq))
                },
            ),
            // fold a dotted prefix into the call's name sequence
            Rule::new(
                &[Group],
                vec![
                    t(&[Var]).bind("head"),
                    t(&[Dot]),
                    t(&[ExprCall]).bind("call"),
                ],
                |ast, env| {
                    let head = env.node("head");
                    let call = env.node("call");
                    let varseq = ast.child(call, 0);
                    ast.detach(head);
                    ast.push_front(varseq, head);
                    ast.detach(call);
                    call
                },
            ),
        ],
    )
}

/// Recognizes chained `a.b[c]` references into `Ref(RefHead, RefArgSeq)`.
pub fn build_refs() -> PassDef {
    PassDef::new(
        "build_refs",
        vec![
            Rule::new(
                &[Group],
                vec![
                    t(&[Var, ExprCall]).bind("head"),
                    t(&[Dot]),
                    t(&[Var]).bind("field"),
                ],
                |ast, env| {
                    let head = env.node("head");
                    let field = env.node("field");
                    ast.detach(head);
                    ast.detach(field);
                    build!(
                        ast,
                        (Ref (RefHead @head) (RefArgSeq (RefArgDot @field)))
                    )
                },
            ),
            Rule::new(
                &[Group],
                vec![
                    t(&[Var, ExprCall]).bind("head"),
                    t(&[Square])
                        .guard(|ast, n| ast.len(n) == 1)
                        .bind("index"),
                ],
                |ast, env| {
                    let head = env.node("head");
                    let square = env.node("index");
                    let inner = ast.child(square, 0);
                    ast.detach(head);
                    ast.detach(inner);
                    build!(
                        ast,
                        (Ref (RefHead @head) (RefArgSeq (RefArgBrack @inner)))
                    )
                },
            ),
            Rule::new(
                &[Group],
                vec![t(&[Ref]).bind("ref"), t(&[Dot]), t(&[Var]).bind("field")],
                |ast, env| {
                    let reference = env.node("ref");
                    let field = env.node("field");
                    let argseq = ast.child(reference, 1);
                    ast.detach(field);
                    let arg = build!(ast, (RefArgDot @field));
                    ast.push_back(argseq, arg);
                    ast.detach(reference);
                    reference
                },
            ),
            Rule::new(
                &[Group],
                vec![
                    t(&[Ref]).bind("ref"),
                    t(&[Square])
                        .guard(|ast, n| ast.len(n) == 1)
                        .bind("index"),
                ],
                |ast, env| {
                    let reference = env.node("ref");
                    let square = env.node("index");
                    let inner = ast.child(square, 0);
                    let argseq = ast.child(reference, 1);
                    ast.detach(inner);
                    let arg = build!(ast, (RefArgBrack @inner));
                    ast.push_back(argseq, arg);
                    ast.detach(reference);
                    reference
                },
            ),
        ],
    )
}

/// Conforms the parse shapes to the canonical policy grammar: groups become
/// expressions, literals, and terms; `with` clauses, imports, and packages
/// take their final shapes.
#[allow(clippy::too_many_lines)]
pub fn structure() -> PassDef {
    PassDef::new(
        "structure",
        vec![
            // with clauses attach to the statement they modify
            Rule::new(
                &[UnifyBody, Query],
                vec![t(&[Group])
                    .guard(|ast, n| {
                        ast.children(n).iter().any(|&c| ast.kind(c) == With)
                    })
                    .bind("group")],
                |ast, env| structure_with(ast, env.node("group")),
            ),
            Rule::new(
                &[Query],
                vec![t(&[Group]).bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    for &token in &tokens {
                        ast.detach(token);
                    }
                    build!(ast, (Literal (Expr @@tokens)))
                },
            ),
            Rule::new(
                &[RuleHeadComp, RuleHeadFunc, RuleHeadSet, RuleHeadObj],
                vec![t(&[Group]).bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    for &token in &tokens {
                        ast.detach(token);
                    }
                    build!(ast, (Expr @@tokens))
                },
            ),
            // default rule values must be plain terms
            Rule::new(
                &[DefaultRule],
                vec![t(&[Group]).bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    match tokens.as_slice() {
                        [single] if SCALAR_TOKENS.contains(&ast.kind(*single)) => {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (Term (Scalar @single)))
                        }
                        [single] if STRING_TOKENS.contains(&ast.kind(*single)) => {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (Term (Scalar @single)))
                        }
                        [single]
                            if matches!(ast.kind(*single), Array | Object | Set | EmptySet) =>
                        {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (Term @single))
                        }
                        _ => ast.error(group, "Invalid default rule"),
                    }
                },
            ),
            Rule::new(&[Else], vec![t(&[Group]).bind("group")], |ast, env| {
                let group = env.node("group");
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                for &token in &tokens {
                    ast.detach(token);
                }
                build!(ast, (Expr @@tokens))
            }),
            // object items
            Rule::new(
                &[ObjectItemSeq, Object],
                vec![t(&[ObjectItem])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == Group))
                    .bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let key_group = ast.child(item, 0);
                    let value_group = ast.child(item, 1);
                    let key_tokens: Vec<NodeId> = ast.children(key_group).to_vec();
                    let head = match key_tokens.as_slice() {
                        [single] if STRING_TOKENS.contains(&ast.kind(*single)) => {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (ObjectItemHead (Scalar @single)))
                        }
                        [single] if SCALAR_TOKENS.contains(&ast.kind(*single)) => {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (ObjectItemHead (Scalar @single)))
                        }
                        [single] if matches!(ast.kind(*single), Var | Ref) => {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (ObjectItemHead @single))
                        }
                        _ => return ast.error(item, "Invalid object item key"),
                    };
                    let value_tokens: Vec<NodeId> = ast.children(value_group).to_vec();
                    for &token in &value_tokens {
                        ast.detach(token);
                    }
                    build!(ast, (ObjectItem @head (Expr @@value_tokens)))
                },
            ),
            // comprehension heads and bodies
            Rule::new(
                &[ArrayCompr, SetCompr, ObjectCompr],
                vec![t(&[Group]).bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    for &token in &tokens {
                        ast.detach(token);
                    }
                    build!(ast, (Expr @@tokens))
                },
            ),
            // packages
            Rule::new(
                &[Package],
                vec![t(&[Group])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Var)
                    .bind("group")],
                |ast, env| {
                    let var = ast.child(env.node("group"), 0);
                    ast.detach(var);
                    build!(ast, (Ref (RefHead @var) (RefArgSeq)))
                },
            ),
            Rule::new(
                &[Package],
                vec![t(&[Group])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Ref)
                    .bind("group")],
                |ast, env| {
                    let reference = ast.child(env.node("group"), 0);
                    ast.detach(reference);
                    reference
                },
            ),
            Rule::new(&[Package], vec![t(&[Group]).bind("group")], |ast, env| {
                ast.error(env.node("group"), "Invalid package name")
            }),
            // imports: derive the alias from the last segment when absent
            Rule::new(
                &[Import],
                vec![
                    t(&[ImportRef]).bind("ref"),
                    t(&[As]),
                    t(&[Undefined]).bind("alias"),
                ],
                |ast, env| {
                    let import_ref = env.node("ref");
                    let group = ast.child(import_ref, 0);
                    let reference = normalize_import_ref(ast, group);
                    let Some(reference) = reference else {
                        return ast.error(import_ref, "Invalid import statement");
                    };
                    let alias = derive_import_alias(ast, reference);
                    let Some(alias) = alias else {
                        return ast.error(import_ref, "Invalid import statement");
                    };
                    build!(ast, (Seq @reference (As) @alias))
                },
            ),
            Rule::new(
                &[Import],
                vec![t(&[ImportRef]).bind("ref"), t(&[As]), t(&[Var]).bind("alias")],
                |ast, env| {
                    let import_ref = env.node("ref");
                    let alias = env.node("alias");
                    let group = ast.child(import_ref, 0);
                    let Some(reference) = normalize_import_ref(ast, group) else {
                        return ast.error(import_ref, "Invalid import statement");
                    };
                    ast.detach(alias);
                    build!(ast, (Seq @reference (As) @alias))
                },
            ),
            // remaining body statements become literals
            Rule::new(
                &[UnifyBody],
                vec![t(&[SomeDecl]).bind("decl")],
                |ast, env| {
                    let decl = env.node("decl");
                    ast.detach(decl);
                    build!(ast, (Literal @decl))
                },
            ),
            Rule::new(&[UnifyBody], vec![t(&[Group]).bind("group")], |ast, env| {
                let group = env.node("group");
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                for &token in &tokens {
                    ast.detach(token);
                }
                build!(ast, (Literal (Expr @@tokens)))
            }),
            // SomeDecl internals
            Rule::new(
                &[SomeDecl],
                vec![t(&[Group])
                    .guard(|ast, n| {
                        ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Undefined
                    })
                    .bind("group")],
                |ast, _| build!(ast, (InSome (Undefined))),
            ),
            Rule::new(
                &[SomeDecl],
                vec![t(&[Group])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == InSome))
                    .bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    for &token in &tokens[1..] {
                        ast.detach(token);
                    }
                    let rest = tokens[1..].to_vec();
                    build!(ast, (InSome (Expr @@rest)))
                },
            ),
            // every domains
            Rule::new(
                &[ExprEvery],
                vec![t(&[EverySeq]).bind("seq")],
                |ast, env| {
                    let seq = env.node("seq");
                    let group = ast.child(seq, 0);
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    let rest: Vec<NodeId> = tokens
                        .iter()
                        .copied()
                        .filter(|&n| ast.kind(n) != InSome)
                        .collect();
                    for &token in &rest {
                        ast.detach(token);
                    }
                    build!(ast, (InSome (Expr @@rest)))
                },
            ),
            // expression-level conversions
            Rule::new(
                &[Expr],
                vec![t(&[Paren])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Group)
                    .bind("paren")],
                |ast, env| {
                    let group = ast.child(env.node("paren"), 0);
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    for &token in &tokens {
                        ast.detach(token);
                    }
                    build!(ast, (Expr @@tokens))
                },
            ),
            Rule::new(
                &[Expr],
                vec![t(STRING_TOKENS).bind("token")],
                |ast, env| {
                    let token = env.node("token");
                    ast.detach(token);
                    build!(ast, (Term (Scalar @token)))
                },
            ),
            Rule::new(
                &[Expr],
                vec![t(SCALAR_TOKENS).bind("token")],
                |ast, env| {
                    let token = env.node("token");
                    ast.detach(token);
                    build!(ast, (Term (Scalar @token)))
                },
            ),
            Rule::new(&[Expr], vec![t(TERM_TOKENS).bind("token")], |ast, env| {
                let token = env.node("token");
                ast.detach(token);
                build!(ast, (Term @token))
            }),
            Rule::new(&[Expr], vec![t(&[InSome])], |ast, _| {
                ast.token(MemberOf, "in")
            }),
            Rule::new(
                &[Expr],
                vec![t(&[UnifyBody])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Group)
                    .bind("body")],
                |ast, env| {
                    // a singleton set literal was read as a rule body
                    let body = env.node("body");
                    let group = ast.child(body, 0);
                    ast.detach(group);
                    build!(ast, (Set @group))
                },
            ),
            // arrays and sets hold expressions
            Rule::new(&[Array, Set], vec![t(&[Group]).bind("group")], |ast, env| {
                let group = env.node("group");
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                for &token in &tokens {
                    ast.detach(token);
                }
                build!(ast, (Expr @@tokens))
            }),
            // reference bracket arguments
            Rule::new(
                &[RefArgBrack],
                vec![t(&[Group]).bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    match tokens.as_slice() {
                        [single] if ast.kind(*single) == Var => {
                            let single = *single;
                            ast.detach(single);
                            single
                        }
                        [single] if ast.kind(*single) == Placeholder => {
                            let single = *single;
                            ast.detach(single);
                            single
                        }
                        [single]
                            if SCALAR_TOKENS.contains(&ast.kind(*single))
                                || STRING_TOKENS.contains(&ast.kind(*single)) =>
                        {
                            let single = *single;
                            ast.detach(single);
                            build!(ast, (Scalar @single))
                        }
                        [single] if matches!(ast.kind(*single), Object | Array | Set) => {
                            let single = *single;
                            ast.detach(single);
                            single
                        }
                        _ => ast.error(group, "Invalid index"),
                    }
                },
            ),
            // argument sequences hold expressions
            Rule::new(&[ArgSeq], vec![t(&[Group]).bind("group")], |ast, env| {
                let group = env.node("group");
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                for &token in &tokens {
                    ast.detach(token);
                }
                build!(ast, (Expr @@tokens))
            }),
            // rule arguments are terms
            Rule::new(&[RuleArgs], vec![t(&[Group]).bind("group")], |ast, env| {
                let group = env.node("group");
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                match tokens.as_slice() {
                    [single]
                        if SCALAR_TOKENS.contains(&ast.kind(*single))
                            || STRING_TOKENS.contains(&ast.kind(*single)) =>
                    {
                        let single = *single;
                        ast.detach(single);
                        build!(ast, (Term (Scalar @single)))
                    }
                    [single] if matches!(ast.kind(*single), Var | Array | Object | Set) => {
                        let single = *single;
                        ast.detach(single);
                        build!(ast, (Term @single))
                    }
                    [minus, number]
                        if ast.kind(*minus) == Subtract
                            && matches!(ast.kind(*number), JSONInt | JSONFloat) =>
                    {
                        let number = *number;
                        ast.detach(number);
                        let negated = crate::resolver::negate(ast, number);
                        build!(ast, (Term (Scalar @negated)))
                    }
                    _ => ast.error(group, "Invalid argument"),
                }
            }),
            // errors
            Rule::new(&[Expr], vec![t(&[Contains]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid set rule")
            }),
            Rule::new(&[Expr], vec![t(&[With]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid with")
            }),
            Rule::new(&[Expr], vec![t(&[Undefined]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Syntax error")
            }),
            Rule::new(&[Expr], vec![t(&[Every]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid every statement")
            }),
            Rule::new(&[Expr], vec![t(&[Paren]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid sub-expressions")
            }),
            Rule::new(&[Expr], vec![t(&[UnifyBody]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid body location")
            }),
            Rule::new(&[Expr], vec![t(&[SomeDecl]).bind("t")], |ast, env| {
                ast.error(env.node("t"), "Invalid some")
            }),
            Rule::any(
                vec![t(&[UnifyBody]).guard(|ast, n| ast.is_empty(n)).bind("t")],
                |ast, env| ast.error(env.node("t"), "Empty body"),
            ),
            Rule::any(
                vec![t(&[Expr]).guard(|ast, n| ast.is_empty(n)).bind("t")],
                |ast, env| ast.error(env.node("t"), "Empty expression"),
            ),
        ],
    )
}

/// Splits a statement group holding `with` modifiers into
/// `LiteralWith(UnifyBody, WithSeq)`.
fn structure_with(ast: &mut Ast, group: NodeId) -> NodeId {
    let tokens: Vec<NodeId> = ast.children(group).to_vec();
    let first_with = tokens
        .iter()
        .position(|&n| ast.kind(n) == With)
        .expect("guarded");
    if first_with == 0 {
        return ast.error(group, "Invalid with statement");
    }
    let expr_tokens: Vec<NodeId> = tokens[..first_with].to_vec();
    let mut withseq_items = Vec::new();
    let mut index = first_with;
    while index < tokens.len() {
        if ast.kind(tokens[index]) != With {
            return ast.error(group, "Invalid with statement");
        }
        let target = tokens.get(index + 1).copied();
        let as_token = tokens.get(index + 2).copied();
        let (Some(target), Some(as_token)) = (target, as_token) else {
            return ast.error(group, "Invalid with statement");
        };
        if ast.kind(as_token) != As {
            return ast.error(group, "Invalid with statement");
        }
        let Some(varseq) = with_target_varseq(ast, target) else {
            return ast.error(target, "Invalid with reference");
        };
        let mut value_tokens = Vec::new();
        index += 3;
        while index < tokens.len() && ast.kind(tokens[index]) != With {
            value_tokens.push(tokens[index]);
            index += 1;
        }
        if value_tokens.is_empty() {
            return ast.error(group, "Invalid with statement");
        }
        for &token in &value_tokens {
            ast.detach(token);
        }
        let with = build!(ast, (With @varseq (Expr @@value_tokens)));
        withseq_items.push(with);
    }
    for &token in &expr_tokens {
        ast.detach(token);
    }
    build!(
        ast,
        (LiteralWith
            (UnifyBody (Literal (Expr @@expr_tokens)))
            (WithSeq @@withseq_items))
    )
}

/// Converts a with target (`input.user`, `data.p.f`, or a bare var) into a
/// `VarSeq` of constant path segments.
fn with_target_varseq(ast: &mut Ast, target: NodeId) -> Option<NodeId> {
    match ast.kind(target) {
        Var => {
            let var = ast.deep_clone(target);
            Some(build!(ast, (VarSeq @var)))
        }
        Ref => {
            let head = ast.child(ast.child(target, 0), 0);
            if ast.kind(head) != Var {
                return None;
            }
            let varseq = ast.node(VarSeq);
            let head = ast.deep_clone(head);
            ast.push_back(varseq, head);
            let argseq = ast.child(target, 1);
            for &arg in ast.children(argseq).to_vec().iter() {
                match ast.kind(arg) {
                    RefArgDot => {
                        let var = ast.deep_clone(ast.child(arg, 0));
                        ast.push_back(varseq, var);
                    }
                    RefArgBrack => {
                        let inner = ast.child(arg, 0);
                        let inner = match ast.kind(inner) {
                            Group => ast.front(inner)?,
                            _ => inner,
                        };
                        let text = dike_ast::to_json(ast, inner);
                        let segment = dike_ast::strip_quotes(&text).to_string();
                        if ast.kind(inner) == Var {
                            return None;
                        }
                        let var = ast.token(Var, segment);
                        ast.push_back(varseq, var);
                    }
                    _ => return None,
                }
            }
            Some(varseq)
        }
        _ => None,
    }
}

fn normalize_import_ref(ast: &mut Ast, group: NodeId) -> Option<NodeId> {
    let tokens: Vec<NodeId> = ast.children(group).to_vec();
    match tokens.as_slice() {
        [single] if ast.kind(*single) == Ref => {
            let single = *single;
            ast.detach(single);
            Some(single)
        }
        [single] if ast.kind(*single) == Var => {
            let single = *single;
            ast.detach(single);
            Some(build!(ast, (Ref (RefHead @single) (RefArgSeq))))
        }
        _ => None,
    }
}

fn derive_import_alias(ast: &mut Ast, reference: NodeId) -> Option<NodeId> {
    let argseq = ast.child(reference, 1);
    if ast.is_empty(argseq) {
        let head = ast.child(ast.child(reference, 0), 0);
        if ast.kind(head) != Var {
            return None;
        }
        return Some(ast.deep_clone(head));
    }
    let last = ast.back(argseq)?;
    match ast.kind(last) {
        RefArgDot => Some(ast.deep_clone(ast.child(last, 0))),
        RefArgBrack => {
            let inner = ast.child(last, 0);
            let text = dike_ast::to_json(ast, inner);
            Some(ast.token(Var, dike_ast::strip_quotes(&text)))
        }
        _ => None,
    }
}

/// Folds raw strings into plain JSON strings.
pub fn strings() -> PassDef {
    PassDef::new(
        "strings",
        vec![Rule::new(
            &[Scalar],
            vec![t(&[RawString]).bind("raw")],
            |ast, env| {
                let raw = env.node("raw");
                let content = ast.text(raw).trim_matches('`').to_string();
                let quoted = format!("\"{}\"", content.replace('\\', "\\\\").replace('"', "\\\""));
                ast.token(JSONString, quoted)
            },
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::surface;
    use crate::reader::parse_source;
    use crate::rewrite::run_pass;
    use dike_ast::Source;

    fn lowered(source: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let src = Source::new("test.rego", source);
        let file = parse_source(&mut ast, src, File).unwrap();
        let seq = ast.node(ModuleSeq);
        ast.push_back(seq, file);
        for pass in [
            surface::modules(),
            surface::imports(),
            surface::keywords(),
            surface::lists(),
            surface::ifs(),
            surface::elses(),
            surface::rules(),
            build_calls(),
            build_refs(),
            structure(),
            strings(),
        ] {
            run_pass(&mut ast, seq, &pass).unwrap();
        }
        (ast, seq)
    }

    fn first_rule_body(ast: &Ast, seq: NodeId) -> NodeId {
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        let rule = ast.child(policy, 0);
        ast.child(rule, 1)
    }

    #[test]
    fn test_call_recognized() {
        let (ast, seq) = lowered("package p\nok { count(input.xs) > 0 }");
        let body = first_rule_body(&ast, seq);
        let literal = ast.child(body, 0);
        let expr = ast.child(literal, 0);
        let has_call = ast
            .descendants(expr)
            .iter()
            .any(|&n| ast.kind(n) == ExprCall);
        assert!(has_call);
    }

    #[test]
    fn test_ref_chain() {
        let (ast, seq) = lowered("package p\nok { input.a.b[0] == 1 }");
        let body = first_rule_body(&ast, seq);
        let refs: Vec<NodeId> = ast
            .descendants(body)
            .into_iter()
            .filter(|&n| ast.kind(n) == Ref)
            .collect();
        assert_eq!(refs.len(), 1);
        let argseq = ast.child(refs[0], 1);
        assert_eq!(ast.len(argseq), 3);
        assert_eq!(ast.kind(ast.child(argseq, 2)), RefArgBrack);
    }

    #[test]
    fn test_with_shape() {
        let (ast, seq) = lowered("package p\nok { allow with input as {\"user\": \"root\"} }");
        let body = first_rule_body(&ast, seq);
        let stmt = ast.child(body, 0);
        assert_eq!(ast.kind(stmt), LiteralWith);
        let withseq = ast.child(stmt, 1);
        let with = ast.child(withseq, 0);
        let varseq = ast.child(with, 0);
        assert_eq!(ast.text(ast.child(varseq, 0)), "input");
    }

    #[test]
    fn test_raw_string_folded() {
        let (ast, seq) = lowered("package p\nmsg = `raw`");
        let module = ast.child(seq, 0);
        let strings_found: Vec<NodeId> = ast
            .descendants(module)
            .into_iter()
            .filter(|&n| ast.kind(n) == JSONString)
            .collect();
        assert!(!strings_found.is_empty());
        assert_eq!(ast.text(strings_found[0]), "\"raw\"");
    }

    #[test]
    fn test_import_alias_derived() {
        let (ast, seq) = lowered("package p\nimport data.other.rules\nok { true }");
        let module = ast.child(seq, 0);
        let imports_seq = ast.child(module, 1);
        let import = ast.child(imports_seq, 0);
        assert_eq!(ast.kind(ast.child(import, 0)), Ref);
        assert_eq!(ast.text(ast.child(import, 2)), "rules");
    }
}
