//! Symbol-era passes: rule specialization, constant classification, formal
//! parameter normalization, and query lifting.

use dike_ast::{build, strip_quotes, to_json, Ast, NodeId, NodeKind};
use NodeKind::*;

use super::is_constant;
use crate::rewrite::{t, PassDef, Rule};

fn ref_to_dotted(ast: &Ast, reference: NodeId) -> Option<String> {
    let head = ast.child(ast.child(reference, 0), 0);
    if ast.kind(head) != Var {
        return None;
    }
    let mut name = ast.text(head).to_string();
    let argseq = ast.child(reference, 1);
    for &arg in ast.children(argseq) {
        match ast.kind(arg) {
            RefArgDot => {
                name.push('.');
                name.push_str(ast.text(ast.child(arg, 0)));
            }
            RefArgBrack => {
                let inner = ast.child(arg, 0);
                let json = to_json(ast, inner);
                name.push('.');
                name.push_str(strip_quotes(&json));
            }
            _ => return None,
        }
    }
    Some(name)
}

/// Specializes rules into `RuleComp`/`RuleFunc`/`RuleSet`/`RuleObj`, expands
/// `else` chains, introduces locals for `some` declarations and placeholders,
/// and shapes `every` statements.
#[allow(clippy::too_many_lines)]
pub fn symbols() -> PassDef {
    PassDef::new(
        "symbols",
        vec![
            // module identity: a single dotted name variable
            Rule::new(
                &[ModuleSeq],
                vec![t(&[Module])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Package)
                    .bind("module")],
                |ast, env| {
                    let module = env.node("module");
                    let package = ast.child(module, 0);
                    let reference = ast.child(package, 0);
                    let Some(name) = ref_to_dotted(ast, reference) else {
                        return ast.error(package, "Invalid package name");
                    };
                    let imports = ast.child(module, 1);
                    let policy = ast.child(module, 2);
                    for &import in ast.children(imports).to_vec().iter() {
                        if ast.kind(import) != Import {
                            continue;
                        }
                        let target = ast.child(import, 0);
                        let alias = ast.child(import, 2);
                        ast.detach(target);
                        ast.detach(alias);
                        let normalized = build!(ast, (Import @alias @target));
                        ast.push_front(policy, normalized);
                    }
                    ast.detach(policy);
                    build!(ast, (Module (Var ^ &name) @policy))
                },
            ),
            // rule specialization and else expansion
            Rule::new(
                &[Policy],
                vec![t(&[Rule]).bind("rule")],
                |ast, env| specialize_rule(ast, env.node("rule")),
            ),
            // formal parameters
            Rule::new(
                &[RuleArgs],
                vec![t(&[Term])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == Var)
                    .bind("term")],
                |ast, env| {
                    let var = ast.child(env.node("term"), 0);
                    ast.detach(var);
                    build!(ast, (ArgVar @var (Undefined)))
                },
            ),
            Rule::new(&[RuleArgs], vec![t(&[Term]).bind("term")], |ast, env| {
                let content = ast.child(env.node("term"), 0);
                ast.detach(content);
                build!(ast, (ArgVal @content))
            }),
            // object items: constant keys become symbols, the rest stay refs
            Rule::new(
                &[Object, ObjectItemSeq],
                vec![t(&[ObjectItem])
                    .guard(|ast, n| {
                        ast.kind(ast.child(n, 0)) == ObjectItemHead
                            && ast.kind(ast.child(ast.child(n, 0), 0)) == Scalar
                    })
                    .bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let head = ast.child(item, 0);
                    let scalar = ast.child(head, 0);
                    let json = to_json(ast, scalar);
                    let key = strip_quotes(&json).to_string();
                    let value = ast.child(item, 1);
                    ast.detach(value);
                    build!(ast, (ObjectItem (Key ^ &key) @value))
                },
            ),
            Rule::new(
                &[Object, ObjectItemSeq],
                vec![t(&[ObjectItem])
                    .guard(|ast, n| {
                        ast.kind(ast.child(n, 0)) == ObjectItemHead
                            && matches!(
                                ast.kind(ast.child(ast.child(n, 0), 0)),
                                Var | Ref
                            )
                    })
                    .bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let head = ast.child(item, 0);
                    let key = ast.child(head, 0);
                    let value = ast.child(item, 1);
                    ast.detach(key);
                    ast.detach(value);
                    build!(ast, (RefObjectItem (RefTerm @key) @value))
                },
            ),
            // reference and number terms
            Rule::new(
                &[Expr],
                vec![t(&[Term])
                    .guard(|ast, n| matches!(ast.kind(ast.child(n, 0)), Ref | Var))
                    .bind("term")],
                |ast, env| {
                    let inner = ast.child(env.node("term"), 0);
                    ast.detach(inner);
                    build!(ast, (RefTerm @inner))
                },
            ),
            Rule::new(
                &[Expr],
                vec![t(&[Term])
                    .guard(|ast, n| {
                        ast.kind(ast.child(n, 0)) == Scalar
                            && matches!(
                                ast.kind(ast.child(ast.child(n, 0), 0)),
                                JSONInt | JSONFloat
                            )
                    })
                    .bind("term")],
                |ast, env| {
                    let token = ast.child(ast.child(env.node("term"), 0), 0);
                    ast.detach(token);
                    build!(ast, (NumTerm @token))
                },
            ),
            Rule::new(&[RefArgBrack], vec![t(&[Var]).bind("var")], |ast, env| {
                let var = env.node("var");
                ast.detach(var);
                build!(ast, (RefTerm @var))
            }),
            // placeholders become fresh locals
            Rule::new(
                &[RefArgBrack, Expr],
                vec![t(&[Placeholder])],
                |ast, _| {
                    let name = ast.fresh("");
                    let name_text = name.view().to_string();
                    build!(
                        ast,
                        (Seq
                            (Lift (UnifyBody) (Local (Var ^ &name_text) (Undefined)))
                            (RefTerm (Var ^ &name_text)))
                    )
                },
            ),
            // some declarations
            Rule::new(
                &[UnifyBody],
                vec![t(&[Literal])
                    .guard(|ast, n| {
                        let decl = ast.child(n, 0);
                        ast.kind(decl) == SomeDecl
                            && ast.kind(ast.child(ast.child(decl, 1), 0)) == Undefined
                    })
                    .bind("literal")],
                |ast, env| {
                    let decl = ast.child(env.node("literal"), 0);
                    let varseq = ast.child(decl, 0);
                    let seq = ast.node(Seq);
                    for &var in ast.children(varseq).to_vec().iter() {
                        ast.detach(var);
                        let local = build!(ast, (Local @var (Undefined)));
                        ast.push_back(seq, local);
                    }
                    seq
                },
            ),
            Rule::new(
                &[UnifyBody],
                vec![t(&[Literal])
                    .guard(|ast, n| {
                        let decl = ast.child(n, 0);
                        ast.kind(decl) == SomeDecl
                            && ast.kind(ast.child(ast.child(decl, 1), 0)) == Expr
                    })
                    .bind("literal")],
                |ast, env| {
                    let decl = ast.child(env.node("literal"), 0);
                    let varseq = ast.child(decl, 0);
                    let domain = ast.child(ast.child(decl, 1), 0);
                    let seq = ast.node(Seq);
                    for &var in ast.children(varseq).to_vec().iter() {
                        let var = ast.deep_clone(var);
                        let local = build!(ast, (Local @var (Undefined)));
                        ast.push_back(seq, local);
                    }
                    ast.detach(varseq);
                    ast.detach(domain);
                    let literal_enum = build!(ast, (LiteralEnum @varseq @domain));
                    ast.push_back(seq, literal_enum);
                    seq
                },
            ),
            // every: enumerate the domain and nest the body
            Rule::new(
                &[Expr],
                vec![t(&[ExprEvery])
                    .guard(|ast, n| ast.len(n) == 3)
                    .bind("every")],
                |ast, env| structure_every(ast, env.node("every")),
            ),
            // the query becomes a rule body
            Rule::new(
                &[Rego],
                vec![t(&[Query])
                    .guard(|ast, n| {
                        !ast.is_empty(n) && ast.kind(ast.child(n, 0)) != UnifyBody
                    })
                    .bind("query")],
                |ast, env| {
                    let query = env.node("query");
                    let literals: Vec<NodeId> = ast.children(query).to_vec();
                    for &literal in &literals {
                        ast.detach(literal);
                    }
                    build!(ast, (Query (UnifyBody @@literals)))
                },
            ),
            // errors
            Rule::new(
                &[ObjectItem],
                vec![t(&[ObjectItemHead]).bind("head")],
                |ast, env| ast.error(env.node("head"), "Invalid object key"),
            ),
        ],
    )
    .with_post(assign_rule_indices)
}

fn specialize_rule(ast: &mut Ast, rule: NodeId) -> NodeId {
    let head = ast.child(rule, 0);
    let var = ast.child(head, 0);
    let head_type = ast.child(head, 1);
    let body = ast.child(rule, 1);
    let seq = ast.node(Seq);
    match ast.kind(head_type) {
        RuleHeadComp => {
            let value = ast.child(head_type, 1);
            let var = ast.deep_clone(var);
            ast.detach(body);
            ast.detach(value);
            let comp = build!(ast, (RuleComp @var @body @value (JSONInt ^ "0")));
            ast.push_back(seq, comp);
            expand_elses(ast, seq, rule, None);
        }
        RuleHeadFunc => {
            let args = ast.child(head_type, 0);
            let value = ast.child(head_type, 2);
            let var = ast.deep_clone(var);
            ast.detach(args);
            ast.detach(body);
            ast.detach(value);
            let func = build!(ast, (RuleFunc @var @args @body @value (JSONInt ^ "0")));
            ast.push_back(seq, func);
            expand_elses(ast, seq, rule, Some(args));
        }
        RuleHeadSet => {
            // the element expression becomes a one-element set value
            let element = ast.child(head_type, 0);
            let var = ast.deep_clone(var);
            ast.detach(body);
            ast.detach(element);
            let set_rule = build!(
                ast,
                (RuleSet @var @body (Expr (Term (Set @element))))
            );
            ast.push_back(seq, set_rule);
        }
        RuleHeadObj => {
            let key = ast.child(head_type, 0);
            let value = ast.child(head_type, 2);
            let var = ast.deep_clone(var);
            ast.detach(body);
            ast.detach(key);
            ast.detach(value);
            let key_item = object_rule_item(ast, key, value);
            let obj_rule = build!(
                ast,
                (RuleObj @var @body (Expr (Term (Object @key_item))))
            );
            ast.push_back(seq, obj_rule);
        }
        _ => return ast.error(rule, "Invalid rule"),
    }
    seq
}

/// A key/value pair for an object-generating rule. Constant string keys
/// become symbols directly; everything else resolves at evaluation time.
fn object_rule_item(ast: &mut Ast, key: NodeId, value: NodeId) -> NodeId {
    let key_children: Vec<NodeId> = ast.children(key).to_vec();
    match key_children.as_slice() {
        [single] if ast.kind(*single) == Term && ast.kind(ast.child(*single, 0)) == Scalar => {
            let json = to_json(ast, *single);
            let text = strip_quotes(&json).to_string();
            build!(ast, (ObjectItem (Key ^ &text) @value))
        }
        [single]
            if ast.kind(*single) == Term
                && matches!(ast.kind(ast.child(*single, 0)), Var | Ref) =>
        {
            let inner = ast.child(*single, 0);
            ast.detach(inner);
            build!(ast, (RefObjectItem (RefTerm @inner) @value))
        }
        [single] if ast.kind(*single) == RefTerm => {
            let single = *single;
            ast.detach(single);
            build!(ast, (RefObjectItem @single @value))
        }
        _ => ast.error(key, "Invalid object key"),
    }
}

fn expand_elses(ast: &mut Ast, seq: NodeId, rule: NodeId, args: Option<NodeId>) {
    let head = ast.child(rule, 0);
    let var = ast.child(head, 0);
    let elseseq = ast.child(rule, 2);
    for &branch in ast.children(elseseq).to_vec().iter() {
        let value = ast.child(branch, 0);
        let body = ast.child(branch, 1);
        let var = ast.deep_clone(var);
        ast.detach(body);
        let value = match ast.kind(value) {
            Undefined => build!(ast, (Expr (Term (Scalar (JSONTrue ^ "true"))))),
            _ => {
                ast.detach(value);
                value
            }
        };
        let rule_node = match args {
            Some(args) => {
                let args = ast.deep_clone(args);
                build!(ast, (RuleFunc @var @args @body @value (JSONInt ^ "0")))
            }
            None => build!(ast, (RuleComp @var @body @value (JSONInt ^ "0"))),
        };
        ast.push_back(seq, rule_node);
    }
}

/// Shapes `every k, v in domain { body }`: the domain is enumerated into a
/// fresh item variable, the bound variables get internal names declared in
/// the enclosing body, and the nested body is keyed for the unifier.
fn structure_every(ast: &mut Ast, every: NodeId) -> NodeId {
    let varseq = ast.child(every, 0);
    let body = ast.child(every, 1);
    let domain = ast.child(ast.child(every, 2), 0);
    if ast.kind(domain) != Expr {
        return ast.error(every, "Invalid every sequence");
    }
    let item_loc = ast.fresh("everyitem");
    let item_name = item_loc.view().to_string();
    let lift = build!(
        ast,
        (Lift (UnifyBody)
            (Local (Var ^ &item_name) (Undefined)))
    );
    let new_varseq = build!(ast, (VarSeq (Var ^ &item_name)));
    for &var in ast.children(varseq).to_vec().iter() {
        let original = ast.text(var).to_string();
        let renamed_loc = ast.fresh("every");
        let renamed = renamed_loc.view().to_string();
        super::rename_vars(ast, body, &original, &renamed);
        let renamed_var = ast.token(Var, &renamed);
        ast.push_back(new_varseq, renamed_var);
        let local = build!(ast, (Local (Var ^ &renamed) (Undefined)));
        ast.push_back(lift, local);
    }
    ast.detach(domain);
    ast.detach(body);
    let enumerate_stmt = build!(
        ast,
        (Literal
            (Expr
                (RefTerm (Var ^ &item_name))
                (Unify)
                (Enumerate @domain)))
    );
    ast.push_back(lift, enumerate_stmt);
    let key = ast.fresh("everybody");
    let key_text = key.view().to_string();
    build!(
        ast,
        (Seq
            @lift
            (ExprEvery @new_varseq (NestedBody (Key ^ &key_text) @body)))
    )
}

/// Renumbers same-named rules in document order so rank selection follows
/// declaration (and `else`) order.
fn assign_rule_indices(ast: &mut Ast, root: NodeId) {
    let modules: Vec<NodeId> = ast
        .descendants(root)
        .into_iter()
        .filter(|&n| ast.kind(n) == Module)
        .collect();
    for module in modules {
        let mut counters: std::collections::HashMap<String, i64> =
            std::collections::HashMap::new();
        for &child in ast.children(module).to_vec().iter() {
            if ast.kind(child) != Policy {
                continue;
            }
            for &rule in ast.children(child).to_vec().iter() {
                let index_child = match ast.kind(rule) {
                    RuleComp => 3,
                    RuleFunc => 4,
                    _ => continue,
                };
                let name = ast.text(ast.child(rule, 0)).to_string();
                let counter = counters.entry(name).or_insert(0);
                let token = ast.token(JSONInt, counter.to_string());
                ast.set_child(rule, index_child, token);
                *counter += 1;
            }
        }
    }
}

/// Replaces constant formal parameters with fresh variables guarded by a
/// structural match in the rule body.
pub fn replace_argvals() -> PassDef {
    PassDef::new(
        "replace_argvals",
        vec![Rule::new(
            &[Policy],
            vec![t(&[RuleFunc])
                .guard(|ast, n| {
                    let args = ast.child(n, 1);
                    ast.children(args).iter().any(|&a| ast.kind(a) == ArgVal)
                })
                .bind("func")],
            |ast, env| {
                let func = env.node("func");
                let args = ast.child(func, 1);
                let mut guards = Vec::new();
                for &arg in ast.children(args).to_vec().iter() {
                    if ast.kind(arg) != ArgVal {
                        continue;
                    }
                    let name = ast.fresh("arg");
                    let name_text = name.view().to_string();
                    let content = ast.child(arg, 0);
                    ast.detach(content);
                    let guard = build!(
                        ast,
                        (Literal
                            (Expr
                                (RefTerm (Var ^ &name_text))
                                (Unify)
                                (Term @content)))
                    );
                    guards.push(guard);
                    let replacement = build!(ast, (ArgVar (Var ^ &name_text) (Undefined)));
                    ast.replace_child(args, arg, replacement);
                }
                let body = ast.child(func, 2);
                if ast.kind(body) == Empty {
                    let new_body = ast.node(UnifyBody);
                    for guard in guards {
                        ast.push_back(new_body, guard);
                    }
                    ast.set_child(func, 2, new_body);
                } else {
                    for guard in guards {
                        ast.push_front(body, guard);
                    }
                }
                ast.detach(func);
                func
            },
        )],
    )
}

/// Moves the query body into a synthetic rule and points the query at it.
pub fn lift_query() -> PassDef {
    PassDef::new(
        "lift_query",
        vec![Rule::new(
            &[Rego],
            vec![
                t(&[Query])
                    .guard(|ast, n| {
                        ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == UnifyBody
                    })
                    .bind("query"),
                t(&[Input]).bind("input"),
                t(&[Data]).bind("data"),
                t(&[ModuleSeq]).bind("modules"),
            ],
            |ast, env| {
                let query = env.node("query");
                let input = env.node("input");
                let data = env.node("data");
                let modules = env.node("modules");
                let body = ast.child(query, 0);
                wrap_query_values(ast, body);
                ast.detach(body);
                let module = build!(
                    ast,
                    (Module (Var ^ "query$module")
                        (Policy
                            (RuleComp (Var ^ "query$0") (Empty) @body (JSONInt ^ "0"))))
                );
                ast.detach(input);
                ast.detach(data);
                ast.detach(modules);
                ast.push_back(modules, module);
                build!(
                    ast,
                    (Seq
                        (Query (VarSeq (Var ^ "data") (Var ^ "query$module") (Var ^ "query$0")))
                        @input
                        @data
                        @modules)
                )
            },
        )],
    )
}

/// Wraps anonymous query expressions so their results surface as `value$`
/// terms.
fn wrap_query_values(ast: &mut Ast, body: NodeId) {
    let statements: Vec<NodeId> = ast.children(body).to_vec();
    for stmt in statements {
        match ast.kind(stmt) {
            Literal => wrap_query_literal(ast, body, stmt),
            LiteralWith => {
                let inner = ast.child(stmt, 0);
                for &literal in ast.children(inner).to_vec().iter() {
                    if ast.kind(literal) == Literal {
                        wrap_query_literal(ast, body, literal);
                    }
                }
            }
            _ => {}
        }
    }
}

fn wrap_query_literal(ast: &mut Ast, body: NodeId, literal: NodeId) {
    let expr = ast.child(literal, 0);
    if ast.kind(expr) != Expr {
        return;
    }
    let has_assignment = ast
        .children(expr)
        .iter()
        .any(|&c| matches!(ast.kind(c), Assign | Unify));
    if has_assignment {
        return;
    }
    let name = ast.fresh("value");
    let name_text = name.view().to_string();
    let parent = ast.parent(literal).expect("attached");
    let tokens: Vec<NodeId> = ast.children(expr).to_vec();
    for &token in &tokens {
        ast.detach(token);
    }
    let wrapped = build!(
        ast,
        (Literal
            (Expr (RefTerm (Var ^ &name_text)) (Unify) @@tokens))
    );
    ast.replace_child(parent, literal, wrapped);
    let local = build!(ast, (Local (Var ^ &name_text) (Undefined)));
    ast.push_front(body, local);
}

/// Classifies rule values: fully constant values become `DataTerm`s, the rest
/// become value bodies binding a `value$` local.
pub fn constants() -> PassDef {
    PassDef::new(
        "constants",
        vec![
            Rule::new(
                &[RuleComp, RuleFunc, RuleSet, RuleObj],
                vec![t(&[Expr])
                    .guard(|ast, n| {
                        ast.len(n) == 1
                            && matches!(ast.kind(ast.child(n, 0)), Term | NumTerm)
                            && is_constant(ast, n)
                    })
                    .bind("expr")],
                |ast, env| {
                    let expr = env.node("expr");
                    let inner = ast.child(expr, 0);
                    match ast.kind(inner) {
                        NumTerm => {
                            let token = ast.child(inner, 0);
                            ast.detach(token);
                            build!(ast, (DataTerm (Scalar @token)))
                        }
                        _ => {
                            let content = ast.child(inner, 0);
                            ast.detach(content);
                            build!(ast, (DataTerm @content))
                        }
                    }
                },
            ),
            Rule::new(
                &[RuleComp, RuleFunc, RuleSet, RuleObj],
                vec![t(&[Expr]).bind("expr")],
                |ast, env| {
                    let expr = env.node("expr");
                    let name = ast.fresh("value");
                    let name_text = name.view().to_string();
                    let tokens: Vec<NodeId> = ast.children(expr).to_vec();
                    for &token in &tokens {
                        ast.detach(token);
                    }
                    build!(
                        ast,
                        (UnifyBody
                            (Local (Var ^ &name_text) (Undefined))
                            (Literal
                                (Expr (RefTerm (Var ^ &name_text)) (Unify) @@tokens)))
                    )
                },
            ),
            Rule::new(
                &[DefaultRule],
                vec![t(&[Term]).guard(is_constant).bind("term")],
                |ast, env| {
                    let content = ast.child(env.node("term"), 0);
                    ast.detach(content);
                    build!(ast, (DataTerm @content))
                },
            ),
            Rule::new(&[DefaultRule], vec![t(&[Term]).bind("term")], |ast, env| {
                ast.error(env.node("term"), "Default rule values must be constant")
            }),
            // recursive data conversions
            Rule::new(&[DataTerm], vec![t(&[Array]).bind("node")], |ast, env| {
                let node = env.node("node");
                let children: Vec<NodeId> = ast.children(node).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (DataArray @@children))
            }),
            Rule::new(&[DataTerm], vec![t(&[Set]).bind("node")], |ast, env| {
                let node = env.node("node");
                let children: Vec<NodeId> = ast.children(node).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (DataSet @@children))
            }),
            Rule::new(&[DataTerm], vec![t(&[Object]).bind("node")], |ast, env| {
                let node = env.node("node");
                let children: Vec<NodeId> = ast.children(node).to_vec();
                for &child in &children {
                    ast.detach(child);
                }
                build!(ast, (DataObject @@children))
            }),
            Rule::new(
                &[DataArray, DataSet],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == Term)
                    .bind("expr")],
                |ast, env| {
                    let content = ast.child(ast.child(env.node("expr"), 0), 0);
                    ast.detach(content);
                    build!(ast, (DataTerm @content))
                },
            ),
            Rule::new(
                &[DataArray, DataSet],
                vec![t(&[Expr])
                    .guard(|ast, n| ast.len(n) == 1 && ast.kind(ast.child(n, 0)) == NumTerm)
                    .bind("expr")],
                |ast, env| {
                    let token = ast.child(ast.child(env.node("expr"), 0), 0);
                    ast.detach(token);
                    build!(ast, (DataTerm (Scalar @token)))
                },
            ),
            Rule::new(
                &[DataObject],
                vec![t(&[ObjectItem]).bind("item")],
                |ast, env| {
                    let item = env.node("item");
                    let key = ast.child(item, 0);
                    let expr = ast.child(item, 1);
                    let inner = ast.child(expr, 0);
                    ast.detach(key);
                    match ast.kind(inner) {
                        Term => {
                            let content = ast.child(inner, 0);
                            ast.detach(content);
                            build!(ast, (DataItem @key (DataTerm @content)))
                        }
                        NumTerm => {
                            let token = ast.child(inner, 0);
                            ast.detach(token);
                            build!(ast, (DataItem @key (DataTerm (Scalar @token))))
                        }
                        _ => ast.error(item, "Invalid constant object"),
                    }
                },
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{refs, surface};
    use crate::reader::parse_source;
    use crate::rewrite::run_pass;
    use dike_ast::Source;

    fn to_symbols(source: &str, query: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let src = Source::new("test.rego", source);
        let file = parse_source(&mut ast, src, File).unwrap();
        let query_src = Source::new("query", query);
        let query_node = parse_source(&mut ast, query_src, Query).unwrap();
        let rego = build!(
            ast,
            (Top (Rego
                @query_node
                (Input (Var ^ "input") (Undefined))
                (DataSeq)
                (ModuleSeq @file)))
        );
        for pass in [
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
            super::super::data::merge_data(),
            symbols(),
        ] {
            run_pass(&mut ast, rego, &pass).unwrap();
        }
        (ast, rego)
    }

    fn module_of(ast: &Ast, root: NodeId) -> NodeId {
        let rego = ast.child(root, 0);
        let moduleseq = ast.child(rego, 3);
        ast.child(moduleseq, 0)
    }

    #[test]
    fn test_rule_specialization() {
        let (ast, root) = to_symbols(
            "package p\nallow = true\nf(x) = 1 { x > 0 }\ns contains 3 { true }",
            "data.p.allow",
        );
        let module = module_of(&ast, root);
        assert_eq!(ast.text(ast.child(module, 0)), "p");
        let policy = ast.child(module, 1);
        let kinds: Vec<NodeKind> = ast.children(policy).iter().map(|&c| ast.kind(c)).collect();
        assert!(kinds.contains(&RuleComp));
        assert!(kinds.contains(&RuleFunc));
        assert!(kinds.contains(&RuleSet));
    }

    #[test]
    fn test_else_expansion_orders_indices() {
        let (ast, root) = to_symbols("package p\np = 1 { q } else = 2 { r }", "data.p.p");
        let module = module_of(&ast, root);
        let policy = ast.child(module, 1);
        let comps: Vec<NodeId> = ast
            .children(policy)
            .iter()
            .copied()
            .filter(|&c| ast.kind(c) == RuleComp)
            .collect();
        assert_eq!(comps.len(), 2);
        assert_eq!(ast.text(ast.child(comps[0], 3)), "0");
        assert_eq!(ast.text(ast.child(comps[1], 3)), "1");
    }

    #[test]
    fn test_some_becomes_locals() {
        let (ast, root) = to_symbols("package p\nok { some x; x = 1 }", "data.p.ok");
        let module = module_of(&ast, root);
        let locals: Vec<NodeId> = ast
            .descendants(module)
            .into_iter()
            .filter(|&n| ast.kind(n) == Local)
            .collect();
        assert!(!locals.is_empty());
    }

    #[test]
    fn test_every_gets_enumerate() {
        let (ast, root) = to_symbols("package p\nok { every x in input.xs { x > 0 } }", "data.p.ok");
        let module = module_of(&ast, root);
        let enums: Vec<NodeId> = ast
            .descendants(module)
            .into_iter()
            .filter(|&n| ast.kind(n) == Enumerate)
            .collect();
        assert_eq!(enums.len(), 1);
        let everys: Vec<NodeId> = ast
            .descendants(module)
            .into_iter()
            .filter(|&n| ast.kind(n) == ExprEvery)
            .collect();
        assert_eq!(ast.len(everys[0]), 2);
        assert_eq!(ast.kind(ast.child(everys[0], 1)), NestedBody);
    }

    #[test]
    fn test_constants_classify() {
        let (mut ast, root) = to_symbols(
            "package p\npi = 3\ndynamic = input.x\ndefault d = input.y",
            "data.p.pi",
        );
        run_pass(&mut ast, root, &replace_argvals()).unwrap();
        run_pass(&mut ast, root, &lift_query()).unwrap();
        run_pass(&mut ast, root, &constants()).unwrap();
        let module = module_of(&ast, root);
        let policy = ast.child(module, 1);
        let comps: Vec<NodeId> = ast
            .children(policy)
            .iter()
            .copied()
            .filter(|&c| ast.kind(c) == RuleComp)
            .collect();
        // pi is constant, dynamic needs a value body
        assert_eq!(ast.kind(ast.child(comps[0], 2)), DataTerm);
        assert_eq!(ast.kind(ast.child(comps[1], 2)), UnifyBody);
        // a non-constant default is a static error
        assert!(ast.has_error(root));
    }

    #[test]
    fn test_lift_query_builds_synthetic_rule() {
        let (mut ast, root) = to_symbols("package p\nmsg = 1", "data.p.msg");
        run_pass(&mut ast, root, &replace_argvals()).unwrap();
        run_pass(&mut ast, root, &lift_query()).unwrap();
        let rego = ast.child(root, 0);
        let query = ast.child(rego, 0);
        assert_eq!(ast.kind(ast.child(query, 0)), VarSeq);
        let moduleseq = ast.child(rego, 3);
        assert_eq!(ast.len(moduleseq), 2);
        let synthetic = ast.child(moduleseq, 1);
        assert_eq!(ast.text(ast.child(synthetic, 0)), "query$module");
    }
}
