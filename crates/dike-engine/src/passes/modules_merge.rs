//! Module resolution passes: absolute references, module merging into the
//! data tree, and the skip table that enables late binding through `with`.

use std::collections::BTreeMap;

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::builtins::BuiltIns;
use crate::rewrite::{t, PassDef, Rule};

const RULE_KINDS: &[NodeKind] = &[RuleComp, RuleFunc, RuleSet, RuleObj, DefaultRule];

fn rule_definition(ast: &Ast, var: NodeId) -> Option<NodeId> {
    let defs = ast.lookup(var);
    defs.first()
        .copied()
        .filter(|&d| RULE_KINDS.contains(&ast.kind(d)))
}

fn import_definition(ast: &Ast, var: NodeId) -> Option<NodeId> {
    let defs = ast.lookup(var);
    defs.first().copied().filter(|&d| ast.kind(d) == Import)
}

/// Package segments of the module enclosing `node`, i.e. the prefix a bare
/// rule reference needs to become absolute.
fn enclosing_package(ast: &Ast, node: NodeId) -> Option<Vec<String>> {
    let mut current = ast.parent(node);
    while let Some(n) = current {
        if ast.kind(n) == Module && ast.len(n) == 2 && ast.kind(ast.child(n, 0)) == Var {
            let name = ast.text(ast.child(n, 0));
            return Some(name.split('.').map(str::to_string).collect());
        }
        current = ast.parent(n);
    }
    None
}

fn absolute_ref(ast: &mut Ast, segments: &[String], name: &str, rest: Vec<NodeId>) -> NodeId {
    let argseq = ast.node(RefArgSeq);
    for segment in segments {
        let arg = build!(ast, (RefArgDot (Var ^ segment)));
        ast.push_back(argseq, arg);
    }
    let arg = build!(ast, (RefArgDot (Var ^ name)));
    ast.push_back(argseq, arg);
    for node in rest {
        ast.push_back(argseq, node);
    }
    build!(ast, (RefTerm (Ref (RefHead (Var ^ "data")) @argseq)))
}

/// Segments of an import target like `data.foo.bar`.
fn import_segments(ast: &Ast, import: NodeId) -> Option<Vec<String>> {
    let reference = ast.child(import, 1);
    let head = ast.child(ast.child(reference, 0), 0);
    if ast.kind(head) != Var {
        return None;
    }
    let mut segments = vec![ast.text(head).to_string()];
    for &arg in ast.children(ast.child(reference, 1)) {
        if ast.kind(arg) != RefArgDot {
            return None;
        }
        segments.push(ast.text(ast.child(arg, 0)).to_string());
    }
    Some(segments)
}

/// Resolves bare rule names and import aliases to absolute `data` paths.
pub fn absolute_refs() -> PassDef {
    PassDef::new(
        "absolute_refs",
        vec![
            Rule::any(
                vec![t(&[RefTerm])
                    .guard(|ast, n| {
                        let head = ast.child(n, 0);
                        ast.kind(head) == Var && rule_definition(ast, head).is_some()
                    })
                    .bind("ref")],
                |ast, env| {
                    let head = ast.child(env.node("ref"), 0);
                    let name = ast.text(head).to_string();
                    let Some(segments) = enclosing_package(ast, head) else {
                        return ast.error(head, "Reference outside any module");
                    };
                    absolute_ref(ast, &segments, &name, Vec::new())
                },
            ),
            Rule::any(
                vec![t(&[RefTerm])
                    .guard(|ast, n| {
                        let head = ast.child(n, 0);
                        if ast.kind(head) != Ref {
                            return false;
                        }
                        let var = ast.child(ast.child(head, 0), 0);
                        ast.kind(var) == Var
                            && (rule_definition(ast, var).is_some()
                                || import_definition(ast, var).is_some())
                    })
                    .bind("ref")],
                |ast, env| {
                    let reference = ast.child(env.node("ref"), 0);
                    let var = ast.child(ast.child(reference, 0), 0);
                    let rest: Vec<NodeId> = ast.children(ast.child(reference, 1)).to_vec();
                    for &arg in &rest {
                        ast.detach(arg);
                    }
                    if let Some(import) = import_definition(ast, var) {
                        let Some(segments) = import_segments(ast, import) else {
                            return ast.error(var, "Invalid import reference");
                        };
                        if segments.first().map(String::as_str) != Some("data") {
                            return ast.error(var, "Invalid import reference");
                        }
                        let middle = &segments[1..];
                        return match middle.split_last() {
                            Some((name, prefix)) => {
                                let prefix = prefix.to_vec();
                                absolute_ref(ast, &prefix, &name.clone(), rest)
                            }
                            None => {
                                // `import data as d`: the alias is the root
                                let argseq = ast.node(RefArgSeq);
                                for node in rest {
                                    ast.push_back(argseq, node);
                                }
                                build!(
                                    ast,
                                    (RefTerm (Ref (RefHead (Var ^ "data")) @argseq))
                                )
                            }
                        };
                    }
                    let name = ast.text(var).to_string();
                    let Some(segments) = enclosing_package(ast, var) else {
                        return ast.error(var, "Reference outside any module");
                    };
                    absolute_ref(ast, &segments, &name, rest)
                },
            ),
            Rule::any(
                vec![t(&[ExprCall])
                    .guard(|ast, n| {
                        let varseq = ast.child(n, 0);
                        if ast.kind(varseq) != VarSeq {
                            return false;
                        }
                        let head = ast.child(varseq, 0);
                        (ast.len(varseq) == 1 && rule_definition(ast, head).is_some())
                            || import_definition(ast, head).is_some()
                    })
                    .bind("call")],
                |ast, env| {
                    let call = env.node("call");
                    let varseq = ast.child(call, 0);
                    let head = ast.child(varseq, 0);
                    let prefix = if let Some(import) = import_definition(ast, head) {
                        // replace the alias segment with the import target
                        let Some(segments) = import_segments(ast, import) else {
                            return ast.error(head, "Invalid import reference");
                        };
                        ast.detach(head);
                        segments
                    } else {
                        // qualify a sibling rule with its own package
                        let Some(package) = enclosing_package(ast, head) else {
                            return ast.error(head, "Reference outside any module");
                        };
                        let mut segments = vec!["data".to_string()];
                        segments.extend(package);
                        segments
                    };
                    let mut position = 0;
                    for segment in prefix {
                        let var = ast.token(Var, segment);
                        ast.insert_child(varseq, position, var);
                        position += 1;
                    }
                    ast.detach(call);
                    call
                },
            ),
        ],
    )
}

/// Dissolves the module sequence into the data tree, nesting packages as
/// submodules.
pub fn merge_modules() -> PassDef {
    #[derive(Default)]
    struct PackageTree {
        rules: Vec<NodeId>,
        children: BTreeMap<String, PackageTree>,
    }

    fn materialize(ast: &mut Ast, tree: PackageTree) -> NodeId {
        let module = ast.node(Module);
        for rule in tree.rules {
            ast.push_back(module, rule);
        }
        for (name, child) in tree.children {
            let child_module = materialize(ast, child);
            let submodule = build!(ast, (Submodule (Key ^ &name) @child_module));
            ast.push_back(module, submodule);
        }
        module
    }

    PassDef::new(
        "merge_modules",
        vec![Rule::new(
            &[Rego],
            vec![
                t(&[Query]).bind("query"),
                t(&[Input]).bind("input"),
                t(&[Data]).bind("data"),
                t(&[ModuleSeq]).bind("modules"),
            ],
            |ast, env| {
                let query = env.node("query");
                let input = env.node("input");
                let data = env.node("data");
                let modules = env.node("modules");
                let mut root = PackageTree::default();
                for &module in ast.children(modules).to_vec().iter() {
                    let name = ast.text(ast.child(module, 0)).to_string();
                    let policy = ast.child(module, 1);
                    let mut node = &mut root;
                    for segment in name.split('.') {
                        node = node.children.entry(segment.to_string()).or_default();
                    }
                    for &rule in ast.children(policy).to_vec().iter() {
                        // imports have served their purpose during reference
                        // resolution
                        if matches!(ast.kind(rule), Import | Keyword) {
                            continue;
                        }
                        ast.detach(rule);
                        node.rules.push(rule);
                    }
                }
                let item_seq = ast.child(data, 1);
                for (name, tree) in root.children {
                    let module = materialize(ast, tree);
                    let item = build!(ast, (DataItem (Key ^ &name) @module));
                    ast.push_back(item_seq, item);
                }
                for node in [query, input, data] {
                    ast.detach(node);
                }
                build!(ast, (Seq @query @input @data))
            },
        )],
    )
}

/// How a static dotted path resolves.
enum SkipTarget {
    Rules(usize),
    Document(usize),
    Missing,
}

fn classify_path(ast: &Ast, rego: NodeId, head: &str, segments: &[String]) -> SkipTarget {
    let root = match head {
        "data" => ast.child(rego, 2),
        _ => ast.child(rego, 1),
    };
    let mut current = root;
    let mut in_document = head == "input";
    for (index, segment) in segments.iter().enumerate() {
        if in_document {
            continue;
        }
        let defs = ast.lookdown(current, segment);
        let Some(&def) = defs.first() else {
            return if head == "input" {
                SkipTarget::Document(segments.len())
            } else {
                SkipTarget::Missing
            };
        };
        match ast.kind(def) {
            DataItem | Submodule => {
                let value = ast.child(def, 1);
                if ast.kind(value) == Module {
                    current = value;
                } else {
                    in_document = true;
                }
            }
            kind if RULE_KINDS.contains(&kind) => {
                return SkipTarget::Rules(index + 1);
            }
            _ => return SkipTarget::Missing,
        }
    }
    if in_document || head == "input" {
        SkipTarget::Document(segments.len())
    } else {
        // the path names a module itself
        SkipTarget::Rules(segments.len())
    }
}

fn find_rego(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let mut current = Some(node);
    while let Some(n) = current {
        if ast.kind(n) == Rego {
            return Some(n);
        }
        current = ast.parent(n);
    }
    None
}

fn static_segment(ast: &Ast, arg: NodeId) -> Option<String> {
    match ast.kind(arg) {
        RefArgDot => Some(ast.text(ast.child(arg, 0)).to_string()),
        RefArgBrack => {
            let inner = ast.child(arg, 0);
            if ast.kind(inner) == Scalar && ast.kind(ast.child(inner, 0)) == JSONString {
                let json = dike_ast::to_json(ast, inner);
                Some(dike_ast::strip_quotes(&json).to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn varseq_of(ast: &mut Ast, head: &str, segments: &[String]) -> NodeId {
    let varseq = ast.node(VarSeq);
    let head_var = ast.token(Var, head);
    ast.push_back(varseq, head_var);
    for segment in segments {
        let var = ast.token(Var, segment);
        ast.push_back(varseq, var);
    }
    varseq
}

/// Collapses static `data`/`input` paths into single path-named variables
/// backed by `Skip` records, and resolves call targets to builtin hooks or
/// rule references.
pub fn skips(builtins: BuiltIns) -> PassDef {
    let call_builtins = builtins;
    PassDef::new(
        "skips",
        vec![
            Rule::any(
                vec![t(&[RefTerm])
                    .guard(|ast, n| {
                        let head = ast.child(n, 0);
                        if ast.kind(head) != Ref {
                            return false;
                        }
                        let var = ast.child(ast.child(head, 0), 0);
                        if ast.kind(var) != Var
                            || !matches!(ast.text(var), "data" | "input")
                        {
                            return false;
                        }
                        let argseq = ast.child(head, 1);
                        ast.front(argseq)
                            .is_some_and(|first| static_segment(ast, first).is_some())
                    })
                    .bind("ref")],
                |ast, env| {
                    let refterm = env.node("ref");
                    let reference = ast.child(refterm, 0);
                    let head_var = ast.child(ast.child(reference, 0), 0);
                    let head = ast.text(head_var).to_string();
                    let argseq = ast.child(reference, 1);
                    let args: Vec<NodeId> = ast.children(argseq).to_vec();
                    let mut segments = Vec::new();
                    let mut consumed = 0;
                    for &arg in &args {
                        match static_segment(ast, arg) {
                            Some(segment) => {
                                segments.push(segment);
                                consumed += 1;
                            }
                            None => break,
                        }
                    }
                    let Some(rego) = find_rego(ast, refterm) else {
                        return ast.error(refterm, "Reference outside the policy tree");
                    };
                    let (static_len, target) =
                        match classify_path(ast, rego, &head, &segments) {
                            SkipTarget::Rules(len) => {
                                let varseq = varseq_of(ast, &head, &segments[..len]);
                                (len, build!(ast, (RuleRef @varseq)))
                            }
                            SkipTarget::Document(len) => {
                                (len, varseq_of(ast, &head, &segments[..len]))
                            }
                            SkipTarget::Missing => (consumed, ast.node(Undefined)),
                        };
                    let path = std::iter::once(head.as_str())
                        .chain(segments[..static_len].iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join(".");
                    let skip = build!(ast, (Lift (Rego) (Skip (Key ^ &path) @target)));
                    let remaining: Vec<NodeId> = args[static_len..].to_vec();
                    for &arg in &remaining {
                        ast.detach(arg);
                    }
                    let replacement = if remaining.is_empty() {
                        build!(ast, (RefTerm (Var ^ &path)))
                    } else {
                        build!(
                            ast,
                            (RefTerm
                                (Ref (RefHead (Var ^ &path)) (RefArgSeq @@remaining)))
                        )
                    };
                    build!(ast, (Seq @skip @replacement))
                },
            ),
            Rule::any(
                vec![t(&[ExprCall])
                    .guard(|ast, n| ast.kind(ast.child(n, 0)) == VarSeq)
                    .bind("call")],
                move |ast, env| {
                    let call = env.node("call");
                    let varseq = ast.child(call, 0);
                    let vars: Vec<String> = ast
                        .children(varseq)
                        .iter()
                        .map(|&v| ast.text(v).to_string())
                        .collect();
                    let name = vars.join(".");
                    let target = if call_builtins.is_builtin(&name) {
                        ast.token(BuiltInHook, &name)
                    } else if vars.len() > 1 && vars[0] == "data" {
                        let varseq = varseq_of(ast, &vars[0], &vars[1..]);
                        build!(ast, (RuleRef @varseq))
                    } else {
                        ast.node(Undefined)
                    };
                    let skip = build!(ast, (Lift (Rego) (Skip (Key ^ &name) @target)));
                    let argseq = ast.child(call, 1);
                    ast.detach(argseq);
                    build!(
                        ast,
                        (Seq @skip (ExprCall (Var ^ &name) @argseq))
                    )
                },
            ),
        ],
    )
    .with_pre(|ast, root| {
        let regos: Vec<NodeId> = ast
            .descendants(root)
            .into_iter()
            .filter(|&n| ast.kind(n) == Rego)
            .collect();
        for rego in regos {
            if ast.child_of_kind(rego, SkipSeq).is_none() {
                let seq = ast.node(SkipSeq);
                ast.push_back(rego, seq);
            }
        }
    })
    .with_post(|ast, root| {
        let regos: Vec<NodeId> = ast
            .descendants(root)
            .into_iter()
            .filter(|&n| ast.kind(n) == Rego)
            .collect();
        for rego in regos {
            let Some(seq) = ast.child_of_kind(rego, SkipSeq) else {
                continue;
            };
            let skips: Vec<NodeId> = ast
                .children(rego)
                .iter()
                .copied()
                .filter(|&c| ast.kind(c) == Skip)
                .collect();
            let mut seen: std::collections::HashSet<String> = ast
                .children(seq)
                .iter()
                .map(|&s| ast.text(ast.child(s, 0)).to_string())
                .collect();
            for skip in skips {
                let key = ast.text(ast.child(skip, 0)).to_string();
                ast.detach(skip);
                if seen.insert(key) {
                    ast.push_back(seq, skip);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::run_pass;

    fn sample_tree(ast: &mut Ast) -> NodeId {
        build!(
            ast,
            (Top (Rego
                (Query (VarSeq (Var ^ "data") (Var ^ "query$module") (Var ^ "query$0")))
                (Input (Var ^ "input") (Undefined))
                (Data (Var ^ "data") (DataItemSeq))
                (ModuleSeq
                    (Module (Var ^ "p.q")
                        (Policy
                            (RuleComp (Var ^ "msg")
                                (Empty)
                                (DataTerm (Scalar (JSONString ^ "\"hi\"")))
                                (JSONInt ^ "0")))))))
        )
    }

    #[test]
    fn test_merge_modules_nests_packages() {
        let mut ast = Ast::new();
        let top = sample_tree(&mut ast);
        run_pass(&mut ast, top, &merge_modules()).unwrap();
        let rego = ast.child(top, 0);
        assert_eq!(ast.len(rego), 3);
        let data = ast.child(rego, 2);
        let items = ast.child(data, 1);
        let p = ast.child(items, 0);
        assert_eq!(ast.text(ast.child(p, 0)), "p");
        let p_module = ast.child(p, 1);
        let submodule = ast.child(p_module, 0);
        assert_eq!(ast.kind(submodule), Submodule);
        assert_eq!(ast.text(ast.child(submodule, 0)), "q");
        let q_module = ast.child(submodule, 1);
        assert_eq!(ast.kind(ast.child(q_module, 0)), RuleComp);
    }

    #[test]
    fn test_skips_collapse_static_path() {
        let mut ast = Ast::new();
        let top = sample_tree(&mut ast);
        run_pass(&mut ast, top, &merge_modules()).unwrap();
        // a rule body referencing data.p.q.msg
        let rego = ast.child(top, 0);
        let data = ast.child(rego, 2);
        let items = ast.child(data, 1);
        let module = ast.child(ast.child(items, 0), 1);
        let q_module = ast.child(ast.child(module, 0), 1);
        let body = build!(
            ast,
            (RuleComp (Var ^ "uses")
                (Empty)
                (UnifyBody
                    (Local (Var ^ "value$9") (Undefined))
                    (Literal
                        (Expr
                            (RefTerm (Var ^ "value$9"))
                            (Unify)
                            (RefTerm
                                (Ref (RefHead (Var ^ "data"))
                                    (RefArgSeq
                                        (RefArgDot (Var ^ "p"))
                                        (RefArgDot (Var ^ "q"))
                                        (RefArgDot (Var ^ "msg"))))))))
                (JSONInt ^ "0"))
        );
        ast.push_back(q_module, body);
        run_pass(&mut ast, top, &skips(BuiltIns::standard())).unwrap();
        let skipseq = ast.child_of_kind(rego, SkipSeq).unwrap();
        assert_eq!(ast.len(skipseq), 1);
        let skip = ast.child(skipseq, 0);
        assert_eq!(ast.text(ast.child(skip, 0)), "data.p.q.msg");
        assert_eq!(ast.kind(ast.child(skip, 1)), RuleRef);
        // the use site is now a single path-named variable
        let vars: Vec<NodeId> = ast
            .descendants(body)
            .into_iter()
            .filter(|&n| ast.kind(n) == Var && ast.text(n) == "data.p.q.msg")
            .collect();
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_skips_builtin_call() {
        let mut ast = Ast::new();
        let top = sample_tree(&mut ast);
        run_pass(&mut ast, top, &merge_modules()).unwrap();
        let rego = ast.child(top, 0);
        let data = ast.child(rego, 2);
        let items = ast.child(data, 1);
        let module = ast.child(ast.child(items, 0), 1);
        let body = build!(
            ast,
            (RuleComp (Var ^ "c")
                (Empty)
                (UnifyBody
                    (Local (Var ^ "value$8") (Undefined))
                    (Literal
                        (Expr
                            (RefTerm (Var ^ "value$8"))
                            (Unify)
                            (ExprCall (VarSeq (Var ^ "count")) (ArgSeq (Expr (RefTerm (Var ^ "value$8"))))))))
                (JSONInt ^ "0"))
        );
        ast.push_back(module, body);
        run_pass(&mut ast, top, &skips(BuiltIns::standard())).unwrap();
        let skipseq = ast.child_of_kind(rego, SkipSeq).unwrap();
        let skip = ast.child(skipseq, 0);
        assert_eq!(ast.text(ast.child(skip, 0)), "count");
        assert_eq!(ast.kind(ast.child(skip, 1)), BuiltInHook);
    }
}
