//! Surface passes: document identity, module splitting, import
//! normalization, keyword promotion, bracket disambiguation, `if`/`else`
//! collapsing, and rule structuring.

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use super::find_child;
use crate::rewrite::{any, end, rep, t, PassDef, Rule};

/// Attaches the `input` variable identity to the input document.
pub fn input_data() -> PassDef {
    PassDef::new(
        "input_data",
        vec![Rule::new(
            &[Rego],
            vec![t(&[Input])
                .guard(|ast, n| ast.front(n).map_or(true, |c| ast.kind(c) != Var))
                .bind("input")],
            |ast, env| {
                let old = env.node("input");
                let children: Vec<NodeId> = ast.children(old).to_vec();
                let input = build!(ast, (Input (Var ^ "input")));
                for child in children {
                    ast.push_back(input, child);
                }
                if ast.len(input) == 1 {
                    let undefined = ast.node(Undefined);
                    ast.push_back(input, undefined);
                }
                input
            },
        )],
    )
}

/// Splits each module file into `Package`, `ImportSeq`, and `Policy`.
pub fn modules() -> PassDef {
    PassDef::new(
        "modules",
        vec![
            Rule::new(&[ModuleSeq], vec![t(&[File]).bind("file")], |ast, env| {
                let file = env.node("file");
                let groups: Vec<NodeId> = ast.children(file).to_vec();
                let mut package: Option<NodeId> = None;
                let imports = ast.node(ImportSeq);
                let policy = ast.node(Policy);
                for group in groups {
                    match ast.front(group).map(|c| ast.kind(c)) {
                        Some(Package) if package.is_none() => {
                            let head = ast.front(group).expect("checked");
                            ast.detach(head);
                            package = Some(build!(ast, (Package @group)));
                        }
                        Some(Import) => {
                            let head = ast.front(group).expect("checked");
                            ast.detach(head);
                            let import = build!(ast, (Import @group));
                            ast.push_back(imports, import);
                        }
                        _ => ast.push_back(policy, group),
                    }
                }
                let Some(package) = package else {
                    return ast.error(file, "Missing package declaration");
                };
                build!(ast, (Module @package @imports @policy))
            }),
            // `key: value` groups inside braces become object items, unless
            // the group is a comprehension head.
            Rule::new(
                &[List, Brace],
                vec![t(&[Group])
                    .guard(|ast, n| {
                        find_child(ast, n, Colon).is_some() && find_child(ast, n, Or).is_none()
                    })
                    .bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let colon = find_child(ast, group, Colon).expect("guarded");
                    let children: Vec<NodeId> = ast.children(group).to_vec();
                    let key = ast.node(Group);
                    for &child in &children[..colon] {
                        ast.push_back(key, child);
                    }
                    let value = ast.node(Group);
                    for &child in &children[colon + 1..] {
                        ast.push_back(value, child);
                    }
                    build!(ast, (ObjectItem @key @value))
                },
            ),
        ],
    )
}

/// Normalizes imports to `(ImportRef, As, Var | Undefined)` and recognizes
/// keyword imports.
pub fn imports() -> PassDef {
    PassDef::new(
        "imports",
        vec![Rule::new(
            &[ImportSeq],
            vec![t(&[Import])
                .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == Group))
                .bind("import")],
            |ast, env| {
                let import = env.node("import");
                let group = ast.child(import, 0);
                let tokens: Vec<NodeId> = ast.children(group).to_vec();
                // `import future.keywords…` and `import rego.v1` declare
                // reserved words, which this dialect always recognizes.
                if let Some(&head) = tokens.first() {
                    let head_text = ast.text(head);
                    if ast.kind(head) == Var && (head_text == "future" || head_text == "rego") {
                        let keyword_name = ast.text(*tokens.last().expect("nonempty")).to_string();
                        return build!(ast, (Keyword (Var ^ &keyword_name)));
                    }
                }
                let as_index = find_child(ast, group, As);
                match as_index {
                    Some(index) => {
                        if index + 2 != tokens.len() || ast.kind(tokens[index + 1]) != Var {
                            return ast.error(import, "Invalid import alias");
                        }
                        let alias = tokens[index + 1];
                        let reference = ast.node(Group);
                        for &token in &tokens[..index] {
                            ast.push_back(reference, token);
                        }
                        ast.detach(alias);
                        build!(ast, (Import (ImportRef @reference) (As) @alias))
                    }
                    None => {
                        let reference = ast.node(Group);
                        for token in tokens {
                            ast.push_back(reference, token);
                        }
                        build!(ast, (Import (ImportRef @reference) (As) (Undefined)))
                    }
                }
            },
        )],
    )
}

/// Promotes reserved identifiers to keyword tokens: `if`, `in`, `every`, and
/// `contains` (when not used as a call).
pub fn keywords() -> PassDef {
    PassDef::new(
        "keywords",
        vec![
            Rule::new(
                &[Group],
                vec![t(&[Var]).guard(|ast, n| ast.text(n) == "if")],
                |ast, _| ast.node(IfTruthy),
            ),
            Rule::new(
                &[Group],
                vec![t(&[Var]).guard(|ast, n| ast.text(n) == "in")],
                |ast, _| ast.token(InSome, "in"),
            ),
            Rule::new(
                &[Group],
                vec![
                    t(&[Var]).guard(|ast, n| ast.text(n) == "every"),
                    t(&[Var]).bind("next"),
                ],
                |ast, env| {
                    let next = env.node("next");
                    ast.detach(next);
                    build!(ast, (Seq (Every) @next))
                },
            ),
            Rule::new(
                &[Group],
                vec![
                    t(&[Var]).guard(|ast, n| ast.text(n) == "contains"),
                    any().guard(|ast, n| ast.kind(n) != Paren).bind("next"),
                ],
                |ast, env| {
                    let next = env.node("next");
                    ast.detach(next);
                    build!(ast, (Seq (Contains) @next))
                },
            ),
        ],
    )
}

fn compr_split(
    ast: &mut Ast,
    container: NodeId,
) -> Option<(NodeId, Option<NodeId>, NodeId)> {
    // First group holding a top-level `|` marks a comprehension; the head sits
    // before the bar, the body after it plus any further statement groups.
    let groups: Vec<NodeId> = ast.children(container).to_vec();
    let first = *groups.first()?;
    if ast.kind(first) != Group {
        return None;
    }
    let bar = find_child(ast, first, Or)?;
    let tokens: Vec<NodeId> = ast.children(first).to_vec();
    let colon = find_child(ast, first, Colon).filter(|&c| c < bar);
    let (head, key) = match colon {
        Some(colon) => {
            let key = ast.node(Group);
            for &token in &tokens[..colon] {
                ast.push_back(key, token);
            }
            let value = ast.node(Group);
            for &token in &tokens[colon + 1..bar] {
                ast.push_back(value, token);
            }
            (value, Some(key))
        }
        None => {
            let head = ast.node(Group);
            for &token in &tokens[..bar] {
                ast.push_back(head, token);
            }
            (head, None)
        }
    };
    let body = ast.node(UnifyBody);
    let first_stmt = ast.node(Group);
    for &token in &tokens[bar + 1..] {
        ast.push_back(first_stmt, token);
    }
    if !ast.is_empty(first_stmt) {
        ast.push_back(body, first_stmt);
    }
    for &group in &groups[1..] {
        ast.push_back(body, group);
    }
    Some((head, key, body))
}

/// Disambiguates braces and squares into objects, sets, arrays, rule bodies,
/// and comprehensions; structures `some` and `every` declarations.
#[allow(clippy::too_many_lines)]
pub fn lists() -> PassDef {
    PassDef::new(
        "lists",
        vec![
            // comprehensions first, before object/set/body disambiguation
            Rule::new(
                &[Group],
                vec![t(&[Square])
                    .guard(|ast, n| {
                        ast.front(n).is_some_and(|first| {
                            ast.kind(first) == Group && find_child(ast, first, Or).is_some()
                        })
                    })
                    .bind("square")],
                |ast, env| {
                    let square = env.node("square");
                    match compr_split(ast, square) {
                        Some((head, None, body)) => build!(ast, (ArrayCompr @head @body)),
                        _ => ast.error(square, "Invalid comprehension"),
                    }
                },
            ),
            Rule::new(
                &[Group],
                vec![t(&[Brace])
                    .guard(|ast, n| {
                        ast.front(n).is_some_and(|first| {
                            ast.kind(first) == Group && find_child(ast, first, Or).is_some()
                        })
                    })
                    .bind("brace")],
                |ast, env| {
                    let brace = env.node("brace");
                    match compr_split(ast, brace) {
                        Some((value, Some(key), body)) => {
                            build!(ast, (ObjectCompr @key @value @body))
                        }
                        Some((head, None, body)) => build!(ast, (SetCompr @head @body)),
                        None => ast.error(brace, "Invalid comprehension"),
                    }
                },
            ),
            // object literals
            Rule::new(
                &[Group],
                vec![t(&[Brace])
                    .guard(|ast, n| {
                        !ast.is_empty(n)
                            && ast.children(n).iter().all(|&c| match ast.kind(c) {
                                ObjectItem => true,
                                List => ast
                                    .children(c)
                                    .iter()
                                    .all(|&i| ast.kind(i) == ObjectItem),
                                _ => false,
                            })
                    })
                    .bind("brace")],
                |ast, env| {
                    let brace = env.node("brace");
                    let object = ast.node(Object);
                    for child in ast.children(brace).to_vec() {
                        match ast.kind(child) {
                            ObjectItem => ast.push_back(object, child),
                            _ => {
                                for item in ast.children(child).to_vec() {
                                    ast.push_back(object, item);
                                }
                            }
                        }
                    }
                    object
                },
            ),
            // set literals
            Rule::new(
                &[Group],
                vec![t(&[Brace])
                    .guard(|ast, n| {
                        ast.len(n) == 1 && ast.front(n).is_some_and(|c| ast.kind(c) == List)
                    })
                    .bind("brace")],
                |ast, env| {
                    let brace = env.node("brace");
                    let list = ast.child(brace, 0);
                    let set = ast.node(Set);
                    for group in ast.children(list).to_vec() {
                        ast.push_back(set, group);
                    }
                    set
                },
            ),
            // rule bodies
            Rule::new(
                &[Group],
                vec![t(&[Brace])
                    .guard(|ast, n| {
                        !ast.is_empty(n)
                            && ast.children(n).iter().all(|&c| ast.kind(c) == Group)
                    })
                    .bind("brace")],
                |ast, env| {
                    let brace = env.node("brace");
                    let body = ast.node(UnifyBody);
                    for group in ast.children(brace).to_vec() {
                        ast.push_back(body, group);
                    }
                    body
                },
            ),
            // `{}` is an empty object
            Rule::new(
                &[Group],
                vec![t(&[Brace]).guard(|ast, n| ast.is_empty(n))],
                |ast, _| ast.node(Object),
            ),
            Rule::new(&[Group], vec![t(&[EmptySet])], |ast, _| ast.node(Set)),
            // arrays
            Rule::new(
                &[Group],
                vec![t(&[Square])
                    .guard(|ast, n| {
                        ast.children(n).iter().all(|&c| {
                            ast.kind(c) == List
                                || (ast.kind(c) == Group && find_child(ast, c, Or).is_none())
                        })
                    })
                    .bind("square")],
                |ast, env| {
                    let square = env.node("square");
                    let array = ast.node(Array);
                    for child in ast.children(square).to_vec() {
                        match ast.kind(child) {
                            List => {
                                for group in ast.children(child).to_vec() {
                                    ast.push_back(array, group);
                                }
                            }
                            _ => ast.push_back(array, child),
                        }
                    }
                    array
                },
            ),
            // `some x, y in coll` / `some x`
            Rule::new(
                &[UnifyBody, Query],
                vec![t(&[Group])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == SomeKw))
                    .bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    let varseq = ast.node(VarSeq);
                    let mut index = 1;
                    while index < tokens.len() && ast.kind(tokens[index]) == Var {
                        ast.push_back(varseq, tokens[index]);
                        index += 1;
                    }
                    if ast.is_empty(varseq) {
                        return ast.error(group, "Invalid some declaration");
                    }
                    let domain = ast.node(Group);
                    if index < tokens.len() {
                        if ast.kind(tokens[index]) != InSome {
                            return ast.error(group, "Invalid some declaration");
                        }
                        for &token in &tokens[index..] {
                            ast.push_back(domain, token);
                        }
                    } else {
                        let undefined = ast.node(Undefined);
                        ast.push_back(domain, undefined);
                    }
                    build!(ast, (SomeDecl @varseq @domain))
                },
            ),
            // `every x in coll { body }` — fires once the body brace has
            // become a UnifyBody.
            Rule::new(
                &[Group],
                vec![
                    t(&[Every]).bind("kw"),
                    rep(any().guard(|ast, n| ast.kind(n) != UnifyBody)).bind("mid"),
                    t(&[UnifyBody]).bind("body"),
                    end(),
                ],
                |ast, env| {
                    let kw = env.node("kw");
                    let mid: Vec<NodeId> = env.nodes("mid").to_vec();
                    let body = env.node("body");
                    let varseq = ast.node(VarSeq);
                    let mut index = 0;
                    while index < mid.len() && ast.kind(mid[index]) == Var {
                        let var = mid[index];
                        ast.detach(var);
                        ast.push_back(varseq, var);
                        index += 1;
                    }
                    if ast.is_empty(varseq) || index >= mid.len() || ast.kind(mid[index]) != InSome
                    {
                        return ast.error(kw, "Invalid every statement");
                    }
                    index += 1;
                    let domain = ast.node(Group);
                    for &token in &mid[index..] {
                        ast.detach(token);
                        ast.push_back(domain, token);
                    }
                    if ast.is_empty(domain) {
                        return ast.error(kw, "Invalid every sequence");
                    }
                    ast.detach(body);
                    build!(ast, (ExprEvery @varseq @body (EverySeq @domain)))
                },
            ),
            // errors
            Rule::new(&[Group], vec![t(&[Brace]).bind("brace")], |ast, env| {
                ast.error(env.node("brace"), "Invalid object")
            }),
            Rule::new(&[Group], vec![t(&[Square]).bind("square")], |ast, env| {
                ast.error(env.node("square"), "Invalid array")
            }),
        ],
    )
}

/// Collapses `if` into rule bodies.
pub fn ifs() -> PassDef {
    PassDef::new(
        "ifs",
        vec![
            Rule::new(
                &[Group],
                vec![t(&[IfTruthy]), t(&[UnifyBody]).bind("body")],
                |_, env| env.node("body"),
            ),
            Rule::new(
                &[Group],
                vec![
                    t(&[IfTruthy]),
                    any().bind("head"),
                    rep(any()).bind("tail"),
                    end(),
                ],
                |ast, env| {
                    let head = env.node("head");
                    let tail: Vec<NodeId> = env.nodes("tail").to_vec();
                    for &node in std::iter::once(&head).chain(tail.iter()) {
                        ast.detach(node);
                    }
                    build!(ast, (UnifyBody (Group @head @@tail)))
                },
            ),
            Rule::new(&[Group], vec![t(&[IfTruthy]).bind("kw")], |ast, env| {
                ast.error(env.node("kw"), "Invalid if statement")
            }),
        ],
    )
}

/// Collapses `else` chains into `Else` branches.
pub fn elses() -> PassDef {
    PassDef::new(
        "elses",
        vec![
            Rule::new(
                &[Group],
                vec![
                    t(&[Else]),
                    t(&[Assign, Unify]),
                    rep(any().guard(|ast, n| ast.kind(n) != UnifyBody)).bind("val"),
                    t(&[UnifyBody]).bind("body"),
                ],
                |ast, env| {
                    let val: Vec<NodeId> = env.nodes("val").to_vec();
                    let body = env.node("body");
                    if val.is_empty() {
                        return ast.error(body, "Invalid else statement");
                    }
                    for &node in &val {
                        ast.detach(node);
                    }
                    ast.detach(body);
                    build!(ast, (Else (Group @@val) @body))
                },
            ),
            Rule::new(
                &[Group],
                vec![t(&[Else]), t(&[UnifyBody]).bind("body")],
                |ast, env| {
                    let body = env.node("body");
                    ast.detach(body);
                    build!(ast, (Else (Undefined) @body))
                },
            ),
            // `else = value` with no body
            Rule::new(
                &[Group],
                vec![
                    t(&[Else]),
                    t(&[Assign, Unify]),
                    rep(any().guard(|ast, n| {
                        !matches!(ast.kind(n), UnifyBody | Else)
                    }))
                    .bind("val"),
                ],
                |ast, env| {
                    let val: Vec<NodeId> = env.nodes("val").to_vec();
                    if val.is_empty() {
                        let anchor = ast.node(Undefined);
                        return ast.error(anchor, "Invalid else statement");
                    }
                    for &node in &val {
                        ast.detach(node);
                    }
                    build!(
                        ast,
                        (Else (Group @@val) (UnifyBody (Group (JSONTrue ^ "true"))))
                    )
                },
            ),
        ],
    )
}

/// Builds `Rule(RuleHead, Body, ElseSeq)` structures from policy statements.
#[allow(clippy::too_many_lines)]
pub fn rules() -> PassDef {
    PassDef::new(
        "rules",
        vec![
            // default rules
            Rule::new(
                &[Policy],
                vec![t(&[Group])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == Default))
                    .bind("group")],
                |ast, env| {
                    let group = env.node("group");
                    let tokens: Vec<NodeId> = ast.children(group).to_vec();
                    if tokens.len() < 4
                        || ast.kind(tokens[1]) != Var
                        || !matches!(ast.kind(tokens[2]), Assign | Unify)
                    {
                        return ast.error(group, "Invalid default rule");
                    }
                    let var = tokens[1];
                    ast.detach(var);
                    let value = ast.node(Group);
                    for &token in &tokens[3..] {
                        ast.push_back(value, token);
                    }
                    build!(ast, (DefaultRule @var @value))
                },
            ),
            // everything else
            Rule::new(
                &[Policy],
                vec![t(&[Group])
                    .guard(|ast, n| ast.front(n).is_some_and(|c| ast.kind(c) == Var))
                    .bind("group")],
                |ast, env| build_rule(ast, env.node("group")),
            ),
            Rule::new(&[Policy], vec![t(&[Group]).bind("group")], |ast, env| {
                ast.error(env.node("group"), "Invalid rule")
            }),
        ],
    )
}

fn build_rule(ast: &mut Ast, group: NodeId) -> NodeId {
    let tokens: Vec<NodeId> = ast.children(group).to_vec();
    let var = tokens[0];
    let mut index = 1;

    enum HeadShape {
        Comp,
        Func(NodeId),
        Set(NodeId),
        Obj(NodeId),
    }

    let shape = match tokens.get(index).map(|&n| ast.kind(n)) {
        Some(Paren) => {
            let args = tokens[index];
            index += 1;
            HeadShape::Func(args)
        }
        Some(Contains) => {
            index += 1;
            let value = collect_value(ast, &tokens, &mut index);
            HeadShape::Set(value)
        }
        Some(Square) => {
            let key = tokens[index];
            index += 1;
            // `o[k] = v` is an object rule; `s[x] { … }` a legacy set rule.
            if matches!(tokens.get(index).map(|&n| ast.kind(n)), Some(Assign | Unify)) {
                HeadShape::Obj(key)
            } else {
                HeadShape::Set(square_to_group(ast, key))
            }
        }
        _ => HeadShape::Comp,
    };

    let operator = match tokens.get(index).map(|&n| ast.kind(n)) {
        Some(Assign) => {
            index += 1;
            ast.node(Assign)
        }
        Some(Unify) => {
            index += 1;
            ast.node(Unify)
        }
        _ => ast.node(Unify),
    };

    let value = if matches!(shape, HeadShape::Comp | HeadShape::Func(_) | HeadShape::Obj(_))
        && tokens
            .get(index)
            .is_some_and(|&n| !matches!(ast.kind(n), UnifyBody | Else))
    {
        collect_value(ast, &tokens, &mut index)
    } else {
        build!(ast, (Group (JSONTrue ^ "true")))
    };

    let body = if tokens.get(index).is_some_and(|&n| ast.kind(n) == UnifyBody) {
        let body = tokens[index];
        index += 1;
        ast.detach(body);
        body
    } else {
        ast.node(Empty)
    };

    let elseseq = ast.node(ElseSeq);
    while tokens.get(index).is_some_and(|&n| ast.kind(n) == Else) {
        let branch = tokens[index];
        index += 1;
        ast.detach(branch);
        ast.push_back(elseseq, branch);
    }

    if index != tokens.len() {
        return ast.error(group, "Invalid rule");
    }

    let operator = build!(ast, (AssignOperator @operator));
    let head_type = match shape {
        HeadShape::Comp => build!(ast, (RuleHeadComp @operator @value)),
        HeadShape::Func(paren) => {
            let args = ast.node(RuleArgs);
            ast.detach(paren);
            match ast.front(paren).map(|c| ast.kind(c)) {
                Some(List) => {
                    let list = ast.front(paren).expect("checked");
                    for arg in ast.children(list).to_vec() {
                        ast.push_back(args, arg);
                    }
                }
                Some(Group) => {
                    let single = ast.front(paren).expect("checked");
                    ast.push_back(args, single);
                }
                _ => return ast.error(group, "Syntax error: no rule arguments"),
            }
            build!(ast, (RuleHeadFunc @args @operator @value))
        }
        HeadShape::Set(key) => build!(ast, (RuleHeadSet @key)),
        HeadShape::Obj(key) => {
            let key = square_to_group(ast, key);
            build!(ast, (RuleHeadObj @key @operator @value))
        }
    };
    ast.detach(var);
    build!(ast, (Rule (RuleHead @var @head_type) @body @elseseq))
}

fn collect_value(ast: &mut Ast, tokens: &[NodeId], index: &mut usize) -> NodeId {
    let value = ast.node(Group);
    while *index < tokens.len() && !matches!(ast.kind(tokens[*index]), UnifyBody | Else) {
        let token = tokens[*index];
        ast.detach(token);
        ast.push_back(value, token);
        *index += 1;
    }
    value
}

fn square_to_group(ast: &mut Ast, square: NodeId) -> NodeId {
    ast.detach(square);
    if ast.kind(square) == Group {
        return square;
    }
    match ast.front(square) {
        Some(inner) if ast.kind(inner) == Group && ast.len(square) == 1 => {
            ast.detach(inner);
            inner
        }
        _ => ast.error(square, "Invalid rule key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_source;
    use crate::rewrite::run_pass;
    use dike_ast::Source;

    fn file(source: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let src = Source::new("test.rego", source);
        let file = parse_source(&mut ast, src, File).unwrap();
        let seq = ast.node(ModuleSeq);
        ast.push_back(seq, file);
        (ast, seq)
    }

    #[test]
    fn test_modules_split() {
        let (mut ast, seq) = file("package p\nimport data.q\nallow = true");
        run_pass(&mut ast, seq, &modules()).unwrap();
        let module = ast.child(seq, 0);
        assert_eq!(ast.kind(module), Module);
        assert_eq!(ast.kind(ast.child(module, 0)), Package);
        let imports_seq = ast.child(module, 1);
        assert_eq!(ast.len(imports_seq), 1);
        let policy = ast.child(module, 2);
        assert_eq!(ast.len(policy), 1);
    }

    #[test]
    fn test_keyword_import_recognized() {
        let (mut ast, seq) = file("package p\nimport future.keywords.in\nallow = true");
        run_pass(&mut ast, seq, &modules()).unwrap();
        run_pass(&mut ast, seq, &imports()).unwrap();
        let module = ast.child(seq, 0);
        let imports_seq = ast.child(module, 1);
        assert_eq!(ast.kind(ast.child(imports_seq, 0)), Keyword);
    }

    #[test]
    fn test_lists_set_vs_body() {
        let (mut ast, seq) = file("package p\ns = {1, 2}\nok { true }");
        run_pass(&mut ast, seq, &modules()).unwrap();
        run_pass(&mut ast, seq, &imports()).unwrap();
        run_pass(&mut ast, seq, &keywords()).unwrap();
        run_pass(&mut ast, seq, &lists()).unwrap();
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        let set_group = ast.child(policy, 0);
        assert_eq!(ast.kind(ast.child(set_group, 2)), Set);
        let body_group = ast.child(policy, 1);
        assert_eq!(ast.kind(ast.child(body_group, 1)), UnifyBody);
    }

    #[test]
    fn test_set_comprehension_shape() {
        let (mut ast, seq) = file("package p\nevens := {n | n > 0}");
        run_pass(&mut ast, seq, &modules()).unwrap();
        run_pass(&mut ast, seq, &imports()).unwrap();
        run_pass(&mut ast, seq, &keywords()).unwrap();
        run_pass(&mut ast, seq, &lists()).unwrap();
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        let group = ast.child(policy, 0);
        let compr = ast.child(group, 2);
        assert_eq!(ast.kind(compr), SetCompr);
        assert_eq!(ast.kind(ast.child(compr, 1)), UnifyBody);
    }

    #[test]
    fn test_every_shape() {
        let (mut ast, seq) = file("package p\nok { every x in xs { x > 0 } }");
        for pass in [modules(), imports(), keywords(), lists()] {
            run_pass(&mut ast, seq, &pass).unwrap();
        }
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        let group = ast.child(policy, 0);
        let body = ast.child(group, 1);
        let stmt = ast.child(body, 0);
        let every = ast.child(stmt, 0);
        assert_eq!(ast.kind(every), ExprEvery);
        assert_eq!(ast.len(ast.child(every, 0)), 1);
    }

    #[test]
    fn test_rules_structures() {
        let (mut ast, seq) =
            file("package p\ndefault allow = false\nallow { true }\nf(x) = 1 { true }");
        for pass in [modules(), imports(), keywords(), lists(), ifs(), elses(), rules()] {
            run_pass(&mut ast, seq, &pass).unwrap();
        }
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        assert_eq!(ast.kind(ast.child(policy, 0)), DefaultRule);
        let rule = ast.child(policy, 1);
        assert_eq!(ast.kind(rule), NodeKind::Rule);
        let head = ast.child(rule, 0);
        let head_type = ast.child(head, 1);
        assert_eq!(ast.kind(head_type), RuleHeadComp);
        let func = ast.child(policy, 2);
        let func_head_type = ast.child(ast.child(func, 0), 1);
        assert_eq!(ast.kind(func_head_type), RuleHeadFunc);
    }

    #[test]
    fn test_else_chain() {
        let (mut ast, seq) = file("package p\np = 1 { q } else = 2 { r }");
        for pass in [modules(), imports(), keywords(), lists(), ifs(), elses(), rules()] {
            run_pass(&mut ast, seq, &pass).unwrap();
        }
        let module = ast.child(seq, 0);
        let policy = ast.child(module, 2);
        let rule = ast.child(policy, 0);
        let elseseq = ast.child(rule, 2);
        assert_eq!(ast.len(elseseq), 1);
        assert_eq!(ast.kind(ast.child(elseseq, 0)), Else);
    }
}
