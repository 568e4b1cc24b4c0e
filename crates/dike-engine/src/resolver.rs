//! Pure operations over terms.
//!
//! Arithmetic, comparison, set algebra, container access, constructors,
//! truthiness, and argument injection. Nothing here evaluates rule bodies;
//! failures are `Error` nodes, `Undefined` is a legal non-error outcome.

use std::collections::BTreeMap;

use dike_ast::{format_float, strip_quotes, to_json, Ast, NodeId, NodeKind};

/// Parses the integer payload of a `JSONInt` token.
#[must_use]
pub fn get_int(ast: &Ast, node: NodeId) -> i64 {
    ast.text(node).parse().unwrap_or(0)
}

/// Parses the float payload of a `JSONInt` or `JSONFloat` token.
#[must_use]
pub fn get_double(ast: &Ast, node: NodeId) -> f64 {
    ast.text(node).parse().unwrap_or(0.0)
}

/// Builds a `JSONInt` token.
pub fn int_token(ast: &mut Ast, value: i64) -> NodeId {
    ast.token(NodeKind::JSONInt, value.to_string())
}

/// Builds a `JSONFloat` token in canonical form.
pub fn float_token(ast: &mut Ast, value: f64) -> NodeId {
    ast.token(NodeKind::JSONFloat, format_float(value))
}

/// Builds a boolean token.
pub fn bool_token(ast: &mut Ast, value: bool) -> NodeId {
    if value {
        ast.token(NodeKind::JSONTrue, "true")
    } else {
        ast.token(NodeKind::JSONFalse, "false")
    }
}

/// Builds a quoted `JSONString` token.
pub fn string_token(ast: &mut Ast, value: &str) -> NodeId {
    ast.token(NodeKind::JSONString, format!("\"{value}\""))
}

/// Wraps a scalar token in `Term <<= Scalar`.
pub fn term_of_scalar(ast: &mut Ast, token: NodeId) -> NodeId {
    let scalar = ast.node(NodeKind::Scalar);
    ast.push_back(scalar, token);
    let term = ast.node(NodeKind::Term);
    ast.push_back(term, scalar);
    term
}

/// Peels `Term`/`DataTerm` and `Scalar` wrappers down to a number token.
#[must_use]
pub fn maybe_unwrap_number(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let inner = unwrap_value(ast, node);
    matches!(ast.kind(inner), NodeKind::JSONInt | NodeKind::JSONFloat).then_some(inner)
}

/// Peels wrappers down to a string token.
#[must_use]
pub fn maybe_unwrap_string(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let inner = unwrap_value(ast, node);
    matches!(ast.kind(inner), NodeKind::JSONString).then_some(inner)
}

/// Peels wrappers down to a boolean token.
#[must_use]
pub fn maybe_unwrap_bool(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let inner = unwrap_value(ast, node);
    matches!(ast.kind(inner), NodeKind::JSONTrue | NodeKind::JSONFalse).then_some(inner)
}

/// Peels `Term`/`DataTerm` down to a set.
#[must_use]
pub fn maybe_unwrap_set(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let mut value = node;
    if matches!(ast.kind(value), NodeKind::Term | NodeKind::DataTerm) {
        value = ast.front(value)?;
    }
    matches!(ast.kind(value), NodeKind::Set | NodeKind::DataSet).then_some(value)
}

/// Peels `Term`/`DataTerm` and `Scalar` wrappers from a node.
#[must_use]
pub fn unwrap_value(ast: &Ast, node: NodeId) -> NodeId {
    let mut value = node;
    if matches!(ast.kind(value), NodeKind::Term | NodeKind::DataTerm) {
        if let Some(front) = ast.front(value) {
            value = front;
        }
    }
    if ast.kind(value) == NodeKind::Scalar {
        if let Some(front) = ast.front(value) {
            value = front;
        }
    }
    value
}

/// Negates a numeric token.
pub fn negate(ast: &mut Ast, node: NodeId) -> NodeId {
    match ast.kind(node) {
        NodeKind::JSONInt => {
            let value = get_int(ast, node);
            int_token(ast, -value)
        }
        NodeKind::JSONFloat => {
            let value = get_double(ast, node);
            float_token(ast, -value)
        }
        _ => ast.error(node, "Invalid argument for negation"),
    }
}

/// Unary minus over a term.
pub fn unary(ast: &mut Ast, value: NodeId) -> NodeId {
    match maybe_unwrap_number(ast, value) {
        Some(number) => negate(ast, number),
        None => ast.error(value, "unsupported negation"),
    }
}

/// Arithmetic over terms: exact integer arithmetic when both sides are
/// integers, float arithmetic otherwise. Sets fall through to the set
/// operators so `-` works as difference.
pub fn arithinfix(ast: &mut Ast, op: NodeId, lhs: NodeId, rhs: NodeId) -> NodeId {
    if ast.kind(lhs) == NodeKind::Undefined || ast.kind(rhs) == NodeKind::Undefined {
        return ast.token(NodeKind::JSONFalse, "false");
    }
    if ast.kind(lhs) == NodeKind::Error {
        return lhs;
    }
    if ast.kind(rhs) == NodeKind::Error {
        return rhs;
    }
    let lhs_number = maybe_unwrap_number(ast, lhs);
    let rhs_number = maybe_unwrap_number(ast, rhs);
    match (lhs_number, rhs_number) {
        (Some(l), Some(r)) => {
            if ast.kind(l) == NodeKind::JSONInt && ast.kind(r) == NodeKind::JSONInt {
                int_arith(ast, op, get_int(ast, l), get_int(ast, r))
            } else {
                float_arith(ast, op, get_double(ast, l), get_double(ast, r))
            }
        }
        _ => {
            if maybe_unwrap_set(ast, lhs).is_some() && maybe_unwrap_set(ast, rhs).is_some() {
                return bininfix(ast, op, lhs, rhs);
            }
            ast.error(op, "Cannot perform arithmetic operations on non-numeric values")
        }
    }
}

fn int_arith(ast: &mut Ast, op: NodeId, lhs: i64, rhs: i64) -> NodeId {
    let value = match ast.kind(op) {
        NodeKind::Add => lhs.wrapping_add(rhs),
        NodeKind::Subtract => lhs.wrapping_sub(rhs),
        NodeKind::Multiply => lhs.wrapping_mul(rhs),
        NodeKind::Divide => {
            if rhs == 0 {
                return ast.error(op, "divide by zero");
            }
            lhs / rhs
        }
        NodeKind::Modulo => {
            if rhs == 0 {
                return ast.error(op, "divide by zero");
            }
            lhs % rhs
        }
        _ => return ast.error(op, "unsupported math operation"),
    };
    int_token(ast, value)
}

fn float_arith(ast: &mut Ast, op: NodeId, lhs: f64, rhs: f64) -> NodeId {
    let value = match ast.kind(op) {
        NodeKind::Add => lhs + rhs,
        NodeKind::Subtract => lhs - rhs,
        NodeKind::Multiply => lhs * rhs,
        NodeKind::Divide => {
            if rhs == 0.0 {
                return ast.error(op, "divide by zero");
            }
            lhs / rhs
        }
        // float modulo has no value
        NodeKind::Modulo => return ast.node(NodeKind::Undefined),
        _ => return ast.error(op, "unsupported math operation"),
    };
    float_token(ast, value)
}

/// Set operators: `&` intersection, `|` union, `-` difference.
pub fn bininfix(ast: &mut Ast, op: NodeId, lhs: NodeId, rhs: NodeId) -> NodeId {
    let lhs_set = maybe_unwrap_set(ast, lhs);
    let rhs_set = maybe_unwrap_set(ast, rhs);
    match (lhs_set, rhs_set) {
        (Some(l), Some(r)) => match ast.kind(op) {
            NodeKind::And => set_intersection(ast, l, r),
            NodeKind::Or => set_union(ast, l, r),
            NodeKind::Subtract => set_difference(ast, l, r),
            _ => ast.error(op, "Unsupported binary operator"),
        },
        _ => ast.error(op, "Cannot perform set operations on non-set values"),
    }
}

/// Comparison over terms: numeric comparison when both sides are numbers,
/// membership for `in`, and lexicographic comparison of the rendered JSON
/// otherwise (which gives the mixed-type ordering).
pub fn boolinfix(ast: &mut Ast, op: NodeId, lhs: NodeId, rhs: NodeId) -> NodeId {
    if ast.kind(lhs) == NodeKind::Undefined || ast.kind(rhs) == NodeKind::Undefined {
        return ast.token(NodeKind::JSONFalse, "false");
    }
    if ast.kind(lhs) == NodeKind::Error {
        return lhs;
    }
    if ast.kind(rhs) == NodeKind::Error {
        return rhs;
    }
    if ast.kind(op) == NodeKind::MemberOf {
        return member_of(ast, lhs, rhs);
    }
    let lhs_number = maybe_unwrap_number(ast, lhs);
    let rhs_number = maybe_unwrap_number(ast, rhs);
    let ordering = match (lhs_number, rhs_number) {
        (Some(l), Some(r)) => {
            if ast.kind(l) == NodeKind::JSONInt && ast.kind(r) == NodeKind::JSONInt {
                get_int(ast, l).cmp(&get_int(ast, r))
            } else {
                get_double(ast, l)
                    .partial_cmp(&get_double(ast, r))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }
        }
        _ => to_json(ast, lhs).cmp(&to_json(ast, rhs)),
    };
    let result = match ast.kind(op) {
        NodeKind::Equals => ordering.is_eq(),
        NodeKind::NotEquals => ordering.is_ne(),
        NodeKind::LessThan => ordering.is_lt(),
        NodeKind::LessThanOrEquals => ordering.is_le(),
        NodeKind::GreaterThan => ordering.is_gt(),
        NodeKind::GreaterThanOrEquals => ordering.is_ge(),
        _ => return ast.error(op, "unsupported comparison"),
    };
    bool_token(ast, result)
}

fn member_of(ast: &mut Ast, lhs: NodeId, rhs: NodeId) -> NodeId {
    let needle = to_json(ast, lhs);
    let container = unwrap_container(ast, rhs);
    let found = match ast.kind(container) {
        NodeKind::Array | NodeKind::DataArray | NodeKind::Set | NodeKind::DataSet => ast
            .children(container)
            .iter()
            .any(|&member| to_json(ast, member) == needle),
        NodeKind::Object | NodeKind::DataObject => ast
            .children(container)
            .iter()
            .any(|&item| to_json(ast, ast.child(item, 1)) == needle),
        _ => false,
    };
    bool_token(ast, found)
}

fn unwrap_container(ast: &Ast, node: NodeId) -> NodeId {
    let mut value = node;
    if matches!(ast.kind(value), NodeKind::Term | NodeKind::DataTerm) {
        if let Some(front) = ast.front(value) {
            value = front;
        }
    }
    value
}

fn set_members(ast: &Ast, set: NodeId) -> BTreeMap<String, NodeId> {
    ast.children(set)
        .iter()
        .map(|&member| (to_json(ast, member), member))
        .collect()
}

/// Set intersection, ordered by member representation.
pub fn set_intersection(ast: &mut Ast, lhs: NodeId, rhs: NodeId) -> NodeId {
    let lhs_members = set_members(ast, lhs);
    let rhs_members = set_members(ast, rhs);
    let set = ast.node(NodeKind::Set);
    for (repr, member) in lhs_members {
        if rhs_members.contains_key(&repr) {
            let member = ast.deep_clone(member);
            ast.push_back(set, member);
        }
    }
    set
}

/// Set union, ordered by member representation.
pub fn set_union(ast: &mut Ast, lhs: NodeId, rhs: NodeId) -> NodeId {
    let mut members = set_members(ast, lhs);
    for (repr, member) in set_members(ast, rhs) {
        members.entry(repr).or_insert(member);
    }
    let set = ast.node(NodeKind::Set);
    for (_, member) in members {
        let member = ast.deep_clone(member);
        ast.push_back(set, member);
    }
    set
}

/// Set difference, ordered by member representation.
pub fn set_difference(ast: &mut Ast, lhs: NodeId, rhs: NodeId) -> NodeId {
    let lhs_members = set_members(ast, lhs);
    let rhs_members = set_members(ast, rhs);
    let set = ast.node(NodeKind::Set);
    for (repr, member) in lhs_members {
        if !rhs_members.contains_key(&repr) {
            let member = ast.deep_clone(member);
            ast.push_back(set, member);
        }
    }
    set
}

/// Accesses a container by index/key/membership, or an `Input`/`Data`/
/// `Module` scope by symbol lookdown.
///
/// Returns `None` for unsupported container kinds and `Some(vec![])` when
/// the key is simply absent.
pub fn apply_access(ast: &mut Ast, container: NodeId, arg: NodeId) -> Option<Vec<NodeId>> {
    match ast.kind(container) {
        NodeKind::Array | NodeKind::DataArray => {
            let index = unwrap_value(ast, arg);
            if ast.kind(index) == NodeKind::JSONInt {
                let i = get_int(ast, index);
                if i >= 0 && (i as usize) < ast.len(container) {
                    return Some(vec![ast.child(container, i as usize)]);
                }
            }
            Some(Vec::new())
        }
        NodeKind::Object | NodeKind::DataObject => {
            Some(object_lookdown(ast, container, arg))
        }
        NodeKind::Input | NodeKind::Data | NodeKind::Module => {
            let key_json = to_json(ast, arg);
            let key = strip_quotes(&key_json).to_string();
            let defs = ast.lookdown(container, &key);
            if defs.is_empty() {
                // an absent key is undefined, which invalidates dependents
                // without raising an error
                return Some(Vec::new());
            }
            if matches!(
                ast.kind(defs[0]),
                NodeKind::RuleComp
                    | NodeKind::DefaultRule
                    | NodeKind::RuleFunc
                    | NodeKind::RuleSet
                    | NodeKind::RuleObj
            ) {
                return Some(defs);
            }
            let mut nodes = Vec::new();
            for def in defs {
                match ast.kind(def) {
                    NodeKind::DataItem | NodeKind::Submodule | NodeKind::ObjectItem => {
                        nodes.push(ast.child(def, 1));
                    }
                    _ => nodes.push(ast.error(def, "Unsupported definition type")),
                }
            }
            Some(nodes)
        }
        NodeKind::Set | NodeKind::DataSet => {
            let needle = to_json(ast, arg);
            let found = ast
                .children(container)
                .iter()
                .any(|&member| to_json(ast, member) == needle);
            let token = bool_token(ast, found);
            let scalar = ast.node(NodeKind::Scalar);
            ast.push_back(scalar, token);
            let term = ast.node(NodeKind::Term);
            ast.push_back(term, scalar);
            Some(vec![term])
        }
        _ => None,
    }
}

/// Looks a key up in an object: symbol table first, then a linear scan by
/// rendered-key equality.
#[must_use]
pub fn object_lookdown(ast: &Ast, object: NodeId, query: NodeId) -> Vec<NodeId> {
    let query_json = to_json(ast, query);
    let key = strip_quotes(&query_json);
    let defs = ast.lookdown(object, key);
    if !defs.is_empty() {
        return defs.iter().map(|&def| ast.child(def, 1)).collect();
    }
    let mut terms = Vec::new();
    for &item in ast.children(object) {
        let item_key = ast.child(item, 0);
        let item_key_json = match ast.kind(item_key) {
            NodeKind::Key => format!("\"{}\"", ast.text(item_key)),
            _ => to_json(ast, item_key),
        };
        if item_key_json == query_json || strip_quotes(&item_key_json) == key {
            terms.push(ast.child(item, 1));
        }
    }
    terms
}

/// Builds an object from alternating `(key, value)` children of an `ArgSeq`,
/// keyed by rendered key (first occurrence wins).
pub fn object(ast: &mut Ast, items: &[NodeId]) -> NodeId {
    let object = ast.node(NodeKind::Object);
    let mut seen = std::collections::HashSet::new();
    for pair in items.chunks(2) {
        let [key, value] = pair else { continue };
        let key_json = to_json(ast, *key);
        let key_text = strip_quotes(&key_json).to_string();
        if !seen.insert(key_text.clone()) {
            continue;
        }
        let key_node = ast.token(NodeKind::Key, key_text);
        let value = ast.adopt(*value);
        let item = ast.node(NodeKind::ObjectItem);
        ast.push_back(item, key_node);
        ast.push_back(item, value);
        ast.push_back(object, item);
    }
    object
}

/// Builds an array from members in order.
pub fn array(ast: &mut Ast, members: &[NodeId]) -> NodeId {
    let array = ast.node(NodeKind::Array);
    for &member in members {
        let member = ast.adopt(member);
        ast.push_back(array, member);
    }
    array
}

/// Builds a set, deduplicated and ordered by canonical member form.
pub fn set(ast: &mut Ast, members: &[NodeId]) -> NodeId {
    let mut unique: BTreeMap<String, NodeId> = BTreeMap::new();
    for &member in members {
        unique.entry(to_json(ast, member)).or_insert(member);
    }
    let set = ast.node(NodeKind::Set);
    for (_, member) in unique {
        let member = ast.adopt(member);
        ast.push_back(set, member);
    }
    set
}

/// Truthiness of a bound term: `TermSet`s and containers are truthy, `false`
/// is not, `Undefined` and errors are not.
#[must_use]
pub fn is_truthy(ast: &Ast, node: NodeId) -> bool {
    match ast.kind(node) {
        NodeKind::TermSet => true,
        NodeKind::Term | NodeKind::DataTerm => {
            let Some(value) = ast.front(node) else {
                return false;
            };
            match ast.kind(value) {
                NodeKind::Scalar => ast
                    .front(value)
                    .is_some_and(|token| ast.kind(token) != NodeKind::JSONFalse),
                NodeKind::Object
                | NodeKind::Array
                | NodeKind::Set
                | NodeKind::DataObject
                | NodeKind::DataArray
                | NodeKind::DataSet => true,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Injects actual arguments into a function rule's formal parameters.
///
/// `ArgVal` parameters enforce a structural match (mismatch yields
/// `Undefined`, which drops the rule's contribution); `ArgVar` parameters
/// are bound to the actual argument.
pub fn inject_args(ast: &mut Ast, rulefunc: NodeId, actuals: &[NodeId]) -> NodeId {
    let ruleargs = ast.child(rulefunc, 1);
    let formals: Vec<NodeId> = ast.children(ruleargs).to_vec();
    if formals.len() != actuals.len() {
        return ast.error(
            rulefunc,
            format!(
                "function has arity {}, received {} arguments",
                formals.len(),
                actuals.len()
            ),
        );
    }
    for (&formal, &actual) in formals.iter().zip(actuals) {
        match ast.kind(formal) {
            NodeKind::ArgVal => {
                if to_json(ast, formal) != to_json(ast, actual) {
                    return ast.node(NodeKind::Undefined);
                }
            }
            NodeKind::ArgVar => {
                let value = ast.adopt(actual);
                ast.set_child(formal, 1, value);
            }
            _ => {}
        }
    }
    rulefunc
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::build;

    fn int_term(ast: &mut Ast, text: &str) -> NodeId {
        let token = ast.token(NodeKind::JSONInt, text);
        term_of_scalar(ast, token)
    }

    #[test]
    fn test_integer_arithmetic_exact() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::Add);
        let lhs = int_term(&mut ast, "2");
        let rhs = int_term(&mut ast, "3");
        let result = arithinfix(&mut ast, op, lhs, rhs);
        assert_eq!(ast.text(result), "5");
        assert_eq!(ast.kind(result), NodeKind::JSONInt);
    }

    #[test]
    fn test_divide_by_zero_is_error() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::Divide);
        let lhs = int_term(&mut ast, "1");
        let rhs = int_term(&mut ast, "0");
        let result = arithinfix(&mut ast, op, lhs, rhs);
        assert_eq!(ast.kind(result), NodeKind::Error);
        assert!(ast.error_message(result).contains("divide by zero"));
    }

    #[test]
    fn test_float_modulo_is_undefined() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::Modulo);
        let lhs_token = ast.token(NodeKind::JSONFloat, "5.5");
        let lhs = term_of_scalar(&mut ast, lhs_token);
        let rhs = int_term(&mut ast, "2");
        let result = arithinfix(&mut ast, op, lhs, rhs);
        assert_eq!(ast.kind(result), NodeKind::Undefined);
    }

    #[test]
    fn test_undefined_operand_is_false() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::Add);
        let lhs = ast.node(NodeKind::Undefined);
        let rhs = int_term(&mut ast, "1");
        let result = arithinfix(&mut ast, op, lhs, rhs);
        assert_eq!(ast.kind(result), NodeKind::JSONFalse);
    }

    #[test]
    fn test_comparison_mixed_types_by_rendering() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::LessThan);
        let number = int_term(&mut ast, "1");
        let text = build!(ast, (Term (Scalar (JSONString ^ "\"a\""))));
        let result = boolinfix(&mut ast, op, number, text);
        // "1" < "\"a\"" lexicographically is false.
        assert_eq!(ast.kind(result), NodeKind::JSONFalse);
    }

    #[test]
    fn test_member_of_array() {
        let mut ast = Ast::new();
        let op = ast.node(NodeKind::MemberOf);
        let needle = int_term(&mut ast, "2");
        let haystack = build!(
            ast,
            (Term (Array
                (Term (Scalar (JSONInt ^ "1")))
                (Term (Scalar (JSONInt ^ "2")))))
        );
        let result = boolinfix(&mut ast, op, needle, haystack);
        assert_eq!(ast.kind(result), NodeKind::JSONTrue);
    }

    #[test]
    fn test_set_operations() {
        let mut ast = Ast::new();
        let lhs = build!(
            ast,
            (Set (Term (Scalar (JSONInt ^ "1"))) (Term (Scalar (JSONInt ^ "2"))))
        );
        let rhs = build!(
            ast,
            (Set (Term (Scalar (JSONInt ^ "2"))) (Term (Scalar (JSONInt ^ "3"))))
        );
        let inter = set_intersection(&mut ast, lhs, rhs);
        assert_eq!(to_json(&ast, inter), "[2]");
        let union = set_union(&mut ast, lhs, rhs);
        assert_eq!(to_json(&ast, union), "[1,2,3]");
        let diff = set_difference(&mut ast, lhs, rhs);
        assert_eq!(to_json(&ast, diff), "[1]");
    }

    #[test]
    fn test_array_access_bounds() {
        let mut ast = Ast::new();
        let container = build!(
            ast,
            (Array (Term (Scalar (JSONInt ^ "10"))) (Term (Scalar (JSONInt ^ "20"))))
        );
        let good = int_term(&mut ast, "1");
        let found = apply_access(&mut ast, container, good).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(to_json(&ast, found[0]), "20");
        let bad = int_term(&mut ast, "5");
        assert!(apply_access(&mut ast, container, bad).unwrap().is_empty());
    }

    #[test]
    fn test_set_access_is_membership() {
        let mut ast = Ast::new();
        let container = build!(ast, (Set (Term (Scalar (JSONInt ^ "1")))));
        let hit = int_term(&mut ast, "1");
        let result = apply_access(&mut ast, container, hit).unwrap();
        assert_eq!(to_json(&ast, result[0]), "true");
        let miss = int_term(&mut ast, "9");
        let result = apply_access(&mut ast, container, miss).unwrap();
        assert_eq!(to_json(&ast, result[0]), "false");
    }

    #[test]
    fn test_object_constructor_dedups_keys() {
        let mut ast = Ast::new();
        let k1 = build!(ast, (Scalar (JSONString ^ "\"a\"")));
        let v1 = int_term(&mut ast, "1");
        let k2 = build!(ast, (Scalar (JSONString ^ "\"a\"")));
        let v2 = int_term(&mut ast, "2");
        let result = object(&mut ast, &[k1, v1, k2, v2]);
        assert_eq!(to_json(&ast, result), "{\"a\":1}");
    }

    #[test]
    fn test_inject_args_arity_and_argval() {
        let mut ast = Ast::new();
        let rulefunc = build!(
            ast,
            (RuleFunc (Var ^ "f")
                (RuleArgs
                    (ArgVar (Var ^ "x") (Undefined))
                    (ArgVal (Scalar (JSONInt ^ "7"))))
                (UnifyBody (Local (Var ^ "x") (Undefined)))
                (Term (Scalar (JSONTrue ^ "true")))
                (JSONInt ^ "0"))
        );
        let a = int_term(&mut ast, "5");
        let bad = inject_args(&mut ast, rulefunc, &[a]);
        assert_eq!(ast.kind(bad), NodeKind::Error);
        assert!(ast.error_message(bad).contains("arity"));

        let b = int_term(&mut ast, "9");
        let mismatch = inject_args(&mut ast, rulefunc, &[a, b]);
        assert_eq!(ast.kind(mismatch), NodeKind::Undefined);

        let seven = int_term(&mut ast, "7");
        let ok = inject_args(&mut ast, rulefunc, &[a, seven]);
        assert_eq!(ok, rulefunc);
        let ruleargs = ast.child(rulefunc, 1);
        let argvar = ast.child(ruleargs, 0);
        assert_eq!(to_json(&ast, ast.child(argvar, 1)), "5");
    }

    #[test]
    fn test_truthiness() {
        let mut ast = Ast::new();
        let truthy = build!(ast, (Term (Scalar (JSONInt ^ "0"))));
        let falsy = build!(ast, (Term (Scalar (JSONFalse ^ "false"))));
        let container = build!(ast, (Term (Array)));
        let termset = ast.node(NodeKind::TermSet);
        assert!(is_truthy(&ast, truthy));
        assert!(!is_truthy(&ast, falsy));
        assert!(is_truthy(&ast, container));
        assert!(is_truthy(&ast, termset));
    }
}
