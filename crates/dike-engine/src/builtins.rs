//! Built-in functions.
//!
//! A [`BuiltIns`] registry dispatches by name to pure functions over term
//! nodes. Builtins never panic and never throw; a failure is an `Error` node,
//! an absent result is `Undefined`.

use std::collections::HashMap;

use dike_ast::{strip_quotes, to_json, Ast, NodeId, NodeKind};

use crate::resolver::{
    bool_token, float_token, get_double, get_int, int_token, maybe_unwrap_number,
    maybe_unwrap_string, string_token, term_of_scalar, unwrap_value,
};

/// Signature of a builtin: argument value nodes in, result node out.
pub type BuiltinFn = fn(&mut Ast, &[NodeId]) -> NodeId;

/// Name-to-function dispatcher consumed by the unifier.
#[derive(Clone)]
pub struct BuiltIns {
    functions: HashMap<&'static str, BuiltinFn>,
}

impl std::fmt::Debug for BuiltIns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltIns")
            .field("count", &self.functions.len())
            .finish()
    }
}

impl Default for BuiltIns {
    fn default() -> Self {
        Self::standard()
    }
}

impl BuiltIns {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// The standard library.
    #[must_use]
    pub fn standard() -> Self {
        let mut builtins = Self::new();
        builtins.register("abs", builtin_abs);
        builtins.register("ceil", builtin_ceil);
        builtins.register("floor", builtin_floor);
        builtins.register("round", builtin_round);
        builtins.register("count", builtin_count);
        builtins.register("sum", builtin_sum);
        builtins.register("product", builtin_product);
        builtins.register("max", builtin_max);
        builtins.register("min", builtin_min);
        builtins.register("to_number", builtin_to_number);
        builtins.register("format_int", builtin_format_int);
        builtins.register("concat", builtin_concat);
        builtins.register("contains", builtin_contains);
        builtins.register("startswith", builtin_startswith);
        builtins.register("endswith", builtin_endswith);
        builtins.register("lower", builtin_lower);
        builtins.register("upper", builtin_upper);
        builtins.register("trim", builtin_trim);
        builtins.register("replace", builtin_replace);
        builtins.register("split", builtin_split);
        builtins.register("type_name", builtin_type_name);
        builtins.register("regex.match", builtin_regex_match);
        builtins
    }

    /// Registers a builtin under a name.
    pub fn register(&mut self, name: &'static str, function: BuiltinFn) {
        self.functions.insert(name, function);
    }

    /// Whether a name is registered.
    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Calls a builtin. Unknown names produce an `Error` node.
    pub fn call(&self, ast: &mut Ast, name: &str, args: &[NodeId]) -> NodeId {
        match self.functions.get(name) {
            Some(function) => function(ast, args),
            None => {
                let anchor = args.first().copied().unwrap_or_else(|| ast.node(NodeKind::Undefined));
                ast.error(anchor, format!("unknown builtin {name}"))
            }
        }
    }
}

fn arg(ast: &mut Ast, args: &[NodeId], index: usize) -> NodeId {
    args.get(index)
        .copied()
        .unwrap_or_else(|| ast.node(NodeKind::Undefined))
}

fn number_arg(ast: &mut Ast, args: &[NodeId], index: usize) -> Result<NodeId, NodeId> {
    let node = arg(ast, args, index);
    maybe_unwrap_number(ast, node).ok_or_else(|| ast.error(node, "expected a number"))
}

fn string_arg(ast: &mut Ast, args: &[NodeId], index: usize) -> Result<String, NodeId> {
    let node = arg(ast, args, index);
    match maybe_unwrap_string(ast, node) {
        Some(token) => Ok(strip_quotes(ast.text(token)).to_string()),
        None => Err(ast.error(node, "expected a string")),
    }
}

fn container_arg(ast: &mut Ast, args: &[NodeId], index: usize) -> Result<NodeId, NodeId> {
    let node = arg(ast, args, index);
    let inner = match ast.kind(node) {
        NodeKind::Term | NodeKind::DataTerm => ast.front(node).unwrap_or(node),
        _ => node,
    };
    match ast.kind(inner) {
        NodeKind::Array
        | NodeKind::DataArray
        | NodeKind::Set
        | NodeKind::DataSet
        | NodeKind::Object
        | NodeKind::DataObject => Ok(inner),
        _ => Err(ast.error(node, "expected a collection")),
    }
}

macro_rules! try_arg {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(error) => return error,
        }
    };
}

fn builtin_abs(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let number = try_arg!(number_arg(ast, args, 0));
    let token = if ast.kind(number) == NodeKind::JSONInt {
        let value = get_int(ast, number).abs();
        int_token(ast, value)
    } else {
        let value = get_double(ast, number).abs();
        float_token(ast, value)
    };
    term_of_scalar(ast, token)
}

fn rounding(ast: &mut Ast, args: &[NodeId], round: fn(f64) -> f64) -> NodeId {
    let number = try_arg!(number_arg(ast, args, 0));
    let value = if ast.kind(number) == NodeKind::JSONInt {
        get_int(ast, number)
    } else {
        round(get_double(ast, number)) as i64
    };
    let token = int_token(ast, value);
    term_of_scalar(ast, token)
}

fn builtin_ceil(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    rounding(ast, args, f64::ceil)
}

fn builtin_floor(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    rounding(ast, args, f64::floor)
}

fn builtin_round(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    rounding(ast, args, f64::round)
}

fn builtin_count(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let node = arg(ast, args, 0);
    let count = if let Some(token) = maybe_unwrap_string(ast, node) {
        strip_quotes(ast.text(token)).chars().count()
    } else {
        let container = try_arg!(container_arg(ast, args, 0));
        ast.len(container)
    };
    let token = int_token(ast, count as i64);
    term_of_scalar(ast, token)
}

enum Fold {
    Sum,
    Product,
}

fn numeric_fold(ast: &mut Ast, args: &[NodeId], fold: &Fold) -> NodeId {
    let container = try_arg!(container_arg(ast, args, 0));
    let members: Vec<NodeId> = ast.children(container).to_vec();
    let mut int_acc: i64 = match fold {
        Fold::Sum => 0,
        Fold::Product => 1,
    };
    let mut float_acc: f64 = int_acc as f64;
    let mut any_float = false;
    for member in members {
        let Some(number) = maybe_unwrap_number(ast, member) else {
            return ast.error(member, "expected a number");
        };
        if ast.kind(number) == NodeKind::JSONFloat {
            any_float = true;
        }
        let value = get_double(ast, number);
        match fold {
            Fold::Sum => {
                int_acc = int_acc.wrapping_add(value as i64);
                float_acc += value;
            }
            Fold::Product => {
                int_acc = int_acc.wrapping_mul(value as i64);
                float_acc *= value;
            }
        }
    }
    let token = if any_float {
        float_token(ast, float_acc)
    } else {
        int_token(ast, int_acc)
    };
    term_of_scalar(ast, token)
}

fn builtin_sum(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    numeric_fold(ast, args, &Fold::Sum)
}

fn builtin_product(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    numeric_fold(ast, args, &Fold::Product)
}

fn extremum(ast: &mut Ast, args: &[NodeId], want_max: bool) -> NodeId {
    let container = try_arg!(container_arg(ast, args, 0));
    let members: Vec<NodeId> = ast.children(container).to_vec();
    if members.is_empty() {
        return ast.node(NodeKind::Undefined);
    }
    let mut best = members[0];
    for &member in &members[1..] {
        let ordering = match (
            maybe_unwrap_number(ast, best),
            maybe_unwrap_number(ast, member),
        ) {
            (Some(a), Some(b)) => get_double(ast, a)
                .partial_cmp(&get_double(ast, b))
                .unwrap_or(std::cmp::Ordering::Equal),
            _ => to_json(ast, best).cmp(&to_json(ast, member)),
        };
        let replace = if want_max {
            ordering.is_lt()
        } else {
            ordering.is_gt()
        };
        if replace {
            best = member;
        }
    }
    ast.deep_clone(best)
}

fn builtin_max(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    extremum(ast, args, true)
}

fn builtin_min(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    extremum(ast, args, false)
}

fn builtin_to_number(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let node = arg(ast, args, 0);
    if let Some(number) = maybe_unwrap_number(ast, node) {
        let clone = ast.deep_clone(number);
        return term_of_scalar(ast, clone);
    }
    let text = try_arg!(string_arg(ast, args, 0));
    let token = if let Ok(value) = text.parse::<i64>() {
        int_token(ast, value)
    } else if let Ok(value) = text.parse::<f64>() {
        float_token(ast, value)
    } else {
        return ast.error(node, "not a number");
    };
    term_of_scalar(ast, token)
}

fn builtin_format_int(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let number = try_arg!(number_arg(ast, args, 0));
    let value = if ast.kind(number) == NodeKind::JSONInt {
        get_int(ast, number)
    } else {
        // fractional inputs round toward zero
        get_double(ast, number) as i64
    };
    let base_node = try_arg!(number_arg(ast, args, 1));
    let base = get_int(ast, base_node);
    let magnitude = value.unsigned_abs();
    let digits = match base {
        2 => format!("{magnitude:b}"),
        8 => format!("{magnitude:o}"),
        10 => format!("{magnitude}"),
        16 => format!("{magnitude:x}"),
        _ => return ast.error(base_node, "format_int: base must be 2, 8, 10, or 16"),
    };
    let text = if value < 0 {
        format!("-{digits}")
    } else {
        digits
    };
    let token = string_token(ast, &text);
    term_of_scalar(ast, token)
}

fn builtin_concat(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let delimiter = try_arg!(string_arg(ast, args, 0));
    let container = try_arg!(container_arg(ast, args, 1));
    let members: Vec<NodeId> = ast.children(container).to_vec();
    let mut parts = Vec::with_capacity(members.len());
    for member in members {
        let Some(token) = maybe_unwrap_string(ast, member) else {
            return ast.error(member, "expected a string");
        };
        parts.push(strip_quotes(ast.text(token)).to_string());
    }
    let token = string_token(ast, &parts.join(&delimiter));
    term_of_scalar(ast, token)
}

fn string_predicate(
    ast: &mut Ast,
    args: &[NodeId],
    predicate: fn(&str, &str) -> bool,
) -> NodeId {
    let haystack = try_arg!(string_arg(ast, args, 0));
    let needle = try_arg!(string_arg(ast, args, 1));
    let token = bool_token(ast, predicate(&haystack, &needle));
    term_of_scalar(ast, token)
}

fn builtin_contains(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    string_predicate(ast, args, |h, n| h.contains(n))
}

fn builtin_startswith(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    string_predicate(ast, args, |h, n| h.starts_with(n))
}

fn builtin_endswith(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    string_predicate(ast, args, |h, n| h.ends_with(n))
}

fn string_map(ast: &mut Ast, args: &[NodeId], map: fn(&str) -> String) -> NodeId {
    let text = try_arg!(string_arg(ast, args, 0));
    let token = string_token(ast, &map(&text));
    term_of_scalar(ast, token)
}

fn builtin_lower(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    string_map(ast, args, |s| s.to_lowercase())
}

fn builtin_upper(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    string_map(ast, args, |s| s.to_uppercase())
}

fn builtin_trim(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let text = try_arg!(string_arg(ast, args, 0));
    let cutset = try_arg!(string_arg(ast, args, 1));
    let trimmed = text.trim_matches(|c| cutset.contains(c));
    let token = string_token(ast, trimmed);
    term_of_scalar(ast, token)
}

fn builtin_replace(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let text = try_arg!(string_arg(ast, args, 0));
    let old = try_arg!(string_arg(ast, args, 1));
    let new = try_arg!(string_arg(ast, args, 2));
    let token = string_token(ast, &text.replace(&old, &new));
    term_of_scalar(ast, token)
}

fn builtin_split(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let text = try_arg!(string_arg(ast, args, 0));
    let delimiter = try_arg!(string_arg(ast, args, 1));
    let array = ast.node(NodeKind::Array);
    for part in text.split(&delimiter) {
        let token = string_token(ast, part);
        let term = term_of_scalar(ast, token);
        ast.push_back(array, term);
    }
    let term = ast.node(NodeKind::Term);
    ast.push_back(term, array);
    term
}

fn builtin_type_name(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let node = arg(ast, args, 0);
    let value = unwrap_value(ast, node);
    let name = match ast.kind(value) {
        NodeKind::JSONInt | NodeKind::JSONFloat => "number",
        NodeKind::JSONString => "string",
        NodeKind::JSONTrue | NodeKind::JSONFalse => "boolean",
        NodeKind::JSONNull => "null",
        NodeKind::Array | NodeKind::DataArray => "array",
        NodeKind::Object | NodeKind::DataObject => "object",
        NodeKind::Set | NodeKind::DataSet => "set",
        NodeKind::Undefined => "undefined",
        _ => "unknown",
    };
    let token = string_token(ast, name);
    term_of_scalar(ast, token)
}

fn builtin_regex_match(ast: &mut Ast, args: &[NodeId]) -> NodeId {
    let pattern = try_arg!(string_arg(ast, args, 0));
    let value = try_arg!(string_arg(ast, args, 1));
    match regex::Regex::new(&pattern) {
        Ok(re) => {
            let token = bool_token(ast, re.is_match(&value));
            term_of_scalar(ast, token)
        }
        Err(err) => {
            let anchor = arg(ast, args, 0);
            ast.error(anchor, format!("invalid regex: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::build;

    fn call(ast: &mut Ast, name: &str, args: &[NodeId]) -> String {
        let builtins = BuiltIns::standard();
        let result = builtins.call(ast, name, args);
        to_json(ast, result)
    }

    #[test]
    fn test_count_array_and_string() {
        let mut ast = Ast::new();
        let array = build!(
            ast,
            (Term (Array (Term (Scalar (JSONInt ^ "1"))) (Term (Scalar (JSONInt ^ "2")))))
        );
        assert_eq!(call(&mut ast, "count", &[array]), "2");
        let text = build!(ast, (Term (Scalar (JSONString ^ "\"abc\""))));
        assert_eq!(call(&mut ast, "count", &[text]), "3");
    }

    #[test]
    fn test_sum_and_product() {
        let mut ast = Ast::new();
        let array = build!(
            ast,
            (Term (Array
                (Term (Scalar (JSONInt ^ "2")))
                (Term (Scalar (JSONInt ^ "3")))
                (Term (Scalar (JSONInt ^ "4")))))
        );
        assert_eq!(call(&mut ast, "sum", &[array]), "9");
        assert_eq!(call(&mut ast, "product", &[array]), "24");
    }

    #[test]
    fn test_max_min() {
        let mut ast = Ast::new();
        let array = build!(
            ast,
            (Term (Array
                (Term (Scalar (JSONInt ^ "5")))
                (Term (Scalar (JSONInt ^ "1")))
                (Term (Scalar (JSONInt ^ "3")))))
        );
        assert_eq!(call(&mut ast, "max", &[array]), "5");
        assert_eq!(call(&mut ast, "min", &[array]), "1");
    }

    #[test]
    fn test_string_helpers() {
        let mut ast = Ast::new();
        let text = build!(ast, (Term (Scalar (JSONString ^ "\"Hello\""))));
        assert_eq!(call(&mut ast, "lower", &[text]), "\"hello\"");
        let prefix = build!(ast, (Term (Scalar (JSONString ^ "\"He\""))));
        assert_eq!(call(&mut ast, "startswith", &[text, prefix]), "true");
    }

    #[test]
    fn test_split() {
        let mut ast = Ast::new();
        let text = build!(ast, (Term (Scalar (JSONString ^ "\"a,b\""))));
        let delim = build!(ast, (Term (Scalar (JSONString ^ "\",\""))));
        assert_eq!(call(&mut ast, "split", &[text, delim]), "[\"a\",\"b\"]");
    }

    #[test]
    fn test_format_int() {
        let mut ast = Ast::new();
        let value = build!(ast, (Term (Scalar (JSONInt ^ "255"))));
        let hex = build!(ast, (Term (Scalar (JSONInt ^ "16"))));
        assert_eq!(call(&mut ast, "format_int", &[value, hex]), "\"ff\"");
        let binary = build!(ast, (Term (Scalar (JSONInt ^ "2"))));
        assert_eq!(call(&mut ast, "format_int", &[value, binary]), "\"11111111\"");
        let negative = build!(ast, (Term (Scalar (JSONInt ^ "-9"))));
        let decimal = build!(ast, (Term (Scalar (JSONInt ^ "10"))));
        assert_eq!(call(&mut ast, "format_int", &[negative, decimal]), "\"-9\"");
        let bad_base = build!(ast, (Term (Scalar (JSONInt ^ "7"))));
        let builtins = BuiltIns::standard();
        let result = builtins.call(&mut ast, "format_int", &[value, bad_base]);
        assert_eq!(ast.kind(result), NodeKind::Error);
    }

    #[test]
    fn test_type_name() {
        let mut ast = Ast::new();
        let number = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        assert_eq!(call(&mut ast, "type_name", &[number]), "\"number\"");
    }

    #[test]
    fn test_regex_match() {
        let mut ast = Ast::new();
        let pattern = build!(ast, (Term (Scalar (JSONString ^ "\"^a+$\""))));
        let value = build!(ast, (Term (Scalar (JSONString ^ "\"aaa\""))));
        assert_eq!(call(&mut ast, "regex.match", &[pattern, value]), "true");
    }

    #[test]
    fn test_error_not_exception() {
        let mut ast = Ast::new();
        let bogus = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let builtins = BuiltIns::standard();
        let result = builtins.call(&mut ast, "lower", &[bogus]);
        assert_eq!(ast.kind(result), NodeKind::Error);
    }

    #[test]
    fn test_unknown_builtin() {
        let mut ast = Ast::new();
        let node = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let builtins = BuiltIns::standard();
        let result = builtins.call(&mut ast, "no.such.builtin", &[node]);
        assert_eq!(ast.kind(result), NodeKind::Error);
    }
}
