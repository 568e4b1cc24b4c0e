//! Canonical rendering.
//!
//! [`to_json`] is the single rendering function for terms: value equality,
//! set/object deduplication, and the query output format all go through it.
//! [`dump_tree`] is the deterministic debug form written after each pass.

use std::fmt::Write as _;

use crate::arena::{Ast, NodeId};
use crate::kind::NodeKind;

/// Removes one layer of surrounding double quotes, if present.
#[must_use]
pub fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Formats a float with 8 significant digits and no trailing zeros,
/// matching the canonical output format.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    let formatted = if (-4..8).contains(&exponent) {
        let decimals = (7 - exponent).max(0) as usize;
        let fixed = format!("{value:.decimals$}");
        trim_trailing_zeros(&fixed)
    } else {
        let sci = format!("{value:.7e}");
        compact_scientific(&sci)
    };
    formatted
}

fn trim_trailing_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

fn compact_scientific(text: &str) -> String {
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            format!("{}e{exponent}", trim_trailing_zeros(mantissa))
        }
        None => text.to_string(),
    }
}

/// Renders a term subtree as canonical JSON.
///
/// Objects render with keys sorted; sets render as arrays sorted by member
/// representation. Non-term kinds (rules, modules) render as their kind name,
/// which gives the mixed-type ordering used by comparisons.
#[must_use]
pub fn to_json(ast: &Ast, id: NodeId) -> String {
    let mut out = String::new();
    write_json(ast, id, &mut out);
    out
}

fn write_json(ast: &Ast, id: NodeId, out: &mut String) {
    match ast.kind(id) {
        NodeKind::Term
        | NodeKind::DataTerm
        | NodeKind::Scalar
        | NodeKind::NumTerm
        | NodeKind::DefaultTerm => {
            if let Some(front) = ast.front(id) {
                write_json(ast, front, out);
            } else {
                out.push_str("undefined");
            }
        }
        NodeKind::JSONInt | NodeKind::JSONTrue | NodeKind::JSONFalse | NodeKind::JSONNull => {
            out.push_str(ast.text(id));
        }
        NodeKind::JSONFloat => {
            let text = ast.text(id);
            match text.parse::<f64>() {
                Ok(value) => out.push_str(&format_float(value)),
                Err(_) => out.push_str(text),
            }
        }
        NodeKind::JSONString => {
            let text = ast.text(id);
            if text.starts_with('"') {
                out.push_str(text);
            } else {
                write_quoted(text, out);
            }
        }
        NodeKind::RawString => {
            write_quoted(ast.text(id).trim_matches('`'), out);
        }
        NodeKind::Key | NodeKind::Var => {
            write_quoted(ast.text(id), out);
        }
        NodeKind::Array | NodeKind::DataArray => {
            out.push('[');
            for (i, &child) in ast.children(id).iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(ast, child, out);
            }
            out.push(']');
        }
        NodeKind::Set | NodeKind::DataSet | NodeKind::TermSet => {
            let mut members: Vec<String> =
                ast.children(id).iter().map(|&c| to_json(ast, c)).collect();
            members.sort();
            members.dedup();
            out.push('[');
            out.push_str(&members.join(","));
            out.push(']');
        }
        NodeKind::Object | NodeKind::DataObject => {
            let mut items: Vec<(String, String)> = ast
                .children(id)
                .iter()
                .map(|&item| {
                    let key = ast.child(item, 0);
                    let key_text = match ast.kind(key) {
                        NodeKind::Key => format!("\"{}\"", ast.text(key)),
                        _ => to_json(ast, key),
                    };
                    (key_text, to_json(ast, ast.child(item, 1)))
                })
                .collect();
            items.sort();
            out.push('{');
            for (i, (key, value)) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('}');
        }
        NodeKind::Binding => {
            out.push('{');
            write_quoted(ast.text(ast.child(id, 0)), out);
            out.push(':');
            write_json(ast, ast.child(id, 1), out);
            out.push('}');
        }
        NodeKind::Input | NodeKind::Data => {
            // identity variable first, document payload last
            match ast.back(id) {
                Some(payload) => write_json(ast, payload, out),
                None => out.push_str("undefined"),
            }
        }
        NodeKind::DataItemSeq => {
            let mut items: Vec<(String, String)> = ast
                .children(id)
                .iter()
                .map(|&item| {
                    (
                        format!("\"{}\"", ast.text(ast.child(item, 0))),
                        to_json(ast, ast.child(item, 1)),
                    )
                })
                .collect();
            items.sort();
            out.push('{');
            for (i, (key, value)) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('}');
        }
        NodeKind::Undefined => out.push_str("undefined"),
        NodeKind::Error => {
            out.push_str("{\"error\":");
            write_quoted(ast.error_message(id), out);
            out.push('}');
        }
        kind => out.push_str(kind.name()),
    }
}

fn write_quoted(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Writes the deterministic indented tree form used by debug dumps.
#[must_use]
pub fn dump_tree(ast: &Ast, id: NodeId) -> String {
    let mut out = String::new();
    dump_node(ast, id, 0, &mut out);
    out
}

fn dump_node(ast: &Ast, id: NodeId, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    let _ = write!(out, "({}", ast.kind(id).name());
    let text = ast.text(id);
    if !text.is_empty() {
        let _ = write!(out, " {text:?}");
    }
    if ast.is_empty(id) {
        out.push(')');
        out.push('\n');
        return;
    }
    out.push('\n');
    for &child in ast.children(id) {
        dump_node(ast, child, depth + 1, out);
    }
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push(')');
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build;

    #[test]
    fn test_scalar_rendering() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "42"))));
        assert_eq!(to_json(&ast, term), "42");
    }

    #[test]
    fn test_string_rendering_keeps_quotes() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONString ^ "\"hello\""))));
        assert_eq!(to_json(&ast, term), "\"hello\"");
    }

    #[test]
    fn test_object_keys_sorted() {
        let mut ast = Ast::new();
        let object = build!(
            ast,
            (Object
                (ObjectItem (Key ^ "b") (Term (Scalar (JSONInt ^ "2"))))
                (ObjectItem (Key ^ "a") (Term (Scalar (JSONInt ^ "1")))))
        );
        assert_eq!(to_json(&ast, object), "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn test_set_sorted_and_deduped() {
        let mut ast = Ast::new();
        let set = build!(
            ast,
            (Set
                (Term (Scalar (JSONInt ^ "4")))
                (Term (Scalar (JSONInt ^ "2")))
                (Term (Scalar (JSONInt ^ "4"))))
        );
        assert_eq!(to_json(&ast, set), "[2,4]");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(1.0 / 3.0), "0.33333333");
        assert_eq!(format_float(12345678.0), "12345678");
    }

    #[test]
    fn test_json_round_trip_canonical() {
        let mut ast = Ast::new();
        let array = build!(
            ast,
            (Array
                (Term (Scalar (JSONFloat ^ "1.50")))
                (Term (Scalar (JSONNull ^ "null"))))
        );
        assert_eq!(to_json(&ast, array), "[1.5,null]");
    }

    #[test]
    fn test_dump_tree_shape() {
        let mut ast = Ast::new();
        let term = build!(ast, (Term (Scalar (JSONInt ^ "1"))));
        let dump = dump_tree(&ast, term);
        assert!(dump.starts_with("(Term\n"));
        assert!(dump.contains("(JSONInt \"1\")"));
    }
}
