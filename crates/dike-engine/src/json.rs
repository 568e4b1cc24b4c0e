//! JSON document reader.
//!
//! Parses `data`/`input` documents with `serde_json` and converts them into
//! the `DataItemSeq`/`DataItem`/`DataTerm` shape the `merge_data` pass
//! expects. JSON has no set syntax; sets only arise in the rule language.

use dike_ast::{Ast, NodeId, NodeKind};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Parses a JSON document into a `DataItemSeq`.
///
/// The top level must be an object; its entries become `DataItem` nodes.
pub fn parse_data_document(ast: &mut Ast, name: &str, text: &str) -> Result<NodeId> {
    let value: Value = serde_json::from_str(text).map_err(|source| EngineError::JsonError {
        source_name: name.to_string(),
        source,
    })?;
    let Value::Object(entries) = value else {
        return Err(EngineError::ParseError {
            source_name: name.to_string(),
            location: name.to_string(),
            message: "Top-level JSON document must be an object".to_string(),
        });
    };
    let seq = ast.node(NodeKind::DataItemSeq);
    for (key, entry) in entries {
        let item = data_item(ast, &key, &entry);
        ast.push_back(seq, item);
    }
    Ok(seq)
}

/// Parses a JSON document into a bare `DataTerm`, used for non-object input
/// documents.
pub fn parse_term_document(ast: &mut Ast, name: &str, text: &str) -> Result<NodeId> {
    let value: Value = serde_json::from_str(text).map_err(|source| EngineError::JsonError {
        source_name: name.to_string(),
        source,
    })?;
    Ok(data_term(ast, &value))
}

fn data_item(ast: &mut Ast, key: &str, value: &Value) -> NodeId {
    let item = ast.node(NodeKind::DataItem);
    let key_node = ast.token(NodeKind::Key, key);
    let term = data_term(ast, value);
    ast.push_back(item, key_node);
    ast.push_back(item, term);
    item
}

/// Converts a JSON value into a `DataTerm` subtree.
pub fn data_term(ast: &mut Ast, value: &Value) -> NodeId {
    let term = ast.node(NodeKind::DataTerm);
    let inner = match value {
        Value::Null => scalar(ast, NodeKind::JSONNull, "null"),
        Value::Bool(true) => scalar(ast, NodeKind::JSONTrue, "true"),
        Value::Bool(false) => scalar(ast, NodeKind::JSONFalse, "false"),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                scalar(ast, NodeKind::JSONInt, n.to_string())
            } else {
                scalar(ast, NodeKind::JSONFloat, n.to_string())
            }
        }
        Value::String(s) => scalar(
            ast,
            NodeKind::JSONString,
            serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\"")),
        ),
        Value::Array(items) => {
            let array = ast.node(NodeKind::DataArray);
            for item in items {
                let child = data_term(ast, item);
                ast.push_back(array, child);
            }
            array
        }
        Value::Object(entries) => {
            let object = ast.node(NodeKind::DataObject);
            for (key, entry) in entries {
                let item = data_item(ast, key, entry);
                ast.push_back(object, item);
            }
            object
        }
    };
    ast.push_back(term, inner);
    term
}

fn scalar(ast: &mut Ast, kind: NodeKind, text: impl AsRef<str>) -> NodeId {
    let token = ast.token(kind, text);
    let scalar = ast.node(NodeKind::Scalar);
    ast.push_back(scalar, token);
    scalar
}

#[cfg(test)]
mod tests {
    use super::*;
    use dike_ast::to_json;

    #[test]
    fn test_object_document() {
        let mut ast = Ast::new();
        let seq =
            parse_data_document(&mut ast, "data", r#"{"user": "alice", "count": 3}"#).unwrap();
        assert_eq!(ast.kind(seq), NodeKind::DataItemSeq);
        assert_eq!(ast.len(seq), 2);
        let first = ast.child(seq, 0);
        assert_eq!(ast.text(ast.child(first, 0)), "user");
    }

    #[test]
    fn test_round_trip_canonical() {
        let mut ast = Ast::new();
        let term = parse_term_document(
            &mut ast,
            "input",
            r#"{"b": [1, 2.5, null], "a": {"nested": true}}"#,
        )
        .unwrap();
        assert_eq!(
            to_json(&ast, term),
            r#"{"a":{"nested":true},"b":[1,2.5,null]}"#
        );
    }

    #[test]
    fn test_non_object_data_rejected() {
        let mut ast = Ast::new();
        let result = parse_data_document(&mut ast, "data", "[1, 2]");
        assert!(matches!(result, Err(EngineError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let mut ast = Ast::new();
        let result = parse_data_document(&mut ast, "data", "{nope}");
        assert!(matches!(result, Err(EngineError::JsonError { .. })));
    }

    #[test]
    fn test_integer_vs_float() {
        let mut ast = Ast::new();
        let term = parse_term_document(&mut ast, "input", "[4, 4.5]").unwrap();
        assert_eq!(to_json(&ast, term), "[4,4.5]");
    }
}
