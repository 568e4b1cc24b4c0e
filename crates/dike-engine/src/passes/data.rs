//! Base document merging.

use std::collections::BTreeMap;

use dike_ast::{build, Ast, NodeId, NodeKind};
use NodeKind::*;

use crate::rewrite::{t, PassDef, Rule};

/// Merges every loaded data document into one `Data` tree with the `data`
/// variable identity attached.
pub fn merge_data() -> PassDef {
    PassDef::new(
        "merge_data",
        vec![Rule::new(
            &[Rego],
            vec![t(&[DataSeq]).bind("seq")],
            |ast, env| {
                let seq = env.node("seq");
                let documents: Vec<NodeId> = ast.children(seq).to_vec();
                let merged = merge_item_seqs(ast, &documents);
                build!(ast, (Data (Var ^ "data") @merged))
            },
        )],
    )
}

/// Merges `DataItemSeq`s key by key: objects merge recursively, anything else
/// is replaced by the later document.
fn merge_item_seqs(ast: &mut Ast, seqs: &[NodeId]) -> NodeId {
    let mut merged: BTreeMap<String, NodeId> = BTreeMap::new();
    for &seq in seqs {
        for &item in ast.children(seq).to_vec().iter() {
            let key = ast.text(ast.child(item, 0)).to_string();
            let value = ast.child(item, 1);
            match merged.get(&key) {
                Some(&existing) => {
                    let combined = merge_terms(ast, existing, value);
                    merged.insert(key, combined);
                }
                None => {
                    ast.detach(value);
                    merged.insert(key, value);
                }
            }
        }
    }
    let result = ast.node(DataItemSeq);
    for (key, value) in merged {
        let item = ast.node(DataItem);
        let key_node = ast.token(Key, key);
        ast.push_back(item, key_node);
        ast.push_back(item, value);
        ast.push_back(result, item);
    }
    result
}

fn merge_terms(ast: &mut Ast, left: NodeId, right: NodeId) -> NodeId {
    let left_inner = ast.front(left);
    let right_inner = ast.front(right);
    match (left_inner, right_inner) {
        (Some(l), Some(r))
            if ast.kind(l) == DataObject && ast.kind(r) == DataObject =>
        {
            let merged = merge_item_seqs(ast, &[l, r]);
            // merge_item_seqs builds a DataItemSeq; rewrap as an object term
            ast.set_kind(merged, DataObject);
            build!(ast, (DataTerm @merged))
        }
        _ => {
            ast.detach(right);
            right
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::parse_data_document;
    use crate::rewrite::run_pass;
    use dike_ast::to_json;

    #[test]
    fn test_merge_two_documents() {
        let mut ast = Ast::new();
        let first = parse_data_document(&mut ast, "a", r#"{"p": {"x": 1}}"#).unwrap();
        let second = parse_data_document(&mut ast, "b", r#"{"p": {"y": 2}, "q": 3}"#).unwrap();
        let rego = build!(ast, (Rego (Query) (Input (Var ^ "input") (Undefined)) (DataSeq @first @second) (ModuleSeq)));
        run_pass(&mut ast, rego, &merge_data()).unwrap();
        let data = ast.child(rego, 2);
        assert_eq!(ast.kind(data), Data);
        assert_eq!(ast.text(ast.child(data, 0)), "data");
        let items = ast.child(data, 1);
        assert_eq!(ast.len(items), 2);
        let p = ast.child(items, 0);
        assert_eq!(to_json(&ast, ast.child(p, 1)), r#"{"x":1,"y":2}"#);
    }

    #[test]
    fn test_later_document_wins_on_scalars() {
        let mut ast = Ast::new();
        let first = parse_data_document(&mut ast, "a", r#"{"v": 1}"#).unwrap();
        let second = parse_data_document(&mut ast, "b", r#"{"v": 2}"#).unwrap();
        let rego = build!(ast, (Rego (Query) (Input (Var ^ "input") (Undefined)) (DataSeq @first @second) (ModuleSeq)));
        run_pass(&mut ast, rego, &merge_data()).unwrap();
        let data = ast.child(rego, 2);
        let items = ast.child(data, 1);
        let v = ast.child(items, 0);
        assert_eq!(to_json(&ast, ast.child(v, 1)), "2");
    }
}
