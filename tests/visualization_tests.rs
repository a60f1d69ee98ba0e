//! Visualization formatter integration tests — property P11.

use chainresolve::{render_ascii_tree, render_table, to_visualization_document, ChainError};

const LEAF_PEM: &[u8] = include_bytes!("fixtures/leaf_self_signed.pem");

fn sample_chain() -> Vec<chainresolve::Certificate> {
    let leaf = chainresolve::decode(LEAF_PEM).expect("decode fixture");
    vec![leaf]
}

#[test]
fn p11_visualization_json_array_lengths_match_chain_length() {
    let chain = sample_chain();
    let report = Ok("Revocation Status Check:\n".to_string());
    let doc = to_visualization_document(&chain, &report);

    assert_eq!(doc.certificates.len(), doc.chain_length);
    assert_eq!(doc.relationships.len(), doc.chain_length - 1);
    assert!(doc.revocation_warning.is_none());
}

#[test]
fn failed_revocation_report_surfaces_as_json_warning() {
    let chain = sample_chain();
    let report: Result<String, ChainError> = Err(ChainError::RevocationLookup("network down".to_string()));
    let doc = to_visualization_document(&chain, &report);
    assert!(doc.revocation_warning.unwrap().contains("network down"));
}

#[test]
fn ascii_tree_renders_leaf_as_self_signed() {
    let chain = sample_chain();
    let report = Ok("Revocation Status Check:\n".to_string());
    let tree = render_ascii_tree(&chain, &report);
    assert!(tree.contains("Self-Signed Certificate"));
    assert!(tree.contains("└── "));
}

#[test]
fn table_lists_every_certificate() {
    let chain = sample_chain();
    let report = Ok("Revocation Status Check:\n".to_string());
    let table = render_table(&chain, &report);
    assert_eq!(table.lines().count(), 2 /* header + separator */ + chain.len());
}

#[test]
fn json_serializes_with_camel_case_keys() {
    let chain = sample_chain();
    let report = Ok("Revocation Status Check:\n".to_string());
    let doc = to_visualization_document(&chain, &report);
    let json = serde_json::to_string(&doc).expect("serialize");
    assert!(json.contains("\"chainLength\""));
    assert!(json.contains("\"fromIndex\"") || doc.relationships.is_empty());
}
