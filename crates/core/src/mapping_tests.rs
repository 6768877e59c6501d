// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;

fn bill() -> Value {
    json!({
        "Id": "1",
        "TotalAmt": 120.5,
        "VendorRef": {"value": "56"},
        "Line": [
            {"Id": "1", "Amount": 100, "DetailType": "AccountBasedExpenseLineDetail"},
            {"Id": "2", "Amount": 20.5, "DetailType": "ItemBasedExpenseLineDetail"},
        ],
    })
}

#[test]
fn primary_mapping_yields_one_record() {
    let mapping = JsonMapping::new()
        .field("total", "/TotalAmt")
        .field("vendor_id", "/VendorRef/value")
        .field("memo", "/PrivateNote");

    let records = mapping.map(&EntityRef::new(&bill())).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "1");
    assert_eq!(records[0].fields["total"], json!(120.5));
    assert_eq!(records[0].fields["vendor_id"], json!("56"));
    assert_eq!(records[0].fields["memo"], Value::Null);
}

#[test]
fn nested_children_get_prefixed_ids() {
    let mapping = JsonMapping::new().children("/Line").field("amount", "/Amount");

    let records = mapping.map(&EntityRef::new(&bill())).unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1-1", "1-2"]);
    assert_eq!(records[1].fields["parent_id"], json!("1"));
    assert_eq!(records[1].fields["amount"], json!(20.5));
}

#[test]
fn filter_applies_to_children() {
    let mapping = JsonMapping::new()
        .children("/Line")
        .filter("/DetailType", "ItemBasedExpenseLineDetail");

    let records = mapping.map(&EntityRef::new(&bill())).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "1-2");
}

#[test]
fn filter_applies_to_primary_entities() {
    let mapping = JsonMapping::new().filter("/TotalAmt", 0);
    assert!(mapping.map(&EntityRef::new(&bill())).unwrap().is_empty());
}

#[test]
fn missing_children_array_yields_nothing() {
    let mapping = JsonMapping::new().children("/Line");
    let entity = json!({"Id": "9"});
    assert!(mapping.map(&EntityRef::new(&entity)).unwrap().is_empty());
}

#[test]
fn attachments_map_linked_files() {
    let mapping = JsonMapping::new().attachments().field("file", "/FileName");
    let attachments = vec![json!({"Id": "900", "FileName": "invoice.pdf"})];
    let entity = bill();

    let records = mapping
        .map(&EntityRef::new(&entity).with_attachments(&attachments))
        .unwrap();

    assert!(mapping.needs_attachments());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "1-900");
    assert_eq!(records[0].fields["file"], json!("invoice.pdf"));
}

#[test]
fn numeric_ids_are_stringified() {
    let mapping = JsonMapping::new();
    let entity = json!({"Id": 17});
    assert_eq!(mapping.map(&EntityRef::new(&entity)).unwrap()[0].id, "17");
}

#[test]
fn missing_id_is_a_transform_error() {
    let mapping = JsonMapping::new();
    let err = mapping.map(&EntityRef::new(&json!({"Name": "x"}))).unwrap_err();
    assert!(matches!(err, Error::Transform { .. }));
}

#[test]
fn closures_are_mappings() {
    let mapping = |entity: &EntityRef<'_>| -> Result<Vec<Record>> {
        let id = entity_id(entity.value).unwrap_or_default();
        Ok(vec![Record::new(id, Map::new())])
    };
    assert_eq!(mapping.map(&EntityRef::new(&bill())).unwrap()[0].id, "1");
    assert!(!mapping.needs_attachments());
}

#[test]
fn parses_from_toml_style_json() {
    let mapping: JsonMapping = serde_json::from_value(json!({
        "children": "/Line",
        "fields": {"amount": "/Amount"},
    }))
    .unwrap();
    assert_eq!(mapping.id, "/Id");
    assert_eq!(mapping.children.as_deref(), Some("/Line"));
}
