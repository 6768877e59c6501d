// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

#[parameterized(
    full_page = { 3, 3, true },
    short_page = { 2, 3, false },
    empty_page = { 0, 3, false },
)]
fn has_more_when_page_is_full(count: usize, page_size: u32, expected: bool) {
    let mut group = SourceGroup::new(SourceMode::Normal);
    let entities = (0..count).map(|i| json!({"Id": i.to_string()})).collect();
    group.insert_page(1, entities, page_size);

    assert_eq!(group.page(1).map(|p| p.has_more), Some(expected));
}

#[test]
fn release_counts_down_uses() {
    let mut group = SourceGroup::new(SourceMode::Delta);
    group.add_use(false);
    group.add_use(true);
    assert!(group.needs_attachments);

    assert!(!group.release());
    assert!(group.release());
    assert!(group.release());
}

#[test]
fn discard_keeps_later_pages() {
    let mut group = SourceGroup::new(SourceMode::Normal);
    group.insert_page(1, vec![], 10);
    group.insert_page(2, vec![], 10);

    group.discard_through(1);

    assert!(group.page(1).is_none());
    assert!(group.page(2).is_some());
}

#[test]
fn attachments_are_indexed_by_parent() {
    let mut group = SourceGroup::new(SourceMode::Normal);
    let attachments = [
        json!({"Id": "a", "AttachableRef": [{"EntityRef": {"type": "Bill", "value": "1"}}]}),
        json!({"Id": "b", "AttachableRef": [
            {"EntityRef": {"type": "Bill", "value": "1"}},
            {"EntityRef": {"type": "Bill", "value": "2"}},
        ]}),
        json!({"Id": "c", "AttachableRef": [{"EntityRef": {"type": "Invoice", "value": "1"}}]}),
    ];

    group.index_attachments("Bill", attachments.iter());

    assert_eq!(group.attachments_for(&json!({"Id": "1"})).len(), 2);
    assert_eq!(group.attachments_for(&json!({"Id": "2"})).len(), 1);
    assert!(group.attachments_for(&json!({"Id": "3"})).is_empty());
}
