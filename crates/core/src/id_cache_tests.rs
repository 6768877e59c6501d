// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

const TTL: Duration = Duration::from_secs(60);

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn bill(id: &str) -> SourceKey {
    SourceKey::new("Bill", id)
}

#[tokio::test(start_paused = true)]
async fn absent_realm_has_no_continuity() {
    let cache = IdentityCache::new(TTL);
    assert!(!cache.contains("realm-1").await);
    assert!(cache.is_empty().await);

    cache.realm("realm-1").await;
    assert!(cache.contains("realm-1").await);
    assert!(!cache.contains("realm-2").await);
}

#[tokio::test(start_paused = true)]
async fn record_then_read_children() {
    let cache = IdentityCache::new(TTL);
    let realm = cache.realm("realm-1").await;

    realm.record(bill("1"), "BillItemLine", ids(&["1-1", "1-2"])).await;

    assert_eq!(realm.children(&bill("1"), "BillItemLine").await, ids(&["1-1", "1-2"]));
    assert!(realm.children(&bill("1"), "BillAttachment").await.is_empty());
    assert!(realm.children(&bill("2"), "BillItemLine").await.is_empty());
}

#[parameterized(
    unchanged = { &["a", "b"], &["a", "b"], &[] },
    one_removed = { &["a", "b", "c"], &["a", "c"], &["b"] },
    all_replaced = { &["a", "b"], &["c"], &["a", "b"] },
    grown = { &["a"], &["a", "b"], &[] },
    from_nothing = { &[], &["a"], &[] },
)]
fn present_parent_emits_missing_children(previous: &[&str], current: &[&str], deleted: &[&str]) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    rt.block_on(async {
        let cache = IdentityCache::new(TTL);
        let realm = cache.realm("realm-1").await;
        if !previous.is_empty() {
            realm.record(bill("1"), "BillItemLine", ids(previous)).await;
        }

        let mut emitted = realm
            .reconcile(&bill("1"), "BillItemLine", ParentChange::Present(ids(current)))
            .await;
        emitted.sort();

        let expected: Vec<String> = deleted.iter().map(|s| s.to_string()).collect();
        assert_eq!(emitted, expected);
        assert_eq!(realm.children(&bill("1"), "BillItemLine").await, ids(current));
    });
}

#[tokio::test(start_paused = true)]
async fn replaying_payload_is_idempotent() {
    let cache = IdentityCache::new(TTL);
    let realm = cache.realm("realm-1").await;
    realm.record(bill("1"), "BillItemLine", ids(&["a", "b", "c"])).await;

    let change = ParentChange::Present(ids(&["a", "c"]));
    let first = realm.reconcile(&bill("1"), "BillItemLine", change.clone()).await;
    assert_eq!(first, vec!["b".to_string()]);
    let after_first = realm.children(&bill("1"), "BillItemLine").await;

    let second = realm.reconcile(&bill("1"), "BillItemLine", change).await;
    assert!(second.is_empty());
    assert_eq!(realm.children(&bill("1"), "BillItemLine").await, after_first);
}

#[tokio::test(start_paused = true)]
async fn deleted_parent_emits_every_cached_child_and_drops_entry() {
    let cache = IdentityCache::new(TTL);
    let realm = cache.realm("realm-1").await;
    realm.record(bill("1"), "BillItemLine", ids(&["a", "b", "c"])).await;

    let mut emitted = realm
        .reconcile(&bill("1"), "BillItemLine", ParentChange::Deleted)
        .await;
    emitted.sort();

    assert_eq!(emitted.len(), 3);
    assert_eq!(emitted, vec!["a", "b", "c"]);
    assert!(!realm.has_entry(&bill("1")).await);
}

#[tokio::test(start_paused = true)]
async fn deleted_parent_keeps_other_dependent_types() {
    let cache = IdentityCache::new(TTL);
    let realm = cache.realm("realm-1").await;
    realm.record(bill("1"), "BillItemLine", ids(&["a"])).await;
    realm.record(bill("1"), "BillAttachment", ids(&["x"])).await;

    let emitted = realm
        .reconcile(&bill("1"), "BillItemLine", ParentChange::Deleted)
        .await;
    assert_eq!(emitted, vec!["a".to_string()]);
    assert!(realm.has_entry(&bill("1")).await);
    assert_eq!(realm.children(&bill("1"), "BillAttachment").await, ids(&["x"]));
}

#[tokio::test(start_paused = true)]
async fn deleted_unknown_parent_emits_nothing() {
    let cache = IdentityCache::new(TTL);
    let realm = cache.realm("realm-1").await;
    let emitted = realm
        .reconcile(&bill("9"), "BillItemLine", ParentChange::Deleted)
        .await;
    assert!(emitted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweep_drops_idle_realms_only() {
    let cache = IdentityCache::new(TTL);
    cache.realm("idle").await;
    tokio::time::advance(Duration::from_secs(40)).await;
    let active = cache.realm("active").await;

    tokio::time::advance(Duration::from_secs(30)).await;
    active.children(&bill("1"), "BillItemLine").await;

    assert!(!cache.contains("idle").await);
    assert_eq!(cache.sweep().await, 1);
    assert_eq!(cache.len().await, 1);
    assert!(cache.contains("active").await);
}

#[tokio::test(start_paused = true)]
async fn sweeper_task_runs_until_cancelled() {
    let cache = IdentityCache::new(TTL);
    cache.realm("realm-1").await;

    let scope = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(scope.clone(), Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert!(cache.is_empty().await);

    scope.cancel();
    sweeper.await.unwrap();
}

#[test]
fn removed_lists_dropped_children() {
    let previous = ids(&["1-1", "1-2"]);

    assert_eq!(
        ParentChange::Present(ids(&["1-1", "1-3"])).removed(&previous),
        vec!["1-2"]
    );
    assert_eq!(ParentChange::Deleted.removed(&previous), vec!["1-1", "1-2"]);
    assert!(ParentChange::Present(ids(&[])).removed(&ids(&[])).is_empty());
}
