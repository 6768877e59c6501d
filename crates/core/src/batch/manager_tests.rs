// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::batch::batch_fn;
use std::sync::{Arc, Mutex};

type Seen = Arc<Mutex<Vec<(String, Vec<u32>)>>>;

/// Batch function that tags each batch with `label` and echoes values back.
fn echo(label: &str, seen: &Seen) -> BatchFn<u32, u32> {
    let label = label.to_string();
    let seen = Arc::clone(seen);
    batch_fn(move |items: Vec<Item<u32, u32>>| {
        let label = label.clone();
        let seen = Arc::clone(&seen);
        async move {
            seen.lock()
                .unwrap()
                .push((label, items.iter().map(|i| *i.value()).collect()));
            for item in items {
                let v = *item.value();
                item.resolve(Ok(v));
            }
        }
    })
}

fn manager(seen: &Seen) -> CoordinatorManager<&'static str, u32, u32> {
    CoordinatorManager::new(
        CancellationToken::new(),
        Some(echo("default", seen)),
        Some(Duration::from_secs(3600)),
    )
}

#[tokio::test(start_paused = true)]
async fn items_with_same_key_share_one_batch() {
    let seen = Seen::default();
    let manager = manager(&seen);
    let scope = CancellationToken::new();

    let a = manager.add(&scope, "op1", 2, 1, AddOptions::new()).await.unwrap();
    let b = manager.add(&scope, "op1", 2, 2, AddOptions::new()).await.unwrap();

    assert_eq!(a.wait().await.unwrap(), 1);
    assert_eq!(b.wait().await.unwrap(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("default".to_string(), vec![1, 2])]
    );
}

#[tokio::test(start_paused = true)]
async fn different_keys_batch_independently() {
    let seen = Seen::default();
    let manager = manager(&seen);
    let scope = CancellationToken::new();

    let a = manager.add(&scope, "op1", 1, 10, AddOptions::new()).await.unwrap();
    let b = manager.add(&scope, "op2", 1, 20, AddOptions::new()).await.unwrap();

    assert_eq!(a.wait().await.unwrap(), 10);
    assert_eq!(b.wait().await.unwrap(), 20);

    let mut batches: Vec<Vec<u32>> = seen.lock().unwrap().iter().map(|(_, v)| v.clone()).collect();
    batches.sort();
    assert_eq!(batches, vec![vec![10], vec![20]]);
}

#[tokio::test(start_paused = true)]
async fn options_apply_only_when_coordinator_is_created() {
    let seen = Seen::default();
    let manager = manager(&seen);
    let scope = CancellationToken::new();

    let first = manager
        .add(&scope, "op1", 2, 1, AddOptions::new().batch_fn(echo("custom", &seen)))
        .await
        .unwrap();
    let second = manager
        .add(&scope, "op1", 2, 2, AddOptions::new().batch_fn(echo("ignored", &seen)))
        .await
        .unwrap();

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("custom".to_string(), vec![1, 2])]
    );
}

#[tokio::test(start_paused = true)]
async fn finished_coordinator_is_replaced() {
    let seen = Seen::default();
    let manager = manager(&seen);
    let scope = CancellationToken::new();

    let coordinator_scope = CancellationToken::new();
    let first = manager
        .add(
            &scope,
            "op1",
            5,
            1,
            AddOptions::new().scope(coordinator_scope.clone()),
        )
        .await
        .unwrap();

    // Closing the coordinator's scope force-flushes the partial batch.
    coordinator_scope.cancel();
    assert_eq!(first.wait().await.unwrap(), 1);

    let second = manager
        .add(&scope, "op1", 1, 2, AddOptions::new().batch_fn(echo("fresh", &seen)))
        .await
        .unwrap();
    assert_eq!(second.wait().await.unwrap(), 2);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("default".to_string(), vec![1]),
            ("fresh".to_string(), vec![2]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_scope_fails_before_enqueue() {
    let seen = Seen::default();
    let manager = manager(&seen);

    let scope = CancellationToken::new();
    scope.cancel();
    let result = manager.add(&scope, "op1", 1, 1, AddOptions::new()).await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // Give any stray submission a chance to run.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn caller_cancel_while_waiting_returns_cancelled() {
    let seen = Seen::default();
    let manager = manager(&seen);

    let scope = CancellationToken::new();
    let handle = manager.add(&scope, "op1", 3, 1, AddOptions::new()).await.unwrap();
    scope.cancel();
    assert_eq!(handle.wait().await, Err(Error::Cancelled));
}

#[tokio::test]
async fn construction_errors_are_synchronous() {
    let seen = Seen::default();
    let scope = CancellationToken::new();

    let with_default = manager(&seen);
    let zero = with_default.add(&scope, "op1", 0, 1, AddOptions::new()).await;
    assert!(matches!(zero, Err(Error::InvalidExpectedCount(0))));

    let without_default: CoordinatorManager<&str, u32, u32> =
        CoordinatorManager::new(CancellationToken::new(), None, None);
    let missing = without_default.add(&scope, "op1", 1, 1, AddOptions::new()).await;
    assert!(matches!(missing, Err(Error::MissingBatchFn)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_submissions() {
    let seen = Seen::default();
    let manager = manager(&seen);
    manager.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let scope = CancellationToken::new();
    let result = manager.add(&scope, "op1", 1, 1, AddOptions::new()).await;
    match result {
        Err(Error::Cancelled) => {}
        Ok(handle) => assert_eq!(handle.wait().await, Err(Error::Cancelled)),
        Err(other) => unreachable!("unexpected error: {other}"),
    }
}
