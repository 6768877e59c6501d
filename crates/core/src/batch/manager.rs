// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Routes items to one live coordinator per key.
//!
//! All submissions go through a single dispatcher task, which makes
//! lookup-or-create-then-enqueue atomic per key without a shared lock.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::coordinator::{BatchFn, Coordinator, CoordinatorHandle};
use super::item::{Item, ItemHandle};
use crate::error::{Error, Result};

/// Capacity of the submission channel; `add` waits while it is full.
const SUBMISSION_BUFFER: usize = 64;

/// Per-call overrides for the coordinator created on first use of a key.
///
/// Ignored when a live coordinator already serves the key.
pub struct AddOptions<T, R> {
    batch_fn: Option<BatchFn<T, R>>,
    timeout: Option<Option<Duration>>,
    scope: Option<CancellationToken>,
}

impl<T, R> Default for AddOptions<T, R> {
    fn default() -> Self {
        AddOptions {
            batch_fn: None,
            timeout: None,
            scope: None,
        }
    }
}

impl<T, R> AddOptions<T, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_fn(mut self, f: BatchFn<T, R>) -> Self {
        self.batch_fn = Some(f);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    /// Scope the coordinator runs under. Defaults to a child of the
    /// manager's root scope.
    pub fn scope(mut self, scope: CancellationToken) -> Self {
        self.scope = Some(scope);
        self
    }
}

struct Submission<K, T, R> {
    key: K,
    expected_count: usize,
    item: Item<T, R>,
    batch_fn: BatchFn<T, R>,
    timeout: Option<Duration>,
    scope: CancellationToken,
}

/// Keyed registry of batch coordinators.
pub struct CoordinatorManager<K, T, R> {
    tx: mpsc::Sender<Submission<K, T, R>>,
    root: CancellationToken,
    default_batch_fn: Option<BatchFn<T, R>>,
    default_timeout: Option<Duration>,
}

impl<K, T, R> fmt::Debug for CoordinatorManager<K, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorManager")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl<K, T, R> CoordinatorManager<K, T, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates the manager and spawns its dispatcher under `root`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        root: CancellationToken,
        default_batch_fn: Option<BatchFn<T, R>>,
        default_timeout: Option<Duration>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SUBMISSION_BUFFER);
        tokio::spawn(dispatch(rx, root.clone()));
        CoordinatorManager {
            tx,
            root,
            default_batch_fn,
            default_timeout,
        }
    }

    /// Queues `value` on the coordinator for `key`, creating one if needed.
    ///
    /// Fails without enqueuing if `scope` closes before the submission is
    /// accepted. The returned handle resolves once a batch containing the
    /// item has been processed.
    pub async fn add(
        &self,
        scope: &CancellationToken,
        key: K,
        expected_count: usize,
        value: T,
        options: AddOptions<T, R>,
    ) -> Result<ItemHandle<R>> {
        if expected_count < 1 {
            return Err(Error::InvalidExpectedCount(expected_count));
        }
        let batch_fn = options
            .batch_fn
            .or_else(|| self.default_batch_fn.clone())
            .ok_or(Error::MissingBatchFn)?;
        if scope.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (item, handle) = Item::new(value, scope.clone());
        let submission = Submission {
            key,
            expected_count,
            item,
            batch_fn,
            timeout: options.timeout.unwrap_or(self.default_timeout),
            scope: options.scope.unwrap_or_else(|| self.root.child_token()),
        };

        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(submission) => match sent {
                Ok(()) => Ok(handle),
                Err(_) => Err(Error::Cancelled),
            },
        }
    }

    /// Stops the dispatcher; coordinators under the root drain and exit.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

async fn dispatch<K, T, R>(mut rx: mpsc::Receiver<Submission<K, T, R>>, root: CancellationToken)
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    let mut coordinators: HashMap<K, CoordinatorHandle<T, R>> = HashMap::new();

    loop {
        let submission = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            received = rx.recv() => match received {
                Some(submission) => submission,
                None => break,
            },
        };

        let Submission {
            key,
            expected_count,
            mut item,
            batch_fn,
            timeout,
            scope,
        } = submission;

        coordinators.retain(|_, handle| !handle.is_finished());
        if let Some(live) = coordinators.get(&key) {
            match live.submit(item) {
                Ok(()) => continue,
                Err(returned) => item = returned,
            }
            coordinators.remove(&key);
            debug!(key = ?key, "evicted finished coordinator");
        }

        let built = Coordinator::builder()
            .expected_count(expected_count)
            .timeout_opt(timeout)
            .batch_fn(batch_fn)
            .build();

        match built {
            Ok((coordinator, handle)) => {
                debug!(key = ?key, expected_count, "starting coordinator");
                tokio::spawn(coordinator.run(scope));
                if let Err(item) = handle.submit(item) {
                    item.resolve(Err(Error::Cancelled));
                }
                coordinators.insert(key, handle);
            }
            Err(e) => item.resolve(Err(e)),
        }
    }

    debug!(live = coordinators.len(), "coordinator dispatcher stopped");
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
