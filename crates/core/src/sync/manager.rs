// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live operations, keyed by session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::operation::{Operation, OperationContext};
use crate::error::Error;
use crate::protocol::SyncRequest;

/// Live operations.
///
/// An operation whose scope has closed is never handed out: it is dropped
/// from the map by the same lock acquisition that would have returned it.
#[derive(Clone)]
pub struct OperationManager {
    inner: Arc<Inner>,
}

struct Inner {
    operations: Mutex<HashMap<String, Arc<Operation>>>,
    root: CancellationToken,
    ttl: Duration,
    context: Arc<OperationContext>,
    serial: AtomicU64,
}

fn prune(operations: &mut HashMap<String, Arc<Operation>>) {
    operations.retain(|_, op| !op.is_cancelled());
}

impl OperationManager {
    /// Operations run under children of `root` and expire after `ttl` idle.
    pub fn new(root: CancellationToken, ttl: Duration, context: Arc<OperationContext>) -> Self {
        OperationManager {
            inner: Arc::new(Inner {
                operations: Mutex::new(HashMap::new()),
                root,
                ttl,
                context,
                serial: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the operation for the request's session, creating it if needed.
    pub async fn get_or_create(
        &self,
        request: &SyncRequest,
        since: Option<DateTime<Utc>>,
    ) -> Arc<Operation> {
        let mut operations = self.inner.operations.lock().await;
        prune(&mut operations);
        if let Some(op) = operations.get(&request.operation_id) {
            return Arc::clone(op);
        }

        let context = &self.inner.context;
        let existing = context.id_cache.contains(&request.account.realm_id).await;
        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
        let op = Arc::new(Operation::new(
            request,
            serial,
            since,
            existing,
            self.inner.root.child_token(),
            Arc::clone(context),
        ));
        debug!(
            operation = %request.operation_id,
            serial,
            realm = %request.account.realm_id,
            identity_cache = existing,
            "created operation"
        );
        operations.insert(request.operation_id.clone(), Arc::clone(&op));
        op
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Operation>> {
        let mut operations = self.inner.operations.lock().await;
        prune(&mut operations);
        operations.get(id).cloned()
    }

    /// Removes an operation and closes its scope without failing its slots.
    pub async fn remove(&self, id: &str) -> Option<Arc<Operation>> {
        let op = self.inner.operations.lock().await.remove(id)?;
        op.scope().cancel();
        Some(op)
    }

    /// Removes `op` if it is still the registered operation for its session.
    pub async fn discard(&self, op: &Arc<Operation>) {
        let mut operations = self.inner.operations.lock().await;
        if operations.get(op.id()).is_some_and(|live| Arc::ptr_eq(live, op)) {
            operations.remove(op.id());
        }
    }

    /// Removes an operation and fails everything it still owes.
    ///
    /// Returns false if no such operation was live.
    pub async fn cancel(&self, id: &str, err: Error) -> bool {
        let mut operations = self.inner.operations.lock().await;
        let Some(op) = operations.remove(id) else {
            return false;
        };
        op.fail(err).await;
        true
    }

    /// Expires operations idle past the TTL. Returns how many were removed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut operations = self.inner.operations.lock().await;
        let before = operations.len();
        prune(&mut operations);

        let expired: Vec<String> = operations
            .iter()
            .filter(|(_, op)| now.duration_since(op.idle_since()) >= self.inner.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(op) = operations.remove(&id) {
                debug!(operation = %id, "expiring idle operation");
                op.fail(Error::Expired(id)).await;
            }
        }
        before - operations.len()
    }

    /// Runs [`sweep_idle`](Self::sweep_idle) every `interval` until `scope`
    /// closes.
    pub fn spawn_sweeper(&self, scope: CancellationToken, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let removed = manager.sweep_idle().await;
                if removed > 0 {
                    debug!(removed, "operation sweep");
                }
            }
        })
    }

    /// Number of live operations.
    pub async fn len(&self) -> usize {
        let mut operations = self.inner.operations.lock().await;
        prune(&mut operations);
        operations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
