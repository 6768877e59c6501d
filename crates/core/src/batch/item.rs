// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Single units of work handed to a batch function.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A unit of work queued on a coordinator.
///
/// Once the coordinator hands the item to its batch function, the batch
/// function owns it and must resolve it. An item dropped without being
/// resolved reads as [`Error::Cancelled`] on the waiting side.
#[derive(Debug)]
pub struct Item<T, R> {
    value: T,
    scope: CancellationToken,
    resolver: Resolver<R>,
}

/// Write side of an item's result, split off by [`Item::into_parts`].
#[derive(Debug)]
pub struct Resolver<R> {
    tx: oneshot::Sender<Result<R>>,
}

/// The creator's side of an [`Item`].
#[derive(Debug)]
pub struct ItemHandle<R> {
    scope: CancellationToken,
    rx: oneshot::Receiver<Result<R>>,
}

impl<T, R> Item<T, R> {
    /// Creates an item bound to the caller's scope.
    pub fn new(value: T, scope: CancellationToken) -> (Self, ItemHandle<R>) {
        let (tx, rx) = oneshot::channel();
        let item = Item {
            value,
            scope: scope.clone(),
            resolver: Resolver { tx },
        };
        (item, ItemHandle { scope, rx })
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns true if the creator's scope has been closed.
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Completes the item. Consumes it, so an item resolves at most once.
    pub fn resolve(self, result: Result<R>) {
        self.resolver.resolve(result);
    }

    /// Splits the item so the value can be moved out before resolving.
    pub fn into_parts(self) -> (T, Resolver<R>) {
        (self.value, self.resolver)
    }
}

impl<R> Resolver<R> {
    /// Completes the item.
    ///
    /// A waiter that already gave up is not an error.
    pub fn resolve(self, result: Result<R>) {
        let _ = self.tx.send(result);
    }
}

impl<R> ItemHandle<R> {
    /// Blocks until the item is resolved or its scope is closed.
    ///
    /// A result that is already available wins over a concurrent
    /// cancellation.
    pub async fn wait(self) -> Result<R> {
        let ItemHandle { scope, rx } = self;
        tokio::select! {
            biased;
            res = rx => res.unwrap_or(Err(Error::Cancelled)),
            _ = scope.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
