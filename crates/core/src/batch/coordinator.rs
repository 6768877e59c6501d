// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Count-or-timeout batch coordinator for a single key.
//!
//! The run loop is the coordinator's only owner, so its round state needs no
//! lock; only the input queue is shared.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::item::Item;
use crate::error::{Error, Result};

/// Future returned by a batch function.
pub type BatchFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Function invoked with each flushed batch.
///
/// It must resolve every item it receives.
pub type BatchFn<T, R> = Arc<dyn Fn(Vec<Item<T, R>>) -> BatchFuture + Send + Sync>;

/// Wraps an async closure as a [`BatchFn`].
pub fn batch_fn<T, R, F, Fut>(f: F) -> BatchFn<T, R>
where
    F: Fn(Vec<Item<T, R>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |items| Box::pin(f(items)))
}

/// Builder for [`Coordinator`]; construction errors surface from [`build`].
///
/// [`build`]: CoordinatorBuilder::build
pub struct CoordinatorBuilder<T, R> {
    expected_count: usize,
    timeout: Option<Duration>,
    batch_fn: Option<BatchFn<T, R>>,
}

/// Batches items for one key and invokes the batch function per round.
pub struct Coordinator<T, R> {
    expected_count: usize,
    timeout: Option<Duration>,
    batch_fn: BatchFn<T, R>,
    rx: mpsc::UnboundedReceiver<Item<T, R>>,
    finished: Arc<AtomicBool>,
}

/// Submission side of a running coordinator.
pub struct CoordinatorHandle<T, R> {
    tx: mpsc::UnboundedSender<Item<T, R>>,
    finished: Arc<AtomicBool>,
}

impl<T, R> Clone for CoordinatorHandle<T, R> {
    fn clone(&self) -> Self {
        CoordinatorHandle {
            tx: self.tx.clone(),
            finished: Arc::clone(&self.finished),
        }
    }
}

impl<T, R> Default for CoordinatorBuilder<T, R> {
    fn default() -> Self {
        CoordinatorBuilder {
            expected_count: 1,
            timeout: None,
            batch_fn: None,
        }
    }
}

impl<T, R> CoordinatorBuilder<T, R> {
    /// Number of items that closes a round immediately.
    pub fn expected_count(mut self, count: usize) -> Self {
        self.expected_count = count;
        self
    }

    /// Flushes a partial round this long after its first item arrived.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Partial rounds only flush on cancellation.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Sets the timeout from signed milliseconds, as found in config files.
    pub fn timeout_ms(self, millis: i64) -> Result<Self> {
        let millis = u64::try_from(millis).map_err(|_| Error::NegativeTimeout(millis))?;
        Ok(self.timeout(Duration::from_millis(millis)))
    }

    pub(crate) fn timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn batch_fn(mut self, f: BatchFn<T, R>) -> Self {
        self.batch_fn = Some(f);
        self
    }

    /// Validates the settings and creates the coordinator with its handle.
    pub fn build(self) -> Result<(Coordinator<T, R>, CoordinatorHandle<T, R>)> {
        if self.expected_count < 1 {
            return Err(Error::InvalidExpectedCount(self.expected_count));
        }
        let batch_fn = self.batch_fn.ok_or(Error::MissingBatchFn)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicBool::new(false));

        Ok((
            Coordinator {
                expected_count: self.expected_count,
                timeout: self.timeout,
                batch_fn,
                rx,
                finished: Arc::clone(&finished),
            },
            CoordinatorHandle { tx, finished },
        ))
    }
}

impl<T, R> CoordinatorHandle<T, R> {
    /// Queues an item, handing it back if the run loop has exited.
    pub fn submit(&self, item: Item<T, R>) -> std::result::Result<(), Item<T, R>> {
        if self.is_finished() {
            return Err(item);
        }
        self.tx.send(item).map_err(|e| e.0)
    }

    /// Returns true once the run loop has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl<T, R> Coordinator<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn builder() -> CoordinatorBuilder<T, R> {
        CoordinatorBuilder::default()
    }

    /// Runs rounds until `scope` is cancelled or every handle is dropped.
    ///
    /// Items still pending at exit, including ones that raced into the queue,
    /// are handed to the batch function one last time.
    pub async fn run(mut self, scope: CancellationToken) {
        let mut pending_items: Vec<Item<T, R>> = Vec::with_capacity(self.expected_count);
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(item) => {
                        pending_items.push(item);
                        if pending_items.len() >= self.expected_count {
                            deadline = None;
                            flush(&self.batch_fn, &mut pending_items).await;
                        } else if deadline.is_none() {
                            deadline = self.timeout.map(|t| Instant::now() + t);
                        }
                    }
                    None => break,
                },
                () = timer => {
                    deadline = None;
                    trace!(pending = pending_items.len(), "batch timer fired");
                    flush(&self.batch_fn, &mut pending_items).await;
                }
            }
        }

        self.finished.store(true, Ordering::Release);
        self.rx.close();
        while let Ok(item) = self.rx.try_recv() {
            pending_items.push(item);
        }
        if !pending_items.is_empty() {
            debug!(pending = pending_items.len(), "draining coordinator on exit");
            flush(&self.batch_fn, &mut pending_items).await;
        }
    }
}

/// Hands the accumulated round to the batch function.
///
/// Items whose own scope already closed are resolved as cancelled and left
/// out; a round with nothing left is not invoked.
async fn flush<T, R>(batch_fn: &BatchFn<T, R>, pending_items: &mut Vec<Item<T, R>>) {
    let mut batch = Vec::with_capacity(pending_items.len());
    for item in pending_items.drain(..) {
        if item.is_cancelled() {
            item.resolve(Err(Error::Cancelled));
        } else {
            batch.push(item);
        }
    }
    if batch.is_empty() {
        return;
    }
    trace!(size = batch.len(), "flushing batch");
    batch_fn(batch).await;
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
