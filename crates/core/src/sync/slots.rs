// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot response slots keyed by `(record type, page)`.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::SyncResponse;

/// Receiving side of a slot, held by the caller that asked for the page.
pub type SlotReceiver = oneshot::Receiver<Result<SyncResponse>>;

type SlotKey = (String, u32);

#[derive(Debug)]
struct Slot {
    tx: Option<oneshot::Sender<Result<SyncResponse>>>,
    rx: Option<SlotReceiver>,
}

/// Every slot an operation has opened.
///
/// A slot is opened once, taken by at most one caller, and resolved exactly
/// once: a second resolution is an error rather than a silent overwrite.
#[derive(Debug, Default)]
pub struct SlotMap {
    slots: BTreeMap<SlotKey, Slot>,
    resolved: usize,
}

impl SlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the slot for `(record_type, page)`. Returns false if it exists.
    pub fn open(&mut self, record_type: &str, page: u32) -> bool {
        let key = (record_type.to_string(), page);
        if self.slots.contains_key(&key) {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        self.slots.insert(
            key,
            Slot {
                tx: Some(tx),
                rx: Some(rx),
            },
        );
        true
    }

    /// Hands out the receiver. Each slot's receiver can be taken once.
    pub fn take_receiver(&mut self, record_type: &str, page: u32) -> Option<SlotReceiver> {
        self.slots
            .get_mut(&(record_type.to_string(), page))
            .and_then(|slot| slot.rx.take())
    }

    /// Delivers the slot's one value or error.
    pub fn resolve(
        &mut self,
        record_type: &str,
        page: u32,
        result: Result<SyncResponse>,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&(record_type.to_string(), page))
            .ok_or_else(|| Error::PageNotFound {
                operation: String::new(),
                record_type: record_type.to_string(),
                page,
            })?;
        let tx = slot.tx.take().ok_or_else(|| Error::AlreadyResolved {
            record_type: record_type.to_string(),
            page,
        })?;
        self.resolved += 1;
        // The caller may have given up; the slot still counts as resolved.
        let _ = tx.send(result);
        Ok(())
    }

    /// Resolves every still-open slot with `err`. Returns how many.
    pub fn fail_all(&mut self, err: &Error) -> usize {
        let mut failed = 0;
        for slot in self.slots.values_mut() {
            if let Some(tx) = slot.tx.take() {
                let _ = tx.send(Err(err.clone()));
                failed += 1;
            }
        }
        self.resolved += failed;
        failed
    }

    pub fn contains(&self, record_type: &str, page: u32) -> bool {
        self.slots.contains_key(&(record_type.to_string(), page))
    }

    pub fn opened(&self) -> usize {
        self.slots.len()
    }

    pub fn resolved(&self) -> usize {
        self.resolved
    }

    /// Returns true if every slot is resolved.
    pub fn all_resolved(&self) -> bool {
        self.resolved == self.slots.len()
    }

    /// Returns true once a caller holds every slot's receiver.
    pub fn all_taken(&self) -> bool {
        self.slots.values().all(|slot| slot.rx.is_none())
    }
}

#[cfg(test)]
#[path = "slots_tests.rs"]
mod tests;
