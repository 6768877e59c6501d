// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronization sessions.
//!
//! ```text
//!  SyncEngine::handle ──page 1──▶ CoordinatorManager ──batch──▶ Operation::register
//!         │                                                        │
//!         └──page n──▶ OperationManager::get ──▶ Operation::take_page
//!                                                                  ▼
//!                        Upstream ◀── fetch ── Operation::run ──▶ SlotMap
//! ```

mod engine;
mod manager;
mod operation;
mod slots;
mod source;

pub use engine::SyncEngine;
pub use manager::OperationManager;
pub use operation::{Operation, OperationContext, OperationState, BRANCH_FIELD};
pub use slots::{SlotMap, SlotReceiver};
pub use source::{FetchedPage, SourceGroup, SourceMode};

#[cfg(test)]
pub(crate) mod test_helpers;
