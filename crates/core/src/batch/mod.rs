// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Count-or-timeout batching of concurrent work items.
//!
//! # Architecture
//!
//! ```text
//! add(scope, key, ..) ──► ┌──────────────────┐      ┌─────────────┐
//!                         │ CoordinatorMgr   │─key─►│ Coordinator │──► batch_fn(items)
//! add(scope, key, ..) ──► │ (dispatcher task)│      │  (run loop) │
//!                         └──────────────────┘      └─────────────┘
//!         │                                                │
//!         ▼                                                ▼
//!   ItemHandle::wait()  ◄──────────── resolve ───────── Item
//! ```
//!
//! A coordinator fires its batch function when `expected_count` items have
//! arrived, when its timer fires with at least one item queued, or once more
//! when its scope is cancelled with items still pending.

mod coordinator;
mod item;
mod manager;

pub use coordinator::{
    batch_fn, BatchFn, BatchFuture, Coordinator, CoordinatorBuilder, CoordinatorHandle,
};
pub use item::{Item, ItemHandle, Resolver};
pub use manager::{AddOptions, CoordinatorManager};
