// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tl-core: synchronization engine for the tally connector
//!
//! This crate provides the record catalog, the batching primitives, the
//! identity cache and the operation engine that serves paged record
//! synchronization on top of an upstream accounting API.

pub mod batch;
pub mod config;
pub mod error;
pub mod id_cache;
pub mod mapping;
pub mod protocol;
pub mod record;
pub mod sync;
pub mod upstream;

pub use config::SyncConfig;
pub use error::{Error, ErrorKind, Result};
pub use id_cache::{IdentityCache, ParentChange, RealmHandle, SourceKey};
pub use mapping::{EntityRef, FieldMapping, JsonMapping};
pub use protocol::{
    Account, ClientMessage, PageInfo, Pagination, Record, ServerMessage, SyncRequest,
    SyncResponse, SyncType,
};
pub use record::{Catalog, RecordKind, RecordType};
pub use sync::{Operation, OperationManager, OperationState, SyncEngine, BRANCH_FIELD};
pub use upstream::{ChangeSet, Query, QueryResult, Upstream, UpstreamFuture};
