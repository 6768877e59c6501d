// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing entry point of the synchronization engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::manager::OperationManager;
use super::operation::{Operation, OperationContext};
use super::slots::SlotReceiver;
use crate::batch::{batch_fn, AddOptions, BatchFn, CoordinatorManager, Item};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::id_cache::IdentityCache;
use crate::protocol::{SyncRequest, SyncResponse};
use crate::record::{Catalog, RecordKind, RecordType};
use crate::upstream::Upstream;

/// A first-page request waiting for its operation to collect every type.
struct Registration {
    operation: Arc<Operation>,
    record_type: Arc<RecordType>,
}

/// Registrations are batched per operation instance.
type RegistrationKey = (String, u64);

/// Registers a batch of first-page requests and dispatches their operation
/// once every listed type is in, or once the registration window closed
/// with some still missing.
fn register_batch() -> BatchFn<Registration, SlotReceiver> {
    batch_fn(|items: Vec<Item<Registration, SlotReceiver>>| async move {
        let size = items.len();
        let mut operations: Vec<Arc<Operation>> = Vec::new();
        for item in items {
            let (registration, resolver) = item.into_parts();
            let Registration {
                operation,
                record_type,
            } = registration;
            resolver.resolve(operation.register(record_type).await);
            if !operations.iter().any(|op| Arc::ptr_eq(op, &operation)) {
                operations.push(operation);
            }
        }
        for operation in operations {
            if size < operation.expected_count() || operation.all_registered().await {
                operation.dispatch().await;
            }
        }
    })
}

/// The synchronization engine.
///
/// Owns the operation registry, the identity cache and the registration
/// coordinators; constructed once per process.
pub struct SyncEngine {
    config: SyncConfig,
    catalog: Arc<Catalog>,
    id_cache: IdentityCache,
    operations: OperationManager,
    registrations: CoordinatorManager<RegistrationKey, Registration, SlotReceiver>,
    root: CancellationToken,
}

impl SyncEngine {
    /// Builds the engine. Must be called from within a tokio runtime.
    pub fn new(
        config: SyncConfig,
        catalog: Catalog,
        upstream: Arc<dyn Upstream>,
        root: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let id_cache = IdentityCache::new(config.identity_cache_ttl());
        let context = Arc::new(OperationContext {
            upstream,
            id_cache: id_cache.clone(),
            page_size: config.page_size,
        });
        let operations = OperationManager::new(root.child_token(), config.operation_ttl(), context);
        let registrations = CoordinatorManager::new(
            root.child_token(),
            Some(register_batch()),
            Some(config.registration_timeout()?),
        );
        Ok(SyncEngine {
            config,
            catalog: Arc::new(catalog),
            id_cache,
            operations,
            registrations,
            root,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn identity_cache(&self) -> &IdentityCache {
        &self.id_cache
    }

    pub fn operations(&self) -> &OperationManager {
        &self.operations
    }

    /// Checks a request against the catalog without touching any state.
    ///
    /// Returns the requested type and the parsed last-sync marker.
    pub fn validate(
        &self,
        request: &SyncRequest,
    ) -> Result<(Arc<RecordType>, Option<DateTime<Utc>>)> {
        if request.operation_id.is_empty() {
            return Err(Error::InvalidRequest("operationId must not be empty".into()));
        }
        if request.account.realm_id.is_empty() {
            return Err(Error::InvalidRequest("account.realmId must not be empty".into()));
        }
        if request.page() == 0 {
            return Err(Error::InvalidRequest("pages start at 1".into()));
        }
        if request.types.is_empty() {
            return Err(Error::InvalidRequest("types must not be empty".into()));
        }
        for id in &request.types {
            self.catalog.get(id)?;
        }
        let record_type = self.catalog.get(&request.requested_type)?;
        if !request.types.contains(&request.requested_type) {
            return Err(Error::InvalidRequest(format!(
                "requested type '{}' is not listed in types",
                request.requested_type
            )));
        }
        if let RecordKind::Union { members } = record_type.kind() {
            let branches = request.schema.get("branches").and_then(Value::as_object);
            if let Some(missing) = members
                .iter()
                .find(|m| !branches.is_some_and(|b| b.contains_key(m.id())))
            {
                return Err(Error::MissingSchema {
                    record_type: record_type.id().to_string(),
                    branch: missing.id().to_string(),
                });
            }
        }

        let since = match request.last_synchronized_at.as_str() {
            "" => None,
            raw => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        Error::InvalidRequest(format!("invalid lastSynchronizedAt '{raw}': {e}"))
                    })?
                    .with_timezone(&Utc),
            ),
        };
        Ok((record_type, since))
    }

    /// Answers one `(record type, page)` request.
    ///
    /// First pages register with the session's operation and wait for it to
    /// fetch; later pages pick up the slot an earlier response announced.
    /// Closing `scope` abandons this request only.
    pub async fn handle(
        &self,
        request: SyncRequest,
        scope: &CancellationToken,
    ) -> Result<SyncResponse> {
        let (record_type, since) = self.validate(&request)?;
        let page = request.page();

        let (operation, rx) = if page == 1 {
            let operation = self.operations.get_or_create(&request, since).await;
            let key = (operation.id().to_string(), operation.serial());
            let registration = Registration {
                operation: Arc::clone(&operation),
                record_type,
            };
            let options = AddOptions::new().scope(operation.scope().clone());
            let handle = self
                .registrations
                .add(scope, key, operation.expected_count(), registration, options)
                .await?;
            let rx = handle.wait().await?;
            (operation, rx)
        } else {
            let operation = self
                .operations
                .get(&request.operation_id)
                .await
                .ok_or_else(|| Error::OperationNotFound(request.operation_id.clone()))?;
            let rx = operation.take_page(&request.requested_type, page).await?;
            (operation, rx)
        };

        let result = tokio::select! {
            biased;
            received = rx => received.unwrap_or(Err(Error::Cancelled)),
            _ = scope.cancelled() => Err(Error::Cancelled),
        };
        operation.retire_if_done().await;
        if operation.is_cancelled() {
            self.operations.discard(&operation).await;
        }
        if let Err(err) = &result {
            debug!(
                operation = %request.operation_id,
                record_type = %request.requested_type,
                page,
                error = %err,
                "sync request failed"
            );
        }
        result
    }

    /// Starts the identity cache and operation sweepers.
    pub fn start_sweepers(&self) -> Vec<JoinHandle<()>> {
        let interval = self.config.sweep_interval();
        vec![
            self.id_cache.spawn_sweeper(self.root.child_token(), interval),
            self.operations.spawn_sweeper(self.root.child_token(), interval),
        ]
    }

    /// Cancels every operation, coordinator and sweeper.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
