// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server state management.
//!
//! Wraps the sync engine so every connection shares one operation registry
//! and one identity cache.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tl_core::{Catalog, Result, SyncConfig, SyncEngine, SyncRequest, SyncResponse, Upstream};

/// Shared server state.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerStateInner>,
}

struct ServerStateInner {
    engine: SyncEngine,
    /// Parent of every connection scope.
    root: CancellationToken,
}

impl ServerState {
    /// Builds the engine under `root`. Must be called within a tokio runtime.
    pub fn new(
        config: SyncConfig,
        catalog: Catalog,
        upstream: Arc<dyn Upstream>,
        root: CancellationToken,
    ) -> Result<Self> {
        let engine = SyncEngine::new(config, catalog, upstream, root.child_token())?;
        Ok(ServerState {
            inner: Arc::new(ServerStateInner { engine, root }),
        })
    }

    /// Scope for a new connection; closed on shutdown.
    pub fn connection_scope(&self) -> CancellationToken {
        self.inner.root.child_token()
    }

    pub async fn sync(
        &self,
        request: SyncRequest,
        scope: &CancellationToken,
    ) -> Result<SyncResponse> {
        self.inner.engine.handle(request, scope).await
    }

    pub fn start_sweepers(&self) -> Vec<JoinHandle<()>> {
        self.inner.engine.start_sweepers()
    }

    /// Cancels every connection and operation.
    pub fn shutdown(&self) {
        self.inner.engine.shutdown();
        self.inner.root.cancel();
    }
}
