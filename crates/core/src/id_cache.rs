// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-realm cache of the child ids emitted for dependent record types.
//!
//! Dependent types have no change feed of their own. To turn a parent's
//! current nested data into deletions, we remember which child ids the last
//! sync produced for each `(parent entity, dependent type)` pair.
//!
//! A realm without an entry has no continuity: the next session for it must
//! run a full sync. Entries expire after an idle TTL and are dropped by a
//! background sweep, which is the only way a realm falls back to full sync.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies a parent entity upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    /// Upstream entity kind, e.g. `Bill`.
    pub entity_type: String,
    /// Upstream entity id.
    pub entity_id: String,
}

impl SourceKey {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        SourceKey {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// What the latest payload says about a parent entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentChange {
    /// The parent was deleted upstream.
    Deleted,
    /// The parent exists and currently yields these child ids.
    Present(BTreeSet<String>),
}

impl ParentChange {
    /// Ids in `previous` that this change drops.
    pub fn removed(&self, previous: &BTreeSet<String>) -> Vec<String> {
        match self {
            ParentChange::Deleted => previous.iter().cloned().collect(),
            ParentChange::Present(current) => previous.difference(current).cloned().collect(),
        }
    }
}

/// Dependent type → child ids, for one parent.
type Children = HashMap<String, BTreeSet<String>>;

#[derive(Debug)]
struct RealmCache {
    entries: HashMap<SourceKey, Children>,
    expires_at: Instant,
}

impl RealmCache {
    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }
}

/// Identity cache shared by every operation in the process.
#[derive(Debug, Clone)]
pub struct IdentityCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    realms: Mutex<HashMap<String, Arc<Mutex<RealmCache>>>>,
    ttl: Duration,
}

/// Access to one realm's cache. Every call extends the realm's TTL.
#[derive(Debug, Clone)]
pub struct RealmHandle {
    realm: String,
    cache: Arc<Mutex<RealmCache>>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        IdentityCache {
            inner: Arc::new(Inner {
                realms: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Returns true if the realm has a live cache, without refreshing it.
    pub async fn contains(&self, realm: &str) -> bool {
        let cache = {
            let realms = self.inner.realms.lock().await;
            match realms.get(realm) {
                Some(cache) => Arc::clone(cache),
                None => return false,
            }
        };
        let cache = cache.lock().await;
        cache.expires_at > Instant::now()
    }

    /// Returns the realm's cache, creating it on first access.
    pub async fn realm(&self, realm: &str) -> RealmHandle {
        let cache = {
            let mut realms = self.inner.realms.lock().await;
            let cache = realms.entry(realm.to_string()).or_insert_with(|| {
                debug!(realm, "creating identity cache");
                Arc::new(Mutex::new(RealmCache {
                    entries: HashMap::new(),
                    expires_at: Instant::now() + self.inner.ttl,
                }))
            });
            Arc::clone(cache)
        };
        cache.lock().await.touch(self.inner.ttl);
        RealmHandle {
            realm: realm.to_string(),
            cache,
            ttl: self.inner.ttl,
        }
    }

    /// Drops every realm idle past its TTL. Returns how many were dropped.
    ///
    /// A realm whose lock is held is in use and therefore not idle.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut realms = self.inner.realms.lock().await;
        let before = realms.len();
        realms.retain(|realm, cache| match cache.try_lock() {
            Ok(cache) if cache.expires_at <= now => {
                debug!(realm = %realm, "dropping idle identity cache");
                false
            }
            _ => true,
        });
        before - realms.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `scope` closes.
    pub fn spawn_sweeper(&self, scope: CancellationToken, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let dropped = cache.sweep().await;
                if dropped > 0 {
                    debug!(dropped, "identity cache sweep");
                }
            }
        })
    }

    /// Number of realms currently cached.
    pub async fn len(&self) -> usize {
        self.inner.realms.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl RealmHandle {
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Child ids last recorded for `dependent_type` under `key`.
    pub async fn children(&self, key: &SourceKey, dependent_type: &str) -> BTreeSet<String> {
        let mut cache = self.cache.lock().await;
        cache.touch(self.ttl);
        cache
            .entries
            .get(key)
            .and_then(|children| children.get(dependent_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces the recorded child ids, as a full sync does.
    pub async fn record(&self, key: SourceKey, dependent_type: &str, ids: BTreeSet<String>) {
        let mut cache = self.cache.lock().await;
        cache.touch(self.ttl);
        cache
            .entries
            .entry(key)
            .or_default()
            .insert(dependent_type.to_string(), ids);
    }

    /// Applies one parent's latest state and returns the child ids to emit
    /// as deletions.
    ///
    /// A deleted parent yields every previously recorded child and its entry
    /// is removed. A present parent yields the children that disappeared,
    /// and its entry becomes the current set, so replaying the same payload
    /// yields nothing.
    pub async fn reconcile(
        &self,
        key: &SourceKey,
        dependent_type: &str,
        change: ParentChange,
    ) -> Vec<String> {
        let mut cache = self.cache.lock().await;
        cache.touch(self.ttl);

        match change {
            ParentChange::Deleted => {
                let Some(children) = cache.entries.get_mut(key) else {
                    return Vec::new();
                };
                let previous = children.remove(dependent_type).unwrap_or_default();
                if children.is_empty() {
                    cache.entries.remove(key);
                }
                previous.into_iter().collect()
            }
            ParentChange::Present(ref current) => {
                let children = cache.entries.entry(key.clone()).or_default();
                let previous = children.remove(dependent_type).unwrap_or_default();
                let deleted = change.removed(&previous);
                children.insert(dependent_type.to_string(), current.clone());
                deleted
            }
        }
    }

    /// Returns true if anything is recorded for `key`.
    pub async fn has_entry(&self, key: &SourceKey) -> bool {
        self.cache.lock().await.entries.contains_key(key)
    }
}

#[cfg(test)]
#[path = "id_cache_tests.rs"]
mod tests;
