// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One synchronization session.
//!
//! An operation collects the first-page registration of every record type
//! the session listed, then fetches each upstream source once for all the
//! types that read it and fans the results out to per-`(type, page)` slots.
//!
//! ```text
//! Accepting ──dispatch──▶ Dispatched ──▶ Fetching ⇄ Delivering ──▶ Completed
//!     │                        │              │          │
//!     └────────────────────────┴──────────────┴──────────┴──fail──▶ Cancelled
//! ```
//!
//! All state lives behind one mutex; upstream calls are made without it.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::slots::{SlotMap, SlotReceiver};
use super::source::{SourceGroup, SourceMode};
use crate::error::{Error, Result};
use crate::id_cache::{IdentityCache, ParentChange, SourceKey};
use crate::mapping::EntityRef;
use crate::protocol::{Account, PageInfo, Record, SyncRequest, SyncResponse, SyncType};
use crate::record::{RecordKind, RecordType};
use crate::upstream::{entity_id, is_deleted, ChangeSet, Query, QueryResult, Upstream, ATTACHABLE};

/// Output field naming the member type of a union record.
pub const BRANCH_FIELD: &str = "branch";

/// Collaborators shared by every operation.
pub struct OperationContext {
    pub upstream: Arc<dyn Upstream>,
    pub id_cache: IdentityCache,
    pub page_size: u32,
}

/// Lifecycle of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Collecting first-page registrations.
    Accepting,
    /// Registration closed; the fetch task is starting.
    Dispatched,
    Fetching,
    Delivering,
    /// Every requested type has received its last page.
    Completed,
    /// Failed, expired or cancelled; every open slot got the error.
    Cancelled,
}

struct Requested {
    record_type: Arc<RecordType>,
    eligible: bool,
    mode: SourceMode,
    /// Sources this type still reads.
    active: BTreeSet<String>,
}

/// Identity cache update applied once the operation completes.
struct Seed {
    key: SourceKey,
    dependent_type: String,
    change: ParentChange,
}

struct Inner {
    state: OperationState,
    registered: BTreeSet<String>,
    requested: BTreeMap<String, Requested>,
    groups: BTreeMap<String, SourceGroup>,
    slots: SlotMap,
    changes: Option<ChangeSet>,
    seeds: Vec<Seed>,
}

impl Inner {
    fn ensure_live(&self) -> Result<()> {
        match self.state {
            OperationState::Cancelled => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Builds the source groups for every registered type.
    ///
    /// A source is read in delta mode only if every type reading it can be,
    /// and a union is read in delta mode only if all of its sources are.
    fn plan_sources(&mut self) {
        let mut normal: BTreeSet<String> = BTreeSet::new();
        for requested in self.requested.values().filter(|r| !r.eligible) {
            normal.extend(sources_of(&requested.record_type).into_keys());
        }
        loop {
            let before = normal.len();
            for requested in self.requested.values() {
                let sources = sources_of(&requested.record_type);
                if sources.keys().any(|s| normal.contains(s)) {
                    normal.extend(sources.into_keys());
                }
            }
            if normal.len() == before {
                break;
            }
        }

        for requested in self.requested.values_mut() {
            let sources = sources_of(&requested.record_type);
            requested.mode = if sources.keys().any(|s| normal.contains(s)) {
                SourceMode::Normal
            } else {
                SourceMode::Delta
            };
            for (source, needs_attachments) in sources {
                let mode = requested.mode;
                self.groups
                    .entry(source.clone())
                    .or_insert_with(|| SourceGroup::new(mode))
                    .add_use(needs_attachments);
                requested.active.insert(source);
            }
        }
    }
}

/// Distinct sources of a type, with whether any leaf on it needs attachments.
fn sources_of(record_type: &Arc<RecordType>) -> BTreeMap<String, bool> {
    let mut sources = BTreeMap::new();
    for leaf in record_type.leaves() {
        if let Some(source) = leaf.source() {
            *sources.entry(source.to_string()).or_insert(false) |= leaf.needs_attachments();
        }
    }
    sources
}

#[derive(Default)]
struct FetchPlan {
    /// Entity kinds for the change feed.
    changes: Vec<String>,
    queries: Vec<Query>,
    /// Sources whose attachments must be listed.
    attachments: Vec<String>,
}

struct Fetched {
    changes: Option<ChangeSet>,
    pages: Vec<QueryResult>,
    attachments: Vec<(String, Vec<Value>)>,
}

/// What one record type receives for one page.
struct Delivery {
    records: Vec<Record>,
    seeds: Vec<Seed>,
    /// Sources with nothing after this page.
    exhausted: Vec<String>,
}

/// A synchronization session.
pub struct Operation {
    id: String,
    serial: u64,
    account: Account,
    since: Option<DateTime<Utc>>,
    types: BTreeSet<String>,
    existing_identity_cache: bool,
    scope: CancellationToken,
    context: Arc<OperationContext>,
    /// Kept apart from `inner` so the idle sweep never waits on it.
    last_active: std::sync::Mutex<Instant>,
    inner: Mutex<Inner>,
}

impl Operation {
    pub(crate) fn new(
        request: &SyncRequest,
        serial: u64,
        since: Option<DateTime<Utc>>,
        existing_identity_cache: bool,
        scope: CancellationToken,
        context: Arc<OperationContext>,
    ) -> Self {
        Operation {
            id: request.operation_id.clone(),
            serial,
            account: request.account.clone(),
            since,
            types: request.types.iter().cloned().collect(),
            existing_identity_cache,
            scope,
            context,
            last_active: std::sync::Mutex::new(Instant::now()),
            inner: Mutex::new(Inner {
                state: OperationState::Accepting,
                registered: BTreeSet::new(),
                requested: BTreeMap::new(),
                groups: BTreeMap::new(),
                slots: SlotMap::new(),
                changes: None,
                seeds: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinguishes operations that reuse a session id.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Number of distinct record types the session listed.
    pub fn expected_count(&self) -> usize {
        self.types.len()
    }

    /// Whether the realm had an identity cache when the session began.
    pub fn has_identity_continuity(&self) -> bool {
        self.existing_identity_cache
    }

    pub async fn state(&self) -> OperationState {
        self.inner.lock().await.state
    }

    /// `(opened, resolved)` slot counts.
    pub async fn slot_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.slots.opened(), inner.slots.resolved())
    }

    pub(crate) fn idle_since(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn delta_allowed(&self) -> bool {
        self.existing_identity_cache && self.since.is_some()
    }

    /// Registers the first page of `record_type` and returns its slot.
    ///
    /// Static types are answered on the spot.
    pub async fn register(&self, record_type: Arc<RecordType>) -> Result<SlotReceiver> {
        let mut inner = self.inner.lock().await;
        self.touch();
        let id = record_type.id().to_string();

        match inner.state {
            OperationState::Accepting => {}
            OperationState::Cancelled => return Err(Error::Cancelled),
            _ if inner.registered.contains(&id) => {
                return Err(Error::DuplicateRegistration {
                    operation: self.id.clone(),
                    record_type: id,
                })
            }
            _ => {
                return Err(Error::LateRegistration {
                    operation: self.id.clone(),
                    record_type: id,
                })
            }
        }
        if !self.types.contains(&id) {
            return Err(Error::InvalidRequest(format!(
                "record type '{id}' is not listed in types"
            )));
        }
        if !inner.registered.insert(id.clone()) {
            return Err(Error::DuplicateRegistration {
                operation: self.id.clone(),
                record_type: id,
            });
        }

        inner.slots.open(&id, 1);
        let rx = inner
            .slots
            .take_receiver(&id, 1)
            .ok_or_else(|| Error::AlreadyResolved {
                record_type: id.clone(),
                page: 1,
            })?;

        if let RecordKind::Static { items } = record_type.kind() {
            let response = SyncResponse {
                items: items.clone(),
                pagination: PageInfo::last(),
                synchronization_type: SyncType::Full,
            };
            inner.slots.resolve(&id, 1, Ok(response))?;
            debug!(operation = %self.id, record_type = %id, "served static record type");
            return Ok(rx);
        }

        let eligible = self.delta_allowed() && record_type.supports_delta();
        debug!(operation = %self.id, record_type = %id, eligible, "registered record type");
        inner.requested.insert(
            id,
            Requested {
                record_type,
                eligible,
                mode: SourceMode::Normal,
                active: BTreeSet::new(),
            },
        );
        Ok(rx)
    }

    /// Returns true once every listed type has registered.
    pub async fn all_registered(&self) -> bool {
        self.inner.lock().await.registered.len() == self.types.len()
    }

    /// Hands out the slot for a later page announced by an earlier response.
    pub async fn take_page(&self, record_type: &str, page: u32) -> Result<SlotReceiver> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;
        self.touch();
        inner
            .slots
            .take_receiver(record_type, page)
            .ok_or_else(|| Error::PageNotFound {
                operation: self.id.clone(),
                record_type: record_type.to_string(),
                page,
            })
    }

    /// Closes registration and starts fetching. Runs once.
    pub async fn dispatch(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != OperationState::Accepting {
                return;
            }
            inner.state = OperationState::Dispatched;
            inner.plan_sources();
            debug!(
                operation = %self.id,
                types = inner.requested.len(),
                sources = inner.groups.len(),
                "dispatching operation"
            );
        }
        let operation = Arc::clone(self);
        tokio::spawn(async move { operation.run().await });
    }

    async fn run(&self) {
        let outcome = tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(Error::Cancelled),
            outcome = self.drive() => outcome,
        };
        if let Err(err) = outcome {
            self.fail(err).await;
        }
    }

    async fn drive(&self) -> Result<()> {
        let mut page = 1;
        loop {
            let plan = self.begin_fetch(page).await?;
            let fetched = self.fetch(plan).await?;
            if !self.deliver(page, fetched).await? {
                self.complete().await;
                return Ok(());
            }
            page += 1;
        }
    }

    async fn begin_fetch(&self, page: u32) -> Result<FetchPlan> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live()?;
        inner.state = OperationState::Fetching;
        self.touch();

        let page_size = self.context.page_size;
        let mut plan = FetchPlan::default();
        let mut delta_attachments = false;
        for (source, group) in &inner.groups {
            match group.mode {
                SourceMode::Delta => {
                    if page == 1 {
                        plan.changes.push(source.clone());
                        delta_attachments |= group.needs_attachments;
                    }
                }
                SourceMode::Normal => {
                    plan.queries.push(Query::page(source, page, page_size));
                    if page == 1 && group.needs_attachments {
                        plan.attachments.push(source.clone());
                    }
                }
            }
        }
        if delta_attachments {
            plan.changes.push(ATTACHABLE.to_string());
        }
        debug!(
            operation = %self.id,
            page,
            changes = plan.changes.len(),
            queries = plan.queries.len(),
            "fetching"
        );
        Ok(plan)
    }

    async fn fetch(&self, plan: FetchPlan) -> Result<Fetched> {
        let FetchPlan {
            changes,
            queries,
            attachments,
        } = plan;
        let (changes, pages, attachments) = tokio::try_join!(
            self.fetch_changes(changes),
            self.fetch_pages(queries),
            try_join_all(attachments.iter().map(|source| self.fetch_attachments(source))),
        )?;
        Ok(Fetched {
            changes,
            pages,
            attachments,
        })
    }

    async fn fetch_changes(&self, entities: Vec<String>) -> Result<Option<ChangeSet>> {
        if entities.is_empty() {
            return Ok(None);
        }
        let since = self
            .since
            .ok_or_else(|| Error::InvalidRequest("delta sync needs lastSynchronizedAt".into()))?;
        let changes = self
            .context
            .upstream
            .change_feed(&self.account, entities, since)
            .await?;
        Ok(Some(changes))
    }

    async fn fetch_pages(&self, queries: Vec<Query>) -> Result<Vec<QueryResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        self.context.upstream.batch_query(&self.account, queries).await
    }

    /// Lists every attachment linked to `source`, page by page.
    async fn fetch_attachments(&self, source: &str) -> Result<(String, Vec<Value>)> {
        let page_size = self.context.page_size;
        let mut attachments = Vec::new();
        let mut page = 1;
        loop {
            let query = Query::attachments(source, page, page_size);
            let tag = query.tag.clone();
            let mut results = self
                .context
                .upstream
                .batch_query(&self.account, vec![query])
                .await?;
            let entities = take_result(&mut results, &tag)?;
            let full = entities.len() >= page_size as usize;
            attachments.extend(entities);
            if !full {
                return Ok((source.to_string(), attachments));
            }
            page += 1;
        }
    }

    /// Indexes what was fetched and resolves page `page` of every type.
    ///
    /// Returns true if another page must be fetched.
    async fn deliver(&self, page: u32, fetched: Fetched) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        guard.ensure_live()?;
        guard.state = OperationState::Delivering;
        self.touch();

        let inner = &mut *guard;
        if let Some(changes) = fetched.changes {
            for (source, group) in inner.groups.iter_mut() {
                if group.mode == SourceMode::Delta && group.needs_attachments {
                    group.index_attachments(source, changes.get(ATTACHABLE));
                }
            }
            inner.changes = Some(changes);
        }
        for (source, attachments) in &fetched.attachments {
            if let Some(group) = inner.groups.get_mut(source) {
                group.index_attachments(source, attachments);
            }
        }
        let mut pages = fetched.pages;
        for (source, group) in inner.groups.iter_mut() {
            if group.mode == SourceMode::Normal {
                let entities = take_result(&mut pages, source)?;
                group.insert_page(page, entities, self.context.page_size);
            }
        }

        let ids: Vec<String> = inner.requested.keys().cloned().collect();
        for id in ids {
            let Some(requested) = inner.requested.get(&id) else {
                continue;
            };
            let mode = requested.mode;
            let delivery = self.collect(inner, requested, page).await?;

            let requested = inner
                .requested
                .get_mut(&id)
                .ok_or_else(|| Error::UnknownRecordType(id.clone()))?;
            for source in &delivery.exhausted {
                requested.active.remove(source);
                let unused = inner
                    .groups
                    .get_mut(source)
                    .is_some_and(SourceGroup::release);
                if unused {
                    inner.groups.remove(source);
                }
            }
            let has_more = !requested.active.is_empty();
            if !has_more {
                inner.requested.remove(&id);
            }

            inner.seeds.extend(delivery.seeds);
            if has_more {
                inner.slots.open(&id, page + 1);
            }
            let response = SyncResponse {
                items: delivery.records,
                pagination: PageInfo::after(page, has_more),
                synchronization_type: match mode {
                    SourceMode::Delta => SyncType::Delta,
                    SourceMode::Normal => SyncType::Full,
                },
            };
            debug!(
                operation = %self.id,
                record_type = %id,
                page,
                items = response.items.len(),
                has_more,
                "delivering page"
            );
            if let Err(err) = inner.slots.resolve(&id, page, Ok(response)) {
                warn!(
                    operation = %self.id,
                    record_type = %id,
                    page,
                    error = %err,
                    "dropped delivery"
                );
            }
        }

        for group in inner.groups.values_mut() {
            group.discard_through(page);
        }
        Ok(!inner.requested.is_empty())
    }

    /// Builds the records one type receives for `page`.
    async fn collect(
        &self,
        inner: &Inner,
        requested: &Requested,
        page: u32,
    ) -> Result<Delivery> {
        let mut delivery = Delivery {
            records: Vec::new(),
            seeds: Vec::new(),
            exhausted: Vec::new(),
        };
        let union = requested.record_type.is_union();

        for leaf in requested.record_type.leaves() {
            let Some(source) = leaf.source() else {
                continue;
            };
            if !requested.active.contains(source) {
                continue;
            }
            let Some(group) = inner.groups.get(source) else {
                continue;
            };

            let start = delivery.records.len();
            match group.mode {
                SourceMode::Delta => {
                    let changes = inner.changes.as_ref();
                    let entities = changes.map(|c| c.get(source)).unwrap_or_default();
                    self.collect_changes(&leaf, source, group, entities, &mut delivery)
                        .await?;
                }
                SourceMode::Normal => {
                    let entities = group
                        .page(page)
                        .map(|p| p.entities.as_slice())
                        .unwrap_or_default();
                    collect_page(&leaf, source, group, entities, &mut delivery)?;
                }
            }
            if union {
                for record in &mut delivery.records[start..] {
                    record
                        .fields
                        .insert(BRANCH_FIELD.to_string(), leaf.id().into());
                }
            }

            let has_more = group.mode == SourceMode::Normal
                && group.page(page).is_some_and(|p| p.has_more);
            if !has_more && !delivery.exhausted.iter().any(|s| s == source) {
                delivery.exhausted.push(source.to_string());
            }
        }
        Ok(delivery)
    }

    /// Change-feed delivery for one leaf type.
    async fn collect_changes(
        &self,
        leaf: &RecordType,
        source: &str,
        group: &SourceGroup,
        entities: &[Value],
        delivery: &mut Delivery,
    ) -> Result<()> {
        let realm = if leaf.is_dependent() {
            Some(self.context.id_cache.realm(&self.account.realm_id).await)
        } else {
            None
        };

        for entity in entities {
            let id = entity_id(entity)
                .ok_or_else(|| Error::Upstream(format!("{source} change without Id")))?;
            let attachments = group.attachments_for(entity);

            let Some(realm) = &realm else {
                if is_deleted(entity) {
                    delivery.records.push(Record::deletion(id));
                } else {
                    let entity = EntityRef::new(entity).with_attachments(attachments);
                    delivery.records.extend(map_entity(leaf, &entity)?);
                }
                continue;
            };

            let key = SourceKey::new(source, id);
            let change = if is_deleted(entity) {
                ParentChange::Deleted
            } else {
                let entity = EntityRef::new(entity).with_attachments(attachments);
                let records = map_entity(leaf, &entity)?;
                let ids = records.iter().map(|r| r.id.clone()).collect();
                delivery.records.extend(records);
                ParentChange::Present(ids)
            };
            // Staged; the cache is only updated once the operation completes.
            let previous = realm.children(&key, leaf.id()).await;
            delivery
                .records
                .extend(change.removed(&previous).into_iter().map(Record::deletion));
            delivery.seeds.push(Seed {
                key,
                dependent_type: leaf.id().to_string(),
                change,
            });
        }
        Ok(())
    }

    /// Applies the staged identity cache updates and marks the operation
    /// completed.
    async fn complete(&self) {
        let seeds = {
            let mut inner = self.inner.lock().await;
            if inner.ensure_live().is_err() {
                return;
            }
            mem::take(&mut inner.seeds)
        };
        let realm = self.context.id_cache.realm(&self.account.realm_id).await;
        let seeded = seeds.len();
        for seed in seeds {
            realm
                .reconcile(&seed.key, &seed.dependent_type, seed.change)
                .await;
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.state == OperationState::Cancelled {
                return;
            }
            inner.state = OperationState::Completed;
            self.touch();
        }
        info!(operation = %self.id, realm = %self.account.realm_id, seeded, "operation completed");
        self.retire_if_done().await;
    }

    /// Closes the scope of a completed operation once every slot has been
    /// taken. Returns true if it did.
    pub async fn retire_if_done(&self) -> bool {
        let done = {
            let inner = self.inner.lock().await;
            inner.state == OperationState::Completed && inner.slots.all_taken()
        };
        if done && !self.scope.is_cancelled() {
            debug!(operation = %self.id, "retiring operation");
            self.scope.cancel();
        }
        done
    }

    /// Fails every open slot with `err` and cancels the operation.
    ///
    /// Only the first failure is delivered; completed operations are left
    /// as they are.
    pub async fn fail(&self, err: Error) {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                OperationState::Cancelled | OperationState::Completed => {}
                previous => {
                    inner.state = OperationState::Cancelled;
                    let failed = inner.slots.fail_all(&err);
                    inner.groups.clear();
                    inner.requested.clear();
                    inner.changes = None;
                    inner.seeds.clear();
                    warn!(
                        operation = %self.id,
                        ?previous,
                        failed,
                        error = %err,
                        "operation failed"
                    );
                }
            }
        }
        self.scope.cancel();
    }
}

/// Full-scan delivery for one leaf type.
fn collect_page(
    leaf: &RecordType,
    source: &str,
    group: &SourceGroup,
    entities: &[Value],
    delivery: &mut Delivery,
) -> Result<()> {
    let seeds = leaf.is_dependent() && leaf.supports_delta();
    for entity in entities.iter().filter(|e| !is_deleted(e)) {
        let records = map_entity(
            leaf,
            &EntityRef::new(entity).with_attachments(group.attachments_for(entity)),
        )?;
        if seeds {
            if let Some(id) = entity_id(entity) {
                delivery.seeds.push(Seed {
                    key: SourceKey::new(source, id),
                    dependent_type: leaf.id().to_string(),
                    change: ParentChange::Present(records.iter().map(|r| r.id.clone()).collect()),
                });
            }
        }
        delivery.records.extend(records);
    }
    Ok(())
}

fn map_entity(leaf: &RecordType, entity: &EntityRef<'_>) -> Result<Vec<Record>> {
    let mapping = leaf
        .mapping()
        .ok_or_else(|| Error::transform(leaf.id(), "record type has no field mapping"))?;
    mapping.map(entity).map_err(|err| match err {
        Error::Transform { message, .. } => Error::transform(leaf.id(), message),
        other => Error::transform(leaf.id(), other.to_string()),
    })
}

/// Removes and returns the entities answering the query tagged `tag`.
fn take_result(results: &mut Vec<QueryResult>, tag: &str) -> Result<Vec<Value>> {
    let index = results
        .iter()
        .position(|r| r.tag == tag)
        .ok_or_else(|| Error::Upstream(format!("no result for query '{tag}'")))?;
    Ok(results.swap_remove(index).entities)
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
