// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::SyncEngine;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::mapping::JsonMapping;
use crate::protocol::{Account, Pagination, Record, SyncRequest};
use crate::record::{Catalog, RecordType};
use crate::upstream::{attachment_parents, ChangeSet, Query, QueryResult, Upstream, UpstreamFuture};

pub const REALM: &str = "realm-1";
pub const SINCE: &str = "2026-01-01T00:00:00Z";

/// One call made to [`MockUpstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `(tag, start_position)` of every query in one batch.
    Batch(Vec<(String, u32)>),
    Changes(Vec<String>),
}

/// Scripted upstream that records every call.
#[derive(Default)]
pub struct MockUpstream {
    entities: Mutex<HashMap<String, Vec<Value>>>,
    attachments: Mutex<Vec<Value>>,
    changes: Mutex<ChangeSet>,
    failure: Mutex<Option<Error>>,
    calls: Mutex<Vec<Call>>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_entities(&self, kind: &str, entities: Vec<Value>) {
        self.entities
            .lock()
            .unwrap()
            .insert(kind.to_string(), entities);
    }

    pub fn set_attachments(&self, attachments: Vec<Value>) {
        *self.attachments.lock().unwrap() = attachments;
    }

    pub fn set_changes(&self, kind: &str, entities: Vec<Value>) {
        self.changes
            .lock()
            .unwrap()
            .entities
            .insert(kind.to_string(), entities);
    }

    /// Every following call fails with `err`.
    pub fn fail_with(&self, err: Error) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// How many times page `start_position` of `tag` was queried.
    pub fn query_count(&self, tag: &str, start_position: u32) -> usize {
        self.calls()
            .iter()
            .map(|call| match call {
                Call::Batch(queries) => queries
                    .iter()
                    .filter(|(t, s)| t == tag && *s == start_position)
                    .count(),
                Call::Changes(_) => 0,
            })
            .sum()
    }

    pub fn change_feed_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Changes(entities) => Some(entities),
                Call::Batch(_) => None,
            })
            .collect()
    }

    fn failure(&self) -> Result<()> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn answer(&self, query: &Query) -> QueryResult {
        let listing: Vec<Value> = if query.attachments {
            self.attachments
                .lock()
                .unwrap()
                .iter()
                .filter(|a| !attachment_parents(a, &query.entity).is_empty())
                .cloned()
                .collect()
        } else {
            self.entities
                .lock()
                .unwrap()
                .get(&query.entity)
                .cloned()
                .unwrap_or_default()
        };
        let entities = listing
            .into_iter()
            .skip(query.start_position as usize - 1)
            .take(query.max_results as usize)
            .collect();
        QueryResult {
            tag: query.tag.clone(),
            entities,
        }
    }
}

impl Upstream for MockUpstream {
    fn batch_query<'a>(
        &'a self,
        _account: &'a Account,
        queries: Vec<Query>,
    ) -> UpstreamFuture<'a, Vec<QueryResult>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Batch(
                queries
                    .iter()
                    .map(|q| (q.tag.clone(), q.start_position))
                    .collect(),
            ));
            tokio::task::yield_now().await;
            self.failure()?;
            Ok(queries.iter().map(|q| self.answer(q)).collect())
        })
    }

    fn change_feed<'a>(
        &'a self,
        _account: &'a Account,
        entities: Vec<String>,
        _since: DateTime<Utc>,
    ) -> UpstreamFuture<'a, ChangeSet> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Changes(entities.clone()));
            tokio::task::yield_now().await;
            self.failure()?;
            let all = self.changes.lock().unwrap().clone();
            let mut changes = ChangeSet::default();
            for kind in entities {
                if let Some(list) = all.entities.get(&kind) {
                    changes.entities.insert(kind, list.clone());
                }
            }
            Ok(changes)
        })
    }
}

pub fn bill(id: &str, lines: &[&str]) -> Value {
    let lines: Vec<Value> = lines
        .iter()
        .map(|line| json!({"Id": line, "Amount": 10}))
        .collect();
    json!({"Id": id, "TotalAmt": 10 * lines.len(), "Line": lines})
}

pub fn invoice(id: &str) -> Value {
    json!({"Id": id, "Balance": 5})
}

pub fn deleted(id: &str) -> Value {
    json!({"Id": id, "status": "Deleted"})
}

pub fn attachment(id: &str, bill_id: &str) -> Value {
    json!({
        "Id": id,
        "FileName": format!("{id}.pdf"),
        "AttachableRef": [{"EntityRef": {"type": "Bill", "value": bill_id}}],
    })
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .add(RecordType::primary(
            "Bill",
            "Bill",
            JsonMapping::new().field("total", "/TotalAmt"),
        ))
        .unwrap();
    catalog
        .add(RecordType::dependent(
            "BillItemLine",
            "Bill",
            JsonMapping::new().children("/Line").field("amount", "/Amount"),
        ))
        .unwrap();
    catalog
        .add(RecordType::dependent(
            "BillAttachment",
            "Bill",
            JsonMapping::new().attachments().field("file", "/FileName"),
        ))
        .unwrap();
    catalog
        .add(RecordType::primary(
            "Invoice",
            "Invoice",
            JsonMapping::new().field("balance", "/Balance"),
        ))
        .unwrap();
    catalog
        .add(RecordType::primary("Vendor", "Vendor", JsonMapping::new()).with_change_feed(false))
        .unwrap();
    catalog
        .add(RecordType::constant(
            "Currency",
            vec![Record::new("USD", Default::default()).with_field("name", "US Dollar")],
        ))
        .unwrap();
    catalog.add_union("Transaction", &["Bill", "Invoice"]).unwrap();
    catalog.add_union("Payable", &["Bill", "Vendor"]).unwrap();
    catalog
}

pub fn config(page_size: u32) -> SyncConfig {
    SyncConfig {
        page_size,
        registration_timeout_ms: 50,
        ..SyncConfig::default()
    }
}

pub fn engine(upstream: &Arc<MockUpstream>, page_size: u32) -> SyncEngine {
    SyncEngine::new(
        config(page_size),
        catalog(),
        Arc::clone(upstream) as Arc<dyn Upstream>,
        CancellationToken::new(),
    )
    .unwrap()
}

pub fn request(operation: &str, requested: &str, types: &[&str]) -> SyncRequest {
    SyncRequest {
        requested_type: requested.to_string(),
        operation_id: operation.to_string(),
        types: types.iter().map(|t| t.to_string()).collect(),
        schema: Value::Null,
        filter: Value::Null,
        account: Account {
            realm_id: REALM.to_string(),
            bearer_token: "token".to_string(),
        },
        last_synchronized_at: String::new(),
        pagination: Pagination::default(),
    }
}

pub fn since(mut request: SyncRequest, marker: &str) -> SyncRequest {
    request.last_synchronized_at = marker.to_string();
    request
}

pub fn page(mut request: SyncRequest, page: u32) -> SyncRequest {
    request.pagination = Pagination { page };
    request
}

/// Waits until every operation has retired.
pub async fn settle(engine: &SyncEngine) {
    for _ in 0..1000 {
        if engine.operations().is_empty().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    unreachable!("operations did not retire");
}

pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            if r.deleted {
                format!("-{}", r.id)
            } else {
                r.id.clone()
            }
        })
        .collect()
}
