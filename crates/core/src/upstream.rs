// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream accounting API, as seen by the engine.
//!
//! Entities stay raw JSON; turning them into records is the job of each
//! record type's [`FieldMapping`](crate::mapping::FieldMapping).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::protocol::Account;

/// Entity kind carrying file attachments linked to other entities.
pub const ATTACHABLE: &str = "Attachable";

/// Future returned by [`Upstream`] methods.
pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One entry of a batched query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Caller-chosen tag echoed in the matching [`QueryResult`].
    pub tag: String,
    /// Entity kind to list.
    pub entity: String,
    /// 1-based position of the first entity to return.
    pub start_position: u32,
    pub max_results: u32,
    /// List the attachments linked to `entity` instead of `entity` itself.
    #[serde(default)]
    pub attachments: bool,
}

impl Query {
    /// Query for page `page` (1-based) of `entity`.
    pub fn page(entity: &str, page: u32, page_size: u32) -> Self {
        Query {
            tag: entity.to_string(),
            entity: entity.to_string(),
            start_position: start_position(page, page_size),
            max_results: page_size,
            attachments: false,
        }
    }

    /// Query for page `page` of the attachments linked to `entity`.
    pub fn attachments(entity: &str, page: u32, page_size: u32) -> Self {
        Query {
            tag: format!("{entity}/{ATTACHABLE}"),
            entity: entity.to_string(),
            start_position: start_position(page, page_size),
            max_results: page_size,
            attachments: true,
        }
    }
}

fn start_position(page: u32, page_size: u32) -> u32 {
    page.saturating_sub(1).saturating_mul(page_size).saturating_add(1)
}

/// Entities returned for one [`Query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub tag: String,
    pub entities: Vec<Value>,
}

/// Entities changed since a point in time, by entity kind.
///
/// Deleted entities are included and flagged, see [`is_deleted`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub entities: HashMap<String, Vec<Value>>,
}

impl ChangeSet {
    pub fn get(&self, entity: &str) -> &[Value] {
        self.entities.get(entity).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Client for the upstream API.
///
/// Rate limiting must surface as [`Error::RateLimited`](crate::Error::RateLimited),
/// everything else that is not the caller's fault as
/// [`Error::Upstream`](crate::Error::Upstream).
pub trait Upstream: Send + Sync {
    /// Runs every query in one round trip.
    fn batch_query<'a>(
        &'a self,
        account: &'a Account,
        queries: Vec<Query>,
    ) -> UpstreamFuture<'a, Vec<QueryResult>>;

    /// Returns every entity of the given kinds changed after `since`.
    fn change_feed<'a>(
        &'a self,
        account: &'a Account,
        entities: Vec<String>,
        since: DateTime<Utc>,
    ) -> UpstreamFuture<'a, ChangeSet>;
}

/// The entity's upstream id.
pub fn entity_id(entity: &Value) -> Option<&str> {
    entity.get("Id").and_then(Value::as_str)
}

/// Returns true if a change-feed entry reports a deletion.
pub fn is_deleted(entity: &Value) -> bool {
    entity.get("status").and_then(Value::as_str) == Some("Deleted")
}

/// Ids of the `entity_kind` entities an attachment is linked to.
pub fn attachment_parents<'a>(attachment: &'a Value, entity_kind: &str) -> Vec<&'a str> {
    let Some(refs) = attachment.get("AttachableRef").and_then(Value::as_array) else {
        return Vec::new();
    };
    refs.iter()
        .filter_map(|r| r.get("EntityRef"))
        .filter(|r| r.get("type").and_then(Value::as_str) == Some(entity_kind))
        .filter_map(|r| r.get("value").and_then(Value::as_str))
        .collect()
}

#[cfg(test)]
#[path = "upstream_tests.rs"]
mod tests;
