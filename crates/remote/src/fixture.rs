// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed upstream for local runs and tests.
//!
//! The fixture file is a JSON object mapping entity kinds to arrays of
//! entities. Attachments live under `Attachable`. Entities whose `status`
//! is `Deleted` only show up in the change feed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use tl_core::upstream::{attachment_parents, is_deleted, ATTACHABLE};
use tl_core::{Account, ChangeSet, Query, QueryResult, Upstream, UpstreamFuture};

use crate::config::ConfigError;

#[derive(Debug, Default, Clone)]
pub struct FixtureUpstream {
    entities: HashMap<String, Vec<Value>>,
}

impl FixtureUpstream {
    pub fn new(entities: HashMap<String, Vec<Value>>) -> Self {
        FixtureUpstream { entities }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entities = serde_json::from_str(&content).map_err(|source| ConfigError::Fixtures {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(entities))
    }

    fn kind(&self, kind: &str) -> &[Value] {
        self.entities.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    fn answer(&self, query: &Query) -> QueryResult {
        let listing: Vec<&Value> = if query.attachments {
            self.kind(ATTACHABLE)
                .iter()
                .filter(|a| !attachment_parents(a, &query.entity).is_empty())
                .collect()
        } else {
            self.kind(&query.entity)
                .iter()
                .filter(|e| !is_deleted(e))
                .collect()
        };
        let skip = query.start_position.saturating_sub(1) as usize;
        QueryResult {
            tag: query.tag.clone(),
            entities: listing
                .into_iter()
                .skip(skip)
                .take(query.max_results as usize)
                .cloned()
                .collect(),
        }
    }
}

/// When the entity last changed, from `MetaData.LastUpdatedTime`.
fn last_updated(entity: &Value) -> Option<DateTime<Utc>> {
    let raw = entity.pointer("/MetaData/LastUpdatedTime")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl Upstream for FixtureUpstream {
    fn batch_query<'a>(
        &'a self,
        account: &'a Account,
        queries: Vec<Query>,
    ) -> UpstreamFuture<'a, Vec<QueryResult>> {
        Box::pin(async move {
            debug!(realm = %account.realm_id, queries = queries.len(), "fixture batch query");
            Ok(queries.iter().map(|q| self.answer(q)).collect())
        })
    }

    fn change_feed<'a>(
        &'a self,
        account: &'a Account,
        entities: Vec<String>,
        since: DateTime<Utc>,
    ) -> UpstreamFuture<'a, ChangeSet> {
        Box::pin(async move {
            debug!(realm = %account.realm_id, ?entities, %since, "fixture change feed");
            let mut changes = ChangeSet::default();
            for kind in entities {
                let changed: Vec<Value> = self
                    .kind(&kind)
                    .iter()
                    .filter(|e| last_updated(e).is_some_and(|t| t > since))
                    .cloned()
                    .collect();
                changes.entities.insert(kind, changed);
            }
            Ok(changes)
        })
    }
}

#[cfg(test)]
#[path = "fixture_tests.rs"]
mod tests;
