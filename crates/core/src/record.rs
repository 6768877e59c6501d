// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Record types and the catalog the engine serves them from.
//!
//! A record type is what the caller asks for. Several record types can read
//! the same upstream source; the engine fetches that source once for all of
//! them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mapping::FieldMapping;
use crate::protocol::Record;

/// The closed set of record kinds.
pub enum RecordKind {
    /// One record per upstream entity of `source`.
    Primary {
        source: String,
        change_feed: bool,
        mapping: Arc<dyn FieldMapping>,
    },
    /// Records derived from the nested data of a `parent` entity.
    ///
    /// With `change_feed`, delta syncs read the parent's change feed and
    /// reconcile child deletions through the identity cache.
    Dependent {
        parent: String,
        change_feed: bool,
        mapping: Arc<dyn FieldMapping>,
    },
    /// Records of every member, each tagged with its member type.
    Union { members: Vec<Arc<RecordType>> },
    /// Constant records, served without touching upstream.
    Static { items: Vec<Record> },
}

/// A caller-facing record type.
pub struct RecordType {
    id: String,
    kind: RecordKind,
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            RecordKind::Primary { source, .. } => format!("Primary({source})"),
            RecordKind::Dependent { parent, .. } => format!("Dependent({parent})"),
            RecordKind::Union { members } => {
                let ids: Vec<&str> = members.iter().map(|m| m.id()).collect();
                format!("Union({})", ids.join(", "))
            }
            RecordKind::Static { items } => format!("Static({} items)", items.len()),
        };
        f.debug_struct("RecordType")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

impl RecordType {
    pub fn new(id: impl Into<String>, kind: RecordKind) -> Self {
        RecordType {
            id: id.into(),
            kind,
        }
    }

    /// A primary type reading `source`, with a change feed.
    pub fn primary(
        id: impl Into<String>,
        source: impl Into<String>,
        mapping: impl FieldMapping + 'static,
    ) -> Self {
        Self::new(
            id,
            RecordKind::Primary {
                source: source.into(),
                change_feed: true,
                mapping: Arc::new(mapping),
            },
        )
    }

    /// A dependent type derived from `parent`, delta-capable.
    pub fn dependent(
        id: impl Into<String>,
        parent: impl Into<String>,
        mapping: impl FieldMapping + 'static,
    ) -> Self {
        Self::new(
            id,
            RecordKind::Dependent {
                parent: parent.into(),
                change_feed: true,
                mapping: Arc::new(mapping),
            },
        )
    }

    pub fn constant(id: impl Into<String>, items: Vec<Record>) -> Self {
        Self::new(id, RecordKind::Static { items })
    }

    /// Enables or disables change-feed consumption for a leaf type.
    pub fn with_change_feed(mut self, enabled: bool) -> Self {
        match &mut self.kind {
            RecordKind::Primary { change_feed, .. } | RecordKind::Dependent { change_feed, .. } => {
                *change_feed = enabled;
            }
            RecordKind::Union { .. } | RecordKind::Static { .. } => {}
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    /// Upstream entity kind a leaf type reads.
    pub fn source(&self) -> Option<&str> {
        match &self.kind {
            RecordKind::Primary { source, .. } => Some(source),
            RecordKind::Dependent { parent, .. } => Some(parent),
            RecordKind::Union { .. } | RecordKind::Static { .. } => None,
        }
    }

    pub fn mapping(&self) -> Option<&dyn FieldMapping> {
        match &self.kind {
            RecordKind::Primary { mapping, .. } | RecordKind::Dependent { mapping, .. } => {
                Some(mapping.as_ref())
            }
            RecordKind::Union { .. } | RecordKind::Static { .. } => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.source().is_some()
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self.kind, RecordKind::Dependent { .. })
    }

    pub fn is_union(&self) -> bool {
        matches!(self.kind, RecordKind::Union { .. })
    }

    pub fn needs_attachments(&self) -> bool {
        self.mapping().is_some_and(|m| m.needs_attachments())
    }

    /// Whether a delta sync can serve this type.
    ///
    /// The change feed only carries attachments that changed, so a dependent
    /// type built from attachments cannot tell which ones still exist and
    /// always runs a full sync.
    pub fn supports_delta(&self) -> bool {
        match &self.kind {
            RecordKind::Primary { change_feed, .. } => *change_feed,
            RecordKind::Dependent { change_feed, .. } => {
                *change_feed && !self.needs_attachments()
            }
            RecordKind::Union { members } => members.iter().all(|m| m.supports_delta()),
            RecordKind::Static { .. } => false,
        }
    }

    /// Leaf types that back this type: its members for a union, itself for
    /// a leaf, nothing for a static type.
    pub fn leaves(self: &Arc<Self>) -> Vec<Arc<RecordType>> {
        match &self.kind {
            RecordKind::Union { members } => members.clone(),
            RecordKind::Static { .. } => Vec::new(),
            RecordKind::Primary { .. } | RecordKind::Dependent { .. } => vec![Arc::clone(self)],
        }
    }
}

/// Every record type the engine can serve, by id.
#[derive(Debug, Default)]
pub struct Catalog {
    types: BTreeMap<String, Arc<RecordType>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record type. Union members must be leaf types.
    pub fn add(&mut self, record_type: RecordType) -> Result<()> {
        if self.types.contains_key(record_type.id()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate record type '{}'",
                record_type.id()
            )));
        }
        if let RecordKind::Union { members } = record_type.kind() {
            if members.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "union '{}' has no members",
                    record_type.id()
                )));
            }
            if let Some(member) = members.iter().find(|m| !m.is_leaf()) {
                return Err(Error::InvalidConfig(format!(
                    "union '{}' member '{}' is not a primary or dependent type",
                    record_type.id(),
                    member.id()
                )));
            }
        }
        self.types
            .insert(record_type.id().to_string(), Arc::new(record_type));
        Ok(())
    }

    /// Adds a union over record types already in the catalog.
    pub fn add_union(&mut self, id: impl Into<String>, members: &[&str]) -> Result<()> {
        let members = members
            .iter()
            .map(|member| self.get(member))
            .collect::<Result<Vec<_>>>()?;
        self.add(RecordType::new(id, RecordKind::Union { members }))
    }

    pub fn get(&self, id: &str) -> Result<Arc<RecordType>> {
        self.types
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownRecordType(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
