// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Field mappings: upstream entity → output records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::protocol::Record;
use crate::upstream::entity_id;

/// An upstream entity together with the attachments linked to it.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    pub value: &'a Value,
    pub attachments: &'a [Value],
}

impl<'a> EntityRef<'a> {
    pub fn new(value: &'a Value) -> Self {
        EntityRef {
            value,
            attachments: &[],
        }
    }

    pub fn with_attachments(mut self, attachments: &'a [Value]) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Maps one upstream entity to the records of one record type.
///
/// A primary type usually yields one record per entity; a dependent type
/// yields one per nested child. The ids returned for a dependent type are
/// also the ids tracked by the identity cache.
pub trait FieldMapping: Send + Sync {
    fn map(&self, entity: &EntityRef<'_>) -> Result<Vec<Record>>;

    /// Whether [`EntityRef::attachments`] must be populated.
    fn needs_attachments(&self) -> bool {
        false
    }
}

impl<F> FieldMapping for F
where
    F: Fn(&EntityRef<'_>) -> Result<Vec<Record>> + Send + Sync,
{
    fn map(&self, entity: &EntityRef<'_>) -> Result<Vec<Record>> {
        self(entity)
    }
}

/// Declarative mapping driven by JSON pointers.
///
/// Without `children` (and without `attachments`) the entity itself becomes
/// one record. With either, each child becomes a record whose id is
/// `"{parent id}-{child id}"` and which carries a `parent_id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsonMapping {
    /// Pointer to the id, relative to the entity or child.
    pub id: String,
    /// Output field name → pointer. Missing values map to `null`.
    pub fields: BTreeMap<String, String>,
    /// Pointer to an array of nested children.
    pub children: Option<String>,
    /// Pointer → required value; entities or children that differ are skipped.
    pub filter: BTreeMap<String, Value>,
    /// Map the entity's attachments instead of nested children.
    pub attachments: bool,
}

impl Default for JsonMapping {
    fn default() -> Self {
        JsonMapping {
            id: "/Id".to_string(),
            fields: BTreeMap::new(),
            children: None,
            filter: BTreeMap::new(),
            attachments: false,
        }
    }
}

impl JsonMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.fields.insert(name.into(), pointer.into());
        self
    }

    pub fn children(mut self, pointer: impl Into<String>) -> Self {
        self.children = Some(pointer.into());
        self
    }

    pub fn filter(mut self, pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(pointer.into(), value.into());
        self
    }

    pub fn attachments(mut self) -> Self {
        self.attachments = true;
        self
    }

    fn matches(&self, value: &Value) -> bool {
        self.filter
            .iter()
            .all(|(pointer, expected)| value.pointer(pointer) == Some(expected))
    }

    fn id_of(&self, value: &Value) -> Result<String> {
        match value.pointer(&self.id) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(Error::Transform {
                record_type: String::new(),
                message: format!("no id at '{}'", self.id),
            }),
        }
    }

    fn fields_of(&self, value: &Value) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, pointer)| {
                let field = value.pointer(pointer).cloned().unwrap_or(Value::Null);
                (name.clone(), field)
            })
            .collect()
    }

    fn map_children<'v>(
        &self,
        parent: &Value,
        children: impl Iterator<Item = &'v Value>,
    ) -> Result<Vec<Record>> {
        let parent_id = entity_id(parent).ok_or_else(|| Error::Transform {
            record_type: String::new(),
            message: "parent entity has no Id".to_string(),
        })?;
        let mut records = Vec::new();
        for child in children.filter(|c| self.matches(c)) {
            let id = format!("{parent_id}-{}", self.id_of(child)?);
            records.push(Record::new(id, self.fields_of(child)).with_field("parent_id", parent_id));
        }
        Ok(records)
    }
}

impl FieldMapping for JsonMapping {
    fn map(&self, entity: &EntityRef<'_>) -> Result<Vec<Record>> {
        if self.attachments {
            return self.map_children(entity.value, entity.attachments.iter());
        }
        match &self.children {
            Some(pointer) => {
                let children = entity
                    .value
                    .pointer(pointer)
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                self.map_children(entity.value, children.iter())
            }
            None if self.matches(entity.value) => {
                let id = self.id_of(entity.value)?;
                Ok(vec![Record::new(id, self.fields_of(entity.value))])
            }
            None => Ok(Vec::new()),
        }
    }

    fn needs_attachments(&self) -> bool {
        self.attachments
    }
}

#[cfg(test)]
#[path = "mapping_tests.rs"]
mod tests;
