// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-operation bookkeeping for one upstream source.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::upstream::{attachment_parents, entity_id};

/// How a source is read during an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// From the shared change feed, in one page.
    Delta,
    /// Full paginated scan.
    Normal,
}

/// One fetched page of a source.
#[derive(Debug, Default)]
pub struct FetchedPage {
    pub entities: Vec<Value>,
    /// A full page was returned, so there may be another.
    pub has_more: bool,
}

/// A source shared by one or more requested record types.
#[derive(Debug)]
pub struct SourceGroup {
    /// Record types still reading this source.
    pub expected_uses: usize,
    pub mode: SourceMode,
    pub needs_attachments: bool,
    pages: BTreeMap<u32, FetchedPage>,
    attachments: HashMap<String, Vec<Value>>,
}

impl SourceGroup {
    pub fn new(mode: SourceMode) -> Self {
        SourceGroup {
            expected_uses: 0,
            mode,
            needs_attachments: false,
            pages: BTreeMap::new(),
            attachments: HashMap::new(),
        }
    }

    pub fn add_use(&mut self, needs_attachments: bool) {
        self.expected_uses += 1;
        self.needs_attachments |= needs_attachments;
    }

    /// Drops one use. Returns true when nothing reads the source anymore.
    pub fn release(&mut self) -> bool {
        self.expected_uses = self.expected_uses.saturating_sub(1);
        self.expected_uses == 0
    }

    pub fn insert_page(&mut self, page: u32, entities: Vec<Value>, page_size: u32) {
        let has_more = entities.len() >= page_size as usize;
        self.pages.insert(page, FetchedPage { entities, has_more });
    }

    pub fn page(&self, page: u32) -> Option<&FetchedPage> {
        self.pages.get(&page)
    }

    /// Forgets pages up to and including `page`.
    pub fn discard_through(&mut self, page: u32) {
        self.pages.retain(|p, _| *p > page);
    }

    /// Indexes attachments by the id of the `source` entity they belong to.
    pub fn index_attachments<'a>(
        &mut self,
        source: &str,
        attachments: impl IntoIterator<Item = &'a Value>,
    ) {
        for attachment in attachments {
            for parent in attachment_parents(attachment, source) {
                self.attachments
                    .entry(parent.to_string())
                    .or_default()
                    .push(attachment.clone());
            }
        }
    }

    /// Attachments linked to `entity`.
    pub fn attachments_for(&self, entity: &Value) -> &[Value] {
        entity_id(entity)
            .and_then(|id| self.attachments.get(id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
