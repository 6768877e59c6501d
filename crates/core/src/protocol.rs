// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing synchronization protocol.
//!
//! The host platform asks for one `(record type, page)` at a time. Every
//! request of a session names the full set of record types it will ask for,
//! which lets the engine fetch each upstream source once for all of them.
//!
//! Over the WebSocket endpoint requests are wrapped in [`ClientMessage`] and
//! answered with [`ServerMessage`], correlated by a client-chosen id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind};

/// One output record, or the deletion of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct Record {
    /// Stable id within the record type.
    pub id: String,
    /// Set when the record was removed upstream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Mapped output fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Record {
            id: id.into(),
            deleted: false,
            fields,
        }
    }

    /// A deletion event for `id`.
    pub fn deletion(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            deleted: true,
            fields: Map::new(),
        }
    }

    /// Adds or replaces one field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Upstream account the session syncs from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Upstream company id; keys the identity cache.
    pub realm_id: String,
    /// OAuth bearer token forwarded to the upstream client.
    pub bearer_token: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("realm_id", &self.realm_id)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// Requested page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination { page: 1 }
    }
}

/// A request for one page of one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Record type this request wants.
    pub requested_type: String,
    /// Session id shared by every request of one sync.
    pub operation_id: String,
    /// Every record type the session will request.
    pub types: Vec<String>,
    /// Host-side schema for the requested type.
    #[serde(default)]
    pub schema: Value,
    /// Host-side filter, passed through untouched.
    #[serde(default)]
    pub filter: Value,
    pub account: Account,
    /// RFC 3339 timestamp of the last successful sync, or empty.
    #[serde(default)]
    pub last_synchronized_at: String,
    #[serde(default)]
    pub pagination: Pagination,
}

impl SyncRequest {
    pub fn page(&self) -> u32 {
        self.pagination.page
    }
}

/// Whether a response came from a full scan or the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Delta,
}

/// Continuation info for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
}

impl PageInfo {
    /// Continuation after `page`.
    pub fn after(page: u32, has_next: bool) -> Self {
        PageInfo {
            has_next,
            next_page: has_next.then_some(page + 1),
        }
    }

    pub fn last() -> Self {
        PageInfo {
            has_next: false,
            next_page: None,
        }
    }
}

/// One page of records for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub items: Vec<Record>,
    pub pagination: PageInfo,
    pub synchronization_type: SyncType,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for one page of one record type.
    Sync {
        /// Client-chosen id echoed in the reply.
        id: u64,
        request: SyncRequest,
    },

    /// Abandon an in-flight sync request.
    ///
    /// Only the request is cancelled; its operation keeps serving others.
    Cancel {
        /// Id of the request to abandon.
        id: u64,
    },

    /// Ping message for keepalive.
    Ping {
        /// Client-chosen ID echoed in Pong.
        id: u64,
    },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a Sync request.
    SyncResponse { id: u64, response: SyncResponse },

    /// Error message.
    Error {
        /// Request the error belongs to; absent for connection-level errors.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        kind: ErrorKind,
        /// Human-readable error description.
        message: String,
        /// Seconds to wait before retrying, for rate limits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    /// Pong response to client Ping.
    Pong {
        /// Echoed from the Ping message.
        id: u64,
    },
}

impl ClientMessage {
    /// Creates a Sync message.
    pub fn sync(id: u64, request: SyncRequest) -> Self {
        ClientMessage::Sync { id, request }
    }

    /// Creates a Cancel message.
    pub fn cancel(id: u64) -> Self {
        ClientMessage::Cancel { id }
    }

    /// Creates a Ping message.
    pub fn ping(id: u64) -> Self {
        ClientMessage::Ping { id }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Creates a SyncResponse message.
    pub fn sync_response(id: u64, response: SyncResponse) -> Self {
        ServerMessage::SyncResponse { id, response }
    }

    /// Creates an Error message from an engine error.
    pub fn error(id: Option<u64>, err: &Error) -> Self {
        ServerMessage::Error {
            id,
            kind: err.kind(),
            message: err.to_string(),
            retry_after_secs: err.retry_after().map(|d| d.as_secs()),
        }
    }

    /// Creates an Error message for a malformed client message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            id: None,
            kind: ErrorKind::Request,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Creates a Pong message.
    pub fn pong(id: u64) -> Self {
        ServerMessage::Pong { id }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
