// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tl-core operations.
//!
//! Errors carry owned strings rather than wrapped sources so they can be
//! cloned: one upstream failure is delivered to every caller still waiting
//! on the operation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All possible errors that can occur in tl-core operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown record type: '{0}'")]
    UnknownRecordType(String),

    #[error("missing schema for union branch '{branch}' of record type '{record_type}'\n  hint: list every member under schema.branches")]
    MissingSchema { record_type: String, branch: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("record type '{record_type}' is already registered in operation '{operation}'")]
    DuplicateRegistration {
        operation: String,
        record_type: String,
    },

    #[error("record type '{record_type}' arrived after operation '{operation}' was dispatched")]
    LateRegistration {
        operation: String,
        record_type: String,
    },

    #[error("no pending page {page} for record type '{record_type}' in operation '{operation}'")]
    PageNotFound {
        operation: String,
        record_type: String,
        page: u32,
    },

    #[error("operation not found: {0}\n  hint: restart the sync from page 1")]
    OperationNotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("rate limited by upstream\n  hint: retry the sync later")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transform failed for record type '{record_type}': {message}")]
    Transform {
        record_type: String,
        message: String,
    },

    #[error("page {page} of record type '{record_type}' was already delivered")]
    AlreadyResolved { record_type: String, page: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation expired: {0}")]
    Expired(String),

    #[error("expected count must be at least 1, got {0}")]
    InvalidExpectedCount(usize),

    #[error("no batch function configured")]
    MissingBatchFn,

    #[error("timeout must not be negative, got {0}ms")]
    NegativeTimeout(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

/// Wire classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed; retrying will not help.
    Request,
    /// Upstream asked us to slow down; retry later.
    RateLimited,
    /// Upstream failed or returned garbage.
    Upstream,
    /// A record could not be mapped to the output schema.
    Transform,
    /// The request or its operation was cancelled or expired.
    Cancelled,
    /// Anything else.
    Internal,
}

impl Error {
    /// Returns true if the caller should back off and retry later.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Returns true for errors caused by how the caller used the protocol.
    ///
    /// These are raised before an operation issues any upstream request.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Error::UnknownRecordType(_)
                | Error::MissingSchema { .. }
                | Error::InvalidRequest(_)
                | Error::DuplicateRegistration { .. }
                | Error::LateRegistration { .. }
                | Error::PageNotFound { .. }
                | Error::OperationNotFound(_)
        )
    }

    /// Classifies the error for the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            e if e.is_protocol_misuse() => ErrorKind::Request,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Upstream(_) | Error::Json(_) => ErrorKind::Upstream,
            Error::Transform { .. } => ErrorKind::Transform,
            Error::Cancelled | Error::Expired(_) => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Suggested delay before retrying, if upstream supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn transform(record_type: &str, message: impl Into<String>) -> Self {
        Error::Transform {
            record_type: record_type.to_string(),
            message: message.into(),
        }
    }
}

/// A specialized Result type for tl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
