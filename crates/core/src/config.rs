// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.
//!
//! Loaded from the `[sync]` table of the server's TOML file. Every field has
//! a default, so an empty table is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest page the upstream query endpoint will return.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Tunables for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entities requested per source per page.
    pub page_size: u32,
    /// How long registration waits for the rest of a session's record types
    /// before flushing a partial batch. Negative values are rejected.
    pub registration_timeout_ms: i64,
    /// Idle time after which a sync operation is cancelled and dropped.
    pub operation_ttl_secs: u64,
    /// Idle time after which a realm's identity cache is dropped.
    pub identity_cache_ttl_secs: u64,
    /// How often the idle sweepers run.
    pub sweep_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            page_size: MAX_PAGE_SIZE,
            registration_timeout_ms: 2_000,
            operation_ttl_secs: 600,
            identity_cache_ttl_secs: 86_400,
            sweep_interval_secs: 60,
        }
    }
}

impl SyncConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.registration_timeout_ms < 0 {
            return Err(Error::NegativeTimeout(self.registration_timeout_ms));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Registration flush timeout.
    pub fn registration_timeout(&self) -> Result<Duration> {
        u64::try_from(self.registration_timeout_ms)
            .map(Duration::from_millis)
            .map_err(|_| Error::NegativeTimeout(self.registration_timeout_ms))
    }

    pub fn operation_ttl(&self) -> Duration {
        Duration::from_secs(self.operation_ttl_secs)
    }

    pub fn identity_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
