// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration file.
//!
//! ```toml
//! [sync]
//! page_size = 500
//!
//! [[record_types]]
//! kind = "primary"
//! id = "Bill"
//! source = "Bill"
//! mapping = { fields = { total = "/TotalAmt" } }
//!
//! [[record_types]]
//! kind = "union"
//! id = "Transaction"
//! members = ["Bill", "Invoice"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tl_core::{Catalog, JsonMapping, Record, RecordType, SyncConfig};

/// Default configuration file name, relative to the working directory.
pub const CONFIG_FILE_NAME: &str = "tally.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to parse fixtures {}: {source}", path.display())]
    Fixtures {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] tl_core::Error),
}

/// Contents of the configuration file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub sync: SyncConfig,
    pub record_types: Vec<RecordTypeConfig>,
}

/// One `[[record_types]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RecordTypeConfig {
    Primary {
        id: String,
        source: String,
        #[serde(default = "enabled")]
        change_feed: bool,
        #[serde(default)]
        mapping: JsonMapping,
    },
    Dependent {
        id: String,
        parent: String,
        #[serde(default = "enabled")]
        change_feed: bool,
        #[serde(default)]
        mapping: JsonMapping,
    },
    Union {
        id: String,
        members: Vec<String>,
    },
    Static {
        id: String,
        #[serde(default)]
        items: Vec<Record>,
    },
}

fn enabled() -> bool {
    true
}

impl ServerConfig {
    /// Loads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parses `content`; `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Builds the record catalog. Unions may list members declared after
    /// them.
    pub fn catalog(&self) -> Result<Catalog, ConfigError> {
        let mut catalog = Catalog::new();
        for entry in &self.record_types {
            let record_type = match entry.clone() {
                RecordTypeConfig::Primary {
                    id,
                    source,
                    change_feed,
                    mapping,
                } => RecordType::primary(id, source, mapping).with_change_feed(change_feed),
                RecordTypeConfig::Dependent {
                    id,
                    parent,
                    change_feed,
                    mapping,
                } => RecordType::dependent(id, parent, mapping).with_change_feed(change_feed),
                RecordTypeConfig::Static { id, items } => RecordType::constant(id, items),
                RecordTypeConfig::Union { .. } => continue,
            };
            catalog.add(record_type)?;
        }
        for entry in &self.record_types {
            if let RecordTypeConfig::Union { id, members } = entry {
                let members: Vec<&str> = members.iter().map(String::as_str).collect();
                catalog.add_union(id.as_str(), &members)?;
            }
        }
        Ok(catalog)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
