// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Node configuration, loaded from TOML. Mirrors the ambient config layer
// `massive-graph-core` builds on top of the `toml` crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a control or transport provider listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    Tcp { address: String },
    LocalStream { path: PathBuf },
}

/// Tunables for the collection engine's direct/indirect transfer paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEngineConfig {
    pub maximum_number_of_parallel_streams: usize,
    pub maximum_transfer_size: u64,
    pub number_of_buffers: usize,
    pub acquire_buffer_timeout_in_milliseconds: u64,
}

impl Default for CollectionEngineConfig {
    fn default() -> Self {
        Self {
            maximum_number_of_parallel_streams: 4,
            maximum_transfer_size: 4 * 1024 * 1024,
            number_of_buffers: 8,
            acquire_buffer_timeout_in_milliseconds: 5_000,
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub control_endpoint: Endpoint,
    pub transport_endpoint: Endpoint,
    /// Directory prefix used by Files-backed storages rooted at this node.
    pub files_storage_prefix: PathBuf,
    pub collection_engine: CollectionEngineConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
