// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Meta-data back-end boundary (spec.md §6 "Persisted state" /
// SPEC_FULL.md §9). The real IOV database is out of scope; this module
// specifies the trait it must satisfy and ships an in-memory reference
// implementation used by the collection engine's tests.

use crate::domain::Size;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// A persisted record describing whether a collection has a declared max
/// size. Its presence in the back-end distinguishes "exists" from "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInformation {
    pub size_max: Option<Size>,
}

/// Named meta-data scope grouping collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
}

/// Key/value boundary the engine uses for workspace, collection, and
/// per-collection `CollectionInformation` records. `get`/`put`/`remove` are
/// expected to be atomic at the back-end; callers do not retry (spec.md §5).
pub trait MetaDataBackend: Send + Sync {
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: Vec<u8>) -> crate::Result<()>;
    fn remove(&self, key: &str) -> crate::Result<()>;
    fn exists(&self, key: &str) -> crate::Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Reference `MetaDataBackend` used for single-node deployments and tests.
/// Not a substitute for the out-of-scope external IOV database.
#[derive(Default)]
pub struct InMemoryMetaData {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryMetaData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaDataBackend for InMemoryMetaData {
    fn get(&self, key: &str) -> crate::Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> crate::Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> crate::Result<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Key under which a collection's `CollectionInformation` is stored.
pub fn collection_info_key(collection_uuid: &str) -> String {
    format!("mcs_iov_backend_{collection_uuid}")
}

/// Key under which a collection's current size (decimal string) is stored.
pub fn collection_size_key(collection_uuid: &str) -> String {
    format!("mcs_iov_backend_{collection_uuid}_size")
}
