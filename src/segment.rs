// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Segment bookkeeping and the scoped chunk acquisition shared by every
// storage implementation. A Segment exclusively owns a contiguous byte
// range within its storage; a Chunk is a typed, scoped view into it.

use crate::domain::{ChunkAccess, Range, SegmentId};
use serde::{Deserialize, Serialize};

/// What happens to a file-backed segment's backing file on `segment_remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilePersistency {
    Keep,
    Remove,
}

impl Default for FilePersistency {
    fn default() -> Self {
        FilePersistency::Remove
    }
}

/// Access mode and optional mlock hold for a shm-backed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmSegmentOptions {
    pub mode: u32,
    pub mlocked: bool,
}

impl Default for ShmSegmentOptions {
    fn default() -> Self {
        Self {
            mode: 0o600,
            mlocked: false,
        }
    }
}

/// Bookkeeping record a storage implementation keeps per segment.
/// Segments do not overlap within a storage.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub range: Range,
    pub file_persistency: Option<FilePersistency>,
    pub shm_options: Option<ShmSegmentOptions>,
}

/// A serializable value sufficient to rematerialise a chunk's byte view in
/// another address space reachable via the same storage implementation.
/// Variant-tagged per spec.md §9's design note: the implementation set is
/// closed over a sum type rather than a compile-time template parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChunkDescription {
    Heap {
        storage_tag: u64,
        segment_id: SegmentId,
        range: Range,
    },
    Shmem {
        name: String,
        segment_id: SegmentId,
        segment_size: crate::domain::Size,
        range: Range,
    },
    Files {
        directory: std::path::PathBuf,
        segment_id: SegmentId,
        range: Range,
    },
    ImportedC {
        parameter: Vec<u8>,
        segment_id: SegmentId,
        range: Range,
    },
}

impl ChunkDescription {
    pub fn range(&self) -> Range {
        match self {
            ChunkDescription::Heap { range, .. }
            | ChunkDescription::Shmem { range, .. }
            | ChunkDescription::Files { range, .. }
            | ChunkDescription::ImportedC { range, .. } => *range,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        match self {
            ChunkDescription::Heap { segment_id, .. }
            | ChunkDescription::Shmem { segment_id, .. }
            | ChunkDescription::Files { segment_id, .. }
            | ChunkDescription::ImportedC { segment_id, .. } => *segment_id,
        }
    }
}

/// Read-only view into a chunk's bytes.
pub trait ConstChunk: Send {
    fn bytes(&self) -> &[u8];
}

/// Read-write view into a chunk's bytes.
pub trait MutableChunkBytes: Send {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// A scoped chunk acquisition. Release (unmap / munlock / close) happens
/// when the concrete implementation underneath is dropped — every storage
/// implementation's chunk guard runs its release on all exit paths.
pub enum Chunk {
    Const(Box<dyn ConstChunk>),
    Mutable(Box<dyn MutableChunkBytes>),
}

impl Chunk {
    pub fn access(&self) -> ChunkAccess {
        match self {
            Chunk::Const(_) => ChunkAccess::Const,
            Chunk::Mutable(_) => ChunkAccess::Mutable,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Chunk::Const(c) => c.bytes(),
            Chunk::Mutable(c) => c.bytes(),
        }
    }

    /// Mutable access. Fails if this chunk was acquired as `Const`.
    pub fn bytes_mut(&mut self) -> crate::Result<&mut [u8]> {
        match self {
            Chunk::Mutable(c) => Ok(c.bytes_mut()),
            Chunk::Const(_) => Err(crate::Error::Unsupported),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A heap-backed chunk: just a window into an `Arc`'d byte buffer.
pub struct HeapChunk {
    pub(crate) storage: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    pub(crate) snapshot: Vec<u8>,
}

impl HeapChunk {
    pub fn new_const(storage: std::sync::Arc<std::sync::Mutex<Vec<u8>>>, offset: usize, len: usize) -> Self {
        let snapshot = storage.lock().unwrap()[offset..offset + len].to_vec();
        Self {
            storage,
            offset,
            len,
            snapshot,
        }
    }
}

impl ConstChunk for HeapChunk {
    fn bytes(&self) -> &[u8] {
        &self.snapshot
    }
}

/// A mutable heap-backed chunk writes back to the shared buffer on drop,
/// matching the "scoped acquisition, release on every exit path" discipline
/// used throughout this crate for OS-backed resources.
pub struct HeapChunkMut {
    pub(crate) storage: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    pub(crate) offset: usize,
    pub(crate) local: Vec<u8>,
}

impl HeapChunkMut {
    pub fn new(storage: std::sync::Arc<std::sync::Mutex<Vec<u8>>>, offset: usize, len: usize) -> Self {
        let local = storage.lock().unwrap()[offset..offset + len].to_vec();
        Self {
            storage,
            offset,
            local,
        }
    }
}

impl MutableChunkBytes for HeapChunkMut {
    fn bytes(&self) -> &[u8] {
        &self.local
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.local
    }
}

impl Drop for HeapChunkMut {
    fn drop(&mut self) {
        let mut guard = self.storage.lock().unwrap();
        let end = self.offset + self.local.len();
        guard[self.offset..end].copy_from_slice(&self.local);
    }
}
