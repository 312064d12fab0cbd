// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The set of storage implementations, closed over a tagged variant per the
// design note in spec.md §9 (replacing the original's compile-time template
// parameter list with a single sum type and a match).

pub mod files;
pub mod heap;
pub mod imported_c;
pub mod shmem;

use crate::domain::{MaxSize, Range, SegmentId, Size};
use crate::segment::{Chunk, ChunkDescription};
use crate::domain::ChunkAccess;

/// One storage instance, one of the compiled-in implementation variants.
/// Dispatch is a match in every method below; adding a variant means adding
/// one arm everywhere, by design (spec.md §9).
pub enum StorageInstance {
    Heap(heap::HeapStorage),
    Shmem(shmem::ShmemStorage),
    Files(files::FilesStorage),
    ImportedC(imported_c::ImportedCStorage),
}

impl StorageInstance {
    pub fn size_max(&self) -> MaxSize {
        match self {
            StorageInstance::Heap(s) => s.size_max(),
            StorageInstance::Shmem(s) => s.size_max(),
            StorageInstance::Files(s) => s.size_max(),
            StorageInstance::ImportedC(s) => s.size_max(),
        }
    }

    pub fn size_used(&self) -> Size {
        match self {
            StorageInstance::Heap(s) => s.size_used(),
            StorageInstance::Shmem(s) => s.size_used(),
            StorageInstance::Files(s) => s.size_used(),
            StorageInstance::ImportedC(s) => s.size_used(),
        }
    }

    pub fn segment_create(&self, size: Size) -> crate::Result<SegmentId> {
        match self {
            StorageInstance::Heap(s) => s.segment_create(size),
            StorageInstance::Shmem(s) => s.segment_create(size),
            StorageInstance::Files(s) => s.segment_create(size),
            StorageInstance::ImportedC(s) => s.segment_create(size),
        }
    }

    pub fn segment_remove(&self, id: SegmentId) -> crate::Result<Size> {
        match self {
            StorageInstance::Heap(s) => s.segment_remove(id),
            StorageInstance::Shmem(s) => s.segment_remove(id),
            StorageInstance::Files(s) => s.segment_remove(id),
            StorageInstance::ImportedC(s) => s.segment_remove(id),
        }
    }

    pub fn chunk_description(
        &self,
        access: ChunkAccess,
        id: SegmentId,
        range: Range,
    ) -> crate::Result<ChunkDescription> {
        match self {
            StorageInstance::Heap(s) => s.chunk_description(access, id, range),
            StorageInstance::Shmem(s) => s.chunk_description(access, id, range),
            StorageInstance::Files(s) => s.chunk_description(access, id, range),
            StorageInstance::ImportedC(s) => s.chunk_description(access, id, range),
        }
    }

    pub fn acquire_chunk(
        &self,
        access: ChunkAccess,
        id: SegmentId,
        range: Range,
    ) -> crate::Result<Chunk> {
        match self {
            StorageInstance::Heap(s) => s.acquire_chunk(access, id, range),
            StorageInstance::Shmem(s) => s.acquire_chunk(access, id, range),
            StorageInstance::Files(s) => s.acquire_chunk(access, id, range),
            StorageInstance::ImportedC(s) => s.acquire_chunk(access, id, range),
        }
    }

    pub fn file_read(&self, id: SegmentId, range: Range, out: &mut [u8]) -> crate::Result<u64> {
        match self {
            StorageInstance::Heap(s) => s.file_read(id, range, out),
            StorageInstance::Shmem(s) => s.file_read(id, range, out),
            StorageInstance::Files(s) => s.file_read(id, range, out),
            StorageInstance::ImportedC(s) => s.file_read(id, range, out),
        }
    }

    pub fn file_write(&self, id: SegmentId, range: Range, data: &[u8]) -> crate::Result<u64> {
        match self {
            StorageInstance::Heap(s) => s.file_write(id, range, data),
            StorageInstance::Shmem(s) => s.file_write(id, range, data),
            StorageInstance::Files(s) => s.file_write(id, range, data),
            StorageInstance::ImportedC(s) => s.file_write(id, range, data),
        }
    }

    pub fn implementation_id(&self) -> crate::domain::StorageImplementationId {
        use crate::domain::StorageImplementationId as Id;
        match self {
            StorageInstance::Heap(_) => Id::Heap,
            StorageInstance::Shmem(_) => Id::Shmem,
            StorageInstance::Files(_) => Id::Files,
            StorageInstance::ImportedC(_) => Id::ImportedC,
        }
    }
}

/// Checks `used + requested` against `max`, returning `BadAlloc` on overflow.
/// Shared by every storage implementation's `segment_create`.
pub(crate) fn check_capacity(requested: Size, used: Size, max: MaxSize) -> crate::Result<()> {
    if max.allows(used, requested) {
        Ok(())
    } else {
        Err(crate::Error::BadAlloc {
            requested,
            used,
            max,
        })
    }
}
