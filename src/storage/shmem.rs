// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHMEM storage. Segment names are "/<prefix>.<segment_id>"; segment_create
// shm_opens + ftruncates + mmaps, segment_remove munmaps and, if this
// process created the segment, shm_unlinks the name.

use crate::domain::{ChunkAccess, MaxSize, Range, SegmentId, Size};
use crate::segment::{Chunk, ChunkDescription, ConstChunk, MutableChunkBytes};
use crate::shm_name::make_shm_name;
use crate::{ShmHandle, ShmOpenMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct ShmSegment {
    name: String,
    range: Range,
    /// `None` for a length-zero segment: mmap and munmap are both skipped
    /// and every chunk acquired against it is an empty, null-pointer view.
    handle: Option<ShmHandle>,
    mlocked: bool,
}

pub struct ShmemStorage {
    prefix: String,
    max: MaxSize,
    used: Mutex<Size>,
    next_segment_id: AtomicU64,
    segments: Mutex<HashMap<SegmentId, ShmSegment>>,
}

impl ShmemStorage {
    pub fn new(prefix: impl Into<String>, max: MaxSize) -> Self {
        Self {
            prefix: prefix.into(),
            max,
            used: Mutex::new(Size::ZERO),
            next_segment_id: AtomicU64::new(1),
            segments: Mutex::new(HashMap::new()),
        }
    }

    pub fn size_max(&self) -> MaxSize {
        self.max
    }

    pub fn size_used(&self) -> Size {
        *self.used.lock().unwrap()
    }

    pub fn segment_create(&self, size: Size) -> crate::Result<SegmentId> {
        let mut used = self.used.lock().unwrap();
        super::check_capacity(size, *used, self.max)?;
        let id = SegmentId(self.next_segment_id.fetch_add(1, Ordering::Relaxed));
        let name = make_shm_name(&format!("{}.{}", self.prefix, id.0));
        // Length-zero mmaps are handled specially: the stored pointer stays
        // nullptr and both mmap and munmap are skipped, since the platform
        // shm layer below rejects a zero user size outright.
        let handle = if size.bytes() == 0 {
            None
        } else {
            Some(
                ShmHandle::acquire(&name, size.bytes() as usize, ShmOpenMode::Create)
                    .map_err(|e| crate::Error::io("shm_open/ftruncate/mmap", e))?,
            )
        };
        self.segments.lock().unwrap().insert(
            id,
            ShmSegment {
                name,
                range: Range::new(crate::domain::Offset::ZERO, size),
                handle,
                mlocked: false,
            },
        );
        *used = *used + size;
        tracing::info!(prefix = %self.prefix, segment = %id, %size, "shmem segment_create");
        Ok(id)
    }

    pub fn segment_remove(&self, id: SegmentId) -> crate::Result<Size> {
        let removed = self.segments.lock().unwrap().remove(&id);
        match removed {
            Some(seg) => {
                if let Some(handle) = &seg.handle {
                    handle.unlink();
                }
                let mut used = self.used.lock().unwrap();
                *used = *used - seg.range.size;
                tracing::info!(segment = %id, name = %seg.name, "shmem segment_remove, unlinked");
                Ok(seg.range.size)
            }
            None => Ok(Size::ZERO),
        }
    }

    fn with_segment<T>(&self, id: SegmentId, f: impl FnOnce(&ShmSegment) -> crate::Result<T>) -> crate::Result<T> {
        let segments = self.segments.lock().unwrap();
        let seg = segments
            .get(&id)
            .ok_or(crate::Error::UnknownSegmentId(id, crate::domain::StorageId(0)))?;
        f(seg)
    }

    pub fn chunk_description(
        &self,
        _access: ChunkAccess,
        id: SegmentId,
        range: Range,
    ) -> crate::Result<ChunkDescription> {
        self.with_segment(id, |seg| {
            if !seg.range.contains_range(&range) {
                return Err(crate::Error::RangesAreNotTouching {
                    small: range,
                    large: seg.range,
                });
            }
            Ok(ChunkDescription::Shmem {
                name: seg.name.clone(),
                segment_id: id,
                segment_size: seg.range.size,
                range,
            })
        })
    }

    /// Rematerialise a chunk from a description issued by *this same process*
    /// (or another process mapping the same named shm segment).
    pub fn acquire_chunk(&self, access: ChunkAccess, id: SegmentId, range: Range) -> crate::Result<Chunk> {
        self.with_segment(id, |seg| {
            if !seg.range.contains_range(&range) {
                return Err(crate::Error::RangesAreNotTouching {
                    small: range,
                    large: seg.range,
                });
            }
            let offset = range
                .begin
                .to_unsigned()
                .ok_or(crate::Error::CastSignedToUnsigned(range.begin.0))? as usize;
            let len = range.size.bytes() as usize;
            let handle = match &seg.handle {
                None => {
                    return Ok(match access {
                        ChunkAccess::Const => Chunk::Const(Box::new(ShmChunk { ptr: std::ptr::null(), len: 0 })),
                        ChunkAccess::Mutable => Chunk::Mutable(Box::new(ShmChunkMut { ptr: std::ptr::null_mut(), len: 0 })),
                    })
                }
                Some(handle) => handle,
            };
            Ok(match access {
                ChunkAccess::Const => Chunk::Const(Box::new(ShmChunk {
                    ptr: unsafe { handle.as_ptr().add(offset) },
                    len,
                })),
                ChunkAccess::Mutable => Chunk::Mutable(Box::new(ShmChunkMut {
                    ptr: unsafe { handle.as_mut_ptr().add(offset) },
                    len,
                })),
            })
        })
    }

    pub fn file_read(&self, id: SegmentId, range: Range, out: &mut [u8]) -> crate::Result<u64> {
        let chunk = self.acquire_chunk(ChunkAccess::Const, id, range)?;
        let n = chunk.bytes().len().min(out.len());
        out[..n].copy_from_slice(&chunk.bytes()[..n]);
        Ok(n as u64)
    }

    pub fn file_write(&self, id: SegmentId, range: Range, data: &[u8]) -> crate::Result<u64> {
        let mut chunk = self.acquire_chunk(ChunkAccess::Mutable, id, range)?;
        let bytes = chunk.bytes_mut()?;
        let n = bytes.len().min(data.len());
        bytes[..n].copy_from_slice(&data[..n]);
        Ok(n as u64)
    }
}

/// A chunk view directly over mmap'd shared memory. Zero-length segments are
/// special-cased in `ShmemStorage::segment_create` (no handle is ever
/// acquired); `len == 0` here just yields an empty slice and never
/// dereferences `ptr`.
struct ShmChunk {
    ptr: *const u8,
    len: usize,
}

unsafe impl Send for ShmChunk {}

impl ConstChunk for ShmChunk {
    fn bytes(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

struct ShmChunkMut {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for ShmChunkMut {}

impl MutableChunkBytes for ShmChunkMut {
    fn bytes(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        if self.len == 0 {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
        }
    }
}
