// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Heap storage: process-private backing memory. Segments are independent
// allocations; chunks return spans into those allocations.

use crate::domain::{ChunkAccess, MaxSize, Range, SegmentId, Size};
use crate::segment::{Chunk, ChunkDescription, HeapChunk, HeapChunkMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct HeapSegment {
    range: Range,
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct HeapStorage {
    tag: u64,
    max: MaxSize,
    used: Mutex<Size>,
    next_segment_id: AtomicU64,
    segments: Mutex<HashMap<SegmentId, HeapSegment>>,
}

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

impl HeapStorage {
    pub fn new(max: MaxSize) -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
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
        let buffer = Arc::new(Mutex::new(vec![0u8; size.bytes() as usize]));
        self.segments.lock().unwrap().insert(
            id,
            HeapSegment {
                range: Range::new(crate::domain::Offset::ZERO, size),
                buffer,
            },
        );
        *used = *used + size;
        tracing::info!(storage_tag = self.tag, segment = %id, %size, "heap segment_create");
        Ok(id)
    }

    pub fn segment_remove(&self, id: SegmentId) -> crate::Result<Size> {
        let removed = self.segments.lock().unwrap().remove(&id);
        match removed {
            Some(seg) => {
                let mut used = self.used.lock().unwrap();
                *used = *used - seg.range.size;
                tracing::info!(storage_tag = self.tag, segment = %id, "heap segment_remove");
                Ok(seg.range.size)
            }
            None => Ok(Size::ZERO),
        }
    }

    fn segment_buffer(&self, id: SegmentId, range: Range) -> crate::Result<(Arc<Mutex<Vec<u8>>>, Range)> {
        let segments = self.segments.lock().unwrap();
        let seg = segments
            .get(&id)
            .ok_or(crate::Error::UnknownSegmentId(id, crate::domain::StorageId(self.tag)))?;
        if !seg.range.contains_range(&range) {
            return Err(crate::Error::RangesAreNotTouching {
                small: range,
                large: seg.range,
            });
        }
        Ok((seg.buffer.clone(), range))
    }

    pub fn chunk_description(
        &self,
        _access: ChunkAccess,
        id: SegmentId,
        range: Range,
    ) -> crate::Result<ChunkDescription> {
        self.segment_buffer(id, range)?;
        Ok(ChunkDescription::Heap {
            storage_tag: self.tag,
            segment_id: id,
            range,
        })
    }

    pub fn acquire_chunk(&self, access: ChunkAccess, id: SegmentId, range: Range) -> crate::Result<Chunk> {
        let (buffer, range) = self.segment_buffer(id, range)?;
        let offset = range.begin.to_unsigned().ok_or(crate::Error::CastSignedToUnsigned(range.begin.0))? as usize;
        let len = range.size.bytes() as usize;
        Ok(match access {
            ChunkAccess::Const => Chunk::Const(Box::new(HeapChunk::new_const(buffer, offset, len))),
            ChunkAccess::Mutable => Chunk::Mutable(Box::new(HeapChunkMut::new(buffer, offset, len))),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_create_respects_max_size() {
        let storage = HeapStorage::new(MaxSize::Limit(Size::new(16)));
        assert!(storage.segment_create(Size::new(16)).is_ok());
        let err = storage.segment_create(Size::new(1)).unwrap_err();
        assert!(matches!(err, crate::Error::BadAlloc { .. }));
    }

    #[test]
    fn write_then_read_round_trips() {
        let storage = HeapStorage::new(MaxSize::Unlimited);
        let id = storage.segment_create(Size::new(8)).unwrap();
        let range = Range::new(crate::domain::Offset::ZERO, Size::new(8));
        storage.file_write(id, range, b"abcdefgh").unwrap();
        let mut out = [0u8; 8];
        storage.file_read(id, range, &mut out).unwrap();
        assert_eq!(&out, b"abcdefgh");
    }

    #[test]
    fn segment_remove_frees_used_size() {
        let storage = HeapStorage::new(MaxSize::Limit(Size::new(8)));
        let id = storage.segment_create(Size::new(8)).unwrap();
        assert_eq!(storage.size_used(), Size::new(8));
        storage.segment_remove(id).unwrap();
        assert_eq!(storage.size_used(), Size::ZERO);
        assert_eq!(storage.segment_remove(id).unwrap(), Size::ZERO);
    }
}
