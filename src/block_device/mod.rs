// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Block device layer: fixed-size block addressing over a set of registered
// storages. The meta-data provider owns an ordered set of
// (BlockRange -> Storage-slice) mappings (spec.md §4.4).

use crate::config::Endpoint;
use crate::domain::{Offset, Range, SegmentId, Size, StorageId};
use crate::transport::client::TransportClient;
use crate::transport::wire::TransportAddress;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Dense identifier for one fixed-size block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// A contiguous, half-open run of BlockIds `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub begin: BlockId,
    pub end: BlockId,
}

impl BlockRange {
    pub fn new(begin: BlockId, end: BlockId) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> u64 {
        self.end.0.saturating_sub(self.begin.0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &BlockRange) -> bool {
        self.begin.0 < other.end.0 && other.begin.0 < self.end.0
    }

    pub fn contains(&self, other: &BlockRange) -> bool {
        self.begin.0 <= other.begin.0 && other.end.0 <= self.end.0
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin.0, self.end.0)
    }
}

/// Serialisable address of a provider endpoint: its control and transport
/// listen addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectable {
    pub control: Endpoint,
    pub transport: Endpoint,
}

impl Connectable {
    pub fn new(control: Endpoint, transport: Endpoint) -> Self {
        Self { control, transport }
    }
}

/// A slice of a storage's byte range reported back as no longer part of any
/// block mapping (either because it never filled a whole block, or because
/// `remove` excised it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnusedStorageSlice {
    pub storage_id: StorageId,
    pub segment_id: SegmentId,
    pub range: Range,
}

struct Mapping {
    blocks: BlockRange,
    connectable: Connectable,
    storage_id: StorageId,
    segment_id: SegmentId,
    /// Byte offset in the storage's segment where this mapping's first
    /// block begins.
    storage_offset: Offset,
}

/// Owns the ordered, non-overlapping (BlockRange -> Storage-slice) mappings
/// for one block device.
pub struct BlockDeviceMetaData {
    block_size: Size,
    next_block_id: AtomicU64,
    mappings: Mutex<Vec<Mapping>>,
}

impl BlockDeviceMetaData {
    pub fn new(block_size: Size) -> Self {
        Self {
            block_size,
            next_block_id: AtomicU64::new(0),
            mappings: Mutex::new(Vec::new()),
        }
    }

    pub fn block_size(&self) -> Size {
        self.block_size
    }

    /// Appends as many whole blocks as fit in `storage_size`. Returns the
    /// newly occupied `BlockRange` and the leftover byte count (a tail
    /// smaller than one block, or the entire size if smaller than one
    /// block) reported back as unused.
    pub fn add(
        &self,
        connectable: Connectable,
        storage_id: StorageId,
        segment_id: SegmentId,
        storage_size: Size,
    ) -> (BlockRange, Size) {
        let whole_blocks = storage_size.bytes() / self.block_size.bytes();
        let leftover = Size::new(storage_size.bytes() % self.block_size.bytes());
        let begin = BlockId(self.next_block_id.fetch_add(whole_blocks, Ordering::AcqRel));
        let range = BlockRange::new(begin, BlockId(begin.0 + whole_blocks));
        if whole_blocks > 0 {
            self.mappings.lock().unwrap().push(Mapping {
                blocks: range,
                connectable,
                storage_id,
                segment_id,
                storage_offset: Offset::ZERO,
            });
        }
        (range, leftover)
    }

    /// Excises `range` from the occupied mappings, splitting or dropping
    /// mappings as needed. Returns the list of storage slices this freed.
    pub fn remove(&self, range: BlockRange) -> Vec<UnusedStorageSlice> {
        let mut mappings = self.mappings.lock().unwrap();
        let mut freed = Vec::new();
        let mut result = Vec::with_capacity(mappings.len());

        for mapping in mappings.drain(..) {
            if !mapping.blocks.overlaps(&range) {
                result.push(mapping);
                continue;
            }

            let block_bytes = self.block_size.bytes();
            let seg_begin = mapping.storage_offset;
            let begin_block = mapping.blocks.begin.0.max(range.begin.0);
            let end_block = mapping.blocks.end.0.min(range.end.0);

            // Freed middle slice, always present since we know of overlap.
            let freed_offset = seg_begin + Size::new((begin_block - mapping.blocks.begin.0) * block_bytes);
            let freed_len = Size::new((end_block - begin_block) * block_bytes);
            freed.push(UnusedStorageSlice {
                storage_id: mapping.storage_id,
                segment_id: mapping.segment_id,
                range: Range::new(freed_offset, freed_len),
            });

            // Left remainder, if the removed range starts after this mapping's begin.
            if begin_block > mapping.blocks.begin.0 {
                result.push(Mapping {
                    blocks: BlockRange::new(mapping.blocks.begin, BlockId(begin_block)),
                    connectable: mapping.connectable.clone(),
                    storage_id: mapping.storage_id,
                    segment_id: mapping.segment_id,
                    storage_offset: seg_begin,
                });
            }
            // Right remainder, if the removed range ends before this mapping's end.
            if end_block < mapping.blocks.end.0 {
                let right_offset = seg_begin + Size::new((end_block - mapping.blocks.begin.0) * block_bytes);
                result.push(Mapping {
                    blocks: BlockRange::new(BlockId(end_block), mapping.blocks.end),
                    connectable: mapping.connectable,
                    storage_id: mapping.storage_id,
                    segment_id: mapping.segment_id,
                    storage_offset: right_offset,
                });
            }
        }

        result.sort_by_key(|m| m.blocks.begin.0);
        *mappings = result;
        freed
    }

    /// Returns `(Connectable, TransportAddress)` for the block, or fails
    /// with `BlockNotInAnyStorage`.
    pub fn location(&self, id: BlockId) -> crate::Result<(Connectable, TransportAddress)> {
        let mappings = self.mappings.lock().unwrap();
        for mapping in mappings.iter() {
            if mapping.blocks.begin.0 <= id.0 && id.0 < mapping.blocks.end.0 {
                let block_bytes = self.block_size.bytes();
                let offset = mapping.storage_offset + Size::new((id.0 - mapping.blocks.begin.0) * block_bytes);
                return Ok((
                    mapping.connectable.clone(),
                    TransportAddress {
                        storage_id: mapping.storage_id,
                        parameter: Vec::new(),
                        segment_id: mapping.segment_id,
                        offset,
                    },
                ));
            }
        }
        Err(crate::Error::BlockNotInAnyStorage(id.0))
    }

    /// The current set of occupied BlockRanges, in ascending order.
    pub fn blocks(&self) -> Vec<BlockRange> {
        self.mappings.lock().unwrap().iter().map(|m| m.blocks).collect()
    }
}

/// Performs one control round-trip (location lookup) followed by one bulk
/// round-trip, yielding the number of bytes actually transferred. A
/// mismatch with the configured block size is a fatal error.
pub struct Reader<'a> {
    meta_data: &'a BlockDeviceMetaData,
    transport_of: Box<dyn Fn(&Connectable) -> crate::Result<Arc<TransportClient>> + 'a>,
}

impl<'a> Reader<'a> {
    pub fn new(
        meta_data: &'a BlockDeviceMetaData,
        transport_of: impl Fn(&Connectable) -> crate::Result<Arc<TransportClient>> + 'a,
    ) -> Self {
        Self {
            meta_data,
            transport_of: Box::new(transport_of),
        }
    }

    pub fn read_block(&self, id: BlockId, out: &mut [u8]) -> crate::Result<u64> {
        let (connectable, address) = self.meta_data.location(id)?;
        let client = (self.transport_of)(&connectable)?;
        let n = client.memory_get(address, self.meta_data.block_size(), out)?;
        if n != self.meta_data.block_size().bytes() {
            return Err(crate::Error::ShortTransfer {
                operation: "block read",
                transferred: n,
                requested: self.meta_data.block_size().bytes(),
            });
        }
        Ok(n)
    }
}

pub struct Writer<'a> {
    meta_data: &'a BlockDeviceMetaData,
    transport_of: Box<dyn Fn(&Connectable) -> crate::Result<Arc<TransportClient>> + 'a>,
}

impl<'a> Writer<'a> {
    pub fn new(
        meta_data: &'a BlockDeviceMetaData,
        transport_of: impl Fn(&Connectable) -> crate::Result<Arc<TransportClient>> + 'a,
    ) -> Self {
        Self {
            meta_data,
            transport_of: Box::new(transport_of),
        }
    }

    pub fn write_block(&self, id: BlockId, data: &[u8]) -> crate::Result<u64> {
        if data.len() as u64 != self.meta_data.block_size().bytes() {
            return Err(crate::Error::ShortTransfer {
                operation: "block write",
                transferred: data.len() as u64,
                requested: self.meta_data.block_size().bytes(),
            });
        }
        let (connectable, address) = self.meta_data.location(id)?;
        let client = (self.transport_of)(&connectable)?;
        client.memory_put(address, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connectable(n: u16) -> Connectable {
        Connectable {
            control: Endpoint::Tcp { address: format!("127.0.0.1:{n}") },
            transport: Endpoint::Tcp { address: format!("127.0.0.1:{}", n + 1) },
        }
    }

    #[test]
    fn add_reports_leftover_tail() {
        let md = BlockDeviceMetaData::new(Size::new(4096));
        let (range, leftover) = md.add(connectable(1), StorageId(0), SegmentId(1), Size::new(32 * 1024 * 1024));
        assert_eq!(range.len(), (32 * 1024 * 1024) / 4096);
        assert_eq!(leftover, Size::ZERO);
    }

    #[test]
    fn six_storages_yield_expected_block_range() {
        let md = BlockDeviceMetaData::new(Size::new(4096));
        for i in 0..6u16 {
            md.add(connectable(i), StorageId(i as u64), SegmentId(1), Size::new(32 * 1024 * 1024));
        }
        let blocks = md.blocks();
        let total: u64 = blocks.iter().map(|r| r.len()).sum();
        assert_eq!(total, 49152);
        assert_eq!(blocks.first().unwrap().begin, BlockId(0));
        assert_eq!(blocks.last().unwrap().end, BlockId(49152));
    }

    #[test]
    fn remove_whole_mapping_and_split_mapping() {
        let md = BlockDeviceMetaData::new(Size::new(4096));
        for i in 0..6u16 {
            md.add(connectable(i), StorageId(i as u64), SegmentId(1), Size::new(32 * 1024 * 1024));
        }
        // Each storage contributes 32MiB / 4KiB = 8192 blocks.
        let freed = md.remove(BlockRange::new(BlockId(16384), BlockId(24576)));
        assert_eq!(freed.len(), 1);
        let blocks = md.blocks();
        assert!(blocks.iter().any(|r| *r == BlockRange::new(BlockId(0), BlockId(16384))));
        assert!(blocks.iter().any(|r| *r == BlockRange::new(BlockId(24576), BlockId(49152))));

        let freed2 = md.remove(BlockRange::new(BlockId(11000), BlockId(11100)));
        assert_eq!(freed2.len(), 1);
        let blocks2 = md.blocks();
        assert!(blocks2.iter().any(|r| *r == BlockRange::new(BlockId(0), BlockId(11000))));
        assert!(blocks2.iter().any(|r| *r == BlockRange::new(BlockId(11100), BlockId(16384))));
    }

    #[test]
    fn location_of_unmapped_block_fails() {
        let md = BlockDeviceMetaData::new(Size::new(4096));
        assert!(matches!(md.location(BlockId(0)), Err(crate::Error::BlockNotInAnyStorage(0))));
    }
}
