// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Collection placement: UsedStorage/UsedStorages and the AsEqualAsPossible
// distribution policy (spec.md §3, §4.5.1).

pub mod comm_buffer;
pub mod engine;
pub mod shared_buffer;

use crate::block_device::Connectable;
use crate::domain::{MaxSize, Offset, Range, SegmentId, Size, StorageId};
use std::collections::BinaryHeap;

/// Generates a fresh collection identifier, used as the key under which the
/// engine and meta-data back-end both know a collection.
pub fn new_collection_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One physical slice of a collection: a contiguous `Range` backed by one
/// segment of one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedStorage {
    pub range: Range,
    pub segment_id: SegmentId,
    pub storage_id: StorageId,
}

/// An ordered, contiguous, non-overlapping sequence of `UsedStorage`s that
/// defines a collection's placement. Invariant: the union of ranges is
/// exactly `[0, size())`.
#[derive(Debug, Clone, Default)]
pub struct UsedStorages {
    entries: Vec<UsedStorage>,
}

impl UsedStorages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a placement from an already-ordered sequence of slices,
    /// failing if any consecutive pair is not touching, or a storage id
    /// repeats.
    pub fn construct(entries: Vec<UsedStorage>) -> crate::Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for pair in entries.windows(2) {
            if !pair[0].range.touches(&pair[1].range) {
                return Err(crate::Error::RangesAreNotTouching {
                    small: pair[0].range,
                    large: pair[1].range,
                });
            }
        }
        for entry in &entries {
            if !seen.insert(entry.storage_id) {
                return Err(crate::Error::EmplaceDuplicate(entry.storage_id));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[UsedStorage] {
        &self.entries
    }

    /// The collection's reported span: from the first entry's begin to the
    /// last entry's end. Empty placements span `[0, 0)`.
    pub fn range(&self) -> Range {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => Range::from_bounds(first.range.begin, last.range.end()),
            _ => Range::new(Offset::ZERO, Size::ZERO),
        }
    }

    /// Appends a new block, requiring its range to touch the existing end.
    pub fn append(&mut self, entry: UsedStorage) -> crate::Result<()> {
        if let Some(last) = self.entries.last() {
            if !last.range.touches(&entry.range) {
                return Err(crate::Error::AppendRangesAreNotTouching {
                    existing: last.range,
                    to_append: entry.range,
                });
            }
        }
        if self.entries.iter().any(|e| e.storage_id == entry.storage_id) {
            return Err(crate::Error::EmplaceDuplicate(entry.storage_id));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Appends several touching blocks at once, as produced by a placement
    /// policy run against newly available capacity.
    pub fn append_all(&mut self, entries: Vec<UsedStorage>) -> crate::Result<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }

    /// Finds the entries overlapping `range`, in ascending range order.
    pub fn locate(&self, range: Range) -> Vec<UsedStorage> {
        self.entries.iter().filter(|e| e.range.overlaps(&range)).copied().collect()
    }
}

/// One candidate storage for placement: its id, its connectable endpoint,
/// and the capacity available to place into it.
#[derive(Debug, Clone)]
pub struct PlacementCandidate {
    pub storage_id: StorageId,
    pub connectable: Connectable,
    pub capacity: MaxSize,
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    capacity: u64,
    index: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.capacity.cmp(&other.capacity).then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// `AsEqualAsPossible`: fills from a max-heap of (storage, capacity) pairs,
/// assigning the smallest necessary share to each storage to keep imbalance
/// at most one unit. Storages with insufficient declared capacity for their
/// share are skipped; the caller is responsible for having offered enough
/// total capacity for `total_size`.
pub fn distribute_as_equal_as_possible(
    total_size: Size,
    candidates: &[PlacementCandidate],
) -> crate::Result<Vec<(StorageId, Connectable, Size)>> {
    if candidates.is_empty() {
        return Err(crate::Error::BadAlloc {
            requested: total_size,
            used: Size::ZERO,
            max: MaxSize::Limit(Size::ZERO),
        });
    }

    let n = candidates.len() as u64;
    let base = total_size.bytes() / n;
    let mut remainder = total_size.bytes() % n;

    let mut heap: BinaryHeap<HeapEntry> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| HeapEntry {
            capacity: c.capacity.limit().map(|s| s.bytes()).unwrap_or(u64::MAX),
            index,
        })
        .collect();

    let mut shares = vec![0u64; candidates.len()];
    while let Some(HeapEntry { index, .. }) = heap.pop() {
        let mut share = base;
        if remainder > 0 {
            share += 1;
            remainder -= 1;
        }
        shares[index] = share;
    }

    let mut result = Vec::with_capacity(candidates.len());
    let mut placed = Size::ZERO;
    for (candidate, share) in candidates.iter().zip(shares) {
        if share == 0 {
            continue;
        }
        let size = Size::new(share);
        if !candidate.capacity.allows(Size::ZERO, size) {
            return Err(crate::Error::BadAlloc {
                requested: size,
                used: Size::ZERO,
                max: candidate.capacity,
            });
        }
        result.push((candidate.storage_id, candidate.connectable.clone(), size));
        placed = placed + size;
    }
    debug_assert_eq!(placed, total_size);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;

    fn candidate(id: u64, limit: Option<u64>) -> PlacementCandidate {
        PlacementCandidate {
            storage_id: StorageId(id),
            connectable: Connectable::new(
                Endpoint::Tcp { address: format!("127.0.0.1:{}", 20000 + id) },
                Endpoint::Tcp { address: format!("127.0.0.1:{}", 21000 + id) },
            ),
            capacity: match limit {
                Some(n) => MaxSize::Limit(Size::new(n)),
                None => MaxSize::Unlimited,
            },
        }
    }

    #[test]
    fn distributes_with_imbalance_at_most_one_unit() {
        let candidates = vec![candidate(1, None), candidate(2, None), candidate(3, None)];
        let shares = distribute_as_equal_as_possible(Size::new(10), &candidates).unwrap();
        let sizes: Vec<u64> = shares.iter().map(|(_, _, s)| s.bytes()).collect();
        assert_eq!(sizes.iter().sum::<u64>(), 10);
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn construct_rejects_non_touching_ranges() {
        let a = UsedStorage {
            range: Range::new(Offset::ZERO, Size::new(10)),
            segment_id: SegmentId(1),
            storage_id: StorageId(1),
        };
        let b = UsedStorage {
            range: Range::new(Offset::new(20), Size::new(10)),
            segment_id: SegmentId(2),
            storage_id: StorageId(2),
        };
        assert!(UsedStorages::construct(vec![a, b]).is_err());
    }

    #[test]
    fn append_extends_range_exactly() {
        let a = UsedStorage {
            range: Range::new(Offset::ZERO, Size::new(10)),
            segment_id: SegmentId(1),
            storage_id: StorageId(1),
        };
        let mut placement = UsedStorages::construct(vec![a]).unwrap();
        assert_eq!(placement.range(), Range::new(Offset::ZERO, Size::new(10)));
        placement
            .append(UsedStorage {
                range: Range::new(Offset::new(10), Size::new(5)),
                segment_id: SegmentId(2),
                storage_id: StorageId(2),
            })
            .unwrap();
        assert_eq!(placement.range(), Range::new(Offset::ZERO, Size::new(15)));
    }

    #[test]
    fn append_rejects_non_touching_range() {
        let a = UsedStorage {
            range: Range::new(Offset::ZERO, Size::new(10)),
            segment_id: SegmentId(1),
            storage_id: StorageId(1),
        };
        let mut placement = UsedStorages::construct(vec![a]).unwrap();
        let err = placement
            .append(UsedStorage {
                range: Range::new(Offset::new(11), Size::new(5)),
                segment_id: SegmentId(2),
                storage_id: StorageId(2),
            })
            .unwrap_err();
        assert!(matches!(err, crate::Error::AppendRangesAreNotTouching { .. }));
    }

    #[test]
    fn emplace_duplicate_storage_id_fails() {
        let a = UsedStorage {
            range: Range::new(Offset::ZERO, Size::new(10)),
            segment_id: SegmentId(1),
            storage_id: StorageId(1),
        };
        let b = UsedStorage {
            range: Range::new(Offset::new(10), Size::new(10)),
            segment_id: SegmentId(2),
            storage_id: StorageId(1),
        };
        assert!(UsedStorages::construct(vec![a, b]).is_err());
    }
}
