// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Storages registry: a per-process heterogeneous map keyed by StorageId.
// Per spec.md §9's design note, the map is an arena (vector) of tagged-
// variant storage instances keyed by a dense id, with removal marking the
// slot reusable; read/write access tokens are borrow-checker-enforced
// references into the arena (a shared borrow for readers, an exclusive
// borrow for writers).

use crate::domain::{ChunkAccess, Range, SegmentId, StorageId};
use crate::segment::{Chunk, ChunkDescription};
use crate::storage::StorageInstance;
use crate::RwLock;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps the shared [`RwLock`] primitive with the writer-priority convention
/// spec.md §5 requires: an atomic waiting-writer counter that readers
/// spin-yield on before acquiring their shared lock, so writers cannot
/// starve under steady read load.
struct PriorityRwLock {
    inner: RwLock,
    waiting_writers: AtomicUsize,
}

impl PriorityRwLock {
    fn new() -> Self {
        Self {
            inner: RwLock::new(),
            waiting_writers: AtomicUsize::new(0),
        }
    }

    fn lock_shared(&self) {
        loop {
            while self.waiting_writers.load(Ordering::Acquire) > 0 {
                std::thread::yield_now();
            }
            self.inner.lock_shared();
            if self.waiting_writers.load(Ordering::Acquire) == 0 {
                return;
            }
            // A writer announced itself while we were acquiring; back off
            // and let it go first.
            self.inner.unlock_shared();
        }
    }

    fn unlock_shared(&self) {
        self.inner.unlock_shared();
    }

    fn lock(&self) {
        self.waiting_writers.fetch_add(1, Ordering::AcqRel);
        self.inner.lock();
        self.waiting_writers.fetch_sub(1, Ordering::AcqRel);
    }

    fn unlock(&self) {
        self.inner.unlock();
    }
}

enum Slot {
    Occupied(StorageInstance),
    Free,
}

/// The registry itself. Every entry already carries its own internal
/// synchronization (each `StorageInstance` guards its mutable state with
/// its own mutexes), so a shared read-access token only needs to protect
/// the arena's *shape* (which ids exist), not the entries' contents.
pub struct Registry {
    lock: PriorityRwLock,
    arena: UnsafeCell<Vec<Slot>>,
}

// SAFETY: all mutation of `arena`'s shape happens under `lock`'s exclusive
// mode; all entries stored in it are themselves `Send + Sync`.
unsafe impl Send for Registry {}
unsafe impl Sync for Registry {}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            lock: PriorityRwLock::new(),
            arena: UnsafeCell::new(Vec::new()),
        }
    }

    pub fn read(&self) -> ReadAccess<'_> {
        self.lock.lock_shared();
        ReadAccess { registry: self }
    }

    pub fn write(&self) -> WriteAccess<'_> {
        self.lock.lock();
        WriteAccess { registry: self }
    }

    /// Dispatches `chunk_description<Impl, Access>` for the storage `id`
    /// names, after checking `access.belongs_to(self)`.
    pub fn chunk_description(
        &self,
        access: &ReadAccess<'_>,
        id: StorageId,
        access_mode: ChunkAccess,
        segment_id: SegmentId,
        range: Range,
    ) -> crate::Result<ChunkDescription> {
        access.check_origin(self)?;
        access.get(id)?.chunk_description(access_mode, segment_id, range)
    }
}

/// A shared read-access token. Multiple may be outstanding concurrently.
pub struct ReadAccess<'a> {
    registry: &'a Registry,
}

impl<'a> ReadAccess<'a> {
    fn check_origin(&self, registry: &Registry) -> crate::Result<()> {
        if std::ptr::eq(self.registry, registry) {
            Ok(())
        } else {
            Err(crate::Error::AccessTokenDoesNotBelongToThis)
        }
    }

    pub fn get(&self, id: StorageId) -> crate::Result<&'a StorageInstance> {
        let arena = unsafe { &*self.registry.arena.get() };
        match arena.get(id.0 as usize) {
            Some(Slot::Occupied(instance)) => Ok(instance),
            _ => Err(crate::Error::UnknownId(id)),
        }
    }

    pub fn acquire_chunk(
        &self,
        id: StorageId,
        access: ChunkAccess,
        segment_id: SegmentId,
        range: Range,
    ) -> crate::Result<Chunk> {
        self.get(id)?.acquire_chunk(access, segment_id, range)
    }
}

impl Drop for ReadAccess<'_> {
    fn drop(&mut self) {
        self.registry.lock.unlock_shared();
    }
}

/// An exclusive write-access token. Only one may be outstanding at a time,
/// and it excludes all readers.
pub struct WriteAccess<'a> {
    registry: &'a Registry,
}

impl<'a> WriteAccess<'a> {
    pub fn insert(&mut self, instance: StorageInstance) -> StorageId {
        let arena = unsafe { &mut *self.registry.arena.get() };
        for (idx, slot) in arena.iter_mut().enumerate() {
            if matches!(slot, Slot::Free) {
                *slot = Slot::Occupied(instance);
                return StorageId(idx as u64);
            }
        }
        arena.push(Slot::Occupied(instance));
        StorageId((arena.len() - 1) as u64)
    }

    pub fn remove(&mut self, id: StorageId) -> crate::Result<StorageInstance> {
        let arena = unsafe { &mut *self.registry.arena.get() };
        match arena.get_mut(id.0 as usize) {
            Some(slot @ Slot::Occupied(_)) => {
                let taken = std::mem::replace(slot, Slot::Free);
                match taken {
                    Slot::Occupied(instance) => Ok(instance),
                    Slot::Free => unreachable!(),
                }
            }
            _ => Err(crate::Error::UnknownId(id)),
        }
    }

    pub fn get(&self, id: StorageId) -> crate::Result<&StorageInstance> {
        let arena = unsafe { &*self.registry.arena.get() };
        match arena.get(id.0 as usize) {
            Some(Slot::Occupied(instance)) => Ok(instance),
            _ => Err(crate::Error::UnknownId(id)),
        }
    }
}

impl Drop for WriteAccess<'_> {
    fn drop(&mut self) {
        self.registry.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MaxSize, Size};
    use crate::storage::heap::HeapStorage;

    #[test]
    fn insert_then_read_round_trips() {
        let registry = Registry::new();
        let id = {
            let mut w = registry.write();
            w.insert(StorageInstance::Heap(HeapStorage::new(MaxSize::Unlimited)))
        };
        let r = registry.read();
        assert!(r.get(id).is_ok());
        assert_eq!(r.get(id).unwrap().size_used(), Size::ZERO);
    }

    #[test]
    fn unknown_id_fails() {
        let registry = Registry::new();
        let r = registry.read();
        assert!(matches!(r.get(StorageId(42)), Err(crate::Error::UnknownId(_))));
    }

    #[test]
    fn removed_slot_is_reused() {
        let registry = Registry::new();
        let id_a = {
            let mut w = registry.write();
            w.insert(StorageInstance::Heap(HeapStorage::new(MaxSize::Unlimited)))
        };
        {
            let mut w = registry.write();
            w.remove(id_a).unwrap();
        }
        let id_b = {
            let mut w = registry.write();
            w.insert(StorageInstance::Heap(HeapStorage::new(MaxSize::Unlimited)))
        };
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn token_from_other_registry_is_rejected() {
        let a = Registry::new();
        let b = Registry::new();
        let id = {
            let mut w = a.write();
            w.insert(StorageInstance::Heap(HeapStorage::new(MaxSize::Unlimited)))
        };
        let token_from_b = b.read();
        let err = a
            .chunk_description(
                &token_from_b,
                id,
                ChunkAccess::Const,
                SegmentId(1),
                Range::new(crate::domain::Offset::ZERO, Size::ZERO),
            )
            .unwrap_err();
        assert!(matches!(err, crate::Error::AccessTokenDoesNotBelongToThis));
    }
}
