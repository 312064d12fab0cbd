// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The indirect-transfer communication buffer: a single process-owned,
// Heap-backed segment carved into equal slots, gated by a bitmap (spec.md
// §4.5.3, §5). Slot acquisition is bounded by `SpinLock`'s adaptive
// backoff (busy-spin -> pause -> yield -> 1ms sleep) the same way the
// teacher's other locks back off, with an explicit millisecond deadline.

use crate::SpinLock;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore bounding concurrent in-flight sub-transfers
/// (`maximum_number_of_parallel_streams`).
pub struct CountingSemaphore {
    state: Mutex<usize>,
    available: Condvar,
    capacity: usize,
}

impl CountingSemaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(capacity),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires one permit, failing with `Timeout` if `deadline` passes
    /// first.
    pub fn acquire_timeout(&self, timeout: Duration) -> crate::Result<SemaphorePermit<'_>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        loop {
            if *guard > 0 {
                *guard -= 1;
                return Ok(SemaphorePermit { semaphore: self });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(crate::Error::Timeout);
            }
            let (next_guard, result) = self.available.wait_timeout(guard, deadline - now).unwrap();
            guard = next_guard;
            if result.timed_out() && *guard == 0 {
                return Err(crate::Error::Timeout);
            }
        }
    }

    fn release(&self) {
        let mut guard = self.state.lock().unwrap();
        *guard += 1;
        self.available.notify_one();
    }
}

pub struct SemaphorePermit<'a> {
    semaphore: &'a CountingSemaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Fixed-size communication buffer carved into `number_of_buffers` equal
/// slots of `slot_size` bytes. Acquiring a slot sets a bit, releasing
/// clears it; each slot is owned by at most one in-flight sub-transfer.
pub struct CommunicationBuffer {
    storage: Mutex<Box<[u8]>>,
    occupied: SpinLock,
    bits: Mutex<Vec<bool>>,
    slot_size: usize,
    num_slots: usize,
}

impl CommunicationBuffer {
    pub fn new(number_of_buffers: usize, maximum_transfer_size: usize) -> Self {
        Self {
            storage: Mutex::new(vec![0u8; number_of_buffers * maximum_transfer_size].into_boxed_slice()),
            occupied: SpinLock::new(),
            bits: Mutex::new(vec![false; number_of_buffers]),
            slot_size: maximum_transfer_size,
            num_slots: number_of_buffers,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Acquires a free slot, polling with [`SpinLock`]'s adaptive backoff
    /// until `timeout` elapses, at which point it fails with
    /// `BitmapSetTimeout`. With `number_of_buffers == 0` this always times
    /// out immediately (spec.md §8 testable property).
    pub fn acquire_slot(&self, timeout: Duration) -> crate::Result<SlotGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut k = 0u32;
        loop {
            self.occupied.lock();
            let found = {
                let mut bits = self.bits.lock().unwrap();
                bits.iter().position(|set| !set).map(|idx| {
                    bits[idx] = true;
                    idx
                })
            };
            self.occupied.unlock();
            if let Some(index) = found {
                return Ok(SlotGuard { buffer: self, index });
            }
            if Instant::now() >= deadline {
                return Err(crate::Error::BitmapSetTimeout);
            }
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
    }
}

/// A scoped slot acquisition: releases (clears its bit) on every exit path.
pub struct SlotGuard<'a> {
    buffer: &'a CommunicationBuffer,
    index: usize,
}

impl SlotGuard<'_> {
    fn range(&self) -> std::ops::Range<usize> {
        let begin = self.index * self.buffer.slot_size;
        begin..begin + self.buffer.slot_size
    }

    pub fn copy_in(&self, data: &[u8]) {
        let mut storage = self.buffer.storage.lock().unwrap();
        let range = self.range();
        storage[range.start..range.start + data.len()].copy_from_slice(data);
    }

    pub fn copy_out(&self, out: &mut [u8]) {
        let storage = self.buffer.storage.lock().unwrap();
        let range = self.range();
        out.copy_from_slice(&storage[range.start..range.start + out.len()]);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.buffer.occupied.lock();
        self.buffer.bits.lock().unwrap()[self.index] = false;
        self.buffer.occupied.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_frees_the_slot() {
        let buffer = CommunicationBuffer::new(1, 16);
        let guard = buffer.acquire_slot(Duration::from_millis(50)).unwrap();
        drop(guard);
        assert!(buffer.acquire_slot(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn zero_buffers_always_times_out() {
        let buffer = CommunicationBuffer::new(0, 16);
        let err = buffer.acquire_slot(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, crate::Error::BitmapSetTimeout));
    }

    #[test]
    fn copy_in_then_copy_out_round_trips() {
        let buffer = CommunicationBuffer::new(1, 16);
        let guard = buffer.acquire_slot(Duration::from_millis(50)).unwrap();
        guard.copy_in(b"hello world12345");
        let mut out = [0u8; 16];
        guard.copy_out(&mut out);
        assert_eq!(&out, b"hello world12345");
    }

    #[test]
    fn semaphore_bounds_concurrent_permits() {
        let sem = CountingSemaphore::new(1);
        let first = sem.acquire_timeout(Duration::from_millis(50)).unwrap();
        let err = sem.acquire_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, crate::Error::Timeout));
        drop(first);
        assert!(sem.acquire_timeout(Duration::from_millis(50)).is_ok());
    }
}
