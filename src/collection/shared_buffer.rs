// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-local registry of MCS-allocated shared buffers (spec.md §4.5.4).
// `allocate` hands out an owned span and records its address range;
// `containing_shared_buffer` answers whether a caller-supplied span is
// entirely inside one registered buffer, entirely outside all of them, or
// partially overlapping one (the `Unsupported` case the engine rejects).

use std::collections::BTreeMap;
use std::sync::RwLock;

/// An MCS-owned, heap-backed byte span returned by `allocate`. Used by
/// direct-transfer callers as a zero-copy source/destination buffer.
pub struct SharedBuffer {
    data: Box<[u8]>,
}

impl SharedBuffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }
}

/// Whether a caller-supplied span relates to the registry's buffers as
/// direct (fully inside one), indirect (fully outside all of them), or
/// unsupported (partially overlapping one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClassification {
    Direct { buffer_begin: usize, offset_in_buffer: usize },
    Indirect,
}

/// Shared mutex: reads (lookups) take shared locks, writes (allocate/free)
/// take exclusive locks, mirroring spec.md §5's shared-resource policy.
#[derive(Default)]
pub struct SharedBufferRegistry {
    entries: RwLock<BTreeMap<usize, usize>>,
}

impl SharedBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, size: usize) -> SharedBuffer {
        let buffer = SharedBuffer::new(size);
        if size > 0 {
            self.entries.write().unwrap().insert(buffer.address(), size);
        }
        buffer
    }

    /// Removes `buffer`'s registration. Double-free (an address not
    /// currently registered) is an error.
    pub fn free(&self, buffer: &SharedBuffer) -> crate::Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write().unwrap();
        match entries.remove(&buffer.address()) {
            Some(_) => Ok(()),
            None => Err(crate::Error::DoubleFree),
        }
    }

    /// Classifies a caller span `[begin, begin+len)`. `lower_bound` narrows
    /// the search to the one registered buffer that could fully contain the
    /// span (the largest registered begin address `<= begin`); if that
    /// buffer only partially overlaps the span, or any other buffer
    /// overlaps it at all, the request is `Unsupported`.
    pub fn classify(&self, begin: usize, len: usize) -> crate::Result<BufferClassification> {
        if len == 0 {
            return Ok(BufferClassification::Indirect);
        }
        let entries = self.entries.read().unwrap();
        let end = begin + len;

        if let Some((&buffer_begin, &buffer_len)) = entries.range(..=begin).next_back() {
            let buffer_end = buffer_begin + buffer_len;
            if begin >= buffer_begin && end <= buffer_end {
                return Ok(BufferClassification::Direct {
                    buffer_begin,
                    offset_in_buffer: begin - buffer_begin,
                });
            }
            if begin < buffer_end {
                return Err(crate::Error::Unsupported);
            }
        }

        // No buffer starting at or before `begin` fully contains the span;
        // any buffer starting inside `[begin, end)` is a partial overlap.
        if entries.range(begin..end).next().is_some() {
            return Err(crate::Error::Unsupported);
        }
        Ok(BufferClassification::Indirect)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_span_classifies_as_direct() {
        let registry = SharedBufferRegistry::new();
        let buffer = registry.allocate(64);
        let classification = registry.classify(buffer.address() + 4, 8).unwrap();
        assert!(matches!(classification, BufferClassification::Direct { .. }));
    }

    #[test]
    fn unregistered_span_classifies_as_indirect() {
        let registry = SharedBufferRegistry::new();
        let classification = registry.classify(0x1000, 16).unwrap();
        assert!(matches!(classification, BufferClassification::Indirect));
    }

    #[test]
    fn double_free_is_an_error() {
        let registry = SharedBufferRegistry::new();
        let buffer = registry.allocate(16);
        registry.free(&buffer).unwrap();
        assert!(matches!(registry.free(&buffer), Err(crate::Error::DoubleFree)));
    }

    #[test]
    fn zero_length_span_is_indirect_even_inside_a_buffer() {
        let registry = SharedBufferRegistry::new();
        let buffer = registry.allocate(16);
        let classification = registry.classify(buffer.address(), 0).unwrap();
        assert!(matches!(classification, BufferClassification::Indirect));
    }
}
