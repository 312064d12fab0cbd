// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Concurrency testable property: M producers and M consumers sharing one
// single-segment Heap-backed collection, each producer writing 16 MiB into
// its own slot and each consumer reading its slot back, round-robin by task
// id. Total bytes transferred must equal `M * 2 * 16 MiB` and every
// consumer must observe the value its producer wrote.

mod common;

use mcs::collection::engine::{CollectionEngine, EngineConfig};
use mcs::collection::PlacementCandidate;
use mcs::domain::{MaxSize, Offset, Size};
use mcs::metadata::InMemoryMetaData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const M: usize = 4;
const SLOT: usize = 16 * 1024 * 1024;

#[test]
fn producers_and_consumers_round_robin_over_slots() {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = vec![PlacementCandidate {
        storage_id,
        connectable: mcs::block_device::Connectable::new(provider.control.clone(), provider.transport.clone()),
        capacity: MaxSize::Unlimited,
    }];

    let engine = Arc::new(CollectionEngine::new(Arc::new(InMemoryMetaData::new()), EngineConfig::default()));
    let uuid = "concurrency-scenario";
    let total_size = Size::new((M * SLOT) as u64);
    engine.collection_open(uuid, MaxSize::Limit(total_size), total_size, &candidates).unwrap();

    let slot_ready: Arc<Vec<AtomicBool>> = Arc::new((0..M).map(|_| AtomicBool::new(false)).collect());
    let bytes_transferred = Arc::new(AtomicU64::new(0));

    let mut producers = Vec::new();
    for task_id in 0..M {
        let engine = engine.clone();
        let candidates = candidates.clone();
        let slot_ready = slot_ready.clone();
        let bytes_transferred = bytes_transferred.clone();
        producers.push(std::thread::spawn(move || {
            let payload = vec![task_id as u8; SLOT];
            let offset = Offset::new((task_id * SLOT) as i64);
            let written = engine.write(uuid, offset, &payload, &candidates).unwrap();
            bytes_transferred.fetch_add(written, Ordering::AcqRel);
            slot_ready[task_id].store(true, Ordering::Release);
        }));
    }

    let mut consumers = Vec::new();
    for task_id in 0..M {
        let engine = engine.clone();
        let slot_ready = slot_ready.clone();
        let bytes_transferred = bytes_transferred.clone();
        consumers.push(std::thread::spawn(move || {
            while !slot_ready[task_id].load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            let offset = Offset::new((task_id * SLOT) as i64);
            let mut out = vec![0u8; SLOT];
            let read = engine.read(uuid, offset, &mut out).unwrap();
            bytes_transferred.fetch_add(read, Ordering::AcqRel);
            assert!(out.iter().all(|&b| b == task_id as u8), "consumer {task_id} observed a foreign value");
        }));
    }

    for p in producers {
        p.join().unwrap();
    }
    for c in consumers {
        c.join().unwrap();
    }

    assert_eq!(bytes_transferred.load(Ordering::Acquire), (M * 2 * SLOT) as u64);
}
