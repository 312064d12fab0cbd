// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end scenario 4: `{number_of_buffers = 1, max_transfer_size = N/2,
// max_streams = 1}` — a write and a read of N bytes must still succeed,
// each split into exactly two sub-transfers through the single slot.

mod common;

use mcs::collection::engine::{CollectionEngine, EngineConfig};
use mcs::collection::PlacementCandidate;
use mcs::domain::{MaxSize, Offset, Size};
use mcs::metadata::InMemoryMetaData;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn indirect_transfer_splits_across_two_sub_transfers_through_one_slot() {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = vec![PlacementCandidate {
        storage_id,
        connectable: mcs::block_device::Connectable::new(provider.control.clone(), provider.transport.clone()),
        capacity: MaxSize::Unlimited,
    }];

    let n: usize = 256 * 1024;
    assert_eq!(n % 2, 0);
    let config = EngineConfig {
        maximum_transfer_size: n / 2,
        maximum_number_of_parallel_streams: 1,
        number_of_communication_buffers: 1,
        acquire_buffer_timeout: Duration::from_secs(5),
    };
    let engine = CollectionEngine::new(Arc::new(InMemoryMetaData::new()), config);

    let uuid = "scenario-4";
    engine
        .collection_open(uuid, MaxSize::Limit(Size::new(n as u64)), Size::new(n as u64), &candidates)
        .unwrap();

    // A plain heap-allocated Vec is never registered as an MCS shared
    // buffer, so this request classifies as indirect and must pass through
    // the single communication-buffer slot twice.
    let payload: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
    let written = engine.write(uuid, Offset::ZERO, &payload, &candidates).unwrap();
    assert_eq!(written, n as u64);

    let mut out = vec![0u8; n];
    let read = engine.read(uuid, Offset::ZERO, &mut out).unwrap();
    assert_eq!(read, n as u64);
    assert_eq!(out, payload);
}

#[test]
fn zero_buffers_makes_any_indirect_transfer_time_out() {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = vec![PlacementCandidate {
        storage_id,
        connectable: mcs::block_device::Connectable::new(provider.control.clone(), provider.transport.clone()),
        capacity: MaxSize::Unlimited,
    }];

    let config = EngineConfig {
        maximum_transfer_size: 4096,
        maximum_number_of_parallel_streams: 4,
        number_of_communication_buffers: 0,
        acquire_buffer_timeout: Duration::from_millis(20),
    };
    let engine = CollectionEngine::new(Arc::new(InMemoryMetaData::new()), config);

    let uuid = "scenario-4-zero-buffers";
    engine.collection_open(uuid, MaxSize::Unlimited, Size::new(16), &candidates).unwrap();

    let err = engine.write(uuid, Offset::ZERO, &[1, 2, 3, 4], &candidates).unwrap_err();
    assert!(matches!(err, mcs::Error::BitmapSetTimeout));
}
