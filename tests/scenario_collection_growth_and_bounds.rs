// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end scenarios 2 and 3: an `Unlimited` collection growing under
// interleaved writes, and a `Limit`-bounded collection rejecting a write
// past its declared max size.

mod common;

use mcs::collection::engine::{CollectionEngine, EngineConfig};
use mcs::collection::PlacementCandidate;
use mcs::domain::{MaxSize, Offset, Size};
use mcs::metadata::{collection_size_key, InMemoryMetaData, MetaDataBackend};
use std::sync::Arc;

fn single_heap_candidate(provider: &common::Provider, storage_id: mcs::domain::StorageId) -> Vec<PlacementCandidate> {
    vec![PlacementCandidate {
        storage_id,
        connectable: mcs::block_device::Connectable::new(provider.control.clone(), provider.transport.clone()),
        capacity: MaxSize::Unlimited,
    }]
}

#[test]
fn collection_growth_with_interleaved_writes() {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = single_heap_candidate(&provider, storage_id);

    let metadata = Arc::new(InMemoryMetaData::new());
    let engine = CollectionEngine::new(metadata.clone(), EngineConfig::default());

    let uuid = "scenario-2";
    engine.collection_open(uuid, MaxSize::Unlimited, Size::ZERO, &candidates).unwrap();

    let one_mib = 1usize << 20;
    let block_a = vec![0xAAu8; one_mib];
    let block_b = vec![0xBBu8; one_mib];
    let block_c = vec![0xCCu8; one_mib];

    engine.write(uuid, Offset::ZERO, &block_a, &candidates).unwrap();
    engine.write(uuid, Offset::new(2 * one_mib as i64), &block_c, &candidates).unwrap();
    engine.write(uuid, Offset::new(one_mib as i64), &block_b, &candidates).unwrap();

    let mut out = vec![0u8; 3 * one_mib];
    let read = engine.read(uuid, Offset::ZERO, &mut out).unwrap();
    assert_eq!(read, 3 * one_mib as u64);

    let mut expected = Vec::with_capacity(3 * one_mib);
    expected.extend_from_slice(&block_a);
    expected.extend_from_slice(&block_b);
    expected.extend_from_slice(&block_c);
    assert_eq!(out, expected);

    let size_bytes = metadata.get(&collection_size_key(uuid)).unwrap().unwrap();
    let size_str = String::from_utf8(size_bytes).unwrap();
    assert_eq!(size_str.parse::<u64>().unwrap(), 3 * (1u64 << 20));
}

#[test]
fn write_past_declared_max_size_reports_max_and_collection_id() {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = single_heap_candidate(&provider, storage_id);

    let engine = CollectionEngine::new(Arc::new(InMemoryMetaData::new()), EngineConfig::default());
    let uuid = "scenario-3";
    let three_mib = Size::new(3 * (1u64 << 20));
    engine.collection_open(uuid, MaxSize::Limit(three_mib), three_mib, &candidates).unwrap();

    let err = engine.write(uuid, Offset::new(3 * (1i64 << 20)), &[0u8], &candidates).unwrap_err();
    assert!(err.to_string().contains("max size"));
    match err {
        mcs::Error::WriteAfterMaxSize { collection, max, .. } => {
            assert_eq!(collection, uuid);
            assert_eq!(max, three_mib);
        }
        other => panic!("expected WriteAfterMaxSize, got {other:?}"),
    }
}
