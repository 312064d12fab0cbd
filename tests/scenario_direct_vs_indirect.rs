// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end scenario 5: an MCS-allocated buffer (direct transfer) and a
// plain heap buffer (indirect transfer) must be interchangeable on either
// side of a write/read pair.

mod common;

use mcs::collection::engine::{CollectionEngine, EngineConfig};
use mcs::collection::PlacementCandidate;
use mcs::domain::{MaxSize, Offset, Size};
use mcs::metadata::InMemoryMetaData;
use std::sync::Arc;

fn new_engine_with_candidate() -> (CollectionEngine, Vec<PlacementCandidate>) {
    let provider = common::spawn_tcp_provider();
    let storage_id = common::create_heap_storage(&provider.control, MaxSize::Unlimited);
    let candidates = vec![PlacementCandidate {
        storage_id,
        connectable: mcs::block_device::Connectable::new(provider.control.clone(), provider.transport.clone()),
        capacity: MaxSize::Unlimited,
    }];
    let engine = CollectionEngine::new(Arc::new(InMemoryMetaData::new()), EngineConfig::default());
    (engine, candidates)
}

const S: usize = 4096;

#[test]
fn mcs_buffer_write_then_plain_buffer_read() {
    let (engine, candidates) = new_engine_with_candidate();
    let uuid = "scenario-5-a";
    engine.collection_open(uuid, MaxSize::Limit(Size::new(S as u64)), Size::new(S as u64), &candidates).unwrap();

    let mut source = engine.shared_buffers().allocate(S);
    for (i, b) in source.as_mut_slice().iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    engine.write(uuid, Offset::ZERO, source.as_slice(), &candidates).unwrap();
    engine.shared_buffers().free(&source).unwrap();

    let mut plain = vec![0u8; S];
    engine.read(uuid, Offset::ZERO, &mut plain).unwrap();
    assert_eq!(plain, (0..S).map(|i| (i % 256) as u8).collect::<Vec<u8>>());
}

#[test]
fn plain_buffer_write_then_mcs_buffer_read() {
    let (engine, candidates) = new_engine_with_candidate();
    let uuid = "scenario-5-b";
    engine.collection_open(uuid, MaxSize::Limit(Size::new(S as u64)), Size::new(S as u64), &candidates).unwrap();

    let plain: Vec<u8> = (0..S).map(|i| ((i * 7) % 256) as u8).collect();
    engine.write(uuid, Offset::ZERO, &plain, &candidates).unwrap();

    let mut destination = engine.shared_buffers().allocate(S);
    engine.read(uuid, Offset::ZERO, destination.as_mut_slice()).unwrap();
    assert_eq!(destination.as_slice(), plain.as_slice());
    engine.shared_buffers().free(&destination).unwrap();
}

#[test]
fn mcs_buffer_write_then_mcs_buffer_read() {
    let (engine, candidates) = new_engine_with_candidate();
    let uuid = "scenario-5-c";
    engine.collection_open(uuid, MaxSize::Limit(Size::new(S as u64)), Size::new(S as u64), &candidates).unwrap();

    let mut source = engine.shared_buffers().allocate(S);
    for (i, b) in source.as_mut_slice().iter_mut().enumerate() {
        *b = ((i * 13) % 256) as u8;
    }
    engine.write(uuid, Offset::ZERO, source.as_slice(), &candidates).unwrap();

    let mut destination = engine.shared_buffers().allocate(S);
    engine.read(uuid, Offset::ZERO, destination.as_mut_slice()).unwrap();
    assert_eq!(destination.as_slice(), source.as_slice());

    engine.shared_buffers().free(&source).unwrap();
    engine.shared_buffers().free(&destination).unwrap();
}
