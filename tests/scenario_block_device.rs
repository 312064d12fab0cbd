// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end scenario 1: six 32 MiB storages (three TCP, three local-stream)
// over a 4 KiB block device; block ranges, split/drop on remove, and a
// round trip through the local-stream SHMEM provider.

mod common;

use mcs::block_device::{BlockDeviceMetaData, BlockId, BlockRange, Connectable, Reader, Writer};
use mcs::domain::{MaxSize, Size};
use mcs::transport::client::TransportClient;

#[test]
fn six_storages_block_ranges_and_shmem_round_trip() {
    let block_size = Size::new(4096);
    let storage_size = Size::new(32 * 1024 * 1024);
    let md = BlockDeviceMetaData::new(block_size);

    let tcp = [
        common::spawn_tcp_provider(),
        common::spawn_tcp_provider(),
        common::spawn_tcp_provider(),
    ];
    let local = [
        common::spawn_local_stream_provider("bd-a"),
        common::spawn_local_stream_provider("bd-b"),
        common::spawn_local_stream_provider("bd-c"),
    ];

    let tcp_files_dir = tempfile::tempdir().unwrap();
    let local_files_dir = tempfile::tempdir().unwrap();

    let tcp_ids = [
        common::create_files_storage(&tcp[0].control, tcp_files_dir.path(), MaxSize::Limit(storage_size)),
        common::create_heap_storage(&tcp[1].control, MaxSize::Limit(storage_size)),
        common::create_shmem_storage(&tcp[2].control, "bd-tcp-shmem", MaxSize::Limit(storage_size)),
    ];
    let local_ids = [
        common::create_files_storage(&local[0].control, local_files_dir.path(), MaxSize::Limit(storage_size)),
        common::create_heap_storage(&local[1].control, MaxSize::Limit(storage_size)),
        common::create_shmem_storage(&local[2].control, "bd-local-shmem", MaxSize::Limit(storage_size)),
    ];

    for (provider, id) in tcp.iter().zip(tcp_ids) {
        let segment_id = common::create_segment(&provider.control, id, storage_size);
        md.add(Connectable::new(provider.control.clone(), provider.transport.clone()), id, segment_id, storage_size);
    }
    for (provider, id) in local.iter().zip(local_ids) {
        let segment_id = common::create_segment(&provider.control, id, storage_size);
        md.add(Connectable::new(provider.control.clone(), provider.transport.clone()), id, segment_id, storage_size);
    }

    let blocks = md.blocks();
    let total: u64 = blocks.iter().map(|r| r.len()).sum();
    assert_eq!(total, 49152);
    assert_eq!(blocks.first().unwrap().begin, BlockId(0));
    assert_eq!(blocks.last().unwrap().end, BlockId(49152));

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

    // Block 49494 sits in the last storage added (the local-stream SHMEM one).
    let transport_of = |connectable: &Connectable| TransportClient::connect(&connectable.transport).map(std::sync::Arc::new);
    let writer = Writer::new(&md, transport_of);
    let reader = Reader::new(&md, transport_of);

    let payload = vec![0xABu8; block_size.bytes() as usize];
    writer.write_block(BlockId(49494), &payload).unwrap();
    let mut out = vec![0u8; block_size.bytes() as usize];
    let n = reader.read_block(BlockId(49494), &mut out).unwrap();
    assert_eq!(n, block_size.bytes());
    assert_eq!(out, payload);
}
