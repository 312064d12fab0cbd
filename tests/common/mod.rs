// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared plumbing for the end-to-end scenario tests: spinning up a live
// control+transport provider pair and issuing `storage_create` over the
// wire, the way a real node bootstrap would.

use mcs::config::Endpoint;
use mcs::domain::{MaxSize, StorageId, StorageImplementationId};
use mcs::registry::Registry;
use mcs::transport::client::ControlClient;
use mcs::transport::server::{run_control_provider, run_transport_provider};
use mcs::transport::wire::{write_string, write_u64, ControlCommand};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_PORT: AtomicU16 = AtomicU16::new(30000);

pub fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

pub struct Provider {
    pub control: Endpoint,
    pub transport: Endpoint,
}

/// Spawns a control+transport provider pair over TCP, backed by a fresh
/// registry, and blocks until both listeners are accepting connections.
pub fn spawn_tcp_provider() -> Provider {
    let registry = Arc::new(Registry::new());
    let control = Endpoint::Tcp { address: format!("127.0.0.1:{}", next_port()) };
    let transport = Endpoint::Tcp { address: format!("127.0.0.1:{}", next_port()) };

    let control_clone = control.clone();
    let control_registry = registry.clone();
    std::thread::spawn(move || run_control_provider(&control_clone, control_registry).unwrap());
    let transport_clone = transport.clone();
    let transport_registry = registry.clone();
    std::thread::spawn(move || run_transport_provider(&transport_clone, transport_registry).unwrap());
    std::thread::sleep(Duration::from_millis(50));

    Provider { control, transport }
}

/// Spawns a control+transport provider pair over local-stream (UNIX domain)
/// sockets, at a fresh path under `std::env::temp_dir()`.
pub fn spawn_local_stream_provider(tag: &str) -> Provider {
    let registry = Arc::new(Registry::new());
    let dir = std::env::temp_dir();
    let control = Endpoint::LocalStream { path: dir.join(format!("mcs-test-{tag}-control.sock")) };
    let transport = Endpoint::LocalStream { path: dir.join(format!("mcs-test-{tag}-transport.sock")) };

    let control_clone = control.clone();
    let control_registry = registry.clone();
    std::thread::spawn(move || run_control_provider(&control_clone, control_registry).unwrap());
    let transport_clone = transport.clone();
    let transport_registry = registry.clone();
    std::thread::spawn(move || run_transport_provider(&transport_clone, transport_registry).unwrap());
    std::thread::sleep(Duration::from_millis(50));

    Provider { control, transport }
}

/// Issues `storage_create` for a Heap storage over `control`, returning the
/// assigned `StorageId`.
pub fn create_heap_storage(control: &Endpoint, max: MaxSize) -> StorageId {
    let client = ControlClient::connect(control).unwrap();
    let mut parameter = Vec::new();
    encode_max(&mut parameter, max);
    let response = client
        .call(ControlCommand::StorageCreate {
            implementation: StorageImplementationId::Heap,
            parameter,
        })
        .unwrap();
    StorageId(u64::from_le_bytes(response.try_into().unwrap()))
}

/// Issues `storage_create` for a SHMEM storage over `control`.
pub fn create_shmem_storage(control: &Endpoint, prefix: &str, max: MaxSize) -> StorageId {
    let client = ControlClient::connect(control).unwrap();
    let mut parameter = Vec::new();
    encode_max(&mut parameter, max);
    write_string(&mut parameter, prefix).unwrap();
    let response = client
        .call(ControlCommand::StorageCreate {
            implementation: StorageImplementationId::Shmem,
            parameter,
        })
        .unwrap();
    StorageId(u64::from_le_bytes(response.try_into().unwrap()))
}

/// Issues `storage_create` for a Files storage rooted at `directory`.
pub fn create_files_storage(control: &Endpoint, directory: &std::path::Path, max: MaxSize) -> StorageId {
    let client = ControlClient::connect(control).unwrap();
    let mut parameter = Vec::new();
    encode_max(&mut parameter, max);
    write_string(&mut parameter, &directory.display().to_string()).unwrap();
    let response = client
        .call(ControlCommand::StorageCreate {
            implementation: StorageImplementationId::Files,
            parameter,
        })
        .unwrap();
    StorageId(u64::from_le_bytes(response.try_into().unwrap()))
}

/// Issues `segment_create` for `storage_id` over `control`, returning the
/// assigned `SegmentId`.
pub fn create_segment(control: &Endpoint, storage_id: StorageId, size: mcs::domain::Size) -> mcs::domain::SegmentId {
    let client = ControlClient::connect(control).unwrap();
    let response = client.call(ControlCommand::SegmentCreate { storage_id, size }).unwrap();
    mcs::domain::SegmentId(u64::from_le_bytes(response.try_into().unwrap()))
}

fn encode_max(buf: &mut Vec<u8>, max: MaxSize) {
    match max {
        MaxSize::Unlimited => write_u64(buf, 0).unwrap(),
        MaxSize::Limit(s) => {
            write_u64(buf, 1).unwrap();
            write_u64(buf, s.bytes()).unwrap();
        }
    }
}
