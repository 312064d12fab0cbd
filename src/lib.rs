// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// MCS — a memory-centric storage substrate. Aggregates heap, POSIX shared
// memory, file-backed, and externally-provided C-ABI stores behind a
// uniform RPC surface and composes them into block devices and distributed,
// growable byte collections.
//
// Layering (bottom to top): storage implementations -> storages registry ->
// control/transport RPC -> block device -> collection engine. See
// SPEC_FULL.md for the full module map.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod waiter;
pub use waiter::Waiter;

mod spin_lock;
pub use spin_lock::SpinLock;

mod rw_lock;
pub use rw_lock::RwLock;

mod scoped_access;
pub use scoped_access::ScopedAccess;

pub mod error;
pub use error::{Error, Result};

pub mod domain;

pub mod config;

pub mod metadata;

pub mod segment;

pub mod storage;

pub mod registry;

pub mod transport;

pub mod block_device;

pub mod collection;
