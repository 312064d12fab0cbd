// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The collection engine: the read/write request pipeline tying placement,
// the shared-buffer registry, and the transport clients together
// (spec.md §4.5.2, §4.5.3). A collection is named by a UUID string; its
// declared max size and current size live in the meta-data back-end, its
// physical placement (`UsedStorages`) lives in this engine's own memory
// for the lifetime of the process that opened it.

use crate::block_device::Connectable;
use crate::collection::comm_buffer::{CommunicationBuffer, CountingSemaphore};
use crate::collection::shared_buffer::{BufferClassification, SharedBufferRegistry};
use crate::collection::{distribute_as_equal_as_possible, PlacementCandidate, UsedStorage, UsedStorages};
use crate::config::Endpoint;
use crate::domain::{MaxSize, Offset, Range, SegmentId, Size, StorageId};
use crate::metadata::{collection_info_key, collection_size_key, CollectionInformation, MetaDataBackend};
use crate::transport::client::{ControlClient, TransportClient, TransportClientCache};
use crate::transport::wire::{ControlCommand, TransportAddress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tuning knobs that would otherwise be read from a provider's own
/// configuration (spec.md §4.5.3).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub maximum_transfer_size: usize,
    pub maximum_number_of_parallel_streams: usize,
    pub number_of_communication_buffers: usize,
    pub acquire_buffer_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maximum_transfer_size: 4 * 1024 * 1024,
            maximum_number_of_parallel_streams: 4,
            number_of_communication_buffers: 4,
            acquire_buffer_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Orchestrates collection placement and the read/write request pipeline.
/// One `CollectionEngine` corresponds to one client-visible MCS handle.
pub struct CollectionEngine {
    metadata: Arc<dyn MetaDataBackend>,
    config: EngineConfig,
    placements: Mutex<HashMap<String, UsedStorages>>,
    collection_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    control_clients: Mutex<HashMap<Endpoint, Arc<ControlClient>>>,
    transport_clients: TransportClientCache,
    shared_buffers: SharedBufferRegistry,
    comm_buffer: CommunicationBuffer,
    stream_semaphore: CountingSemaphore,
    /// Routing hint: which provider a storage id was created on. A full
    /// deployment would resolve this from the placement's own persisted
    /// record; this reference engine remembers it from the creating call.
    connectable_hints: Mutex<HashMap<StorageId, Connectable>>,
}

impl CollectionEngine {
    pub fn new(metadata: Arc<dyn MetaDataBackend>, config: EngineConfig) -> Self {
        Self {
            metadata,
            comm_buffer: CommunicationBuffer::new(config.number_of_communication_buffers, config.maximum_transfer_size),
            stream_semaphore: CountingSemaphore::new(config.maximum_number_of_parallel_streams),
            config,
            placements: Mutex::new(HashMap::new()),
            collection_locks: Mutex::new(HashMap::new()),
            control_clients: Mutex::new(HashMap::new()),
            transport_clients: TransportClientCache::new(),
            shared_buffers: SharedBufferRegistry::new(),
            connectable_hints: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared_buffers(&self) -> &SharedBufferRegistry {
        &self.shared_buffers
    }

    fn lock_for(&self, uuid: &str) -> Arc<Mutex<()>> {
        self.collection_locks
            .lock()
            .unwrap()
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn control_client_for(&self, endpoint: &Endpoint) -> crate::Result<Arc<ControlClient>> {
        let mut clients = self.control_clients.lock().unwrap();
        if let Some(existing) = clients.get(endpoint) {
            return Ok(existing.clone());
        }
        let client = Arc::new(ControlClient::connect(endpoint)?);
        clients.insert(endpoint.clone(), client.clone());
        Ok(client)
    }

    fn transport_client_for(&self, connectable: &Connectable) -> crate::Result<Arc<TransportClient>> {
        self.transport_clients.get_or_connect(&connectable.transport)
    }

    /// Creates a collection's placement across `candidates` and records its
    /// declared max size, or, if `uuid` already has a record, leaves the
    /// existing placement untouched. The real IOV back-end would also let a
    /// second process rediscover an existing collection's placement; this
    /// reference engine keeps `UsedStorages` in its own memory only, the
    /// same simplification `metadata::InMemoryMetaData` documents for the
    /// out-of-scope external database.
    pub fn collection_open(&self, uuid: &str, size_max: MaxSize, initial_size: Size, candidates: &[PlacementCandidate]) -> crate::Result<()> {
        let guard = self.lock_for(uuid);
        let _held = guard.lock().unwrap();

        if self.metadata.exists(&collection_info_key(uuid))? {
            return Ok(());
        }

        let shares = distribute_as_equal_as_possible(initial_size, candidates)?;
        let mut entries = Vec::with_capacity(shares.len());
        let mut cursor = Offset::ZERO;
        for (storage_id, connectable, size) in shares {
            let control = self.control_client_for(&connectable.control)?;
            let segment_id = create_segment(&control, storage_id, size)?;
            entries.push(UsedStorage {
                range: Range::new(cursor, size),
                segment_id,
                storage_id,
            });
            cursor = cursor + size;
            self.connectable_hints.lock().unwrap().insert(storage_id, connectable);
        }
        let placement = UsedStorages::construct(entries)?;
        self.placements.lock().unwrap().insert(uuid.to_string(), placement);

        let info = toml::to_string(&CollectionInformation { size_max: size_max.limit() }).map_err(|e| crate::Error::MetaData(e.to_string()))?;
        self.metadata.put(&collection_info_key(uuid), info.into_bytes())?;
        self.metadata.put(&collection_size_key(uuid), initial_size.bytes().to_string().into_bytes())?;
        Ok(())
    }

    /// Destroys every physical segment backing `uuid`, then removes its
    /// meta-data. If a segment fails to destroy, the remaining segments are
    /// still attempted (best effort) and the first error is returned
    /// without removing the meta-data keys — per this engine's handling of
    /// the "delete fails after partial destruction" case, the collection is
    /// left visible as existing but undeletable rather than silently
    /// forgotten, and the caller is expected to retry the delete itself.
    pub fn collection_delete(&self, uuid: &str) -> crate::Result<()> {
        let guard = self.lock_for(uuid);
        let _held = guard.lock().unwrap();

        let placement = self
            .placements
            .lock()
            .unwrap()
            .remove(uuid)
            .ok_or_else(|| crate::Error::CollectionDoesNotExist(uuid.to_string()))?;

        let mut first_error = None;
        for entry in placement.entries() {
            if let Some(connectable) = self.connectable_hints.lock().unwrap().get(&entry.storage_id).cloned() {
                if let Err(e) = self
                    .control_client_for(&connectable.control)
                    .and_then(|control| remove_segment(&control, entry.storage_id, entry.segment_id))
                {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(err) = first_error {
            self.placements.lock().unwrap().insert(uuid.to_string(), placement);
            return Err(err);
        }

        self.metadata.remove(&collection_size_key(uuid))?;
        self.metadata.remove(&collection_info_key(uuid))?;
        Ok(())
    }

    fn current_size(&self, uuid: &str) -> crate::Result<(Size, MaxSize)> {
        let info_bytes = self
            .metadata
            .get(&collection_info_key(uuid))?
            .ok_or_else(|| crate::Error::CollectionDoesNotExist(uuid.to_string()))?;
        let info_str = String::from_utf8(info_bytes).map_err(|e| crate::Error::MetaData(e.to_string()))?;
        let info: CollectionInformation = toml::from_str(&info_str).map_err(|e| crate::Error::MetaData(e.to_string()))?;
        let size_bytes = self
            .metadata
            .get(&collection_size_key(uuid))?
            .ok_or_else(|| crate::Error::CollectionDoesNotExist(uuid.to_string()))?;
        let size_str = String::from_utf8(size_bytes).map_err(|e| crate::Error::MetaData(e.to_string()))?;
        let size = Size::new(size_str.parse().map_err(|e: std::num::ParseIntError| crate::Error::MetaData(e.to_string()))?);
        let max = info.size_max.map(MaxSize::Limit).unwrap_or(MaxSize::Unlimited);
        Ok((size, max))
    }

    /// Grows a collection with `size_max == Unlimited` so that it covers
    /// `required_end`, placing the new capacity across `candidates` with
    /// the same `AsEqualAsPossible` policy used at creation, then recording
    /// only the new `size` in the meta-data (the declared `size_max` never
    /// changes here, matching how a growable collection has none to
    /// re-validate).
    pub fn collection_append(&self, uuid: &str, required_end: Size, candidates: &[PlacementCandidate]) -> crate::Result<()> {
        let guard = self.lock_for(uuid);
        let _held = guard.lock().unwrap();

        let (current, _max) = self.current_size(uuid)?;
        if required_end <= current {
            return Ok(());
        }
        let growth = required_end - current;
        let shares = distribute_as_equal_as_possible(growth, candidates)?;

        let mut placements = self.placements.lock().unwrap();
        let placement = placements.get_mut(uuid).ok_or_else(|| crate::Error::CollectionDoesNotExist(uuid.to_string()))?;
        let mut cursor = placement.range().end();
        let mut new_entries = Vec::with_capacity(shares.len());
        for (storage_id, connectable, size) in shares {
            let control = self.control_client_for(&connectable.control)?;
            let segment_id = create_segment(&control, storage_id, size)?;
            new_entries.push(UsedStorage {
                range: Range::new(cursor, size),
                segment_id,
                storage_id,
            });
            cursor = cursor + size;
            self.connectable_hints.lock().unwrap().insert(storage_id, connectable);
        }
        placement.append_all(new_entries)?;
        drop(placements);

        self.metadata.put(&collection_size_key(uuid), required_end.bytes().to_string().into_bytes())?;
        Ok(())
    }

    fn bounds_check_read(&self, uuid: &str, offset: Offset, size: Size) -> crate::Result<()> {
        let unsigned = offset.to_unsigned().ok_or(crate::Error::CastSignedToUnsigned(offset.0))?;
        let (current, _) = self.current_size(uuid)?;
        if unsigned + size.bytes() > current.bytes() {
            return Err(crate::Error::ReadAfterSize {
                collection: uuid.to_string(),
                offset: offset.0,
                size,
                current,
            });
        }
        Ok(())
    }

    /// Bounds-checks a write, growing the collection first if it declared
    /// `size_max: Unlimited` and the write extends past the current end
    /// (spec.md §4.5.2 step 1); otherwise a write past `size_max` fails
    /// without ever touching the placement.
    fn bounds_check_write(&self, uuid: &str, offset: Offset, size: Size, candidates: &[PlacementCandidate]) -> crate::Result<()> {
        let unsigned = offset.to_unsigned().ok_or(crate::Error::CastSignedToUnsigned(offset.0))?;
        let required_end = Size::new(unsigned + size.bytes());
        let (current, max) = self.current_size(uuid)?;
        if required_end <= current {
            return Ok(());
        }
        match max {
            MaxSize::Limit(limit) => Err(crate::Error::WriteAfterMaxSize {
                collection: uuid.to_string(),
                offset: offset.0,
                size,
                max: limit,
            }),
            MaxSize::Unlimited => self.collection_append(uuid, required_end, candidates),
        }
    }

    fn locate(&self, uuid: &str, range: Range) -> crate::Result<Vec<UsedStorage>> {
        let placements = self.placements.lock().unwrap();
        let placement = placements.get(uuid).ok_or_else(|| crate::Error::CollectionDoesNotExist(uuid.to_string()))?;
        Ok(placement.locate(range))
    }

    fn connectable_for(&self, storage_id: StorageId) -> crate::Result<Connectable> {
        self.connectable_hints
            .lock()
            .unwrap()
            .get(&storage_id)
            .cloned()
            .ok_or(crate::Error::UnknownId(storage_id))
    }

    /// Reads `size` bytes starting at `offset` in collection `uuid` into
    /// `out`. Fans out one task per overlapping placement entry (spec.md
    /// §4.5.2's "one asynchronous request per location"), each further split
    /// into sub-transfers bounded by `maximum_transfer_size`; every task and
    /// sub-transfer runs on its own thread, bounded by
    /// `maximum_number_of_parallel_streams` live `stream_semaphore` permits.
    pub fn read(&self, uuid: &str, offset: Offset, out: &mut [u8]) -> crate::Result<u64> {
        let size = Size::new(out.len() as u64);
        self.bounds_check_read(uuid, offset, size)?;
        if size == Size::ZERO {
            return Ok(0);
        }
        let request_range = Range::new(offset, size);
        let entries = self.locate(uuid, request_range)?;
        let classification = self.shared_buffers.classify(out.as_ptr() as usize, out.len())?;

        let mut plan = Vec::with_capacity(entries.len());
        let mut remaining: &mut [u8] = out;
        for entry in &entries {
            let overlap_begin = entry.range.begin.max(request_range.begin);
            let overlap_end = entry.range.end().min(request_range.end());
            let overlap_len = (overlap_end - overlap_begin).bytes() as usize;
            if overlap_len == 0 {
                continue;
            }
            let storage_offset = overlap_begin - entry.range.begin;
            let (slice, rest) = remaining.split_at_mut(overlap_len);
            remaining = rest;
            let address = TransportAddress {
                storage_id: entry.storage_id,
                parameter: Vec::new(),
                segment_id: entry.segment_id,
                offset: Offset::new(storage_offset.bytes() as i64),
            };
            plan.push((entry.storage_id, address, slice));
        }

        let results: Vec<crate::Result<u64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .into_iter()
                .map(|(storage_id, address, slice)| {
                    scope.spawn(move || {
                        let connectable = self.connectable_for(storage_id)?;
                        self.dispatch_read(&connectable, address, slice, classification)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("read sub-transfer thread panicked")).collect()
        });

        let mut total = 0u64;
        for r in results {
            total += r?;
        }
        Ok(total)
    }

    /// Writes `data` at `offset` in collection `uuid`, growing it first if
    /// its declared max size allows. Fans out the same way `read` does: one
    /// task per overlapping placement entry, each threaded.
    pub fn write(&self, uuid: &str, offset: Offset, data: &[u8], growth_candidates: &[PlacementCandidate]) -> crate::Result<u64> {
        let size = Size::new(data.len() as u64);
        self.bounds_check_write(uuid, offset, size, growth_candidates)?;
        if size == Size::ZERO {
            return Ok(0);
        }
        let request_range = Range::new(offset, size);
        let entries = self.locate(uuid, request_range)?;
        let classification = self.shared_buffers.classify(data.as_ptr() as usize, data.len())?;

        let mut plan = Vec::with_capacity(entries.len());
        let mut cursor = 0usize;
        for entry in &entries {
            let overlap_begin = entry.range.begin.max(request_range.begin);
            let overlap_end = entry.range.end().min(request_range.end());
            let overlap_len = (overlap_end - overlap_begin).bytes() as usize;
            if overlap_len == 0 {
                continue;
            }
            let storage_offset = overlap_begin - entry.range.begin;
            let slice = &data[cursor..cursor + overlap_len];
            cursor += overlap_len;
            let address = TransportAddress {
                storage_id: entry.storage_id,
                parameter: Vec::new(),
                segment_id: entry.segment_id,
                offset: Offset::new(storage_offset.bytes() as i64),
            };
            plan.push((entry.storage_id, address, slice));
        }

        let results: Vec<crate::Result<u64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .into_iter()
                .map(|(storage_id, address, slice)| {
                    scope.spawn(move || {
                        let connectable = self.connectable_for(storage_id)?;
                        self.dispatch_write(&connectable, address, slice, classification)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("write sub-transfer thread panicked")).collect()
        });

        let mut total = 0u64;
        for r in results {
            total += r?;
        }
        Ok(total)
    }

    /// Splits `out` into `maximum_transfer_size`-bounded sub-transfers and
    /// runs each on its own thread, gated by `stream_semaphore` so at most
    /// `maximum_number_of_parallel_streams` are ever in flight at once.
    fn dispatch_read(&self, connectable: &Connectable, address: TransportAddress, out: &mut [u8], classification: BufferClassification) -> crate::Result<u64> {
        let client = self.transport_client_for(connectable)?;

        let mut plan = Vec::new();
        let mut remaining: &mut [u8] = out;
        let mut cursor = 0usize;
        while !remaining.is_empty() {
            let chunk_len = remaining.len().min(self.config.maximum_transfer_size);
            let (slice, rest) = remaining.split_at_mut(chunk_len);
            remaining = rest;
            let sub_address = TransportAddress {
                offset: address.offset + Size::new(cursor as u64),
                ..address.clone()
            };
            plan.push((sub_address, slice));
            cursor += chunk_len;
        }

        let results: Vec<crate::Result<u64>> = std::thread::scope(|scope| {
            let client = &client;
            let handles: Vec<_> = plan
                .into_iter()
                .map(|(sub_address, slice)| {
                    scope.spawn(move || -> crate::Result<u64> {
                        let chunk_len = slice.len();
                        let _permit = self.stream_semaphore.acquire_timeout(self.config.acquire_buffer_timeout)?;
                        match classification {
                            BufferClassification::Direct { .. } => client.memory_get(sub_address, Size::new(chunk_len as u64), slice),
                            BufferClassification::Indirect => {
                                let slot = self.comm_buffer.acquire_slot(self.config.acquire_buffer_timeout)?;
                                let mut staging = vec![0u8; chunk_len];
                                let n = client.memory_get(sub_address, Size::new(chunk_len as u64), &mut staging)?;
                                slot.copy_in(&staging);
                                slot.copy_out(slice);
                                Ok(n)
                            }
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("read sub-transfer thread panicked")).collect()
        });

        let mut transferred = 0u64;
        for r in results {
            transferred += r?;
        }
        Ok(transferred)
    }

    /// Write-side counterpart of `dispatch_read`.
    fn dispatch_write(&self, connectable: &Connectable, address: TransportAddress, data: &[u8], classification: BufferClassification) -> crate::Result<u64> {
        let client = self.transport_client_for(connectable)?;

        let mut plan = Vec::new();
        let mut cursor = 0usize;
        while cursor < data.len() {
            let chunk_len = (data.len() - cursor).min(self.config.maximum_transfer_size);
            let sub_address = TransportAddress {
                offset: address.offset + Size::new(cursor as u64),
                ..address.clone()
            };
            plan.push((sub_address, &data[cursor..cursor + chunk_len]));
            cursor += chunk_len;
        }

        let results: Vec<crate::Result<u64>> = std::thread::scope(|scope| {
            let client = &client;
            let handles: Vec<_> = plan
                .into_iter()
                .map(|(sub_address, slice)| {
                    scope.spawn(move || -> crate::Result<u64> {
                        let _permit = self.stream_semaphore.acquire_timeout(self.config.acquire_buffer_timeout)?;
                        match classification {
                            BufferClassification::Direct { .. } => client.memory_put(sub_address, slice),
                            BufferClassification::Indirect => {
                                let slot = self.comm_buffer.acquire_slot(self.config.acquire_buffer_timeout)?;
                                slot.copy_in(slice);
                                let mut staging = vec![0u8; slice.len()];
                                slot.copy_out(&mut staging);
                                client.memory_put(sub_address, &staging)
                            }
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("write sub-transfer thread panicked")).collect()
        });

        let mut transferred = 0u64;
        for r in results {
            transferred += r?;
        }
        Ok(transferred)
    }
}

fn create_segment(client: &ControlClient, storage_id: StorageId, size: Size) -> crate::Result<SegmentId> {
    let response = client.call(ControlCommand::SegmentCreate { storage_id, size })?;
    let id = u64::from_le_bytes(response.try_into().map_err(|_| crate::Error::HandlerError("malformed segment id".into()))?);
    Ok(SegmentId(id))
}

fn remove_segment(client: &ControlClient, storage_id: StorageId, segment_id: SegmentId) -> crate::Result<()> {
    client.call(ControlCommand::SegmentRemove { storage_id, segment_id })?;
    Ok(())
}
