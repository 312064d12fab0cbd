// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Control and transport providers. Scheduling follows spec.md §5: a small
// pool of worker threads, one per accepted connection, reading commands
// serially off that connection (matching the "single-producer command
// queue per client" contract spec.md §9 requires regardless of concurrency
// model).

use crate::config::Endpoint;
use crate::domain::{ChunkAccess, MaxSize, Size, StorageImplementationId};
use crate::registry::Registry;
use crate::storage::{files::FilesStorage, heap::HeapStorage, shmem::ShmemStorage, StorageInstance};
use crate::transport::wire::{
    read_bytes, read_string, read_u64, write_bytes, write_string, write_u64, ControlCommand, ControlResponse,
    TransferHeader, TransferKind, TransferResponse,
};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

/// Decodes the `parameter` bytes of `storage_create` for each implementation.
/// Encoding: a `MaxSize` tag (0 = Unlimited, 1 = Limit followed by a u64),
/// then implementation-specific fields.
fn build_storage(implementation: StorageImplementationId, mut parameter: &[u8]) -> crate::Result<StorageInstance> {
    let tag = read_u64(&mut parameter).map_err(|e| crate::Error::io("decode storage parameter", e))?;
    let max = if tag == 0 {
        MaxSize::Unlimited
    } else {
        MaxSize::Limit(Size::new(
            read_u64(&mut parameter).map_err(|e| crate::Error::io("decode storage parameter", e))?,
        ))
    };
    Ok(match implementation {
        StorageImplementationId::Heap => StorageInstance::Heap(HeapStorage::new(max)),
        StorageImplementationId::Shmem => {
            let prefix = read_string(&mut parameter).map_err(|e| crate::Error::io("decode shmem prefix", e))?;
            StorageInstance::Shmem(ShmemStorage::new(prefix, max))
        }
        StorageImplementationId::Files => {
            let directory = read_string(&mut parameter).map_err(|e| crate::Error::io("decode files directory", e))?;
            StorageInstance::Files(FilesStorage::open(directory, max)?)
        }
        StorageImplementationId::ImportedC => return Err(crate::Error::Unsupported),
    })
}

fn handle_control_command(registry: &Registry, cmd: ControlCommand) -> ControlResponse {
    let result: crate::Result<Vec<u8>> = (|| match cmd {
        ControlCommand::StorageCreate { implementation, parameter } => {
            let instance = build_storage(implementation, &parameter)?;
            let mut w = registry.write();
            let id = w.insert(instance);
            let mut buf = Vec::new();
            write_u64(&mut buf, id.0).unwrap();
            Ok(buf)
        }
        ControlCommand::StorageRemove { storage_id } => {
            let mut w = registry.write();
            w.remove(storage_id)?;
            Ok(Vec::new())
        }
        ControlCommand::StorageSizeMax { storage_id } => {
            let r = registry.read();
            let max = r.get(storage_id)?.size_max();
            let mut buf = Vec::new();
            match max {
                MaxSize::Unlimited => write_u64(&mut buf, 0).unwrap(),
                MaxSize::Limit(s) => {
                    write_u64(&mut buf, 1).unwrap();
                    write_u64(&mut buf, s.bytes()).unwrap();
                }
            }
            Ok(buf)
        }
        ControlCommand::StorageSizeUsed { storage_id } => {
            let r = registry.read();
            let used = r.get(storage_id)?.size_used();
            let mut buf = Vec::new();
            write_u64(&mut buf, used.bytes()).unwrap();
            Ok(buf)
        }
        ControlCommand::StorageSize { storage_id } => {
            let r = registry.read();
            let instance = r.get(storage_id)?;
            let mut buf = Vec::new();
            write_u64(&mut buf, instance.size_used().bytes()).unwrap();
            match instance.size_max() {
                MaxSize::Unlimited => write_u64(&mut buf, 0).unwrap(),
                MaxSize::Limit(s) => {
                    write_u64(&mut buf, 1).unwrap();
                    write_u64(&mut buf, s.bytes()).unwrap();
                }
            }
            Ok(buf)
        }
        ControlCommand::SegmentCreate { storage_id, size } => {
            let r = registry.read();
            let id = r.get(storage_id)?.segment_create(size)?;
            let mut buf = Vec::new();
            write_u64(&mut buf, id.0).unwrap();
            Ok(buf)
        }
        ControlCommand::SegmentRemove { storage_id, segment_id } => {
            let r = registry.read();
            let freed = r.get(storage_id)?.segment_remove(segment_id)?;
            let mut buf = Vec::new();
            write_u64(&mut buf, freed.bytes()).unwrap();
            Ok(buf)
        }
        ControlCommand::ChunkDescription {
            storage_id,
            segment_id,
            range,
            mutable,
        } => {
            let r = registry.read();
            let access = if mutable { ChunkAccess::Mutable } else { ChunkAccess::Const };
            let description = r.get(storage_id)?.chunk_description(access, segment_id, range)?;
            Ok(bincode_lite_encode_description(&description))
        }
        ControlCommand::FileRead {
            storage_id,
            segment_id,
            range,
        } => {
            let r = registry.read();
            let mut out = vec![0u8; range.size.bytes() as usize];
            let n = r.get(storage_id)?.file_read(segment_id, range, &mut out)?;
            out.truncate(n as usize);
            let mut buf = Vec::new();
            write_bytes(&mut buf, &out).unwrap();
            Ok(buf)
        }
        ControlCommand::FileWrite {
            storage_id,
            segment_id,
            range,
            data,
        } => {
            let r = registry.read();
            let n = r.get(storage_id)?.file_write(segment_id, range, &data)?;
            let mut buf = Vec::new();
            write_u64(&mut buf, n).unwrap();
            Ok(buf)
        }
    })();

    match result {
        Ok(payload) => ControlResponse::Ok(payload),
        Err(e) => {
            tracing::warn!(error = %e, "control command failed");
            ControlResponse::Err(e.to_string())
        }
    }
}

/// Minimal, crate-internal encoding for `ChunkDescription` over the wire.
/// Kept separate from `serde` since the rest of the control wire format is
/// hand-rolled; a `Display`-free byte encoding avoids pulling a generic
/// serializer into the RPC hot path.
fn bincode_lite_encode_description(description: &crate::segment::ChunkDescription) -> Vec<u8> {
    use crate::transport::wire::{write_range, write_string};
    let mut buf = Vec::new();
    match description {
        crate::segment::ChunkDescription::Heap {
            storage_tag,
            segment_id,
            range,
        } => {
            write_u64(&mut buf, 0).unwrap();
            write_u64(&mut buf, *storage_tag).unwrap();
            write_u64(&mut buf, segment_id.0).unwrap();
            write_range(&mut buf, *range).unwrap();
        }
        crate::segment::ChunkDescription::Shmem {
            name,
            segment_id,
            segment_size,
            range,
        } => {
            write_u64(&mut buf, 1).unwrap();
            write_string(&mut buf, name).unwrap();
            write_u64(&mut buf, segment_id.0).unwrap();
            write_u64(&mut buf, segment_size.bytes()).unwrap();
            write_range(&mut buf, *range).unwrap();
        }
        crate::segment::ChunkDescription::Files {
            directory,
            segment_id,
            range,
        } => {
            write_u64(&mut buf, 2).unwrap();
            write_string(&mut buf, &directory.display().to_string()).unwrap();
            write_u64(&mut buf, segment_id.0).unwrap();
            write_range(&mut buf, *range).unwrap();
        }
        crate::segment::ChunkDescription::ImportedC {
            parameter,
            segment_id,
            range,
        } => {
            write_u64(&mut buf, 3).unwrap();
            write_bytes(&mut buf, parameter).unwrap();
            write_u64(&mut buf, segment_id.0).unwrap();
            write_range(&mut buf, *range).unwrap();
        }
    }
    buf
}

fn serve_control_stream<S: Read + Write>(registry: &Registry, stream: &mut S) {
    loop {
        let cmd = match ControlCommand::read(stream) {
            Ok(cmd) => cmd,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                tracing::warn!(error = %e, "malformed control command, closing connection");
                return;
            }
        };
        let response = handle_control_command(registry, cmd);
        if let Err(e) = response.write(stream) {
            tracing::warn!(error = %e, "failed to write control response, closing connection");
            return;
        }
    }
}

fn serve_transfer_stream<S: Read + Write>(registry: &Registry, stream: &mut S) {
    loop {
        let header = match TransferHeader::read(stream) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                tracing::warn!(error = %e, "malformed transfer header, closing connection");
                return;
            }
        };
        let transferred = match header.kind {
            TransferKind::Put => handle_put(registry, stream, &header),
            TransferKind::Get => handle_get(registry, stream, &header),
        };
        let transferred = match transferred {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "transfer failed");
                0
            }
        };
        if let Err(e) = (TransferResponse { transferred }).write(stream) {
            tracing::warn!(error = %e, "failed to write transfer response, closing connection");
            return;
        }
    }
}

fn handle_put<S: Read + Write>(registry: &Registry, stream: &mut S, header: &TransferHeader) -> crate::Result<u64> {
    let size = header.size.bytes() as usize;
    if size == 0 {
        return Ok(0);
    }
    let r = registry.read();
    let range = crate::domain::Range::new(header.address.offset, header.size);
    let mut chunk = r.acquire_chunk(header.address.storage_id, ChunkAccess::Mutable, header.address.segment_id, range)?;
    let bytes = chunk.bytes_mut()?;
    stream.read_exact(bytes).map_err(|e| crate::Error::io("memory_put read payload", e))?;
    Ok(size as u64)
}

fn handle_get<S: Read + Write>(registry: &Registry, stream: &mut S, header: &TransferHeader) -> crate::Result<u64> {
    let size = header.size.bytes() as usize;
    if size == 0 {
        return Ok(0);
    }
    let r = registry.read();
    let range = crate::domain::Range::new(header.address.offset, header.size);
    let chunk = r.acquire_chunk(header.address.storage_id, ChunkAccess::Const, header.address.segment_id, range)?;
    stream
        .write_all(chunk.bytes())
        .map_err(|e| crate::Error::io("memory_get write payload", e))?;
    Ok(size as u64)
}

/// Runs a control provider, accepting connections until the process exits.
/// Blocks the calling thread; callers typically run this on its own
/// dedicated thread per spec.md §5's worker-thread model.
pub fn run_control_provider(endpoint: &Endpoint, registry: Arc<Registry>) -> io::Result<()> {
    match endpoint {
        Endpoint::Tcp { address } => {
            let listener = TcpListener::bind(address)?;
            for stream in listener.incoming() {
                let mut stream = stream?;
                let registry = registry.clone();
                std::thread::spawn(move || serve_control_stream(&registry, &mut stream));
            }
            Ok(())
        }
        Endpoint::LocalStream { path } => {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            for stream in listener.incoming() {
                let mut stream = stream?;
                let registry = registry.clone();
                std::thread::spawn(move || serve_control_stream(&registry, &mut stream));
            }
            Ok(())
        }
    }
}

/// Runs a transport provider serving only `memory_get`/`memory_put`.
pub fn run_transport_provider(endpoint: &Endpoint, registry: Arc<Registry>) -> io::Result<()> {
    match endpoint {
        Endpoint::Tcp { address } => {
            let listener = TcpListener::bind(address)?;
            for stream in listener.incoming() {
                let mut stream = stream?;
                let registry = registry.clone();
                std::thread::spawn(move || serve_transfer_stream(&registry, &mut stream));
            }
            Ok(())
        }
        Endpoint::LocalStream { path } => {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            for stream in listener.incoming() {
                let mut stream = stream?;
                let registry = registry.clone();
                std::thread::spawn(move || serve_transfer_stream(&registry, &mut stream));
            }
            Ok(())
        }
    }
}

/// A connected stream to either kind of endpoint, used by the client side.
pub enum Connection {
    Tcp(TcpStream),
    LocalStream(UnixStream),
}

impl Connection {
    pub fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp { address } => Ok(Connection::Tcp(TcpStream::connect(address)?)),
            Endpoint::LocalStream { path } => Ok(Connection::LocalStream(UnixStream::connect(path)?)),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.read(buf),
            Connection::LocalStream(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.write(buf),
            Connection::LocalStream(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.flush(),
            Connection::LocalStream(s) => s.flush(),
        }
    }
}
