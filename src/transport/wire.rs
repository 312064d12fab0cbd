// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire framing for the control and transport RPC paths (spec.md §6). Scalars
// are host-endian-neutral fixed-width (little-endian on the wire); strings
// and byte vectors are length-prefixed (u32); variants emit a tag byte then
// the active alternative's payload.

use crate::domain::{Offset, Range, SegmentId, Size, StorageId};
use std::io::{self, Read, Write};

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_range<W: Write>(w: &mut W, range: Range) -> io::Result<()> {
    write_i64(w, range.begin.0)?;
    write_u64(w, range.size.bytes())
}

pub fn read_range<R: Read>(r: &mut R) -> io::Result<Range> {
    let begin = read_i64(r)?;
    let size = read_u64(r)?;
    Ok(Range::new(Offset::new(begin), Size::new(size)))
}

/// `(StorageId, storage-parameter bytes, SegmentId, Offset)` — a routable
/// reference to one byte position inside one segment of one storage on the
/// provider that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddress {
    pub storage_id: StorageId,
    pub parameter: Vec<u8>,
    pub segment_id: SegmentId,
    pub offset: Offset,
}

impl TransportAddress {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u64(w, self.storage_id.0)?;
        write_bytes(w, &self.parameter)?;
        write_u64(w, self.segment_id.0)?;
        write_i64(w, self.offset.0)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let storage_id = StorageId(read_u64(r)?);
        let parameter = read_bytes(r)?;
        let segment_id = SegmentId(read_u64(r)?);
        let offset = Offset::new(read_i64(r)?);
        Ok(Self {
            storage_id,
            parameter,
            segment_id,
            offset,
        })
    }
}

macro_rules! command_tags {
    ($($tag:literal => $name:ident),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum CommandTag { $($name = $tag),+ }

        impl CommandTag {
            pub fn from_u8(v: u8) -> io::Result<Self> {
                match v {
                    $($tag => Ok(CommandTag::$name),)+
                    other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown command tag {other}"))),
                }
            }
        }
    };
}

command_tags! {
    0 => StorageCreate,
    1 => StorageRemove,
    2 => StorageSizeMax,
    3 => StorageSizeUsed,
    4 => StorageSize,
    5 => SegmentCreate,
    6 => SegmentRemove,
    7 => ChunkDescription,
    8 => FileRead,
    9 => FileWrite,
    10 => MemoryGet,
    11 => MemoryPut,
}

/// A control-channel command. The discriminant (`CommandTag`) is written
/// first; client and server must agree on which discriminants they
/// understand and reject unknowns (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    StorageCreate {
        implementation: crate::domain::StorageImplementationId,
        parameter: Vec<u8>,
    },
    StorageRemove {
        storage_id: StorageId,
    },
    StorageSizeMax {
        storage_id: StorageId,
    },
    StorageSizeUsed {
        storage_id: StorageId,
    },
    StorageSize {
        storage_id: StorageId,
    },
    SegmentCreate {
        storage_id: StorageId,
        size: Size,
    },
    SegmentRemove {
        storage_id: StorageId,
        segment_id: SegmentId,
    },
    ChunkDescription {
        storage_id: StorageId,
        segment_id: SegmentId,
        range: Range,
        mutable: bool,
    },
    FileRead {
        storage_id: StorageId,
        segment_id: SegmentId,
        range: Range,
    },
    FileWrite {
        storage_id: StorageId,
        segment_id: SegmentId,
        range: Range,
        data: Vec<u8>,
    },
}

fn write_implementation_id<W: Write>(w: &mut W, id: crate::domain::StorageImplementationId) -> io::Result<()> {
    use crate::domain::StorageImplementationId as Id;
    write_u8(
        w,
        match id {
            Id::Heap => 0,
            Id::Shmem => 1,
            Id::Files => 2,
            Id::ImportedC => 3,
        },
    )
}

fn read_implementation_id<R: Read>(r: &mut R) -> io::Result<crate::domain::StorageImplementationId> {
    use crate::domain::StorageImplementationId as Id;
    match read_u8(r)? {
        0 => Ok(Id::Heap),
        1 => Ok(Id::Shmem),
        2 => Ok(Id::Files),
        3 => Ok(Id::ImportedC),
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown implementation id {other}"))),
    }
}

impl ControlCommand {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            ControlCommand::StorageCreate { implementation, parameter } => {
                write_u8(w, CommandTag::StorageCreate as u8)?;
                write_implementation_id(w, *implementation)?;
                write_bytes(w, parameter)
            }
            ControlCommand::StorageRemove { storage_id } => {
                write_u8(w, CommandTag::StorageRemove as u8)?;
                write_u64(w, storage_id.0)
            }
            ControlCommand::StorageSizeMax { storage_id } => {
                write_u8(w, CommandTag::StorageSizeMax as u8)?;
                write_u64(w, storage_id.0)
            }
            ControlCommand::StorageSizeUsed { storage_id } => {
                write_u8(w, CommandTag::StorageSizeUsed as u8)?;
                write_u64(w, storage_id.0)
            }
            ControlCommand::StorageSize { storage_id } => {
                write_u8(w, CommandTag::StorageSize as u8)?;
                write_u64(w, storage_id.0)
            }
            ControlCommand::SegmentCreate { storage_id, size } => {
                write_u8(w, CommandTag::SegmentCreate as u8)?;
                write_u64(w, storage_id.0)?;
                write_u64(w, size.bytes())
            }
            ControlCommand::SegmentRemove { storage_id, segment_id } => {
                write_u8(w, CommandTag::SegmentRemove as u8)?;
                write_u64(w, storage_id.0)?;
                write_u64(w, segment_id.0)
            }
            ControlCommand::ChunkDescription {
                storage_id,
                segment_id,
                range,
                mutable,
            } => {
                write_u8(w, CommandTag::ChunkDescription as u8)?;
                write_u64(w, storage_id.0)?;
                write_u64(w, segment_id.0)?;
                write_range(w, *range)?;
                write_u8(w, *mutable as u8)
            }
            ControlCommand::FileRead {
                storage_id,
                segment_id,
                range,
            } => {
                write_u8(w, CommandTag::FileRead as u8)?;
                write_u64(w, storage_id.0)?;
                write_u64(w, segment_id.0)?;
                write_range(w, *range)
            }
            ControlCommand::FileWrite {
                storage_id,
                segment_id,
                range,
                data,
            } => {
                write_u8(w, CommandTag::FileWrite as u8)?;
                write_u64(w, storage_id.0)?;
                write_u64(w, segment_id.0)?;
                write_range(w, *range)?;
                write_bytes(w, data)
            }
        }
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let tag = CommandTag::from_u8(read_u8(r)?)?;
        Ok(match tag {
            CommandTag::StorageCreate => ControlCommand::StorageCreate {
                implementation: read_implementation_id(r)?,
                parameter: read_bytes(r)?,
            },
            CommandTag::StorageRemove => ControlCommand::StorageRemove {
                storage_id: StorageId(read_u64(r)?),
            },
            CommandTag::StorageSizeMax => ControlCommand::StorageSizeMax {
                storage_id: StorageId(read_u64(r)?),
            },
            CommandTag::StorageSizeUsed => ControlCommand::StorageSizeUsed {
                storage_id: StorageId(read_u64(r)?),
            },
            CommandTag::StorageSize => ControlCommand::StorageSize {
                storage_id: StorageId(read_u64(r)?),
            },
            CommandTag::SegmentCreate => ControlCommand::SegmentCreate {
                storage_id: StorageId(read_u64(r)?),
                size: Size::new(read_u64(r)?),
            },
            CommandTag::SegmentRemove => ControlCommand::SegmentRemove {
                storage_id: StorageId(read_u64(r)?),
                segment_id: SegmentId(read_u64(r)?),
            },
            CommandTag::ChunkDescription => ControlCommand::ChunkDescription {
                storage_id: StorageId(read_u64(r)?),
                segment_id: SegmentId(read_u64(r)?),
                range: read_range(r)?,
                mutable: read_u8(r)? != 0,
            },
            CommandTag::FileRead => ControlCommand::FileRead {
                storage_id: StorageId(read_u64(r)?),
                segment_id: SegmentId(read_u64(r)?),
                range: read_range(r)?,
            },
            CommandTag::FileWrite => ControlCommand::FileWrite {
                storage_id: StorageId(read_u64(r)?),
                segment_id: SegmentId(read_u64(r)?),
                range: read_range(r)?,
                data: read_bytes(r)?,
            },
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{other:?} is not a control command"),
                ))
            }
        })
    }
}

/// Response to a `ControlCommand`: either success with an operation-specific
/// payload, or a serialized error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ok(Vec<u8>),
    Err(String),
}

impl ControlResponse {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            ControlResponse::Ok(payload) => {
                write_u8(w, 0)?;
                write_bytes(w, payload)
            }
            ControlResponse::Err(message) => {
                write_u8(w, 1)?;
                write_string(w, message)
            }
        }
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        match read_u8(r)? {
            0 => Ok(ControlResponse::Ok(read_bytes(r)?)),
            1 => Ok(ControlResponse::Err(read_string(r)?)),
            other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown response tag {other}"))),
        }
    }
}

/// A transport-channel command header. The payload (`size` bytes) follows
/// immediately on the same stream and is never staged into this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub kind: TransferKind,
    pub address: TransportAddress,
    pub size: Size,
}

impl TransferHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u8(
            w,
            match self.kind {
                TransferKind::Get => CommandTag::MemoryGet as u8,
                TransferKind::Put => CommandTag::MemoryPut as u8,
            },
        )?;
        self.address.write(w)?;
        write_u64(w, self.size.bytes())
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let kind = match CommandTag::from_u8(read_u8(r)?)? {
            CommandTag::MemoryGet => TransferKind::Get,
            CommandTag::MemoryPut => TransferKind::Put,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{other:?} is not a transfer header"),
                ))
            }
        };
        let address = TransportAddress::read(r)?;
        let size = Size::new(read_u64(r)?);
        Ok(Self { kind, address, size })
    }
}

/// The transport response header: the byte count actually transferred.
/// Short transfers are never silently accepted by callers (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResponse {
    pub transferred: u64,
}

impl TransferResponse {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u64(w, self.transferred)
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self { transferred: read_u64(r)? })
    }
}
