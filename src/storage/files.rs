// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Files storage. A directory prefix holds one file per segment, named after
// the segment id; existing files are recovered as segments on construction.

use crate::domain::{ChunkAccess, MaxSize, Offset, Range, SegmentId, Size};
use crate::segment::{Chunk, ChunkDescription, ConstChunk, FilePersistency, MutableChunkBytes};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct FileSegment {
    range: Range,
    persistency: FilePersistency,
}

pub struct FilesStorage {
    directory: PathBuf,
    max: MaxSize,
    used: Mutex<Size>,
    next_segment_id: AtomicU64,
    segments: Mutex<HashMap<SegmentId, FileSegment>>,
}

impl FilesStorage {
    /// Opens (and validates) `directory` as the backing prefix, recovering
    /// any existing segment files. Rejects directories that do not exist or
    /// that live on an NFS mount, and any file name that does not parse as a
    /// segment id.
    pub fn open(directory: impl Into<PathBuf>, max: MaxSize) -> crate::Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(crate::Error::io(
                "Files::open (prefix must exist)",
                std::io::Error::new(std::io::ErrorKind::NotFound, directory.display().to_string()),
            ));
        }
        if is_nfs_mount(&directory) {
            return Err(crate::Error::io(
                "Files::open (NFS rejected)",
                std::io::Error::new(std::io::ErrorKind::Unsupported, directory.display().to_string()),
            ));
        }

        let mut segments = HashMap::new();
        let mut used = Size::ZERO;
        let mut max_id = 0u64;
        for entry in std::fs::read_dir(&directory).map_err(|e| crate::Error::io("read_dir", e))? {
            let entry = entry.map_err(|e| crate::Error::io("read_dir entry", e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let id: u64 = name.parse().map_err(|_| {
                crate::Error::io(
                    "Files::open (invalid segment file name)",
                    std::io::Error::new(std::io::ErrorKind::InvalidData, name.to_string()),
                )
            })?;
            let size = entry
                .metadata()
                .map_err(|e| crate::Error::io("stat recovered segment", e))?
                .len();
            max_id = max_id.max(id);
            used = used + Size::new(size);
            segments.insert(
                SegmentId(id),
                FileSegment {
                    range: Range::new(Offset::ZERO, Size::new(size)),
                    persistency: FilePersistency::Keep,
                },
            );
        }

        Ok(Self {
            directory,
            max,
            used: Mutex::new(used),
            next_segment_id: AtomicU64::new(max_id + 1),
            segments: Mutex::new(segments),
        })
    }

    fn path_for(&self, id: SegmentId) -> PathBuf {
        self.directory.join(id.0.to_string())
    }

    pub fn size_max(&self) -> MaxSize {
        self.max
    }

    pub fn size_used(&self) -> Size {
        *self.used.lock().unwrap()
    }

    pub fn segment_create(&self, size: Size) -> crate::Result<SegmentId> {
        self.segment_create_with_persistency(size, FilePersistency::default())
    }

    pub fn segment_create_with_persistency(
        &self,
        size: Size,
        persistency: FilePersistency,
    ) -> crate::Result<SegmentId> {
        let mut used = self.used.lock().unwrap();
        super::check_capacity(size, *used, self.max)?;
        let id = SegmentId(self.next_segment_id.fetch_add(1, Ordering::Relaxed));
        let file = File::create(self.path_for(id)).map_err(|e| crate::Error::io("create segment file", e))?;
        file.set_len(size.bytes())
            .map_err(|e| crate::Error::io("ftruncate segment file", e))?;
        self.segments.lock().unwrap().insert(
            id,
            FileSegment {
                range: Range::new(Offset::ZERO, size),
                persistency,
            },
        );
        *used = *used + size;
        tracing::info!(directory = %self.directory.display(), segment = %id, %size, "files segment_create");
        Ok(id)
    }

    pub fn segment_remove(&self, id: SegmentId) -> crate::Result<Size> {
        let removed = self.segments.lock().unwrap().remove(&id);
        match removed {
            Some(seg) => {
                if seg.persistency == FilePersistency::Remove {
                    if let Err(e) = std::fs::remove_file(self.path_for(id)) {
                        tracing::error!(segment = %id, error = %e, "failed to remove segment file");
                    }
                }
                let mut used = self.used.lock().unwrap();
                *used = *used - seg.range.size;
                Ok(seg.range.size)
            }
            None => Ok(Size::ZERO),
        }
    }

    fn segment_range(&self, id: SegmentId) -> crate::Result<Range> {
        self.segments
            .lock()
            .unwrap()
            .get(&id)
            .map(|s| s.range)
            .ok_or(crate::Error::UnknownSegmentId(id, crate::domain::StorageId(0)))
    }

    pub fn chunk_description(
        &self,
        _access: ChunkAccess,
        id: SegmentId,
        range: Range,
    ) -> crate::Result<ChunkDescription> {
        let seg_range = self.segment_range(id)?;
        if !seg_range.contains_range(&range) {
            return Err(crate::Error::RangesAreNotTouching {
                small: range,
                large: seg_range,
            });
        }
        Ok(ChunkDescription::Files {
            directory: self.directory.clone(),
            segment_id: id,
            range,
        })
    }

    /// Re-opens the segment file on demand and reads its bytes into memory.
    /// A real mmap-backed implementation would map the file directly; this
    /// crate's portable fallback copies through `std::fs` the way the
    /// teacher's `CacheImpl` falls back when an mmap is not available.
    pub fn acquire_chunk(&self, access: ChunkAccess, id: SegmentId, range: Range) -> crate::Result<Chunk> {
        let seg_range = self.segment_range(id)?;
        if !seg_range.contains_range(&range) {
            return Err(crate::Error::RangesAreNotTouching {
                small: range,
                large: seg_range,
            });
        }
        let offset = range
            .begin
            .to_unsigned()
            .ok_or(crate::Error::CastSignedToUnsigned(range.begin.0))?;
        let len = range.size.bytes() as usize;
        let mut file = OpenOptions::new()
            .read(true)
            .write(matches!(access, ChunkAccess::Mutable))
            .open(self.path_for(id))
            .map_err(|e| crate::Error::io("open segment file", e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| crate::Error::io("seek segment file", e))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| crate::Error::io("read segment file", e))?;
        Ok(match access {
            ChunkAccess::Const => Chunk::Const(Box::new(FileChunk { bytes: buf })),
            ChunkAccess::Mutable => Chunk::Mutable(Box::new(FileChunkMut {
                path: self.path_for(id),
                offset,
                bytes: buf,
            })),
        })
    }

    pub fn file_read(&self, id: SegmentId, range: Range, out: &mut [u8]) -> crate::Result<u64> {
        let chunk = self.acquire_chunk(ChunkAccess::Const, id, range)?;
        let n = chunk.bytes().len().min(out.len());
        out[..n].copy_from_slice(&chunk.bytes()[..n]);
        Ok(n as u64)
    }

    pub fn file_write(&self, id: SegmentId, range: Range, data: &[u8]) -> crate::Result<u64> {
        let mut chunk = self.acquire_chunk(ChunkAccess::Mutable, id, range)?;
        let bytes = chunk.bytes_mut()?;
        let n = bytes.len().min(data.len());
        bytes[..n].copy_from_slice(&data[..n]);
        Ok(n as u64)
    }
}

struct FileChunk {
    bytes: Vec<u8>,
}

impl ConstChunk for FileChunk {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

struct FileChunkMut {
    path: PathBuf,
    offset: u64,
    bytes: Vec<u8>,
}

impl MutableChunkBytes for FileChunkMut {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for FileChunkMut {
    fn drop(&mut self) {
        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).open(&self.path)?;
            file.seek(SeekFrom::Start(self.offset))?;
            file.write_all(&self.bytes)?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), error = %e, "failed to flush file chunk on release");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn is_nfs_mount(_path: &Path) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_nfs_mount(path: &Path) -> bool {
    const NFS_SUPER_MAGIC: i64 = 0x6969;
    unsafe {
        let c_path = match std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let mut buf: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut buf) != 0 {
            return false;
        }
        buf.f_type as i64 == NFS_SUPER_MAGIC
    }
}
