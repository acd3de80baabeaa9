//! File-backed append-only byte store.
//!
//! The arena is the only component that touches the index file. While the
//! indexer owns it, allocations are carved off the end of a growable writable
//! mapping; every allocation's byte offset is its permanent handle. Once the
//! file is finished it is reopened read-only and offsets are dereferenced
//! through an immutable mapping.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use fs2::FileExt;
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::disk::Off;
use crate::error::Result;

/// Initial mapping size for a freshly created arena.
const INITIAL_CAPACITY: u64 = 1 << 20;

/// Read-only access to arena contents, shared by the writable arena and the
/// reader-side mapping.
pub trait ArenaRead {
    /// A view of `len` bytes at `off`.
    ///
    /// Offsets come from the index file itself, so a range that falls outside
    /// the allocated region means the file is corrupt; that is fatal.
    fn bytes(&self, off: Off, len: usize) -> &[u8];

    /// A typed view of the record at `off`. Record types are alignment-1
    /// compositions of little-endian fields, so any offset is valid.
    fn get<T: Pod>(&self, off: Off) -> &T {
        bytemuck::from_bytes(self.bytes(off, std::mem::size_of::<T>()))
    }
}

/// The writable arena held by the indexer.
pub struct Arena {
    file: File,
    path: PathBuf,
    map: MmapMut,
    size: u64,
    capacity: u64,
}

impl Arena {
    /// Create a new arena file, truncating anything already at `path`, and
    /// take an exclusive lock for the lifetime of the handle.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, path.to_path_buf())
    }

    /// Create an arena over an already-open, freshly truncated file. Used for
    /// ephemeral indexes backed by temporary files.
    pub fn from_file(file: File, path: PathBuf) -> Result<Self> {
        file.try_lock_exclusive()?;
        file.set_len(INITIAL_CAPACITY)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self {
            file,
            path,
            map,
            size: 0,
            capacity: INITIAL_CAPACITY,
        })
    }

    /// Allocate `len` zero-filled bytes at the end of the arena and return
    /// their offset.
    pub fn alloc(&mut self, len: usize) -> Result<Off> {
        let off = self.size;
        let new_size = off + len as u64;
        if new_size > self.capacity {
            self.grow(new_size)?;
        }
        self.size = new_size;
        Ok(off)
    }

    /// Allocate space for `bytes` and write them.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Off> {
        let off = self.alloc(bytes.len())?;
        self.write(off, bytes);
        Ok(off)
    }

    /// Allocate space for one record and write it.
    pub fn append_record<T: Pod>(&mut self, record: &T) -> Result<Off> {
        self.append(bytemuck::bytes_of(record))
    }

    /// Patch previously allocated space. Used for the file header, the
    /// call-depth arrays written by the post-pass, and sub-tree root cells.
    pub fn write(&mut self, off: Off, bytes: &[u8]) {
        let start = off as usize;
        let end = start + bytes.len();
        assert!(
            end as u64 <= self.size,
            "arena patch outside allocated space: {:#x}..{:#x} (size {:#x})",
            start,
            end,
            self.size
        );
        self.map[start..end].copy_from_slice(bytes);
    }

    /// Patch one record at `off`.
    pub fn write_record<T: Pod>(&mut self, off: Off, record: &T) {
        self.write(off, bytemuck::bytes_of(record));
    }

    /// Bytes allocated so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    /// Flush, shrink the file to the bytes actually allocated, and sync.
    /// After this the file is ready to be opened by readers.
    pub fn finish(self) -> Result<()> {
        self.map.flush()?;
        drop(self.map);
        self.file.set_len(self.size)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn grow(&mut self, needed: u64) -> Result<()> {
        let mut capacity = self.capacity;
        while capacity < needed {
            capacity *= 2;
        }
        self.map.flush()?;
        self.file.set_len(capacity)?;
        self.map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        self.capacity = capacity;
        Ok(())
    }
}

impl ArenaRead for Arena {
    fn bytes(&self, off: Off, len: usize) -> &[u8] {
        let start = off as usize;
        let end = start + len;
        assert!(
            end as u64 <= self.size,
            "corrupt index: offset {:#x}..{:#x} outside arena of {:#x} bytes",
            start,
            end,
            self.size
        );
        &self.map[start..end]
    }
}

/// The read-only arena held by a reader. Multiple independent readers may
/// map the same finalized file.
pub struct ReadArena {
    _file: File,
    map: Mmap,
}

impl ReadArena {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        FileExt::try_lock_shared(&file)?;
        let map = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self { _file: file, map })
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl ArenaRead for ReadArena {
    fn bytes(&self, off: Off, len: usize) -> &[u8] {
        let start = off as usize;
        let end = start + len;
        assert!(
            end <= self.map.len(),
            "corrupt index: offset {:#x}..{:#x} outside arena of {:#x} bytes",
            start,
            end,
            self.map.len()
        );
        &self.map[start..end]
    }
}
