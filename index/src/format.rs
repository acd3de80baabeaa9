//! On-disk record formats: magic number, file header, and the payload and
//! annotation schemas of the four index trees.
//!
//! The index file is, in order: a 16-byte magic number embedding the format
//! version, the fixed-size [`FileHeader`], and then arena content addressed
//! by the offsets stored in payloads. There is no compatibility across
//! format versions; a version bump changes the magic and older files are
//! rejected as `WrongMagic`.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use num_enum::TryFromPrimitive;

use crate::avl::{Annotation, AvlTree, TreePayload};
use crate::disk::{Addr, DiskU32, DiskU64, DiskU8, Off, Time};
use crate::error::Result;

/// Identifies the file as a trace index of this format version.
pub const MAGIC: [u8; 16] = *b"TarmacIndex v01\n";

/// Offset of the [`FileHeader`] within the file.
pub const HEADER_OFF: Off = 16;

/// Bytes reserved at the front of the arena for magic plus header.
pub const FILE_PREFIX_LEN: usize = 16 + std::mem::size_of::<FileHeader>();

// FileHeader flag bits.
/// Trace was believed big-endian at index time.
pub const FLAG_BIGEND: u32 = 0x0000_0001;
/// Trace includes AArch64 execution state.
pub const FLAG_AARCH64_USED: u32 = 0x0000_0002;
/// Index generation completed successfully.
pub const FLAG_COMPLETE: u32 = 0x0000_0004;
/// Trace assumes everything is Thumb.
pub const FLAG_THUMB_ONLY: u32 = 0x0000_0008;

/// Fixed-size header following the magic number.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct FileHeader {
    pub flags: DiskU32,
    /// Root of the sequential-order tree.
    pub seqroot: DiskU64,
    /// Root of the by-PC tree.
    pub bypcroot: DiskU64,
    /// Line-number offset to apply if the Tarmac data starts after line 1
    /// of the trace file (e.g. an initial header line).
    pub lineno_offset: DiskU32,
}

/// Result of probing a file's magic and completeness without opening it as
/// an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexHeaderState {
    Ok,
    WrongMagic,
    Incomplete,
}

/// Check whether `path` holds a complete index of this format version.
/// `Ok` requires both a byte-for-byte magic match and the COMPLETE flag.
pub fn check_index_header(path: &Path) -> Result<IndexHeaderState> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; FILE_PREFIX_LEN];
    match file.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(IndexHeaderState::WrongMagic)
        }
        Err(e) => return Err(e.into()),
    }
    if prefix[..16] != MAGIC {
        return Ok(IndexHeaderState::WrongMagic);
    }
    let header: &FileHeader = bytemuck::from_bytes(&prefix[16..]);
    if header.flags.get() & FLAG_COMPLETE == 0 {
        return Ok(IndexHeaderState::Incomplete);
    }
    Ok(IndexHeaderState::Ok)
}

/// Address-space tag carried by memory-tree entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AddrSpace {
    Register = b'r',
    Memory = b'm',
}

impl AddrSpace {
    /// Sort rank: registers order before memory regardless of tag byte
    /// values.
    fn rank(self) -> u8 {
        match self {
            AddrSpace::Register => 0,
            AddrSpace::Memory => 1,
        }
    }
}

/// By-PC key reserved for CPU exception events. Cannot collide with a real
/// PC: those are 0 mod 4 (A32/A64) or 1 or 3 mod 4 (Thumb, low-bit-set
/// form).
pub const EXCEPTION_PC: Addr = 6;

/// Terminator depth in call-depth arrays, standing for "all deeper
/// depths". Real call depths are clamped strictly below this.
pub const SENTINEL_DEPTH: u32 = u32::MAX - 1;

/// One instant of the trace: an instruction retirement (or exception)
/// together with the register and memory updates it caused.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SeqOrderPayload {
    /// Timestamp as given in the trace, coerced to be nondecreasing.
    pub mod_time: DiskU64,
    pub pc: DiskU64,
    /// Where the event's text lives in the trace file, in bytes.
    pub trace_file_pos: DiskU64,
    pub trace_file_len: DiskU64,
    /// Where the event's text lives in the trace file, in 1-based lines.
    /// First line is the primary key: it is strictly increasing in trace
    /// order.
    pub trace_file_firstline: DiskU32,
    pub trace_file_lines: DiskU32,
    /// Root of the memory tree describing state just after this instant.
    pub memory_root: DiskU64,
    /// Stack depth as estimated by the call heuristic.
    pub call_depth: DiskU32,
}

impl SeqOrderPayload {
    pub fn mod_time(&self) -> Time {
        self.mod_time.get()
    }

    pub fn pc(&self) -> Addr {
        self.pc.get()
    }

    pub fn firstline(&self) -> u32 {
        self.trace_file_firstline.get()
    }

    pub fn lines(&self) -> u32 {
        self.trace_file_lines.get()
    }

    pub fn memory_root(&self) -> Off {
        self.memory_root.get()
    }

    pub fn call_depth(&self) -> u32 {
        self.call_depth.get()
    }
}

impl TreePayload for SeqOrderPayload {
    fn compare(&self, other: &Self) -> Ordering {
        self.trace_file_firstline
            .get()
            .cmp(&other.trace_file_firstline.get())
    }
}

/// Sequential-order subtree annotation: the node's call-depth array.
///
/// Layered range trees are expensive to maintain under rebalancing, so this
/// stays zeroed while the tree is built and is patched in place by the
/// post-pass once the tree has its final shape.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SeqOrderAnnotation {
    /// Offset of an array of [`CallDepthArrayEntry`].
    pub call_depth_array: DiskU64,
    pub call_depth_arraylen: DiskU32,
}

impl Annotation<SeqOrderPayload> for SeqOrderAnnotation {
    fn from_payload(_: &SeqOrderPayload) -> Self {
        Self::default()
    }

    fn combine(_: &Self, _: &Self) -> Self {
        Self::default()
    }
}

/// One entry of a node's call-depth array.
///
/// Within the node's subtree, `cumulative_insns` counts the events and
/// `cumulative_lines` the trace lines whose call depth is strictly less
/// than `call_depth`. The links give the position, in each child's array,
/// of the first entry with depth greater than or equal to this one's.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CallDepthArrayEntry {
    pub call_depth: DiskU32,
    pub cumulative_insns: DiskU32,
    pub cumulative_lines: DiskU32,
    pub left_link: DiskU32,
    pub right_link: DiskU32,
}

/// One entry of a memory tree: the contents of an address interval in one
/// address space, as known at the instant whose memory root reaches it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MemoryPayload {
    /// Address-space tag byte (`AddrSpace`).
    pub space: DiskU8,
    /// Non-zero when `contents` points at raw bytes of length
    /// `hi - lo + 1`. Zero when `contents` points at a root cell (a single
    /// `DiskU64`) holding the root of a memory sub-tree.
    pub raw: DiskU8,
    /// Inclusive interval of addresses covered.
    pub lo: DiskU64,
    pub hi: DiskU64,
    pub contents: DiskU64,
    /// First line of the event that last touched any part of the interval
    /// through this entry.
    pub trace_file_firstline: DiskU32,
}

impl MemoryPayload {
    pub fn space(&self) -> AddrSpace {
        AddrSpace::try_from(self.space.get()).expect("corrupt index: bad address-space tag")
    }

    pub fn is_raw(&self) -> bool {
        self.raw.get() != 0
    }

    pub fn lo(&self) -> Addr {
        self.lo.get()
    }

    pub fn hi(&self) -> Addr {
        self.hi.get()
    }

    pub fn contents(&self) -> Off {
        self.contents.get()
    }

    pub fn firstline(&self) -> u32 {
        self.trace_file_firstline.get()
    }

    /// Length in bytes of the covered interval.
    pub fn len(&self) -> u64 {
        self.hi.get() - self.lo.get() + 1
    }
}

impl TreePayload for MemoryPayload {
    fn compare(&self, other: &Self) -> Ordering {
        match self.space().rank().cmp(&other.space().rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        if self.hi.get() < other.lo.get() {
            Ordering::Less
        } else if self.lo.get() > other.hi.get() {
            Ordering::Greater
        } else {
            // Any overlap counts as equality.
            Ordering::Equal
        }
    }
}

/// Memory-tree subtree annotation: the newest first-line that touched any
/// entry below.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct MemoryAnnotation {
    pub latest: DiskU32,
}

impl Annotation<MemoryPayload> for MemoryAnnotation {
    fn from_payload(payload: &MemoryPayload) -> Self {
        Self {
            latest: payload.trace_file_firstline,
        }
    }

    fn combine(lhs: &Self, rhs: &Self) -> Self {
        Self {
            latest: lhs.latest.get().max(rhs.latest.get()).into(),
        }
    }
}

/// One raw byte range in a memory sub-tree. The address-space tag is
/// inherited from the memory-tree entry that links to the sub-tree, and the
/// interval is absolute: the same sub-tree may be referenced under several
/// clipped entries.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MemorySubPayload {
    pub lo: DiskU64,
    pub hi: DiskU64,
    pub contents: DiskU64,
}

impl MemorySubPayload {
    pub fn lo(&self) -> Addr {
        self.lo.get()
    }

    pub fn hi(&self) -> Addr {
        self.hi.get()
    }

    pub fn contents(&self) -> Off {
        self.contents.get()
    }

    pub fn len(&self) -> u64 {
        self.hi.get() - self.lo.get() + 1
    }
}

impl TreePayload for MemorySubPayload {
    fn compare(&self, other: &Self) -> Ordering {
        if self.hi.get() < other.lo.get() {
            Ordering::Less
        } else if self.lo.get() > other.hi.get() {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// One entry of the by-PC tree: an event keyed by the address it executed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ByPCPayload {
    pub pc: DiskU64,
    pub trace_file_firstline: DiskU32,
}

impl ByPCPayload {
    pub fn pc(&self) -> Addr {
        self.pc.get()
    }

    pub fn firstline(&self) -> u32 {
        self.trace_file_firstline.get()
    }
}

impl TreePayload for ByPCPayload {
    fn compare(&self, other: &Self) -> Ordering {
        (self.pc.get(), self.trace_file_firstline.get())
            .cmp(&(other.pc.get(), other.trace_file_firstline.get()))
    }
}

/// The four trees of the index. Stateless handles; roots travel separately.
pub const SEQTREE: AvlTree<SeqOrderPayload, SeqOrderAnnotation> = AvlTree::new();
pub const MEMTREE: AvlTree<MemoryPayload, MemoryAnnotation> = AvlTree::new();
pub const MEMSUBTREE: AvlTree<MemorySubPayload> = AvlTree::new();
pub const BYPCTREE: AvlTree<ByPCPayload> = AvlTree::new();
