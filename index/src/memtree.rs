//! The memory tree: register and memory state as of one trace instant.
//!
//! Every sequential-order node stores the root of a memory tree describing
//! state just after its event. Registers share the tree with memory under a
//! synthetic address space, so one set of operations serves both. Entries
//! reachable from one root always cover pairwise-disjoint (space, interval)
//! pairs; an update splits whatever it overlaps so the boundaries line up,
//! then replaces the middle.
//!
//! An entry either carries its bytes directly (`raw`) or points, through a
//! root cell in the arena, at a memory sub-tree of raw blocks indexed by
//! absolute address. The cell indirection is what makes retroactive fill-in
//! work: every memory root that reaches the entry reads the sub-tree through
//! the same cell, so blocks inserted later are visible from all of them.

use log::warn;

use crate::arena::{Arena, ArenaRead};
use crate::avl::TreePayload;
use crate::disk::{Addr, DiskU64, Off};
use crate::error::Result;
use crate::format::{AddrSpace, MemoryPayload, MemorySubPayload, MEMSUBTREE, MEMTREE};

/// A defined chunk located by [`getmem_next`], borrowing its bytes from the
/// arena.
#[derive(Debug)]
pub struct DefinedRegion<'a> {
    pub data: &'a [u8],
    pub addr: Addr,
    pub len: u64,
    /// First line of the event that wrote the chunk.
    pub line: u32,
}

fn probe(space: AddrSpace, lo: Addr, hi: Addr) -> MemoryPayload {
    MemoryPayload {
        space: (space as u8).into(),
        raw: 0.into(),
        lo: lo.into(),
        hi: hi.into(),
        contents: 0.into(),
        trace_file_firstline: 0.into(),
    }
}

fn entry(
    space: AddrSpace,
    raw: bool,
    lo: Addr,
    hi: Addr,
    contents: Off,
    firstline: u32,
) -> MemoryPayload {
    MemoryPayload {
        space: (space as u8).into(),
        raw: (raw as u8).into(),
        lo: lo.into(),
        hi: hi.into(),
        contents: contents.into(),
        trace_file_firstline: firstline.into(),
    }
}

/// Root of the sub-tree referenced by a non-raw entry, read through its
/// root cell.
fn subtree_root(arena: &impl ArenaRead, e: &MemoryPayload) -> Off {
    debug_assert!(!e.is_raw());
    arena.get::<DiskU64>(e.contents()).get()
}

/// Visit, in address order, every entry of `space` overlapping `[lo, hi]`.
fn for_each_overlap(
    arena: &impl ArenaRead,
    off: Off,
    target: &MemoryPayload,
    f: &mut impl FnMut(&MemoryPayload),
) {
    use std::cmp::Ordering;
    if off == 0 {
        return;
    }
    let node = MEMTREE.read(arena, off);
    match node.payload.compare(target) {
        Ordering::Less => for_each_overlap(arena, node.right, target, f),
        Ordering::Greater => for_each_overlap(arena, node.left, target, f),
        Ordering::Equal => {
            for_each_overlap(arena, node.left, target, f);
            f(&node.payload);
            for_each_overlap(arena, node.right, target, f);
        }
    }
}

/// Sub-tree counterpart of [`for_each_overlap`].
fn for_each_sub_overlap(
    arena: &impl ArenaRead,
    off: Off,
    target: &MemorySubPayload,
    f: &mut impl FnMut(&MemorySubPayload),
) {
    use std::cmp::Ordering;
    if off == 0 {
        return;
    }
    let node = MEMSUBTREE.read(arena, off);
    match node.payload.compare(target) {
        Ordering::Less => for_each_sub_overlap(arena, node.right, target, f),
        Ordering::Greater => for_each_sub_overlap(arena, node.left, target, f),
        Ordering::Equal => {
            for_each_sub_overlap(arena, node.left, target, f);
            f(&node.payload);
            for_each_sub_overlap(arena, node.right, target, f);
        }
    }
}

fn sub_probe(lo: Addr, hi: Addr) -> MemorySubPayload {
    MemorySubPayload {
        lo: lo.into(),
        hi: hi.into(),
        contents: 0.into(),
    }
}

/// Read `out.len()` bytes at `addr`, marking each byte of `defined` 1 or 0
/// according to whether its value is known at this instant. Returns the
/// newest first-line among the entries overlapping the request, or 0 when
/// nothing overlaps.
pub fn getmem(
    arena: &impl ArenaRead,
    memroot: Off,
    space: AddrSpace,
    addr: Addr,
    out: &mut [u8],
    defined: &mut [u8],
) -> u32 {
    assert_eq!(out.len(), defined.len());
    defined.fill(0);
    if out.is_empty() || memroot == 0 {
        return 0;
    }
    let hi = addr + out.len() as u64 - 1;
    let target = probe(space, addr, hi);
    let mut latest = 0u32;

    for_each_overlap(arena, memroot, &target, &mut |e| {
        latest = latest.max(e.firstline());
        let clip_lo = e.lo().max(addr);
        let clip_hi = e.hi().min(hi);
        if e.is_raw() {
            let n = (clip_hi - clip_lo + 1) as usize;
            let dst = (clip_lo - addr) as usize;
            let src = e.contents() + (clip_lo - e.lo());
            out[dst..dst + n].copy_from_slice(arena.bytes(src, n));
            defined[dst..dst + n].fill(1);
        } else {
            let subroot = subtree_root(arena, e);
            for_each_sub_overlap(arena, subroot, &sub_probe(clip_lo, clip_hi), &mut |sub| {
                let slo = sub.lo().max(clip_lo);
                let shi = sub.hi().min(clip_hi);
                let n = (shi - slo + 1) as usize;
                let dst = (slo - addr) as usize;
                let src = sub.contents() + (slo - sub.lo());
                out[dst..dst + n].copy_from_slice(arena.bytes(src, n));
                defined[dst..dst + n].fill(1);
            });
        }
    });
    latest
}

/// Find the first defined chunk inside `[addr, addr + size - 1]`, in
/// address order. Used for diffing and partial reads.
pub fn getmem_next<'a>(
    arena: &'a impl ArenaRead,
    memroot: Off,
    space: AddrSpace,
    addr: Addr,
    size: u64,
) -> Option<DefinedRegion<'a>> {
    if size == 0 || memroot == 0 {
        return None;
    }
    let hi = addr + size - 1;
    next_defined(arena, memroot, &probe(space, addr, hi), addr, hi)
}

fn next_defined<'a>(
    arena: &'a impl ArenaRead,
    off: Off,
    target: &MemoryPayload,
    addr: Addr,
    hi: Addr,
) -> Option<DefinedRegion<'a>> {
    use std::cmp::Ordering;
    if off == 0 {
        return None;
    }
    let node = MEMTREE.read(arena, off);
    match node.payload.compare(target) {
        Ordering::Less => next_defined(arena, node.right, target, addr, hi),
        Ordering::Greater => next_defined(arena, node.left, target, addr, hi),
        Ordering::Equal => {
            if let Some(found) = next_defined(arena, node.left, target, addr, hi) {
                return Some(found);
            }
            let e = node.payload;
            let clip_lo = e.lo().max(addr);
            let clip_hi = e.hi().min(hi);
            if e.is_raw() {
                let len = clip_hi - clip_lo + 1;
                let src = e.contents() + (clip_lo - e.lo());
                return Some(DefinedRegion {
                    data: arena.bytes(src, len as usize),
                    addr: clip_lo,
                    len,
                    line: e.firstline(),
                });
            }
            let subroot = subtree_root(arena, &e);
            if let Some(found) =
                next_sub_defined(arena, subroot, clip_lo, clip_hi, e.firstline())
            {
                return Some(found);
            }
            next_defined(arena, node.right, target, addr, hi)
        }
    }
}

fn next_sub_defined<'a>(
    arena: &'a impl ArenaRead,
    off: Off,
    clip_lo: Addr,
    clip_hi: Addr,
    line: u32,
) -> Option<DefinedRegion<'a>> {
    use std::cmp::Ordering;
    if off == 0 {
        return None;
    }
    let node = MEMSUBTREE.read(arena, off);
    match node.payload.compare(&sub_probe(clip_lo, clip_hi)) {
        Ordering::Less => next_sub_defined(arena, node.right, clip_lo, clip_hi, line),
        Ordering::Greater => next_sub_defined(arena, node.left, clip_lo, clip_hi, line),
        Ordering::Equal => {
            if let Some(found) = next_sub_defined(arena, node.left, clip_lo, clip_hi, line) {
                return Some(found);
            }
            let sub = node.payload;
            let slo = sub.lo().max(clip_lo);
            let shi = sub.hi().min(clip_hi);
            let len = shi - slo + 1;
            let src = sub.contents() + (slo - sub.lo());
            Some(DefinedRegion {
                data: arena.bytes(src, len as usize),
                addr: slo,
                len,
                line,
            })
        }
    }
}

/// Find the interval of the nearest entry, scanning addresses upward from
/// `addr` for `sign > 0` or downward for `sign < 0`, that was modified
/// strictly after `minline` (respectively strictly before, for the downward
/// scan). The `latest` annotation prunes whole subtrees in the upward
/// direction.
pub fn find_next_mod(
    arena: &impl ArenaRead,
    memroot: Off,
    space: AddrSpace,
    addr: Addr,
    minline: u32,
    sign: i32,
) -> Option<(Addr, Addr)> {
    if memroot == 0 {
        return None;
    }
    if sign > 0 {
        next_mod_up(arena, memroot, &probe(space, addr, Addr::MAX), minline)
    } else {
        next_mod_down(arena, memroot, &probe(space, 0, addr), minline)
    }
}

fn next_mod_up(
    arena: &impl ArenaRead,
    off: Off,
    target: &MemoryPayload,
    minline: u32,
) -> Option<(Addr, Addr)> {
    use std::cmp::Ordering;
    if off == 0 {
        return None;
    }
    let node = MEMTREE.read(arena, off);
    if node.annotation.latest.get() <= minline {
        return None;
    }
    match node.payload.compare(target) {
        Ordering::Less => next_mod_up(arena, node.right, target, minline),
        Ordering::Greater => next_mod_up(arena, node.left, target, minline),
        Ordering::Equal => {
            if let Some(found) = next_mod_up(arena, node.left, target, minline) {
                return Some(found);
            }
            if node.payload.firstline() > minline {
                return Some((node.payload.lo(), node.payload.hi()));
            }
            next_mod_up(arena, node.right, target, minline)
        }
    }
}

fn next_mod_down(
    arena: &impl ArenaRead,
    off: Off,
    target: &MemoryPayload,
    minline: u32,
) -> Option<(Addr, Addr)> {
    use std::cmp::Ordering;
    if off == 0 {
        return None;
    }
    // `latest` is a maximum, so it cannot prune a search for old entries.
    let node = MEMTREE.read(arena, off);
    match node.payload.compare(target) {
        Ordering::Less => next_mod_down(arena, node.right, target, minline),
        Ordering::Greater => next_mod_down(arena, node.left, target, minline),
        Ordering::Equal => {
            if let Some(found) = next_mod_down(arena, node.right, target, minline) {
                return Some(found);
            }
            if node.payload.firstline() < minline {
                return Some((node.payload.lo(), node.payload.hi()));
            }
            next_mod_down(arena, node.left, target, minline)
        }
    }
}

/// The indexer's starting memory tree: one entry covering the whole memory
/// address space, backed by an empty sub-tree. Reads of memory that was
/// initialised before tracing began fill this sub-tree in retroactively, so
/// even the very first instant can show that data.
pub fn initial_root(arena: &mut Arena) -> Result<Off> {
    let cell = arena.append_record(&DiskU64::from(0))?;
    MEMTREE.insert(
        arena,
        0,
        entry(AddrSpace::Memory, false, 0, Addr::MAX, cell, 0),
    )
}

/// Split any entry straddling the `lo` or `hi` edge of `[lo, hi]`, so every
/// remaining overlap of the interval is fully contained in it. Raw residues
/// get fresh byte blocks holding the appropriate sub-slices; sub-tree
/// residues keep pointing at the same root cell, which is why sub-trees are
/// indexed by absolute address.
pub fn split_at(
    arena: &mut Arena,
    mut root: Off,
    space: AddrSpace,
    lo: Addr,
    hi: Addr,
) -> Result<Off> {
    if let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, lo, lo)) {
        if e.lo() < lo {
            root = split_entry(arena, root, &e, lo)?;
        }
    }
    if let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, hi, hi)) {
        if e.hi() > hi {
            root = split_entry(arena, root, &e, hi + 1)?;
        }
    }
    Ok(root)
}

/// Split `e` into `[e.lo, at - 1]` and `[at, e.hi]`.
fn split_entry(arena: &mut Arena, root: Off, e: &MemoryPayload, at: Addr) -> Result<Off> {
    debug_assert!(e.lo() < at && at <= e.hi());
    let (root, removed) = MEMTREE.remove(arena, root, e)?;
    let space = removed.space();

    let (left, right) = if removed.is_raw() {
        let head_len = (at - removed.lo()) as usize;
        let tail_len = (removed.hi() - at + 1) as usize;
        // Copy before allocating: growth can move the mapping.
        let head = arena.bytes(removed.contents(), head_len).to_vec();
        let tail = arena
            .bytes(removed.contents() + head_len as u64, tail_len)
            .to_vec();
        let head_block = arena.append(&head)?;
        let tail_block = arena.append(&tail)?;
        (
            entry(space, true, removed.lo(), at - 1, head_block, removed.firstline()),
            entry(space, true, at, removed.hi(), tail_block, removed.firstline()),
        )
    } else {
        // Both residues keep reading the one sub-tree through its cell.
        (
            entry(space, false, removed.lo(), at - 1, removed.contents(), removed.firstline()),
            entry(space, false, at, removed.hi(), removed.contents(), removed.firstline()),
        )
    };

    let root = MEMTREE.insert(arena, root, left)?;
    MEMTREE.insert(arena, root, right)
}

/// Apply one write of `bytes` at `addr`, performed by the event whose first
/// line is `line`. Returns the new memory root; the old root still
/// describes the pre-write state.
pub fn write(
    arena: &mut Arena,
    mut root: Off,
    space: AddrSpace,
    addr: Addr,
    bytes: &[u8],
    line: u32,
) -> Result<Off> {
    debug_assert!(!bytes.is_empty());
    let hi = addr + bytes.len() as u64 - 1;

    // An exactly matching entry can be replaced without restructuring.
    if let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, addr, hi)) {
        if e.lo() == addr && e.hi() == hi {
            let block = arena.append(bytes)?;
            return MEMTREE.update(arena, root, entry(space, true, addr, hi, block, line));
        }
    }

    root = split_at(arena, root, space, addr, hi)?;
    while let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, addr, hi)) {
        debug_assert!(e.lo() >= addr && e.hi() <= hi);
        (root, _) = MEMTREE.remove(arena, root, &e)?;
    }
    let block = arena.append(bytes)?;
    MEMTREE.insert(arena, root, entry(space, true, addr, hi, block, line))
}

/// Record that `[lo, hi]` now holds data whose value is not visible in the
/// trace (a semihosting transfer, typically). The region gets a fresh empty
/// sub-tree; later reads from it are filled in with hindsight.
pub fn insert_unknown_region(
    arena: &mut Arena,
    mut root: Off,
    space: AddrSpace,
    lo: Addr,
    hi: Addr,
    line: u32,
) -> Result<Off> {
    root = split_at(arena, root, space, lo, hi)?;
    while let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, lo, hi)) {
        (root, _) = MEMTREE.remove(arena, root, &e)?;
    }
    let cell = arena.append_record(&DiskU64::from(0))?;
    MEMTREE.insert(arena, root, entry(space, false, lo, hi, cell, line))
}

/// Reconcile an observed read of `bytes` at `addr` with the current state.
///
/// Sub-ranges that are already defined are checked against the observation;
/// undefined sub-ranges covered by a sub-tree-backed entry are written into
/// that sub-tree, which makes them visible from every memory root minted
/// since the entry appeared. The memory tree itself is not restructured, so
/// no new root is produced.
pub fn fill_in(
    arena: &mut Arena,
    root: Off,
    space: AddrSpace,
    addr: Addr,
    bytes: &[u8],
    read_line: u32,
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut current = vec![0u8; bytes.len()];
    let mut defined = vec![0u8; bytes.len()];
    getmem(arena, root, space, addr, &mut current, &mut defined);

    for (i, (&d, (&observed, &recorded))) in defined
        .iter()
        .zip(bytes.iter().zip(current.iter()))
        .enumerate()
    {
        if d != 0 && observed != recorded {
            warn!(
                "line {read_line}: read of {:#x} observed {observed:#04x} \
                 but {recorded:#04x} was recorded",
                addr + i as u64
            );
        }
    }

    let hi = addr + bytes.len() as u64 - 1;
    let mut i = 0usize;
    while i < bytes.len() {
        if defined[i] != 0 {
            i += 1;
            continue;
        }
        let run_lo = addr + i as u64;
        let Some((_, e)) = MEMTREE.find(arena, root, &probe(space, run_lo, run_lo)) else {
            // Nothing covers this address; there is nowhere to record the
            // observation retroactively.
            i += 1;
            continue;
        };
        if e.is_raw() {
            i += 1;
            continue;
        }
        // Extend the run as far as both the undefined mask and this entry
        // allow, then insert one block into the entry's sub-tree.
        let mut run_hi = run_lo;
        while run_hi < hi && run_hi < e.hi() && defined[(run_hi - addr) as usize + 1] == 0 {
            run_hi += 1;
        }
        let block_bytes =
            bytes[(run_lo - addr) as usize..=(run_hi - addr) as usize].to_vec();
        let block = arena.append(&block_bytes)?;
        let cell = e.contents();
        let subroot = arena.get::<DiskU64>(cell).get();
        let new_subroot = MEMSUBTREE.insert(
            arena,
            subroot,
            MemorySubPayload {
                lo: run_lo.into(),
                hi: run_hi.into(),
                contents: block.into(),
            },
        )?;
        arena.write_record(cell, &DiskU64::from(new_subroot));
        i = (run_hi - addr) as usize + 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_arena() -> Arena {
        let file = tempfile::tempfile().unwrap();
        Arena::from_file(file, "memtree-test.idx".into()).unwrap()
    }

    fn read(arena: &Arena, root: Off, addr: Addr, len: usize) -> (Vec<u8>, Vec<u8>, u32) {
        let mut out = vec![0u8; len];
        let mut defined = vec![0u8; len];
        let line = getmem(arena, root, AddrSpace::Memory, addr, &mut out, &mut defined);
        (out, defined, line)
    }

    #[test]
    fn write_then_read_back() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x1000, &[0xaa], 10).unwrap();

        let (out, defined, line) = read(&arena, root, 0x1000, 1);
        assert_eq!(out, [0xaa]);
        assert_eq!(defined, [1]);
        assert_eq!(line, 10);
    }

    #[test]
    fn overwrite_preserves_old_root() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x1000, &[0xaa], 10).unwrap();
        let at_line_15 = root;
        root = write(&mut arena, root, AddrSpace::Memory, 0x1000, &[0xbb], 20).unwrap();

        let (out, _, line) = read(&arena, at_line_15, 0x1000, 1);
        assert_eq!((out[0], line), (0xaa, 10));
        let (out, _, line) = read(&arena, root, 0x1000, 1);
        assert_eq!((out[0], line), (0xbb, 20));
    }

    #[test]
    fn partial_overwrite_splits_entries() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(
            &mut arena,
            root,
            AddrSpace::Memory,
            0x100,
            &[1, 2, 3, 4, 5, 6, 7, 8],
            5,
        )
        .unwrap();
        // Overwrite the middle four bytes.
        root = write(&mut arena, root, AddrSpace::Memory, 0x102, &[9, 9, 9, 9], 6).unwrap();

        let (out, defined, line) = read(&arena, root, 0x100, 8);
        assert_eq!(out, [1, 2, 9, 9, 9, 9, 7, 8]);
        assert_eq!(defined, [1; 8]);
        assert_eq!(line, 6);

        // The residues report the original writer's line.
        let (_, _, line) = read(&arena, root, 0x100, 2);
        assert_eq!(line, 5);
    }

    #[test]
    fn unwritten_memory_is_undefined() {
        let mut arena = test_arena();
        let root = initial_root(&mut arena).unwrap();
        let (_, defined, line) = read(&arena, root, 0x4000, 4);
        assert_eq!(defined, [0; 4]);
        assert_eq!(line, 0);
    }

    #[test]
    fn registers_and_memory_do_not_collide() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Register, 0x10, &[1, 2, 3, 4], 3).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x10, &[5, 6, 7, 8], 4).unwrap();

        let mut out = vec![0u8; 4];
        let mut defined = vec![0u8; 4];
        getmem(&arena, root, AddrSpace::Register, 0x10, &mut out, &mut defined);
        assert_eq!(out, [1, 2, 3, 4]);
        let (mem_out, _, _) = read(&arena, root, 0x10, 4);
        assert_eq!(mem_out, [5, 6, 7, 8]);
    }

    #[test]
    fn getmem_next_finds_first_defined_chunk() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x108, &[0x11, 0x22], 7).unwrap();

        let region = getmem_next(&arena, root, AddrSpace::Memory, 0x100, 0x20).unwrap();
        assert_eq!(region.addr, 0x108);
        assert_eq!(region.len, 2);
        assert_eq!(region.data, &[0x11, 0x22]);
        assert_eq!(region.line, 7);

        assert!(getmem_next(&arena, root, AddrSpace::Memory, 0x200, 0x10).is_none());
    }

    #[test]
    fn find_next_mod_respects_line_cutoff() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x1000, &[0xaa], 10).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x1000, &[0xbb], 20).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x2000, &[0xcc], 12).unwrap();

        // Modified after line 15, at or above 0x1000: the 0x1000 entry.
        assert_eq!(
            find_next_mod(&arena, root, AddrSpace::Memory, 0x1000, 15, 1),
            Some((0x1000, 0x1000))
        );
        // Modified after line 15, above 0x1001: nothing (0x2000 was line 12).
        assert_eq!(
            find_next_mod(&arena, root, AddrSpace::Memory, 0x1001, 15, 1),
            None
        );
        // Modified before line 15, at or below 0x2000: the 0x2000 entry.
        assert_eq!(
            find_next_mod(&arena, root, AddrSpace::Memory, 0x2000, 15, -1),
            Some((0x2000, 0x2000))
        );
    }

    #[test]
    fn fill_in_is_retroactive() {
        let mut arena = test_arena();
        let m1 = initial_root(&mut arena).unwrap();
        let m2 = write(&mut arena, m1, AddrSpace::Memory, 0x9000, &[0xff], 4).unwrap();
        let m3 = write(&mut arena, m2, AddrSpace::Memory, 0x9001, &[0xfe], 5).unwrap();

        // An observed read populates the pre-trace sub-tree.
        fill_in(&mut arena, m3, AddrSpace::Memory, 0x2000, &[1, 2, 3, 4], 6).unwrap();

        for root in [m1, m2, m3] {
            let (out, defined, _) = read(&arena, root, 0x2000, 4);
            assert_eq!(defined, [1; 4]);
            assert_eq!(out, [1, 2, 3, 4]);
        }
    }

    #[test]
    fn unknown_region_then_fill_in() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        root = write(&mut arena, root, AddrSpace::Memory, 0x2000, &[9; 0x20], 50).unwrap();
        // Semihosting replaces the region with to-be-discovered contents.
        root =
            insert_unknown_region(&mut arena, root, AddrSpace::Memory, 0x2000, 0x201f, 100)
                .unwrap();
        let at_region = root;
        root = write(&mut arena, root, AddrSpace::Memory, 0x3000, &[1], 150).unwrap();

        let (_, defined, _) = read(&arena, at_region, 0x2008, 8);
        assert_eq!(defined, [0; 8]);

        fill_in(
            &mut arena,
            root,
            AddrSpace::Memory,
            0x2008,
            &[1, 2, 3, 4, 5, 6, 7, 8],
            200,
        )
        .unwrap();

        let (out, defined, line) = read(&arena, at_region, 0x2008, 8);
        assert_eq!(defined, [1; 8]);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(line, 100);
    }

    #[test]
    fn split_keeps_disjoint_intervals() {
        let mut arena = test_arena();
        let mut root = initial_root(&mut arena).unwrap();
        for i in 0..16u64 {
            root = write(
                &mut arena,
                root,
                AddrSpace::Memory,
                0x1000 + i * 3,
                &[i as u8; 5],
                (i + 1) as u32,
            )
            .unwrap();
        }

        // Walk all memory entries and check pairwise disjointness.
        let mut prev_hi: Option<Addr> = None;
        MEMTREE.walk(&arena, root, &mut |_, node| {
            if node.payload.space() == AddrSpace::Memory {
                if let Some(prev) = prev_hi {
                    assert!(node.payload.lo() > prev);
                }
                prev_hi = Some(node.payload.hi());
            }
        });
    }
}
