//! Call-depth arrays over the sequential-order tree.
//!
//! The sequential-order tree doubles as a layered range tree: every node is
//! annotated with a cumulative frequency table sorted by call depth, and each
//! table entry cross-links to the corresponding entries of the child nodes'
//! tables. A query then needs one binary search in the root's table and
//! constant work per level below it, which is what keeps two-dimensional
//! questions like "how many lines at depths [a, b) precede the k-th line at
//! depths [c, d)?" logarithmic.
//!
//! Maintaining the tables under AVL rebalancing would be expensive, so the
//! streaming pass leaves the annotation zeroed and [`build_call_depth_arrays`]
//! fills every node's table in one depth-first pass after the tree has its
//! final shape. That patch is the only in-place node write in the system.

use std::collections::BTreeSet;

use crate::arena::{Arena, ArenaRead};
use crate::avl::AvlTree;
use crate::disk::Off;
use crate::error::Result;
use crate::format::{
    CallDepthArrayEntry, SeqOrderAnnotation, SeqOrderPayload, SENTINEL_DEPTH, SEQTREE,
};

type SeqTree = AvlTree<SeqOrderPayload, SeqOrderAnnotation>;

/// Half-open range of call depths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthRange {
    pub lo: u32,
    pub hi: u32,
}

impl DepthRange {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    fn contains(&self, depth: u32) -> bool {
        self.lo <= depth && depth < self.hi
    }

    fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }
}

/// View of one node's call-depth array.
fn array<'a>(arena: &'a impl ArenaRead, ann: &SeqOrderAnnotation) -> &'a [CallDepthArrayEntry] {
    let len = ann.call_depth_arraylen.get() as usize;
    let bytes = arena.bytes(
        ann.call_depth_array.get(),
        len * std::mem::size_of::<CallDepthArrayEntry>(),
    );
    bytemuck::cast_slice(bytes)
}

/// Index of the first entry with depth >= `depth`. The sentinel entry
/// guarantees one exists for any depth <= [`SENTINEL_DEPTH`].
fn entry_at(arr: &[CallDepthArrayEntry], depth: u32) -> usize {
    arr.partition_point(|e| e.call_depth.get() < depth)
}

/// A pair of array indices bracketing a depth range within one node's
/// array. Descending to a child turns into two link lookups.
#[derive(Clone, Copy)]
struct Cursor {
    ilo: usize,
    ihi: usize,
}

impl Cursor {
    fn at_root(arr: &[CallDepthArrayEntry], range: DepthRange) -> Self {
        Self {
            ilo: entry_at(arr, range.lo.min(SENTINEL_DEPTH)),
            ihi: entry_at(arr, range.hi.min(SENTINEL_DEPTH)),
        }
    }

    fn lines(&self, arr: &[CallDepthArrayEntry]) -> u32 {
        arr[self.ihi].cumulative_lines.get() - arr[self.ilo].cumulative_lines.get()
    }

    fn left(&self, arr: &[CallDepthArrayEntry]) -> Self {
        Self {
            ilo: arr[self.ilo].left_link.get() as usize,
            ihi: arr[self.ihi].left_link.get() as usize,
        }
    }

    fn right(&self, arr: &[CallDepthArrayEntry]) -> Self {
        Self {
            ilo: arr[self.ilo].right_link.get() as usize,
            ihi: arr[self.ihi].right_link.get() as usize,
        }
    }
}

/// Build and patch in the call-depth array of every node reachable from
/// `seqroot`. Children are processed first so each merge reads finished
/// child arrays back out of the arena.
pub fn build_call_depth_arrays(arena: &mut Arena, seqroot: Off) -> Result<()> {
    build_node(arena, seqroot)
}

fn build_node(arena: &mut Arena, off: Off) -> Result<()> {
    if off == 0 {
        return Ok(());
    }
    let node = SEQTREE.read(arena, off);
    build_node(arena, node.left)?;
    build_node(arena, node.right)?;

    let left = read_array(arena, node.left);
    let right = read_array(arena, node.right);
    let merged = merge_arrays(
        &left,
        &right,
        node.payload.call_depth(),
        node.payload.lines(),
    );

    let array_off = arena.append(bytemuck::cast_slice(&merged))?;
    let annotation = SeqOrderAnnotation {
        call_depth_array: array_off.into(),
        call_depth_arraylen: (merged.len() as u32).into(),
    };
    arena.write_record(SeqTree::annotation_field_off(off), &annotation);
    Ok(())
}

fn read_array(arena: &Arena, off: Off) -> Vec<CallDepthArrayEntry> {
    if off == 0 {
        return Vec::new();
    }
    let node = SEQTREE.read(arena, off);
    array(arena, &node.annotation).to_vec()
}

/// Merge two child arrays with the node's own (depth, line-count)
/// contribution.
///
/// The result has one entry per distinct depth present in the subtree plus
/// the sentinel; entries are strictly increasing in depth; the first entry
/// always carries zero counts (it names the lowest depth present, which is
/// where counting starts); a depth that is missing shares the counts of the
/// next greater present entry.
fn merge_arrays(
    left: &[CallDepthArrayEntry],
    right: &[CallDepthArrayEntry],
    own_depth: u32,
    own_lines: u32,
) -> Vec<CallDepthArrayEntry> {
    let mut depths = BTreeSet::new();
    for e in left.iter().chain(right) {
        if e.call_depth.get() != SENTINEL_DEPTH {
            depths.insert(e.call_depth.get());
        }
    }
    depths.insert(own_depth);

    let lookup = |arr: &[CallDepthArrayEntry], depth: u32| -> (u32, u32, u32) {
        if arr.is_empty() {
            return (0, 0, 0);
        }
        let i = entry_at(arr, depth);
        (
            i as u32,
            arr[i].cumulative_insns.get(),
            arr[i].cumulative_lines.get(),
        )
    };

    let mut out = Vec::with_capacity(depths.len() + 1);
    for depth in depths.into_iter().chain(std::iter::once(SENTINEL_DEPTH)) {
        let (li, l_insns, l_lines) = lookup(left, depth);
        let (ri, r_insns, r_lines) = lookup(right, depth);
        let own_below = own_depth < depth;
        out.push(CallDepthArrayEntry {
            call_depth: depth.into(),
            cumulative_insns: (l_insns + r_insns + own_below as u32).into(),
            cumulative_lines: (l_lines + r_lines + if own_below { own_lines } else { 0 }).into(),
            left_link: li.into(),
            right_link: ri.into(),
        });
    }
    out
}

/// Line count of the whole tree within `range`.
pub fn total_lines(arena: &impl ArenaRead, seqroot: Off, range: DepthRange) -> u32 {
    if seqroot == 0 || range.is_empty() {
        return 0;
    }
    let node = SEQTREE.read(arena, seqroot);
    let arr = array(arena, &node.annotation);
    Cursor::at_root(arr, range).lines(arr)
}

/// Find the `line`-th trace line (0-based) whose call depth lies in
/// `range_in`, and return how many lines before it have a call depth in
/// `range_out`. `None` when fewer than `line + 1` lines exist in
/// `range_in`.
pub fn translate(
    arena: &impl ArenaRead,
    seqroot: Off,
    line: u32,
    range_in: DepthRange,
    range_out: DepthRange,
) -> Option<u32> {
    if seqroot == 0 || range_in.is_empty() {
        return None;
    }

    let mut off = seqroot;
    let mut node = SEQTREE.read(arena, off);
    let mut arr = array(arena, &node.annotation);
    let mut c_in = Cursor::at_root(arr, range_in);
    let mut c_out = Cursor::at_root(arr, range_out);

    if line >= c_in.lines(arr) {
        return None;
    }

    let mut k = line;
    let mut acc = 0u32;
    loop {
        let (left_in, left_out) = if node.left != 0 {
            let lnode = SEQTREE.read(arena, node.left);
            let larr = array(arena, &lnode.annotation);
            (c_in.left(arr).lines(larr), c_out.left(arr).lines(larr))
        } else {
            (0, 0)
        };

        if k < left_in {
            let (n_in, n_out) = (c_in.left(arr), c_out.left(arr));
            off = node.left;
            node = SEQTREE.read(arena, off);
            arr = array(arena, &node.annotation);
            c_in = n_in;
            c_out = n_out;
            continue;
        }
        k -= left_in;
        acc += left_out;

        let depth = node.payload.call_depth();
        let own_in = if range_in.contains(depth) {
            node.payload.lines()
        } else {
            0
        };
        if k < own_in {
            if range_out.contains(depth) {
                acc += k;
            }
            return Some(acc);
        }
        k -= own_in;
        if range_out.contains(depth) {
            acc += node.payload.lines();
        }

        let (n_in, n_out) = (c_in.right(arr), c_out.right(arr));
        off = node.right;
        debug_assert_ne!(off, 0, "line index inside subtree totals but not found");
        node = SEQTREE.read(arena, off);
        arr = array(arena, &node.annotation);
        c_in = n_in;
        c_out = n_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_payload(firstline: u32, lines: u32, depth: u32) -> SeqOrderPayload {
        SeqOrderPayload {
            mod_time: (firstline as u64).into(),
            pc: 0x8000.into(),
            trace_file_pos: 0.into(),
            trace_file_len: 0.into(),
            trace_file_firstline: firstline.into(),
            trace_file_lines: lines.into(),
            memory_root: 0.into(),
            call_depth: depth.into(),
        }
    }

    /// Build a tree from (lines, depth) pairs and run the post-pass.
    fn build(shape: &[(u32, u32)]) -> (Arena, Off) {
        let file = tempfile::tempfile().unwrap();
        let mut arena = Arena::from_file(file, "lrt-test.idx".into()).unwrap();
        let mut root = 0;
        let mut firstline = 1;
        for &(lines, depth) in shape {
            root = SEQTREE
                .insert(&mut arena, root, seq_payload(firstline, lines, depth))
                .unwrap();
            firstline += lines;
        }
        build_call_depth_arrays(&mut arena, root).unwrap();
        (arena, root)
    }

    /// Reference implementation over the expanded line list.
    fn model(shape: &[(u32, u32)]) -> Vec<u32> {
        let mut line_depths = Vec::new();
        for &(lines, depth) in shape {
            for _ in 0..lines {
                line_depths.push(depth);
            }
        }
        line_depths
    }

    fn model_translate(
        line_depths: &[u32],
        k: u32,
        rin: DepthRange,
        rout: DepthRange,
    ) -> Option<u32> {
        let mut seen_in = 0;
        for (i, &d) in line_depths.iter().enumerate() {
            if rin.contains(d) {
                if seen_in == k {
                    let before = line_depths[..i]
                        .iter()
                        .filter(|&&d| rout.contains(d))
                        .count();
                    return Some(before as u32);
                }
                seen_in += 1;
            }
        }
        None
    }

    #[test]
    fn leaf_array_shape() {
        let (arena, root) = build(&[(3, 2)]);
        let node = SEQTREE.read(&arena, root);
        let arr = array(&arena, &node.annotation);
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0].call_depth.get(), 2);
        assert_eq!(arr[0].cumulative_insns.get(), 0);
        assert_eq!(arr[0].cumulative_lines.get(), 0);
        assert_eq!(arr[1].call_depth.get(), SENTINEL_DEPTH);
        assert_eq!(arr[1].cumulative_insns.get(), 1);
        assert_eq!(arr[1].cumulative_lines.get(), 3);
    }

    #[test]
    fn root_totals_match_brute_force() {
        let shape: Vec<(u32, u32)> = vec![
            (1, 0),
            (2, 1),
            (1, 2),
            (3, 2),
            (1, 1),
            (4, 0),
            (2, 3),
            (1, 1),
            (1, 0),
        ];
        let (arena, root) = build(&shape);
        let lines = model(&shape);

        for lo in 0..5 {
            for hi in lo..6 {
                let range = DepthRange::new(lo, hi);
                let expect = lines.iter().filter(|&&d| range.contains(d)).count() as u32;
                assert_eq!(total_lines(&arena, root, range), expect, "range {lo}..{hi}");
            }
        }
    }

    #[test]
    fn subtree_totals_hold_at_every_node() {
        let shape: Vec<(u32, u32)> =
            (0..50).map(|i| (1 + (i % 3), (i * 7 % 5))).collect();
        let (arena, root) = build(&shape);

        // For every node, the difference of the bracketing entries must
        // equal a brute-force count over the subtree, in both columns.
        fn check(arena: &Arena, off: Off) -> Vec<(u32, u32)> {
            if off == 0 {
                return Vec::new();
            }
            let node = SEQTREE.read(arena, off);
            let mut items = check(arena, node.left);
            items.push((node.payload.call_depth(), node.payload.lines()));
            items.extend(check(arena, node.right));

            let arr = array(arena, &node.annotation);
            for lo in 0..6 {
                for hi in lo..7 {
                    let range = DepthRange::new(lo, hi);
                    let cursor = Cursor::at_root(arr, range);
                    let insns = arr[cursor.ihi].cumulative_insns.get()
                        - arr[cursor.ilo].cumulative_insns.get();
                    let expect_insns = items
                        .iter()
                        .filter(|(d, _)| range.contains(*d))
                        .count() as u32;
                    let expect_lines: u32 = items
                        .iter()
                        .filter(|(d, _)| range.contains(*d))
                        .map(|(_, l)| *l)
                        .sum();
                    assert_eq!(insns, expect_insns);
                    assert_eq!(cursor.lines(arr), expect_lines);
                }
            }
            items
        }
        check(&arena, root);
    }

    #[test]
    fn translate_matches_brute_force() {
        let shape: Vec<(u32, u32)> =
            (0..40).map(|i| (1 + (i % 4), (i * 3 % 4))).collect();
        let (arena, root) = build(&shape);
        let lines = model(&shape);

        for lo_in in 0..4 {
            let rin = DepthRange::new(lo_in, lo_in + 2);
            let rout = DepthRange::new(1, 3);
            let total = lines.iter().filter(|&&d| rin.contains(d)).count() as u32;
            for k in 0..total + 2 {
                assert_eq!(
                    translate(&arena, root, k, rin, rout),
                    model_translate(&lines, k, rin, rout),
                    "rin {rin:?} k {k}"
                );
            }
        }
    }

    #[test]
    fn identity_translation_counts_preceding_lines() {
        let shape = vec![(1, 0), (1, 0), (1, 0), (1, 0)];
        let (arena, root) = build(&shape);
        let all = DepthRange::new(0, 1);
        assert_eq!(translate(&arena, root, 0, all, all), Some(0));
        assert_eq!(translate(&arena, root, 3, all, all), Some(3));
        assert_eq!(translate(&arena, root, 4, all, all), None);
    }
}
