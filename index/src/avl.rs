//! Persistent AVL trees over the disk arena.
//!
//! Nodes live in the arena as `(payload, annotation, left, right, height)`
//! records and are never modified once written (the sequential-order tree's
//! annotation slot, patched by the call-depth post-pass, is the single
//! documented exception). Every mutating operation clones the nodes on the
//! path it touches and returns a new root; any root handed out earlier keeps
//! describing exactly the tree it described then. This is what lets a memory
//! tree root be stored per trace instant while sharing almost all nodes with
//! its neighbours.

use std::cmp::Ordering;
use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};

use crate::arena::{Arena, ArenaRead};
use crate::disk::{DiskU32, DiskU64, Off};
use crate::error::Result;

/// Payload stored in a tree node. `compare` is the tree's sorting criterion;
/// interval payloads may report `Equal` for any overlap.
pub trait TreePayload: Pod {
    fn compare(&self, other: &Self) -> Ordering;
}

/// Summary of a whole subtree, maintained at every node.
///
/// A node's annotation is `combine(left, from_payload(payload))` combined
/// with `right`, recomputed whenever a node is cloned; it is a pure function
/// of the subtree and never a place for mutable bookkeeping.
pub trait Annotation<P>: Pod + Default {
    fn from_payload(payload: &P) -> Self;
    fn combine(lhs: &Self, rhs: &Self) -> Self;
}

/// Annotation for trees that carry none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NoAnnotation;

unsafe impl Zeroable for NoAnnotation {}
unsafe impl Pod for NoAnnotation {}

impl<P> Annotation<P> for NoAnnotation {
    fn from_payload(_: &P) -> Self {
        NoAnnotation
    }

    fn combine(_: &Self, _: &Self) -> Self {
        NoAnnotation
    }
}

/// An owned copy of one node's record.
///
/// Reads always copy the record out of the arena: the writable arena may
/// remap itself on growth, so references into it must not be held across an
/// allocation.
#[derive(Clone, Copy, Debug)]
pub struct NodeData<P, A> {
    pub payload: P,
    pub annotation: A,
    pub left: Off,
    pub right: Off,
    pub height: u32,
}

/// Stateless handle for one tree shape. All operations take the arena and a
/// root offset explicitly; 0 is the empty tree.
pub struct AvlTree<P, A = NoAnnotation> {
    _marker: PhantomData<fn() -> (P, A)>,
}

impl<P: TreePayload, A: Annotation<P>> AvlTree<P, A> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    const PAYLOAD_SIZE: usize = std::mem::size_of::<P>();
    const ANN_SIZE: usize = std::mem::size_of::<A>();
    const LEFT_OFF: usize = Self::PAYLOAD_SIZE + Self::ANN_SIZE;
    const RIGHT_OFF: usize = Self::LEFT_OFF + 8;
    const HEIGHT_OFF: usize = Self::RIGHT_OFF + 8;
    pub(crate) const NODE_SIZE: usize = Self::HEIGHT_OFF + 4;

    /// Offset of the annotation field within a node record, for the one
    /// in-place patch the post-pass performs.
    pub(crate) const fn annotation_field_off(node: Off) -> Off {
        node + Self::PAYLOAD_SIZE as u64
    }

    /// Copy one node out of the arena.
    pub fn read(&self, arena: &impl ArenaRead, off: Off) -> NodeData<P, A> {
        debug_assert_ne!(off, 0, "attempt to read the null node");
        let bytes = arena.bytes(off, Self::NODE_SIZE);
        NodeData {
            payload: *bytemuck::from_bytes(&bytes[..Self::PAYLOAD_SIZE]),
            annotation: *bytemuck::from_bytes(&bytes[Self::PAYLOAD_SIZE..Self::LEFT_OFF]),
            left: bytemuck::from_bytes::<DiskU64>(&bytes[Self::LEFT_OFF..Self::RIGHT_OFF]).get(),
            right: bytemuck::from_bytes::<DiskU64>(&bytes[Self::RIGHT_OFF..Self::HEIGHT_OFF]).get(),
            height: bytemuck::from_bytes::<DiskU32>(&bytes[Self::HEIGHT_OFF..Self::NODE_SIZE])
                .get(),
        }
    }

    fn height(&self, arena: &impl ArenaRead, off: Off) -> u32 {
        if off == 0 {
            0
        } else {
            bytemuck::from_bytes::<DiskU32>(
                arena.bytes(off + Self::HEIGHT_OFF as u64, 4),
            )
            .get()
        }
    }

    fn annotation(&self, arena: &impl ArenaRead, off: Off) -> A {
        *bytemuck::from_bytes(arena.bytes(Self::annotation_field_off(off), Self::ANN_SIZE))
    }

    /// Write a fresh node. Height and annotation are recomputed from the
    /// children; nothing already in the arena is touched.
    fn make(&self, arena: &mut Arena, payload: P, left: Off, right: Off) -> Result<Off> {
        let height = 1 + self.height(arena, left).max(self.height(arena, right));
        let mut annotation = A::from_payload(&payload);
        if left != 0 {
            annotation = A::combine(&self.annotation(arena, left), &annotation);
        }
        if right != 0 {
            annotation = A::combine(&annotation, &self.annotation(arena, right));
        }

        let off = arena.alloc(Self::NODE_SIZE)?;
        let mut bytes = Vec::with_capacity(Self::NODE_SIZE);
        bytes.extend_from_slice(bytemuck::bytes_of(&payload));
        bytes.extend_from_slice(bytemuck::bytes_of(&annotation));
        bytes.extend_from_slice(bytemuck::bytes_of(&DiskU64::from(left)));
        bytes.extend_from_slice(bytemuck::bytes_of(&DiskU64::from(right)));
        bytes.extend_from_slice(bytemuck::bytes_of(&DiskU32::from(height)));
        arena.write(off, &bytes);
        Ok(off)
    }

    /// Rebuild a node from possibly height-skewed children, restoring the
    /// AVL invariant with at most two fresh nodes per level.
    fn build(&self, arena: &mut Arena, payload: P, left: Off, right: Off) -> Result<Off> {
        let hl = self.height(arena, left);
        let hr = self.height(arena, right);

        if hl > hr + 1 {
            let l = self.read(arena, left);
            if self.height(arena, l.left) >= self.height(arena, l.right) {
                let new_right = self.make(arena, payload, l.right, right)?;
                self.make(arena, l.payload, l.left, new_right)
            } else {
                let lr = self.read(arena, l.right);
                let new_left = self.make(arena, l.payload, l.left, lr.left)?;
                let new_right = self.make(arena, payload, lr.right, right)?;
                self.make(arena, lr.payload, new_left, new_right)
            }
        } else if hr > hl + 1 {
            let r = self.read(arena, right);
            if self.height(arena, r.right) >= self.height(arena, r.left) {
                let new_left = self.make(arena, payload, left, r.left)?;
                self.make(arena, r.payload, new_left, r.right)
            } else {
                let rl = self.read(arena, r.left);
                let new_left = self.make(arena, payload, left, rl.left)?;
                let new_right = self.make(arena, r.payload, rl.right, r.right)?;
                self.make(arena, rl.payload, new_left, new_right)
            }
        } else {
            self.make(arena, payload, left, right)
        }
    }

    /// Insert a payload, returning the root of the updated tree. Inserting a
    /// payload that compares equal to an existing one is a caller bug: trees
    /// keyed by overlap resolve collisions before inserting.
    pub fn insert(&self, arena: &mut Arena, root: Off, payload: P) -> Result<Off> {
        if root == 0 {
            return self.make(arena, payload, 0, 0);
        }
        let node = self.read(arena, root);
        match payload.compare(&node.payload) {
            Ordering::Less => {
                let left = self.insert(arena, node.left, payload)?;
                self.build(arena, node.payload, left, node.right)
            }
            Ordering::Greater => {
                let right = self.insert(arena, node.right, payload)?;
                self.build(arena, node.payload, node.left, right)
            }
            Ordering::Equal => panic!("duplicate key inserted into index tree"),
        }
    }

    /// Replace the payload of the node comparing equal to `payload`, or
    /// insert it if there is none. The tree shape is preserved on replace.
    pub fn update(&self, arena: &mut Arena, root: Off, payload: P) -> Result<Off> {
        if root == 0 {
            return self.make(arena, payload, 0, 0);
        }
        let node = self.read(arena, root);
        match payload.compare(&node.payload) {
            Ordering::Less => {
                let left = self.update(arena, node.left, payload)?;
                self.build(arena, node.payload, left, node.right)
            }
            Ordering::Greater => {
                let right = self.update(arena, node.right, payload)?;
                self.build(arena, node.payload, node.left, right)
            }
            Ordering::Equal => self.make(arena, payload, node.left, node.right),
        }
    }

    /// Remove the node comparing equal to `probe` and return the new root
    /// together with the removed payload. For overlap-keyed trees this
    /// removes one arbitrary overlapping entry. Removing an absent key is a
    /// caller bug.
    pub fn remove(&self, arena: &mut Arena, root: Off, probe: &P) -> Result<(Off, P)> {
        assert_ne!(root, 0, "removal of a key absent from the tree");
        let node = self.read(arena, root);
        match probe.compare(&node.payload) {
            Ordering::Less => {
                let (left, removed) = self.remove(arena, node.left, probe)?;
                Ok((self.build(arena, node.payload, left, node.right)?, removed))
            }
            Ordering::Greater => {
                let (right, removed) = self.remove(arena, node.right, probe)?;
                Ok((self.build(arena, node.payload, node.left, right)?, removed))
            }
            Ordering::Equal => {
                if node.left == 0 {
                    return Ok((node.right, node.payload));
                }
                if node.right == 0 {
                    return Ok((node.left, node.payload));
                }
                let (right, successor) = self.remove_min(arena, node.right)?;
                Ok((self.build(arena, successor, node.left, right)?, node.payload))
            }
        }
    }

    fn remove_min(&self, arena: &mut Arena, off: Off) -> Result<(Off, P)> {
        let node = self.read(arena, off);
        if node.left == 0 {
            return Ok((node.right, node.payload));
        }
        let (left, min) = self.remove_min(arena, node.left)?;
        Ok((self.build(arena, node.payload, left, node.right)?, min))
    }

    /// Find the node comparing equal to `probe`.
    pub fn find(&self, arena: &impl ArenaRead, root: Off, probe: &P) -> Option<(Off, P)> {
        self.find_by(arena, root, |p| p.compare(probe))
    }

    /// Comparator-directed search. `cmp` reports how a payload compares to
    /// the (implicit) target; the first payload reporting `Equal` is
    /// returned.
    pub fn find_by(
        &self,
        arena: &impl ArenaRead,
        root: Off,
        mut cmp: impl FnMut(&P) -> Ordering,
    ) -> Option<(Off, P)> {
        let mut off = root;
        while off != 0 {
            let node = self.read(arena, off);
            match cmp(&node.payload) {
                Ordering::Equal => return Some((off, node.payload)),
                Ordering::Greater => off = node.left,
                Ordering::Less => off = node.right,
            }
        }
        None
    }

    /// Rightmost payload not comparing `Greater` than the target.
    pub fn find_le(
        &self,
        arena: &impl ArenaRead,
        root: Off,
        mut cmp: impl FnMut(&P) -> Ordering,
    ) -> Option<P> {
        let mut off = root;
        let mut best = None;
        while off != 0 {
            let node = self.read(arena, off);
            if cmp(&node.payload) == Ordering::Greater {
                off = node.left;
            } else {
                best = Some(node.payload);
                off = node.right;
            }
        }
        best
    }

    /// Leftmost payload not comparing `Less` than the target.
    pub fn find_ge(
        &self,
        arena: &impl ArenaRead,
        root: Off,
        mut cmp: impl FnMut(&P) -> Ordering,
    ) -> Option<P> {
        let mut off = root;
        let mut best = None;
        while off != 0 {
            let node = self.read(arena, off);
            if cmp(&node.payload) == Ordering::Less {
                off = node.right;
            } else {
                best = Some(node.payload);
                off = node.left;
            }
        }
        best
    }

    /// Leftmost payload of the tree.
    pub fn first(&self, arena: &impl ArenaRead, root: Off) -> Option<P> {
        self.edge(arena, root, false)
    }

    /// Rightmost payload of the tree.
    pub fn last(&self, arena: &impl ArenaRead, root: Off) -> Option<P> {
        self.edge(arena, root, true)
    }

    fn edge(&self, arena: &impl ArenaRead, root: Off, rightmost: bool) -> Option<P> {
        let mut off = root;
        let mut best = None;
        while off != 0 {
            let node = self.read(arena, off);
            best = Some(node.payload);
            off = if rightmost { node.right } else { node.left };
        }
        best
    }

    /// In-order traversal. The visitor sees each node's offset and record.
    pub fn walk(
        &self,
        arena: &impl ArenaRead,
        root: Off,
        visitor: &mut impl FnMut(Off, &NodeData<P, A>),
    ) {
        if root == 0 {
            return;
        }
        let node = self.read(arena, root);
        self.walk(arena, node.left, visitor);
        visitor(root, &node);
        self.walk(arena, node.right, visitor);
    }
}
