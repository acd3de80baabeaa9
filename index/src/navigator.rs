//! Navigation queries over an open index.
//!
//! All operations here are pure queries: time- and line-directed lookups in
//! the sequential-order tree, state reconstruction through memory roots,
//! call-depth translations through the layered range tree, and symbol
//! decoration when an image is attached.
//!
//! Queries that can simply miss (`node_at_*`, the `*_may_fail` variants,
//! register reads) say so through their return type. The plain `lrt_*`
//! variants treat out-of-range arguments as caller bugs.

use std::cmp::Ordering;

use crate::disk::{Addr, Off, Time};
use crate::error::Result;
use crate::format::{AddrSpace, ByPCPayload, SeqOrderPayload, BYPCTREE, SEQTREE};
use crate::image::Image;
use crate::indexer::TracePair;
use crate::lrt::{self, DepthRange};
use crate::memtree::{self, DefinedRegion};
use crate::reader::IndexReader;
use crate::registers::RegisterId;

/// An [`IndexReader`] plus optional symbol information.
pub struct IndexNavigator {
    pub index: IndexReader,
    image: Option<Image>,
    /// (loaded address) - (address in the image file).
    load_offset: u64,
}

impl IndexNavigator {
    pub fn new(trace: &TracePair) -> Result<Self> {
        Ok(Self {
            index: IndexReader::open(trace)?,
            image: None,
            load_offset: 0,
        })
    }

    pub fn with_image(trace: &TracePair, image: Image, load_offset: u64) -> Result<Self> {
        Ok(Self {
            index: IndexReader::open(trace)?,
            image: Some(image),
            load_offset,
        })
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    // ----- sequential-order navigation -----

    /// The last event with timestamp at most `t`: the state of the world
    /// as observed up to `t`.
    pub fn node_at_time(&self, t: Time) -> Option<SeqOrderPayload> {
        SEQTREE.find_le(self.index.arena(), self.index.seqroot(), |p| {
            p.mod_time().cmp(&t)
        })
    }

    /// The event containing trace line `line` (the last event starting at
    /// or before it).
    pub fn node_at_line(&self, line: u32) -> Option<SeqOrderPayload> {
        SEQTREE.find_le(self.index.arena(), self.index.seqroot(), |p| {
            p.firstline().cmp(&line)
        })
    }

    pub fn get_previous_node(&self, node: &SeqOrderPayload) -> Option<SeqOrderPayload> {
        let firstline = node.firstline();
        if firstline == 0 {
            return None;
        }
        self.node_at_line(firstline - 1)
    }

    pub fn get_next_node(&self, node: &SeqOrderPayload) -> Option<SeqOrderPayload> {
        let target = node.firstline();
        SEQTREE.find_ge(self.index.arena(), self.index.seqroot(), |p| {
            if p.firstline() <= target {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        })
    }

    /// First (`end = false`) or last (`end = true`) event of the trace.
    pub fn find_buffer_limit(&self, end: bool) -> Option<SeqOrderPayload> {
        let arena = self.index.arena();
        if end {
            SEQTREE.last(arena, self.index.seqroot())
        } else {
            SEQTREE.first(arena, self.index.seqroot())
        }
    }

    // ----- by-PC navigation -----

    /// The first visit to `pc` at or after trace line `minline`.
    pub fn find_pc_visit(&self, pc: Addr, minline: u32) -> Option<ByPCPayload> {
        BYPCTREE
            .find_ge(self.index.arena(), self.index.bypcroot(), |p| {
                (p.pc(), p.firstline()).cmp(&(pc, minline))
            })
            .filter(|p| p.pc() == pc)
    }

    // ----- layered range tree -----

    /// Find the `line`-th trace line (0-based) whose call depth is in
    /// `[mindepth_i, maxdepth_i)`, and return the number of lines before
    /// it whose call depth is in `[mindepth_o, maxdepth_o)`. The argument
    /// must be in range.
    pub fn lrt_translate(
        &self,
        line: u32,
        mindepth_i: u32,
        maxdepth_i: u32,
        mindepth_o: u32,
        maxdepth_o: u32,
    ) -> u32 {
        self.lrt_translate_may_fail(line, mindepth_i, maxdepth_i, mindepth_o, maxdepth_o)
            .expect("lrt_translate: line index out of range")
    }

    /// As [`lrt_translate`](Self::lrt_translate), returning `None` when
    /// fewer than `line + 1` lines exist in the input depth range.
    pub fn lrt_translate_may_fail(
        &self,
        line: u32,
        mindepth_i: u32,
        maxdepth_i: u32,
        mindepth_o: u32,
        maxdepth_o: u32,
    ) -> Option<u32> {
        lrt::translate(
            self.index.arena(),
            self.index.seqroot(),
            line,
            DepthRange::new(mindepth_i, maxdepth_i),
            DepthRange::new(mindepth_o, maxdepth_o),
        )
    }

    /// Total number of trace lines whose call depth is in
    /// `[mindepth, maxdepth)`.
    pub fn lrt_total_lines(&self, mindepth: u32, maxdepth: u32) -> u32 {
        lrt::total_lines(
            self.index.arena(),
            self.index.seqroot(),
            DepthRange::new(mindepth, maxdepth),
        )
    }

    /// Let S be the `linestart`-th line with call depth in the input range
    /// and E the `lineend`-th (E may be one past the last). Returns the
    /// number of lines in [S, E) whose call depth is in the output range.
    pub fn lrt_translate_range(
        &self,
        linestart: u32,
        lineend: u32,
        mindepth_i: u32,
        maxdepth_i: u32,
        mindepth_o: u32,
        maxdepth_o: u32,
    ) -> u32 {
        let arena = self.index.arena();
        let seqroot = self.index.seqroot();
        let range_in = DepthRange::new(mindepth_i, maxdepth_i);
        let range_out = DepthRange::new(mindepth_o, maxdepth_o);
        let total_in = lrt::total_lines(arena, seqroot, range_in);

        let translate_ext = |line: u32| -> u32 {
            if line == total_in {
                lrt::total_lines(arena, seqroot, range_out)
            } else {
                lrt::translate(arena, seqroot, line, range_in, range_out)
                    .expect("lrt_translate_range: line index out of range")
            }
        };

        let start = translate_ext(linestart);
        let end = translate_ext(lineend);
        assert!(start <= end, "lrt_translate_range: endpoints out of order");
        end - start
    }

    // ----- state reconstruction -----

    /// Read raw state at one instant. Returns the line of the newest
    /// event that wrote any of the requested range; the mask tells which
    /// bytes are known.
    pub fn getmem(
        &self,
        memroot: Off,
        space: AddrSpace,
        addr: Addr,
        out: &mut [u8],
        defined: &mut [u8],
    ) -> u32 {
        memtree::getmem(self.index.arena(), memroot, space, addr, out, defined)
    }

    /// First defined chunk of the given region, if any.
    pub fn getmem_next(
        &self,
        memroot: Off,
        space: AddrSpace,
        addr: Addr,
        size: u64,
    ) -> Option<DefinedRegion<'_>> {
        memtree::getmem_next(self.index.arena(), memroot, space, addr, size)
    }

    /// Interval of the nearest entry at or beyond `addr` (by `sign`)
    /// modified after (`sign > 0`) or before (`sign < 0`) line `minline`.
    pub fn find_next_mod(
        &self,
        memroot: Off,
        space: AddrSpace,
        addr: Addr,
        minline: u32,
        sign: i32,
    ) -> Option<(Addr, Addr)> {
        memtree::find_next_mod(self.index.arena(), memroot, space, addr, minline, sign)
    }

    /// Instruction-set flags at one instant; 0 when never recorded.
    pub fn get_iflags(&self, memroot: Off) -> u8 {
        let mut out = [0u8; 1];
        let mut defined = [0u8; 1];
        self.getmem(
            memroot,
            AddrSpace::Register,
            RegisterId::Iflags.address(self.index.is_big_endian()),
            &mut out,
            &mut defined,
        );
        if defined[0] != 0 {
            out[0]
        } else {
            0
        }
    }

    /// Raw bytes of a register, in the trace's stored order. `None` unless
    /// every byte is defined at this instant.
    pub fn get_reg_bytes(&self, memroot: Off, reg: RegisterId) -> Option<Vec<u8>> {
        let mut out = vec![0u8; reg.size()];
        let mut defined = vec![0u8; reg.size()];
        self.getmem(
            memroot,
            AddrSpace::Register,
            reg.address(self.index.is_big_endian()),
            &mut out,
            &mut defined,
        );
        defined.iter().all(|&d| d != 0).then_some(out)
    }

    /// A register's value as an integer. Fails cleanly for registers wider
    /// than 64 bits and for partially defined values.
    pub fn get_reg_value(&self, memroot: Off, reg: RegisterId) -> Option<u64> {
        if reg.size() > 8 {
            return None;
        }
        let bytes = self.get_reg_bytes(memroot, reg)?;
        let mut raw = [0u8; 8];
        if self.index.is_big_endian() {
            raw[8 - bytes.len()..].copy_from_slice(&bytes);
            Some(u64::from_be_bytes(raw))
        } else {
            raw[..bytes.len()].copy_from_slice(&bytes);
            Some(u64::from_le_bytes(raw))
        }
    }

    // ----- symbols -----

    /// Loaded address and size of a named symbol.
    pub fn lookup_symbol(&self, name: &str) -> Option<(Addr, u64)> {
        let sym = self.image.as_ref()?.lookup_symbol(name)?;
        Some((sym.addr + self.load_offset, sym.size))
    }

    /// Render an address symbolically (`name` or `name+0xNN`). With
    /// `fallback`, addresses outside every symbol render as bare hex;
    /// without it they render as `None`.
    pub fn get_symbolic_address(&self, addr: Addr, fallback: bool) -> Option<String> {
        if let Some(image) = &self.image {
            let image_addr = addr.wrapping_sub(self.load_offset);
            if let Some(sym) = image.find_containing(image_addr) {
                let offset = image_addr - sym.addr;
                return Some(if offset == 0 {
                    sym.name.clone()
                } else {
                    format!("{}+{:#x}", sym.name, offset)
                });
            }
        }
        fallback.then(|| format!("{addr:#x}"))
    }
}
