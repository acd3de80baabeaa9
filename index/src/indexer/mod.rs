//! The indexer: one streaming pass over the parsed trace, then the
//! call-depth post-pass and the header patch that declares the file
//! complete.

use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::arena::Arena;
use crate::disk::{Off, Time};
use crate::error::{IndexError, Result};
use crate::format::{
    ByPCPayload, FileHeader, SeqOrderPayload, AddrSpace, BYPCTREE, EXCEPTION_PC, FILE_PREFIX_LEN,
    FLAG_AARCH64_USED, FLAG_BIGEND, FLAG_COMPLETE, FLAG_THUMB_ONLY, HEADER_OFF, MAGIC, SEQTREE,
};
use crate::lrt::build_call_depth_arrays;
use crate::memtree;
use crate::parser::{EventKind, InstructionSet, ParseParams, TarmacParser, TraceEvent};
use crate::registers::{RegisterId, IFLAGS_AARCH64, IFLAGS_THUMB};

mod calls;

use calls::CallTracker;

/// Features the indexer may leave out of an index to save time and space.
#[derive(Clone, Copy, Debug)]
pub struct IndexerParams {
    /// Record memory and register state per instant.
    pub record_memory: bool,
    /// Track call depth and build the call-depth arrays.
    pub record_calls: bool,
    /// Send call-heuristic decisions to the log.
    pub debug_call_heuristics: bool,
}

impl Default for IndexerParams {
    fn default() -> Self {
        Self {
            record_memory: true,
            record_calls: true,
            debug_call_heuristics: false,
        }
    }
}

impl IndexerParams {
    /// Only full-featured indexes may be shared on disk, so one tool never
    /// trips over a deficient index written by another. Reduced indexes are
    /// confined to ephemeral files.
    pub fn can_store_on_disk(&self) -> bool {
        self.record_memory && self.record_calls
    }
}

/// A trace file and the index file that describes it.
#[derive(Clone, Debug)]
pub struct TracePair {
    pub trace_file: PathBuf,
    pub index_file: PathBuf,
}

impl TracePair {
    pub fn new(trace_file: impl Into<PathBuf>, index_file: impl Into<PathBuf>) -> Self {
        Self {
            trace_file: trace_file.into(),
            index_file: index_file.into(),
        }
    }

    /// Conventional index location: alongside the trace with `.index`
    /// appended.
    pub fn with_default_index(trace_file: impl Into<PathBuf>) -> Self {
        let trace_file = trace_file.into();
        let mut name = trace_file.file_name().unwrap_or_default().to_os_string();
        name.push(".index");
        let index_file = trace_file.with_file_name(name);
        Self {
            trace_file,
            index_file,
        }
    }
}

/// Streaming index builder. Feed it events in trace order, then
/// [`finalize`](Indexer::finalize).
pub struct Indexer {
    arena: Arena,
    iparams: IndexerParams,
    pparams: ParseParams,
    seqroot: Off,
    bypcroot: Off,
    memroot: Off,
    last_time: Time,
    last_iflags: Option<u8>,
    calls: CallTracker,
    aarch64_used: bool,
}

impl Indexer {
    /// Set up over a fresh arena: reserve and write the magic and a header
    /// with the COMPLETE flag clear, so a run that dies leaves a file
    /// recognisable as incomplete rather than as garbage.
    pub fn new(mut arena: Arena, iparams: IndexerParams, pparams: ParseParams) -> Result<Self> {
        let prefix = arena.alloc(FILE_PREFIX_LEN)?;
        debug_assert_eq!(prefix, 0);
        arena.write(0, &MAGIC);
        arena.flush()?;

        let memroot = if iparams.record_memory {
            memtree::initial_root(&mut arena)?
        } else {
            0
        };

        Ok(Self {
            arena,
            iparams,
            pparams,
            seqroot: 0,
            bypcroot: 0,
            memroot,
            last_time: 0,
            last_iflags: None,
            calls: CallTracker::new(pparams.bigend, iparams.debug_call_heuristics),
            aarch64_used: false,
        })
    }

    pub fn push_event(&mut self, event: &TraceEvent) -> Result<()> {
        // Some traces list nearby events slightly out of order; coerce
        // stale timestamps so (firstline, mod_time) stays jointly monotone.
        let time = event.time.max(self.last_time);
        self.last_time = time;
        let firstline = event.first_line;

        if self.iparams.record_memory {
            for region in &event.unknown {
                self.memroot = memtree::insert_unknown_region(
                    &mut self.arena,
                    self.memroot,
                    AddrSpace::Memory,
                    region.lo,
                    region.hi,
                    firstline,
                )?;
            }
            for write in &event.writes {
                self.memroot = memtree::write(
                    &mut self.arena,
                    self.memroot,
                    write.space,
                    write.addr,
                    &write.bytes,
                    firstline,
                )?;
            }
            for read in &event.reads {
                memtree::fill_in(
                    &mut self.arena,
                    self.memroot,
                    read.space,
                    read.addr,
                    &read.bytes,
                    firstline,
                )?;
            }
            if let EventKind::Instruction { iset, .. } = &event.kind {
                self.record_iflags(*iset, firstline)?;
            }
        }

        if let EventKind::Instruction {
            iset: InstructionSet::A64,
            ..
        } = event.kind
        {
            self.aarch64_used = true;
        }

        let call_depth = if self.iparams.record_calls {
            self.calls.observe(event)
        } else {
            0
        };

        let pc = match &event.kind {
            EventKind::Instruction { pc, .. } => *pc,
            EventKind::Exception { .. } => EXCEPTION_PC,
        };

        let payload = SeqOrderPayload {
            mod_time: time.into(),
            pc: pc.into(),
            trace_file_pos: event.pos.into(),
            trace_file_len: event.len.into(),
            trace_file_firstline: firstline.into(),
            trace_file_lines: event.line_count.into(),
            memory_root: self.memroot.into(),
            call_depth: call_depth.into(),
        };
        self.seqroot = SEQTREE.insert(&mut self.arena, self.seqroot, payload)?;

        self.bypcroot = BYPCTREE.insert(
            &mut self.arena,
            self.bypcroot,
            ByPCPayload {
                pc: pc.into(),
                trace_file_firstline: firstline.into(),
            },
        )?;
        Ok(())
    }

    /// Track the instruction-set pseudo-register, writing it only when the
    /// state changes.
    fn record_iflags(&mut self, iset: InstructionSet, firstline: u32) -> Result<()> {
        let bits = match iset {
            InstructionSet::A32 => 0,
            InstructionSet::T32 => IFLAGS_THUMB,
            InstructionSet::A64 => IFLAGS_AARCH64,
            InstructionSet::Unknown => return Ok(()),
        };
        if self.last_iflags != Some(bits) {
            self.memroot = memtree::write(
                &mut self.arena,
                self.memroot,
                AddrSpace::Register,
                RegisterId::Iflags.address(self.pparams.bigend),
                &[bits],
                firstline,
            )?;
            self.last_iflags = Some(bits);
        }
        Ok(())
    }

    /// Run the call-depth post-pass, write the final header with COMPLETE
    /// set, and sync the file.
    pub fn finalize(mut self, lineno_offset: u32) -> Result<()> {
        build_call_depth_arrays(&mut self.arena, self.seqroot)?;

        let mut flags = FLAG_COMPLETE;
        if self.pparams.bigend {
            flags |= FLAG_BIGEND;
        }
        if self.pparams.thumb_only {
            flags |= FLAG_THUMB_ONLY;
        }
        if self.aarch64_used {
            flags |= FLAG_AARCH64_USED;
        }
        let header = FileHeader {
            flags: flags.into(),
            seqroot: self.seqroot.into(),
            bypcroot: self.bypcroot.into(),
            lineno_offset: lineno_offset.into(),
        };
        self.arena.write_record(HEADER_OFF, &header);
        self.arena.finish()
    }
}

/// Build the on-disk index for `trace`. Requires a parameter set whose
/// index is allowed on disk.
pub fn run_indexer(
    trace: &TracePair,
    iparams: &IndexerParams,
    pparams: &ParseParams,
) -> Result<()> {
    if !iparams.can_store_on_disk() {
        return Err(IndexError::NotPersistable);
    }
    let arena = Arena::create(&trace.index_file)?;
    index_into(arena, &trace.trace_file, *iparams, *pparams)
}

/// Build a reduced (or full) index in an unlinked temporary file for
/// single-tool use. The returned handle keeps the file alive; dropping it
/// deletes the index.
pub fn run_indexer_ephemeral(
    trace_file: &Path,
    iparams: &IndexerParams,
    pparams: &ParseParams,
) -> Result<TempPath> {
    let (file, temp_path) = tempfile::NamedTempFile::new()?.into_parts();
    let arena = Arena::from_file(file, temp_path.to_path_buf())?;
    index_into(arena, trace_file, *iparams, *pparams)?;
    Ok(temp_path)
}

fn index_into(
    arena: Arena,
    trace_file: &Path,
    iparams: IndexerParams,
    pparams: ParseParams,
) -> Result<()> {
    let mut indexer = Indexer::new(arena, iparams, pparams)?;
    let mut parser = TarmacParser::from_file(trace_file, pparams)?;
    for event in &mut parser {
        indexer.push_event(&event?)?;
    }
    indexer.finalize(parser.lineno_offset())
}
