//! Read-only access to a finalized index.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::arena::{ArenaRead, ReadArena};
use crate::disk::Off;
use crate::error::{IndexError, Result};
use crate::format::{
    check_index_header, FileHeader, IndexHeaderState, SeqOrderPayload, FLAG_AARCH64_USED,
    FLAG_BIGEND, FLAG_THUMB_ONLY, HEADER_OFF,
};
use crate::indexer::TracePair;
use crate::parser::ParseParams;

/// An open index file plus the trace file it describes.
///
/// Opening verifies the magic number and the COMPLETE flag; a file that
/// fails either check is never partially usable. Any number of independent
/// readers may hold the same index.
pub struct IndexReader {
    trace: TracePair,
    arena: ReadArena,
    header: FileHeader,
    trace_file: RefCell<File>,
}

impl IndexReader {
    pub fn open(trace: &TracePair) -> Result<Self> {
        match check_index_header(&trace.index_file)? {
            IndexHeaderState::Ok => {}
            IndexHeaderState::WrongMagic => {
                return Err(IndexError::WrongMagic {
                    path: trace.index_file.clone(),
                })
            }
            IndexHeaderState::Incomplete => {
                return Err(IndexError::Incomplete {
                    path: trace.index_file.clone(),
                })
            }
        }
        let arena = ReadArena::open(&trace.index_file)?;
        let header = *arena.get::<FileHeader>(HEADER_OFF);
        let trace_file = RefCell::new(File::open(&trace.trace_file)?);
        Ok(Self {
            trace: trace.clone(),
            arena,
            header,
            trace_file,
        })
    }

    pub fn arena(&self) -> &ReadArena {
        &self.arena
    }

    pub fn seqroot(&self) -> Off {
        self.header.seqroot.get()
    }

    pub fn bypcroot(&self) -> Off {
        self.header.bypcroot.get()
    }

    pub fn lineno_offset(&self) -> u32 {
        self.header.lineno_offset.get()
    }

    pub fn is_big_endian(&self) -> bool {
        self.header.flags.get() & FLAG_BIGEND != 0
    }

    pub fn is_aarch64(&self) -> bool {
        self.header.flags.get() & FLAG_AARCH64_USED != 0
    }

    pub fn is_thumb_only(&self) -> bool {
        self.header.flags.get() & FLAG_THUMB_ONLY != 0
    }

    /// The parameters the trace was parsed with, for consistent re-parsing.
    pub fn parse_params(&self) -> ParseParams {
        ParseParams {
            bigend: self.is_big_endian(),
            thumb_only: self.is_thumb_only(),
        }
    }

    pub fn index_filename(&self) -> &Path {
        &self.trace.index_file
    }

    pub fn trace_filename(&self) -> &Path {
        &self.trace.trace_file
    }

    /// The trace text of one event, as recorded by its byte range.
    pub fn get_trace_text(&self, node: &SeqOrderPayload) -> Result<String> {
        let mut file = self.trace_file.borrow_mut();
        file.seek(SeekFrom::Start(node.trace_file_pos.get()))?;
        let mut buf = vec![0u8; node.trace_file_len.get() as usize];
        file.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// The trace text of one event, split into lines.
    pub fn get_trace_lines(&self, node: &SeqOrderPayload) -> Result<Vec<String>> {
        Ok(self
            .get_trace_text(node)?
            .lines()
            .map(str::to_owned)
            .collect())
    }

    /// One line of an event's text, 0-based within the event.
    pub fn get_trace_line(&self, node: &SeqOrderPayload, lineno: u32) -> Result<String> {
        let lines = self.get_trace_lines(node)?;
        lines.into_iter().nth(lineno as usize).ok_or_else(|| {
            IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("event at line {} has no line {lineno}", node.firstline()),
            ))
        })
    }
}
