//! Persistent on-disk index over Tarmac processor execution traces.
//!
//! A Tarmac trace is a text log of instruction retirements, register writes
//! and memory accesses. This crate builds a random-access index over such a
//! log: the [`indexer`] streams the parsed trace once into a family of
//! node-sharing balanced search trees inside a file-backed [`arena`], and
//! the [`navigator`] answers queries against the finished file: the event
//! at a time or line, the state of memory and registers at any instant, and
//! call-depth-filtered line accounting through a layered range tree.
//!
//! The indexer writes; readers only read. The two never share a live file.

pub mod arena;
pub mod avl;
pub mod disk;
pub mod error;
pub mod format;
pub mod image;
pub mod indexer;
pub mod lrt;
pub mod memtree;
pub mod navigator;
pub mod parser;
pub mod reader;
pub mod registers;

pub use error::{IndexError, ParseError, Result};
pub use format::{check_index_header, AddrSpace, IndexHeaderState};
pub use image::Image;
pub use indexer::{run_indexer, run_indexer_ephemeral, Indexer, IndexerParams, TracePair};
pub use navigator::IndexNavigator;
pub use parser::{ParseParams, TarmacParser, TraceEvent};
pub use reader::IndexReader;
pub use registers::RegisterId;
