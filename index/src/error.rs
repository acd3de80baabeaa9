//! Error types for index construction and reading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the indexer and the reader.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O failure on the index or trace file. Fatal to the operation; an
    /// aborted indexing run leaves a file without the COMPLETE flag.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not an index file, or was written by an incompatible
    /// format version.
    #[error("{path}: not a usable index file (bad magic number)")]
    WrongMagic { path: PathBuf },

    /// The magic number matches but index generation never completed.
    #[error("{path}: index generation did not complete")]
    Incomplete { path: PathBuf },

    /// The trace text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The requested indexer parameters produce an index that may not be
    /// shared on disk.
    #[error("indexes without memory or call recording cannot be stored on disk")]
    NotPersistable,
}

/// Errors reported by the trace parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("trace line {line}: {message}")]
    Syntax { line: u32, message: String },

    #[error("error reading trace file: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
