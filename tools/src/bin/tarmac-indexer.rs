//! Build or check the index for a Tarmac trace file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tarmac_index::{
    check_index_header, run_indexer, IndexHeaderState, IndexerParams, ParseParams, TracePair,
};

#[derive(Parser)]
#[command(name = "tarmac-indexer")]
#[command(about = "Build or check the index for a Tarmac trace file")]
struct Cli {
    /// Trace file to index.
    trace: PathBuf,

    /// Index file location (defaults to <trace>.index).
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Report the index header status instead of building.
    #[arg(long)]
    check: bool,

    /// Rebuild even if a complete, up-to-date index exists.
    #[arg(short, long)]
    force: bool,

    /// Treat the trace as big-endian.
    #[arg(long)]
    bigend: bool,

    /// Assume all code is Thumb.
    #[arg(long)]
    thumb: bool,

    /// Log call-heuristic decisions (visible with RUST_LOG=debug).
    #[arg(long)]
    debug_calls: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let pair = match cli.index {
        Some(index) => TracePair::new(&cli.trace, index),
        None => TracePair::with_default_index(&cli.trace),
    };

    if cli.check {
        let state = check_index_header(&pair.index_file)
            .with_context(|| format!("checking {}", pair.index_file.display()))?;
        let describe = match state {
            IndexHeaderState::Ok => "complete index",
            IndexHeaderState::WrongMagic => "not an index file for this format version",
            IndexHeaderState::Incomplete => "index generation did not complete",
        };
        println!("{}: {describe}", pair.index_file.display());
        return Ok(());
    }

    if !cli.force && index_is_fresh(&pair) {
        info!("{} is already up to date", pair.index_file.display());
        return Ok(());
    }

    let iparams = IndexerParams {
        debug_call_heuristics: cli.debug_calls,
        ..Default::default()
    };
    let pparams = ParseParams {
        bigend: cli.bigend,
        thumb_only: cli.thumb,
    };
    run_indexer(&pair, &iparams, &pparams)
        .with_context(|| format!("indexing {}", pair.trace_file.display()))?;
    info!("wrote {}", pair.index_file.display());
    Ok(())
}

/// A complete index at least as new as its trace does not need rebuilding.
fn index_is_fresh(pair: &TracePair) -> bool {
    if !matches!(check_index_header(&pair.index_file), Ok(IndexHeaderState::Ok)) {
        return false;
    }
    let modified = |p: &PathBuf| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(&pair.index_file), modified(&pair.trace_file)) {
        (Some(index), Some(trace)) => index >= trace,
        _ => false,
    }
}
