//! Dump the call tree of a Tarmac trace.
//!
//! Builds a memory-less index in a temporary file (call-depth tracking is
//! all this tool needs), walks the events in trace order, and prints one
//! line per call with nesting that follows the recorded call depth.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tarmac_index::{
    run_indexer_ephemeral, Image, IndexNavigator, IndexerParams, ParseParams, TracePair,
};

#[derive(Parser)]
#[command(name = "tarmac-calltree")]
#[command(about = "Dump the call tree of a Tarmac trace")]
struct Cli {
    /// Trace file to analyse.
    trace: PathBuf,

    /// Symbol listing for the traced executable (addr [size] name lines).
    #[arg(long)]
    image: Option<PathBuf>,

    /// (loaded address) - (address in the image file).
    #[arg(long, default_value_t = 0)]
    load_offset: u64,

    /// Treat the trace as big-endian.
    #[arg(long)]
    bigend: bool,

    /// Assume all code is Thumb.
    #[arg(long)]
    thumb: bool,

    /// Per-depth line accounting after the tree.
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let iparams = IndexerParams {
        record_memory: false,
        ..Default::default()
    };
    let pparams = ParseParams {
        bigend: cli.bigend,
        thumb_only: cli.thumb,
    };
    let index_path = run_indexer_ephemeral(&cli.trace, &iparams, &pparams)
        .with_context(|| format!("indexing {}", cli.trace.display()))?;

    let pair = TracePair::new(&cli.trace, index_path.to_path_buf());
    let nav = match &cli.image {
        Some(image) => {
            let image = Image::from_symbol_file(image)
                .with_context(|| format!("loading symbols from {}", image.display()))?;
            IndexNavigator::with_image(&pair, image, cli.load_offset)?
        }
        None => IndexNavigator::new(&pair)?,
    };

    dump_tree(&nav);
    if cli.summary {
        dump_summary(&nav);
    }
    Ok(())
}

fn location(nav: &IndexNavigator, pc: u64) -> String {
    nav.get_symbolic_address(pc, true)
        .unwrap_or_else(|| format!("{pc:#x}"))
}

fn dump_tree(nav: &IndexNavigator) {
    let Some(first) = nav.find_buffer_limit(false) else {
        println!("trace contains no events");
        return;
    };
    println!("{} at line {}", location(nav, first.pc()), first.firstline());

    let mut prev_depth = first.call_depth();
    let mut node = nav.get_next_node(&first);
    while let Some(n) = node {
        let depth = n.call_depth();
        if depth > prev_depth {
            let indent = "  ".repeat(depth as usize);
            println!(
                "{indent}{} at line {}",
                location(nav, n.pc()),
                n.firstline()
            );
        }
        prev_depth = depth;
        node = nav.get_next_node(&n);
    }
}

fn dump_summary(nav: &IndexNavigator) {
    println!();
    let total = nav.lrt_total_lines(0, u32::MAX);
    println!("{total} trace lines");
    let mut depth = 0;
    loop {
        let lines = nav.lrt_total_lines(depth, depth + 1);
        if lines == 0 && nav.lrt_total_lines(depth, u32::MAX) == 0 {
            break;
        }
        println!("  depth {depth}: {lines} lines");
        depth += 1;
    }
}
