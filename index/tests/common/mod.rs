//! Shared scaffolding: build a real index file from trace text and open it.

use std::path::PathBuf;

use tarmac_index::{run_indexer, IndexNavigator, IndexerParams, ParseParams, TracePair};
use tempfile::TempDir;

pub struct BuiltIndex {
    // Owns the on-disk files for the duration of the test.
    _dir: TempDir,
    pub pair: TracePair,
}

pub fn build_index(trace_text: &str) -> BuiltIndex {
    build_index_with(trace_text, &ParseParams::default())
}

pub fn build_index_with(trace_text: &str, pparams: &ParseParams) -> BuiltIndex {
    let dir = tempfile::tempdir().unwrap();
    let trace_path: PathBuf = dir.path().join("trace.tarmac");
    std::fs::write(&trace_path, trace_text).unwrap();
    let pair = TracePair::with_default_index(&trace_path);
    run_indexer(&pair, &IndexerParams::default(), pparams).unwrap();
    BuiltIndex { _dir: dir, pair }
}

pub fn navigator(built: &BuiltIndex) -> IndexNavigator {
    IndexNavigator::new(&built.pair).unwrap()
}

/// Emits trace text line by line, with automatic timestamps and program
/// counters so tests can land records on exact line numbers.
pub struct TraceBuilder {
    lines: Vec<String>,
    next_pc: u64,
    time: u64,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            next_pc: 0x8000,
            time: 10,
        }
    }

    pub fn set_pc(&mut self, pc: u64) -> &mut Self {
        self.next_pc = pc;
        self
    }

    /// Append one instruction line with the given disassembly.
    pub fn instr(&mut self, disasm: &str) -> &mut Self {
        let line = format!(
            "{} clk ES ({:08x}:e1a00000) A {disasm}",
            self.time, self.next_pc
        );
        self.lines.push(line);
        self.next_pc += 4;
        self.time += 10;
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.instr("NOP")
    }

    /// NOP filler so that the next appended line is trace line `line`.
    pub fn nops_until(&mut self, line: usize) -> &mut Self {
        while self.lines.len() + 1 < line {
            self.nop();
        }
        self
    }

    /// Append a record that attaches to the current instruction
    /// (register write, memory access, semihosting region).
    pub fn attach(&mut self, record: &str) -> &mut Self {
        self.lines.push(record.to_string());
        self
    }

    /// Append a raw line verbatim.
    pub fn raw(&mut self, line: &str) -> &mut Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}
