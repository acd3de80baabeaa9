//! Line-oriented parser for Tarmac trace text.
//!
//! Each line is parsed on its own; the surrounding loop tracks byte offsets
//! and line numbers and coalesces an instruction (or exception) line plus
//! the register/memory records that follow it into one [`TraceEvent`], the
//! unit the indexer consumes. The indexer is not tied to this parser: it
//! accepts any stream of events, and tests feed it synthetic ones.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;
use pest::iterators::Pair;
use pest::Parser as _;

use crate::disk::{Addr, Time};
use crate::error::ParseError;
use crate::format::AddrSpace;
use crate::registers::RegisterId;

mod tests;

#[derive(pest_derive::Parser)]
#[grammar = "parser/tarmac.pest"]
struct LineParser;

/// Parsing options, round-tripped through the index header so readers can
/// re-parse the trace the same way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseParams {
    /// Interpret multi-byte values as big-endian.
    pub bigend: bool,
    /// Treat all code as Thumb.
    pub thumb_only: bool,
}

/// Instruction-set state of one executed instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstructionSet {
    A32,
    T32,
    A64,
    #[default]
    Unknown,
}

/// Call-shape hint derived from the disassembly text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallHint {
    #[default]
    None,
    Call,
    Return,
}

#[derive(Clone, Debug)]
pub enum EventKind {
    Instruction {
        pc: Addr,
        iset: InstructionSet,
        disasm: String,
    },
    Exception {
        text: String,
    },
}

/// One write of raw bytes into an address space.
#[derive(Clone, Debug)]
pub struct MemWrite {
    pub space: AddrSpace,
    pub addr: Addr,
    pub bytes: Vec<u8>,
}

/// One observed read: the bytes that must have been at `addr`.
#[derive(Clone, Debug)]
pub struct MemRead {
    pub space: AddrSpace,
    pub addr: Addr,
    pub bytes: Vec<u8>,
}

/// A region whose contents changed to values not visible in the trace.
#[derive(Clone, Copy, Debug)]
pub struct UnknownRegion {
    pub lo: Addr,
    pub hi: Addr,
}

/// One instant of the trace, coalesced from an instruction or exception
/// line and the records attached to it.
#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub time: Time,
    pub kind: EventKind,
    /// Byte range of the event's text in the trace file.
    pub pos: u64,
    pub len: u64,
    /// Line range of the event's text, 1-based.
    pub first_line: u32,
    pub line_count: u32,
    pub writes: Vec<MemWrite>,
    pub reads: Vec<MemRead>,
    pub unknown: Vec<UnknownRegion>,
    pub call_hint: CallHint,
}

impl TraceEvent {
    pub fn is_exception(&self) -> bool {
        matches!(self.kind, EventKind::Exception { .. })
    }
}

/// Derive a call-shape hint from disassembly text. Best effort: branch-
/// with-link spellings are calls; the usual return idioms are returns.
pub fn call_hint(disasm: &str) -> CallHint {
    // Strip an execution-mode prefix like "EL1h_ns : ".
    let tail = disasm.rsplit(" : ").next().unwrap_or(disasm).trim();
    let Some(mnemonic) = tail.split_whitespace().next() else {
        return CallHint::None;
    };
    let m = mnemonic.to_ascii_uppercase();
    let operands = tail[mnemonic.len()..].to_ascii_lowercase();

    const CONDS: [&str; 17] = [
        "EQ", "NE", "CS", "HS", "CC", "LO", "MI", "PL", "VS", "VC", "HI", "LS", "GE", "LT",
        "GT", "LE", "AL",
    ];

    if m == "BL" || m.starts_with("BLX") || m.starts_with("BLR") {
        return CallHint::Call;
    }
    if let Some(cond) = m.strip_prefix("BL") {
        if CONDS.contains(&cond) {
            return CallHint::Call;
        }
    }

    if m == "RET" || m == "ERET" {
        return CallHint::Return;
    }
    if m.starts_with("BX") && operands.contains("lr") {
        return CallHint::Return;
    }
    if (m.starts_with("POP") || m.starts_with("LDM")) && operands.contains("pc") {
        return CallHint::Return;
    }
    if m == "MOV" && operands.trim_start().starts_with("pc") {
        return CallHint::Return;
    }
    CallHint::None
}

/// Streaming parser over a trace file. Yields one [`TraceEvent`] per
/// instruction or exception, in file order.
pub struct TarmacParser<R> {
    input: R,
    params: ParseParams,
    /// 1-based number of the next line to read.
    next_line: u32,
    /// Byte offset of the next line to read.
    byte_pos: u64,
    pending: Option<TraceEvent>,
    lineno_offset: u32,
    emitted_any: bool,
    done: bool,
}

impl TarmacParser<BufReader<File>> {
    pub fn from_file(path: &Path, params: ParseParams) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?), params))
    }
}

impl<R: BufRead> TarmacParser<R> {
    pub fn new(input: R, params: ParseParams) -> Self {
        Self {
            input,
            params,
            next_line: 1,
            byte_pos: 0,
            pending: None,
            lineno_offset: 0,
            emitted_any: false,
            done: false,
        }
    }

    /// Number of leading lines before the Tarmac data starts. Meaningful
    /// once iteration has finished.
    pub fn lineno_offset(&self) -> u32 {
        self.lineno_offset
    }

    /// Extend the open event's byte and line span to cover the line that
    /// was just read.
    fn extend_pending(&mut self, line_start: u64, line_len: u64, lineno: u32) {
        if let Some(pending) = &mut self.pending {
            pending.len = line_start + line_len - pending.pos;
            pending.line_count = lineno - pending.first_line + 1;
        }
    }

    fn handle_record(
        &mut self,
        record: Pair<'_, Rule>,
        line_start: u64,
        line_len: u64,
        lineno: u32,
    ) -> Result<Option<TraceEvent>, ParseError> {
        match record.as_rule() {
            Rule::instruction | Rule::exception => {
                let is_exception = record.as_rule() == Rule::exception;
                let mut time = 0;
                let mut pc = 0;
                let mut iset = if self.params.thumb_only {
                    InstructionSet::T32
                } else {
                    InstructionSet::Unknown
                };
                let mut disasm = String::new();
                let mut first_hex = true;
                for piece in record.into_inner() {
                    match piece.as_rule() {
                        Rule::time => time = parse_time(piece.as_str(), lineno)?,
                        Rule::hex => {
                            if first_hex {
                                pc = parse_hex(piece.as_str(), lineno)?;
                                first_hex = false;
                            }
                        }
                        Rule::iset => {
                            iset = match piece.as_str() {
                                "A" => InstructionSet::A32,
                                "T" => InstructionSet::T32,
                                _ => InstructionSet::A64,
                            }
                        }
                        Rule::disasm => disasm = piece.as_str().trim().to_string(),
                        _ => {}
                    }
                }
                let (kind, hint) = if is_exception {
                    (EventKind::Exception { text: disasm }, CallHint::None)
                } else {
                    let hint = call_hint(&disasm);
                    (EventKind::Instruction { pc, iset, disasm }, hint)
                };
                let finished = self.pending.replace(TraceEvent {
                    time,
                    kind,
                    pos: line_start,
                    len: line_len,
                    first_line: lineno,
                    line_count: 1,
                    writes: Vec::new(),
                    reads: Vec::new(),
                    unknown: Vec::new(),
                    call_hint: hint,
                });
                Ok(finished)
            }
            Rule::register => {
                let mut name = "";
                let mut value = "";
                for piece in record.into_inner() {
                    match piece.as_rule() {
                        Rule::regname => name = piece.as_str(),
                        Rule::hex_value => value = piece.as_str(),
                        _ => {}
                    }
                }
                if self.pending.is_none() {
                    warn!("trace line {lineno}: register write before any instruction, ignored");
                    return Ok(None);
                }
                match RegisterId::from_name(name) {
                    Some(reg) => {
                        let bytes =
                            value_bytes(value, reg.size(), self.params.bigend, lineno)?;
                        self.pending.as_mut().unwrap().writes.push(MemWrite {
                            space: AddrSpace::Register,
                            addr: reg.address(self.params.bigend),
                            bytes,
                        });
                    }
                    None => {
                        log::debug!("trace line {lineno}: no stored state for register {name}");
                    }
                }
                self.extend_pending(line_start, line_len, lineno);
                Ok(None)
            }
            Rule::memory => {
                let mut op = "";
                let mut addr = 0;
                let mut value = "";
                for piece in record.into_inner() {
                    match piece.as_rule() {
                        Rule::mkw => op = piece.as_str(),
                        Rule::hex => addr = parse_hex(piece.as_str(), lineno)?,
                        Rule::hex_value => value = piece.as_str(),
                        _ => {}
                    }
                }
                if self.pending.is_none() {
                    warn!("trace line {lineno}: memory access before any instruction, ignored");
                    return Ok(None);
                }
                let size: usize = op[2..].parse().map_err(|_| {
                    ParseError::syntax(lineno, format!("bad memory access size in {op:?}"))
                })?;
                let bytes = value_bytes(value, size, self.params.bigend, lineno)?;
                let pending = self.pending.as_mut().unwrap();
                if op.as_bytes()[1] == b'W' {
                    pending.writes.push(MemWrite {
                        space: AddrSpace::Memory,
                        addr,
                        bytes,
                    });
                } else {
                    pending.reads.push(MemRead {
                        space: AddrSpace::Memory,
                        addr,
                        bytes,
                    });
                }
                self.extend_pending(line_start, line_len, lineno);
                Ok(None)
            }
            Rule::semihost => {
                let mut bounds = [0u64; 2];
                let mut i = 0;
                for piece in record.into_inner() {
                    if piece.as_rule() == Rule::hex {
                        bounds[i] = parse_hex(piece.as_str(), lineno)?;
                        i += 1;
                    }
                }
                let [lo, hi] = bounds;
                if hi < lo {
                    return Err(ParseError::syntax(lineno, "empty semihosting region"));
                }
                if let Some(pending) = &mut self.pending {
                    pending.unknown.push(UnknownRegion { lo, hi });
                    self.extend_pending(line_start, line_len, lineno);
                } else {
                    warn!("trace line {lineno}: semihosting region before any instruction");
                }
                Ok(None)
            }
            other => unreachable!("unexpected record rule {other:?}"),
        }
    }
}

impl<R: BufRead> Iterator for TarmacParser<R> {
    type Item = Result<TraceEvent, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                let finished = self.pending.take()?;
                self.emitted_any = true;
                return Some(Ok(finished));
            }

            let mut raw = String::new();
            let n = match self.input.read_line(&mut raw) {
                Ok(n) => n,
                Err(e) => return Some(Err(ParseError::Io(e))),
            };
            if n == 0 {
                self.done = true;
                continue;
            }
            let line_start = self.byte_pos;
            let lineno = self.next_line;
            self.byte_pos += n as u64;
            self.next_line += 1;

            let text = raw.trim_end_matches(['\n', '\r']);
            if text.trim().is_empty() {
                continue;
            }

            match LineParser::parse(Rule::record, text) {
                Ok(mut pairs) => {
                    let record = pairs
                        .next()
                        .expect("record rule always produces one pair")
                        .into_inner()
                        .next()
                        .expect("record rule always has an inner record");
                    match self.handle_record(record, line_start, n as u64, lineno) {
                        Ok(Some(finished)) => {
                            self.emitted_any = true;
                            return Some(Ok(finished));
                        }
                        Ok(None) => {}
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(_) => {
                    if self.pending.is_some() {
                        // Continuation text belongs to the open event.
                        self.extend_pending(line_start, n as u64, lineno);
                    } else if !self.emitted_any {
                        self.lineno_offset += 1;
                    } else {
                        warn!("trace line {lineno}: unrecognised text skipped");
                    }
                }
            }
        }
    }
}

fn parse_time(text: &str, lineno: u32) -> Result<Time, ParseError> {
    text.parse()
        .map_err(|_| ParseError::syntax(lineno, format!("bad timestamp {text:?}")))
}

fn parse_hex(text: &str, lineno: u32) -> Result<u64, ParseError> {
    u64::from_str_radix(text, 16)
        .map_err(|_| ParseError::syntax(lineno, format!("bad hex value {text:?}")))
}

/// Decode a hex value into `size` bytes of stored representation: the
/// trace's endianness decides whether the low-order byte comes first.
/// Separators are ignored; missing high digits are zero.
fn value_bytes(
    text: &str,
    size: usize,
    bigend: bool,
    lineno: u32,
) -> Result<Vec<u8>, ParseError> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| b.is_ascii_hexdigit())
        .map(|b| (b as char).to_digit(16).unwrap() as u8)
        .collect();
    if digits.len() > size * 2 {
        return Err(ParseError::syntax(
            lineno,
            format!("value {text:?} wider than {size} bytes"),
        ));
    }

    // Big-endian byte array of the value, left-padded with zeros.
    let mut be = vec![0u8; size];
    for (i, &d) in digits.iter().rev().enumerate() {
        let byte = size - 1 - i / 2;
        if i % 2 == 0 {
            be[byte] |= d;
        } else {
            be[byte] |= d << 4;
        }
    }
    if !bigend {
        be.reverse();
    }
    Ok(be)
}
