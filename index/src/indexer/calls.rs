//! Call-depth tracking.
//!
//! The trace does not announce calls and returns, so depth is estimated:
//! the parser's mnemonic hint supplies the obvious cases, and a shadow
//! stack of expected return addresses catches returns performed by plain
//! loads or branches. The estimate can be wrong on unusual control flow;
//! whatever it says is what gets recorded, and depth-based queries inherit
//! the approximation.

use log::debug;

use crate::disk::Addr;
use crate::format::SENTINEL_DEPTH;
use crate::parser::{CallHint, EventKind, TraceEvent};
use crate::registers::RegisterId;

pub struct CallTracker {
    depth: u32,
    /// Expected return addresses of open frames, innermost last.
    stack: Vec<Addr>,
    bigend: bool,
    debug: bool,
}

impl CallTracker {
    pub fn new(bigend: bool, debug: bool) -> Self {
        Self {
            depth: 0,
            stack: Vec::new(),
            bigend,
            debug,
        }
    }

    /// Depth to record for this event. Updates the tracker for the
    /// following events.
    pub fn observe(&mut self, event: &TraceEvent) -> u32 {
        let pc = match &event.kind {
            EventKind::Exception { .. } => {
                let depth = self.depth;
                // Entering the handler deepens the stack; the handler's
                // return is recognised by its ERET, so the expected return
                // address never needs to match.
                self.enter(Addr::MAX);
                if self.debug {
                    debug!(
                        "line {}: exception, depth {} -> {}",
                        event.first_line, depth, self.depth
                    );
                }
                return depth;
            }
            EventKind::Instruction { pc, .. } => *pc,
        };

        // Arriving at an expected return address means a return the
        // mnemonic heuristic did not recognise.
        if self.stack.last() == Some(&pc) && event.call_hint != CallHint::Return {
            self.stack.pop();
            self.depth = self.depth.saturating_sub(1);
            if self.debug {
                debug!(
                    "line {}: arrived at return address {pc:#x}, depth -> {}",
                    event.first_line, self.depth
                );
            }
        }

        let depth = self.depth;
        match event.call_hint {
            CallHint::Call => {
                let ret = self.link_register_value(event).unwrap_or(pc + 4);
                self.enter(ret);
                if self.debug {
                    debug!(
                        "line {}: call at {pc:#x}, return expected at {ret:#x}, depth {} -> {}",
                        event.first_line, depth, self.depth
                    );
                }
            }
            CallHint::Return => {
                self.stack.pop();
                self.depth = self.depth.saturating_sub(1);
                if self.debug {
                    debug!(
                        "line {}: return at {pc:#x}, depth {} -> {}",
                        event.first_line, depth, self.depth
                    );
                }
            }
            CallHint::None => {}
        }
        depth
    }

    fn enter(&mut self, expected_return: Addr) {
        self.stack.push(expected_return);
        self.depth = (self.depth + 1).min(SENTINEL_DEPTH - 1);
    }

    /// The value this event wrote to the link register, if any.
    fn link_register_value(&self, event: &TraceEvent) -> Option<Addr> {
        let lr_slots = [
            RegisterId::X(30).address(self.bigend),
            RegisterId::R(14).address(self.bigend),
        ];
        event
            .writes
            .iter()
            .find(|w| {
                w.space == crate::format::AddrSpace::Register
                    && lr_slots.contains(&w.addr)
                    && w.bytes.len() <= 8
            })
            .map(|w| {
                let mut raw = [0u8; 8];
                if self.bigend {
                    raw[8 - w.bytes.len()..].copy_from_slice(&w.bytes);
                    u64::from_be_bytes(raw)
                } else {
                    raw[..w.bytes.len()].copy_from_slice(&w.bytes);
                    u64::from_le_bytes(raw)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AddrSpace;
    use crate::parser::{InstructionSet, MemWrite};

    fn instr(line: u32, pc: Addr, disasm: &str) -> TraceEvent {
        TraceEvent {
            time: line as u64,
            kind: EventKind::Instruction {
                pc,
                iset: InstructionSet::A32,
                disasm: disasm.to_string(),
            },
            pos: 0,
            len: 0,
            first_line: line,
            line_count: 1,
            writes: Vec::new(),
            reads: Vec::new(),
            unknown: Vec::new(),
            call_hint: crate::parser::call_hint(disasm),
        }
    }

    fn with_lr(mut event: TraceEvent, lr: Addr) -> TraceEvent {
        event.writes.push(MemWrite {
            space: AddrSpace::Register,
            addr: RegisterId::R(14).address(false),
            bytes: (lr as u32).to_le_bytes().to_vec(),
        });
        event
    }

    #[test]
    fn call_and_return_bracket_depth() {
        let mut tracker = CallTracker::new(false, false);
        assert_eq!(tracker.observe(&instr(1, 0x8000, "MOV r0,#1")), 0);
        assert_eq!(
            tracker.observe(&with_lr(instr(2, 0x8004, "BL helper"), 0x8008)),
            0
        );
        assert_eq!(tracker.observe(&instr(3, 0x9000, "ADD r0,r0,#1")), 1);
        assert_eq!(tracker.observe(&instr(4, 0x9004, "BX lr")), 1);
        assert_eq!(tracker.observe(&instr(5, 0x8008, "MOV r1,#2")), 0);
    }

    #[test]
    fn missed_return_caught_by_arrival() {
        let mut tracker = CallTracker::new(false, false);
        tracker.observe(&with_lr(instr(1, 0x8000, "BL helper"), 0x8004));
        assert_eq!(tracker.observe(&instr(2, 0x9000, "LDR pc,[sp]")), 1);
        // No recognisable return mnemonic, but control arrived at the
        // expected return address.
        assert_eq!(tracker.observe(&instr(3, 0x8004, "MOV r0,#0")), 0);
    }

    #[test]
    fn depth_never_goes_negative() {
        let mut tracker = CallTracker::new(false, false);
        assert_eq!(tracker.observe(&instr(1, 0x9004, "RET")), 0);
        assert_eq!(tracker.observe(&instr(2, 0x9008, "RET")), 0);
        assert_eq!(tracker.observe(&instr(3, 0x900c, "MOV r0,#1")), 0);
    }

    #[test]
    fn exception_and_eret() {
        let mut tracker = CallTracker::new(false, false);
        let mut exc = instr(1, 0, "");
        exc.kind = EventKind::Exception {
            text: "CPU exception".into(),
        };
        exc.call_hint = CallHint::None;
        assert_eq!(tracker.observe(&exc), 0);
        assert_eq!(tracker.observe(&instr(2, 0x1000, "MRS x0,ESR_EL1")), 1);
        assert_eq!(tracker.observe(&instr(3, 0x1004, "ERET")), 1);
        assert_eq!(tracker.observe(&instr(4, 0x8000, "NOP")), 0);
    }
}
