//! The synthetic register file.
//!
//! Registers live in the memory tree under their own address space, so every
//! register is assigned a fixed made-up address and a width. Architectural
//! aliasing falls out of address overlap: `w5` is the low half of `x5`,
//! AArch32 `r5` occupies the same bytes, and `s3`/`d3` are the low bytes of
//! `q3`'s slot. Values are stored in the trace's byte order, so where the
//! low half of a wider register sits within its slot depends on endianness:
//! at the start of the slot for little-endian traces, at the end for
//! big-endian ones. Sub-register addresses account for that, keeping the
//! aliasing architectural rather than positional.

use crate::disk::Addr;

/// Base of the general-purpose slots (`x0..x30`, 16 bytes apart).
const CORE_BASE: Addr = 0x000;
/// Stack pointer slot.
const SP_ADDR: Addr = 0x400;
/// Status register slot.
const PSR_ADDR: Addr = 0x410;
/// Instruction-set flags pseudo-register.
const IFLAGS_ADDR: Addr = 0x418;
/// Base of the vector slots (`q0..q31`, 16 bytes apart).
const VECTOR_BASE: Addr = 0x800;

/// Bits of the iflags pseudo-register.
pub const IFLAGS_THUMB: u8 = 0x01;
pub const IFLAGS_AARCH64: u8 = 0x02;

/// Identifies one architectural register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterId {
    /// AArch64 `x0..x30` (8 bytes). `x30` is the link register.
    X(u8),
    /// AArch64 `w0..w30` (low 4 bytes of the `x` slot).
    W(u8),
    /// AArch32 `r0..r14` (4 bytes, sharing the corresponding `x` slot).
    R(u8),
    /// Stack pointer (8 bytes).
    Sp,
    /// Status register (4 bytes).
    Psr,
    /// Instruction-set state pseudo-register (1 byte).
    Iflags,
    /// Vector `q0..q31` (16 bytes).
    Q(u8),
    /// `d0..d31` (low 8 bytes of the `q` slot).
    D(u8),
    /// `s0..s31` (low 4 bytes of the `q` slot).
    S(u8),
}

impl RegisterId {
    /// Synthetic address of the register's first stored byte.
    ///
    /// A sub-register must cover the bytes holding the least-significant
    /// bits of its parent's slot, so under big-endian storage (where those
    /// bytes come last) it is offset to the tail of the slot.
    pub fn address(self, bigend: bool) -> Addr {
        let (slot, slot_size) = match self {
            RegisterId::X(n) | RegisterId::W(n) | RegisterId::R(n) => {
                (CORE_BASE + 16 * n as Addr, 8)
            }
            RegisterId::Sp => (SP_ADDR, 8),
            RegisterId::Psr => (PSR_ADDR, 4),
            RegisterId::Iflags => (IFLAGS_ADDR, 1),
            RegisterId::Q(n) | RegisterId::D(n) | RegisterId::S(n) => {
                (VECTOR_BASE + 16 * n as Addr, 16)
            }
        };
        if bigend {
            slot + slot_size - self.size() as Addr
        } else {
            slot
        }
    }

    /// Width in bytes.
    pub fn size(self) -> usize {
        match self {
            RegisterId::X(_) | RegisterId::Sp | RegisterId::D(_) => 8,
            RegisterId::W(_) | RegisterId::R(_) | RegisterId::Psr | RegisterId::S(_) => 4,
            RegisterId::Iflags => 1,
            RegisterId::Q(_) => 16,
        }
    }

    /// Resolve a register name as spelled in trace text. Returns `None` for
    /// names with no stored state (`pc`, zero registers, unknown names).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let numbered = |prefix: &str, max: u8| -> Option<u8> {
            lower
                .strip_prefix(prefix)
                .and_then(|rest| rest.parse::<u8>().ok())
                .filter(|&n| n <= max)
        };

        match lower.as_str() {
            "sp" | "r13" | "wsp" => return Some(RegisterId::Sp),
            "lr" | "x30" => return Some(RegisterId::X(30)),
            "r14" => return Some(RegisterId::R(14)),
            "cpsr" | "psr" | "spsr" | "apsr" => return Some(RegisterId::Psr),
            "pc" | "r15" | "xzr" | "wzr" => return None,
            _ => {}
        }
        if let Some(n) = numbered("x", 30) {
            return Some(RegisterId::X(n));
        }
        if let Some(n) = numbered("w", 30) {
            return Some(RegisterId::W(n));
        }
        if let Some(n) = numbered("r", 14) {
            return Some(RegisterId::R(n));
        }
        if let Some(n) = numbered("q", 31) {
            return Some(RegisterId::Q(n));
        }
        if let Some(n) = numbered("d", 31) {
            return Some(RegisterId::D(n));
        }
        if let Some(n) = numbered("s", 31) {
            return Some(RegisterId::S(n));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_cover_the_parents_low_bytes() {
        // Little-endian storage puts the low half first.
        assert_eq!(
            RegisterId::W(5).address(false),
            RegisterId::X(5).address(false)
        );
        assert_eq!(
            RegisterId::R(5).address(false),
            RegisterId::X(5).address(false)
        );
        assert_eq!(
            RegisterId::D(3).address(false),
            RegisterId::Q(3).address(false)
        );
        assert_eq!(
            RegisterId::S(3).address(false),
            RegisterId::Q(3).address(false)
        );

        // Big-endian storage puts it last, so sub-registers shift to the
        // tail of the parent's slot.
        assert_eq!(
            RegisterId::W(5).address(true),
            RegisterId::X(5).address(true) + 4
        );
        assert_eq!(
            RegisterId::R(5).address(true),
            RegisterId::X(5).address(true) + 4
        );
        assert_eq!(
            RegisterId::D(3).address(true),
            RegisterId::Q(3).address(true) + 8
        );
        assert_eq!(
            RegisterId::S(3).address(true),
            RegisterId::Q(3).address(true) + 12
        );

        // Full-width registers sit at their slot start either way.
        assert_eq!(RegisterId::X(5).address(true), RegisterId::X(5).address(false));
        assert_eq!(RegisterId::Q(3).address(true), RegisterId::Q(3).address(false));
        assert_eq!(RegisterId::D(3).size(), 8);
        assert_eq!(RegisterId::Q(3).size(), 16);
    }

    #[test]
    fn sub_registers_stay_inside_the_parent_slot() {
        for bigend in [false, true] {
            let within = |sub: RegisterId, parent: RegisterId| {
                sub.address(bigend) >= parent.address(bigend)
                    && sub.address(bigend) + sub.size() as Addr
                        <= parent.address(bigend) + parent.size() as Addr
            };
            assert!(within(RegisterId::W(7), RegisterId::X(7)));
            assert!(within(RegisterId::R(7), RegisterId::X(7)));
            assert!(within(RegisterId::D(9), RegisterId::Q(9)));
            assert!(within(RegisterId::S(9), RegisterId::Q(9)));
        }
    }

    #[test]
    fn slots_do_not_overlap_across_registers() {
        for bigend in [false, true] {
            let end = |r: RegisterId| r.address(bigend) + r.size() as Addr;
            assert!(end(RegisterId::X(30)) <= SP_ADDR);
            assert!(end(RegisterId::Sp) <= PSR_ADDR);
            assert!(end(RegisterId::Psr) <= IFLAGS_ADDR);
            assert!(end(RegisterId::Iflags) <= VECTOR_BASE);
        }
    }

    #[test]
    fn name_resolution() {
        assert_eq!(RegisterId::from_name("r0"), Some(RegisterId::R(0)));
        assert_eq!(RegisterId::from_name("X29"), Some(RegisterId::X(29)));
        assert_eq!(RegisterId::from_name("lr"), Some(RegisterId::X(30)));
        assert_eq!(RegisterId::from_name("sp"), Some(RegisterId::Sp));
        assert_eq!(RegisterId::from_name("cpsr"), Some(RegisterId::Psr));
        assert_eq!(RegisterId::from_name("d12"), Some(RegisterId::D(12)));
        assert_eq!(RegisterId::from_name("pc"), None);
        assert_eq!(RegisterId::from_name("x31"), None);
        assert_eq!(RegisterId::from_name("bogus"), None);
    }
}
