//! Fixed-width little-endian scalar fields for on-disk records.
//!
//! Every persistent structure in the index file is a `#[repr(C)]` composition
//! of these wrappers. They are plain byte arrays, so the composed structs have
//! alignment 1 and no padding, and a slice of the arena can be viewed as any
//! record type at any byte offset.

use bytemuck::{Pod, Zeroable};

/// Byte offset into the index file. Acts as a persistent handle; 0 is the
/// null handle (the file starts with the magic number, so no allocation can
/// ever land there).
pub type Off = u64;

/// Trace timestamp, in whatever unit the trace uses.
pub type Time = u64;

/// Memory or synthetic register-file address.
pub type Addr = u64;

#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct DiskU8([u8; 1]);

#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct DiskU32([u8; 4]);

#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct DiskU64([u8; 8]);

impl DiskU8 {
    pub fn get(self) -> u8 {
        self.0[0]
    }

    pub fn set(&mut self, v: u8) {
        self.0[0] = v;
    }
}

impl DiskU32 {
    pub fn get(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn set(&mut self, v: u32) {
        self.0 = v.to_le_bytes();
    }
}

impl DiskU64 {
    pub fn get(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    pub fn set(&mut self, v: u64) {
        self.0 = v.to_le_bytes();
    }
}

impl From<u8> for DiskU8 {
    fn from(v: u8) -> Self {
        Self([v])
    }
}

impl From<u32> for DiskU32 {
    fn from(v: u32) -> Self {
        Self(v.to_le_bytes())
    }
}

impl From<u64> for DiskU64 {
    fn from(v: u64) -> Self {
        Self(v.to_le_bytes())
    }
}

impl std::fmt::Debug for DiskU8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::fmt::Debug for DiskU32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::fmt::Debug for DiskU64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_encoding() {
        let v = DiskU32::from(0x11223344);
        assert_eq!(bytemuck::bytes_of(&v), &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(v.get(), 0x11223344);

        let v = DiskU64::from(0x0102030405060708);
        assert_eq!(
            bytemuck::bytes_of(&v),
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn wrappers_have_alignment_one() {
        assert_eq!(std::mem::align_of::<DiskU8>(), 1);
        assert_eq!(std::mem::align_of::<DiskU32>(), 1);
        assert_eq!(std::mem::align_of::<DiskU64>(), 1);
        assert_eq!(std::mem::size_of::<DiskU32>(), 4);
        assert_eq!(std::mem::size_of::<DiskU64>(), 8);
    }
}
