//! Address translator: (segx, offset) -> physical address.
//!
//! Grounded on the segmentation-only slice of a conventional x86 translation
//! pipeline (base + limit + permission checks), but with a single-level
//! segment descriptor table standing in for segments *and* paging — see
//! the Non-goals in SPEC_FULL.md.

use crate::error::{Irq, VmResult};
use crate::memory::Memory;
use crate::registers::decode_far_pointer;

/// Segment is present.
pub const PERM_P: u8 = 1 << 0;
/// Segment is executable.
pub const PERM_X: u8 = 1 << 1;
/// Segment is readable.
pub const PERM_R: u8 = 1 << 2;
/// Segment is writable.
pub const PERM_W: u8 = 1 << 3;

/// A decoded 32-bit Segment Descriptor Entry.
#[derive(Debug, Clone, Copy)]
pub struct SegDescEntry(u32);

impl SegDescEntry {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        SegDescEntry(raw)
    }

    #[inline]
    fn size_scale(self) -> u32 {
        self.0 & 0b11
    }

    #[inline]
    fn size_granularity(self) -> u32 {
        (self.0 >> 2) & 0b11
    }

    #[inline]
    fn addr_scale(self) -> u32 {
        (self.0 >> 4) & 0b11
    }

    #[inline]
    fn addr_granularity(self) -> u32 {
        (self.0 >> 6) & 0b11
    }

    #[inline]
    fn raw_offset(self) -> u64 {
        ((self.0 >> 8) & 0xFFFF) as u64
    }

    /// Permission bits (P, X, R, W) at bits 24-27.
    #[inline]
    pub fn perm(self) -> u8 {
        ((self.0 >> 24) & 0xF) as u8
    }

    /// IOPL field at bits 28-29.
    #[inline]
    pub fn iopl(self) -> u8 {
        ((self.0 >> 28) & 0b11) as u8
    }

    /// Effective segment size in bytes: `scale x 2^(10*granularity)`.
    #[inline]
    pub fn size(self) -> u64 {
        (1u64 << self.size_scale()) << (10 * self.size_granularity())
    }

    /// Effective physical base: `scale x 2^(10*granularity) + (offset << 2)`.
    #[inline]
    pub fn base(self) -> u64 {
        ((1u64 << self.addr_scale()) << (10 * self.addr_granularity())) + (self.raw_offset() << 2)
    }
}

/// Bounds-check `[addr, addr+size)` against `limit`, honoring the
/// ignore-bounds truncation rule. Returns the (possibly truncated) size.
fn bounds_check(limit: u64, ib: bool, addr: u64, size: u64) -> VmResult<u64> {
    if addr > limit {
        return Err(Irq::SegmentFault);
    }
    let end = addr.saturating_add(size);
    if end > limit {
        if ib {
            Ok(limit - addr)
        } else {
            Err(Irq::SegmentFault)
        }
    } else {
        Ok(size)
    }
}

/// Translate `(segx, addr)` for `size` bytes with the requested `perm` mask.
///
/// On success, returns `(physical_addr, size)` where `size` may have been
/// truncated (only possible when the IB flag is set). On failure, returns
/// the IRQ that should be raised.
///
/// `sdt_far` is the raw SDT register value (`segx<<48 | offset48`); its
/// offset half is used directly as the *physical* base of the segment
/// descriptor table. The SDE for `segx` is fetched by reading physical
/// memory directly rather than recursing through this function again —
/// that bypass is what keeps the SDT's own segment from needing its own
/// translation (see DESIGN.md).
#[allow(clippy::too_many_arguments)]
pub fn translate(
    mem: &Memory,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
    sdt_far: u64,
    segx: u16,
    addr: u64,
    size: u64,
    perm: u8,
) -> VmResult<(u64, u64)> {
    if !v_flag {
        let size = bounds_check(mem.size(), ib_flag, addr, size)?;
        return Ok((addr, size));
    }

    let (_sdt_segx, sdt_base) = decode_far_pointer(sdt_far);
    let sde_addr = sdt_base + (segx as u64) * 4;
    let mut raw = [0u8; 4];
    if !mem.read_bytes(sde_addr, &mut raw) {
        return Err(Irq::SegmentFault);
    }
    let sde = SegDescEntry::from_raw(u32::from_le_bytes(raw));

    let required = perm | PERM_P;
    if (required & sde.perm()) != required || sde.iopl() < cur_iopl {
        return Err(Irq::SegmentProtect);
    }

    let size = bounds_check(sde.size(), ib_flag, addr, size)?;
    Ok((sde.base() + addr, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_translation_within_bounds() {
        let mem = Memory::new(0x1000);
        let (phys, size) = translate(&mem, false, false, 0, 0, 0, 0x10, 4, 0).unwrap();
        assert_eq!(phys, 0x10);
        assert_eq!(size, 4);
    }

    #[test]
    fn identity_translation_out_of_bounds_faults() {
        let mem = Memory::new(0x10);
        let err = translate(&mem, false, false, 0, 0, 0, 0x8, 0x10, 0).unwrap_err();
        assert_eq!(err, Irq::SegmentFault);
    }

    #[test]
    fn identity_translation_truncates_with_ib() {
        let mem = Memory::new(0x10);
        let (phys, size) = translate(&mem, false, true, 0, 0, 0, 0x8, 0x10, 0).unwrap();
        assert_eq!(phys, 0x8);
        assert_eq!(size, 8);
    }

    fn install_sde(mem: &mut Memory, sdt_base: u64, segx: u16, sde: u32) {
        mem.write_bytes(sdt_base + (segx as u64) * 4, &sde.to_le_bytes());
    }

    #[test]
    fn virtual_translation_applies_sde_base() {
        let mut mem = Memory::new(0x2000);
        // size_scale=0 size_gran=1(KiB) -> size=1024; addr_scale=0 addr_gran=0,
        // offset raw=0x100 (<<2 = 0x400) -> base=0x400; perm = P|R|W; iopl=0
        let perm = (super::PERM_P | super::PERM_R | super::PERM_W) as u32;
        let sde: u32 = 0b01 | (0x100 << 8) | (perm << 24);
        install_sde(&mut mem, 0x1000, 2, sde);
        let sdt_far = crate::registers::encode_far_pointer(0, 0x1000);
        let (phys, size) =
            translate(&mem, true, false, 0, sdt_far, 2, 0x10, 4, super::PERM_R).unwrap();
        assert_eq!(phys, 0x400 + 0x10);
        assert_eq!(size, 4);
    }

    #[test]
    fn virtual_translation_missing_perm_protects() {
        let mut mem = Memory::new(0x2000);
        let perm = super::PERM_P as u32; // no R, no W
        let sde: u32 = 0b01 | (0x100 << 8) | (perm << 24);
        install_sde(&mut mem, 0x1000, 2, sde);
        let sdt_far = crate::registers::encode_far_pointer(0, 0x1000);
        let err = translate(&mem, true, false, 0, sdt_far, 2, 0x10, 4, super::PERM_W).unwrap_err();
        assert_eq!(err, Irq::SegmentProtect);
    }

    #[test]
    fn virtual_translation_size_truncated() {
        let mut mem = Memory::new(0x2000);
        // size_scale=0b11 (factor 8), size_gran=0 (bytes) -> size=8.
        let perm = (super::PERM_P | super::PERM_R) as u32;
        let sde: u32 = 0b11 | (0 << 8) | (perm << 24);
        install_sde(&mut mem, 0x1000, 2, sde);
        let sdt_far = crate::registers::encode_far_pointer(0, 0x1000);
        let (_, size) =
            translate(&mem, true, true, 0, sdt_far, 2, 0, 32, super::PERM_R).unwrap();
        assert_eq!(size, 8);
    }
}
