//! Push/pop through the stack segment.
//!
//! Push decrements SP before writing; pop reads before incrementing SP —
//! the reverse order faults instead of committing a corrupt transfer (see
//! `iret`'s note in DESIGN.md about a pop/push mixup in the source this was
//! distilled from).

use crate::error::{Irq, VmResult};
use crate::memory::Memory;
use crate::registers::{RegisterFile, SegReg};
use crate::translate::{self, PERM_R, PERM_W};

/// Push `buf.len()` bytes (1, 2, 4, or 8) onto the stack segment.
pub fn push(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
    buf: &[u8],
) -> VmResult<()> {
    let new_sp = regs.sp().wrapping_sub(buf.len() as u64);
    let sdt_far = regs.get(crate::registers::Reg::Sdt);
    let segx = regs.segment(SegReg::Stack);

    let (phys, size) = translate::translate(
        mem,
        v_flag,
        ib_flag,
        cur_iopl,
        sdt_far,
        segx,
        new_sp,
        buf.len() as u64,
        PERM_W,
    )
    .map_err(|_| Irq::StackOverflow)?;

    if size as usize != buf.len() || !mem.write_bytes(phys, buf) {
        return Err(Irq::StackOverflow);
    }

    regs.set_sp(new_sp);
    Ok(())
}

/// Pop `buf.len()` bytes (1, 2, 4, or 8) off the stack segment.
pub fn pop(
    mem: &Memory,
    regs: &mut RegisterFile,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
    buf: &mut [u8],
) -> VmResult<()> {
    let sp = regs.sp();
    let sdt_far = regs.get(crate::registers::Reg::Sdt);
    let segx = regs.segment(SegReg::Stack);

    let (phys, size) = translate::translate(
        mem,
        v_flag,
        ib_flag,
        cur_iopl,
        sdt_far,
        segx,
        sp,
        buf.len() as u64,
        PERM_R,
    )
    .map_err(|_| Irq::StackUnderflow)?;

    if size as usize != buf.len() || !mem.read_bytes(phys, buf) {
        return Err(Irq::StackUnderflow);
    }

    regs.set_sp(sp.wrapping_add(buf.len() as u64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Reg;

    #[test]
    fn push_then_pop_round_trips_and_restores_sp() {
        let mut mem = Memory::new(0x1000);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Sp, 0x100);

        push(&mut mem, &mut regs, false, false, 0, &0x1122_3344u32.to_le_bytes()).unwrap();
        assert_eq!(regs.sp(), 0xFC);

        let mut buf = [0u8; 4];
        pop(&mem, &mut regs, false, false, 0, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0x1122_3344);
        assert_eq!(regs.sp(), 0x100);
    }

    #[test]
    fn pop_past_top_of_stack_underflows() {
        let mem = Memory::new(0x10);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Sp, 0x10);
        let mut buf = [0u8; 8];
        let err = pop(&mem, &mut regs, false, false, 0, &mut buf).unwrap_err();
        assert_eq!(err, Irq::StackUnderflow);
    }

    #[test]
    fn push_below_segment_base_overflows() {
        let mut mem = Memory::new(0x10);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Sp, 2);
        let err = push(&mut mem, &mut regs, false, false, 0, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err, Irq::StackOverflow);
    }
}
