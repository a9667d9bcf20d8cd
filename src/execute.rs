//! Per-opcode semantics.
//!
//! The one-byte opcode space here is sparse — only `0x00..=0x0F` do
//! anything, everything else (including the `0xF0` two-byte escape) raises
//! `UNDEFINED_INST`. A dense match over the full byte range makes that
//! default exhaustive rather than relying on a fallthrough `_` that could
//! silently swallow a typo'd opcode constant.

use crate::error::{Irq, VmResult};
use crate::flags::{self, OperandSize};
use crate::instruction::InstWork;
use crate::memory::Memory;
use crate::registers::{Reg, RegisterFile, SegReg};
use crate::translate::{self, PERM_R, PERM_W};

/// Resolve the ModRM R/M operand's effective address (memory form only;
/// `mod=3` has no memory operand and callers must not call this for it).
///
/// This is the first point a live register file is available to the
/// decoded ModRM/SIB/disp fields, so effective-address arithmetic — base
/// register, scaled index, displacement — happens here rather than in the
/// decoder.
fn resolve_effective_addr(work: &InstWork, regs: &RegisterFile) -> u64 {
    let addr_width = work.address_size;
    let rm = work.modrm.rm;
    let md = work.modrm.md;

    if md == 0 && rm == 5 {
        return work.disp as u64;
    }

    if rm == 4 {
        let sib = work.sib;
        let mut value = if md == 0 && sib.base == 5 {
            0
        } else {
            regs.read(sib.base, addr_width)
        };
        if sib.index != 4 {
            value = value.wrapping_add(regs.read(sib.index, addr_width) << sib.scale);
        }
        return value.wrapping_add(work.disp as u64);
    }

    regs.read(rm, addr_width).wrapping_add(work.disp as u64)
}

/// Read the ModRM R/M operand: register direct at `mod=3`, else memory via
/// the current segment at the resolved effective address.
fn read_rm(
    mem: &Memory,
    regs: &RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<u64> {
    if work.modrm.md == 3 {
        return Ok(regs.read(work.modrm.rm, work.operand_size));
    }
    let addr = resolve_effective_addr(work, regs);
    let sdt_far = regs.get(Reg::Sdt);
    let segx = regs.segment(work.segx);
    let size = work.operand_size.bytes() as u64;
    let (phys, got) = translate::translate(
        mem, v_flag, ib_flag, cur_iopl, sdt_far, segx, addr, size, PERM_R,
    )?;
    if got != size {
        return Err(Irq::SegmentFault);
    }
    let mut buf = [0u8; 8];
    if !mem.read_bytes(phys, &mut buf[..size as usize]) {
        return Err(Irq::SegmentFault);
    }
    Ok(u64::from_le_bytes(buf))
}

/// Write the ModRM R/M operand.
fn write_rm(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
    val: u64,
) -> VmResult<()> {
    if work.modrm.md == 3 {
        regs.write(work.modrm.rm, work.operand_size, val);
        return Ok(());
    }
    let addr = resolve_effective_addr(work, regs);
    let sdt_far = regs.get(Reg::Sdt);
    let segx = regs.segment(work.segx);
    let size = work.operand_size.bytes() as u64;
    let (phys, got) = translate::translate(
        mem, v_flag, ib_flag, cur_iopl, sdt_far, segx, addr, size, PERM_W,
    )?;
    if got != size {
        return Err(Irq::SegmentFault);
    }
    let bytes = val.to_le_bytes();
    if !mem.write_bytes(phys, &bytes[..size as usize]) {
        return Err(Irq::SegmentFault);
    }
    Ok(())
}

/// A control-flow request that needs the interrupt engine, which `execute`
/// itself has no access to (it only touches memory and registers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecAction {
    /// `INT imm8`: dispatch `int(vector)`.
    Interrupt(u8),
    /// `IRET`: pop the saved context.
    Return,
}

/// Outcome of executing one instruction: a fault, a request to the
/// interrupt engine, or neither; plus whether the REP loop continues.
pub struct ExecOutcome {
    pub fault: Option<Irq>,
    pub action: Option<ExecAction>,
    /// `true` if a REP-prefixed instruction should be re-executed next tick
    /// instead of fetching a new one.
    pub repeat: bool,
}

/// Execute the instruction already decoded into `work`.
pub fn execute(mem: &mut Memory, regs: &mut RegisterFile, work: &InstWork) -> ExecOutcome {
    let v_flag = (regs.flags() & flags::V) != 0;
    let ib_flag = (regs.flags() & flags::IB) != 0;
    let cur_iopl = flags::iopl(regs.flags());

    // REP: decrement CX first; CX=0 on entry means zero iterations for this
    // tick (the clock driver does not call execute again once CX hits 0).
    if work.rep {
        let cx = regs.get(Reg::Cx);
        if cx == 0 {
            return ExecOutcome { fault: None, action: None, repeat: false };
        }
        regs.set(Reg::Cx, cx - 1);
    }

    let result = run_opcode(mem, regs, work, v_flag, ib_flag, cur_iopl);

    let repeat = if work.rep {
        let cx_left = regs.get(Reg::Cx);
        let cc_ok =
            !rep_cc_defined(work.op0) || check_rep_cc(work.rep_cc, regs.flags());
        cx_left != 0 && cc_ok && matches!(result, Ok(None))
    } else {
        false
    };

    match result {
        Ok(action) => ExecOutcome { fault: None, action, repeat },
        Err(irq) => ExecOutcome { fault: Some(irq), action: None, repeat: false },
    }
}

/// Whether this opcode defines a `REP_cc` condition (only CMP does).
fn rep_cc_defined(op: u8) -> bool {
    matches!(op, 0x0A | 0x0B | 0x0C | 0x0D)
}

/// `repe`/`repne`-style check against the Z flag, for opcodes that define
/// a `REP_cc` condition.
fn check_rep_cc(rep_cc: bool, flags: u64) -> bool {
    let zero = (flags & flags::Z) != 0;
    if rep_cc {
        zero
    } else {
        !zero
    }
}

fn run_opcode(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<Option<ExecAction>> {
    if work.is_escaped() {
        return Err(Irq::UndefinedInst);
    }

    match work.op0 {
        0x00 | 0x01 => add_reg_rm(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x02 | 0x03 => add_rm_reg(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x04 | 0x05 => sub_reg_rm(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x06 | 0x07 => sub_rm_reg(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x08 => Ok(Some(ExecAction::Interrupt(work.imm as u8))),
        0x09 => Ok(Some(ExecAction::Return)),
        0x0A | 0x0B => cmp_reg_rm(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x0C | 0x0D => cmp_rm_reg(mem, regs, work, v_flag, ib_flag, cur_iopl).map(|_| None),
        0x0E => Err(Irq::Breakpoint),
        0x0F => Err(Irq::UndefinedInst),
        _ => Err(Irq::UndefinedInst),
    }
}

fn add_reg_rm(
    mem: &Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = reg_val.wrapping_add(rm_val) & work.operand_size.mask();
    regs.write(work.modrm.reg, work.operand_size, result);
    let f = flags::flags_add(reg_val, rm_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

fn add_rm_reg(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = rm_val.wrapping_add(reg_val) & work.operand_size.mask();
    write_rm(mem, regs, work, v_flag, ib_flag, cur_iopl, result)?;
    let f = flags::flags_add(rm_val, reg_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

fn sub_reg_rm(
    mem: &Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = reg_val.wrapping_sub(rm_val) & work.operand_size.mask();
    regs.write(work.modrm.reg, work.operand_size, result);
    let f = flags::flags_sub(reg_val, rm_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

fn sub_rm_reg(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = rm_val.wrapping_sub(reg_val) & work.operand_size.mask();
    write_rm(mem, regs, work, v_flag, ib_flag, cur_iopl, result)?;
    let f = flags::flags_sub(rm_val, reg_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

fn cmp_reg_rm(
    mem: &Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = reg_val.wrapping_sub(rm_val) & work.operand_size.mask();
    let f = flags::flags_sub(reg_val, rm_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

fn cmp_rm_reg(
    mem: &Memory,
    regs: &mut RegisterFile,
    work: &InstWork,
    v_flag: bool,
    ib_flag: bool,
    cur_iopl: u8,
) -> VmResult<()> {
    let rm_val = read_rm(mem, regs, work, v_flag, ib_flag, cur_iopl)?;
    let reg_val = regs.read(work.modrm.reg, work.operand_size);
    let result = rm_val.wrapping_sub(reg_val) & work.operand_size.mask();
    let f = flags::flags_sub(rm_val, reg_val, result, work.operand_size);
    let mut flags = regs.flags();
    flags::update_flags(&mut flags, f);
    regs.set_flags(flags);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::ModRm;

    fn reg_direct_work(op: u8, reg: u8, rm: u8, size: OperandSize) -> InstWork {
        let mut w = InstWork::new();
        w.op0 = op;
        w.modrm = ModRm { md: 3, reg, rm };
        w.operand_size = size;
        w.segx = SegReg::Data;
        w
    }

    #[test]
    fn add_register_direct_updates_dest_and_flags() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Ax, 5);
        regs.set(Reg::Cx, 7);
        let w = reg_direct_work(0x01, Reg::Cx as u8, Reg::Ax as u8, OperandSize::Qword);

        let outcome = execute(&mut mem, &mut regs, &w);
        assert!(outcome.fault.is_none());
        assert_eq!(regs.get(Reg::Cx), 12);
    }

    #[test]
    fn sub_register_direct_sets_zero_flag_on_equal_operands() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Ax, 9);
        regs.set(Reg::Cx, 9);
        let w = reg_direct_work(0x05, Reg::Cx as u8, Reg::Ax as u8, OperandSize::Qword);

        execute(&mut mem, &mut regs, &w);
        assert_eq!(regs.get(Reg::Cx), 0);
        assert_ne!(regs.flags() & flags::Z, 0);
    }

    #[test]
    fn cmp_discards_result_but_sets_flags() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Ax, 9);
        regs.set(Reg::Cx, 9);
        let w = reg_direct_work(0x0B, Reg::Cx as u8, Reg::Ax as u8, OperandSize::Qword);

        execute(&mut mem, &mut regs, &w);
        assert_eq!(regs.get(Reg::Cx), 9); // unchanged
        assert_ne!(regs.flags() & flags::Z, 0);
    }

    #[test]
    fn breakpoint_opcode_raises_breakpoint() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        let mut w = InstWork::new();
        w.op0 = 0x0E;
        let outcome = execute(&mut mem, &mut regs, &w);
        assert_eq!(outcome.fault, Some(Irq::Breakpoint));
    }

    #[test]
    fn unknown_opcode_raises_undefined_inst() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        let mut w = InstWork::new();
        w.op0 = 0x42;
        let outcome = execute(&mut mem, &mut regs, &w);
        assert_eq!(outcome.fault, Some(Irq::UndefinedInst));
    }

    #[test]
    fn escaped_two_byte_opcode_is_undefined() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        let mut w = InstWork::new();
        w.op0 = 0xF0;
        w.op1 = 0x05;
        let outcome = execute(&mut mem, &mut regs, &w);
        assert_eq!(outcome.fault, Some(Irq::UndefinedInst));
    }

    #[test]
    fn int_imm8_requests_interrupt_action_with_vector() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        let mut w = InstWork::new();
        w.op0 = 0x08;
        w.imm = 3;
        let outcome = execute(&mut mem, &mut regs, &w);
        assert_eq!(outcome.fault, None);
        assert_eq!(outcome.action, Some(ExecAction::Interrupt(3)));
    }

    #[test]
    fn iret_requests_return_action() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        let mut w = InstWork::new();
        w.op0 = 0x09;
        let outcome = execute(&mut mem, &mut regs, &w);
        assert_eq!(outcome.action, Some(ExecAction::Return));
    }

    #[test]
    fn add_memory_operand_round_trips_through_translator() {
        let mut mem = Memory::new(0x100);
        let mut regs = RegisterFile::zeroed();
        regs.set(Reg::Ax, 4);
        regs.set(Reg::Cx, 0); // base register for the r/m operand
        mem.write_bytes(0x10, &9u64.to_le_bytes());

        let mut w = InstWork::new();
        w.op0 = 0x01; // ADD r,r/m -> reg <- reg + rm
        w.operand_size = OperandSize::Qword;
        w.modrm = ModRm { md: 0, reg: Reg::Ax as u8, rm: Reg::Cx as u8 };
        w.disp = 0x10;
        w.segx = SegReg::Data;

        let outcome = execute(&mut mem, &mut regs, &w);
        assert!(outcome.fault.is_none());
        assert_eq!(regs.get(Reg::Ax), 13);
    }
}
