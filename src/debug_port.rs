//! `DebugPort`: the non-interactive facade over the interfaces an
//! interactive debugger front-end would consume (SPEC_FULL.md §6). No such
//! front-end is built here; this type exists so that collaborator's four
//! operations have a concrete, tested implementation to call.

use crate::error::VmResult;
use crate::machine::Machine;
use crate::registers::{Reg, SegReg};
use crate::translate::{PERM_R, PERM_W};

/// Opcode used to install a breakpoint byte (`INT 3`).
pub const BREAKPOINT_OPCODE: u8 = 0x0E;

/// A read-only-except-for-breakpoints view over a [`Machine`], exposing
/// exactly the operations a debugger collaborator needs.
pub struct DebugPort<'m> {
    machine: &'m mut Machine,
}

impl<'m> DebugPort<'m> {
    pub fn new(machine: &'m mut Machine) -> Self {
        DebugPort { machine }
    }

    /// Read `buf.len()` bytes from `(segx, addr)` through the translator.
    pub fn read_memory(&self, segx: u16, addr: u64, buf: &mut [u8]) -> VmResult<()> {
        let m = &self.machine;
        let v_flag = (m.regs.flags() & crate::flags::V) != 0;
        let ib_flag = (m.regs.flags() & crate::flags::IB) != 0;
        let cur_iopl = crate::flags::iopl(m.regs.flags());
        let sdt_far = m.regs.get(Reg::Sdt);
        let (phys, size) = crate::translate::translate(
            &m.mem,
            v_flag,
            ib_flag,
            cur_iopl,
            sdt_far,
            segx,
            addr,
            buf.len() as u64,
            PERM_R,
        )?;
        if size as usize != buf.len() || !m.mem.read_bytes(phys, buf) {
            return Err(crate::error::Irq::SegmentFault);
        }
        Ok(())
    }

    /// Write `buf` to `(segx, addr)` through the translator.
    pub fn write_memory(&mut self, segx: u16, addr: u64, buf: &[u8]) -> VmResult<()> {
        let m = &mut self.machine;
        let v_flag = (m.regs.flags() & crate::flags::V) != 0;
        let ib_flag = (m.regs.flags() & crate::flags::IB) != 0;
        let cur_iopl = crate::flags::iopl(m.regs.flags());
        let sdt_far = m.regs.get(Reg::Sdt);
        let (phys, size) = crate::translate::translate(
            &m.mem,
            v_flag,
            ib_flag,
            cur_iopl,
            sdt_far,
            segx,
            addr,
            buf.len() as u64,
            PERM_W,
        )?;
        if size as usize != buf.len() || !m.mem.write_bytes(phys, buf) {
            return Err(crate::error::Irq::SegmentFault);
        }
        Ok(())
    }

    /// Read a kernel register by its raw 0-15 index.
    pub fn read_register(&self, index: u8) -> u64 {
        self.machine.regs.reg[index as usize]
    }

    /// Write a kernel register by its raw 0-15 index.
    pub fn write_register(&mut self, index: u8, val: u64) {
        self.machine.regs.reg[index as usize] = val;
    }

    /// Read a segment register.
    pub fn read_segment(&self, seg: SegReg) -> u16 {
        self.machine.regs.segment(seg)
    }

    /// Write a segment register.
    pub fn write_segment(&mut self, seg: SegReg, val: u16) {
        self.machine.regs.set_segment(seg, val);
    }

    /// Install a breakpoint by overwriting the byte at `(segx, addr)` with
    /// `INT 3` (`0x0E`). Returns the byte that was there before, so a
    /// caller can restore it later.
    pub fn set_breakpoint(&mut self, segx: u16, addr: u64) -> VmResult<u8> {
        let mut prev = [0u8; 1];
        self.read_memory(segx, addr, &mut prev)?;
        self.write_memory(segx, addr, &[BREAKPOINT_OPCODE])?;
        Ok(prev[0])
    }

    /// The last IRQ the machine raised, or `N_IRQS` if none is pending.
    pub fn last_irq(&self) -> u32 {
        self.machine.last_irq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::N_IRQS;

    #[test]
    fn read_write_memory_round_trips() {
        let mut m = Machine::new(0x100, 0, &[], 0);
        let mut port = DebugPort::new(&mut m);
        port.write_memory(0, 0x10, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        port.read_memory(0, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn register_accessors_reach_the_live_register_file() {
        let mut m = Machine::new(0x10, 0, &[], 0);
        let mut port = DebugPort::new(&mut m);
        port.write_register(Reg::Ax as u8, 0x42);
        assert_eq!(port.read_register(Reg::Ax as u8), 0x42);
    }

    #[test]
    fn set_breakpoint_overwrites_byte_and_returns_previous() {
        let mut m = Machine::new(0x10, 0, &[0xAA], 0);
        let mut port = DebugPort::new(&mut m);
        let prev = port.set_breakpoint(0, 0).unwrap();
        assert_eq!(prev, 0xAA);
        let mut buf = [0u8; 1];
        port.read_memory(0, 0, &mut buf).unwrap();
        assert_eq!(buf[0], BREAKPOINT_OPCODE);
    }

    #[test]
    fn last_irq_reflects_machine_state() {
        let mut m = Machine::new(0x10, 0, &[], 0);
        let port = DebugPort::new(&mut m);
        assert_eq!(port.last_irq(), N_IRQS);
    }
}
