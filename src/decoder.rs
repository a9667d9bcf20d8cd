//! Instruction decoder: prefix scan, opcode, ModRM/SIB, immediates.
//!
//! Operates purely on the 16-byte buffer already fetched into an
//! [`InstWork`] — it performs no memory access itself, so it cannot raise
//! translation faults. The only failure mode recognised here is running off
//! the end of the 16-byte buffer, which is treated the same as any other
//! malformed encoding: `UNDEFINED_INST`.

use crate::error::{Irq, VmResult};
use crate::flags::OperandSize;
use crate::instruction::InstWork;
use crate::registers::SegReg;

/// Decode the instruction at `work.cp` (0 on entry), filling in prefix,
/// opcode, ModRM/SIB, and immediate fields.
pub fn decode(work: &mut InstWork) -> VmResult<()> {
    let mut cur = Cursor { work, pos: 0 };
    cur.scan_prefixes();
    cur.read_opcode()?;
    cur.resolve_sizes();
    cur.decode_modrm_sib()?;
    cur.read_immediate()?;
    cur.work.cp = cur.pos;
    Ok(())
}

struct Cursor<'a> {
    work: &'a mut InstWork,
    pos: u8,
}

impl<'a> Cursor<'a> {
    fn byte(&self, at: u8) -> Option<u8> {
        self.work.code.get(at as usize).copied()
    }

    fn next(&mut self) -> VmResult<u8> {
        let b = self.byte(self.pos).ok_or(Irq::UndefinedInst)?;
        self.pos += 1;
        Ok(b)
    }

    fn scan_prefixes(&mut self) {
        loop {
            let Some(b) = self.byte(self.pos) else {
                return;
            };
            match b {
                0x60..=0x63 => {
                    self.work.seg_override = Some(SegReg::from_bits(b));
                }
                0x64 | 0x65 => {
                    self.work.rep = true;
                    self.work.rep_cc = (b & 1) != 0;
                }
                0x66 => self.work.size_override = true,
                0x67 => self.work.addr_override = true,
                _ => return,
            }
            self.pos += 1;
        }
    }

    fn read_opcode(&mut self) -> VmResult<()> {
        self.work.op0 = self.next()?;
        if self.work.op0 == 0xF0 {
            self.work.op1 = self.next()?;
        }
        Ok(())
    }

    fn resolve_sizes(&mut self) {
        let op_low_bit = (self.work.op0 & 1) != 0;
        self.work.operand_size =
            OperandSize::from_opcode(op_low_bit, self.work.size_override);
        self.work.address_size = if self.work.addr_override {
            OperandSize::Dword
        } else {
            OperandSize::Qword
        };
    }

    /// Opcodes that take a ModRM byte. Of the dispatch table in §4.7, every
    /// opcode except `INT imm8` (0x08), `IRET` (0x09), and `INT 3` (0x0E)
    /// does.
    fn has_modrm(&self) -> bool {
        !matches!(self.work.op0, 0x08 | 0x09 | 0x0E)
    }

    /// Decode ModRM (and, if present, SIB) and the displacement that goes
    /// with them. Does not touch the register file — `execute` resolves the
    /// final effective address from `modrm`/`sib`/`disp` against the live
    /// registers, since that's the first point a register file is in scope.
    fn decode_modrm_sib(&mut self) -> VmResult<()> {
        if self.work.is_escaped() || !self.has_modrm() {
            return Ok(());
        }

        let modrm = self.next()?;
        let md = (modrm >> 6) & 3;
        let reg = (modrm >> 3) & 7;
        let rm = modrm & 7;
        self.work.modrm = crate::instruction::ModRm { md, reg, rm };
        self.work.segx = self.work.effective_seg();

        if md == 3 {
            // Register-direct: no memory operand.
            return Ok(());
        }

        if rm == 4 {
            self.decode_sib(md)?;
        }

        self.work.disp = match md {
            0 if rm == 5 => {
                self.work.ip_relative = true;
                self.read_disp32()? as i64
            }
            0 => 0,
            1 => self.read_disp8()? as i64,
            2 => self.read_disp32()? as i64,
            _ => 0,
        };

        Ok(())
    }

    /// Decode the SIB byte for `mod != 3, rm == 4`.
    fn decode_sib(&mut self, md: u8) -> VmResult<()> {
        let sib = self.next()?;
        let scale = (sib >> 6) & 3;
        let index = (sib >> 3) & 7;
        let base = sib & 7;
        self.work.sib = crate::instruction::Sib { scale, index, base };

        if md == 0 && base == 5 {
            self.work.ip_relative = true;
            self.work.disp = self.read_disp32()? as i64;
        }
        Ok(())
    }

    fn read_disp8(&mut self) -> VmResult<i8> {
        Ok(self.next()? as i8)
    }

    fn read_disp32(&mut self) -> VmResult<i32> {
        let mut buf = [0u8; 4];
        for b in &mut buf {
            *b = self.next()?;
        }
        Ok(i32::from_le_bytes(buf))
    }

    /// Only `INT imm8` carries a trailing immediate in this opcode table.
    fn read_immediate(&mut self) -> VmResult<()> {
        if self.work.op0 == 0x08 {
            let b = self.next()?;
            self.work.imm = b as i64;
        }
        Ok(())
    }
}
