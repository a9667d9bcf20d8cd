//! Interrupt entry (`int`) and return (`iret`).
//!
//! Unlike the hardware IDT gate machinery this borrows its shape from, there
//! is exactly one gate kind here: a 64-bit far pointer. Masking is a single
//! FLAGS bit (`I`), and NMI always runs regardless of it.

use crate::error::{Irq, VmResult, N_IRQS};
use crate::flags;
use crate::memory::Memory;
use crate::registers::{decode_far_pointer, Reg, RegisterFile, SegReg};
use crate::stack;
use crate::translate::{self, PERM_R};

/// Raise IRQ `irq`. If the I flag is set and `irq != NonMaskable`, the
/// interrupt is merely recorded in `last_irq` and the instruction stream is
/// otherwise unaffected (a masked interrupt is not an error — it is simply
/// deferred). Otherwise the ISR is entered.
pub fn raise(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    irq: Irq,
    last_irq: &mut u32,
) -> VmResult<()> {
    raise_vector(mem, regs, irq.vector(), last_irq)
}

/// Raise a raw IRQ vector (0-255). `INT imm8` can target any vector, not
/// just the ones the VM core itself defines via [`Irq`]; this is the core
/// the `Irq`-typed [`raise`] delegates to.
pub fn raise_vector(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    vector: u32,
    last_irq: &mut u32,
) -> VmResult<()> {
    let masked = (regs.flags() & flags::I) == 0 && vector != Irq::NonMaskable.vector();
    if masked {
        *last_irq = vector;
        return Ok(());
    }
    enter(mem, regs, vector, last_irq)
}

fn enter(
    mem: &mut Memory,
    regs: &mut RegisterFile,
    vector: u32,
    last_irq: &mut u32,
) -> VmResult<()> {
    let idt_far = regs.get(Reg::Idt);
    let (idt_segx, idt_base) = decode_far_pointer(idt_far);
    let v_flag = (regs.flags() & flags::V) != 0;
    let ib_flag = (regs.flags() & flags::IB) != 0;
    let cur_iopl = flags::iopl(regs.flags());

    let ide_addr = idt_base + (vector as u64) * 8;
    let (phys, size) = translate::translate(
        mem, v_flag, ib_flag, cur_iopl, idt_far, idt_segx, ide_addr, 8, PERM_R,
    )
    .map_err(|_| Irq::InterruptFault)?;
    let mut raw = [0u8; 8];
    if size != 8 || !mem.read_bytes(phys, &mut raw) {
        return Err(Irq::InterruptFault);
    }
    let isr = u64::from_le_bytes(raw);
    let (isr_segx, isr_offset) = decode_far_pointer(isr);

    let low_flags = (regs.flags() & 0xFFFF_FFFF) as u32;
    stack::push(mem, regs, v_flag, ib_flag, cur_iopl, &low_flags.to_le_bytes())
        .map_err(|_| Irq::InterruptFault)?;

    let return_far =
        crate::registers::encode_far_pointer(regs.segment(SegReg::Code), regs.ip());
    stack::push(mem, regs, v_flag, ib_flag, cur_iopl, &return_far.to_le_bytes())
        .map_err(|_| Irq::InterruptFault)?;

    let mut flags = regs.flags();
    flags &= !flags::I;
    regs.set_flags(flags);

    regs.set_segment(SegReg::Code, isr_segx);
    regs.set_ip(isr_offset);

    *last_irq = vector;
    Ok(())
}

/// Return from an interrupt: pop the far return pointer, then the saved low
/// FLAGS, then clear `last_irq`.
pub fn iret(mem: &Memory, regs: &mut RegisterFile, last_irq: &mut u32) -> VmResult<()> {
    let v_flag = (regs.flags() & flags::V) != 0;
    let ib_flag = (regs.flags() & flags::IB) != 0;
    let cur_iopl = flags::iopl(regs.flags());

    let mut far_buf = [0u8; 8];
    stack::pop(mem, regs, v_flag, ib_flag, cur_iopl, &mut far_buf)?;
    let (segx, offset) = decode_far_pointer(u64::from_le_bytes(far_buf));
    regs.set_segment(SegReg::Code, segx);
    regs.set_ip(offset);

    let mut flags_buf = [0u8; 4];
    stack::pop(mem, regs, v_flag, ib_flag, cur_iopl, &mut flags_buf)?;
    let low = u32::from_le_bytes(flags_buf) as u64;
    let flags = (regs.flags() & !0xFFFF_FFFF) | low;
    regs.set_flags(flags);

    *last_irq = N_IRQS;
    Ok(())
}
