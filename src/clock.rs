//! Clock driver: per-tick orchestration and the clock budget.

use log::trace;

use crate::decoder;
use crate::error::Irq;
use crate::execute::{self, ExecAction};
use crate::instruction::InstWork;
use crate::interrupts;
use crate::machine::Machine;
use crate::registers::{Reg, SegReg};
use crate::translate::{self, PERM_R};

/// Run one clock tick. Returns `N_IRQS` on a clean tick, or the IRQ that
/// was raised (and, per §4.4, delivered or merely recorded depending on
/// the I flag).
pub fn tick(m: &mut Machine) -> u32 {
    if m.regs.get(Reg::Clock) == m.max_clocks {
        let _ = interrupts::raise(&mut m.mem, &mut m.regs, Irq::OutOfClocks, &mut m.last_irq);
        trace!(target: "corevm::clock", "clock={} out of clocks", m.regs.get(Reg::Clock));
        return m.last_irq;
    }

    if !m.work.rep {
        m.work = InstWork::new();
        if let Err(irq) = fetch_and_decode(m) {
            deliver(m, irq);
            m.regs.set(Reg::Clock, m.regs.get(Reg::Clock) + 1);
            return m.last_irq;
        }
    }

    let outcome = execute::execute(&mut m.mem, &mut m.regs, &m.work);
    let looping = m.work.rep && outcome.repeat && outcome.fault.is_none();
    m.work.rep = outcome.repeat;

    // IP advances past the instruction before any interrupt is dispatched
    // (so a faulting instruction's saved return address points past it),
    // but not while a REP-prefixed instruction is still looping.
    if !looping {
        advance_ip(m);
    }

    if let Some(fault) = outcome.fault {
        deliver(m, fault);
    } else if let Some(action) = outcome.action {
        dispatch_action(m, action);
    }

    trace!(
        target: "corevm::clock",
        "clock={} op=0x{:02x} last_irq={}",
        m.regs.get(Reg::Clock), m.work.op0, m.last_irq
    );

    m.regs.set(Reg::Clock, m.regs.get(Reg::Clock) + 1);
    m.last_irq
}

/// `IP += cp`, the normal post-instruction advance (§4.7).
fn advance_ip(m: &mut Machine) {
    let ip = m.regs.ip();
    m.regs.set_ip(ip + m.work.cp as u64);
}

fn deliver(m: &mut Machine, irq: Irq) {
    let _ = interrupts::raise(&mut m.mem, &mut m.regs, irq, &mut m.last_irq);
}

fn dispatch_action(m: &mut Machine, action: ExecAction) {
    match action {
        ExecAction::Interrupt(vector) => {
            let _ = interrupts::raise_vector(
                &mut m.mem,
                &mut m.regs,
                vector as u32,
                &mut m.last_irq,
            );
        }
        ExecAction::Return => {
            let _ = interrupts::iret(&m.mem, &mut m.regs, &mut m.last_irq);
        }
    }
}

fn fetch_and_decode(m: &mut Machine) -> Result<(), Irq> {
    m.work.saved_ip = m.regs.ip();

    let v_flag = (m.regs.flags() & crate::flags::V) != 0;
    let ib_flag = (m.regs.flags() & crate::flags::IB) != 0;
    let cur_iopl = crate::flags::iopl(m.regs.flags());
    let sdt_far = m.regs.get(Reg::Sdt);
    let code_segx = m.regs.segment(SegReg::Code);

    let (phys, size) = translate::translate(
        &m.mem,
        v_flag,
        ib_flag,
        cur_iopl,
        sdt_far,
        code_segx,
        m.work.saved_ip,
        crate::instruction::CODE_BUF_LEN as u64,
        PERM_R,
    )?;

    if !m.mem.read_bytes(phys, &mut m.work.code[..size as usize]) {
        return Err(Irq::SegmentFault);
    }

    decoder::decode(&mut m.work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;

    #[test]
    fn minimal_image_breakpoint_after_one_clock() {
        let image = loader::build_image(1, 0, 0, &[0x0E]);
        let mut m = loader::load_from_bytes(&image).unwrap();
        m.start();
        let irq = tick(&mut m);
        assert_eq!(irq, Irq::Breakpoint.vector());
        assert_eq!(m.last_irq, Irq::Breakpoint.vector());
    }

    #[test]
    fn add_registers_single_tick() {
        // ADD CX,AX: op=01, modrm mod=3 reg=CX(1) rm=AX(0)
        let modrm = 0b11_001_000;
        let image = loader::build_image(1, 0, 0, &[0x01, modrm]);
        let mut m = loader::load_from_bytes(&image).unwrap();
        m.regs.set(Reg::Ax, 5);
        m.regs.set(Reg::Cx, 7);
        m.start();

        tick(&mut m);
        assert_eq!(m.regs.get(Reg::Ax), 5);
        assert_eq!(m.regs.get(Reg::Cx), 12);
        assert_eq!(m.regs.ip(), 2);
    }

    #[test]
    fn clock_budget_raises_out_of_clocks() {
        let image = loader::build_image(1, 0, 0, &[0x0E]);
        let mut m = loader::load_from_bytes(&image).unwrap();
        m.start();
        m.max_clocks = 0;

        let irq = tick(&mut m);
        assert_eq!(irq, Irq::OutOfClocks.vector());
        assert_eq!(m.regs.get(Reg::Clock), 0);
    }

    #[test]
    fn clock_increments_once_per_non_repeating_tick() {
        let image = loader::build_image(1, 0, 0, &[0x0E]);
        let mut m = loader::load_from_bytes(&image).unwrap();
        m.start();
        tick(&mut m);
        assert_eq!(m.regs.get(Reg::Clock), 1);
    }
}
