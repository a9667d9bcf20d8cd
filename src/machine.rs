//! The aggregate machine state: registers, memory, the option block, the
//! last-IRQ field, and the per-tick instruction work area.

use crate::error::N_IRQS;
use crate::instruction::InstWork;
use crate::memory::Memory;
use crate::registers::RegisterFile;

/// Sentinel for "no clock budget" (§3: all-ones = unlimited).
pub const UNLIMITED_CLOCKS: u64 = u64::MAX;

/// The full emulated machine: registers, memory, option block, last IRQ,
/// and the instruction work area reused/reset every tick.
pub struct Machine {
    pub regs: RegisterFile,
    pub mem: Memory,
    /// Verbosity bit from the option block.
    pub verbose: bool,
    /// Clock budget; `UNLIMITED_CLOCKS` disables the check.
    pub max_clocks: u64,
    /// `>= N_IRQS` means no interrupt pending.
    pub last_irq: u32,
    pub work: InstWork,
}

impl Machine {
    /// Construct a machine with `mem_size` bytes of RAM, `payload` copied
    /// to `ker_addr`, and `IP` set to `ker_addr + ker_jump`. Registers,
    /// segments, and the instruction work area all start zeroed, per the
    /// image loader's reset contract.
    pub fn new(mem_size: usize, ker_addr: u64, payload: &[u8], ker_jump: u64) -> Self {
        let mut mem = Memory::new(mem_size);
        mem.load_at(ker_addr, payload);

        let mut regs = RegisterFile::zeroed();
        regs.set_ip(ker_addr + ker_jump);

        Machine {
            regs,
            mem,
            verbose: false,
            max_clocks: UNLIMITED_CLOCKS,
            last_irq: N_IRQS,
            work: InstWork::new(),
        }
    }

    /// Whether the run loop should keep going: FLAGS bit 1 ("the 1-flag")
    /// is set.
    #[inline]
    pub fn running(&self) -> bool {
        (self.regs.flags() & crate::flags::RUN) != 0
    }

    /// Stop the run loop by clearing the 1-flag.
    #[inline]
    pub fn halt(&mut self) {
        let f = self.regs.flags() & !crate::flags::RUN;
        self.regs.set_flags(f);
    }

    /// Start (or resume) the run loop by setting the 1-flag.
    #[inline]
    pub fn start(&mut self) {
        let f = self.regs.flags() | crate::flags::RUN;
        self.regs.set_flags(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_machine_places_payload_and_sets_ip() {
        let m = Machine::new(0x1000, 0x10, &[1, 2, 3], 1);
        assert_eq!(m.regs.ip(), 0x11);
        let mut buf = [0u8; 3];
        m.mem.read_bytes(0x10, &mut buf);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn fresh_machine_has_no_pending_irq() {
        let m = Machine::new(0x10, 0, &[], 0);
        assert_eq!(m.last_irq, N_IRQS);
    }

    #[test]
    fn start_and_halt_toggle_the_run_flag() {
        let mut m = Machine::new(0x10, 0, &[], 0);
        assert!(!m.running());
        m.start();
        assert!(m.running());
        m.halt();
        assert!(!m.running());
    }
}
