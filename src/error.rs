//! Error types for usvm.
//!
//! [`Irq`] is the VM's interrupt request code space: it is both the Rust
//! error type returned from fallible VM operations (translation, memory
//! I/O, stack, interrupt dispatch) and the representation of the machine's
//! own interrupt vectors. Lower layers return `Err(Irq)` instead of the
//! source's raw "return N_IRQS on success" sentinel; the clock driver is
//! the recovery boundary that turns an `Err(Irq)` into an `int` dispatch.
//!
//! [`LoadError`] is the separate, non-IRQ-shaped failure path for image
//! loading: the loader runs before any machine exists to route an IRQ
//! through, so its failures are reported textually and are fatal.

use thiserror::Error;

/// Sentinel IRQ value meaning "no interrupt pending", per the machine's
/// 32-bit last-IRQ register contract.
pub const N_IRQS: u32 = 256;

/// Interrupt request codes raised by the VM core.
///
/// Numeric values are contractual: they are the vector used to index the
/// IDT (`idt_base + (irq as u64) * 8`) and must match the machine's own
/// enumeration exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Irq {
    /// Division operand is zero. Reserved: no current opcode triggers it.
    DivByZero = 0,
    /// Single-step trap. Reserved.
    SingleStep = 1,
    /// Internal invariant violation (bad operand size, bad ModRM mode).
    NonMaskable = 2,
    /// `0x0E` (`INT 3`) executed.
    Breakpoint = 3,
    /// Arithmetic or index bound violation.
    OutOfBounds = 4,
    /// Permission or IOPL violation in the address translator.
    SegmentProtect = 5,
    /// Bounds violation in the translator, or a failed SDE fetch.
    SegmentFault = 6,
    /// Stack push write failed.
    StackOverflow = 7,
    /// Stack pop read failed.
    StackUnderflow = 8,
    /// Opcode not recognised.
    UndefinedInst = 9,
    /// ISR dispatch failed (bad IDE, or a push failure while entering it).
    InterruptFault = 10,
    /// `CLOCK == max_clocks` at tick start.
    OutOfClocks = 11,
}

impl Irq {
    /// All IRQ codes the VM core can raise itself, in vector order.
    pub const ALL: [Irq; 12] = [
        Irq::DivByZero,
        Irq::SingleStep,
        Irq::NonMaskable,
        Irq::Breakpoint,
        Irq::OutOfBounds,
        Irq::SegmentProtect,
        Irq::SegmentFault,
        Irq::StackOverflow,
        Irq::StackUnderflow,
        Irq::UndefinedInst,
        Irq::InterruptFault,
        Irq::OutOfClocks,
    ];

    /// The vector number, usable to index the IDT or compare against a
    /// machine's raw "last IRQ" register value.
    pub fn vector(self) -> u32 {
        self as u32
    }
}

impl core::fmt::Display for Irq {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Irq::DivByZero => "DIV_BY_ZERO",
            Irq::SingleStep => "SINGLE_STEP",
            Irq::NonMaskable => "NON_MASKABLE",
            Irq::Breakpoint => "BREAKPOINT",
            Irq::OutOfBounds => "OUT_OF_BOUNDS",
            Irq::SegmentProtect => "SEGMENT_PROTECT",
            Irq::SegmentFault => "SEGMENT_FAULT",
            Irq::StackOverflow => "STACK_OVERFLOW",
            Irq::StackUnderflow => "STACK_UNDERFLOW",
            Irq::UndefinedInst => "UNDEFINED_INST",
            Irq::InterruptFault => "INTERRUPT_FAULT",
            Irq::OutOfClocks => "OUT_OF_CLOCKS",
        };
        write!(f, "{} ({})", name, self.vector())
    }
}

/// Convenience result alias for VM operations that may raise an IRQ.
pub type VmResult<T> = core::result::Result<T, Irq>;

/// Fatal errors from parsing and validating an image file.
///
/// Unlike [`Irq`], these are never routed through the interrupt engine:
/// they occur before a machine exists, so the clock loop never starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("image too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("bad magic: expected 45 45 FA DE, got {0:02X?}")]
    BadMagic([u8; 4]),

    #[error("kernel range out of bounds: ker_addr=0x{ker_addr:x} + ker_size=0x{ker_size:x} > mem_size=0x{mem_size:x}")]
    KernelOutOfBounds {
        ker_addr: u64,
        ker_size: u64,
        mem_size: u64,
    },

    #[error("kernel jump out of range: ker_jump=0x{ker_jump:x} >= ker_size=0x{ker_size:x}")]
    JumpOutOfRange { ker_jump: u64, ker_size: u64 },

    #[error("failed to read image file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
