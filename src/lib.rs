//! usvm — software emulator for a fictional 64-bit register machine with
//! an x86-inspired instruction-encoding scheme.
//!
//! The library is organized the way a small hosted CPU emulator usually is:
//! - [`registers`] / [`flags`] — register file and FLAGS bit semantics
//! - [`memory`] / [`translate`] — flat RAM and the segmented address translator
//! - [`stack`] — push/pop through the stack segment
//! - [`interrupts`] — `int`/`iret` entry and return
//! - [`decoder`] — prefix scan, opcode, ModRM/SIB, immediate extraction
//! - [`execute`] — per-opcode semantics and FLAGS updates
//! - [`clock`] — per-tick orchestration and the clock budget
//! - [`loader`] — image file parsing and machine construction
//! - [`machine`] — ties the above into a single `Machine`
//! - [`debug_port`] — the read-only facade the (unbuilt) interactive
//!   debugger front-end would consume

pub mod clock;
pub mod debug_port;
pub mod decoder;
pub mod error;
pub mod execute;
pub mod flags;
pub mod instruction;
pub mod interrupts;
pub mod loader;
pub mod machine;
pub mod memory;
pub mod registers;
pub mod stack;
pub mod translate;

pub use error::{Irq, LoadError, VmResult, N_IRQS};
pub use machine::Machine;
