//! Zilog Z80 CPU core.
//!
//! Executes one whole instruction per [`Z80::step`](emu_core::Cpu::step)
//! and reports the T-states it took. Interrupt acceptance, the 50 Hz
//! periodic interrupt and the CPU load estimate live here too, so a machine
//! only has to wire memory, ports and video around it.

mod alu;
mod cpu;
mod flags;
mod registers;

pub use cpu::{InterruptConfig, Z80};
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::{Reg, Registers, UnknownRegister};
