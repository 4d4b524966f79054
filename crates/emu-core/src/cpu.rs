//! CPU core trait.

use crate::Bus;

/// A CPU core executing one instruction per call.
///
/// The bus is passed in rather than owned so the machine can share it with
/// the video hardware between instructions.
pub trait Cpu {
    /// The type used for register inspection.
    type Registers;

    /// Execute one instruction (plus any interrupt accepted before it) and
    /// return the T-states it took.
    fn step<B: Bus>(&mut self, bus: &mut B) -> u32;

    /// Returns the current program counter.
    fn pc(&self) -> u16;

    /// Returns a snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// Returns true if the CPU is halted.
    fn is_halted(&self) -> bool;

    /// Raise an interrupt. Returns the T-states spent accepting it, or zero
    /// if a maskable interrupt was refused.
    fn interrupt<B: Bus>(&mut self, bus: &mut B, non_maskable: bool, data: u8) -> u32;

    /// Reset the CPU to its power-on state.
    fn reset(&mut self);
}
