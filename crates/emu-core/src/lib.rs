//! Core traits and types shared by the emulator crates.
//!
//! The CPU talks to the rest of the machine through [`Bus`]. Every stateful
//! component implements [`Serializable`] so the whole machine can be saved,
//! restored and rewound with the two-pass codec in [`state`].

mod bus;
mod cpu;
mod observable;
pub mod state;

pub use bus::{Bus, SimpleBus};
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use state::{Serializable, SizeCounter, StateError, StateReader, StateSink, StateWriter};
