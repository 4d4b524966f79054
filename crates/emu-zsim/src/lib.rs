//! ZSim: a Z80 machine simulator with a debug-control loop.
//!
//! A machine is assembled from a [`ZSimConfig`]: banked memory with one of
//! the predefined Sinclair layouts or a custom slot list, port-driven bank
//! switching, and optional ZX81 or Spectrum video. The [`Debugger`] runs it
//! in batches and stops on breakpoints, watchpoints, interrupts, step
//! targets or a pause request. [`mcp::McpServer`] exposes all of it as a
//! JSON-RPC server.

pub mod bankswitch;
mod breakpoint;
mod bus;
pub mod config;
mod coverage;
mod debugger;
mod error;
mod event;
pub mod expr;
mod history;
pub mod mcp;
pub mod memory;
pub mod memory_model;
pub mod ports;
mod video;
mod zsim;

pub use bankswitch::{BankSwitchError, BankSwitchRule, BankSwitcher, PortMatch};
pub use breakpoint::{Breakpoint, BreakpointOutcome, Breakpoints, LogTemplate};
pub use bus::ZSimBus;
pub use config::{ConfigError, MemoryModel, RomImage, SpectrumScreen, VideoVariant, ZSimConfig};
pub use coverage::Coverage;
pub use debugger::{BATCH_TSTATES, Debugger, PauseHandle, RunState, Watchpoint};
pub use error::ZSimError;
pub use event::{BreakEvent, BreakReason, Notification};
pub use expr::{Expr, ExprContext, ExprError};
pub use history::{History, HistoryEntry, should_replace_last};
pub use memory::{Access, BankKind, Memory, MemoryError, VisualAccess, WatchAccess, WatchpointHit};
pub use memory_model::{MemoryLayout, PredefinedModel};
pub use ports::{PortCombine, Ports};
pub use video::Video;
pub use zsim::{MachineView, ZSim};
