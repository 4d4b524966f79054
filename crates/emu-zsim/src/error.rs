use emu_core::StateError;
use thiserror::Error;
use zilog_z80::UnknownRegister;

use crate::bankswitch::BankSwitchError;
use crate::config::ConfigError;
use crate::expr::ExprError;
use crate::memory::MemoryError;

/// Any error the simulator surfaces to its caller.
#[derive(Debug, Error)]
pub enum ZSimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    BankSwitch(#[from] BankSwitchError),
    #[error("corrupt state: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Register(#[from] UnknownRegister),
    #[error("no breakpoint with id {0}")]
    NoSuchBreakpoint(u32),
    #[error("no older history")]
    NoHistory,
    #[error("machine is running")]
    Running,
}
