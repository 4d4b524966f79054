//! Why execution stopped, and what subscribers are told.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BreakReason {
    Breakpoint { id: u32, address: u16 },
    WatchpointRead { address: u16 },
    WatchpointWrite { address: u16 },
    ManualBreak,
    Interrupt,
    CpuError { message: String },
    /// A step command finished without hitting anything else.
    StepComplete,
    Unknown { message: String },
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakReason::Breakpoint { address, .. } => write!(f, "breakpoint hit at ${address:04X}"),
            BreakReason::WatchpointRead { address } => write!(f, "watchpoint read at ${address:04X}"),
            BreakReason::WatchpointWrite { address } => {
                write!(f, "watchpoint write at ${address:04X}")
            }
            BreakReason::ManualBreak => f.write_str("manual break"),
            BreakReason::Interrupt => f.write_str("break on interrupt"),
            BreakReason::CpuError { message } => write!(f, "CPU error: {message}"),
            BreakReason::StepComplete => f.write_str("step complete"),
            BreakReason::Unknown { message } => write!(f, "unknown: {message}"),
        }
    }
}

/// A stop, with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakEvent {
    #[serde(flatten)]
    pub reason: BreakReason,
    pub pc: u16,
    pub tstates: u64,
}

/// Sent to every subscriber of a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A new picture is available from `frame()`.
    FrameReady,
    /// Execution stopped; the pause is acknowledged.
    Paused(BreakEvent),
    /// Output of a log point.
    Log(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_serialize_with_tag() {
        let event = BreakEvent {
            reason: BreakReason::WatchpointWrite { address: 0x4000 },
            pc: 0x8003,
            tstates: 17,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "watchpoint_write");
        assert_eq!(json["address"], 0x4000);
        assert_eq!(json["pc"], 0x8003);
    }

    #[test]
    fn display_names_address() {
        let reason = BreakReason::Breakpoint {
            id: 1,
            address: 0x0038,
        };
        assert_eq!(reason.to_string(), "breakpoint hit at $0038");
    }
}
