//! Port-driven bank switching.
//!
//! Paging hardware is described as a small set of rules bound to output
//! ports. All rules matching a write are evaluated first, and the resulting
//! slot changes are applied together or not at all.

use emu_core::{Serializable, StateError, StateReader, StateSink};
use serde::Deserialize;
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::ConfigError;
use crate::memory::{Memory, MemoryError};

/// Partial port decode: a rule fires when `port & mask == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortMatch {
    pub mask: u16,
    pub value: u16,
}

impl PortMatch {
    /// Full 16-bit decode of one port.
    #[must_use]
    pub const fn exact(port: u16) -> Self {
        Self {
            mask: 0xFFFF,
            value: port,
        }
    }

    #[must_use]
    pub const fn matches(self, port: u16) -> bool {
        port & self.mask == self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BankSwitchRule {
    /// Map `bank` into `slot` when `value & value_mask == compare`.
    MaskCompare {
        port: PortMatch,
        slot: usize,
        value_mask: u8,
        compare: u8,
        bank: usize,
    },
    /// Map `table[(value >> shift) & value_mask]` into `slot`.
    TableLookup {
        port: PortMatch,
        slot: usize,
        value_mask: u8,
        #[serde(default)]
        shift: u8,
        table: Vec<usize>,
    },
    /// Map `((value >> shift) & value_mask) + offset` into `slot`.
    ArithmeticOffset {
        port: PortMatch,
        slot: usize,
        value_mask: u8,
        #[serde(default)]
        shift: u8,
        #[serde(default)]
        offset: usize,
    },
    /// Ignore every further switch until reset when `value & value_mask`
    /// is non-zero. The write that sets the lock is still applied.
    Lock { port: PortMatch, value_mask: u8 },
}

impl BankSwitchRule {
    fn port(&self) -> PortMatch {
        match self {
            BankSwitchRule::MaskCompare { port, .. }
            | BankSwitchRule::TableLookup { port, .. }
            | BankSwitchRule::ArithmeticOffset { port, .. }
            | BankSwitchRule::Lock { port, .. } => *port,
        }
    }

    /// The slot change this rule asks for, if any.
    fn evaluate(&self, value: u8) -> Option<(usize, usize)> {
        match self {
            BankSwitchRule::MaskCompare {
                slot,
                value_mask,
                compare,
                bank,
                ..
            } => (value & value_mask == *compare).then_some((*slot, *bank)),
            BankSwitchRule::TableLookup {
                slot,
                value_mask,
                shift,
                table,
                ..
            } => {
                let index = usize::from(value.checked_shr(u32::from(*shift)).unwrap_or(0) & value_mask);
                // Out-of-table indices fail memory validation.
                Some((*slot, table.get(index).copied().unwrap_or(usize::MAX)))
            }
            BankSwitchRule::ArithmeticOffset {
                slot,
                value_mask,
                shift,
                offset,
                ..
            } => {
                let field = usize::from(value.checked_shr(u32::from(*shift)).unwrap_or(0) & value_mask);
                Some((*slot, field + offset))
            }
            BankSwitchRule::Lock { .. } => None,
        }
    }

    fn locks(&self, value: u8) -> bool {
        matches!(self, BankSwitchRule::Lock { value_mask, .. } if value & value_mask != 0)
    }

    fn slot(&self) -> Option<usize> {
        match self {
            BankSwitchRule::MaskCompare { slot, .. }
            | BankSwitchRule::TableLookup { slot, .. }
            | BankSwitchRule::ArithmeticOffset { slot, .. } => Some(*slot),
            BankSwitchRule::Lock { .. } => None,
        }
    }
}

/// A rejected bank switch, with the port that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bank switch via port ${port:04X} rejected: {source}")]
pub struct BankSwitchError {
    pub port: u16,
    #[source]
    pub source: MemoryError,
}

#[derive(Debug, Clone, Default)]
pub struct BankSwitcher {
    rules: Vec<BankSwitchRule>,
    locked: bool,
}

impl BankSwitcher {
    /// Check rules against the memory they will drive.
    pub fn new(rules: Vec<BankSwitchRule>, memory: &Memory) -> Result<Self, ConfigError> {
        for rule in &rules {
            if let Some(slot) = rule.slot()
                && slot >= memory.slot_count()
            {
                return Err(ConfigError::Rule(format!("slot {slot} does not exist")));
            }
            match rule {
                BankSwitchRule::TableLookup { table, .. } if table.is_empty() => {
                    return Err(ConfigError::Rule("empty lookup table".to_string()));
                }
                BankSwitchRule::Lock { value_mask: 0, .. } => {
                    return Err(ConfigError::Rule("lock rule with empty mask".to_string()));
                }
                _ => {}
            }
        }
        Ok(Self {
            rules,
            locked: false,
        })
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn rules(&self) -> &[BankSwitchRule] {
        &self.rules
    }

    pub fn reset(&mut self) {
        self.locked = false;
    }

    /// Handle a port write.
    pub fn write(&mut self, port: u16, value: u8, memory: &mut Memory) -> Result<(), BankSwitchError> {
        if self.locked {
            if self.rules.iter().any(|r| r.port().matches(port)) {
                trace!(port, value, "bank switching locked");
            }
            return Ok(());
        }
        let mut changes = Vec::new();
        let mut lock = false;
        for rule in self.rules.iter().filter(|r| r.port().matches(port)) {
            changes.extend(rule.evaluate(value));
            lock |= rule.locks(value);
        }
        if changes.is_empty() && !lock {
            return Ok(());
        }
        if let Err(source) = memory.set_slots(&changes) {
            warn!(port, value, %source, "bank switch rejected");
            return Err(BankSwitchError { port, source });
        }
        trace!(port, value, ?changes, "bank switch");
        self.locked = lock;
        Ok(())
    }
}

/// Only the lock is machine state; the rules come from the configuration.
impl Serializable for BankSwitcher {
    fn serialize(&self, sink: &mut dyn StateSink) {
        sink.put_bool(self.locked);
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.locked = reader.get_bool()?;
        Ok(())
    }
}
