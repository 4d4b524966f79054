//! Banked memory with watchpoints and an activity map.
//!
//! The 64K address space is split into slots. Each slot holds one bank at a
//! time, chosen from the banks the memory model allows for it. Bank
//! switches are validated as a whole before anything changes.
//!
//! Only [`Memory::read8`] and [`Memory::write8`] are bus accesses: they
//! trigger watchpoints and mark the visual memory map. Everything else
//! (block transfers, `peek`, the ULA's display reads) is side-effect free.

#![allow(clippy::cast_possible_truncation)] // u16 addresses index into tables.

use emu_core::{Serializable, StateError, StateReader, StateSink};
use sinclair_ula::DisplayMemory;
use thiserror::Error;

use crate::memory_model::MemoryLayout;

/// Fill value of UNMAPPED banks.
pub const UNMAPPED_FILL: u8 = 0xFF;

/// Addresses per visual memory cell.
const VISUAL_SHIFT: u32 = 8;
pub const VISUAL_MEMORY_SIZE: usize = 1 << (16 - VISUAL_SHIFT);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("slot {slot} does not exist")]
    InvalidSlot { slot: usize },
    #[error("bank {bank} is not allowed in slot {slot}")]
    BankNotAllowed { slot: usize, bank: usize },
    #[error("bank {bank} does not exist")]
    BankOutOfRange { bank: usize },
    #[error("invalid address range: {len} bytes from ${start:04X}")]
    AddressRange { start: u16, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BankKind {
    Ram,
    Rom,
    Unmapped,
}

/// Kind of memory access a watchpoint reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Which accesses a watchpoint range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchAccess {
    pub read: bool,
    pub write: bool,
}

impl WatchAccess {
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };

    /// Parse `"r"`, `"w"` or `"rw"`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let read = s.contains('r');
        let write = s.contains('w');
        (s.chars().all(|c| c == 'r' || c == 'w') && (read || write)).then_some(Self { read, write })
    }
}

/// The first watched access since the hit record was last cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchpointHit {
    pub address: u16,
    pub access: Access,
}

/// Last kind of activity per 256-byte page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum VisualAccess {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    Prog = 3,
}

#[derive(Debug, Clone)]
struct Bank {
    kind: BankKind,
    name: String,
    short_name: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Slot {
    start: u16,
    allowed: Vec<usize>,
    name: Option<String>,
}

/// Banked 64K memory.
#[derive(Debug, Clone)]
pub struct Memory {
    banks: Vec<Bank>,
    slots: Vec<Slot>,
    /// Slot index for every address.
    slot_of: Vec<u8>,
    /// Bank currently held by each slot.
    mapping: Vec<usize>,
    initial_mapping: Vec<usize>,

    watch_read: Vec<u16>,
    watch_write: Vec<u16>,
    hit: Option<WatchpointHit>,

    visual: [VisualAccess; VISUAL_MEMORY_SIZE],
}

impl Memory {
    #[must_use]
    pub fn new(layout: &MemoryLayout) -> Self {
        let banks = layout
            .banks()
            .iter()
            .map(|spec| Bank {
                kind: spec.kind,
                name: spec.name.clone(),
                short_name: spec.short_name.clone(),
                data: vec![
                    if spec.kind == BankKind::Unmapped { UNMAPPED_FILL } else { 0 };
                    spec.size
                ],
            })
            .collect();

        let mut slot_of = vec![0u8; 0x10000];
        let mut slots = Vec::with_capacity(layout.slots().len());
        for (index, spec) in layout.slots().iter().enumerate() {
            slot_of[usize::from(spec.start)..=usize::from(spec.end)].fill(index as u8);
            slots.push(Slot {
                start: spec.start,
                allowed: spec.allowed.clone(),
                name: spec.name.clone(),
            });
        }
        let mapping: Vec<usize> = layout.slots().iter().map(|s| s.initial_bank).collect();

        Self {
            banks,
            slots,
            slot_of,
            initial_mapping: mapping.clone(),
            mapping,
            watch_read: vec![0; 0x10000],
            watch_write: vec![0; 0x10000],
            hit: None,
            visual: [VisualAccess::None; VISUAL_MEMORY_SIZE],
        }
    }

    /// Bank currently mapped at `address`.
    #[must_use]
    pub fn bank_at(&self, address: u16) -> usize {
        self.locate(address).0
    }

    fn locate(&self, address: u16) -> (usize, usize) {
        let slot = usize::from(self.slot_of[usize::from(address)]);
        let bank = self.mapping[slot];
        (bank, usize::from(address - self.slots[slot].start))
    }

    /// Bus read.
    pub fn read8(&mut self, address: u16) -> u8 {
        if self.hit.is_none() && self.watch_read[usize::from(address)] > 0 {
            self.hit = Some(WatchpointHit {
                address,
                access: Access::Read,
            });
        }
        self.visual[usize::from(address >> VISUAL_SHIFT)] = VisualAccess::Read;
        self.peek(address)
    }

    /// Bus write. ROM and UNMAPPED banks ignore it.
    pub fn write8(&mut self, address: u16, value: u8) {
        if self.hit.is_none() && self.watch_write[usize::from(address)] > 0 {
            self.hit = Some(WatchpointHit {
                address,
                access: Access::Write,
            });
        }
        self.visual[usize::from(address >> VISUAL_SHIFT)] = VisualAccess::Write;
        let (bank, offset) = self.locate(address);
        let bank = &mut self.banks[bank];
        if bank.kind == BankKind::Ram {
            bank.data[offset] = value;
        }
    }

    /// Read through the current mapping without side effects.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        let (bank, offset) = self.locate(address);
        self.banks[bank].data[offset]
    }

    /// Little-endian word without side effects.
    #[must_use]
    pub fn peek16(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.peek(address), self.peek(address.wrapping_add(1))])
    }

    /// Copy `len` bytes starting at `start`, wrapping at 64K.
    #[must_use]
    pub fn read_block(&self, start: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.peek(start.wrapping_add(i as u16)))
            .collect()
    }

    /// Write a block without triggering watchpoints. UNMAPPED banks are
    /// never written; ROM only with `allow_rom`.
    pub fn write_block(&mut self, start: u16, data: &[u8], allow_rom: bool) -> Result<(), MemoryError> {
        if data.len() > 0x10000 {
            return Err(MemoryError::AddressRange {
                start,
                len: data.len(),
            });
        }
        let mut address = start;
        for &value in data {
            let (bank, offset) = self.locate(address);
            let bank = &mut self.banks[bank];
            if bank.kind == BankKind::Ram || (allow_rom && bank.kind == BankKind::Rom) {
                bank.data[offset] = value;
            }
            address = address.wrapping_add(1);
        }
        Ok(())
    }

    /// Load `data` into a bank starting at `offset`. Anything past the end
    /// of the bank is dropped. Returns the number of bytes written.
    pub fn load_bank(&mut self, bank: usize, offset: usize, data: &[u8]) -> Result<usize, MemoryError> {
        let target = self
            .banks
            .get_mut(bank)
            .ok_or(MemoryError::BankOutOfRange { bank })?;
        if offset > target.data.len() {
            return Err(MemoryError::BankOutOfRange { bank });
        }
        let len = data.len().min(target.data.len() - offset);
        target.data[offset..offset + len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    #[must_use]
    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    #[must_use]
    pub fn bank_kind(&self, bank: usize) -> Option<BankKind> {
        self.banks.get(bank).map(|b| b.kind)
    }

    #[must_use]
    pub fn bank_name(&self, bank: usize) -> Option<(&str, &str)> {
        self.banks
            .get(bank)
            .map(|b| (b.name.as_str(), b.short_name.as_str()))
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Current bank of every slot.
    #[must_use]
    pub fn slots(&self) -> &[usize] {
        &self.mapping
    }

    #[must_use]
    pub fn slot_name(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).and_then(|s| s.name.as_deref())
    }

    /// Slot index by its model name.
    #[must_use]
    pub fn slot_by_name(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name.as_deref() == Some(name))
    }

    /// First address of a slot.
    #[must_use]
    pub fn slot_start(&self, slot: usize) -> Option<u16> {
        self.slots.get(slot).map(|s| s.start)
    }

    fn check_slot(&self, slot: usize, bank: usize) -> Result<(), MemoryError> {
        let s = self.slots.get(slot).ok_or(MemoryError::InvalidSlot { slot })?;
        if bank >= self.banks.len() {
            return Err(MemoryError::BankOutOfRange { bank });
        }
        if s.allowed.binary_search(&bank).is_err() {
            return Err(MemoryError::BankNotAllowed { slot, bank });
        }
        Ok(())
    }

    pub fn set_slot(&mut self, slot: usize, bank: usize) -> Result<(), MemoryError> {
        self.set_slots(&[(slot, bank)])
    }

    /// Apply several slot assignments. Either all of them are valid and
    /// applied, or nothing changes.
    pub fn set_slots(&mut self, changes: &[(usize, usize)]) -> Result<(), MemoryError> {
        for &(slot, bank) in changes {
            self.check_slot(slot, bank)?;
        }
        for &(slot, bank) in changes {
            self.mapping[slot] = bank;
        }
        Ok(())
    }

    /// Back to the power-on mapping.
    pub fn reset_slots(&mut self) {
        self.mapping.clone_from(&self.initial_mapping);
    }

    fn watch_range(start: u16, len: usize) -> Result<impl Iterator<Item = usize>, MemoryError> {
        if len == 0 || len > 0x10000 {
            return Err(MemoryError::AddressRange { start, len });
        }
        Ok((0..len).map(move |i| usize::from(start.wrapping_add(i as u16))))
    }

    /// Add a watchpoint over `len` addresses. Overlapping watchpoints are
    /// reference counted.
    pub fn set_watchpoint(&mut self, start: u16, len: usize, access: WatchAccess) -> Result<(), MemoryError> {
        for a in Self::watch_range(start, len)? {
            if access.read {
                self.watch_read[a] = self.watch_read[a].saturating_add(1);
            }
            if access.write {
                self.watch_write[a] = self.watch_write[a].saturating_add(1);
            }
        }
        Ok(())
    }

    pub fn remove_watchpoint(&mut self, start: u16, len: usize, access: WatchAccess) -> Result<(), MemoryError> {
        for a in Self::watch_range(start, len)? {
            if access.read {
                self.watch_read[a] = self.watch_read[a].saturating_sub(1);
            }
            if access.write {
                self.watch_write[a] = self.watch_write[a].saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Drop all watchpoints.
    pub fn clear_watchpoints(&mut self) {
        self.watch_read.fill(0);
        self.watch_write.fill(0);
    }

    #[must_use]
    pub fn watched(&self, address: u16) -> WatchAccess {
        WatchAccess {
            read: self.watch_read[usize::from(address)] > 0,
            write: self.watch_write[usize::from(address)] > 0,
        }
    }

    #[must_use]
    pub fn hit(&self) -> Option<WatchpointHit> {
        self.hit
    }

    pub fn clear_hit(&mut self) {
        self.hit = None;
    }

    /// Mark the page of an executed instruction.
    pub fn mark_prog(&mut self, address: u16) {
        self.visual[usize::from(address >> VISUAL_SHIFT)] = VisualAccess::Prog;
    }

    #[must_use]
    pub fn visual_memory(&self) -> &[VisualAccess; VISUAL_MEMORY_SIZE] {
        &self.visual
    }

    pub fn clear_visual_memory(&mut self) {
        self.visual.fill(VisualAccess::None);
    }
}

impl DisplayMemory for Memory {
    fn peek(&self, address: u16) -> u8 {
        Memory::peek(self, address)
    }

    fn bank(&self, index: usize) -> Option<&[u8]> {
        self.banks.get(index).map(|b| b.data.as_slice())
    }
}

impl Serializable for Memory {
    fn serialize(&self, sink: &mut dyn StateSink) {
        // Gap filling can push bank indices past 255.
        sink.put_u16(self.mapping.len() as u16);
        for &bank in &self.mapping {
            sink.put_u16(bank as u16);
        }
        for bank in &self.banks {
            sink.put_bytes(&bank.data);
        }
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let count = usize::from(reader.get_u16()?);
        if count != self.slots.len() {
            return Err(StateError::LengthMismatch {
                what: "slot table",
                expected: self.slots.len(),
                found: count,
            });
        }
        let mut mapping = Vec::with_capacity(count);
        for slot in 0..count {
            let bank = usize::from(reader.get_u16()?);
            if self.check_slot(slot, bank).is_err() {
                return Err(StateError::InvalidValue {
                    what: "slot bank",
                    value: bank as u32,
                });
            }
            mapping.push(bank);
        }
        for bank in &mut self.banks {
            reader.get_bytes_into("memory bank", &mut bank.data)?;
        }
        self.mapping = mapping;
        self.clear_visual_memory();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_model::PredefinedModel;
    use emu_core::state;

    fn make_memory(model: PredefinedModel) -> Memory {
        Memory::new(&MemoryLayout::predefined(model).unwrap())
    }

    #[test]
    fn rom_ignores_bus_writes() {
        let mut mem = make_memory(PredefinedModel::Zx48k);
        mem.write_block(0x0000, &[0xF3], true).unwrap();
        mem.write8(0x0000, 0x00);
        assert_eq!(mem.read8(0x0000), 0xF3);
        mem.write8(0x8000, 0x42);
        assert_eq!(mem.read8(0x8000), 0x42);
    }

    #[test]
    fn write_block_respects_rom_unless_allowed() {
        let mut mem = make_memory(PredefinedModel::Zx48k);
        mem.write_block(0x3FFF, &[1, 2], false).unwrap();
        assert_eq!(mem.read_block(0x3FFF, 2), [0, 2]);
    }

    #[test]
    fn unmapped_reads_fill_value() {
        let mut mem = make_memory(PredefinedModel::Zx16k);
        mem.write8(0x9000, 0x12);
        mem.write_block(0x9000, &[0x34], true).unwrap();
        assert_eq!(mem.read8(0x9000), UNMAPPED_FILL);
    }

    #[test]
    fn blocks_wrap_at_top_of_memory() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        mem.write_block(0xFFFF, &[0xAA, 0xBB], false).unwrap();
        assert_eq!(mem.peek(0x0000), 0xBB);
        assert_eq!(mem.peek16(0xFFFF), 0xBBAA);
    }

    #[test]
    fn valid_slot_switch_changes_reads() {
        let mut mem = make_memory(PredefinedModel::Zx128k);
        mem.load_bank(3, 0, &[0x33]).unwrap();
        mem.set_slot(3, 3).unwrap();
        assert_eq!(mem.peek(0xC000), 0x33);
        assert_eq!(mem.slots(), [8, 5, 2, 3]);
    }

    #[test]
    fn invalid_slot_switch_keeps_mapping() {
        let mut mem = make_memory(PredefinedModel::Zx128k);
        assert_eq!(
            mem.set_slot(1, 3),
            Err(MemoryError::BankNotAllowed { slot: 1, bank: 3 })
        );
        assert_eq!(mem.set_slot(9, 0), Err(MemoryError::InvalidSlot { slot: 9 }));
        assert_eq!(mem.slots(), [8, 5, 2, 0]);
    }

    #[test]
    fn multi_slot_switch_is_atomic() {
        let mut mem = make_memory(PredefinedModel::Zx128k);
        assert!(mem.set_slots(&[(3, 7), (0, 5)]).is_err());
        assert_eq!(mem.slots(), [8, 5, 2, 0]);
    }

    #[test]
    fn watchpoint_records_first_hit_only() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        mem.set_watchpoint(0x8000, 4, WatchAccess::READ_WRITE).unwrap();
        mem.read8(0x7FFF);
        assert_eq!(mem.hit(), None);
        mem.write8(0x8002, 1);
        mem.read8(0x8000);
        assert_eq!(
            mem.hit(),
            Some(WatchpointHit {
                address: 0x8002,
                access: Access::Write
            })
        );
        mem.clear_hit();
        mem.read8(0x8003);
        assert_eq!(mem.hit().map(|h| h.access), Some(Access::Read));
    }

    #[test]
    fn overlapping_watchpoints_are_counted() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        mem.set_watchpoint(0x4000, 2, WatchAccess::READ).unwrap();
        mem.set_watchpoint(0x4001, 2, WatchAccess::WRITE).unwrap();
        mem.remove_watchpoint(0x4000, 2, WatchAccess::READ).unwrap();
        assert_eq!(mem.watched(0x4001), WatchAccess::WRITE);

        mem.read8(0x4001);
        assert_eq!(mem.hit(), None);
        mem.write8(0x4001, 0);
        assert!(mem.hit().is_some());
    }

    #[test]
    fn empty_watch_range_is_an_error() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        assert!(mem.set_watchpoint(0, 0, WatchAccess::READ).is_err());
    }

    #[test]
    fn visual_memory_tracks_last_access() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        mem.read8(0x1234);
        mem.write8(0x5678, 0);
        mem.mark_prog(0x12FF);
        assert_eq!(mem.visual_memory()[0x12], VisualAccess::Prog);
        assert_eq!(mem.visual_memory()[0x56], VisualAccess::Write);
        mem.clear_visual_memory();
        assert_eq!(mem.visual_memory()[0x56], VisualAccess::None);
    }

    #[test]
    fn peek_and_blocks_do_not_trigger_watchpoints() {
        let mut mem = make_memory(PredefinedModel::AllRam);
        mem.set_watchpoint(0x100, 1, WatchAccess::READ_WRITE).unwrap();
        let _ = mem.peek(0x100);
        let _ = mem.read_block(0x100, 1);
        mem.write_block(0x100, &[1], false).unwrap();
        assert_eq!(mem.hit(), None);
    }

    #[test]
    fn state_round_trip() {
        let mut mem = make_memory(PredefinedModel::Zx128k);
        mem.set_slot(3, 6).unwrap();
        mem.write8(0xC000, 0x66);
        mem.write8(0x4000, 0x55);
        let saved = state::save(&mem);
        assert_eq!(saved.len(), mem.serialized_size());

        let mut restored = make_memory(PredefinedModel::Zx128k);
        state::restore(&mut restored, &saved).unwrap();
        assert_eq!(restored.slots(), [8, 5, 2, 6]);
        assert_eq!(restored.peek(0xC000), 0x66);
        assert_eq!(restored.peek(0x4000), 0x55);
    }

    #[test]
    fn state_round_trip_with_gap_bank_past_255() {
        use crate::memory_model::{BankIndex, CustomBank, CustomSlot};

        let layout = MemoryLayout::from_custom(&[CustomSlot {
            range: [0x0000, 0x00FF],
            banks: vec![CustomBank {
                index: BankIndex::Range([0, 255]),
                name: None,
                short_name: None,
                rom: false,
            }],
            name: None,
            initial_bank: None,
        }])
        .unwrap();
        let mut mem = Memory::new(&layout);
        assert_eq!(mem.slots(), [0, 256]);
        mem.set_slot(0, 200).unwrap();
        mem.write8(0x0010, 0x42);

        let saved = state::save(&mem);
        assert_eq!(saved.len(), mem.serialized_size());
        let mut restored = Memory::new(&layout);
        state::restore(&mut restored, &saved).unwrap();
        assert_eq!(restored.slots(), [200, 256]);
        assert_eq!(restored.peek(0x0010), 0x42);
        assert_eq!(restored.peek(0x0100), 0xFF);
    }

    #[test]
    fn restore_into_other_model_fails() {
        let mem = make_memory(PredefinedModel::Zx48k);
        let saved = state::save(&mem);
        let mut other = make_memory(PredefinedModel::Zx16k);
        assert!(state::restore(&mut other, &saved).is_err());
    }

    #[test]
    fn watch_access_parse() {
        assert_eq!(WatchAccess::parse("rw"), Some(WatchAccess::READ_WRITE));
        assert_eq!(WatchAccess::parse("w"), Some(WatchAccess::WRITE));
        assert_eq!(WatchAccess::parse(""), None);
        assert_eq!(WatchAccess::parse("x"), None);
    }
}
