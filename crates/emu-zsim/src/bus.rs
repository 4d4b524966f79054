//! ZSim bus: memory, ports, bank switching and video wired together.
//!
//! Port writes go to the video hardware, the bank switcher and the port
//! table, in that order. A rejected bank switch is kept until the run loop
//! picks it up with [`ZSimBus::take_error`].

use emu_core::Bus;

use crate::bankswitch::{BankSwitchError, BankSwitcher};
use crate::memory::Memory;
use crate::ports::Ports;
use crate::video::Video;

#[derive(Debug)]
pub struct ZSimBus {
    pub memory: Memory,
    pub ports: Ports,
    pub bank_switcher: BankSwitcher,
    pub video: Video,
    error: Option<BankSwitchError>,
}

impl ZSimBus {
    #[must_use]
    pub fn new(memory: Memory, ports: Ports, bank_switcher: BankSwitcher, video: Video) -> Self {
        Self {
            memory,
            ports,
            bank_switcher,
            video,
            error: None,
        }
    }

    /// The first bank switch error since the last call.
    pub fn take_error(&mut self) -> Option<BankSwitchError> {
        self.error.take()
    }
}

impl Bus for ZSimBus {
    fn read(&mut self, address: u16) -> u8 {
        self.memory.read8(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory.write8(address, value);
    }

    fn fetch(&mut self, address: u16, refresh: u16) -> u8 {
        match self.video.m1_read(address, refresh, &self.memory) {
            Some(value) => value,
            None => self.memory.read8(address),
        }
    }

    fn io_read(&mut self, port: u16) -> u8 {
        let device = self.video.in_port(port);
        self.ports.read_merged(port, device)
    }

    fn io_write(&mut self, port: u16, value: u8) {
        let paging_locked = self.bank_switcher.is_locked();
        self.video.out_port(port, value, paging_locked, &self.memory);
        if let Err(err) = self.bank_switcher.write(port, value, &mut self.memory) {
            self.error.get_or_insert(err);
        }
        self.ports.write(port, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZSimConfig;
    use crate::memory_model::{MemoryLayout, PredefinedModel};
    use crate::ports::PortCombine;

    fn make_bus(model: PredefinedModel) -> ZSimBus {
        let memory = Memory::new(&MemoryLayout::predefined(model).unwrap());
        let switcher = BankSwitcher::new(model.bank_switch_rules(), &memory).unwrap();
        let video = Video::for_config(&ZSimConfig::for_model(model), &memory);
        ZSimBus::new(memory, Ports::new(PortCombine::OpenCollector), switcher, video)
    }

    #[test]
    fn paging_write_reaches_memory_and_ula() {
        let mut bus = make_bus(PredefinedModel::Zx128k);
        bus.io_write(0x7FFD, 0x0B);
        assert_eq!(bus.memory.slots()[3], 3);
        assert!(matches!(&bus.video, Video::Spectrum(ula) if ula.current_bank() == 7));
        assert!(bus.take_error().is_none());
    }

    #[test]
    fn locked_paging_keeps_screen_and_mapping_together() {
        let mut bus = make_bus(PredefinedModel::Zx128k);
        // Shadow screen, bank 1 at 0xC000, then lock.
        bus.io_write(0x7FFD, 0x29);
        bus.io_write(0x7FFD, 0x03);
        assert_eq!(bus.memory.slots()[3], 1);
        assert!(matches!(&bus.video, Video::Spectrum(ula) if ula.current_bank() == 7));
        // The border is not part of paging.
        bus.io_write(0x00FE, 0x04);
        assert_eq!(bus.video.border(), 4);
    }

    #[test]
    fn zx81_display_fetch_returns_nop_for_characters() {
        let mut bus = make_bus(PredefinedModel::Zx81_16k);
        bus.memory.write8(0x4100, 0x26);
        assert_eq!(bus.fetch(0xC100, 0), 0x00);
        bus.memory.write8(0x4100, 0x76);
        assert_eq!(bus.fetch(0xC100, 0), 0x76);
        assert_eq!(bus.fetch(0x4100, 0), 0x76);
    }

    #[test]
    fn ports_are_idle_without_handlers() {
        let mut bus = make_bus(PredefinedModel::AllRam);
        assert_eq!(bus.io_read(0x00FE), 0xFF);
        bus.ports.register_generic_read(|_| Some(0x1F));
        assert_eq!(bus.io_read(0x00FE), 0x1F);
    }
}
