//! ZX Spectrum screen ULA.

use emu_core::{Serializable, StateError, StateReader, StateSink};

use crate::{DisplayMemory, Frame};

/// Bitmap plus attributes.
pub const SPECTRUM_SCREEN_SIZE: usize = 0x1B00;

/// Tracks which RAM bank is displayed and the border colour.
///
/// With a shadow screen (bank 7 on the 128K), bit 3 of port 0x7FFD (decoded
/// as `port & 0x8002 == 0`) switches between the normal and the shadow
/// screen. The selection is frozen while paging is locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumUla {
    normal_bank: usize,
    shadow_bank: Option<usize>,
    current_bank: usize,
    border: u8,
}

impl SpectrumUla {
    #[must_use]
    pub fn new(normal_bank: usize, shadow_bank: Option<usize>) -> Self {
        Self {
            normal_bank,
            shadow_bank,
            current_bank: normal_bank,
            border: 7,
        }
    }

    /// Port write. `paging_locked` is the state of the 0x7FFD lock before
    /// this write.
    pub fn out_port(&mut self, port: u16, value: u8, paging_locked: bool) {
        if port & 0x0001 == 0 {
            self.border = value & 0x07;
        }
        if let Some(shadow) = self.shadow_bank
            && !paging_locked
            && port & 0x8002 == 0
        {
            self.current_bank = if value & 0x08 != 0 { shadow } else { self.normal_bank };
        }
    }

    #[must_use]
    pub fn current_bank(&self) -> usize {
        self.current_bank
    }

    #[must_use]
    pub fn border(&self) -> u8 {
        self.border
    }

    pub fn set_border(&mut self, border: u8) {
        self.border = border & 0x07;
    }

    #[must_use]
    pub fn frame(&self, mem: &dyn DisplayMemory) -> Frame {
        match mem.bank(self.current_bank) {
            Some(bank) if bank.len() >= SPECTRUM_SCREEN_SIZE => Frame::Spectrum {
                screen: bank[..SPECTRUM_SCREEN_SIZE].to_vec(),
                border: self.border,
            },
            _ => Frame::NoSignal {
                border: self.border,
            },
        }
    }
}

impl Serializable for SpectrumUla {
    fn serialize(&self, sink: &mut dyn StateSink) {
        sink.put_u16(self.current_bank as u16);
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let bank = usize::from(reader.get_u16()?);
        if bank != self.normal_bank && Some(bank) != self.shadow_bank {
            return Err(StateError::InvalidValue {
                what: "screen bank",
                value: bank as u32,
            });
        }
        self.current_bank = bank;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_memory::FlatMemory;

    #[test]
    fn without_shadow_screen_paging_port_is_ignored() {
        let mut ula = SpectrumUla::new(1, None);
        ula.out_port(0x7FFD, 0x08, false);
        assert_eq!(ula.current_bank(), 1);
    }

    #[test]
    fn port_7ffd_selects_shadow_screen() {
        let mut ula = SpectrumUla::new(5, Some(7));
        assert_eq!(ula.current_bank(), 5);
        ula.out_port(0x7FFD, 0x08, false);
        assert_eq!(ula.current_bank(), 7);
        ula.out_port(0x7FFD, 0x00, false);
        assert_eq!(ula.current_bank(), 5);
        // Port 0xFFFD has A15 set: not the paging port.
        ula.out_port(0xFFFD, 0x08, false);
        assert_eq!(ula.current_bank(), 5);
    }

    #[test]
    fn locked_paging_freezes_screen_select() {
        let mut ula = SpectrumUla::new(5, Some(7));
        ula.out_port(0x7FFD, 0x28, false);
        assert_eq!(ula.current_bank(), 7);
        ula.out_port(0x7FFD, 0x00, true);
        assert_eq!(ula.current_bank(), 7);
    }

    #[test]
    fn border_from_even_port() {
        let mut ula = SpectrumUla::new(1, None);
        ula.out_port(0x00FE, 0x12, false);
        assert_eq!(ula.border(), 2);
        ula.out_port(0x00FF, 0x05, false);
        assert_eq!(ula.border(), 2);
        ula.out_port(0x00FE, 0x03, true);
        assert_eq!(ula.border(), 3);
    }

    #[test]
    fn frame_is_screen_bank_prefix() {
        let ula = SpectrumUla::new(1, None);
        let mut mem = FlatMemory::new();
        mem.poke(0x4000, &[0xAB]);
        match ula.frame(&mem) {
            Frame::Spectrum { screen, .. } => {
                assert_eq!(screen.len(), SPECTRUM_SCREEN_SIZE);
                assert_eq!(screen[0], 0xAB);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn restore_rejects_foreign_bank() {
        let mut ula = SpectrumUla::new(1, None);
        assert!(emu_core::state::restore(&mut ula, &[0, 3]).is_err());
        assert!(emu_core::state::restore(&mut ula, &[0, 1]).is_ok());
    }
}
