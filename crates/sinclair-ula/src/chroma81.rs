//! Chroma81 colour add-on for the ZX81.

use emu_core::{StateError, StateReader, StateSink};

/// Control port of the Chroma81 interface.
pub const CHROMA81_PORT: u16 = 0x7FEF;

/// Chroma81 state as set through port 0x7FEF.
///
/// Bit 5 enables colour, bit 4 selects the mode and bits 0-3 are the border
/// colour. In mode 0 each character code has its own colour byte at
/// `0xC000 + code * 8 + line` (inverse characters 512 bytes higher). In
/// mode 1 every display file position has a colour byte 0x8000 above it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chroma81 {
    pub enabled: bool,
    pub mode: u8,
    pub border: u8,
}

impl Chroma81 {
    /// Handle a port write. Returns true if the port was ours.
    pub fn out_port(&mut self, port: u16, value: u8) -> bool {
        if port != CHROMA81_PORT {
            return false;
        }
        self.enabled = value & 0x20 != 0;
        self.mode = (value >> 4) & 1;
        self.border = value & 0x0F;
        true
    }

    /// Colour address for a glyph fetch. `lower` is the offset within the
    /// character table, `m1_address` the display file address that was
    /// fetched.
    #[must_use]
    pub fn colour_address(&self, lower: u16, inverted: bool, m1_address: u16) -> u16 {
        if self.mode == 0 {
            0xC000 + lower + if inverted { 64 * 8 } else { 0 }
        } else {
            m1_address
        }
    }

    pub(crate) fn serialize(&self, sink: &mut dyn StateSink) {
        sink.put_bool(self.enabled);
        sink.put_u8(self.mode);
        sink.put_u8(self.border);
    }

    pub(crate) fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = reader.get_bool()?;
        self.mode = reader.get_u8()? & 1;
        self.border = reader.get_u8()? & 0x0F;
        Ok(())
    }
}
