//! ZX81 ULA that replays the display fetches scanline by scanline.
//!
//! Every character fetch in the visible area appends (x, pattern) to the
//! current line record, where x is the number of T-states since the end of
//! the last HSYNC. The glyph address depends on I:
//!
//! - I >= 0x40 (WRX hi-res): `I * 256 + refresh low byte`.
//! - Otherwise the character table: `(I & 0xFE) * 256 + code * 8 + line`,
//!   plus 512 for codes with bit 7 set when I bit 0 is set (CHR$128).
//!
//! The buffer being built is copied to the stable frame at every
//! qualifying VSYNC.

use emu_core::{Serializable, StateError, StateReader, StateSink};

use crate::chroma81::Chroma81;
use crate::zx81::Zx81Timing;
use crate::{CpuSignals, DisplayMemory, Frame, UlaResponse};

/// Maximum lines and 8-pixel columns the buffers hold.
const MAX_LINES: usize = 400;
const MAX_COLUMNS: usize = 416 / 8;
const SCREEN_BUFFER_SIZE: usize = MAX_LINES * (2 * MAX_COLUMNS + 1);
const COLOUR_BUFFER_SIZE: usize = MAX_LINES * MAX_COLUMNS;

/// Scanlines (counted from the end of VSYNC) that are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenArea {
    pub first_y: u32,
    pub last_y: u32,
}

impl ScreenArea {
    #[must_use]
    pub fn contains(&self, line: u32) -> bool {
        (self.first_y..=self.last_y).contains(&line)
    }
}

impl Default for ScreenArea {
    fn default() -> Self {
        Self {
            first_y: 0,
            last_y: MAX_LINES as u32 - 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Zx81HiresUla {
    timing: Zx81Timing,
    chroma: Chroma81,
    area: ScreenArea,

    screen_data: Vec<u8>,
    screen_index: usize,
    line_length_index: usize,
    colour_data: Vec<u8>,
    colour_index: usize,

    /// Last complete frame.
    frame_data: Option<Vec<u8>>,
    frame_colour: Option<Vec<u8>>,
}

impl Zx81HiresUla {
    #[must_use]
    pub fn new(area: ScreenArea) -> Self {
        Self {
            timing: Zx81Timing::default(),
            chroma: Chroma81::default(),
            area,
            screen_data: vec![0; SCREEN_BUFFER_SIZE],
            screen_index: 0,
            line_length_index: 0,
            colour_data: vec![0; COLOUR_BUFFER_SIZE],
            colour_index: 0,
            frame_data: None,
            frame_colour: None,
        }
    }

    fn line_visible(&self) -> bool {
        self.area.contains(self.timing.line_counter)
    }

    pub fn execute(&mut self, signals: CpuSignals) -> UlaResponse {
        let (response, lines_ended) = self.timing.execute(signals);
        if self.timing.in_vsync() {
            // Vertical retrace: nothing is drawn.
            return response;
        }
        let last = self.timing.line_counter;
        for line in last.saturating_sub(lines_ended) + 1..=last {
            if self.area.contains(line) && self.screen_index < SCREEN_BUFFER_SIZE {
                // Start a new line record with a zero count.
                self.line_length_index = self.screen_index;
                self.screen_data[self.screen_index] = 0;
                self.screen_index += 1;
            }
        }
        response
    }

    pub fn out_port(&mut self, port: u16, value: u8, _mem: &dyn DisplayMemory) {
        self.chroma.out_port(port, value);
        if self.timing.out_port(port) {
            self.frame_data = Some(self.screen_data[..self.screen_index].to_vec());
            self.frame_colour = self
                .chroma
                .enabled
                .then(|| self.colour_data[..self.colour_index].to_vec());
            self.screen_index = 0;
            self.line_length_index = 0;
            self.colour_index = 0;
            if self.line_visible() {
                self.screen_data[0] = 0;
                self.screen_index = 1;
            }
        }
    }

    pub fn in_port(&mut self, port: u16) -> Option<u8> {
        self.timing.in_port(port);
        None
    }

    /// M1 fetch at 0x8000 or above. Character codes are drawn and a NOP is
    /// returned to the CPU.
    pub fn m1_read(&mut self, address: u16, refresh: u16, mem: &dyn DisplayMemory) -> u8 {
        let data = mem.peek(address & 0x7FFF);
        if address & 0x8000 == 0 || data & 0x40 != 0 {
            return data;
        }
        // No line record open yet (before the first VSYNC), or buffer full.
        if !self.line_visible()
            || self.screen_index == 0
            || self.screen_index + 2 > SCREEN_BUFFER_SIZE
        {
            return 0x00;
        }

        let i = (refresh >> 8) as u8;
        let inverted = data & 0x80 != 0;
        let (glyph_address, lower) = if i >= 0x40 {
            let lower = refresh & 0x00FF;
            (u16::from(i) << 8 | lower, lower)
        } else {
            let lower = u16::from(data & 0x3F) * 8 + u16::from(self.timing.ula_line_counter);
            let mut addr = u16::from(i & 0xFE) << 8 | lower;
            if i & 0x01 != 0 && inverted {
                addr = addr.wrapping_add(0x200);
            }
            (addr, lower)
        };

        if self.chroma.enabled && self.colour_index < COLOUR_BUFFER_SIZE {
            let colour_address = self.chroma.colour_address(lower, inverted, address);
            self.colour_data[self.colour_index] = mem.peek(colour_address);
            self.colour_index += 1;
        }

        let mut pattern = mem.peek(glyph_address);
        if inverted {
            pattern = !pattern;
        }
        let x = self.timing.tstates - self.timing.hsync_end_tstates;
        self.screen_data[self.screen_index] = x.min(255) as u8;
        self.screen_data[self.screen_index + 1] = pattern;
        self.screen_index += 2;
        self.screen_data[self.line_length_index] =
            self.screen_data[self.line_length_index].wrapping_add(1);
        0x00
    }

    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.timing.frame_ready)
    }

    #[must_use]
    pub fn frame(&self) -> Frame {
        let border = self.border();
        match &self.frame_data {
            Some(data) if !self.timing.no_display => Frame::Zx81Hires {
                data: data.clone(),
                colour: self.frame_colour.clone(),
                border,
            },
            _ => Frame::NoSignal { border },
        }
    }

    #[must_use]
    pub fn border(&self) -> u8 {
        if self.chroma.enabled { self.chroma.border } else { 0x0F }
    }

    pub fn set_border(&mut self, border: u8) {
        self.chroma.border = border & 0x0F;
    }

    #[must_use]
    pub fn fast_mode(&self) -> bool {
        self.timing.fast_mode()
    }

    #[must_use]
    pub fn line_counter(&self) -> u32 {
        self.timing.line_counter
    }

    #[must_use]
    pub fn ula_line_counter(&self) -> u8 {
        self.timing.ula_line_counter
    }

    #[must_use]
    pub fn tstates(&self) -> u64 {
        self.timing.tstates
    }
}

impl Serializable for Zx81HiresUla {
    fn serialize(&self, sink: &mut dyn StateSink) {
        self.timing.serialize(sink);
        self.chroma.serialize(sink);
        sink.put_bytes(&self.screen_data[..self.screen_index]);
        sink.put_u32(self.line_length_index as u32);
        sink.put_bytes(&self.colour_data[..self.colour_index]);
        sink.put_bytes(self.frame_data.as_deref().unwrap_or_default());
        sink.put_bytes(self.frame_colour.as_deref().unwrap_or_default());
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.timing.deserialize(reader)?;
        self.chroma.deserialize(reader)?;

        let screen = reader.get_bytes()?;
        let line_length_index = reader.get_u32()? as usize;
        if screen.len() > SCREEN_BUFFER_SIZE
            || (line_length_index > 0 && line_length_index >= screen.len())
        {
            return Err(StateError::InvalidValue {
                what: "screen buffer index",
                value: screen.len() as u32,
            });
        }
        let colour = reader.get_bytes()?;
        if colour.len() > COLOUR_BUFFER_SIZE {
            return Err(StateError::InvalidValue {
                what: "colour buffer index",
                value: colour.len() as u32,
            });
        }
        self.screen_data[..screen.len()].copy_from_slice(screen);
        self.screen_index = screen.len();
        self.line_length_index = line_length_index;
        self.colour_data[..colour.len()].copy_from_slice(colour);
        self.colour_index = colour.len();

        let frame = reader.get_bytes()?;
        self.frame_data = (!frame.is_empty()).then(|| frame.to_vec());
        let frame_colour = reader.get_bytes()?;
        self.frame_colour = (!frame_colour.is_empty()).then(|| frame_colour.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TSTATES_PER_SCANLINE;
    use crate::test_memory::FlatMemory;

    fn run(ula: &mut Zx81HiresUla, tstates: u32) {
        ula.execute(CpuSignals {
            tstates,
            halted: false,
        });
    }

    /// VSYNC long enough to start a frame.
    fn vsync(ula: &mut Zx81HiresUla, mem: &FlatMemory) {
        ula.in_port(0x00FE);
        run(ula, 600);
        ula.out_port(0x00FF, 0, mem);
    }

    #[test]
    fn character_fetch_records_glyph_line() {
        let mut ula = Zx81HiresUla::new(ScreenArea::default());
        let mut mem = FlatMemory::new();
        // Character table at 0x1E00, glyph for code 1 line 0.
        mem.poke(0x1E08, &[0b1010_1010]);
        mem.poke(0x4000, &[0x01, 0x81]);
        vsync(&mut ula, &mem);

        run(&mut ula, 20);
        assert_eq!(ula.m1_read(0xC000, 0x1E00, &mem), 0x00);
        run(&mut ula, 4);
        assert_eq!(ula.m1_read(0xC001, 0x1E00, &mem), 0x00);
        vsync(&mut ula, &mem);

        match ula.frame() {
            Frame::Zx81Hires { data, colour, .. } => {
                assert_eq!(data[0], 2);
                assert_eq!(data[2], 0b1010_1010);
                // Second character is inverted.
                assert_eq!(data[4], 0b0101_0101);
                assert_eq!(u32::from(data[3]), u32::from(data[1]) + 4);
                assert_eq!(colour, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn wrx_uses_refresh_address() {
        let mut ula = Zx81HiresUla::new(ScreenArea::default());
        let mut mem = FlatMemory::new();
        mem.poke(0x4005, &[0xF0]);
        mem.poke(0x4100, &[0x00]);
        vsync(&mut ula, &mem);
        ula.m1_read(0xC100, 0x4005, &mem);
        vsync(&mut ula, &mem);
        match ula.frame() {
            Frame::Zx81Hires { data, .. } => assert_eq!(&data[..3], &[1, 0, 0xF0][..]),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn each_scanline_gets_a_record() {
        let mut ula = Zx81HiresUla::new(ScreenArea::default());
        let mem = FlatMemory::new();
        vsync(&mut ula, &mem);
        // Lines end at 208, 416 and 624 T-states.
        for _ in 0..(3 * TSTATES_PER_SCANLINE + 19) / 4 {
            run(&mut ula, 4);
        }
        vsync(&mut ula, &mem);
        match ula.frame() {
            Frame::Zx81Hires { data, .. } => assert_eq!(data, vec![0, 0, 0, 0]),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn one_long_step_opens_every_line() {
        let mut ula = Zx81HiresUla::new(ScreenArea {
            first_y: 0,
            last_y: 2,
        });
        let mem = FlatMemory::new();
        vsync(&mut ula, &mem);
        run(&mut ula, 5 * TSTATES_PER_SCANLINE);
        assert_eq!(ula.line_counter(), 5);
        vsync(&mut ula, &mem);
        match ula.frame() {
            // Lines 0 to 2 only.
            Frame::Zx81Hires { data, .. } => assert_eq!(data, vec![0, 0, 0]),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn lines_outside_area_are_skipped() {
        let mut ula = Zx81HiresUla::new(ScreenArea {
            first_y: 10,
            last_y: 20,
        });
        let mut mem = FlatMemory::new();
        mem.poke(0x4000, &[0x01]);
        vsync(&mut ula, &mem);
        ula.m1_read(0xC000, 0x1E00, &mem);
        vsync(&mut ula, &mem);
        match ula.frame() {
            Frame::Zx81Hires { data, .. } => assert!(data.is_empty()),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn chroma_mode_0_collects_colour() {
        let mut ula = Zx81HiresUla::new(ScreenArea::default());
        let mut mem = FlatMemory::new();
        mem.poke(0x4000, &[0x01]);
        mem.poke(0xC008, &[0x5A]);
        ula.out_port(0x7FEF, 0x20, &mem);
        vsync(&mut ula, &mem);
        ula.m1_read(0xC000, 0x1E00, &mem);
        vsync(&mut ula, &mem);
        match ula.frame() {
            Frame::Zx81Hires { colour, .. } => assert_eq!(colour, Some(vec![0x5A])),
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(ula.border(), 0);
    }

    #[test]
    fn state_round_trip() {
        let mut ula = Zx81HiresUla::new(ScreenArea::default());
        let mut mem = FlatMemory::new();
        mem.poke(0x4000, &[0x01]);
        vsync(&mut ula, &mem);
        ula.m1_read(0xC000, 0x1E00, &mem);
        vsync(&mut ula, &mem);
        ula.m1_read(0xC000, 0x1E00, &mem);

        let bytes = emu_core::state::save(&ula);
        let mut restored = Zx81HiresUla::new(ScreenArea::default());
        emu_core::state::restore(&mut restored, &bytes).unwrap();
        assert_eq!(restored.frame(), ula.frame());
        assert_eq!(restored.screen_index, ula.screen_index);
        assert_eq!(restored.line_counter(), ula.line_counter());
    }
}
