//! ZX81 sync timing and the display-file capturing ULA.

use emu_core::{Serializable, StateError, StateReader, StateSink};
use tracing::debug;

use crate::chroma81::Chroma81;
use crate::{CpuSignals, DisplayMemory, Frame, UlaResponse};

/// Length of one scanline.
pub const TSTATES_PER_SCANLINE: u32 = 207;
/// Length of the HSYNC pulse at the end of each scanline.
pub const TSTATES_OF_HSYNC_LOW: u32 = 16;
/// Shorter VSYNC pulses are ignored by the display.
pub const VSYNC_MINIMAL_TSTATES: u64 = 500;
/// Nominal frame length. No VSYNC within two frames means no picture.
pub const TSTATES_PER_SCREEN: u64 = 65_000;

/// System variable holding the display file address.
pub const DFILE_POINTER: u16 = 0x400C;
/// 24 rows of 32 characters plus NEWLINE.
pub const DFILE_SIZE: usize = 33 * 24;

/// HSYNC/VSYNC/NMI generation shared by both ZX81 ULAs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Zx81Timing {
    pub tstates: u64,
    hsync_counter: u32,
    /// HSYNC pulse in progress.
    hsync: bool,
    pub hsync_end_tstates: u64,
    vsync: bool,
    vsync_start_tstates: u64,
    /// End of the last VSYNC long enough to count as a frame.
    last_frame_tstates: u64,
    nmi_generator_on: bool,
    nmi_accessed: bool,
    fast_mode: bool,
    pub no_display: bool,
    /// Glyph line 0-7 within the character row.
    pub ula_line_counter: u8,
    /// Scanlines since the last qualifying VSYNC.
    pub line_counter: u32,
    pub frame_ready: bool,
}

impl Zx81Timing {
    /// Advance by the last instruction. Returns the response for the
    /// machine and the number of scanlines that ended.
    pub fn execute(&mut self, signals: CpuSignals) -> (UlaResponse, u32) {
        self.tstates += u64::from(signals.tstates);
        if !self.no_display && self.tstates - self.last_frame_tstates > 2 * TSTATES_PER_SCREEN {
            debug!("no VSYNC for two frames, display off");
            self.no_display = true;
            self.frame_ready = true;
        }

        let (nmi, mut lines_ended) = self.check_hsync(signals.tstates);
        let mut wait_tstates = 0;
        if nmi && signals.halted && self.hsync {
            // The wait circuit holds a halted CPU until HSYNC ends.
            wait_tstates = TSTATES_PER_SCANLINE.saturating_sub(self.hsync_counter);
            self.tstates += u64::from(wait_tstates);
            lines_ended += self.check_hsync(wait_tstates).1;
        }
        (UlaResponse { nmi, wait_tstates }, lines_ended)
    }

    /// Add T-states to the scanline counter and pass every HSYNC edge they
    /// cover. Returns (NMI raised, lines ended).
    fn check_hsync(&mut self, add: u32) -> (bool, u32) {
        self.hsync_counter += add;
        let mut nmi = false;
        let mut lines_ended = 0;
        loop {
            if self.hsync {
                if self.hsync_counter < TSTATES_PER_SCANLINE {
                    break;
                }
                self.hsync_counter -= TSTATES_PER_SCANLINE;
                self.hsync = false;
                self.hsync_end_tstates = self
                    .tstates
                    .saturating_sub(u64::from(self.hsync_counter));
                self.ula_line_counter = (self.ula_line_counter + 1) & 7;
                self.line_counter += 1;
                lines_ended += 1;
            } else {
                if self.hsync_counter < TSTATES_PER_SCANLINE - TSTATES_OF_HSYNC_LOW {
                    break;
                }
                self.hsync = true;
                nmi |= self.nmi_generator_on;
            }
        }
        (nmi, lines_ended)
    }

    /// Any OUT. Returns true if it ended a VSYNC long enough to count as a
    /// frame.
    pub fn out_port(&mut self, port: u16) -> bool {
        if port & 0x0002 == 0 {
            self.nmi_generator_on = false;
            self.nmi_accessed = true;
        } else if port & 0x0001 == 0 {
            self.nmi_generator_on = true;
            self.nmi_accessed = true;
        }

        let mut frame = false;
        if self.vsync {
            // SLOW mode keeps touching the NMI generator between frames.
            let fast = !self.nmi_accessed;
            self.nmi_accessed = false;
            if fast != self.fast_mode {
                self.fast_mode = fast;
                let mode = if fast { "FAST" } else { "SLOW" };
                debug!(mode, "ZX81 display mode");
            }
            if self.tstates - self.vsync_start_tstates >= VSYNC_MINIMAL_TSTATES {
                self.last_frame_tstates = self.tstates;
                self.no_display = false;
                self.line_counter = 0;
                self.frame_ready = true;
                frame = true;
            }
            self.ula_line_counter = 0;
            self.hsync_counter = 0;
            self.hsync = false;
            self.hsync_end_tstates = self.tstates;
        }
        self.vsync = false;
        frame
    }

    /// Any IN. Never drives the data bus.
    pub fn in_port(&mut self, port: u16) {
        if port & 0x0001 == 0 && !self.nmi_generator_on && !self.vsync {
            self.vsync = true;
            self.vsync_start_tstates = self.tstates;
        }
    }

    pub fn fast_mode(&self) -> bool {
        self.fast_mode
    }

    pub fn in_vsync(&self) -> bool {
        self.vsync
    }

    pub fn serialize(&self, sink: &mut dyn StateSink) {
        sink.put_u64(self.tstates);
        sink.put_u32(self.hsync_counter);
        sink.put_bool(self.hsync);
        sink.put_u64(self.hsync_end_tstates);
        sink.put_bool(self.vsync);
        sink.put_u64(self.vsync_start_tstates);
        sink.put_u64(self.last_frame_tstates);
        sink.put_bool(self.nmi_generator_on);
        sink.put_bool(self.nmi_accessed);
        sink.put_bool(self.fast_mode);
        sink.put_bool(self.no_display);
        sink.put_u8(self.ula_line_counter);
        sink.put_u32(self.line_counter);
    }

    pub fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.tstates = reader.get_u64()?;
        self.hsync_counter = reader.get_u32()?;
        self.hsync = reader.get_bool()?;
        self.hsync_end_tstates = reader.get_u64()?;
        self.vsync = reader.get_bool()?;
        self.vsync_start_tstates = reader.get_u64()?;
        self.last_frame_tstates = reader.get_u64()?;
        self.nmi_generator_on = reader.get_bool()?;
        self.nmi_accessed = reader.get_bool()?;
        self.fast_mode = reader.get_bool()?;
        self.no_display = reader.get_bool()?;
        self.ula_line_counter = reader.get_u8()? & 7;
        self.line_counter = reader.get_u32()?;
        self.frame_ready = true;
        Ok(())
    }
}

/// ZX81 ULA that shows the display file as captured at VSYNC.
#[derive(Debug, Clone, Default)]
pub struct Zx81Ula {
    timing: Zx81Timing,
    chroma: Chroma81,
    dfile: Option<Vec<u8>>,
    colour: Option<Vec<u8>>,
}

impl Zx81Ula {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(&mut self, signals: CpuSignals) -> UlaResponse {
        self.timing.execute(signals).0
    }

    pub fn out_port(&mut self, port: u16, value: u8, mem: &dyn DisplayMemory) {
        self.chroma.out_port(port, value);
        if self.timing.out_port(port) {
            self.capture(mem);
        }
    }

    /// Port read. The ULA never drives the data bus.
    pub fn in_port(&mut self, port: u16) -> Option<u8> {
        self.timing.in_port(port);
        None
    }

    /// M1 fetch at 0x8000 or above: character codes become NOPs.
    pub fn m1_read(&mut self, address: u16, _refresh: u16, mem: &dyn DisplayMemory) -> u8 {
        let data = mem.peek(address & 0x7FFF);
        if address & 0x8000 != 0 && data & 0x40 == 0 { 0x00 } else { data }
    }

    fn capture(&mut self, mem: &dyn DisplayMemory) {
        let lo = mem.peek(DFILE_POINTER);
        let hi = mem.peek(DFILE_POINTER + 1);
        let start = u16::from_le_bytes([lo, hi]);
        let dfile: Vec<u8> = (0..DFILE_SIZE as u16)
            .map(|i| mem.peek(start.wrapping_add(i)))
            .collect();
        self.colour = self.chroma.enabled.then(|| {
            dfile
                .iter()
                .enumerate()
                .map(|(i, &code)| {
                    let lower = u16::from(code & 0x3F) * 8;
                    let m1 = start.wrapping_add(i as u16) | 0x8000;
                    mem.peek(self.chroma.colour_address(lower, code & 0x80 != 0, m1))
                })
                .collect()
        });
        self.dfile = Some(dfile);
    }

    /// Return and clear the frame-ready flag.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.timing.frame_ready)
    }

    #[must_use]
    pub fn frame(&self) -> Frame {
        let border = self.border();
        match &self.dfile {
            Some(dfile) if !self.timing.no_display => Frame::Zx81Text {
                dfile: dfile.clone(),
                colour: self.colour.clone(),
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

impl Serializable for Zx81Ula {
    fn serialize(&self, sink: &mut dyn StateSink) {
        self.timing.serialize(sink);
        self.chroma.serialize(sink);
        sink.put_bytes(self.dfile.as_deref().unwrap_or_default());
        sink.put_bytes(self.colour.as_deref().unwrap_or_default());
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.timing.deserialize(reader)?;
        self.chroma.deserialize(reader)?;
        let dfile = reader.get_bytes()?;
        self.dfile = (!dfile.is_empty()).then(|| dfile.to_vec());
        let colour = reader.get_bytes()?;
        self.colour = (!colour.is_empty()).then(|| colour.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_memory::FlatMemory;
    use tracing_test::traced_test;

    fn run(ula: &mut Zx81Ula, tstates: u32) -> UlaResponse {
        ula.execute(CpuSignals {
            tstates,
            halted: false,
        })
    }

    #[test]
    fn line_counter_advances_once_per_scanline() {
        let mut ula = Zx81Ula::new();
        let mut responses = Vec::new();
        for _ in 0..160 {
            responses.push(run(&mut ula, 4));
        }
        // Lines end at 208, 416 and 624 T-states.
        assert_eq!(ula.line_counter(), 3);
        assert_eq!(ula.ula_line_counter(), 3);
        assert!(responses.iter().all(|r| !r.nmi));
    }

    #[test]
    fn large_chunks_count_every_scanline() {
        let mut chunked = Zx81Ula::new();
        run(&mut chunked, 10 * TSTATES_PER_SCANLINE);
        run(&mut chunked, 4);
        assert_eq!(chunked.line_counter(), 10);
        assert_eq!(chunked.ula_line_counter(), 2);

        let mut stepped = Zx81Ula::new();
        for _ in 0..(10 * TSTATES_PER_SCANLINE + 4) / 2 {
            run(&mut stepped, 2);
        }
        assert_eq!(stepped.line_counter(), chunked.line_counter());
        assert_eq!(stepped.ula_line_counter(), chunked.ula_line_counter());
    }

    #[test]
    fn nmi_raised_inside_a_long_instruction() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        ula.out_port(0x00FE, 0, &mem);
        let r = run(&mut ula, 3 * TSTATES_PER_SCANLINE + 10);
        assert!(r.nmi);
        assert_eq!(ula.line_counter(), 3);
    }

    #[test]
    fn hsync_raises_nmi_when_generator_on() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        // OUT ($FE): A0 low, A1 high.
        ula.out_port(0x00FE, 0, &mem);
        let r = run(&mut ula, TSTATES_PER_SCANLINE - TSTATES_OF_HSYNC_LOW);
        assert!(r.nmi);
        assert_eq!(r.wait_tstates, 0);
        // OUT ($FD) switches it off again.
        ula.out_port(0x00FD, 0, &mem);
        run(&mut ula, TSTATES_OF_HSYNC_LOW);
        assert!(!run(&mut ula, TSTATES_PER_SCANLINE - TSTATES_OF_HSYNC_LOW).nmi);
    }

    #[test]
    fn halted_cpu_waits_for_end_of_hsync() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        ula.out_port(0x00FE, 0, &mem);
        run(&mut ula, 190);
        let r = ula.execute(CpuSignals {
            tstates: 4,
            halted: true,
        });
        assert!(r.nmi);
        // Counter is at 194: 13 T-states of HSYNC remain.
        assert_eq!(r.wait_tstates, 13);
        assert_eq!(ula.line_counter(), 1);
        assert_eq!(ula.tstates(), 207);
    }

    fn make_display(mem: &mut FlatMemory) {
        mem.poke(DFILE_POINTER, &[0x00, 0x50]);
        mem.poke(0x5000, &[0x76, 0x26, 0x27]);
    }

    #[test]
    fn long_vsync_captures_display_file() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        make_display(&mut mem);
        assert!(ula.frame().is_no_signal());

        assert_eq!(ula.in_port(0x00FE), None);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        assert!(ula.take_frame_ready());
        assert!(!ula.take_frame_ready());
        match ula.frame() {
            Frame::Zx81Text { dfile, colour, .. } => {
                assert_eq!(dfile.len(), DFILE_SIZE);
                assert_eq!(&dfile[..3], &[0x76, 0x26, 0x27]);
                assert_eq!(colour, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(ula.line_counter(), 0);
    }

    #[test]
    fn short_vsync_keeps_frame() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        make_display(&mut mem);
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        let before = ula.frame();
        ula.take_frame_ready();

        mem.poke(0x5000, &[0x00]);
        run(&mut ula, 300);
        ula.in_port(0x00FE);
        run(&mut ula, 100);
        ula.out_port(0x00FF, 0, &mem);
        assert!(!ula.take_frame_ready());
        assert_eq!(ula.frame(), before);
        assert_eq!(ula.ula_line_counter(), 0);
    }

    #[test]
    fn no_vsync_means_no_signal() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        make_display(&mut mem);
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        ula.take_frame_ready();
        for _ in 0..(2 * TSTATES_PER_SCREEN / 1000 + 1) {
            run(&mut ula, 1000);
        }
        assert!(ula.take_frame_ready());
        assert!(ula.frame().is_no_signal());
    }

    #[test]
    fn short_vsyncs_do_not_keep_the_picture() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        make_display(&mut mem);
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        ula.take_frame_ready();
        assert!(!ula.frame().is_no_signal());

        // Keyboard reads with the NMI generator off: VSYNC pulses too short
        // to count as frames.
        for _ in 0..20 {
            run(&mut ula, 10_000);
            ula.in_port(0x00FE);
            run(&mut ula, 100);
            ula.out_port(0x00FF, 0, &mem);
        }
        assert!(ula.take_frame_ready());
        assert!(ula.frame().is_no_signal());

        // A real frame brings it back.
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        assert!(!ula.frame().is_no_signal());
    }

    #[test]
    fn in_with_nmi_generator_on_is_not_vsync() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        ula.out_port(0x00FE, 0, &mem);
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        assert!(!ula.take_frame_ready());
    }

    #[test]
    fn m1_returns_nop_for_characters() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        mem.poke(0x4100, &[0x26, 0x76]);
        assert_eq!(ula.m1_read(0xC100, 0, &mem), 0x00);
        assert_eq!(ula.m1_read(0xC101, 0, &mem), 0x76);
    }

    #[test]
    fn fast_mode_detected_without_nmi_access() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        assert!(ula.fast_mode());
    }

    #[traced_test]
    #[test]
    fn display_mode_changes_are_logged() {
        let mut ula = Zx81Ula::new();
        let mem = FlatMemory::new();
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        assert!(logs_contain("FAST"));

        // SLOW mode: the OUT ending VSYNC switches the NMI generator on.
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FE, 0, &mem);
        assert!(!ula.fast_mode());
        assert!(logs_contain("SLOW"));
    }

    #[test]
    fn state_round_trip_keeps_counters() {
        let mut ula = Zx81Ula::new();
        let mut mem = FlatMemory::new();
        make_display(&mut mem);
        ula.in_port(0x00FE);
        run(&mut ula, 600);
        ula.out_port(0x00FF, 0, &mem);
        run(&mut ula, 1000);

        let bytes = emu_core::state::save(&ula);
        let mut restored = Zx81Ula::new();
        emu_core::state::restore(&mut restored, &bytes).unwrap();
        assert_eq!(restored.line_counter(), ula.line_counter());
        assert_eq!(restored.ula_line_counter(), ula.ula_line_counter());
        assert_eq!(restored.tstates(), ula.tstates());
        assert_eq!(restored.frame(), ula.frame());
    }
}
