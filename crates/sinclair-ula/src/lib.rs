//! Sinclair ULA video timing.
//!
//! # ZX81
//!
//! The ZX81 ULA has no frame counter of its own. The picture is built from
//! three signals the CPU produces:
//!
//! - VSYNC starts on an `IN` from an even port while the NMI generator is
//!   off and ends on the next `OUT` to any port.
//! - The NMI generator is switched off by an `OUT` with A1 low and on by an
//!   `OUT` with A0 low. While on, every HSYNC raises an NMI.
//! - Opcode fetches from 0x8000 upwards are the display file. The ULA
//!   returns a NOP to the CPU for character codes (bit 6 clear) and uses the
//!   code to fetch glyph lines itself.
//!
//! Both ZX81 variants share one sync-timing core, which turns elapsed
//! T-states and port accesses into HSYNC/NMI events and line counters:
//!
//! - [`Zx81Ula`] captures the display file (24 rows of 33 bytes) at each
//!   qualifying VSYNC. It only supports the standard character display.
//! - [`Zx81HiresUla`] replays the M1 fetches and records the actual glyph
//!   patterns per scanline, so pseudo- and true hi-res programs display.
//!
//! # ZX Spectrum
//!
//! [`SpectrumUla`] only tracks which RAM bank holds the visible screen and
//! the border colour. The 50 Hz interrupt comes from the CPU.
//!
//! # Memory access
//!
//! The ULA reads memory through [`DisplayMemory`], which must not trigger
//! watchpoints or mark memory activity.

mod chroma81;
mod spectrum;
mod zx81;
mod zx81_hires;

pub use chroma81::Chroma81;
pub use spectrum::{SPECTRUM_SCREEN_SIZE, SpectrumUla};
pub use zx81::{
    DFILE_POINTER, DFILE_SIZE, TSTATES_OF_HSYNC_LOW, TSTATES_PER_SCANLINE, TSTATES_PER_SCREEN,
    VSYNC_MINIMAL_TSTATES, Zx81Ula,
};
pub use zx81_hires::{ScreenArea, Zx81HiresUla};

/// Side-effect-free memory view handed to the ULA.
pub trait DisplayMemory {
    /// Read a byte through the current slot mapping.
    fn peek(&self, address: u16) -> u8;

    /// Contents of a whole bank, if it exists.
    fn bank(&self, index: usize) -> Option<&[u8]>;
}

/// What the CPU did since the last call to `execute()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSignals {
    /// T-states taken by the last instruction (including any interrupt).
    pub tstates: u32,
    /// The CPU is in HALT.
    pub halted: bool,
}

/// What the ULA wants from the machine after `execute()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UlaResponse {
    /// Raise an NMI on the CPU.
    pub nmi: bool,
    /// Extra T-states the CPU spent held in WAIT. Already applied to the
    /// ULA's own counters; the machine adds them to its elapsed time.
    pub wait_tstates: u32,
}

/// A displayable snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// No qualifying VSYNC seen recently (FAST mode or a crashed program).
    NoSignal { border: u8 },
    /// Display file contents: 24 rows of 33 bytes, each row ending in
    /// NEWLINE. `colour` holds one Chroma81 attribute per byte when enabled.
    Zx81Text {
        dfile: Vec<u8>,
        colour: Option<Vec<u8>>,
        border: u8,
    },
    /// Scanline records. Each visible line is a count byte `n` followed by
    /// `n` pairs of (T-states since HSYNC end, 8-pixel pattern). `colour`
    /// holds one Chroma81 attribute per pattern when enabled.
    Zx81Hires {
        data: Vec<u8>,
        colour: Option<Vec<u8>>,
        border: u8,
    },
    /// 6144 bytes of bitmap followed by 768 attribute bytes.
    Spectrum { screen: Vec<u8>, border: u8 },
}

impl Frame {
    #[must_use]
    pub fn is_no_signal(&self) -> bool {
        matches!(self, Frame::NoSignal { .. })
    }
}

#[cfg(test)]
pub(crate) mod test_memory {
    use super::DisplayMemory;

    /// Flat 64K view for tests.
    pub struct FlatMemory(pub Vec<u8>);

    impl FlatMemory {
        pub fn new() -> Self {
            Self(vec![0; 0x10000])
        }

        pub fn poke(&mut self, address: u16, bytes: &[u8]) {
            let start = address as usize;
            self.0[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl DisplayMemory for FlatMemory {
        fn peek(&self, address: u16) -> u8 {
            self.0[address as usize]
        }

        fn bank(&self, index: usize) -> Option<&[u8]> {
            let start = index * 0x4000;
            self.0.get(start..start + 0x4000)
        }
    }
}
