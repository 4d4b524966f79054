//! The video hardware a machine is built with.

use emu_core::{Serializable, StateError, StateReader, StateSink};
use sinclair_ula::{CpuSignals, DisplayMemory, Frame, ScreenArea, SpectrumUla, UlaResponse, Zx81HiresUla, Zx81Ula};

use crate::config::{VideoVariant, ZSimConfig};
use crate::memory::{BankKind, Memory};

#[derive(Debug, Clone)]
pub enum Video {
    /// No display; only a border colour to save and restore.
    None { border: u8 },
    Zx81(Zx81Ula),
    Zx81Hires(Zx81HiresUla),
    Spectrum(SpectrumUla),
}

impl Video {
    /// Video hardware for a configuration. A Spectrum ULA needs a RAM bank
    /// to show; without one the machine has no display. The screen banks
    /// are configured, the model's own, or the RAM at 0x4000.
    #[must_use]
    pub fn for_config(config: &ZSimConfig, memory: &Memory) -> Self {
        match config.video_variant() {
            VideoVariant::None => Video::None { border: 7 },
            VideoVariant::Zx81 => Video::Zx81(Zx81Ula::new()),
            VideoVariant::Zx81Hires => {
                let area = config.hires_area.map_or_else(ScreenArea::default, |a| ScreenArea {
                    first_y: a.first_y,
                    last_y: a.last_y,
                });
                Video::Zx81Hires(Zx81HiresUla::new(area))
            }
            VideoVariant::Spectrum => {
                let banks = match (config.spectrum_screen, config.memory_model.predefined()) {
                    (Some(screen), _) => Some((screen.bank, screen.shadow_bank)),
                    (None, Some(model)) => model.screen_banks(),
                    (None, None) => {
                        let bank = memory.bank_at(0x4000);
                        (memory.bank_kind(bank) == Some(BankKind::Ram)).then_some((bank, None))
                    }
                };
                banks.map_or(Video::None { border: 7 }, |(bank, shadow)| {
                    Video::Spectrum(SpectrumUla::new(bank, shadow))
                })
            }
        }
    }

    #[must_use]
    pub fn is_zx81(&self) -> bool {
        matches!(self, Video::Zx81(_) | Video::Zx81Hires(_))
    }

    /// Advance the ZX81 sync timing by the last instruction.
    pub fn execute(&mut self, signals: CpuSignals) -> UlaResponse {
        match self {
            Video::Zx81(ula) => ula.execute(signals),
            Video::Zx81Hires(ula) => ula.execute(signals),
            Video::None { .. } | Video::Spectrum(_) => UlaResponse::default(),
        }
    }

    /// Port write. `paging_locked` is the bank switcher's lock before the
    /// write.
    pub fn out_port(&mut self, port: u16, value: u8, paging_locked: bool, memory: &dyn DisplayMemory) {
        match self {
            Video::Zx81(ula) => ula.out_port(port, value, memory),
            Video::Zx81Hires(ula) => ula.out_port(port, value, memory),
            Video::Spectrum(ula) => ula.out_port(port, value, paging_locked),
            Video::None { .. } => {}
        }
    }

    /// Port read. Returns the ULA's answer if it drives the bus.
    pub fn in_port(&mut self, port: u16) -> Option<u8> {
        match self {
            Video::Zx81(ula) => ula.in_port(port),
            Video::Zx81Hires(ula) => ula.in_port(port),
            Video::None { .. } | Video::Spectrum(_) => None,
        }
    }

    /// Opcode fetch through the ZX81 display logic. `None` if this video
    /// hardware does not intercept fetches at `address`.
    pub fn m1_read(&mut self, address: u16, refresh: u16, memory: &dyn DisplayMemory) -> Option<u8> {
        if address < 0x8000 {
            return None;
        }
        match self {
            Video::Zx81(ula) => Some(ula.m1_read(address, refresh, memory)),
            Video::Zx81Hires(ula) => Some(ula.m1_read(address, refresh, memory)),
            Video::None { .. } | Video::Spectrum(_) => None,
        }
    }

    /// Return and clear the ZX81 frame-ready flag.
    pub fn take_frame_ready(&mut self) -> bool {
        match self {
            Video::Zx81(ula) => ula.take_frame_ready(),
            Video::Zx81Hires(ula) => ula.take_frame_ready(),
            Video::None { .. } | Video::Spectrum(_) => false,
        }
    }

    #[must_use]
    pub fn frame(&self, memory: &dyn DisplayMemory) -> Frame {
        match self {
            Video::Zx81(ula) => ula.frame(),
            Video::Zx81Hires(ula) => ula.frame(),
            Video::Spectrum(ula) => ula.frame(memory),
            Video::None { border } => Frame::NoSignal { border: *border },
        }
    }

    #[must_use]
    pub fn border(&self) -> u8 {
        match self {
            Video::Zx81(ula) => ula.border(),
            Video::Zx81Hires(ula) => ula.border(),
            Video::Spectrum(ula) => ula.border(),
            Video::None { border } => *border,
        }
    }

    pub fn set_border(&mut self, value: u8) {
        match self {
            Video::Zx81(ula) => ula.set_border(value),
            Video::Zx81Hires(ula) => ula.set_border(value),
            Video::Spectrum(ula) => ula.set_border(value),
            Video::None { border } => *border = value,
        }
    }

    /// SLOW/FAST mode of a ZX81; always `None` for other machines.
    #[must_use]
    pub fn fast_mode(&self) -> Option<bool> {
        match self {
            Video::Zx81(ula) => Some(ula.fast_mode()),
            Video::Zx81Hires(ula) => Some(ula.fast_mode()),
            Video::None { .. } | Video::Spectrum(_) => None,
        }
    }

    /// (scanline counter, glyph line) of a ZX81.
    #[must_use]
    pub fn line_counters(&self) -> Option<(u32, u8)> {
        match self {
            Video::Zx81(ula) => Some((ula.line_counter(), ula.ula_line_counter())),
            Video::Zx81Hires(ula) => Some((ula.line_counter(), ula.ula_line_counter())),
            Video::None { .. } | Video::Spectrum(_) => None,
        }
    }
}

impl Serializable for Video {
    fn serialize(&self, sink: &mut dyn StateSink) {
        match self {
            Video::Zx81(ula) => ula.serialize(sink),
            Video::Zx81Hires(ula) => ula.serialize(sink),
            Video::Spectrum(ula) => ula.serialize(sink),
            Video::None { .. } => {}
        }
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        match self {
            Video::Zx81(ula) => ula.deserialize(reader),
            Video::Zx81Hires(ula) => ula.deserialize(reader),
            Video::Spectrum(ula) => ula.deserialize(reader),
            Video::None { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumScreen;
    use crate::memory_model::{MemoryLayout, PredefinedModel};

    fn make_video(model: PredefinedModel) -> (Video, Memory) {
        let memory = Memory::new(&MemoryLayout::predefined(model).unwrap());
        let video = Video::for_config(&ZSimConfig::for_model(model), &memory);
        (video, memory)
    }

    #[test]
    fn variant_follows_model() {
        assert!(matches!(make_video(PredefinedModel::Zx48k).0, Video::Spectrum(_)));
        assert!(matches!(make_video(PredefinedModel::Zx81_16k).0, Video::Zx81(_)));
        assert!(matches!(make_video(PredefinedModel::AllRam).0, Video::None { .. }));
    }

    #[test]
    fn spectrum_border_from_port() {
        let (mut video, memory) = make_video(PredefinedModel::Zx48k);
        video.out_port(0x00FE, 0x02, false, &memory);
        assert_eq!(video.border(), 2);
        assert!(matches!(video.frame(&memory), Frame::Spectrum { border: 2, .. }));
    }

    fn custom_spectrum_config() -> ZSimConfig {
        ZSimConfig::from_json(
            r#"{
                "memory_model": [
                    {"range": [0, 16383], "banks": [{"index": 0, "rom": true}]},
                    {"range": [16384, 32767], "banks": [{"index": 3}]},
                    {"range": [32768, 49151], "banks": [{"index": 2}]},
                    {"range": [49152, 65535], "banks": [{"index": [1, 9]}]}
                ],
                "video": "spectrum"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn custom_layout_shows_ram_at_4000() {
        let config = custom_spectrum_config();
        let memory = Memory::new(&config.memory_model.layout().unwrap());
        assert_eq!(memory.bank_count(), 10);
        let video = Video::for_config(&config, &memory);
        assert!(matches!(&video, Video::Spectrum(ula) if ula.current_bank() == 3));
    }

    #[test]
    fn configured_screen_banks() {
        let mut config = custom_spectrum_config();
        config.spectrum_screen = Some(SpectrumScreen {
            bank: 5,
            shadow_bank: Some(7),
        });
        let memory = Memory::new(&config.memory_model.layout().unwrap());
        let mut video = Video::for_config(&config, &memory);
        assert!(matches!(&video, Video::Spectrum(ula) if ula.current_bank() == 5));
        video.out_port(0x7FFD, 0x08, false, &memory);
        assert!(matches!(&video, Video::Spectrum(ula) if ula.current_bank() == 7));
    }

    #[test]
    fn low_fetches_are_not_intercepted() {
        let (mut video, memory) = make_video(PredefinedModel::Zx81_16k);
        assert_eq!(video.m1_read(0x4000, 0, &memory), None);
        assert!(video.m1_read(0xC000, 0, &memory).is_some());
    }

    #[test]
    fn no_video_keeps_border() {
        let (mut video, memory) = make_video(PredefinedModel::AllRam);
        video.set_border(3);
        assert_eq!(video.frame(&memory), Frame::NoSignal { border: 3 });
        assert_eq!(video.fast_mode(), None);
    }
}
