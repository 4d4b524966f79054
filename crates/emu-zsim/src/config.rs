//! Machine configuration.
//!
//! Everything is read from one JSON document. Every field has a default, so
//! `{}` is a valid configuration: a ZX48K with empty ROM.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::bankswitch::BankSwitchRule;
use crate::memory_model::{CustomSlot, MemoryLayout, PredefinedModel};
use crate::ports::PortCombine;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown memory model '{0}'")]
    UnknownModel(String),
    #[error("ROM image for bank {bank} has neither a path nor data")]
    MissingRom { bank: usize },
    #[error("ROM image for bank {bank} does not fit: {size} bytes at offset {offset}")]
    RomSize {
        bank: usize,
        offset: usize,
        size: usize,
    },
    #[error("invalid memory layout: {0}")]
    SlotRanges(String),
    #[error("invalid bank switch rule: {0}")]
    Rule(String),
    #[error("invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Memory model: a predefined name or a custom slot list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MemoryModel {
    Predefined(PredefinedModel),
    Custom(Vec<CustomSlot>),
}

impl Default for MemoryModel {
    fn default() -> Self {
        MemoryModel::Predefined(PredefinedModel::Zx48k)
    }
}

impl MemoryModel {
    pub fn layout(&self) -> Result<MemoryLayout, ConfigError> {
        match self {
            MemoryModel::Predefined(model) => MemoryLayout::predefined(*model),
            MemoryModel::Custom(slots) => MemoryLayout::from_custom(slots),
        }
    }

    #[must_use]
    pub fn predefined(&self) -> Option<PredefinedModel> {
        match self {
            MemoryModel::Predefined(model) => Some(*model),
            MemoryModel::Custom(_) => None,
        }
    }
}

/// Contents for one bank, from a file or inline base64.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RomImage {
    pub bank: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub data: Option<String>,
}

impl RomImage {
    /// The image bytes. Relative paths are resolved against `base`.
    pub fn bytes(&self, base: Option<&Path>) -> Result<Vec<u8>, ConfigError> {
        if let Some(data) = &self.data {
            return Ok(base64::engine::general_purpose::STANDARD.decode(data)?);
        }
        let path = self
            .path
            .as_ref()
            .ok_or(ConfigError::MissingRom { bank: self.bank })?;
        let path = match base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        };
        std::fs::read(&path).map_err(|source| ConfigError::Io { path, source })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoVariant {
    None,
    /// ZX81 display file captured at VSYNC.
    Zx81,
    /// ZX81 with every M1 fetch replayed (hi-res capable).
    Zx81Hires,
    Spectrum,
}

/// RAM banks holding the Spectrum screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SpectrumScreen {
    pub bank: usize,
    /// Selected by bit 3 of port 0x7FFD.
    #[serde(default)]
    pub shadow_bank: Option<usize>,
}

/// Scanlines recorded by the hi-res ZX81 ULA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HiresArea {
    pub first_y: u32,
    pub last_y: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZSimConfig {
    pub memory_model: MemoryModel,
    pub roms: Vec<RomImage>,
    pub generic_ports: PortCombine,
    /// 50 Hz maskable interrupt. Defaults to on for Spectrum video.
    pub periodic_interrupt: Option<bool>,
    pub cpu_frequency: Option<u32>,
    pub video: Option<VideoVariant>,
    pub hires_area: Option<HiresArea>,
    /// Defaults to the model's screen banks, or for custom layouts the RAM
    /// bank mapped at 0x4000 at power-on.
    pub spectrum_screen: Option<SpectrumScreen>,
    /// Overrides the model's own paging rules.
    pub bank_switch_rules: Option<Vec<BankSwitchRule>>,
    /// Interrupt on the falling edge of R bit 6. Defaults to on for ZX81
    /// video.
    pub refresh_interrupt: Option<bool>,
    /// Interrupts the CPU load estimate is averaged over.
    pub load_range: u32,
    pub history_size: usize,
    pub history_spot_count: usize,
    pub code_coverage: bool,
    pub break_on_interrupt: bool,
    /// Directory relative ROM paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for ZSimConfig {
    fn default() -> Self {
        Self {
            memory_model: MemoryModel::default(),
            roms: Vec::new(),
            generic_ports: PortCombine::default(),
            periodic_interrupt: None,
            cpu_frequency: None,
            video: None,
            hires_area: None,
            spectrum_screen: None,
            bank_switch_rules: None,
            refresh_interrupt: None,
            load_range: 1,
            history_size: 10_000,
            history_spot_count: 10,
            code_coverage: true,
            break_on_interrupt: false,
            base_dir: None,
        }
    }
}

impl ZSimConfig {
    /// Read a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// A default configuration for a predefined model.
    #[must_use]
    pub fn for_model(model: PredefinedModel) -> Self {
        Self {
            memory_model: MemoryModel::Predefined(model),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn video_variant(&self) -> VideoVariant {
        self.video.unwrap_or(match self.memory_model.predefined() {
            Some(m) if m.is_zx81() => VideoVariant::Zx81,
            Some(m) if m.is_spectrum() => VideoVariant::Spectrum,
            _ => VideoVariant::None,
        })
    }

    fn zx81_video(&self) -> bool {
        matches!(self.video_variant(), VideoVariant::Zx81 | VideoVariant::Zx81Hires)
    }

    #[must_use]
    pub fn cpu_frequency(&self) -> u32 {
        self.cpu_frequency
            .unwrap_or(if self.zx81_video() { 3_250_000 } else { 3_500_000 })
    }

    #[must_use]
    pub fn periodic_interrupt(&self) -> bool {
        self.periodic_interrupt.unwrap_or(!self.zx81_video())
    }

    #[must_use]
    pub fn refresh_interrupt(&self) -> bool {
        self.refresh_interrupt.unwrap_or(self.zx81_video())
    }

    /// Explicit rules, or the predefined model's.
    #[must_use]
    pub fn bank_switch_rules(&self) -> Vec<BankSwitchRule> {
        match (&self.bank_switch_rules, self.memory_model.predefined()) {
            (Some(rules), _) => rules.clone(),
            (None, Some(model)) => model.bank_switch_rules(),
            (None, None) => Vec::new(),
        }
    }
}
