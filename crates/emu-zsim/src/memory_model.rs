//! Memory models: how the 64K address space is cut into slots and which
//! banks each slot may hold.
//!
//! Predefined models are written as custom slot lists and go through the
//! same validation as user-supplied ones.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::bankswitch::{BankSwitchRule, PortMatch};
use crate::config::ConfigError;
use crate::memory::BankKind;

/// A bank index or an inclusive range of bank indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BankIndex {
    Single(usize),
    Range([usize; 2]),
}

impl BankIndex {
    fn indices(self) -> std::ops::RangeInclusive<usize> {
        match self {
            BankIndex::Single(i) => i..=i,
            BankIndex::Range([first, last]) => first..=last,
        }
    }
}

/// Banks a slot may hold.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomBank {
    pub index: BankIndex,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    /// The bank is read-only to the CPU.
    #[serde(default)]
    pub rom: bool,
}

/// One slot of a custom memory model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSlot {
    /// Inclusive address range.
    pub range: [u16; 2],
    pub banks: Vec<CustomBank>,
    #[serde(default)]
    pub name: Option<String>,
    /// Bank mapped at power-on. Defaults to the first bank listed.
    #[serde(default)]
    pub initial_bank: Option<usize>,
}

/// The machine memory layouts that need no slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PredefinedModel {
    #[serde(rename = "ZX16K")]
    Zx16k,
    #[serde(rename = "ZX48K")]
    Zx48k,
    #[serde(rename = "ZX128K")]
    Zx128k,
    #[serde(rename = "ZX81-1K")]
    Zx81_1k,
    #[serde(rename = "ZX81-16K")]
    Zx81_16k,
    #[serde(rename = "ZX81-56K")]
    Zx81_56k,
    #[serde(rename = "RAM")]
    AllRam,
}

impl PredefinedModel {
    pub const ALL: [PredefinedModel; 7] = [
        PredefinedModel::Zx16k,
        PredefinedModel::Zx48k,
        PredefinedModel::Zx128k,
        PredefinedModel::Zx81_1k,
        PredefinedModel::Zx81_16k,
        PredefinedModel::Zx81_56k,
        PredefinedModel::AllRam,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PredefinedModel::Zx16k => "ZX16K",
            PredefinedModel::Zx48k => "ZX48K",
            PredefinedModel::Zx128k => "ZX128K",
            PredefinedModel::Zx81_1k => "ZX81-1K",
            PredefinedModel::Zx81_16k => "ZX81-16K",
            PredefinedModel::Zx81_56k => "ZX81-56K",
            PredefinedModel::AllRam => "RAM",
        }
    }

    #[must_use]
    pub const fn is_zx81(self) -> bool {
        matches!(
            self,
            PredefinedModel::Zx81_1k | PredefinedModel::Zx81_16k | PredefinedModel::Zx81_56k
        )
    }

    #[must_use]
    pub const fn is_spectrum(self) -> bool {
        matches!(
            self,
            PredefinedModel::Zx16k | PredefinedModel::Zx48k | PredefinedModel::Zx128k
        )
    }

    /// Normal and shadow Spectrum screen banks.
    #[must_use]
    pub const fn screen_banks(self) -> Option<(usize, Option<usize>)> {
        match self {
            PredefinedModel::Zx16k | PredefinedModel::Zx48k => Some((1, None)),
            PredefinedModel::Zx128k => Some((5, Some(7))),
            _ => None,
        }
    }

    /// The slot list describing this model.
    #[must_use]
    pub fn slots(self) -> Vec<CustomSlot> {
        match self {
            PredefinedModel::Zx16k => vec![rom_slot(0x0000, 0x3FFF), ram_slot(0x4000, 0x7FFF, 1)],
            PredefinedModel::Zx48k => vec![rom_slot(0x0000, 0x3FFF), ram_slot(0x4000, 0xFFFF, 1)],
            PredefinedModel::Zx128k => zx128k_slots(),
            PredefinedModel::Zx81_1k => vec![rom_slot(0x0000, 0x1FFF), ram_slot(0x4000, 0x43FF, 1)],
            PredefinedModel::Zx81_16k => {
                vec![rom_slot(0x0000, 0x1FFF), ram_slot(0x4000, 0x7FFF, 1)]
            }
            PredefinedModel::Zx81_56k => {
                vec![rom_slot(0x0000, 0x1FFF), ram_slot(0x2000, 0xFFFF, 1)]
            }
            PredefinedModel::AllRam => vec![ram_slot(0x0000, 0xFFFF, 0)],
        }
    }

    /// Port-driven paging for this model.
    #[must_use]
    pub fn bank_switch_rules(self) -> Vec<BankSwitchRule> {
        if self != PredefinedModel::Zx128k {
            return Vec::new();
        }
        let port = PortMatch {
            mask: 0x8002,
            value: 0x0000,
        };
        vec![
            BankSwitchRule::ArithmeticOffset {
                port,
                slot: 3,
                value_mask: 0x07,
                shift: 0,
                offset: 0,
            },
            BankSwitchRule::ArithmeticOffset {
                port,
                slot: 0,
                value_mask: 0x01,
                shift: 4,
                offset: 8,
            },
            BankSwitchRule::Lock {
                port,
                value_mask: 0x20,
            },
        ]
    }
}

impl fmt::Display for PredefinedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PredefinedModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PredefinedModel::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownModel(s.to_string()))
    }
}

fn rom_slot(start: u16, end: u16) -> CustomSlot {
    CustomSlot {
        range: [start, end],
        banks: vec![CustomBank {
            index: BankIndex::Single(0),
            name: Some("ROM".to_string()),
            short_name: Some("R".to_string()),
            rom: true,
        }],
        name: None,
        initial_bank: None,
    }
}

fn ram_slot(start: u16, end: u16, bank: usize) -> CustomSlot {
    CustomSlot {
        range: [start, end],
        banks: vec![CustomBank {
            index: BankIndex::Single(bank),
            name: Some("RAM".to_string()),
            short_name: None,
            rom: false,
        }],
        name: None,
        initial_bank: None,
    }
}

fn zx128k_slots() -> Vec<CustomSlot> {
    let rom = |index: usize| CustomBank {
        index: BankIndex::Single(index),
        name: Some(format!("ROM{}", index - 8)),
        short_name: Some(format!("R{}", index - 8)),
        rom: true,
    };
    let ram = |index: BankIndex| CustomBank {
        index,
        name: None,
        short_name: None,
        rom: false,
    };
    vec![
        CustomSlot {
            range: [0x0000, 0x3FFF],
            banks: vec![rom(8), rom(9)],
            name: Some("slotROM".to_string()),
            initial_bank: Some(8),
        },
        CustomSlot {
            range: [0x4000, 0x7FFF],
            banks: vec![ram(BankIndex::Single(5))],
            name: None,
            initial_bank: None,
        },
        CustomSlot {
            range: [0x8000, 0xBFFF],
            banks: vec![ram(BankIndex::Single(2))],
            name: None,
            initial_bank: None,
        },
        CustomSlot {
            range: [0xC000, 0xFFFF],
            banks: vec![ram(BankIndex::Range([0, 9]))],
            name: Some("slotC000".to_string()),
            initial_bank: Some(0),
        },
    ]
}

/// A bank as allocated by [`crate::Memory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSpec {
    pub kind: BankKind,
    pub size: usize,
    pub name: String,
    pub short_name: String,
}

/// A slot as used by [`crate::Memory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub start: u16,
    pub end: u16,
    /// Sorted list of banks the slot may hold.
    pub allowed: Vec<usize>,
    pub initial_bank: usize,
    pub name: Option<String>,
}

impl SlotSpec {
    #[must_use]
    pub fn size(&self) -> usize {
        usize::from(self.end) - usize::from(self.start) + 1
    }
}

/// A validated memory layout: slots cover the whole 64K without overlap,
/// every bank has one size, and every slot's banks fit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    banks: Vec<BankSpec>,
    slots: Vec<SlotSpec>,
}

impl MemoryLayout {
    pub fn predefined(model: PredefinedModel) -> Result<Self, ConfigError> {
        Self::from_custom(&model.slots())
    }

    /// Build a layout from a slot list. Gaps between the listed ranges
    /// become slots holding their own UNMAPPED bank.
    pub fn from_custom(custom: &[CustomSlot]) -> Result<Self, ConfigError> {
        if custom.is_empty() {
            return Err(ConfigError::SlotRanges("no slots defined".to_string()));
        }
        let mut sorted: Vec<&CustomSlot> = custom.iter().collect();
        sorted.sort_by_key(|s| s.range[0]);

        // Pass 1: bank properties from every mention.
        let mut banks: Vec<Option<BankSpec>> = Vec::new();
        for slot in &sorted {
            let [start, end] = slot.range;
            if start > end {
                return Err(ConfigError::SlotRanges(format!(
                    "range ${start:04X}-${end:04X} is reversed"
                )));
            }
            if slot.banks.is_empty() {
                return Err(ConfigError::SlotRanges(format!(
                    "slot ${start:04X}-${end:04X} has no banks"
                )));
            }
            let size = usize::from(end) - usize::from(start) + 1;
            for bank in &slot.banks {
                if bank.index.indices().is_empty() {
                    return Err(ConfigError::SlotRanges(format!(
                        "empty bank range in slot ${start:04X}-${end:04X}"
                    )));
                }
                for index in bank.index.indices() {
                    if index >= 0x100 {
                        return Err(ConfigError::SlotRanges(format!("bank {index} is out of range")));
                    }
                    if banks.len() <= index {
                        banks.resize(index + 1, None);
                    }
                    merge_bank(&mut banks[index], index, size, bank)?;
                }
            }
        }
        let mut banks: Vec<BankSpec> = banks
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                b.ok_or_else(|| ConfigError::SlotRanges(format!("bank {i} is not used by any slot")))
            })
            .collect::<Result<_, _>>()?;

        // Pass 2: slots, with gaps filled.
        let mut slots = Vec::new();
        let mut next: u32 = 0;
        for slot in &sorted {
            let [start, end] = slot.range;
            if u32::from(start) < next {
                return Err(ConfigError::SlotRanges(format!(
                    "range ${start:04X}-${end:04X} overlaps the previous slot"
                )));
            }
            if u32::from(start) > next {
                slots.push(unmapped_slot(&mut banks, next as u16, start - 1));
            }
            let mut allowed: Vec<usize> = slot
                .banks
                .iter()
                .flat_map(|b| b.index.indices())
                .collect();
            let initial_bank = slot.initial_bank.unwrap_or(allowed[0]);
            allowed.sort_unstable();
            allowed.dedup();
            if allowed.binary_search(&initial_bank).is_err() {
                return Err(ConfigError::SlotRanges(format!(
                    "initial bank {initial_bank} is not allowed in slot ${start:04X}-${end:04X}"
                )));
            }
            slots.push(SlotSpec {
                start,
                end,
                allowed,
                initial_bank,
                name: slot.name.clone(),
            });
            next = u32::from(end) + 1;
        }
        if next <= 0xFFFF {
            slots.push(unmapped_slot(&mut banks, next as u16, 0xFFFF));
        }
        if slots.len() > 0x100 {
            return Err(ConfigError::SlotRanges("more than 256 slots".to_string()));
        }
        Ok(Self { banks, slots })
    }

    #[must_use]
    pub fn banks(&self) -> &[BankSpec] {
        &self.banks
    }

    #[must_use]
    pub fn slots(&self) -> &[SlotSpec] {
        &self.slots
    }
}

fn merge_bank(
    existing: &mut Option<BankSpec>,
    index: usize,
    size: usize,
    bank: &CustomBank,
) -> Result<(), ConfigError> {
    let kind = if bank.rom { BankKind::Rom } else { BankKind::Ram };
    match existing {
        None => {
            let name = bank.name.clone().unwrap_or_else(|| format!("BANK{index}"));
            let short_name = bank.short_name.clone().unwrap_or_else(|| index.to_string());
            *existing = Some(BankSpec {
                kind,
                size,
                name,
                short_name,
            });
        }
        Some(spec) => {
            if spec.size != size {
                return Err(ConfigError::SlotRanges(format!(
                    "bank {index} is used in slots of different sizes ({} and {size})",
                    spec.size
                )));
            }
            if bank.rom {
                spec.kind = BankKind::Rom;
            }
            if let Some(name) = &bank.name {
                spec.name.clone_from(name);
            }
            if let Some(short) = &bank.short_name {
                spec.short_name.clone_from(short);
            }
        }
    }
    Ok(())
}

fn unmapped_slot(banks: &mut Vec<BankSpec>, start: u16, end: u16) -> SlotSpec {
    let index = banks.len();
    let slot = SlotSpec {
        start,
        end,
        allowed: vec![index],
        initial_bank: index,
        name: None,
    };
    banks.push(BankSpec {
        kind: BankKind::Unmapped,
        size: slot.size(),
        name: "UNMAPPED".to_string(),
        short_name: "U".to_string(),
    });
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zx48k_layout() {
        let layout = MemoryLayout::predefined(PredefinedModel::Zx48k).unwrap();
        assert_eq!(layout.slots().len(), 2);
        assert_eq!(layout.banks()[0].kind, BankKind::Rom);
        assert_eq!(layout.banks()[1].size, 0xC000);
    }

    #[test]
    fn zx81_1k_gaps_are_unmapped() {
        let layout = MemoryLayout::predefined(PredefinedModel::Zx81_1k).unwrap();
        let starts: Vec<u16> = layout.slots().iter().map(|s| s.start).collect();
        assert_eq!(starts, [0x0000, 0x2000, 0x4000, 0x4400]);
        assert_eq!(layout.banks().len(), 4);
        assert_eq!(layout.banks()[2].kind, BankKind::Unmapped);
        assert_eq!(layout.banks()[3].size, 0xBC00);
    }

    #[test]
    fn zx128k_shares_banks_between_slots() {
        let layout = MemoryLayout::predefined(PredefinedModel::Zx128k).unwrap();
        assert_eq!(layout.banks().len(), 10);
        assert_eq!(layout.banks()[8].name, "ROM0");
        assert_eq!(layout.banks()[9].kind, BankKind::Rom);
        assert_eq!(layout.slots()[3].allowed, (0..=9).collect::<Vec<_>>());
        assert_eq!(layout.slots()[0].initial_bank, 8);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut slots = PredefinedModel::Zx48k.slots();
        slots[1].range = [0x3000, 0xFFFF];
        assert!(matches!(
            MemoryLayout::from_custom(&slots),
            Err(ConfigError::SlotRanges(_))
        ));
    }

    #[test]
    fn bank_sizes_must_agree() {
        let mut slots = PredefinedModel::Zx48k.slots();
        slots[1].banks[0].index = BankIndex::Single(0);
        assert!(MemoryLayout::from_custom(&slots).is_err());
    }

    #[test]
    fn custom_model_from_json() {
        let json = r#"[
            {"range": [0, 16383], "banks": [{"index": 0, "rom": true}]},
            {"range": [32768, 65535], "banks": [{"index": [1, 2]}], "initialBank": 2}
        ]"#;
        let slots: Vec<CustomSlot> = serde_json::from_str(json).unwrap();
        let layout = MemoryLayout::from_custom(&slots).unwrap();
        assert_eq!(layout.slots().len(), 3);
        assert_eq!(layout.slots()[2].initial_bank, 2);
        assert_eq!(layout.banks()[1].name, "BANK1");
    }

    #[test]
    fn model_names_parse_case_insensitively() {
        assert_eq!("zx81-16k".parse::<PredefinedModel>().unwrap(), PredefinedModel::Zx81_16k);
        assert!("ZX99".parse::<PredefinedModel>().is_err());
    }
}
