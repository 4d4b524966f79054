//! Top-level ZSim machine.
//!
//! One [`ZSim::step`] executes one CPU instruction, lets the video hardware
//! see the elapsed T-states and delivers any NMI it raises. Everything the
//! debugger needs (registers, memory, ports, frames, T-state counters,
//! save-state) is reached from here.

use std::sync::mpsc::{self, Receiver, Sender};

use emu_core::{Bus, Cpu, Observable, Serializable, StateError, StateReader, StateSink, Value};
use sinclair_ula::{CpuSignals, Frame};
use tracing::{info, warn};
use zilog_z80::{InterruptConfig, Reg, Registers, Z80};

use crate::bankswitch::{BankSwitchError, BankSwitcher};
use crate::bus::ZSimBus;
use crate::config::{ConfigError, ZSimConfig};
use crate::event::Notification;
use crate::expr::ExprContext;
use crate::memory::{Memory, MemoryError};
use crate::ports::Ports;
use crate::video::Video;

/// Components decoded from a saved state, committed together.
type Decoded = (Memory, BankSwitcher, Z80, Video);

pub struct ZSim {
    cpu: Z80,
    bus: ZSimBus,
    /// T-states since power-on.
    tstates: u64,
    /// `tstates` at the last counter reset.
    tstates_mark: u64,
    /// NMI acceptance time not yet seen by the video hardware.
    nmi_tstates: u32,
    subscribers: Vec<Sender<Notification>>,
}

impl ZSim {
    /// Build a machine and load its ROM images.
    pub fn new(config: &ZSimConfig) -> Result<Self, ConfigError> {
        let layout = config.memory_model.layout()?;
        let mut memory = Memory::new(&layout);

        for rom in &config.roms {
            let data = rom.bytes(config.base_dir.as_deref())?;
            let written = memory.load_bank(rom.bank, rom.offset, &data).map_err(|_| {
                ConfigError::RomSize {
                    bank: rom.bank,
                    offset: rom.offset,
                    size: data.len(),
                }
            })?;
            if written < data.len() {
                return Err(ConfigError::RomSize {
                    bank: rom.bank,
                    offset: rom.offset,
                    size: data.len(),
                });
            }
        }
        for bank in 0..memory.bank_count() {
            if memory.bank_kind(bank) == Some(crate::memory::BankKind::Rom)
                && !config.roms.iter().any(|r| r.bank == bank)
            {
                warn!(bank, "no image for ROM bank, left zero-filled");
            }
        }

        let bank_switcher = BankSwitcher::new(config.bank_switch_rules(), &memory)?;
        let video = Video::for_config(config, &memory);
        let cpu = Z80::new(InterruptConfig {
            cpu_frequency: config.cpu_frequency(),
            periodic: config.periodic_interrupt(),
            refresh_edge: config.refresh_interrupt(),
            load_range: config.load_range.max(1),
        });
        info!(
            slots = memory.slot_count(),
            banks = memory.bank_count(),
            video = ?config.video_variant(),
            cpu_frequency = config.cpu_frequency(),
            "machine created"
        );

        Ok(Self {
            cpu,
            bus: ZSimBus::new(memory, Ports::new(config.generic_ports), bank_switcher, video),
            tstates: 0,
            tstates_mark: 0,
            nmi_tstates: 0,
            subscribers: Vec::new(),
        })
    }

    /// Execute one instruction. Returns the T-states it took, including
    /// interrupts and ULA wait states.
    pub fn step(&mut self) -> u32 {
        let mut t = self.cpu.step(&mut self.bus);
        let response = self.bus.video.execute(CpuSignals {
            tstates: t + std::mem::take(&mut self.nmi_tstates),
            halted: self.cpu.is_halted(),
        });
        t += response.wait_tstates;
        if response.nmi {
            let nmi = self.cpu.generate_interrupt(&mut self.bus, true, 0);
            self.nmi_tstates = nmi;
            t += nmi;
        }
        self.tstates += u64::from(t);

        let frame_ready = if self.bus.video.is_zx81() {
            self.bus.video.take_frame_ready()
        } else {
            self.cpu.frame_tick()
        };
        if frame_ready {
            self.notify(&Notification::FrameReady);
        }
        t
    }

    /// Power-on reset: CPU, slot mapping and paging lock.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.memory.reset_slots();
        self.bus.bank_switcher.reset();
        self.bus.take_error();
        self.nmi_tstates = 0;
        self.reset_tstates();
    }

    // === Subscribers ===

    /// A new receiver for this machine's notifications.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Send to every live subscriber and forget the dropped ones.
    pub fn notify(&mut self, notification: &Notification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    // === Access ===

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &ZSimBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut ZSimBus {
        &mut self.bus
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.bus.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.bus.memory
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        &mut self.bus.ports
    }

    #[must_use]
    pub fn registers(&self) -> Registers {
        self.cpu.registers()
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    pub fn set_register(&mut self, reg: Reg, value: u16) {
        self.cpu.set_register(reg, value);
    }

    /// Bus port read, as an `IN` would do it.
    pub fn port_in(&mut self, port: u16) -> u8 {
        self.bus.io_read(port)
    }

    /// Bus port write, as an `OUT` would do it.
    pub fn port_out(&mut self, port: u16, value: u8) -> Result<(), BankSwitchError> {
        self.bus.io_write(port, value);
        self.bus.take_error().map_or(Ok(()), Err)
    }

    pub fn set_slot(&mut self, slot: usize, bank: usize) -> Result<(), MemoryError> {
        self.bus.memory.set_slot(slot, bank)
    }

    /// The pending CPU error, if an instruction caused one.
    pub fn take_error(&mut self) -> Option<BankSwitchError> {
        self.bus.take_error()
    }

    #[must_use]
    pub fn frame(&self) -> Frame {
        self.bus.video.frame(&self.bus.memory)
    }

    // === Timing ===

    /// T-states since the counter was last reset.
    #[must_use]
    pub fn tstates(&self) -> u64 {
        self.tstates - self.tstates_mark
    }

    #[must_use]
    pub fn total_tstates(&self) -> u64 {
        self.tstates
    }

    pub fn reset_tstates(&mut self) {
        self.tstates_mark = self.tstates;
    }

    #[must_use]
    pub fn cpu_load(&self) -> f64 {
        self.cpu.cpu_load()
    }

    // === Save state ===

    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        let data = emu_core::state::save(self);
        info!(bytes = data.len(), "state saved");
        data
    }

    /// Restore a saved state. On error the machine is unchanged.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        let mut reader = StateReader::new(data);
        let decoded = self.decode(&mut reader)?;
        reader.finish()?;
        self.commit(decoded);
        info!(bytes = data.len(), "state restored");
        Ok(())
    }

    /// Decode a state into copies of the components.
    fn decode(&self, reader: &mut StateReader<'_>) -> Result<Decoded, StateError> {
        let border = reader.get_u8()?;
        let mut memory = self.bus.memory.clone();
        memory.deserialize(reader)?;
        let mut bank_switcher = self.bus.bank_switcher.clone();
        bank_switcher.deserialize(reader)?;
        let mut cpu = self.cpu.clone();
        cpu.deserialize(reader)?;
        let mut video = self.bus.video.clone();
        video.deserialize(reader)?;
        video.set_border(border);
        Ok((memory, bank_switcher, cpu, video))
    }

    fn commit(&mut self, (memory, bank_switcher, cpu, video): Decoded) {
        self.bus.memory = memory;
        self.bus.bank_switcher = bank_switcher;
        self.cpu = cpu;
        self.bus.video = video;
        self.bus.take_error();
        self.nmi_tstates = 0;
    }
}

impl Serializable for ZSim {
    /// Border colour, memory, paging lock, CPU, then video.
    fn serialize(&self, sink: &mut dyn StateSink) {
        sink.put_u8(self.bus.video.border());
        self.bus.memory.serialize(sink);
        self.bus.bank_switcher.serialize(sink);
        self.cpu.serialize(sink);
        self.bus.video.serialize(sink);
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let decoded = self.decode(reader)?;
        self.commit(decoded);
        Ok(())
    }
}

/// Registers and side-effect-free memory for breakpoint expressions.
pub struct MachineView<'a> {
    pub registers: &'a Registers,
    pub memory: &'a Memory,
}

impl ExprContext for MachineView<'_> {
    fn register(&self, reg: Reg) -> u16 {
        self.registers.get(reg)
    }

    fn read_byte(&self, address: u16) -> u8 {
        self.memory.peek(address)
    }
}

const QUERY_PATHS: &[&str] = &[
    "tstates",
    "total_tstates",
    "slots",
    "border",
    "ula.fast",
    "ula.line",
    "ula.glyph_line",
];

impl Observable for ZSim {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return self.cpu.query(rest);
        }
        match path {
            "tstates" => Some(self.tstates().into()),
            "total_tstates" => Some(self.tstates.into()),
            "slots" => Some(Value::Bytes(
                self.bus.memory.slots().iter().map(|&b| b as u8).collect(),
            )),
            "border" => Some(self.bus.video.border().into()),
            "ula.fast" => self.bus.video.fast_mode().map(Value::from),
            "ula.line" => self.bus.video.line_counters().map(|(line, _)| line.into()),
            "ula.glyph_line" => self.bus.video.line_counters().map(|(_, glyph)| glyph.into()),
            _ => self.cpu.query(path),
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}
