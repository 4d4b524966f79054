//! Z80 CPU state, stepping, interrupts and load accounting.

mod execute;
mod execute_cb;
mod execute_ed;

use emu_core::{Bus, Cpu, Observable, Serializable, StateError, StateReader, StateSink, Value};
use tracing::trace;

use crate::registers::{Reg, Registers};

/// Length of the periodic (vertical sync) interrupt period in seconds.
const INTERRUPT_PERIOD_SECS: f64 = 0.02;

/// T-states for accepting each kind of interrupt.
const NMI_TSTATES: u32 = 11;
const IM0_TSTATES: u32 = 13;
const IM1_TSTATES: u32 = 13;
const IM2_TSTATES: u32 = 19;

/// Interrupt sources wired to the CPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterruptConfig {
    /// Clock frequency in Hz. Sets the length of the periodic interrupt.
    pub cpu_frequency: u32,
    /// Raise a maskable interrupt every 20 ms.
    pub periodic: bool,
    /// Raise a maskable interrupt after a falling edge of R bit 6 (ZX81).
    pub refresh_edge: bool,
    /// Number of interrupts the load estimate is averaged over.
    pub load_range: u32,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            cpu_frequency: 3_500_000,
            periodic: true,
            refresh_edge: false,
            load_range: 1,
        }
    }
}

/// Which register stands in for HL in the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Hl,
    Ix,
    Iy,
}

/// The Z80 CPU.
#[derive(Debug, Clone)]
pub struct Z80 {
    pub(crate) regs: Registers,

    /// Set by EI; maskable interrupts are refused until the next
    /// instruction has started.
    ei_pending: bool,
    /// A refresh-edge interrupt is waiting for the end of the next
    /// instruction.
    refresh_int_pending: bool,
    /// R after the previous instruction, for the refresh-edge detector.
    prev_r: u8,

    config: InterruptConfig,
    interrupt_period: u32,
    remaining_interrupt_tstates: i64,
    /// The periodic countdown expired during the last step.
    frame_tick: bool,
    /// An interrupt was accepted since the flag was last taken.
    interrupt_occurred: bool,

    load_tstates_active: u64,
    load_tstates_total: u64,
    load_counter: u32,
    cpu_load: f64,

    // Decode scratch for the instruction being executed.
    pub(crate) index: Index,
    pub(crate) t: u32,
}

impl Z80 {
    #[must_use]
    pub fn new(config: InterruptConfig) -> Self {
        let interrupt_period = Self::period_for(config.cpu_frequency);
        let mut cpu = Self {
            regs: Registers::default(),
            ei_pending: false,
            refresh_int_pending: false,
            prev_r: 0,
            config,
            interrupt_period,
            remaining_interrupt_tstates: i64::from(interrupt_period),
            frame_tick: false,
            interrupt_occurred: false,
            load_tstates_active: 0,
            load_tstates_total: 0,
            load_counter: 0,
            cpu_load: 1.0,
            index: Index::Hl,
            t: 0,
        };
        cpu.reset();
        cpu
    }

    fn period_for(cpu_frequency: u32) -> u32 {
        (f64::from(cpu_frequency) * INTERRUPT_PERIOD_SECS) as u32
    }

    #[must_use]
    pub fn config(&self) -> &InterruptConfig {
        &self.config
    }

    /// Direct register access for the debugger.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Write one register by name.
    pub fn set_register(&mut self, reg: Reg, value: u16) {
        self.regs.set(reg, value);
        if reg == Reg::R {
            self.prev_r = self.regs.r;
        }
    }

    /// T-states between periodic interrupts.
    #[must_use]
    pub fn interrupt_period(&self) -> u32 {
        self.interrupt_period
    }

    /// T-states left until the next periodic interrupt.
    #[must_use]
    pub fn remaining_interrupt_tstates(&self) -> i64 {
        self.remaining_interrupt_tstates
    }

    /// Fraction of T-states spent outside HALT, averaged over the configured
    /// number of interrupts. 1.0 until the first sample is complete.
    #[must_use]
    pub fn cpu_load(&self) -> f64 {
        self.cpu_load
    }

    /// True if the periodic countdown expired during the last step.
    #[must_use]
    pub fn frame_tick(&self) -> bool {
        self.frame_tick
    }

    /// Return and clear the "interrupt accepted" flag.
    pub fn take_interrupt_occurred(&mut self) -> bool {
        std::mem::take(&mut self.interrupt_occurred)
    }

    #[must_use]
    pub fn ei_pending(&self) -> bool {
        self.ei_pending
    }

    fn reset_load(&mut self) {
        self.load_tstates_active = 0;
        self.load_tstates_total = 0;
        self.load_counter = 0;
        self.cpu_load = 1.0;
    }

    /// Accept an interrupt. Maskable requests are dropped when IFF1 is clear
    /// or EI has just executed; the return value is then zero.
    pub fn generate_interrupt<B: Bus>(&mut self, bus: &mut B, non_maskable: bool, data: u8) -> u32 {
        let t = if non_maskable {
            self.regs.iff2 = self.regs.iff1;
            self.regs.iff1 = false;
            self.push(bus, self.regs.pc);
            self.regs.pc = 0x0066;
            NMI_TSTATES
        } else {
            if !self.regs.iff1 || self.ei_pending {
                return 0;
            }
            self.regs.iff1 = false;
            self.regs.iff2 = false;
            match self.regs.im {
                0 => {
                    // Only RST opcodes are meaningful on the data bus.
                    if data & 0xC7 == 0xC7 {
                        self.push(bus, self.regs.pc);
                        self.regs.pc = u16::from(data & 0x38);
                    }
                    IM0_TSTATES
                }
                1 => {
                    self.push(bus, self.regs.pc);
                    self.regs.pc = 0x0038;
                    IM1_TSTATES
                }
                _ => {
                    self.push(bus, self.regs.pc);
                    let vector = u16::from(self.regs.i) << 8 | u16::from(data);
                    let lo = bus.read(vector);
                    let hi = bus.read(vector.wrapping_add(1));
                    self.regs.pc = u16::from_le_bytes([lo, hi]);
                    IM2_TSTATES
                }
            }
        };
        self.regs.halted = false;
        self.regs.inc_r(1);
        self.regs.wz = self.regs.pc;
        self.interrupt_occurred = true;
        trace!(non_maskable, pc = self.regs.pc, "interrupt accepted");

        self.load_counter += 1;
        if self.load_counter >= self.config.load_range && self.load_tstates_total > 0 {
            self.cpu_load = self.load_tstates_active as f64 / self.load_tstates_total as f64;
            self.load_tstates_active = 0;
            self.load_tstates_total = 0;
            self.load_counter = 0;
        }
        t
    }

    /// Execute one instruction, or one idle M1 cycle while halted.
    fn execute_instruction<B: Bus>(&mut self, bus: &mut B) -> u32 {
        self.t = 0;
        if self.regs.halted {
            self.regs.inc_r(1);
            return 4;
        }
        self.ei_pending = false;
        self.index = Index::Hl;
        let op = self.fetch_opcode(bus);
        self.execute_unprefixed(bus, op);
        self.t
    }

    // =========================================================================
    // Bus helpers. Each adds the T-states of its machine cycle.
    // =========================================================================

    pub(crate) fn fetch_opcode<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let refresh = u16::from(self.regs.i) << 8 | u16::from(self.regs.r);
        let op = bus.fetch(self.regs.pc, refresh);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.regs.inc_r(1);
        self.t += 4;
        op
    }

    pub(crate) fn read8<B: Bus>(&mut self, bus: &mut B, address: u16) -> u8 {
        self.t += 3;
        bus.read(address)
    }

    pub(crate) fn write8<B: Bus>(&mut self, bus: &mut B, address: u16, value: u8) {
        self.t += 3;
        bus.write(address, value);
    }

    pub(crate) fn read16<B: Bus>(&mut self, bus: &mut B, address: u16) -> u16 {
        let lo = self.read8(bus, address);
        let hi = self.read8(bus, address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn write16<B: Bus>(&mut self, bus: &mut B, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write8(bus, address, lo);
        self.write8(bus, address.wrapping_add(1), hi);
    }

    pub(crate) fn imm8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let v = self.read8(bus, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        v
    }

    pub(crate) fn imm16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let v = self.read16(bus, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(2);
        v
    }

    pub(crate) fn port_in<B: Bus>(&mut self, bus: &mut B, port: u16) -> u8 {
        self.t += 4;
        bus.io_read(port)
    }

    pub(crate) fn port_out<B: Bus>(&mut self, bus: &mut B, port: u16, value: u8) {
        self.t += 4;
        bus.io_write(port, value);
    }

    pub(crate) fn internal(&mut self, tstates: u32) {
        self.t += tstates;
    }

    pub(crate) fn push<B: Bus>(&mut self, bus: &mut B, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, lo);
    }

    pub(crate) fn pop<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let v = self.read16(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        v
    }
}

impl Cpu for Z80 {
    type Registers = Registers;

    fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        self.frame_tick = false;
        let mut t = self.execute_instruction(bus);
        let halted = self.regs.halted;

        // A refresh-edge interrupt is taken at the end of the instruction
        // following the edge.
        if self.refresh_int_pending {
            self.refresh_int_pending = false;
            t += self.generate_interrupt(bus, false, 0);
        }
        if self.config.refresh_edge {
            let r = self.regs.r;
            if self.prev_r & 0x40 != 0 && r & 0x40 == 0 {
                self.refresh_int_pending = true;
            }
            self.prev_r = r;
        }

        // Skip straight to the next periodic interrupt while halted.
        if halted
            && self.regs.halted
            && self.regs.iff1
            && self.config.periodic
            && !self.config.refresh_edge
        {
            let skip = self.remaining_interrupt_tstates - i64::from(t);
            if skip > 0 {
                let cycles = (skip as u64).div_ceil(4);
                self.regs.inc_r((cycles % 128) as u8);
                t += (cycles * 4) as u32;
            }
        }

        self.load_tstates_total += u64::from(t);
        if !halted {
            self.load_tstates_active += u64::from(t);
        }

        self.remaining_interrupt_tstates -= i64::from(t);
        if self.remaining_interrupt_tstates <= 0 {
            self.remaining_interrupt_tstates += i64::from(self.interrupt_period);
            self.frame_tick = true;
            if self.config.periodic {
                t += self.generate_interrupt(bus, false, 0);
            }
        }
        t
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }

    fn interrupt<B: Bus>(&mut self, bus: &mut B, non_maskable: bool, data: u8) -> u32 {
        self.generate_interrupt(bus, non_maskable, data)
    }

    fn reset(&mut self) {
        self.regs = Registers {
            af_alt: 0xFFFF,
            sp: 0xFFFF,
            ..Registers::default()
        };
        self.regs.set_af(0xFFFF);
        self.ei_pending = false;
        self.refresh_int_pending = false;
        self.prev_r = 0;
        self.remaining_interrupt_tstates = i64::from(self.interrupt_period);
        self.frame_tick = false;
        self.interrupt_occurred = false;
        self.reset_load();
    }
}

impl Serializable for Z80 {
    fn serialize(&self, sink: &mut dyn StateSink) {
        let r = &self.regs;
        for word in [
            r.pc,
            r.sp,
            r.af(),
            r.bc(),
            r.de(),
            r.hl(),
            r.ix,
            r.iy,
            r.af_alt,
            r.bc_alt,
            r.de_alt,
            r.hl_alt,
        ] {
            sink.put_u16(word);
        }
        sink.put_u8(r.i);
        sink.put_u8(r.r);
        sink.put_u8(r.im);
        sink.put_bool(r.iff1);
        sink.put_bool(r.iff2);
        sink.put_bool(r.halted);
        sink.put_bool(self.ei_pending);
        sink.put_bool(self.refresh_int_pending);
        sink.put_u8(self.prev_r);
        sink.put_u32(self.remaining_interrupt_tstates.max(0) as u32);
    }

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let mut regs = self.regs;
        regs.pc = reader.get_u16()?;
        regs.sp = reader.get_u16()?;
        regs.set_af(reader.get_u16()?);
        regs.set_bc(reader.get_u16()?);
        regs.set_de(reader.get_u16()?);
        regs.set_hl(reader.get_u16()?);
        regs.ix = reader.get_u16()?;
        regs.iy = reader.get_u16()?;
        regs.af_alt = reader.get_u16()?;
        regs.bc_alt = reader.get_u16()?;
        regs.de_alt = reader.get_u16()?;
        regs.hl_alt = reader.get_u16()?;
        regs.i = reader.get_u8()?;
        regs.r = reader.get_u8()?;
        regs.im = reader.get_u8()?;
        if regs.im > 2 {
            return Err(StateError::InvalidValue {
                what: "interrupt mode",
                value: u32::from(regs.im),
            });
        }
        regs.iff1 = reader.get_bool()?;
        regs.iff2 = reader.get_bool()?;
        regs.halted = reader.get_bool()?;
        let ei_pending = reader.get_bool()?;
        let refresh_int_pending = reader.get_bool()?;
        let prev_r = reader.get_u8()?;
        let remaining = reader.get_u32()?;

        self.regs = regs;
        self.ei_pending = ei_pending;
        self.refresh_int_pending = refresh_int_pending;
        self.prev_r = prev_r;
        self.remaining_interrupt_tstates = i64::from(remaining);
        self.reset_load();
        Ok(())
    }
}

const QUERY_PATHS: &[&str] = &[
    "pc", "sp", "af", "bc", "de", "hl", "ix", "iy", "af'", "bc'", "de'", "hl'", "a", "f", "b",
    "c", "d", "e", "h", "l", "ixh", "ixl", "iyh", "iyl", "i", "r", "im", "iff1", "iff2",
    "halted", "wz", "load", "remaining_tstates",
];

impl Observable for Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "halted" => Some(self.regs.halted.into()),
            "wz" => Some(self.regs.wz.into()),
            "load" => Some(format!("{:.3}", self.cpu_load).as_str().into()),
            "remaining_tstates" => Some((self.remaining_interrupt_tstates.max(0) as u32).into()),
            _ => {
                let reg: Reg = path.parse().ok()?;
                let v = self.regs.get(reg);
                Some(match reg {
                    Reg::Iff1 | Reg::Iff2 => (v != 0).into(),
                    r if r.is_8bit() => (v as u8).into(),
                    _ => v.into(),
                })
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}
