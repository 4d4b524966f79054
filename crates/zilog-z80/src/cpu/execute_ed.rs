//! ED-prefixed instructions.

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

use super::Z80;

impl Z80 {
    pub(super) fn execute_ed<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let y = (op >> 3) & 7;
        let p = y >> 1;

        match op {
            // IN r, (C); y = 6 only sets flags
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let bc = self.regs.bc();
                let v = self.port_in(bus, bc);
                self.regs.wz = bc.wrapping_add(1);
                if y != 6 {
                    self.set_reg8(y, false, v);
                }
                self.regs.f = (self.regs.f & CF) | sz53p(v);
            }

            // OUT (C), r; y = 6 outputs zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let bc = self.regs.bc();
                let v = if y == 6 { 0 } else { self.reg8(y, false) };
                self.port_out(bus, bc, v);
                self.regs.wz = bc.wrapping_add(1);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 | 0x4A | 0x5A | 0x6A | 0x7A => {
                self.internal(7);
                let hl = self.regs.hl();
                let rr = self.rp(p);
                let carry = self.regs.f & CF != 0;
                let (result, flags) = if op & 0x08 == 0 {
                    alu::sbc16(hl, rr, carry)
                } else {
                    alu::adc16(hl, rr, carry)
                };
                self.regs.wz = hl.wrapping_add(1);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // LD (nn), rr
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.imm16(bus);
                let v = self.rp(p);
                self.write16(bus, addr, v);
                self.regs.wz = addr.wrapping_add(1);
            }

            // LD rr, (nn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.imm16(bus);
                let v = self.read16(bus, addr);
                self.set_rp(p, v);
                self.regs.wz = addr.wrapping_add(1);
            }

            // NEG
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let r = alu::sub8(0, self.regs.a, false);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }

            // RETN / RETI
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop(bus);
                self.regs.wz = self.regs.pc;
                self.regs.iff1 = self.regs.iff2;
            }

            // IM 0 / IM 1 / IM 2
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,

            // LD I, A / LD R, A
            0x47 => {
                self.internal(1);
                self.regs.i = self.regs.a;
            }
            0x4F => {
                self.internal(1);
                self.regs.r = self.regs.a;
            }

            // LD A, I / LD A, R
            0x57 | 0x5F => {
                self.internal(1);
                self.regs.a = if op == 0x57 { self.regs.i } else { self.regs.r };
                let iff = if self.regs.iff2 { PF } else { 0 };
                self.regs.f = (self.regs.f & CF) | sz53(self.regs.a) | iff;
            }

            // RRD / RLD
            0x67 | 0x6F => {
                let hl = self.regs.hl();
                let m = self.read8(bus, hl);
                self.internal(4);
                let a = self.regs.a;
                let (new_a, new_m) = if op == 0x67 {
                    ((a & 0xF0) | (m & 0x0F), (a << 4) | (m >> 4))
                } else {
                    ((a & 0xF0) | (m >> 4), (m << 4) | (a & 0x0F))
                };
                self.write8(bus, hl, new_m);
                self.regs.a = new_a;
                self.regs.f = (self.regs.f & CF) | sz53p(new_a);
                self.regs.wz = hl.wrapping_add(1);
            }

            // LDI / LDD / LDIR / LDDR
            0xA0 | 0xA8 | 0xB0 | 0xB8 => self.block_load(bus, op),

            // CPI / CPD / CPIR / CPDR
            0xA1 | 0xA9 | 0xB1 | 0xB9 => self.block_compare(bus, op),

            // INI / IND / INIR / INDR
            0xA2 | 0xAA | 0xB2 | 0xBA => self.block_in(bus, op),

            // OUTI / OUTD / OTIR / OTDR
            0xA3 | 0xAB | 0xB3 | 0xBB => self.block_out(bus, op),

            // Everything else is an 8 T-state NOP.
            _ => {}
        }
    }

    /// Step for the block instructions: +1 for the I forms, -1 for the D forms.
    fn block_delta(op: u8) -> i16 {
        if op & 0x08 == 0 { 1 } else { -1 }
    }

    fn block_repeats(op: u8) -> bool {
        op & 0x10 != 0
    }

    /// Rewind PC onto the ED prefix so the instruction runs again.
    fn block_repeat(&mut self) {
        self.internal(5);
        self.regs.pc = self.regs.pc.wrapping_sub(2);
        self.regs.wz = self.regs.pc.wrapping_add(1);
    }

    fn block_load<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let delta = Self::block_delta(op);
        let v = self.read8(bus, self.regs.hl());
        self.write8(bus, self.regs.de(), v);
        self.internal(2);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(delta));
        self.regs.set_de(self.regs.de().wrapping_add_signed(delta));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let n = v.wrapping_add(self.regs.a);
        let mut f = (self.regs.f & (SF | ZF | CF)) | (n & XF) | ((n << 4) & YF);
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;

        if Self::block_repeats(op) && bc != 0 {
            self.block_repeat();
        }
    }

    fn block_compare<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let delta = Self::block_delta(op);
        let v = self.read8(bus, self.regs.hl());
        self.internal(5);
        let r = alu::sub8(self.regs.a, v, false);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(delta));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);
        self.regs.wz = self.regs.wz.wrapping_add_signed(delta);

        let half = r.flags & HF;
        let n = r.value.wrapping_sub(u8::from(half != 0));
        let mut f = (self.regs.f & CF) | NF | (r.flags & (SF | ZF)) | half;
        f |= (n & XF) | ((n << 4) & YF);
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;

        if Self::block_repeats(op) && bc != 0 && r.value != 0 {
            self.block_repeat();
        }
    }

    /// Flags shared by the block I/O instructions.
    fn block_io_flags(&mut self, value: u8, k_base: u8) {
        let b = self.regs.b;
        let k = u16::from(value) + u16::from(k_base);
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if k > 0xFF {
            f |= HF | CF;
        }
        f |= sz53p(((k as u8) & 7) ^ b) & PF;
        self.regs.f = f;
    }

    fn block_in<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let delta = Self::block_delta(op);
        self.internal(1);
        let bc = self.regs.bc();
        let v = self.port_in(bus, bc);
        self.write8(bus, self.regs.hl(), v);
        self.regs.wz = bc.wrapping_add_signed(delta);
        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(delta));
        let c = self.regs.c.wrapping_add_signed(delta as i8);
        self.block_io_flags(v, c);

        if Self::block_repeats(op) && self.regs.b != 0 {
            self.block_repeat();
        }
    }

    fn block_out<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let delta = Self::block_delta(op);
        self.internal(1);
        let v = self.read8(bus, self.regs.hl());
        self.regs.b = self.regs.b.wrapping_sub(1);
        let bc = self.regs.bc();
        self.port_out(bus, bc, v);
        self.regs.wz = bc.wrapping_add_signed(delta);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(delta));
        self.block_io_flags(v, self.regs.l);

        if Self::block_repeats(op) && self.regs.b != 0 {
            self.block_repeat();
        }
    }
}

#[cfg(test)]
mod tests {
    use emu_core::{Cpu, SimpleBus};

    use super::super::InterruptConfig;
    use super::*;

    fn make_cpu(code: &[u8]) -> (Z80, SimpleBus) {
        let mut bus = SimpleBus::new();
        bus.load(0, code);
        let mut cpu = Z80::new(InterruptConfig {
            periodic: false,
            ..InterruptConfig::default()
        });
        cpu.regs.sp = 0x8000;
        (cpu, bus)
    }

    #[test]
    fn ldir_copies_block_and_repeats() {
        // LD HL,$4000; LD DE,$5000; LD BC,3; LDIR
        let (mut cpu, mut bus) = make_cpu(&[
            0x21, 0x00, 0x40, 0x11, 0x00, 0x50, 0x01, 0x03, 0x00, 0xED, 0xB0,
        ]);
        bus.load(0x4000, &[1, 2, 3]);
        for _ in 0..3 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.step(&mut bus), 21);
        assert_eq!(cpu.regs.pc, 9);
        assert_eq!(cpu.step(&mut bus), 21);
        assert_eq!(cpu.step(&mut bus), 16);
        assert_eq!(cpu.regs.pc, 11);
        assert_eq!(&bus.ram[0x5000..0x5003], &[1, 2, 3]);
        assert_eq!(cpu.regs.bc(), 0);
        assert_eq!(cpu.regs.f & PF, 0);
    }

    #[test]
    fn cpir_stops_on_match() {
        // LD HL,$4000; LD BC,8; LD A,$33; CPIR
        let (mut cpu, mut bus) = make_cpu(&[
            0x21, 0x00, 0x40, 0x01, 0x08, 0x00, 0x3E, 0x33, 0xED, 0xB1,
        ]);
        bus.load(0x4000, &[0x11, 0x22, 0x33, 0x44]);
        for _ in 0..6 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.regs.hl(), 0x4003);
        assert_eq!(cpu.regs.bc(), 5);
        assert_eq!(cpu.regs.f & ZF, ZF);
        assert_eq!(cpu.regs.pc, 10);
    }

    #[test]
    fn sbc_hl_sets_zero() {
        // LD HL,$1000; LD DE,$1000; OR A; SBC HL,DE
        let (mut cpu, mut bus) =
            make_cpu(&[0x21, 0x00, 0x10, 0x11, 0x00, 0x10, 0xB7, 0xED, 0x52]);
        for _ in 0..3 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.step(&mut bus), 15);
        assert_eq!(cpu.regs.hl(), 0);
        assert_eq!(cpu.regs.f & (ZF | NF), ZF | NF);
    }

    #[test]
    fn im_and_ld_a_i() {
        // IM 2; LD A,$3F; LD I,A; LD A,I
        let (mut cpu, mut bus) = make_cpu(&[0xED, 0x5E, 0x3E, 0x3F, 0xED, 0x47, 0xED, 0x57]);
        for _ in 0..4 {
            cpu.step(&mut bus);
        }
        assert_eq!(cpu.regs.im, 2);
        assert_eq!(cpu.regs.i, 0x3F);
        assert_eq!(cpu.regs.a, 0x3F);
    }

    #[test]
    fn retn_restores_iff1() {
        // RETN, with $1234 on the stack
        let (mut cpu, mut bus) = make_cpu(&[0xED, 0x45]);
        bus.load(0x7FFE, &[0x34, 0x12]);
        cpu.regs.sp = 0x7FFE;
        cpu.regs.iff2 = true;
        assert_eq!(cpu.step(&mut bus), 14);
        assert_eq!(cpu.regs.pc, 0x1234);
        assert!(cpu.regs.iff1);
    }

    #[test]
    fn rld_rotates_nibbles() {
        // LD HL,$4000; LD A,$12; RLD
        let (mut cpu, mut bus) = make_cpu(&[0x21, 0x00, 0x40, 0x3E, 0x12, 0xED, 0x6F]);
        bus.ram[0x4000] = 0x34;
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(cpu.step(&mut bus), 18);
        assert_eq!(cpu.regs.a, 0x13);
        assert_eq!(bus.ram[0x4000], 0x42);
    }

    #[test]
    fn out_c_writes_port_bc() {
        // LD BC,$7FFD; LD A,$17; OUT (C),A
        let (mut cpu, mut bus) = make_cpu(&[0x01, 0xFD, 0x7F, 0x3E, 0x17, 0xED, 0x79]);
        for _ in 0..3 {
            cpu.step(&mut bus);
        }
        assert_eq!(bus.last_io_write, Some((0x7FFD, 0x17)));
    }
}
