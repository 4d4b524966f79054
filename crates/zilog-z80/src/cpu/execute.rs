//! Unprefixed and DD/FD-prefixed instructions.

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{Index, Z80};

impl Z80 {
    // =========================================================================
    // Operand helpers
    // =========================================================================

    /// HL, IX or IY depending on the active prefix.
    pub(super) fn hl_like(&self) -> u16 {
        match self.index {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    pub(super) fn set_hl_like(&mut self, value: u16) {
        match self.index {
            Index::Hl => self.regs.set_hl(value),
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// 8-bit register by its 3-bit code. With `indexed`, H and L become the
    /// halves of IX/IY. Code 6 is a memory operand and is never passed here.
    pub(super) fn reg8(&self, r: u8, indexed: bool) -> u8 {
        let index = if indexed { self.index } else { Index::Hl };
        match (r & 7, index) {
            (0, _) => self.regs.b,
            (1, _) => self.regs.c,
            (2, _) => self.regs.d,
            (3, _) => self.regs.e,
            (4, Index::Hl) => self.regs.h,
            (5, Index::Hl) => self.regs.l,
            (4, Index::Ix) => (self.regs.ix >> 8) as u8,
            (5, Index::Ix) => self.regs.ix as u8,
            (4, Index::Iy) => (self.regs.iy >> 8) as u8,
            (5, Index::Iy) => self.regs.iy as u8,
            _ => self.regs.a,
        }
    }

    pub(super) fn set_reg8(&mut self, r: u8, indexed: bool, value: u8) {
        let index = if indexed { self.index } else { Index::Hl };
        let hi = |word: u16| (word & 0x00FF) | (u16::from(value) << 8);
        let lo = |word: u16| (word & 0xFF00) | u16::from(value);
        match (r & 7, index) {
            (0, _) => self.regs.b = value,
            (1, _) => self.regs.c = value,
            (2, _) => self.regs.d = value,
            (3, _) => self.regs.e = value,
            (4, Index::Hl) => self.regs.h = value,
            (5, Index::Hl) => self.regs.l = value,
            (4, Index::Ix) => self.regs.ix = hi(self.regs.ix),
            (5, Index::Ix) => self.regs.ix = lo(self.regs.ix),
            (4, Index::Iy) => self.regs.iy = hi(self.regs.iy),
            (5, Index::Iy) => self.regs.iy = lo(self.regs.iy),
            _ => self.regs.a = value,
        }
    }

    /// Register pair by its 2-bit code, SP in slot 3.
    pub(super) fn rp(&self, p: u8) -> u16 {
        match p & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.hl_like(),
            _ => self.regs.sp,
        }
    }

    pub(super) fn set_rp(&mut self, p: u8, value: u16) {
        match p & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_hl_like(value),
            _ => self.regs.sp = value,
        }
    }

    /// Register pair for PUSH/POP, AF in slot 3.
    fn rp2(&self, p: u8) -> u16 {
        if p & 3 == 3 { self.regs.af() } else { self.rp(p) }
    }

    fn set_rp2(&mut self, p: u8, value: u16) {
        if p & 3 == 3 {
            self.regs.set_af(value);
        } else {
            self.set_rp(p, value);
        }
    }

    /// Address of the `(HL)` operand, or `(IX+d)` / `(IY+d)` under a prefix.
    /// The displacement read and address calculation cost 8 T-states.
    pub(super) fn operand_addr<B: Bus>(&mut self, bus: &mut B) -> u16 {
        match self.index {
            Index::Hl => self.regs.hl(),
            _ => {
                let d = self.imm8(bus) as i8;
                self.internal(5);
                let addr = self.hl_like().wrapping_add_signed(i16::from(d));
                self.regs.wz = addr;
                addr
            }
        }
    }

    pub(super) fn condition(&self, cc: u8) -> bool {
        let f = self.regs.f;
        match cc & 7 {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    /// ADD/ADC/SUB/SBC/AND/XOR/OR/CP on A, selected by bits 3-5.
    pub(super) fn alu_a(&mut self, kind: u8, value: u8) {
        let a = self.regs.a;
        let carry = self.regs.f & CF != 0;
        let result = match kind & 7 {
            0 => alu::add8(a, value, false),
            1 => alu::add8(a, value, carry),
            2 => alu::sub8(a, value, false),
            3 => alu::sub8(a, value, carry),
            4 => alu::and8(a, value),
            5 => alu::xor8(a, value),
            6 => alu::or8(a, value),
            _ => alu::cp8(a, value),
        };
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }

    fn jump_relative(&mut self, offset: u8) {
        self.internal(5);
        self.regs.pc = self.regs.pc.wrapping_add_signed(i16::from(offset as i8));
        self.regs.wz = self.regs.pc;
    }

    // =========================================================================
    // Unprefixed instructions
    // =========================================================================

    pub(super) fn execute_unprefixed<B: Bus>(&mut self, bus: &mut B, first: u8) {
        let mut op = first;
        // DD/FD prefixes: the last one wins.
        loop {
            match op {
                0xDD => self.index = Index::Ix,
                0xFD => self.index = Index::Iy,
                _ => break,
            }
            op = self.fetch_opcode(bus);
        }

        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;

        match op {
            // NOP
            0x00 => {}

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let v = self.imm16(bus);
                self.set_rp(p, v);
            }

            // LD (BC), A / LD (DE), A
            0x02 | 0x12 => {
                let addr = if op == 0x02 { self.regs.bc() } else { self.regs.de() };
                self.write8(bus, addr, self.regs.a);
                self.regs.wz = u16::from(self.regs.a) << 8 | (addr.wrapping_add(1) & 0xFF);
            }

            // LD A, (BC) / LD A, (DE)
            0x0A | 0x1A => {
                let addr = if op == 0x0A { self.regs.bc() } else { self.regs.de() };
                self.regs.a = self.read8(bus, addr);
                self.regs.wz = addr.wrapping_add(1);
            }

            // LD (nn), HL
            0x22 => {
                let addr = self.imm16(bus);
                self.write16(bus, addr, self.hl_like());
                self.regs.wz = addr.wrapping_add(1);
            }

            // LD HL, (nn)
            0x2A => {
                let addr = self.imm16(bus);
                let v = self.read16(bus, addr);
                self.set_hl_like(v);
                self.regs.wz = addr.wrapping_add(1);
            }

            // LD (nn), A
            0x32 => {
                let addr = self.imm16(bus);
                self.write8(bus, addr, self.regs.a);
                self.regs.wz = u16::from(self.regs.a) << 8 | (addr.wrapping_add(1) & 0xFF);
            }

            // LD A, (nn)
            0x3A => {
                let addr = self.imm16(bus);
                self.regs.a = self.read8(bus, addr);
                self.regs.wz = addr.wrapping_add(1);
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.internal(2);
                self.set_rp(p, self.rp(p).wrapping_add(1));
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                self.internal(2);
                self.set_rp(p, self.rp(p).wrapping_sub(1));
            }

            // INC (HL) / DEC (HL)
            0x34 | 0x35 => {
                let addr = self.operand_addr(bus);
                let v = self.read8(bus, addr);
                self.internal(1);
                let r = if op == 0x34 { alu::inc8(v) } else { alu::dec8(v) };
                self.write8(bus, addr, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = alu::inc8(self.reg8(y, true));
                self.set_reg8(y, true, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = alu::dec8(self.reg8(y, true));
                self.set_reg8(y, true, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }

            // LD (HL), n
            0x36 => {
                if self.index == Index::Hl {
                    let n = self.imm8(bus);
                    self.write8(bus, self.regs.hl(), n);
                } else {
                    let d = self.imm8(bus) as i8;
                    let n = self.imm8(bus);
                    self.internal(2);
                    let addr = self.hl_like().wrapping_add_signed(i16::from(d));
                    self.regs.wz = addr;
                    self.write8(bus, addr, n);
                }
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let n = self.imm8(bus);
                self.set_reg8(y, true, n);
            }

            // RLCA / RRCA / RLA / RRA
            0x07 | 0x0F | 0x17 | 0x1F => {
                let a = self.regs.a;
                let carry_in = u8::from(self.regs.f & CF != 0);
                let (value, carry) = match op {
                    0x07 => (a.rotate_left(1), a >> 7),
                    0x0F => (a.rotate_right(1), a & 1),
                    0x17 => ((a << 1) | carry_in, a >> 7),
                    _ => ((a >> 1) | (carry_in << 7), a & 1),
                };
                self.regs.a = value;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (value & (YF | XF)) | carry;
            }

            // EX AF, AF'
            0x08 => {
                let af = self.regs.af();
                self.regs.set_af(self.regs.af_alt);
                self.regs.af_alt = af;
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.internal(7);
                let hl = self.hl_like();
                self.regs.wz = hl.wrapping_add(1);
                let (result, flags) = alu::add16(hl, self.rp(p));
                self.set_hl_like(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // DJNZ e
            0x10 => {
                self.internal(1);
                let e = self.imm8(bus);
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.jump_relative(e);
                }
            }

            // JR e
            0x18 => {
                let e = self.imm8(bus);
                self.jump_relative(e);
            }

            // JR cc, e (NZ, Z, NC, C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let e = self.imm8(bus);
                if self.condition(y - 4) {
                    self.jump_relative(e);
                }
            }

            // DAA
            0x27 => {
                let r = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
            }

            // SCF
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | CF | (self.regs.a & (YF | XF));
            }

            // CCF
            0x3F => {
                let old_carry = self.regs.f & CF;
                let half = if old_carry != 0 { HF } else { 0 };
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | half
                    | (old_carry ^ CF)
                    | (self.regs.a & (YF | XF));
            }

            // HALT
            0x76 => {
                self.regs.halted = true;
            }

            // LD r, (HL)
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                let addr = self.operand_addr(bus);
                let v = self.read8(bus, addr);
                self.set_reg8(y, false, v);
            }

            // LD (HL), r
            0x70..=0x75 | 0x77 => {
                let addr = self.operand_addr(bus);
                let v = self.reg8(z, false);
                self.write8(bus, addr, v);
            }

            // LD r, r'
            0x40..=0x7F => {
                let v = self.reg8(z, true);
                self.set_reg8(y, true, v);
            }

            // ALU A, (HL)
            0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                let addr = self.operand_addr(bus);
                let v = self.read8(bus, addr);
                self.alu_a(y, v);
            }

            // ALU A, r
            0x80..=0xBF => {
                let v = self.reg8(z, true);
                self.alu_a(y, v);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                self.internal(1);
                if self.condition(y) {
                    self.regs.pc = self.pop(bus);
                    self.regs.wz = self.regs.pc;
                }
            }

            // POP rr
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let v = self.pop(bus);
                self.set_rp2(p, v);
            }

            // JP cc, nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.imm16(bus);
                self.regs.wz = addr;
                if self.condition(y) {
                    self.regs.pc = addr;
                }
            }

            // JP nn
            0xC3 => {
                let addr = self.imm16(bus);
                self.regs.wz = addr;
                self.regs.pc = addr;
            }

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.imm16(bus);
                self.regs.wz = addr;
                if self.condition(y) {
                    self.internal(1);
                    self.push(bus, self.regs.pc);
                    self.regs.pc = addr;
                }
            }

            // PUSH rr
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                self.internal(1);
                let v = self.rp2(p);
                self.push(bus, v);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let n = self.imm8(bus);
                self.alu_a(y, n);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.internal(1);
                self.push(bus, self.regs.pc);
                self.regs.pc = u16::from(y) * 8;
                self.regs.wz = self.regs.pc;
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop(bus);
                self.regs.wz = self.regs.pc;
            }

            // CB prefix
            0xCB => {
                if self.index == Index::Hl {
                    let cb = self.fetch_opcode(bus);
                    self.execute_cb(bus, cb);
                } else {
                    self.execute_index_cb(bus);
                }
            }

            // CALL nn
            0xCD => {
                let addr = self.imm16(bus);
                self.regs.wz = addr;
                self.internal(1);
                self.push(bus, self.regs.pc);
                self.regs.pc = addr;
            }

            // OUT (n), A
            0xD3 => {
                let n = self.imm8(bus);
                let port = u16::from(self.regs.a) << 8 | u16::from(n);
                self.port_out(bus, port, self.regs.a);
                self.regs.wz = u16::from(self.regs.a) << 8 | u16::from(n.wrapping_add(1));
            }

            // IN A, (n)
            0xDB => {
                let n = self.imm8(bus);
                let port = u16::from(self.regs.a) << 8 | u16::from(n);
                self.regs.a = self.port_in(bus, port);
                self.regs.wz = port.wrapping_add(1);
            }

            // EXX
            0xD9 => {
                let (bc, de, hl) = (self.regs.bc(), self.regs.de(), self.regs.hl());
                self.regs.set_bc(self.regs.bc_alt);
                self.regs.set_de(self.regs.de_alt);
                self.regs.set_hl(self.regs.hl_alt);
                self.regs.bc_alt = bc;
                self.regs.de_alt = de;
                self.regs.hl_alt = hl;
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let v = self.read16(bus, sp);
                self.internal(1);
                self.write16(bus, sp, self.hl_like());
                self.internal(2);
                self.set_hl_like(v);
                self.regs.wz = v;
            }

            // JP (HL)
            0xE9 => {
                self.regs.pc = self.hl_like();
            }

            // EX DE, HL (never affected by DD/FD)
            0xEB => {
                let de = self.regs.de();
                self.regs.set_de(self.regs.hl());
                self.regs.set_hl(de);
            }

            // ED prefix
            0xED => {
                self.index = Index::Hl;
                let ed = self.fetch_opcode(bus);
                self.execute_ed(bus, ed);
            }

            // DI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }

            // EI
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_pending = true;
            }

            // LD SP, HL
            0xF9 => {
                self.internal(2);
                self.regs.sp = self.hl_like();
            }

            // DD/FD were consumed above.
            0xDD | 0xFD => {}
        }
    }
}
