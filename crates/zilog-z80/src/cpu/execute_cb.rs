//! CB-prefixed bit instructions, including the DDCB/FDCB forms.

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, PF, SF, XF, YF, ZF};

use super::Z80;

impl Z80 {
    /// Apply the CB operation `op` to `value`. Returns the new value, or
    /// `None` for BIT, which only sets flags. `xy_source` supplies the
    /// undocumented flag bits for BIT.
    fn cb_operation(&mut self, op: u8, value: u8, xy_source: u8) -> Option<u8> {
        let y = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                let r = alu::rotate_shift(y, value, self.regs.f & CF != 0);
                self.regs.f = r.flags;
                Some(r.value)
            }
            1 => {
                let bit = value & (1 << y);
                let mut f = (self.regs.f & CF) | HF | (xy_source & (YF | XF));
                if bit == 0 {
                    f |= ZF | PF;
                }
                if y == 7 && bit != 0 {
                    f |= SF;
                }
                self.regs.f = f;
                None
            }
            2 => Some(value & !(1 << y)),
            _ => Some(value | (1 << y)),
        }
    }

    pub(super) fn execute_cb<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let z = op & 7;
        if z == 6 {
            let addr = self.regs.hl();
            let v = self.read8(bus, addr);
            self.internal(1);
            let xy = (self.regs.wz >> 8) as u8;
            if let Some(result) = self.cb_operation(op, v, xy) {
                self.write8(bus, addr, result);
            }
        } else {
            let v = self.reg8(z, false);
            if let Some(result) = self.cb_operation(op, v, v) {
                self.set_reg8(z, false, result);
            }
        }
    }

    /// DDCB d op / FDCB d op. The displacement comes before the opcode and
    /// neither byte is an M1 fetch, so R only advances for the two prefixes.
    pub(super) fn execute_index_cb<B: Bus>(&mut self, bus: &mut B) {
        let d = self.imm8(bus) as i8;
        let op = self.imm8(bus);
        self.internal(2);
        let addr = self.hl_like().wrapping_add_signed(i16::from(d));
        self.regs.wz = addr;

        let v = self.read8(bus, addr);
        self.internal(1);
        let xy = (addr >> 8) as u8;
        if let Some(result) = self.cb_operation(op, v, xy) {
            self.write8(bus, addr, result);
            // Undocumented: the result is also copied to a register.
            let z = op & 7;
            if z != 6 {
                self.set_reg8(z, false, result);
            }
        }
    }
}
