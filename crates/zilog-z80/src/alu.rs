//! ALU operations.
//!
//! Every function returns the result together with the complete flag byte it
//! produces. Callers that must preserve some flags (e.g. `INC r` keeps C) mask
//! them in themselves.

use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u8,
    pub flags: u8,
}

impl AluResult {
    const fn new(value: u8, flags: u8) -> Self {
        Self { value, flags }
    }
}

/// ADD / ADC.
#[must_use]
pub fn add8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u16::from(carry);
    let wide = u16::from(a) + u16::from(b) + c;
    let result = wide as u8;
    let mut flags = sz53(result);
    if (a & 0x0F) as u16 + (b & 0x0F) as u16 + c > 0x0F {
        flags |= HF;
    }
    if (a ^ b) & 0x80 == 0 && (a ^ result) & 0x80 != 0 {
        flags |= PF;
    }
    if wide > 0xFF {
        flags |= CF;
    }
    AluResult::new(result, flags)
}

/// SUB / SBC.
#[must_use]
pub fn sub8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u16::from(carry);
    let result = a.wrapping_sub(b).wrapping_sub(c as u8);
    let mut flags = sz53(result) | NF;
    if u16::from(a & 0x0F) < u16::from(b & 0x0F) + c {
        flags |= HF;
    }
    if (a ^ b) & 0x80 != 0 && (a ^ result) & 0x80 != 0 {
        flags |= PF;
    }
    if u16::from(a) < u16::from(b) + c {
        flags |= CF;
    }
    AluResult::new(result, flags)
}

/// CP: a subtraction whose undocumented bits come from the operand.
#[must_use]
pub fn cp8(a: u8, b: u8) -> AluResult {
    let r = sub8(a, b, false);
    AluResult::new(a, (r.flags & !(YF | XF)) | (b & (YF | XF)))
}

#[must_use]
pub fn and8(a: u8, b: u8) -> AluResult {
    let result = a & b;
    AluResult::new(result, sz53p(result) | HF)
}

#[must_use]
pub fn or8(a: u8, b: u8) -> AluResult {
    let result = a | b;
    AluResult::new(result, sz53p(result))
}

#[must_use]
pub fn xor8(a: u8, b: u8) -> AluResult {
    let result = a ^ b;
    AluResult::new(result, sz53p(result))
}

/// INC. The returned flags never include C.
#[must_use]
pub fn inc8(a: u8) -> AluResult {
    let result = a.wrapping_add(1);
    let mut flags = sz53(result);
    if a & 0x0F == 0x0F {
        flags |= HF;
    }
    if a == 0x7F {
        flags |= PF;
    }
    AluResult::new(result, flags)
}

/// DEC. The returned flags never include C.
#[must_use]
pub fn dec8(a: u8) -> AluResult {
    let result = a.wrapping_sub(1);
    let mut flags = sz53(result) | NF;
    if a & 0x0F == 0 {
        flags |= HF;
    }
    if a == 0x80 {
        flags |= PF;
    }
    AluResult::new(result, flags)
}

/// The CB-prefixed rotate/shift group, selected by bits 3-5 of the opcode:
/// RLC, RRC, RL, RR, SLA, SRA, SLL, SRL.
#[must_use]
pub fn rotate_shift(kind: u8, value: u8, carry: bool) -> AluResult {
    let c_in = u8::from(carry);
    let (result, c_out) = match kind & 7 {
        0 => (value.rotate_left(1), value >> 7),
        1 => (value.rotate_right(1), value & 1),
        2 => ((value << 1) | c_in, value >> 7),
        3 => ((value >> 1) | (c_in << 7), value & 1),
        4 => (value << 1, value >> 7),
        5 => ((value >> 1) | (value & 0x80), value & 1),
        6 => ((value << 1) | 1, value >> 7),
        _ => (value >> 1, value & 1),
    };
    AluResult::new(result, sz53p(result) | c_out)
}

/// ADD HL,rr (and IX/IY). Only H, C and the undocumented bits are produced;
/// S, Z and P/V must be kept by the caller.
#[must_use]
pub fn add16(a: u16, b: u16) -> (u16, u8) {
    let wide = u32::from(a) + u32::from(b);
    let result = wide as u16;
    let mut flags = ((result >> 8) as u8) & (YF | XF);
    if (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF {
        flags |= HF;
    }
    if wide > 0xFFFF {
        flags |= CF;
    }
    (result, flags)
}

#[must_use]
pub fn adc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u32::from(carry);
    let wide = u32::from(a) + u32::from(b) + c;
    let result = wide as u16;
    let mut flags = ((result >> 8) as u8) & (SF | YF | XF);
    if result == 0 {
        flags |= ZF;
    }
    if u32::from(a & 0x0FFF) + u32::from(b & 0x0FFF) + c > 0x0FFF {
        flags |= HF;
    }
    if (a ^ b) & 0x8000 == 0 && (a ^ result) & 0x8000 != 0 {
        flags |= PF;
    }
    if wide > 0xFFFF {
        flags |= CF;
    }
    (result, flags)
}

#[must_use]
pub fn sbc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u32::from(carry);
    let result = a.wrapping_sub(b).wrapping_sub(c as u16);
    let mut flags = (((result >> 8) as u8) & (SF | YF | XF)) | NF;
    if result == 0 {
        flags |= ZF;
    }
    if u32::from(a & 0x0FFF) < u32::from(b & 0x0FFF) + c {
        flags |= HF;
    }
    if (a ^ b) & 0x8000 != 0 && (a ^ result) & 0x8000 != 0 {
        flags |= PF;
    }
    if u32::from(a) < u32::from(b) + c {
        flags |= CF;
    }
    (result, flags)
}

/// Decimal adjust A after BCD arithmetic, given the current flags.
#[must_use]
pub fn daa(a: u8, f: u8) -> AluResult {
    let mut correction = 0u8;
    let mut carry = f & CF;
    if f & HF != 0 || a & 0x0F > 9 {
        correction |= 0x06;
    }
    if carry != 0 || a > 0x99 {
        correction |= 0x60;
        carry = CF;
    }
    let (result, half) = if f & NF != 0 {
        let r = a.wrapping_sub(correction);
        (r, f & HF != 0 && a & 0x0F < 6)
    } else {
        let r = a.wrapping_add(correction);
        (r, a & 0x0F > 9)
    };
    let mut flags = sz53p(result) | (f & NF) | carry;
    if half {
        flags |= HF;
    }
    AluResult::new(result, flags)
}
