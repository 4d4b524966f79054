//! Z80 flag register bits and precomputed flag tables.

pub const SF: u8 = 0x80;
pub const ZF: u8 = 0x40;
/// Undocumented copy of result bit 5.
pub const YF: u8 = 0x20;
pub const HF: u8 = 0x10;
/// Undocumented copy of result bit 3.
pub const XF: u8 = 0x08;
/// Parity or overflow, depending on the instruction.
pub const PF: u8 = 0x04;
pub const NF: u8 = 0x02;
pub const CF: u8 = 0x01;

const fn build_sz53p() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let v = i as u8;
        let mut f = v & (SF | YF | XF);
        if v == 0 {
            f |= ZF;
        }
        if v.count_ones() % 2 == 0 {
            f |= PF;
        }
        table[i] = f;
        i += 1;
    }
    table
}

static SZ53P: [u8; 256] = build_sz53p();

/// Sign, zero and undocumented bits of `value`.
#[inline]
#[must_use]
pub fn sz53(value: u8) -> u8 {
    SZ53P[value as usize] & !PF
}

/// [`sz53`] plus the parity bit.
#[inline]
#[must_use]
pub fn sz53p(value: u8) -> u8 {
    SZ53P[value as usize]
}
