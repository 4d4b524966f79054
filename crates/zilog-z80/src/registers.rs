//! Z80 register file.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Z80 registers snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,

    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    /// Refresh counter. Only the low 7 bits count; bit 7 is kept as loaded.
    pub r: u8,

    /// MEMPTR, visible only through the undocumented bits of `BIT n,(HL)`.
    pub wz: u16,

    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
}

macro_rules! pair {
    ($get:ident, $set:ident, $hi:ident, $lo:ident) => {
        #[must_use]
        pub const fn $get(&self) -> u16 {
            (self.$hi as u16) << 8 | self.$lo as u16
        }

        pub fn $set(&mut self, value: u16) {
            self.$hi = (value >> 8) as u8;
            self.$lo = value as u8;
        }
    };
}

impl Registers {
    pair!(af, set_af, a, f);
    pair!(bc, set_bc, b, c);
    pair!(de, set_de, d, e);
    pair!(hl, set_hl, h, l);

    /// Advance the 7-bit refresh counter.
    pub fn inc_r(&mut self, n: u8) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(n) & 0x7F);
    }

    /// Read a register by name. 8-bit registers and flags are widened.
    #[must_use]
    pub fn get(&self, reg: Reg) -> u16 {
        match reg {
            Reg::Pc => self.pc,
            Reg::Sp => self.sp,
            Reg::Af => self.af(),
            Reg::Bc => self.bc(),
            Reg::De => self.de(),
            Reg::Hl => self.hl(),
            Reg::Ix => self.ix,
            Reg::Iy => self.iy,
            Reg::AfAlt => self.af_alt,
            Reg::BcAlt => self.bc_alt,
            Reg::DeAlt => self.de_alt,
            Reg::HlAlt => self.hl_alt,
            Reg::A => self.a.into(),
            Reg::F => self.f.into(),
            Reg::B => self.b.into(),
            Reg::C => self.c.into(),
            Reg::D => self.d.into(),
            Reg::E => self.e.into(),
            Reg::H => self.h.into(),
            Reg::L => self.l.into(),
            Reg::Ixh => self.ix >> 8,
            Reg::Ixl => self.ix & 0xFF,
            Reg::Iyh => self.iy >> 8,
            Reg::Iyl => self.iy & 0xFF,
            Reg::I => self.i.into(),
            Reg::R => self.r.into(),
            Reg::Im => self.im.into(),
            Reg::Iff1 => self.iff1.into(),
            Reg::Iff2 => self.iff2.into(),
        }
    }

    /// Write a register by name. 8-bit targets take the low byte.
    pub fn set(&mut self, reg: Reg, value: u16) {
        let lo = value as u8;
        match reg {
            Reg::Pc => self.pc = value,
            Reg::Sp => self.sp = value,
            Reg::Af => self.set_af(value),
            Reg::Bc => self.set_bc(value),
            Reg::De => self.set_de(value),
            Reg::Hl => self.set_hl(value),
            Reg::Ix => self.ix = value,
            Reg::Iy => self.iy = value,
            Reg::AfAlt => self.af_alt = value,
            Reg::BcAlt => self.bc_alt = value,
            Reg::DeAlt => self.de_alt = value,
            Reg::HlAlt => self.hl_alt = value,
            Reg::A => self.a = lo,
            Reg::F => self.f = lo,
            Reg::B => self.b = lo,
            Reg::C => self.c = lo,
            Reg::D => self.d = lo,
            Reg::E => self.e = lo,
            Reg::H => self.h = lo,
            Reg::L => self.l = lo,
            Reg::Ixh => self.ix = (self.ix & 0x00FF) | (u16::from(lo) << 8),
            Reg::Ixl => self.ix = (self.ix & 0xFF00) | u16::from(lo),
            Reg::Iyh => self.iy = (self.iy & 0x00FF) | (u16::from(lo) << 8),
            Reg::Iyl => self.iy = (self.iy & 0xFF00) | u16::from(lo),
            Reg::I => self.i = lo,
            Reg::R => self.r = lo,
            Reg::Im => self.im = lo.min(2),
            Reg::Iff1 => self.iff1 = value != 0,
            Reg::Iff2 => self.iff2 = value != 0,
        }
    }
}

/// Register names accepted by the debugger and the expression evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Pc,
    Sp,
    Af,
    Bc,
    De,
    Hl,
    Ix,
    Iy,
    AfAlt,
    BcAlt,
    DeAlt,
    HlAlt,
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
    Ixh,
    Ixl,
    Iyh,
    Iyl,
    I,
    R,
    Im,
    Iff1,
    Iff2,
}

impl Reg {
    pub const ALL: [Reg; 29] = [
        Reg::Pc,
        Reg::Sp,
        Reg::Af,
        Reg::Bc,
        Reg::De,
        Reg::Hl,
        Reg::Ix,
        Reg::Iy,
        Reg::AfAlt,
        Reg::BcAlt,
        Reg::DeAlt,
        Reg::HlAlt,
        Reg::A,
        Reg::F,
        Reg::B,
        Reg::C,
        Reg::D,
        Reg::E,
        Reg::H,
        Reg::L,
        Reg::Ixh,
        Reg::Ixl,
        Reg::Iyh,
        Reg::Iyl,
        Reg::I,
        Reg::R,
        Reg::Im,
        Reg::Iff1,
        Reg::Iff2,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Reg::Pc => "pc",
            Reg::Sp => "sp",
            Reg::Af => "af",
            Reg::Bc => "bc",
            Reg::De => "de",
            Reg::Hl => "hl",
            Reg::Ix => "ix",
            Reg::Iy => "iy",
            Reg::AfAlt => "af'",
            Reg::BcAlt => "bc'",
            Reg::DeAlt => "de'",
            Reg::HlAlt => "hl'",
            Reg::A => "a",
            Reg::F => "f",
            Reg::B => "b",
            Reg::C => "c",
            Reg::D => "d",
            Reg::E => "e",
            Reg::H => "h",
            Reg::L => "l",
            Reg::Ixh => "ixh",
            Reg::Ixl => "ixl",
            Reg::Iyh => "iyh",
            Reg::Iyl => "iyl",
            Reg::I => "i",
            Reg::R => "r",
            Reg::Im => "im",
            Reg::Iff1 => "iff1",
            Reg::Iff2 => "iff2",
        }
    }

    /// True for registers that hold a single byte (or a flag).
    #[must_use]
    pub const fn is_8bit(self) -> bool {
        !matches!(
            self,
            Reg::Pc
                | Reg::Sp
                | Reg::Af
                | Reg::Bc
                | Reg::De
                | Reg::Hl
                | Reg::Ix
                | Reg::Iy
                | Reg::AfAlt
                | Reg::BcAlt
                | Reg::DeAlt
                | Reg::HlAlt
        )
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown register '{0}'")]
pub struct UnknownRegister(pub String);

impl FromStr for Reg {
    type Err = UnknownRegister;

    /// Case-insensitive. Alternate pairs are written `af'` or `af2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = match lower.strip_suffix('2') {
            Some(base) if matches!(base, "af" | "bc" | "de" | "hl") => format!("{base}'"),
            _ => lower,
        };
        Reg::ALL
            .into_iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| UnknownRegister(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_into_bytes() {
        let mut regs = Registers::default();
        regs.set_hl(0x1234);
        assert_eq!((regs.h, regs.l), (0x12, 0x34));
        regs.set(Reg::Ixl, 0xAB);
        regs.set(Reg::Ixh, 0xCD);
        assert_eq!(regs.ix, 0xCDAB);
    }

    #[test]
    fn refresh_keeps_bit_7() {
        let mut regs = Registers {
            r: 0xFF,
            ..Registers::default()
        };
        regs.inc_r(1);
        assert_eq!(regs.r, 0x80);
    }

    #[test]
    fn parses_register_names() {
        assert_eq!("HL".parse::<Reg>(), Ok(Reg::Hl));
        assert_eq!("de'".parse::<Reg>(), Ok(Reg::DeAlt));
        assert_eq!("de2".parse::<Reg>(), Ok(Reg::DeAlt));
        assert!("xy".parse::<Reg>().is_err());
    }
}
