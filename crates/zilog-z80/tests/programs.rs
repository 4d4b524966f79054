//! Whole-program checks against the public CPU API.

use emu_core::{Cpu, Serializable, SimpleBus, state};
use proptest::prelude::*;
use zilog_z80::{InterruptConfig, Reg, Z80};

fn make_machine(code: &[u8]) -> (Z80, SimpleBus) {
    let mut bus = SimpleBus::new();
    bus.load(0x8000, code);
    let mut cpu = Z80::new(InterruptConfig {
        periodic: false,
        ..InterruptConfig::default()
    });
    cpu.set_register(Reg::Pc, 0x8000);
    cpu.set_register(Reg::Sp, 0xFF00);
    (cpu, bus)
}

/// Run until PC reaches `stop`, with a step limit.
fn run_to(cpu: &mut Z80, bus: &mut SimpleBus, stop: u16) -> u64 {
    let mut t = 0u64;
    for _ in 0..100_000 {
        if cpu.pc() == stop {
            return t;
        }
        t += u64::from(cpu.step(bus));
    }
    panic!("did not reach {stop:04X}");
}

#[test]
fn sums_a_table_with_a_subroutine() {
    // 8000: LD HL,table; LD B,4; XOR A
    // 8006: CALL add; DJNZ -5
    // 800B: HALT
    // 800C: add: ADD A,(HL); INC HL; RET
    // 8010: table 1,2,3,4
    let code = [
        0x21, 0x10, 0x80, 0x06, 0x04, 0xAF, 0xCD, 0x0C, 0x80, 0x10, 0xFB, 0x76, 0x86, 0x23,
        0xC9, 0x00, 0x01, 0x02, 0x03, 0x04,
    ];
    let (mut cpu, mut bus) = make_machine(&code);
    run_to(&mut cpu, &mut bus, 0x800B);
    cpu.step(&mut bus);
    assert!(cpu.is_halted());
    assert_eq!(cpu.registers().a, 10);
    assert_eq!(cpu.registers().sp, 0xFF00);
}

#[test]
fn inc_de_survives_save_and_restore() {
    // LD DE,$0010; INC DE
    let (mut cpu, mut bus) = make_machine(&[0x11, 0x10, 0x00, 0x13]);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().de(), 0x0011);

    let saved = state::save(&cpu);
    let mut restored = Z80::new(InterruptConfig::default());
    state::restore(&mut restored, &saved).unwrap();
    assert_eq!(restored.registers().de(), 0x0011);
    assert_eq!(restored.pc(), 0x8004);
}

proptest! {
    #[test]
    fn register_state_round_trips(
        pairs in proptest::array::uniform12(any::<u16>()),
        i in any::<u8>(),
        r in any::<u8>(),
        im in 0u8..3,
        iff1 in any::<bool>(),
        iff2 in any::<bool>(),
    ) {
        let mut cpu = Z80::new(InterruptConfig::default());
        let names = [
            Reg::Pc, Reg::Sp, Reg::Af, Reg::Bc, Reg::De, Reg::Hl,
            Reg::Ix, Reg::Iy, Reg::AfAlt, Reg::BcAlt, Reg::DeAlt, Reg::HlAlt,
        ];
        for (reg, value) in names.into_iter().zip(pairs) {
            cpu.set_register(reg, value);
        }
        cpu.set_register(Reg::I, u16::from(i));
        cpu.set_register(Reg::R, u16::from(r));
        cpu.set_register(Reg::Im, u16::from(im));
        cpu.set_register(Reg::Iff1, u16::from(iff1));
        cpu.set_register(Reg::Iff2, u16::from(iff2));

        let bytes = state::save(&cpu);
        prop_assert_eq!(bytes.len(), cpu.serialized_size());
        let mut restored = Z80::new(InterruptConfig::default());
        state::restore(&mut restored, &bytes).unwrap();
        prop_assert_eq!(restored.registers(), cpu.registers());
    }
}
