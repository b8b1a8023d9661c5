use super::*;
use crate::loader::gt1::Gt1Segment;

/// Assemble one instruction word: OP[15:13] MODE[12:10] BUS[9:8] D[7:0].
fn inst(op: u16, mode: u16, bus: u16, d: u16) -> u16 {
    (op << 13) | (mode << 10) | (bus << 8) | d
}

/// `LD $v,OUT`: drive the sync/color pins from an immediate.
fn ld_out(value: u16) -> u16 {
    inst(0, 6, 0, value)
}

#[test]
fn runs_a_simple_program() {
    let mut emu = Emulator::new();
    let rom = emu.cpu.rom_mut();
    rom[0] = inst(0, 0, 0, 0x42); // LD $42
    rom[1] = inst(4, 0, 0, 0x01); // ADD $01
    rom[2] = inst(6, 0, 2, 0x30); // ST [$30],AC

    emu.run(3);

    assert_eq!(emu.cpu.ac, 0x43);
    assert_eq!(emu.cpu.ram()[0x30], 0x43);
    assert_eq!(emu.cycles(), 3);
}

#[test]
fn gamepad_reaches_the_input_register_before_the_instruction() {
    let mut emu = Emulator::new();
    emu.cpu.rom_mut()[0] = inst(0, 0, 3, 0); // LD IN

    emu.set_button(Button::A, true);
    emu.tick();

    // Active low: A pressed clears bit 7.
    assert_eq!(emu.cpu.ac, 0x7F);

    emu.set_button(Button::A, false);
    emu.set_button(Button::Down, true);
    emu.cpu.pc = 0;
    emu.cpu.next_pc = 1;
    emu.tick();
    assert_eq!(emu.cpu.ac, !BTN_DOWN);
}

#[test]
fn run_frame_covers_one_sixtieth_of_a_second() {
    let mut emu = Emulator::new();
    let completed = emu.run_frame();

    assert_eq!(emu.cycles(), u64::from(emu.cpu.hz() / 60));
    // An all-zero ROM never toggles the sync pins.
    assert!(!completed);
    assert_eq!(emu.frame_count(), 0);
}

#[test]
fn reset_returns_the_machine_to_power_on() {
    let mut emu = Emulator::new();
    emu.cpu.rom_mut()[0] = inst(0, 0, 0, 0x11);
    emu.run(7);
    emu.reset();

    assert_eq!(emu.cycles(), 0);
    assert_eq!(emu.cpu.pc, 0);
    assert_eq!(emu.cpu.in_reg, 0xFF);
    assert!(!emu.loader_active());
}

#[test]
fn savestate_round_trip() {
    let path = std::env::temp_dir().join("gigatron-savestate-roundtrip.state");

    let mut emu = Emulator::new();
    let rom = emu.cpu.rom_mut();
    rom[0] = inst(0, 0, 0, 0x42); // LD $42
    rom[1] = inst(6, 0, 2, 0x30); // ST [$30],AC
    emu.run(2);
    let ram_before = emu.cpu.ram().to_vec();

    emu.save_state_to_file(&path).unwrap();

    emu.run(20);
    emu.cpu.ac = 0x99;
    emu.cpu.ram_mut()[0x30] = 0x00;
    emu.start_loader(Gt1Program {
        segments: vec![Gt1Segment {
            address: 0x0200,
            data: vec![1, 2, 3],
        }],
        start_address: 0,
        has_start_address: false,
    });
    assert!(emu.loader_active());

    emu.load_state_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(emu.cpu.ac, 0x42);
    assert_eq!(emu.cpu.ram()[0x30], 0x42);
    assert_eq!(emu.cycles(), 2);
    assert_eq!(emu.cpu.ram(), &ram_before[..]);
    // A mid-protocol upload does not survive a state load.
    assert!(!emu.loader_active());
}

#[test]
fn loader_streams_a_program_over_rom_generated_sync() {
    let mut emu = Emulator::new();

    // A ROM whose only job is to emit video timing: sixteen HSYNC pulses,
    // one VSYNC pulse, repeat. The loader clocks its serial protocol off
    // these edges exactly as it would off a real ROM's.
    {
        let rom = emu.cpu.rom_mut();
        let mut addr = 0;
        for _ in 0..16 {
            rom[addr] = ld_out(0x80); // HSYNC low
            rom[addr + 1] = ld_out(0xC0); // HSYNC rising edge
            addr += 2;
        }
        rom[addr] = ld_out(0x40); // VSYNC low
        rom[addr + 1] = ld_out(0xC0); // VSYNC rising edge
        rom[addr + 2] = inst(7, 7, 0, 0); // BRA $00 (delay slot at +3 is LD $0)
    }

    let payload: Vec<u8> = (0..70u8).collect();
    emu.start_loader(Gt1Program {
        segments: vec![Gt1Segment {
            address: 0x0200,
            data: payload,
        }],
        start_address: 0x0200,
        has_start_address: true,
    });
    assert!(emu.loader_active());

    // Boot wait (100 frames) + menu walk (72) + four protocol frames at
    // ~33 loops each fits comfortably in 100k cycles.
    emu.run(100_000);

    assert!(emu.loader.is_complete());
    assert!(!emu.loader_active());
    assert_eq!(emu.loader.progress(), 1.0);
    assert_eq!(emu.cpu.in_reg, 0xFF);
    // The raster saw every one of those VSYNC pulses too.
    assert!(emu.frame_count() > 100);
}

#[test]
fn cancel_loader_releases_the_machine() {
    let mut emu = Emulator::new();
    emu.start_loader(Gt1Program {
        segments: vec![Gt1Segment {
            address: 0x0200,
            data: vec![0xAA; 16],
        }],
        start_address: 0,
        has_start_address: false,
    });
    emu.run(1000);
    assert!(emu.loader_active());

    emu.cancel_loader();
    assert!(!emu.loader_active());
    assert_eq!(emu.cpu.in_reg, 0xFF);

    // With the loader gone, the gamepad owns the port again.
    emu.set_button(Button::Start, true);
    emu.tick();
    assert_eq!(emu.cpu.in_reg, !BTN_START);
}
