
use std::error::Error;
use std::path::Path;

use rand::{thread_rng, Rng};

/// Default clock: 6.25 MHz (160 ns per instruction).
pub const CLOCK_HZ: u32 = 6_250_000;

/// Horizontal sync on OUT bit 6, active low.
pub const OUT_HSYNC: u8 = 0x40;
/// Vertical sync on OUT bit 7, active low.
pub const OUT_VSYNC: u8 = 0x80;

// Input port buttons, Famicom layout. Logical active-high; the register
// itself is driven active low (`buttons ^ 0xFF`).
pub const BTN_RIGHT: u8 = 0x01;
pub const BTN_LEFT: u8 = 0x02;
pub const BTN_DOWN: u8 = 0x04;
pub const BTN_UP: u8 = 0x08;
pub const BTN_START: u8 = 0x10;
pub const BTN_SELECT: u8 = 0x20;
pub const BTN_B: u8 = 0x40;
pub const BTN_A: u8 = 0x80;

// Instruction word: OP[15:13] | MODE[12:10] | BUS[9:8] | D[7:0]
const OP_LD: u8 = 0;
const OP_AND: u8 = 1;
const OP_OR: u8 = 2;
const OP_XOR: u8 = 3;
const OP_ADD: u8 = 4;
const OP_SUB: u8 = 5;
const OP_ST: u8 = 6;
const OP_BR: u8 = 7;

const BUS_D: u8 = 0;
const BUS_RAM: u8 = 1;
const BUS_AC: u8 = 2;
const BUS_IN: u8 = 3;

const MODE_D: u8 = 0;
const MODE_X: u8 = 1;
const MODE_YD: u8 = 2;
const MODE_YX: u8 = 3;
const MODE_D_X: u8 = 4;
const MODE_D_Y: u8 = 5;
const MODE_D_OUT: u8 = 6;
const MODE_YX_INC: u8 = 7;

const BR_JMP: u8 = 0;
const BR_GT: u8 = 1;
const BR_LT: u8 = 2;
const BR_NE: u8 = 3;
const BR_EQ: u8 = 4;
const BR_GE: u8 = 5;
const BR_LE: u8 = 6;
const BR_BRA: u8 = 7;

/// Memory geometry and clock rate. A zero field selects its default
/// (6.25 MHz, 16-bit ROM addresses, 17-bit RAM addresses so extended
/// 128K ROMs run out of the box).
#[derive(Clone, Copy, Debug)]
pub struct CpuConfig {
    pub hz: u32,
    pub rom_address_width: u32,
    pub ram_address_width: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            hz: CLOCK_HZ,
            rom_address_width: 16,
            ram_address_width: 17,
        }
    }
}

/// Gigatron TTL CPU.
///
/// Harvard architecture: instructions execute from a private 16-bit-word
/// ROM, data lives in byte-wide RAM. There are no flags and no interrupts;
/// every instruction takes exactly one cycle and the delayed `next_pc`
/// models the hardware pipeline (branches land after one delay slot).
#[derive(Clone, bincode::Encode, bincode::Decode)]
pub struct Cpu {
    hz: u32,
    rom: Vec<u16>,
    rom_mask: u16,
    ram: Vec<u8>,
    ram_mask: u32,
    pub pc: u16,
    pub next_pc: u16,
    pub ac: u8,
    pub x: u8,
    pub y: u8,
    pub out: u8,
    pub outx: u8,
    pub in_reg: u8,
    /// 128K+ expansion control register (bank select bits 7:6, SPI bit 0).
    pub ctrl: u16,
    /// XOR mask applied to RAM addresses with bit 15 set.
    bank: u32,
    /// CTRL value replaced by a store this tick, for external SPI glue.
    pub prev_ctrl: Option<u16>,
    /// SPI MISO latch, read in place of RAM while CTRL bit 0 is set.
    pub miso: u8,
    cycles: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self::with_config(CpuConfig::default())
    }

    pub fn with_config(config: CpuConfig) -> Self {
        let hz = if config.hz == 0 { CLOCK_HZ } else { config.hz };
        let rom_width = if config.rom_address_width == 0 {
            16
        } else {
            config.rom_address_width
        };
        let ram_width = if config.ram_address_width == 0 {
            17
        } else {
            config.ram_address_width
        };
        let rom_size = 1usize << rom_width;
        let ram_size = 1usize << ram_width;

        // Real hardware powers up with garbage in RAM and the Gigatron ROM
        // harvests it for entropy. Randomized once here, never on reset.
        let mut ram = vec![0u8; ram_size];
        thread_rng().fill(&mut ram[..]);

        let mut cpu = Self {
            hz,
            rom: vec![0; rom_size],
            rom_mask: (rom_size - 1) as u16,
            ram,
            ram_mask: (ram_size - 1) as u32,
            pc: 0,
            next_pc: 1,
            ac: 0,
            x: 0,
            y: 0,
            out: 0,
            outx: 0,
            in_reg: 0xFF,
            ctrl: 0x7C,
            bank: 0,
            prev_ctrl: None,
            miso: 0,
            cycles: 0,
        };
        cpu.reset();
        cpu
    }

    /// Return to the power-on register state. ROM and RAM are untouched.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.next_pc = 1;
        self.ac = 0;
        self.x = 0;
        self.y = 0;
        self.out = 0;
        self.outx = 0;
        self.in_reg = 0xFF;
        self.ctrl = 0x7C;
        self.bank = 0;
        self.prev_ctrl = None;
        self.miso = 0;
        self.cycles = 0;
    }

    /// Advance the machine by one clock cycle.
    pub fn tick(&mut self) {
        self.prev_ctrl = None;

        let pc = self.pc;
        self.pc = self.next_pc;
        self.next_pc = self.pc.wrapping_add(1) & self.rom_mask;

        let ir = self.rom[pc as usize];
        let op = ((ir >> 13) & 0x07) as u8;
        let mode = ((ir >> 10) & 0x07) as u8;
        let bus = ((ir >> 8) & 0x03) as u8;
        let d = (ir & 0xFF) as u8;

        match op {
            OP_LD | OP_AND | OP_OR | OP_XOR | OP_ADD | OP_SUB => {
                self.exec_alu(op, mode, bus, d)
            }
            OP_ST => self.exec_store(mode, bus, d),
            OP_BR => self.exec_branch(mode, bus, d),
            _ => unreachable!("opcode field is three bits"),
        }

        self.cycles += 1;
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Effective RAM address for the given mode. MODE 7 post-increments X.
    fn calc_addr(&mut self, mode: u8, d: u8) -> u16 {
        match mode {
            MODE_X => self.x as u16,
            MODE_YD => ((self.y as u16) << 8) | d as u16,
            MODE_YX => ((self.y as u16) << 8) | self.x as u16,
            MODE_YX_INC => {
                let addr = ((self.y as u16) << 8) | self.x as u16;
                self.x = self.x.wrapping_add(1);
                addr
            }
            // MODE_D, MODE_D_X, MODE_D_Y, MODE_D_OUT
            _ => d as u16,
        }
    }

    /// Bank translation: addresses with bit 15 set are XORed with the bank
    /// mask selected by CTRL, then everything is masked to the RAM size.
    fn translate(&self, addr: u16) -> usize {
        let mut phys = addr as u32;
        if phys & 0x8000 != 0 {
            phys ^= self.bank;
        }
        (phys & self.ram_mask) as usize
    }

    fn exec_alu(&mut self, op: u8, mode: u8, bus: u8, d: u8) {
        let b = match bus {
            BUS_D => d,
            BUS_RAM => {
                let addr = self.calc_addr(mode, d);
                if self.ctrl & 1 != 0 {
                    // SPI mode: reads come from the MISO latch, not RAM.
                    self.miso
                } else {
                    self.ram[self.translate(addr)]
                }
            }
            BUS_AC => self.ac,
            BUS_IN => self.in_reg,
            _ => unreachable!("bus field is two bits"),
        };

        let b = match op {
            OP_AND => self.ac & b,
            OP_OR => self.ac | b,
            OP_XOR => self.ac ^ b,
            OP_ADD => self.ac.wrapping_add(b),
            OP_SUB => self.ac.wrapping_sub(b),
            // OP_LD passes the bus value through.
            _ => b,
        };

        match mode {
            MODE_D | MODE_X | MODE_YD | MODE_YX => self.ac = b,
            MODE_D_X => self.x = b,
            MODE_D_Y => self.y = b,
            // MODE_D_OUT, MODE_YX_INC: the result drives OUT.
            _ => {
                let rising = !self.out & b;
                self.out = b;
                // Rising edge of OUT bit 6 clocks AC into OUTX (audio DAC).
                if rising & 0x40 != 0 {
                    self.outx = self.ac;
                }
            }
        }
    }

    fn exec_store(&mut self, mode: u8, bus: u8, d: u8) {
        let addr = self.calc_addr(mode, d);
        let mut write = true;

        let b = match bus {
            BUS_D => d,
            BUS_RAM => {
                if self.has_extended_ram() {
                    // ST [Y,X++],$xx on the 128K+ expansion is a CTRL
                    // register write; the RAM store is suppressed.
                    self.prev_ctrl = Some(self.ctrl);
                    self.ctrl = addr & 0x80FD;
                    self.bank = ((self.ctrl as u32 & 0xC0) << 9) ^ 0x8000;
                    write = false;
                    0
                } else {
                    // Undefined on the base board; stores zero.
                    0
                }
            }
            BUS_AC => self.ac,
            BUS_IN => self.in_reg,
            _ => unreachable!("bus field is two bits"),
        };

        if write {
            let phys = self.translate(addr);
            self.ram[phys] = b;
        }

        // These modes copy AC (not the stored value) into an index register.
        match mode {
            MODE_D_X => self.x = self.ac,
            MODE_D_Y => self.y = self.ac,
            _ => {}
        }
    }

    fn exec_branch(&mut self, mode: u8, bus: u8, d: u8) {
        // Conditions compare AC with bias 0x80 so they behave as signed.
        const ZERO: u8 = 0x80;
        let ac = self.ac ^ ZERO;

        let mut base = self.pc & 0xFF00;
        let condition = match mode {
            BR_JMP => {
                base = (self.y as u16) << 8;
                true
            }
            BR_GT => ac > ZERO,
            BR_LT => ac < ZERO,
            BR_NE => ac != ZERO,
            BR_EQ => ac == ZERO,
            BR_GE => ac >= ZERO,
            BR_LE => ac <= ZERO,
            // BR_BRA: always, within the current page.
            BR_BRA => true,
            _ => unreachable!("condition field is three bits"),
        };

        if condition {
            let offset = self.branch_offset(bus, d);
            self.next_pc = base | offset as u16;
        }
    }

    /// Branch target low byte from the bus. The RAM path reads the zero
    /// page raw: no bank translation, no SPI redirect.
    fn branch_offset(&self, bus: u8, d: u8) -> u8 {
        match bus {
            BUS_D => d,
            BUS_RAM => self.ram[(d as u32 & self.ram_mask) as usize],
            BUS_AC => self.ac,
            BUS_IN => self.in_reg,
            _ => unreachable!("bus field is two bits"),
        }
    }

    /// Load big-endian 16-bit instruction words. Returns the number of
    /// words stored; excess input and a trailing odd byte are ignored.
    pub fn load_rom_bytes(&mut self, data: &[u8]) -> usize {
        let words = (data.len() / 2).min(self.rom.len());
        for (i, pair) in data.chunks_exact(2).take(words).enumerate() {
            self.rom[i] = u16::from_be_bytes([pair[0], pair[1]]);
        }
        words
    }

    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Box<dyn Error>> {
        let data = std::fs::read(path)?;
        let words = self.load_rom_bytes(&data);
        if words == 0 {
            return Err("ROM file holds no complete instruction words".into());
        }
        Ok(words)
    }

    /// Drive the input port directly. The value is the raw (active low)
    /// register content; pass `buttons ^ 0xFF` for logical button masks.
    pub fn set_input(&mut self, value: u8) {
        self.in_reg = value;
    }

    pub fn out(&self) -> u8 {
        self.out
    }

    pub fn outx(&self) -> u8 {
        self.outx
    }

    pub fn hsync_active(&self) -> bool {
        self.out & OUT_HSYNC == 0
    }

    pub fn vsync_active(&self) -> bool {
        self.out & OUT_VSYNC == 0
    }

    /// Low six bits of OUT: RRGGBB, two bits per channel.
    pub fn color(&self) -> u8 {
        self.out & 0x3F
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn rom_size(&self) -> usize {
        self.rom.len()
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    pub fn has_extended_ram(&self) -> bool {
        self.ram.len() > 0x10000
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn rom_mut(&mut self) -> &mut [u16] {
        &mut self.rom
    }
}
