#[cfg(test)]
mod tests;

use std::error::Error;
use std::path::Path;

use crate::audio::Audio;
use crate::cpu::{
    Cpu, CpuConfig, BTN_A, BTN_B, BTN_DOWN, BTN_LEFT, BTN_RIGHT, BTN_SELECT, BTN_START, BTN_UP,
};
use crate::loader::gt1::Gt1Program;
use crate::loader::Loader;
use crate::vga::Vga;

/// Logical (active-high) gamepad buttons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    fn mask(self) -> u8 {
        match self {
            Button::A => BTN_A,
            Button::B => BTN_B,
            Button::Select => BTN_SELECT,
            Button::Start => BTN_START,
            Button::Up => BTN_UP,
            Button::Down => BTN_DOWN,
            Button::Left => BTN_LEFT,
            Button::Right => BTN_RIGHT,
        }
    }
}

/// The whole machine: CPU plus the three observers that hang off its
/// output pins, ticked in lock-step.
///
/// Per tick: gamepad state reaches the input register first (suppressed
/// while the loader owns the port), the CPU executes, then VGA, audio,
/// and loader observe the post-execute state. The loader runs last so
/// the bit it shifts is in place before the next instruction reads it.
pub struct Emulator {
    pub cpu: Cpu,
    pub vga: Vga,
    pub audio: Audio,
    pub loader: Loader,
    buttons: u8,
}

#[derive(bincode::Encode, bincode::Decode)]
struct SaveState {
    cpu: Cpu,
    vga: Vga,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_config(CpuConfig::default())
    }

    pub fn with_config(config: CpuConfig) -> Self {
        Self {
            cpu: Cpu::with_config(config),
            vga: Vga::new(),
            audio: Audio::new(),
            loader: Loader::new(),
            buttons: 0,
        }
    }

    pub fn load_rom_bytes(&mut self, data: &[u8]) -> usize {
        self.cpu.load_rom_bytes(data)
    }

    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Box<dyn Error>> {
        self.cpu.load_rom_file(path)
    }

    /// Parse a GT1 file and begin streaming it into the machine.
    pub fn load_gt1_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Box<dyn Error>> {
        let program = Gt1Program::from_file(path)?;
        self.start_loader(program);
        Ok(())
    }

    /// Begin a GT1 upload; resets the CPU into the ROM menu first.
    pub fn start_loader(&mut self, program: Gt1Program) {
        self.loader.start(&mut self.cpu, program);
    }

    pub fn cancel_loader(&mut self) {
        self.loader.reset(&mut self.cpu);
    }

    pub fn loader_active(&self) -> bool {
        self.loader.is_active()
    }

    /// Reset everything except memory contents and any loaded program.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.vga.reset();
        self.audio.reset();
        self.loader.reset(&mut self.cpu);
    }

    /// Advance the whole machine by one clock cycle.
    pub fn tick(&mut self) {
        if !self.loader.is_active() {
            self.cpu.set_input(self.buttons ^ 0xFF);
        }
        self.cpu.tick();
        self.vga.tick(&self.cpu);
        self.audio.tick(&self.cpu);
        if self.loader.is_active() {
            self.loader.tick(&mut self.cpu);
        }
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Run one display frame's worth of cycles (1/60 s of machine time).
    /// Returns true if the raster completed a field along the way.
    pub fn run_frame(&mut self) -> bool {
        self.run(u64::from(self.cpu.hz() / 60));
        self.vga.frame_ready()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.buttons |= button.mask();
        } else {
            self.buttons &= !button.mask();
        }
    }

    /// Replace the whole active-high button mask at once.
    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn framebuffer(&self) -> &[u8] {
        self.vga.framebuffer()
    }

    pub fn frame_ready(&mut self) -> bool {
        self.vga.frame_ready()
    }

    pub fn frame_count(&self) -> u32 {
        self.vga.frame_count()
    }

    pub fn cycles(&self) -> u64 {
        self.cpu.cycles()
    }

    pub fn save_state_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let state = SaveState {
            cpu: self.cpu.clone(),
            vga: self.vga.clone(),
        };
        let bytes = bincode::encode_to_vec(&state, bincode::config::standard())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Restore a saved machine. Cancels any in-flight GT1 upload (a
    /// mid-protocol snapshot has no meaning on the restored machine) and
    /// discards stale queued audio.
    pub fn load_state_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Box<dyn Error>> {
        let bytes = std::fs::read(path)?;
        let (state, _): (SaveState, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())?;
        self.cpu = state.cpu;
        self.vga = state.vga;
        self.loader = Loader::new();
        self.audio.reset();
        Ok(())
    }
}
