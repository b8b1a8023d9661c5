// GT1 serial loader.
//
// The Gigatron's ROM menu contains a "Loader" application that reads a
// program bit-serially from the input port: the sender shifts one bit per
// HSYNC pulse, framed by VSYNC. This module impersonates that sender: it
// resets the machine, walks the menu by synthesizing gamepad presses, then
// streams the GT1 payload in 60-byte frames with a running checksum.
//
// Protocol details match the official Gigatron web emulator:
//   - a bit is shifted into the input register BEFORE waiting for the
//     next HSYNC rising edge, MSB first;
//   - the checksum accumulates ACROSS frames and picks up an extra
//     `firstByte << 6` after the first byte of every frame;
//   - after the 60-byte payload the sender transmits `-checksum`, and
//     that negated value seeds the next frame's accumulator;
//   - one deliberately bad-checksum frame (accumulator seeded with 0
//     instead of 0x67) resynchronizes the on-target loader first.

pub mod gt1;


use crate::cpu::{Cpu, BTN_A, BTN_DOWN, OUT_HSYNC, OUT_VSYNC};
use self::gt1::Gt1Program;

/// Payload bytes per protocol frame; shorter frames are zero-padded.
pub const MAX_PAYLOAD: usize = 60;
/// First byte of every data frame: ASCII 'L'.
pub const START_OF_FRAME: u8 = 0x4C;
/// Checksum seed expected by the on-target loader: ASCII 'g'.
pub const INIT_CHECKSUM: u8 = 0x67;

// Menu navigation timing, in VSYNC frames.
const RESET_WAIT_FRAMES: u32 = 100;
const MENU_DOWN_PRESSES: u32 = 5;
const BUTTON_A_UP_TIME: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    ResetWait,
    MenuNav,
    SyncFrame,
    Sending,
    StartCmd,
    Complete,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    WaitVsyncNeg,
    WaitHsync1,
    WaitHsync2,
    SendFirstByte,
    SendLength,
    SendAddrLow,
    SendAddrHigh,
    SendPayload,
    SendChecksum,
    Done,
}

/// Serial GT1 uploader. Owns the parsed program for the duration of a
/// load; drives nothing but the CPU's input register.
pub struct Loader {
    state: LoaderState,
    program: Option<Gt1Program>,
    current_segment: usize,
    segment_offset: usize,
    frame: FrameState,
    frame_first_byte: u8,
    frame_length: u8,
    frame_addr: u16,
    frame_payload: [u8; MAX_PAYLOAD],
    payload_index: usize,
    current_byte: u8,
    bits_remaining: u8,
    checksum: u8,
    vsync_count: u32,
    prev_out: u8,
    error: Option<&'static str>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            state: LoaderState::Idle,
            program: None,
            current_segment: 0,
            segment_offset: 0,
            frame: FrameState::WaitVsyncNeg,
            frame_first_byte: 0,
            frame_length: 0,
            frame_addr: 0,
            frame_payload: [0; MAX_PAYLOAD],
            payload_index: 0,
            current_byte: 0,
            bits_remaining: 0,
            checksum: 0,
            vsync_count: 0,
            prev_out: 0,
            error: None,
        }
    }

    /// Begin uploading `program`. Resets the CPU so the machine boots into
    /// the ROM menu, then waits out the boot animation before navigating.
    pub fn start(&mut self, cpu: &mut Cpu, program: Gt1Program) {
        self.program = Some(program);
        self.current_segment = 0;
        self.segment_offset = 0;
        self.frame = FrameState::WaitVsyncNeg;
        self.bits_remaining = 0;
        self.payload_index = 0;
        self.checksum = 0;
        self.vsync_count = 0;
        self.error = None;

        cpu.reset();
        self.prev_out = cpu.out();
        self.set_state(LoaderState::ResetWait);
    }

    /// Cancel any load in progress, drop the program, release the input
    /// port. Safe to call at any time.
    pub fn reset(&mut self, cpu: &mut Cpu) {
        self.program = None;
        self.current_segment = 0;
        self.segment_offset = 0;
        self.frame = FrameState::WaitVsyncNeg;
        self.bits_remaining = 0;
        self.checksum = 0;
        self.vsync_count = 0;
        self.prev_out = 0;
        self.error = None;
        self.set_state(LoaderState::Idle);
        cpu.set_input(0xFF);
    }

    /// Advance the protocol by one tick against the post-execute CPU
    /// state. Must run after `cpu.tick()` so edges are observed in order.
    pub fn tick(&mut self, cpu: &mut Cpu) {
        match self.state {
            LoaderState::Idle | LoaderState::Complete | LoaderState::Error => {}

            LoaderState::ResetWait => {
                if self.vsync_rose(cpu) {
                    self.vsync_count += 1;
                    if self.vsync_count >= RESET_WAIT_FRAMES {
                        self.vsync_count = 0;
                        self.set_state(LoaderState::MenuNav);
                    }
                }
            }

            LoaderState::MenuNav => {
                if self.vsync_rose(cpu) {
                    self.vsync_count += 1;
                    self.menu_step(cpu);
                }
            }

            LoaderState::SyncFrame => {
                if self.process_frame(cpu) {
                    // The deliberately unverifiable frame went out; from
                    // here the on-target loader expects the real seed.
                    self.checksum = INIT_CHECKSUM;
                    self.current_segment = 0;
                    self.segment_offset = 0;
                    self.set_state(LoaderState::Sending);
                    if !self.setup_next_data_frame() {
                        self.finish(cpu);
                    }
                }
            }

            LoaderState::Sending => {
                if self.process_frame(cpu) && !self.setup_next_data_frame() {
                    self.finish(cpu);
                }
            }

            LoaderState::StartCmd => {
                if self.process_frame(cpu) {
                    self.set_state(LoaderState::Complete);
                    cpu.set_input(0xFF);
                }
            }
        }

        self.prev_out = cpu.out();
    }

    /// Menu walk, one action per VSYNC: five DOWN presses (press on odd
    /// frames, release on even), then A, then the long A-release hold the
    /// ROM needs before it starts sampling the serial stream.
    fn menu_step(&mut self, cpu: &mut Cpu) {
        let count = self.vsync_count;
        if count <= MENU_DOWN_PRESSES * 2 {
            if count % 2 == 1 {
                cpu.set_input(BTN_DOWN ^ 0xFF);
            } else {
                cpu.set_input(0xFF);
            }
        } else if count == MENU_DOWN_PRESSES * 2 + 1 {
            cpu.set_input(BTN_A ^ 0xFF);
        } else if count == MENU_DOWN_PRESSES * 2 + 2 {
            cpu.set_input(0xFF);
        } else if count >= MENU_DOWN_PRESSES * 2 + 2 + BUTTON_A_UP_TIME {
            // Sync frame: first byte 0xFF, empty payload, checksum seeded
            // with 0 so the target rejects it and resynchronizes.
            self.checksum = 0;
            self.prepare_frame(0xFF, 0, &[]);
            self.set_state(LoaderState::SyncFrame);
        }
    }

    /// Frame sub-machine, clocked by HSYNC rising edges. Returns true
    /// when the trailing checksum byte has finished shifting out.
    fn process_frame(&mut self, cpu: &mut Cpu) -> bool {
        match self.frame {
            FrameState::WaitVsyncNeg => {
                if self.vsync_fell(cpu) {
                    self.frame = FrameState::WaitHsync1;
                }
            }

            FrameState::WaitHsync1 => {
                if self.hsync_rose(cpu) {
                    self.frame = FrameState::WaitHsync2;
                }
            }

            FrameState::WaitHsync2 => {
                if self.hsync_rose(cpu) {
                    let first = self.frame_first_byte;
                    self.send_data_bits(cpu, first, 8);
                    self.frame = FrameState::SendFirstByte;
                }
            }

            FrameState::SendFirstByte => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        // Protocol quirk: the first byte contributes twice,
                        // once plainly and once shifted left by six.
                        let first = self.frame_first_byte;
                        self.add_checksum(first << 6);
                        self.add_checksum(self.frame_length);
                        let aligned = self.frame_length << 2;
                        self.load_bits(cpu, aligned, 6);
                        self.frame = FrameState::SendLength;
                    }
                }
            }

            FrameState::SendLength => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        let lo = self.frame_addr as u8;
                        self.send_data_bits(cpu, lo, 8);
                        self.frame = FrameState::SendAddrLow;
                    }
                }
            }

            FrameState::SendAddrLow => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        let hi = (self.frame_addr >> 8) as u8;
                        self.send_data_bits(cpu, hi, 8);
                        self.frame = FrameState::SendAddrHigh;
                    }
                }
            }

            FrameState::SendAddrHigh => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        self.payload_index = 0;
                        let byte = self.frame_payload[0];
                        self.send_data_bits(cpu, byte, 8);
                        self.frame = FrameState::SendPayload;
                    }
                }
            }

            FrameState::SendPayload => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        self.payload_index += 1;
                        if self.payload_index >= MAX_PAYLOAD {
                            // Negate and send; the negated value persists
                            // as the running checksum for the next frame.
                            self.checksum = self.checksum.wrapping_neg();
                            let trailer = self.checksum;
                            self.load_bits(cpu, trailer, 8);
                            self.frame = FrameState::SendChecksum;
                        } else {
                            let byte = self.frame_payload[self.payload_index];
                            self.send_data_bits(cpu, byte, 8);
                        }
                    }
                }
            }

            FrameState::SendChecksum => {
                if self.hsync_rose(cpu) {
                    if self.bits_remaining > 0 {
                        self.shift_bit(cpu);
                    } else {
                        self.frame = FrameState::Done;
                        return true;
                    }
                }
            }

            FrameState::Done => return true,
        }

        false
    }

    /// Stage the next 60-byte chunk of the program. Frames never span
    /// segments. Returns false once every segment is exhausted.
    fn setup_next_data_frame(&mut self) -> bool {
        let (next, segment_end) = {
            let program = match &self.program {
                Some(p) => p,
                None => return false,
            };
            let mut segment = self.current_segment;
            let mut offset = self.segment_offset;
            let mut found = None;
            while segment < program.segments.len() {
                let data = &program.segments[segment].data;
                if offset < data.len() {
                    let len = (data.len() - offset).min(MAX_PAYLOAD);
                    let addr = program.segments[segment].address.wrapping_add(offset as u16);
                    let mut payload = [0u8; MAX_PAYLOAD];
                    payload[..len].copy_from_slice(&data[offset..offset + len]);
                    found = Some((segment, offset + len, addr, payload, len));
                    break;
                }
                segment += 1;
                offset = 0;
            }
            (found, segment)
        };

        match next {
            Some((segment, new_offset, addr, payload, len)) => {
                self.current_segment = segment;
                self.segment_offset = new_offset;
                self.prepare_frame(START_OF_FRAME, addr, &payload[..len]);
                true
            }
            None => {
                self.current_segment = segment_end;
                self.segment_offset = 0;
                false
            }
        }
    }

    /// All payload sent: issue the start command if the program has an
    /// entry point, otherwise finish and release the input port.
    fn finish(&mut self, cpu: &mut Cpu) {
        let start = self
            .program
            .as_ref()
            .filter(|p| p.has_start_address)
            .map(|p| p.start_address);
        match start {
            Some(addr) => {
                // Checksum carries straight through from the data frames.
                self.prepare_frame(START_OF_FRAME, addr, &[]);
                self.set_state(LoaderState::StartCmd);
            }
            None => {
                self.set_state(LoaderState::Complete);
                cpu.set_input(0xFF);
            }
        }
    }

    /// Stage a frame. The checksum is deliberately left alone: it belongs
    /// to the cross-frame accumulator, not to any one frame.
    fn prepare_frame(&mut self, first_byte: u8, addr: u16, payload: &[u8]) {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        self.frame_first_byte = first_byte;
        self.frame_length = payload.len() as u8;
        self.frame_addr = addr;
        self.frame_payload = [0; MAX_PAYLOAD];
        self.frame_payload[..payload.len()].copy_from_slice(payload);
        self.frame = FrameState::WaitVsyncNeg;
        self.bits_remaining = 0;
        self.payload_index = 0;
    }

    /// Add `value` to the checksum, then start shifting it out.
    fn send_data_bits(&mut self, cpu: &mut Cpu, value: u8, bits: u8) {
        self.add_checksum(value);
        self.load_bits(cpu, value, bits);
    }

    /// Load a value and immediately shift its MSB; the shift happens
    /// before waiting for the next HSYNC edge, never after.
    fn load_bits(&mut self, cpu: &mut Cpu, value: u8, bits: u8) {
        self.current_byte = value;
        self.bits_remaining = bits;
        self.shift_bit(cpu);
    }

    fn shift_bit(&mut self, cpu: &mut Cpu) {
        let bit = (self.current_byte & 0x80 != 0) as u8;
        cpu.in_reg = (cpu.in_reg << 1) | bit;
        self.current_byte <<= 1;
        self.bits_remaining -= 1;
    }

    fn add_checksum(&mut self, value: u8) {
        self.checksum = self.checksum.wrapping_add(value);
    }

    fn vsync_rose(&self, cpu: &Cpu) -> bool {
        !self.prev_out & cpu.out() & OUT_VSYNC != 0
    }

    fn vsync_fell(&self, cpu: &Cpu) -> bool {
        self.prev_out & !cpu.out() & OUT_VSYNC != 0
    }

    fn hsync_rose(&self, cpu: &Cpu) -> bool {
        !self.prev_out & cpu.out() & OUT_HSYNC != 0
    }

    fn set_state(&mut self, state: LoaderState) {
        #[cfg(feature = "trace_loader")]
        if self.state != state {
            eprintln!("  loader: {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// True while a load is underway and the input port is owned here.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            LoaderState::Idle | LoaderState::Complete | LoaderState::Error
        )
    }

    pub fn is_complete(&self) -> bool {
        self.state == LoaderState::Complete
    }

    pub fn has_error(&self) -> bool {
        self.state == LoaderState::Error
    }

    pub fn error(&self) -> Option<&'static str> {
        self.error
    }

    /// Fraction of payload bytes handed to the frame machine, 0.0..=1.0.
    pub fn progress(&self) -> f32 {
        let program = match &self.program {
            Some(p) if !p.segments.is_empty() => p,
            _ => return 0.0,
        };
        match self.state {
            LoaderState::Complete => 1.0,
            LoaderState::Idle | LoaderState::Error => 0.0,
            _ => {
                let total = program.total_bytes();
                let mut sent = 0;
                for (i, segment) in program.segments.iter().enumerate() {
                    if i < self.current_segment {
                        sent += segment.data.len();
                    } else if i == self.current_segment {
                        sent += self.segment_offset;
                    }
                }
                if total > 0 {
                    sent as f32 / total as f32
                } else {
                    0.0
                }
            }
        }
    }
}
