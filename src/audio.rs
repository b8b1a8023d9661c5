// Audio sampling from the OUTX DAC.
//
// OUTX carries a 4-bit sample in its upper nibble, latched by the CPU on
// every rising edge of OUT bit 6 (once per scanline when the ROM's audio
// driver runs). This module resamples that signal to the host rate with a
// phase accumulator, strips the DC offset with a one-pole high-pass, and
// hands PCM to the shell through a lock-free SPSC ring.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::cpu::Cpu;

pub const SAMPLE_RATE: u32 = 44_100;
pub const BUFFER_SIZE: usize = 2048;
pub const NUM_BUFFERS: usize = 4;

// DC-removal filter coefficient.
const HPF_ALPHA: f32 = 0.99;

/// PCM sampler fed from the CPU's OUTX register.
///
/// The producer side lives here and is serviced by [`Audio::tick`] on the
/// emulation thread. The consumer side can stay in place for
/// single-threaded shells (via [`Audio::read_samples`]) or be moved to the
/// audio callback thread with [`Audio::take_consumer`]. When the ring is
/// full new samples are dropped; unread samples are never overwritten.
pub struct Audio {
    sample_rate: u32,
    cycle_counter: u32,
    bias: f32,
    volume: f32,
    mute: bool,
    producer: HeapProd<f32>,
    consumer: Option<HeapCons<f32>>,
}

/// Detached consumer half of the sample ring, safe to move to the host
/// audio callback thread.
pub struct AudioConsumer {
    inner: HeapCons<f32>,
}

impl Default for Audio {
    fn default() -> Self {
        Self::new()
    }
}

impl Audio {
    pub fn new() -> Self {
        Self::with_sample_rate(SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        let ring = HeapRb::<f32>::new(BUFFER_SIZE * NUM_BUFFERS);
        let (producer, consumer) = ring.split();
        Self {
            sample_rate,
            cycle_counter: 0,
            bias: 0.0,
            volume: 1.0,
            mute: false,
            producer,
            consumer: Some(consumer),
        }
    }

    /// Clear filter state and drop any queued samples still reachable.
    /// (A detached consumer keeps its queue; the callback drains it.)
    pub fn reset(&mut self) {
        self.cycle_counter = 0;
        self.bias = 0.0;
        if let Some(consumer) = &mut self.consumer {
            while consumer.try_pop().is_some() {}
        }
    }

    /// Observe the post-execute CPU state for one clock cycle, emitting a
    /// sample whenever the phase accumulator crosses the CPU clock rate.
    pub fn tick(&mut self, cpu: &Cpu) {
        self.cycle_counter += self.sample_rate;
        while self.cycle_counter >= cpu.hz() {
            self.cycle_counter -= cpu.hz();

            // Upper nibble of OUTX, mapped into [0, 1.875].
            let raw = (cpu.outx() >> 4) as f32 / 8.0;

            // One-pole high-pass: the running bias tracks the DC level.
            self.bias = HPF_ALPHA * self.bias + (1.0 - HPF_ALPHA) * raw;
            let mut sample = (raw - self.bias) * self.volume;
            sample = sample.clamp(-1.0, 1.0);
            if self.mute {
                sample = 0.0;
            }

            // Drop on full: the shell fell behind, never block the core.
            let _ = self.producer.try_push(sample);
        }
    }

    /// Dequeue up to `out.len()` samples. Short reads are normal; the
    /// shell pads with silence. Returns 0 once the consumer is detached.
    pub fn read_samples(&mut self, out: &mut [f32]) -> usize {
        match &mut self.consumer {
            Some(consumer) => pop_into(consumer, out),
            None => 0,
        }
    }

    pub fn available_samples(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        BUFFER_SIZE * NUM_BUFFERS
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    /// Detach the consumer half for the audio callback thread. Returns
    /// `None` if it was already taken.
    pub fn take_consumer(&mut self) -> Option<AudioConsumer> {
        self.consumer.take().map(|inner| AudioConsumer { inner })
    }
}

impl AudioConsumer {
    pub fn read_samples(&mut self, out: &mut [f32]) -> usize {
        pop_into(&mut self.inner, out)
    }

    pub fn available_samples(&self) -> usize {
        self.inner.occupied_len()
    }
}

fn pop_into(consumer: &mut HeapCons<f32>, out: &mut [f32]) -> usize {
    let mut read = 0;
    for slot in out.iter_mut() {
        match consumer.try_pop() {
            Some(sample) => {
                *slot = sample;
                read += 1;
            }
            None => break,
        }
    }
    read
}
