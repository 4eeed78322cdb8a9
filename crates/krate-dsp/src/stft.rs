//! Streaming STFT framer
//!
//! Turns a continuous sample stream into overlapping windowed analysis
//! frames and reconstructs the output by overlap-add. Hop is fixed at
//! N/4 (75 % overlap). End-to-end delay through analyze/synthesize is
//! exactly N samples, and the dry tap used by the unity-ratio fast path
//! is delayed by the same amount so both paths stay time-aligned.

use krate_core::{OverlapAddRing, RingBuffer, Sample};

use crate::window::{COLA_GAIN, hann};

#[derive(Debug, Clone)]
pub struct StftFramer {
    fft_size: usize,
    hop_size: usize,
    window: Vec<Sample>,
    input_ring: RingBuffer,
    output_ring: OverlapAddRing,
    hop_accum: usize,
}

impl StftFramer {
    pub fn new(fft_size: usize) -> Self {
        let hop_size = fft_size / 4;
        Self {
            fft_size,
            hop_size,
            window: hann(fft_size),
            // Input history must cover the N-sample dry delay plus the
            // frame being assembled.
            input_ring: RingBuffer::with_capacity(fft_size * 2),
            // Seeding the write pointer one hop ahead of the read
            // pointer makes the overlap-add delay come out at exactly
            // N: a frame triggered by sample n starts contributing at
            // output sample n + 1.
            output_ring: OverlapAddRing::with_capacity(fft_size * 4, hop_size),
            hop_accum: 0,
        }
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Push one input sample. Returns true when a full hop has
    /// accumulated and a frame is due.
    #[inline]
    pub fn push(&mut self, sample: Sample) -> bool {
        self.input_ring.push(sample);
        self.hop_accum += 1;
        if self.hop_accum == self.hop_size {
            self.hop_accum = 0;
            true
        } else {
            false
        }
    }

    /// Assemble the windowed analysis frame from the most recent N input
    /// samples.
    pub fn fill_frame(&self, frame: &mut [Sample]) {
        self.input_ring.copy_latest(frame);
        for (sample, &w) in frame.iter_mut().zip(self.window.iter()) {
            *sample *= w;
        }
    }

    /// Apply the synthesis window and overlap-add the synthesized frame
    /// into the output ring.
    pub fn emit_frame(&mut self, frame: &mut [Sample]) {
        for (sample, &w) in frame.iter_mut().zip(self.window.iter()) {
            *sample *= w * COLA_GAIN;
        }
        self.output_ring.add_frame(frame, self.hop_size);
    }

    /// Pop the next overlap-added output sample.
    #[inline]
    pub fn pop(&mut self) -> Sample {
        self.output_ring.pop()
    }

    /// Input sample from N samples ago (the latency-matched dry tap).
    #[inline]
    pub fn dry_delayed(&self) -> Sample {
        self.input_ring.at_age(self.fft_size)
    }

    pub fn reset(&mut self) {
        self.input_ring.reset();
        self.output_ring.reset();
        self.hop_accum = 0;
    }
}
