//! Cepstral-liftered formant envelope
//!
//! Pitch shifting a voiced signal drags its formants along with the
//! partials. The correction computes a smoothed spectral envelope of the
//! analysis magnitudes and of the shifted magnitudes, then rescales each
//! synthesized coefficient by their ratio so the original envelope is
//! restored. The envelope is obtained by low-pass liftering the real
//! cepstrum of the log-magnitude spectrum.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Floor for log/division inputs.
const ENV_FLOOR: f64 = 1e-12;

/// Correction gain ceiling; keeps deep envelope notches from blowing up.
const MAX_CORRECTION: f64 = 10.0;

pub struct FormantEnvelope {
    fft_size: usize,
    num_bins: usize,
    lifter_cutoff: usize,
    fft_forward: Arc<dyn Fft<f64>>,
    fft_inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
    cepstrum: Vec<Complex<f64>>,
    env_analysis: Vec<f64>,
    env_shifted: Vec<f64>,
}

impl FormantEnvelope {
    pub fn new(fft_size: usize, sample_rate: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());
        let num_bins = fft_size / 2 + 1;
        // ~1 ms of quefrency separates envelope from excitation.
        let lifter_cutoff = ((sample_rate / 1000.0) as usize).clamp(8, fft_size / 4);
        Self {
            fft_size,
            num_bins,
            lifter_cutoff,
            fft_forward,
            fft_inverse,
            scratch: vec![Complex::default(); scratch_len],
            cepstrum: vec![Complex::default(); fft_size],
            env_analysis: vec![0.0; num_bins],
            env_shifted: vec![0.0; num_bins],
        }
    }

    /// Smoothed log-magnitude envelope of `magnitudes` (length B) into
    /// `env` (length B).
    fn compute_envelope(
        &mut self,
        magnitudes: &[f64],
        which: EnvelopeSlot,
    ) {
        let n = self.fft_size;
        let b = self.num_bins;

        // Symmetric log-magnitude spectrum
        for k in 0..b {
            self.cepstrum[k] = Complex::new(magnitudes[k].max(ENV_FLOOR).ln(), 0.0);
        }
        for k in b..n {
            self.cepstrum[k] = self.cepstrum[n - k];
        }

        // Real cepstrum (unnormalized inverse)
        self.fft_inverse
            .process_with_scratch(&mut self.cepstrum, &mut self.scratch);

        // Low-pass lifter: keep low quefrencies on both ends of the
        // (symmetric) cepstrum, zero the rest.
        let cutoff = self.lifter_cutoff.min(n / 2);
        for q in cutoff..(n - cutoff) {
            self.cepstrum[q] = Complex::default();
        }

        // Back to a smoothed log spectrum; the forward/inverse pair is
        // unnormalized, so divide by N once.
        self.fft_forward
            .process_with_scratch(&mut self.cepstrum, &mut self.scratch);
        let norm = 1.0 / n as f64;
        let env = match which {
            EnvelopeSlot::Analysis => &mut self.env_analysis,
            EnvelopeSlot::Shifted => &mut self.env_shifted,
        };
        for k in 0..b {
            env[k] = (self.cepstrum[k].re * norm).exp();
        }
    }

    /// Rescale the synthesized spectrum so its envelope matches the
    /// analysis envelope. Phase is untouched: the scaling factor is real,
    /// so this works identically for locked and basic synthesis.
    pub fn apply(
        &mut self,
        analysis_mag: &[f64],
        shifted_mag: &[f64],
        spectrum: &mut [Complex<f64>],
    ) {
        self.compute_envelope(analysis_mag, EnvelopeSlot::Analysis);
        self.compute_envelope(shifted_mag, EnvelopeSlot::Shifted);
        for k in 0..self.num_bins {
            let gain =
                (self.env_analysis[k] / self.env_shifted[k].max(ENV_FLOOR)).min(MAX_CORRECTION);
            spectrum[k] *= gain;
        }
    }
}

#[derive(Clone, Copy)]
enum EnvelopeSlot {
    Analysis,
    Shifted,
}
