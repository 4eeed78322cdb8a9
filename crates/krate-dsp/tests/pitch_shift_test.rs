//! Pitch shifter integration tests
//!
//! End-to-end behavior of the streaming shifter:
//! - unity ratio is the identity after latency compensation
//! - a +3 semitone shift concentrates energy at the target frequency,
//!   and phase locking measurably tightens that concentration
//! - with phase locking disabled from creation the output matches an
//!   independent classical phase vocoder

use std::f64::consts::TAU;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use krate_core::{Sample, wrap_phase};
use krate_dsp::{MonoProcessor, PitchShifter, Processor};

const SAMPLE_RATE: f64 = 44_100.0;

fn generate_sine(samples: usize, freq: f64) -> Vec<Sample> {
    (0..samples)
        .map(|i| (TAU * freq * i as f64 / SAMPLE_RATE).sin())
        .collect()
}

fn rms(signal: &[Sample]) -> f64 {
    (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
}

// ═══════════════════════════════════════════════════════════════════════════
// UNITY RATIO
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_unity_ratio_is_identity_on_sine() {
    let fft_size = 4096;
    let mut shifter = PitchShifter::new(fft_size);
    shifter.prepare(SAMPLE_RATE, fft_size).unwrap();
    shifter.set_pitch_ratio(1.0);
    shifter.set_phase_locking(true);

    let input = generate_sine(SAMPLE_RATE as usize, 440.0);
    let mut output = Vec::with_capacity(input.len());
    for &x in &input {
        output.push(shifter.process_sample(x));
    }

    // Compensate the N-sample latency, then compare pointwise.
    let latency = shifter.latency();
    assert_eq!(latency, fft_size);
    let compared = input.len() - latency;
    let mut error = vec![0.0; compared];
    for i in 0..compared {
        error[i] = output[i + latency] - input[i];
    }
    let relative = rms(&error) / rms(&input[..compared]);
    assert!(
        relative < 1e-4,
        "unity shift deviates from identity: relative RMS {relative}"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// ENERGY CONCENTRATION
// ═══════════════════════════════════════════════════════════════════════════

/// Fraction of spectral energy within a 3-bin window centred on
/// `target_hz`, measured over the tail of `signal` with a Hann-windowed
/// FFT whose length puts the target almost exactly on a bin centre.
fn energy_concentration(signal: &[Sample], target_hz: f64) -> f64 {
    // 523.251 Hz * 33712 / 44100 = 400.00 bins
    let m = 33_712;
    let tail = &signal[signal.len() - m..];
    let mut buf: Vec<Complex<f64>> = tail
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let w = 0.5 * (1.0 - (TAU * i as f64 / m as f64).cos());
            Complex::new(x * w, 0.0)
        })
        .collect();
    FftPlanner::new().plan_fft_forward(m).process(&mut buf);

    let target_bin = (target_hz * m as f64 / SAMPLE_RATE).round() as usize;
    let energy = |k: usize| buf[k].norm_sqr();
    let window: f64 = (target_bin - 1..=target_bin + 1).map(energy).sum();
    let total: f64 = (1..m / 2).map(energy).sum();
    window / total
}

#[test]
fn test_three_semitone_shift_concentrates_energy() {
    let fft_size = 4096;
    let ratio = 2f64.powf(3.0 / 12.0);
    let target_hz = 440.0 * ratio;
    let input = generate_sine(SAMPLE_RATE as usize, 440.0);

    let mut locked = PitchShifter::new(fft_size);
    locked.prepare(SAMPLE_RATE, fft_size).unwrap();
    locked.set_pitch_ratio(ratio);
    locked.set_phase_locking(true);
    let locked_out: Vec<Sample> = input.iter().map(|&x| locked.process_sample(x)).collect();

    let mut basic = PitchShifter::new(fft_size);
    basic.prepare(SAMPLE_RATE, fft_size).unwrap();
    basic.set_pitch_ratio(ratio);
    basic.set_phase_locking(false);
    let basic_out: Vec<Sample> = input.iter().map(|&x| basic.process_sample(x)).collect();

    let locked_focus = energy_concentration(&locked_out, target_hz);
    let basic_focus = energy_concentration(&basic_out, target_hz);

    assert!(
        locked_focus >= 0.9,
        "locked concentration {locked_focus} below 90%"
    );
    assert!(
        basic_focus < 0.7,
        "basic concentration {basic_focus} not below 70%"
    );
    assert!(locked_focus > basic_focus);
}

// ═══════════════════════════════════════════════════════════════════════════
// CLASSICAL EQUIVALENCE
// ═══════════════════════════════════════════════════════════════════════════

/// Minimal classical phase vocoder pitch shifter, written against the
/// textbook recurrence only (no peaks, no regions, no locking).
struct ReferenceVocoder {
    fft_size: usize,
    hop: usize,
    num_bins: usize,
    ratio: f64,
    window: Vec<f64>,
    fft_forward: Arc<dyn RealToComplex<f64>>,
    fft_inverse: Arc<dyn ComplexToReal<f64>>,
    history: Vec<f64>,
    hop_fill: usize,
    prev_phase: Vec<f64>,
    synth_phase: Vec<f64>,
    ola: Vec<f64>,
    read_pos: usize,
    write_pos: usize,
}

impl ReferenceVocoder {
    fn new(fft_size: usize, ratio: f64) -> Self {
        let mut planner = RealFftPlanner::new();
        let num_bins = fft_size / 2 + 1;
        Self {
            fft_size,
            hop: fft_size / 4,
            num_bins,
            ratio,
            window: (0..fft_size)
                .map(|i| 0.5 * (1.0 - (TAU * i as f64 / fft_size as f64).cos()))
                .collect(),
            fft_forward: planner.plan_fft_forward(fft_size),
            fft_inverse: planner.plan_fft_inverse(fft_size),
            history: vec![0.0; fft_size],
            hop_fill: 0,
            prev_phase: vec![0.0; num_bins],
            synth_phase: vec![0.0; num_bins],
            ola: vec![0.0; fft_size * 4],
            read_pos: 0,
            write_pos: fft_size / 4,
        }
    }

    fn process_sample(&mut self, input: f64) -> f64 {
        self.history.rotate_left(1);
        self.history[self.fft_size - 1] = input;
        self.hop_fill += 1;
        if self.hop_fill == self.hop {
            self.hop_fill = 0;
            self.process_frame();
        }
        let out = self.ola[self.read_pos];
        self.ola[self.read_pos] = 0.0;
        self.read_pos = (self.read_pos + 1) % self.ola.len();
        out
    }

    fn process_frame(&mut self) {
        let n = self.fft_size;
        let b = self.num_bins;
        let mut frame: Vec<f64> = self
            .history
            .iter()
            .zip(self.window.iter())
            .map(|(&x, &w)| x * w)
            .collect();
        let mut spectrum = vec![Complex::default(); b];
        self.fft_forward.process(&mut frame, &mut spectrum).ok();

        let expected_per_bin = TAU * self.hop as f64 / n as f64;
        let dev_scale = n as f64 / self.hop as f64;
        let mut magnitude = vec![0.0; b];
        let mut frequency = vec![0.0; b];
        for k in 0..b {
            let mag = spectrum[k].norm();
            let ph = spectrum[k].arg();
            let deviation = wrap_phase(ph - self.prev_phase[k] - k as f64 * expected_per_bin);
            magnitude[k] = mag;
            frequency[k] = (TAU * k as f64 + deviation * dev_scale) * SAMPLE_RATE / n as f64;
            self.prev_phase[k] = ph;
        }

        let hop_per_sr = self.hop as f64 / SAMPLE_RATE;
        let mut synth = vec![Complex::default(); b];
        for k in 0..b {
            let src = k as f64 / self.ratio;
            let src_rounded = src.round() as usize;
            if src_rounded >= b {
                continue;
            }
            let i0 = src as usize;
            let frac = src - i0 as f64;
            let mag = if i0 + 1 < b {
                magnitude[i0] * (1.0 - frac) + magnitude[i0 + 1] * frac
            } else {
                magnitude[i0.min(b - 1)]
            };
            let phase =
                wrap_phase(self.synth_phase[k] + self.ratio * frequency[src_rounded] * hop_per_sr);
            self.synth_phase[k] = phase;
            synth[k] = Complex::from_polar(mag, phase);
        }
        synth[0].im = 0.0;
        synth[b - 1].im = 0.0;

        let mut out = vec![0.0; n];
        self.fft_inverse.process(&mut synth, &mut out).ok();
        let norm = 1.0 / n as f64;
        let cola = 2.0 / 3.0;
        for (i, sample) in out.iter().enumerate() {
            let pos = (self.write_pos + i) % self.ola.len();
            self.ola[pos] += sample * norm * self.window[i] * cola;
        }
        self.write_pos = (self.write_pos + self.hop) % self.ola.len();
    }
}

#[test]
fn test_disabled_locking_matches_classical_vocoder() {
    let fft_size = 1024;
    let ratio = 1.3;

    let mut shifter = PitchShifter::new(fft_size);
    shifter.prepare(SAMPLE_RATE, fft_size).unwrap();
    shifter.set_phase_locking(false);
    shifter.set_pitch_ratio(ratio);

    let mut reference = ReferenceVocoder::new(fft_size, ratio);

    let input: Vec<Sample> = generate_sine(fft_size * 16, 311.13)
        .iter()
        .zip(generate_sine(fft_size * 16, 932.33))
        .map(|(a, b)| a + 0.5 * b)
        .collect();

    for (i, &x) in input.iter().enumerate() {
        let ours = shifter.process_sample(x);
        let theirs = reference.process_sample(x);
        assert!(
            (ours - theirs).abs() < 1e-6,
            "sample {i}: ours {ours} vs reference {theirs}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reset_reproduces_output() {
    let fft_size = 1024;
    let mut shifter = PitchShifter::new(fft_size);
    shifter.prepare(SAMPLE_RATE, fft_size).unwrap();
    shifter.set_pitch_ratio(1.5);

    let input = generate_sine(fft_size * 8, 440.0);
    let first: Vec<Sample> = input.iter().map(|&x| shifter.process_sample(x)).collect();
    shifter.reset();
    let second: Vec<Sample> = input.iter().map(|&x| shifter.process_sample(x)).collect();

    for (a, b) in first.iter().zip(second.iter()) {
        assert!((a - b).abs() < 1e-12, "reset did not clear state");
    }
}

#[test]
fn test_block_form_matches_sample_form() {
    let fft_size = 1024;
    let mut by_sample = PitchShifter::new(fft_size);
    by_sample.prepare(SAMPLE_RATE, fft_size).unwrap();
    by_sample.set_pitch_ratio(0.8);
    let mut by_block = PitchShifter::new(fft_size);
    by_block.prepare(SAMPLE_RATE, fft_size).unwrap();
    by_block.set_pitch_ratio(0.8);

    let input = generate_sine(fft_size * 4, 523.25);
    let expected: Vec<Sample> = input.iter().map(|&x| by_sample.process_sample(x)).collect();

    let mut io = input.clone();
    for chunk in io.chunks_mut(256) {
        by_block.process_block(chunk);
    }
    for (a, b) in expected.iter().zip(io.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_output_is_finite_across_ratio_sweep() {
    let fft_size = 1024;
    let mut shifter = PitchShifter::new(fft_size);
    shifter.prepare(SAMPLE_RATE, fft_size).unwrap();
    shifter.set_formant_preserve(true);

    let input = generate_sine(fft_size * 12, 220.0);
    for (i, &x) in input.iter().enumerate() {
        if i % 2048 == 0 {
            // Sweep through extreme ratios, including the clamp edges
            let ratio = 0.25 + (i / 2048) as f64 * 0.55;
            shifter.set_pitch_ratio(ratio);
        }
        let y = shifter.process_sample(x);
        assert!(y.is_finite(), "non-finite output at sample {i}");
    }
}
