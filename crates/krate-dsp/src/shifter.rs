//! Phase-locked pitch shift core
//!
//! Classical phase vocoder analysis with identity phase locking on
//! synthesis: spectral peaks propagate their own accumulated phase, and
//! every other bin is rotated rigidly with the peak that owns its region
//! of influence. This preserves vertical phase coherence across partials
//! and suppresses the smeared, "phasey" character of the basic vocoder.

use std::f64::consts::TAU;
use std::sync::Arc;

use log::{debug, warn};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use krate_core::{
    KrateError, KrateResult, MAX_FFT_SIZE, MAX_PEAKS, MIN_FFT_SIZE, Sample, wrap_phase,
};

use crate::formant::FormantEnvelope;
use crate::stft::StftFramer;
use crate::{MonoProcessor, Processor, StereoProcessor};

/// Streaming pitch shifter. Mono core; see [`StereoPitchShifter`] for the
/// bus adapter.
pub struct PitchShifter {
    max_fft_size: usize,
    fft_size: usize,
    hop_size: usize,
    num_bins: usize,
    sample_rate: f64,
    prepared: bool,

    pitch_ratio: f64,
    phase_locking: bool,
    was_locked: bool,
    formant_preserve: bool,

    framer: StftFramer,
    formant: FormantEnvelope,

    fft_forward: Arc<dyn RealToComplex<f64>>,
    fft_inverse: Arc<dyn ComplexToReal<f64>>,
    scratch_fwd: Vec<Complex<f64>>,
    scratch_inv: Vec<Complex<f64>>,

    // Per-frame scratch, sized at prepare; never reallocated afterwards
    frame: Vec<Sample>,
    spectrum: Vec<Complex<f64>>,
    synth_spectrum: Vec<Complex<f64>>,
    magnitude: Vec<f64>,
    phase: Vec<f64>,
    frequency: Vec<f64>,
    prev_phase: Vec<f64>,
    synth_phase: Vec<f64>,
    shifted_mag: Vec<f64>,
    is_peak: Vec<bool>,
    peak_indices: Vec<u16>,
    region_peak: Vec<u16>,
}

impl PitchShifter {
    /// Create a shifter able to run at FFT sizes up to `max_fft_size`.
    /// Call [`PitchShifter::prepare`] before processing.
    pub fn new(max_fft_size: usize) -> Self {
        let max_fft_size = max_fft_size.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);
        let mut shifter = Self {
            max_fft_size,
            fft_size: 0,
            hop_size: 0,
            num_bins: 0,
            sample_rate: 0.0,
            prepared: false,
            pitch_ratio: 1.0,
            phase_locking: true,
            was_locked: true,
            formant_preserve: false,
            framer: StftFramer::new(max_fft_size),
            formant: FormantEnvelope::new(max_fft_size, 44_100.0),
            fft_forward: RealFftPlanner::new().plan_fft_forward(max_fft_size),
            fft_inverse: RealFftPlanner::new().plan_fft_inverse(max_fft_size),
            scratch_fwd: Vec::new(),
            scratch_inv: Vec::new(),
            frame: Vec::new(),
            spectrum: Vec::new(),
            synth_spectrum: Vec::new(),
            magnitude: Vec::new(),
            phase: Vec::new(),
            frequency: Vec::new(),
            prev_phase: Vec::new(),
            synth_phase: Vec::new(),
            shifted_mag: Vec::new(),
            is_peak: Vec::new(),
            peak_indices: Vec::with_capacity(MAX_PEAKS),
            region_peak: Vec::new(),
        };
        // A default prepare keeps the struct usable before the host
        // configures it; failures are impossible for these arguments.
        let _ = shifter.prepare(44_100.0, max_fft_size);
        shifter.prepared = false;
        shifter
    }

    /// Size all internal state for `fft_size` at `sample_rate`.
    ///
    /// Fails on a non-power-of-two size, a size outside 1024..=8192 (or
    /// above the construction-time maximum), or a non-positive sample
    /// rate. On failure the shifter stays unprepared.
    pub fn prepare(&mut self, sample_rate: f64, fft_size: usize) -> KrateResult<()> {
        self.prepared = false;
        if !fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size)
            || fft_size > self.max_fft_size
        {
            return Err(KrateError::InvalidFftSize(fft_size));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(KrateError::InvalidSampleRate(sample_rate));
        }

        let num_bins = fft_size / 2 + 1;
        self.fft_size = fft_size;
        self.hop_size = fft_size / 4;
        self.num_bins = num_bins;
        self.sample_rate = sample_rate;

        let mut planner = RealFftPlanner::new();
        self.fft_forward = planner.plan_fft_forward(fft_size);
        self.fft_inverse = planner.plan_fft_inverse(fft_size);
        self.scratch_fwd = vec![Complex::default(); self.fft_forward.get_scratch_len()];
        self.scratch_inv = vec![Complex::default(); self.fft_inverse.get_scratch_len()];

        self.framer = StftFramer::new(fft_size);
        self.formant = FormantEnvelope::new(fft_size, sample_rate);

        self.frame = vec![0.0; fft_size];
        self.spectrum = vec![Complex::default(); num_bins];
        self.synth_spectrum = vec![Complex::default(); num_bins];
        self.magnitude = vec![0.0; num_bins];
        self.phase = vec![0.0; num_bins];
        self.frequency = vec![0.0; num_bins];
        self.prev_phase = vec![0.0; num_bins];
        self.synth_phase = vec![0.0; num_bins];
        self.shifted_mag = vec![0.0; num_bins];
        self.is_peak = vec![false; num_bins];
        self.region_peak = vec![0; num_bins];
        self.peak_indices.clear();

        self.prepared = true;
        debug!(
            "PitchShifter prepared: sr={} fft={} hop={} (75% overlap)",
            sample_rate, fft_size, self.hop_size
        );
        self.reset();
        Ok(())
    }

    /// Pitch ratio (0.25..=4.0). Non-finite values are rejected.
    pub fn set_pitch_ratio(&mut self, ratio: f64) {
        if !ratio.is_finite() || ratio <= 0.0 {
            warn!("ignoring invalid pitch ratio {ratio}");
            return;
        }
        self.pitch_ratio = ratio.clamp(0.25, 4.0);
    }

    pub fn pitch_ratio(&self) -> f64 {
        self.pitch_ratio
    }

    /// Toggle identity phase locking. Not thread-safe against a
    /// concurrent process call; invoke from the audio thread (or through
    /// the host's parameter queue).
    pub fn set_phase_locking(&mut self, enabled: bool) {
        self.phase_locking = enabled;
    }

    pub fn phase_locking(&self) -> bool {
        self.phase_locking
    }

    pub fn set_formant_preserve(&mut self, enabled: bool) {
        self.formant_preserve = enabled;
    }

    pub fn formant_preserve(&self) -> bool {
        self.formant_preserve
    }

    #[inline]
    fn interp_magnitude(&self, src: f64) -> f64 {
        let i0 = src as usize;
        let frac = src - i0 as f64;
        if i0 + 1 < self.num_bins {
            self.magnitude[i0] * (1.0 - frac) + self.magnitude[i0 + 1] * frac
        } else {
            self.magnitude[i0.min(self.num_bins - 1)]
        }
    }

    /// Analysis phase at a fractional bin, interpolated along the wrapped
    /// difference so the 2π seam cannot tear the result.
    #[inline]
    fn interp_analysis_phase(&self, src: f64) -> f64 {
        let i0 = src as usize;
        let frac = src - i0 as f64;
        if i0 + 1 < self.num_bins {
            let p0 = self.prev_phase[i0];
            let p1 = self.prev_phase[i0 + 1];
            p0 + frac * wrap_phase(p1 - p0)
        } else {
            self.prev_phase[i0.min(self.num_bins - 1)]
        }
    }

    /// Run analysis + synthesis on the windowed frame in `self.frame`,
    /// leaving the synthesized (unwindowed) frame there.
    fn process_frame(&mut self) {
        let n = self.fft_size;
        let b = self.num_bins;
        let hop = self.hop_size;
        let hop_per_sr = hop as f64 / self.sample_rate;

        self.fft_forward
            .process_with_scratch(&mut self.frame, &mut self.spectrum, &mut self.scratch_fwd)
            .ok();

        // Analysis: magnitude, phase, instantaneous frequency from the
        // wrapped deviation against the expected per-hop bin advance.
        let expected_per_bin = TAU * hop as f64 / n as f64;
        let dev_scale = n as f64 / hop as f64;
        for k in 0..b {
            let c = self.spectrum[k];
            let mag = c.norm();
            let ph = c.arg();
            let deviation = wrap_phase(ph - self.prev_phase[k] - k as f64 * expected_per_bin);
            self.magnitude[k] = mag;
            self.phase[k] = ph;
            self.frequency[k] = (TAU * k as f64 + deviation * dev_scale) * self.sample_rate / n as f64;
            self.prev_phase[k] = ph;
        }

        // Peak detection: strict inequality against both neighbours, so
        // equal-magnitude plateaux are never peaks. Bins 0 and B-1 are
        // excluded by construction.
        self.peak_indices.clear();
        self.is_peak.fill(false);
        for k in 1..b - 1 {
            let m = self.magnitude[k];
            if m > self.magnitude[k - 1] && m > self.magnitude[k + 1] {
                self.is_peak[k] = true;
                if self.peak_indices.len() < MAX_PEAKS {
                    self.peak_indices.push(k as u16);
                }
            }
        }
        let num_peaks = self.peak_indices.len();

        // Region of influence: midpoint boundaries, equidistant bins go
        // to the lower-frequency peak (integer division).
        if num_peaks == 1 {
            self.region_peak.fill(self.peak_indices[0]);
        } else if num_peaks > 1 {
            let mut start = 0usize;
            for pair in self.peak_indices.windows(2) {
                let mid = (pair[0] as usize + pair[1] as usize) / 2;
                for k in start..=mid {
                    self.region_peak[k] = pair[0];
                }
                start = mid + 1;
            }
            if let Some(&last) = self.peak_indices.last() {
                for k in start..b {
                    self.region_peak[k] = last;
                }
            }
        }

        // Locked -> basic transition: the accumulated synthesis phases
        // are stale for the basic recurrence; reseed from the current
        // analysis phase and accept a one-frame transient.
        if self.was_locked && !self.phase_locking {
            self.synth_phase.copy_from_slice(&self.prev_phase);
        }
        self.was_locked = self.phase_locking;

        for c in self.synth_spectrum.iter_mut() {
            *c = Complex::default();
        }
        self.shifted_mag.fill(0.0);

        let r = self.pitch_ratio;
        if self.phase_locking && num_peaks > 0 {
            // Pass 1: synthesis bins fed by a peak accumulate their own
            // phase from the peak's instantaneous frequency.
            for k in 0..b {
                let src = k as f64 / r;
                let src_rounded = src.round() as usize;
                if src_rounded >= b || !self.is_peak[src_rounded] {
                    continue;
                }
                let mag = self.interp_magnitude(src);
                // The synthesized partial is the source partial scaled
                // by the pitch ratio.
                let phase =
                    wrap_phase(self.synth_phase[k] + r * self.frequency[src_rounded] * hop_per_sr);
                self.synth_phase[k] = phase;
                self.shifted_mag[k] = mag;
                self.synth_spectrum[k] = Complex::from_polar(mag, phase);
            }
            // Pass 2: every other bin is rotated rigidly with the peak
            // that owns its source region.
            for k in 0..b {
                let src = k as f64 / r;
                let src_rounded = src.round() as usize;
                if src_rounded >= b || self.is_peak[src_rounded] {
                    continue;
                }
                let analysis_peak = self.region_peak[src_rounded] as usize;
                let synth_peak = ((analysis_peak as f64 * r).round() as usize).min(b - 1);
                let rotation = self.synth_phase[synth_peak] - self.prev_phase[analysis_peak];
                let phase = wrap_phase(self.interp_analysis_phase(src) + rotation);
                let mag = self.interp_magnitude(src);
                self.synth_phase[k] = phase;
                self.shifted_mag[k] = mag;
                self.synth_spectrum[k] = Complex::from_polar(mag, phase);
            }
        } else {
            // Basic path: the classical per-bin phase recurrence. Also
            // taken when the frame has no peaks at all.
            for k in 0..b {
                let src = k as f64 / r;
                let src_rounded = src.round() as usize;
                if src_rounded >= b {
                    continue;
                }
                let mag = self.interp_magnitude(src);
                let phase =
                    wrap_phase(self.synth_phase[k] + r * self.frequency[src_rounded] * hop_per_sr);
                self.synth_phase[k] = phase;
                self.shifted_mag[k] = mag;
                self.synth_spectrum[k] = Complex::from_polar(mag, phase);
            }
        }

        if self.formant_preserve {
            self.formant
                .apply(&self.magnitude, &self.shifted_mag, &mut self.synth_spectrum);
        }

        // Real inverse transform requires purely real DC/Nyquist bins.
        self.synth_spectrum[0].im = 0.0;
        self.synth_spectrum[b - 1].im = 0.0;
        self.fft_inverse
            .process_with_scratch(&mut self.synth_spectrum, &mut self.frame, &mut self.scratch_inv)
            .ok();
        let norm = 1.0 / n as f64;
        for s in self.frame.iter_mut() {
            *s *= norm;
        }
    }
}

impl Processor for PitchShifter {
    fn prepare(&mut self, sample_rate: f64, _max_block: usize) -> KrateResult<()> {
        let fft_size = if self.fft_size > 0 {
            self.fft_size
        } else {
            self.max_fft_size
        };
        PitchShifter::prepare(self, sample_rate, fft_size)
    }

    fn reset(&mut self) {
        self.framer.reset();
        self.prev_phase.fill(0.0);
        self.synth_phase.fill(0.0);
        self.phase.fill(0.0);
        self.frequency.fill(0.0);
        self.magnitude.fill(0.0);
        self.shifted_mag.fill(0.0);
        self.is_peak.fill(false);
        self.peak_indices.clear();
        self.was_locked = self.phase_locking;
    }

    fn latency(&self) -> usize {
        self.fft_size
    }
}

impl MonoProcessor for PitchShifter {
    fn process_sample(&mut self, input: Sample) -> Sample {
        if !self.prepared {
            return input;
        }
        let frame_due = self.framer.push(input);
        if self.pitch_ratio == 1.0 {
            // Unity fast path: skip analysis/synthesis entirely and read
            // the latency-matched dry tap. The output ring keeps
            // draining so a later ratio change resumes cleanly.
            let _ = self.framer.pop();
            return self.framer.dry_delayed();
        }
        if frame_due {
            self.framer.fill_frame(&mut self.frame);
            self.process_frame();
            self.framer.emit_frame(&mut self.frame);
        }
        self.framer.pop()
    }
}

/// Stereo bus adapter: two independent mono cores sharing one parameter
/// surface.
pub struct StereoPitchShifter {
    left: PitchShifter,
    right: PitchShifter,
}

impl StereoPitchShifter {
    pub fn new(max_fft_size: usize) -> Self {
        Self {
            left: PitchShifter::new(max_fft_size),
            right: PitchShifter::new(max_fft_size),
        }
    }

    pub fn prepare(&mut self, sample_rate: f64, fft_size: usize) -> KrateResult<()> {
        self.left.prepare(sample_rate, fft_size)?;
        self.right.prepare(sample_rate, fft_size)
    }

    pub fn set_pitch_ratio(&mut self, ratio: f64) {
        self.left.set_pitch_ratio(ratio);
        self.right.set_pitch_ratio(ratio);
    }

    pub fn set_phase_locking(&mut self, enabled: bool) {
        self.left.set_phase_locking(enabled);
        self.right.set_phase_locking(enabled);
    }

    pub fn phase_locking(&self) -> bool {
        self.left.phase_locking()
    }

    pub fn set_formant_preserve(&mut self, enabled: bool) {
        self.left.set_formant_preserve(enabled);
        self.right.set_formant_preserve(enabled);
    }
}

impl Processor for StereoPitchShifter {
    fn prepare(&mut self, sample_rate: f64, max_block: usize) -> KrateResult<()> {
        Processor::prepare(&mut self.left, sample_rate, max_block)?;
        Processor::prepare(&mut self.right, sample_rate, max_block)
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn latency(&self) -> usize {
        self.left.latency()
    }
}

impl StereoProcessor for StereoPitchShifter {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        (
            self.left.process_sample(left),
            self.right.process_sample(right),
        )
    }
}
