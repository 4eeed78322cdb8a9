//! krate-dsp: Identity phase-locking phase vocoder pitch shifter
//!
//! Frequency-domain pitch shifting with vertical phase coherence
//! preservation (Laroche & Dolson, 1999). The shifter runs synchronously
//! at a fixed hop of N/4 and reports a latency of N samples.
//!
//! ## Modules
//! - `window` - Hann window and overlap-add gain
//! - `stft` - Streaming STFT framer (input ring, hop accumulation,
//!   overlap-add output ring)
//! - `shifter` - The phase-locked pitch shift core
//! - `formant` - Cepstral-liftered spectral envelope correction

pub mod formant;
pub mod shifter;
pub mod stft;
pub mod window;

pub use shifter::{PitchShifter, StereoPitchShifter};
pub use stft::StftFramer;

use krate_core::{KrateResult, Sample};

/// Capability set shared by every processor in the library's audio graph.
///
/// Processors are selected once at graph construction; there is no
/// per-sample dynamic dispatch on the audio path.
pub trait Processor: Send {
    /// Allocate for the worst case. All sizing failures surface here;
    /// a failed prepare leaves the processor unprepared.
    fn prepare(&mut self, sample_rate: f64, max_block: usize) -> KrateResult<()>;

    /// Clear all signal state. Not re-entrant.
    fn reset(&mut self);

    /// Latency in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait
pub trait MonoProcessor: Processor {
    fn process_sample(&mut self, input: Sample) -> Sample;

    fn process_block(&mut self, io: &mut [Sample]) {
        for sample in io.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Stereo processor trait
pub trait StereoProcessor: Processor {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample);

    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let (ol, or) = self.process_sample(*l, *r);
            *l = ol;
            *r = or;
        }
    }
}
