//! Block context and musical time
//!
//! The host hands each processing block a read-only transport snapshot.
//! The engines never derive tempo themselves; every musical duration is
//! computed from the snapshot's BPM and sample rate.

use serde::{Deserialize, Serialize};

/// Note values for tempo-synced durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl NoteValue {
    /// Length in quarter-note beats.
    #[inline]
    pub fn beats(self) -> f64 {
        match self {
            NoteValue::Whole => 4.0,
            NoteValue::Half => 2.0,
            NoteValue::Quarter => 1.0,
            NoteValue::Eighth => 0.5,
            NoteValue::Sixteenth => 0.25,
            NoteValue::ThirtySecond => 0.125,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            NoteValue::Whole => "1/1",
            NoteValue::Half => "1/2",
            NoteValue::Quarter => "1/4",
            NoteValue::Eighth => "1/8",
            NoteValue::Sixteenth => "1/16",
            NoteValue::ThirtySecond => "1/32",
        }
    }
}

/// Straight, dotted, or triplet variant of a note value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteModifier {
    #[default]
    Straight,
    Dotted,
    Triplet,
}

impl NoteModifier {
    /// Duration multiplier relative to the straight value.
    #[inline]
    pub fn factor(self) -> f64 {
        match self {
            NoteModifier::Straight => 1.0,
            NoteModifier::Dotted => 1.5,
            NoteModifier::Triplet => 2.0 / 3.0,
        }
    }
}

/// Per-block transport snapshot, read-only to the engines.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Host tempo in beats per minute
    pub tempo_bpm: f64,
    /// Musical position of the block start in quarter notes
    pub ppq_position: f64,
    /// Samples in this block
    pub block_size: usize,
}

impl BlockContext {
    pub fn new(sample_rate: f64, tempo_bpm: f64, ppq_position: f64, block_size: usize) -> Self {
        Self {
            sample_rate,
            tempo_bpm,
            ppq_position,
            block_size,
        }
    }

    /// Duration of one musical note value in samples at this block's tempo.
    #[inline]
    pub fn tempo_to_samples(&self, value: NoteValue, modifier: NoteModifier) -> f64 {
        let beats = value.beats() * modifier.factor();
        beats * 60.0 / self.tempo_bpm * self.sample_rate
    }
}
