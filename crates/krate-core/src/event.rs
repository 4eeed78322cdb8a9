//! Abstract note events
//!
//! The arpeggiator emits these instead of raw MIDI bytes; the host (or a
//! downstream synth voice allocator) is responsible for any wire format.

use serde::{Deserialize, Serialize};

/// Kind of note event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// A sample-accurate note event within one audio block.
///
/// Events in a block are ordered by `sample_offset`; at equal offsets
/// note-offs precede note-ons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Offset from the start of the current block, in samples
    pub sample_offset: u32,
    pub kind: EventKind,
    /// Pitch in semitones, 0..=127 (MIDI numbering)
    pub pitch: i8,
    /// Velocity 0.0..=1.0 (meaningful for note-ons; 0.0 on note-offs)
    pub velocity: f32,
    /// Synthesis should glide into this note (legato)
    pub slide: bool,
    /// This event extends/ends a tie chain
    pub tie: bool,
    /// Monotonically assigned voice identifier pairing on/off events
    pub voice_id: u32,
}

impl NoteEvent {
    pub fn note_on(sample_offset: u32, pitch: i8, velocity: f32, voice_id: u32) -> Self {
        Self {
            sample_offset,
            kind: EventKind::NoteOn,
            pitch,
            velocity,
            slide: false,
            tie: false,
            voice_id,
        }
    }

    pub fn note_off(sample_offset: u32, pitch: i8, voice_id: u32) -> Self {
        Self {
            sample_offset,
            kind: EventKind::NoteOff,
            pitch,
            velocity: 0.0,
            slide: false,
            tie: false,
            voice_id,
        }
    }
}
