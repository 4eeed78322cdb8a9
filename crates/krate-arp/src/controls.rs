//! Lock-free control surface
//!
//! The control thread writes normalized parameter values; the audio
//! thread ingests the whole surface once per block. Every cell is an
//! independent atomic written with release semantics and read with
//! acquire, so torn reads are impossible and no cross-cell atomicity is
//! needed. Normalized values are mapped to their lane domains at write
//! time.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use krate_core::{
    MAX_STEPS, condition_step_from_norm, fill_from_norm, lane_length_from_norm,
    modifier_step_from_norm, pitch_step_to_norm, ratchet_step_from_norm,
};

use crate::engine::Arpeggiator;

/// One lane's worth of atomic cells (domain values, not normalized).
pub struct LaneControls {
    length: AtomicU8,
    steps: [AtomicU8; MAX_STEPS],
}

impl LaneControls {
    fn filled(length: u8, value: u8) -> Self {
        Self {
            length: AtomicU8::new(length),
            steps: std::array::from_fn(|_| AtomicU8::new(value)),
        }
    }

    /// Control thread: set the lane length from a normalized value.
    pub fn set_length_normalized(&self, v: f64) {
        self.length
            .store(lane_length_from_norm(v) as u8, Ordering::Release);
    }

    /// Control thread: set one cell to an already-mapped domain value.
    pub fn set_step(&self, index: usize, value: u8) {
        if index < MAX_STEPS {
            self.steps[index].store(value, Ordering::Release);
        }
    }

    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire) as usize
    }

    pub fn step(&self, index: usize) -> u8 {
        self.steps[index % MAX_STEPS].load(Ordering::Acquire)
    }
}

/// The arpeggiator's full shared parameter block. `Arc` this between
/// the control thread and the audio thread; the audio thread applies it
/// through [`Arpeggiator::apply_controls`] once per block.
pub struct ArpControls {
    pub velocity: LaneControls,
    pub gate: LaneControls,
    pub pitch: LaneControls,
    pub modifier: LaneControls,
    pub ratchet: LaneControls,
    pub condition: LaneControls,
    fill: AtomicBool,
    enabled: AtomicBool,
}

impl ArpControls {
    pub fn new() -> Self {
        Self {
            velocity: LaneControls::filled(16, 255),
            gate: LaneControls::filled(16, 128),
            pitch: LaneControls::filled(16, 128),
            modifier: LaneControls::filled(16, 0x01),
            ratchet: LaneControls::filled(16, 1),
            condition: LaneControls::filled(1, 0),
            fill: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    // Normalized ingestion, one setter per parameter domain.

    pub fn set_velocity_step_normalized(&self, index: usize, v: f64) {
        self.velocity
            .set_step(index, (v.clamp(0.0, 1.0) * 255.0).round() as u8);
    }

    pub fn set_gate_step_normalized(&self, index: usize, v: f64) {
        self.gate
            .set_step(index, (v.clamp(0.0, 1.0) * 255.0).round() as u8);
    }

    /// Pitch arrives as a normalized bipolar value; stored as the lane's
    /// raw 0..255 cell.
    pub fn set_pitch_step_normalized(&self, index: usize, v: f64) {
        let semitones = ((v - 0.5) * 48.0).round().clamp(-24.0, 24.0);
        let raw = (pitch_step_to_norm(semitones as i8) * 255.0).round() as u8;
        self.pitch.set_step(index, raw);
    }

    pub fn set_modifier_step_normalized(&self, index: usize, v: f64) {
        self.modifier.set_step(index, modifier_step_from_norm(v));
    }

    pub fn set_ratchet_step_normalized(&self, index: usize, v: f64) {
        self.ratchet.set_step(index, ratchet_step_from_norm(v));
    }

    pub fn set_condition_step_normalized(&self, index: usize, v: f64) {
        self.condition.set_step(index, condition_step_from_norm(v));
    }

    pub fn set_fill_normalized(&self, v: f64) {
        self.fill.store(fill_from_norm(v), Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn fill(&self) -> bool {
        self.fill.load(Ordering::Acquire)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for ArpControls {
    fn default() -> Self {
        Self::new()
    }
}

impl Arpeggiator {
    /// Audio thread: ingest the whole control surface. Each lane is
    /// applied in expand-write-shrink order (length to 32, all 32
    /// cells, then the actual length) so no transient state ever has a
    /// cell index beyond the current length. Idempotent: applying the
    /// same snapshot twice is a no-op.
    pub fn apply_controls(&mut self, controls: &ArpControls) {
        fn apply_lane(lane: &mut krate_core::Lane<u8>, controls: &LaneControls) {
            lane.set_length(MAX_STEPS);
            for i in 0..MAX_STEPS {
                lane.set_step(i, controls.step(i));
            }
            lane.set_length(controls.length());
        }

        apply_lane(&mut self.velocity_lane, &controls.velocity);
        apply_lane(&mut self.gate_lane, &controls.gate);
        apply_lane(&mut self.pitch_lane, &controls.pitch);
        apply_lane(&mut self.modifier_lane, &controls.modifier);
        apply_lane(&mut self.ratchet_lane, &controls.ratchet);
        apply_lane(&mut self.condition_lane, &controls.condition);
        self.fill_active = controls.fill();
        self.set_enabled(controls.enabled());
    }
}
