//! Arpeggiator step engine
//!
//! Sample-accurate note-event scheduler. Each step boundary runs a fixed
//! pipeline: note selection, unconditional lane advance, loop-count wrap
//! detection, the Euclidean structure gate, the per-step trig condition,
//! articulation modifiers, and ratcheting. Rest-like exits all share one
//! cleanup routine so their observable effects are identical.

use log::warn;

use krate_core::{
    BlockContext, CONDITION_SEED, EventKind, KrateError, KrateResult, Lane, NoteEvent,
    NoteModifier, NoteValue, Xorshift32,
};

use crate::condition::TrigCondition;
use crate::euclid::EuclidGate;
use crate::held::HeldNotes;
use crate::modifier::{Articulation, articulation, step_flags};
use crate::selector::{ArpMode, NoteSelector};

/// Default playable length of the five musical lanes.
pub const DEFAULT_LANE_LENGTH: usize = 16;

const MAX_SCHEDULED: usize = 128;
const MAX_ACTIVE: usize = 64;

/// Step clock source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepRate {
    /// Tempo-synced to the host clock
    Synced(NoteValue, NoteModifier),
    /// Free-running at a fixed step frequency
    FreeHz(f64),
}

impl StepRate {
    fn duration_samples(&self, ctx: &BlockContext) -> f64 {
        let duration = match *self {
            StepRate::Synced(value, modifier) => ctx.tempo_to_samples(value, modifier),
            StepRate::FreeHz(hz) => ctx.sample_rate / hz.max(1e-3),
        };
        // A degenerate tempo must not collapse the step clock
        duration.max(1.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    /// Samples until due, relative to the current sample
    remaining: f64,
    kind: EventKind,
    pitch: i8,
    velocity: f32,
    slide: bool,
    tie: bool,
    voice_id: u32,
}

/// The step engine. All subcomponents are composed by value; ownership
/// is exclusive and fully stack-assignable.
pub struct Arpeggiator {
    pub(crate) held: HeldNotes,
    pub(crate) selector: NoteSelector,
    pub(crate) velocity_lane: Lane<u8>,
    pub(crate) gate_lane: Lane<u8>,
    pub(crate) pitch_lane: Lane<u8>,
    pub(crate) modifier_lane: Lane<u8>,
    pub(crate) ratchet_lane: Lane<u8>,
    pub(crate) condition_lane: Lane<u8>,
    pub(crate) euclid: EuclidGate,

    /// Completed condition-lane cycles since the last lane reset
    loop_count: u64,
    /// Live performance flag; preserved across resets, never persisted
    pub(crate) fill_active: bool,
    /// Dedicated trig-condition PRNG; seeded once, never reseeded
    condition_rng: Xorshift32,

    rate: StepRate,
    swing: f64,
    accent_gain: f32,
    enabled: bool,
    prepared: bool,

    tie_active: bool,
    active_notes: Vec<(i8, u32)>,
    scheduled: Vec<ScheduledEvent>,
    swing_step_counter: u64,
    current_step_duration: f64,
    samples_to_next_step: f64,
    next_voice_id: u32,
    events: Vec<NoteEvent>,
}

impl Arpeggiator {
    pub fn new() -> Self {
        Self {
            held: HeldNotes::new(),
            selector: NoteSelector::new(),
            velocity_lane: Lane::filled(DEFAULT_LANE_LENGTH, 255),
            gate_lane: Lane::filled(DEFAULT_LANE_LENGTH, 128),
            pitch_lane: Lane::filled(DEFAULT_LANE_LENGTH, 128),
            modifier_lane: Lane::filled(DEFAULT_LANE_LENGTH, step_flags::ACTIVE),
            ratchet_lane: Lane::filled(DEFAULT_LANE_LENGTH, 1),
            condition_lane: Lane::new(),
            euclid: EuclidGate::new(),
            loop_count: 0,
            fill_active: false,
            condition_rng: Xorshift32::new(CONDITION_SEED),
            rate: StepRate::Synced(NoteValue::Sixteenth, NoteModifier::Straight),
            swing: 0.0,
            accent_gain: 1.25,
            enabled: true,
            prepared: false,
            tie_active: false,
            active_notes: Vec::new(),
            scheduled: Vec::new(),
            swing_step_counter: 0,
            current_step_duration: 0.0,
            samples_to_next_step: 0.0,
            next_voice_id: 0,
            events: Vec::new(),
        }
    }

    /// Allocate the event buffers for the given block ceiling.
    pub fn prepare(&mut self, sample_rate: f64, max_block: usize) -> KrateResult<()> {
        self.prepared = false;
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(KrateError::InvalidSampleRate(sample_rate));
        }
        if max_block == 0 {
            return Err(KrateError::InvalidConfig("max_block must be > 0".into()));
        }
        let max_events = max_block.saturating_mul(4).clamp(1024, 1 << 16);
        self.events = Vec::with_capacity(max_events);
        self.scheduled = Vec::with_capacity(MAX_SCHEDULED);
        self.active_notes = Vec::with_capacity(MAX_ACTIVE);
        self.prepared = true;
        self.reset();
        Ok(())
    }

    // ── note input ─────────────────────────────────────────────────────

    pub fn note_on(&mut self, pitch: i8, velocity: f32) {
        self.held.note_on(pitch, velocity);
    }

    pub fn note_off(&mut self, pitch: i8) {
        self.held.note_off(pitch);
    }

    // ── configuration ──────────────────────────────────────────────────

    pub fn set_rate(&mut self, rate: StepRate) {
        self.rate = rate;
    }

    pub fn set_swing(&mut self, swing: f64) {
        self.swing = swing.clamp(0.0, 0.9);
    }

    pub fn set_accent_gain(&mut self, gain: f32) {
        self.accent_gain = gain.clamp(1.0, 4.0);
    }

    pub fn set_mode(&mut self, mode: ArpMode) {
        self.selector.set_mode(mode);
    }

    pub fn set_euclid_enabled(&mut self, enabled: bool) {
        self.euclid.set_enabled(enabled);
    }

    pub fn set_euclid_pattern(&mut self, hits: u8, steps: u8, rotation: u8) {
        self.euclid.set_pattern(hits, steps, rotation);
    }

    /// Live fill flag. Not persisted, preserved across resets.
    pub fn set_fill_active(&mut self, active: bool) {
        self.fill_active = active;
    }

    pub fn fill_active(&self) -> bool {
        self.fill_active
    }

    /// Enabling after a disable behaves like a transport restart;
    /// disabling alone leaves the loop counter untouched.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.reset_lanes();
        }
        if !enabled && self.enabled {
            self.all_notes_off();
        }
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Count of currently sounding notes.
    pub fn sounding_note_count(&self) -> usize {
        self.active_notes.len()
    }

    /// Whether a tie chain is currently sustaining a note.
    pub fn tie_active(&self) -> bool {
        self.tie_active
    }

    /// Duration of the most recent step in samples (after swing).
    pub fn current_step_duration(&self) -> f64 {
        self.current_step_duration
    }

    pub fn velocity_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.velocity_lane
    }

    pub fn gate_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.gate_lane
    }

    pub fn pitch_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.pitch_lane
    }

    pub fn modifier_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.modifier_lane
    }

    pub fn ratchet_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.ratchet_lane
    }

    pub fn condition_lane_mut(&mut self) -> &mut Lane<u8> {
        &mut self.condition_lane
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    /// Full teardown: held notes, sounding notes, timing. The fill flag
    /// and the condition PRNG survive.
    pub fn reset(&mut self) {
        self.held.clear();
        self.active_notes.clear();
        self.scheduled.clear();
        self.events.clear();
        self.tie_active = false;
        self.current_step_duration = 0.0;
        self.reset_lanes();
    }

    /// Transport restart / retrigger / re-enable: lane positions, the
    /// Euclidean position, and the loop counter go back to zero. The
    /// fill flag and the condition PRNG survive here too.
    pub fn reset_lanes(&mut self) {
        self.velocity_lane.reset_position();
        self.gate_lane.reset_position();
        self.pitch_lane.reset_position();
        self.modifier_lane.reset_position();
        self.ratchet_lane.reset_position();
        self.condition_lane.reset_position();
        self.selector.reset();
        self.euclid.reset_position();
        self.loop_count = 0;
        self.swing_step_counter = 0;
        self.samples_to_next_step = 0.0;
    }

    /// Panic button: releases everything at the start of the next block.
    pub fn all_notes_off(&mut self) {
        self.scheduled.clear();
        // Re-queue the sounding notes as immediately-due releases
        let count = self.active_notes.len();
        for i in 0..count {
            let (pitch, voice_id) = self.active_notes[i];
            self.queue(ScheduledEvent {
                remaining: 0.0,
                kind: EventKind::NoteOff,
                pitch,
                velocity: 0.0,
                slide: false,
                tie: false,
                voice_id,
            });
        }
        self.tie_active = false;
    }

    // ── processing ─────────────────────────────────────────────────────

    /// Emit this block's events, ordered by offset with note-offs ahead
    /// of note-ons at equal offsets.
    pub fn process_block(&mut self, ctx: &BlockContext) -> &[NoteEvent] {
        self.events.clear();
        if !self.prepared {
            return &self.events;
        }
        for i in 0..ctx.block_size {
            let offset = i as u32;
            self.flush_due(offset);
            if self.enabled {
                if self.samples_to_next_step <= 0.0 {
                    self.fire_step(ctx, offset);
                }
                self.samples_to_next_step -= 1.0;
            }
            for event in self.scheduled.iter_mut() {
                event.remaining -= 1.0;
            }
        }
        &self.events
    }

    /// One step boundary. The evaluation order is fixed: selection,
    /// lane advance, wrap detection, Euclidean gate, condition,
    /// modifiers, ratchets.
    fn fire_step(&mut self, ctx: &BlockContext, offset: u32) {
        // 1. Source pitches for this step (may be empty)
        let selection = self.selector.advance(&self.held);

        // 2. Advance every lane exactly once, before any gating;
        //    each returns its pre-advance value.
        let velocity_raw = self.velocity_lane.advance();
        let gate_raw = self.gate_lane.advance();
        let pitch_raw = self.pitch_lane.advance();
        let modifier_raw = self.modifier_lane.advance() & step_flags::MASK;
        let ratchet_raw = self.ratchet_lane.advance();
        let condition_raw = self.condition_lane.advance();

        // 3. Loop-count wrap detection. The step evaluates against the
        //    cycle it belongs to, captured before the increment; with a
        //    length-1 lane the wrap fires every step and A:B ratios
        //    operate per step.
        let cycle = self.loop_count;
        if self.condition_lane.position() == 0 {
            self.loop_count += 1;
        }

        // Per-step duration with swing; updated on every path through
        // the step, rest or not.
        let base = self.rate.duration_samples(ctx);
        let duration = if self.swing_step_counter % 2 == 0 {
            base * (1.0 + self.swing)
        } else {
            base * (1.0 - self.swing)
        };
        self.swing_step_counter += 1;
        self.current_step_duration = duration;
        self.samples_to_next_step += duration;

        // 4. Euclidean structure gate; its position advances every tick
        let euclid_hit = self.euclid.tick();
        if !euclid_hit {
            self.rest_cleanup(offset);
            return;
        }

        // Defensive branch: nothing held. Every lane and the Euclidean
        // position have already advanced, so the pattern stays in
        // lockstep; the PRNG is untouched.
        if selection.count == 0 {
            return;
        }

        // 5. Trig condition (sole PRNG consumer)
        let condition = TrigCondition::from_index(condition_raw);
        if !condition.evaluate(cycle, self.fill_active, &mut self.condition_rng) {
            self.rest_cleanup(offset);
            return;
        }

        // 6. Articulation, priority Rest > Tie > Slide > Accent
        let articulation = articulation(modifier_raw);
        let gate_samples = gate_raw as f64 / 255.0 * 2.0 * duration;

        match articulation {
            Articulation::Rest => {
                self.rest_cleanup(offset);
                return;
            }
            Articulation::Tie => {
                if self.active_notes.is_empty() {
                    // Nothing to extend: fall back to a rest
                    self.rest_cleanup(offset);
                    return;
                }
                // Push the sounding notes' releases out to this step's
                // gate end
                self.scheduled.clear();
                let count = self.active_notes.len();
                for i in 0..count {
                    let (pitch, voice_id) = self.active_notes[i];
                    self.queue(ScheduledEvent {
                        remaining: gate_samples.max(1.0),
                        kind: EventKind::NoteOff,
                        pitch,
                        velocity: 0.0,
                        slide: false,
                        tie: true,
                        voice_id,
                    });
                }
                self.tie_active = true;
                return;
            }
            _ => {}
        }

        let slide = articulation == Articulation::Slide;
        if slide {
            // Legato handover: previous notes release exactly at the new
            // note-on offset, off before on
            self.scheduled.clear();
            let count = self.active_notes.len();
            for i in 0..count {
                let (pitch, voice_id) = self.active_notes[i];
                self.emit(NoteEvent::note_off(offset, pitch, voice_id));
            }
            self.active_notes.clear();
        }
        self.tie_active = false;

        let lane_velocity = velocity_raw as f32 / 255.0;
        let accent_gain = if articulation == Articulation::Accent {
            self.accent_gain
        } else {
            1.0
        };
        let semitones = pitch_offset_semitones(pitch_raw);
        let ratchets = ratchet_raw.clamp(1, 4) as u32;
        let sub_duration = duration / ratchets as f64;
        let sub_gate = (gate_samples / ratchets as f64).max(1.0);

        // 7. Ratcheting: equally spaced sub-steps inside the step
        for j in 0..ratchets {
            let on_delay = j as f64 * sub_duration;
            for s in 0..selection.count {
                let note = selection.notes[s];
                let pitch = (note.pitch as i16 + semitones as i16).clamp(0, 127) as i8;
                let velocity = (note.velocity * lane_velocity * accent_gain).clamp(0.0, 1.0);
                let voice_id = self.next_voice();
                if j == 0 {
                    let mut on = NoteEvent::note_on(offset, pitch, velocity, voice_id);
                    on.slide = slide;
                    self.emit(on);
                    self.activate(pitch, voice_id);
                } else {
                    self.queue(ScheduledEvent {
                        remaining: on_delay,
                        kind: EventKind::NoteOn,
                        pitch,
                        velocity,
                        slide: false,
                        tie: false,
                        voice_id,
                    });
                }
                self.queue(ScheduledEvent {
                    remaining: on_delay + sub_gate,
                    kind: EventKind::NoteOff,
                    pitch,
                    velocity: 0.0,
                    slide: false,
                    tie: false,
                    voice_id,
                });
            }
        }
    }

    /// Shared cleanup for Euclidean rests, failed conditions, and Rest
    /// modifier steps: cancel the scheduled queue, release everything
    /// sounding right now, clear the tie chain.
    fn rest_cleanup(&mut self, offset: u32) {
        self.scheduled.clear();
        let count = self.active_notes.len();
        for i in 0..count {
            let (pitch, voice_id) = self.active_notes[i];
            self.emit(NoteEvent::note_off(offset, pitch, voice_id));
        }
        self.active_notes.clear();
        self.tie_active = false;
    }

    /// Emit queue entries that have come due, note-offs first.
    fn flush_due(&mut self, offset: u32) {
        if self.scheduled.is_empty() {
            return;
        }
        let mut i = 0;
        while i < self.scheduled.len() {
            let entry = self.scheduled[i];
            if entry.remaining <= 0.0 && entry.kind == EventKind::NoteOff {
                self.scheduled.swap_remove(i);
                self.active_notes
                    .retain(|&(_, voice)| voice != entry.voice_id);
                let mut off = NoteEvent::note_off(offset, entry.pitch, entry.voice_id);
                off.tie = entry.tie;
                self.emit(off);
            } else {
                i += 1;
            }
        }
        let mut i = 0;
        while i < self.scheduled.len() {
            let entry = self.scheduled[i];
            if entry.remaining <= 0.0 {
                self.scheduled.swap_remove(i);
                let mut on =
                    NoteEvent::note_on(offset, entry.pitch, entry.velocity, entry.voice_id);
                on.slide = entry.slide;
                self.emit(on);
                self.activate(entry.pitch, entry.voice_id);
            } else {
                i += 1;
            }
        }
    }

    fn activate(&mut self, pitch: i8, voice_id: u32) {
        if self.active_notes.len() < MAX_ACTIVE {
            self.active_notes.push((pitch, voice_id));
        } else {
            warn!("active note table full; voice {voice_id} untracked");
        }
    }

    fn queue(&mut self, event: ScheduledEvent) {
        if self.scheduled.len() < MAX_SCHEDULED {
            self.scheduled.push(event);
        } else {
            warn!("event queue full; dropping scheduled event");
        }
    }

    fn emit(&mut self, event: NoteEvent) {
        if self.events.len() < self.events.capacity() {
            self.events.push(event);
        } else {
            warn!("event buffer full; dropping event at offset {}", event.sample_offset);
        }
    }

    fn next_voice(&mut self) -> u32 {
        let id = self.next_voice_id;
        self.next_voice_id = self.next_voice_id.wrapping_add(1);
        id
    }
}

impl Default for Arpeggiator {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn pitch_offset_semitones(raw: u8) -> i8 {
    ((raw as f64 / 255.0 * 48.0).round() as i32 - 24) as i8
}
