//! Engine state persistence
//!
//! Flat stream of little-endian 32-bit integers in a fixed section
//! order: the five musical lanes, the Euclidean section, the condition
//! lane, the fill toggle. Versioning is positional: a stream that ends
//! cleanly at the first field of any section is a valid older preset
//! and every remaining field takes its default; a stream that ends
//! anywhere else is corrupt and the load is rejected wholesale.

use std::io::{Read, Write};

use log::warn;

use krate_core::{KrateError, KrateResult, Lane, MAX_STEPS};

use crate::engine::{Arpeggiator, DEFAULT_LANE_LENGTH};
use crate::modifier::step_flags;

#[derive(Debug, Clone, Copy)]
struct LaneSnapshot {
    length: usize,
    steps: [u8; MAX_STEPS],
}

impl LaneSnapshot {
    fn filled(length: usize, value: u8) -> Self {
        Self {
            length,
            steps: [value; MAX_STEPS],
        }
    }

    fn apply(&self, lane: &mut Lane<u8>) {
        lane.set_length(MAX_STEPS);
        for (i, &v) in self.steps.iter().enumerate() {
            lane.set_step(i, v);
        }
        lane.set_length(self.length);
    }
}

#[derive(Debug, Clone, Copy)]
struct StateSnapshot {
    velocity: LaneSnapshot,
    gate: LaneSnapshot,
    pitch: LaneSnapshot,
    modifier: LaneSnapshot,
    ratchet: LaneSnapshot,
    euclid_enabled: bool,
    euclid_hits: u8,
    euclid_steps: u8,
    euclid_rotation: u8,
    condition: LaneSnapshot,
    fill: bool,
}

impl StateSnapshot {
    /// Defaults double as the legacy-preset values.
    fn defaults() -> Self {
        Self {
            velocity: LaneSnapshot::filled(DEFAULT_LANE_LENGTH, 255),
            gate: LaneSnapshot::filled(DEFAULT_LANE_LENGTH, 128),
            pitch: LaneSnapshot::filled(DEFAULT_LANE_LENGTH, 128),
            modifier: LaneSnapshot::filled(DEFAULT_LANE_LENGTH, step_flags::ACTIVE),
            ratchet: LaneSnapshot::filled(DEFAULT_LANE_LENGTH, 1),
            euclid_enabled: false,
            euclid_hits: 4,
            euclid_steps: 16,
            euclid_rotation: 0,
            condition: LaneSnapshot::filled(1, 0),
            fill: false,
        }
    }
}

fn write_i32<W: Write>(w: &mut W, value: i32) -> KrateResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Read one i32, distinguishing a clean EOF before the first byte
/// (`Ok(None)`) from a torn value mid-field (`Err`).
fn read_i32_or_eof<R: Read>(r: &mut R, section: &'static str) -> KrateResult<Option<i32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(KrateError::TruncatedState(section))
            };
        }
        filled += n;
    }
    Ok(Some(i32::from_le_bytes(buf)))
}

fn read_i32<R: Read>(r: &mut R, section: &'static str) -> KrateResult<i32> {
    read_i32_or_eof(r, section)?.ok_or(KrateError::TruncatedState(section))
}

fn clamp_cell(value: i32, max: i32, section: &'static str) -> u8 {
    if !(0..=max).contains(&value) {
        warn!("{section}: clamping out-of-range step value {value}");
    }
    value.clamp(0, max) as u8
}

fn clamp_length(value: i32, section: &'static str) -> usize {
    if !(1..=MAX_STEPS as i32).contains(&value) {
        warn!("{section}: clamping out-of-range lane length {value}");
    }
    value.clamp(1, MAX_STEPS as i32) as usize
}

/// Read one lane section. `Ok(false)` means the stream ended cleanly
/// before this section (legacy preset); the snapshot keeps defaults.
fn read_lane_section<R: Read>(
    r: &mut R,
    lane: &mut LaneSnapshot,
    cell_max: i32,
    section: &'static str,
) -> KrateResult<bool> {
    let Some(length) = read_i32_or_eof(r, section)? else {
        return Ok(false);
    };
    lane.length = clamp_length(length, section);
    for i in 0..MAX_STEPS {
        let value = read_i32(r, section)?;
        lane.steps[i] = clamp_cell(value, cell_max, section);
    }
    Ok(true)
}

fn write_lane_section<W: Write>(w: &mut W, lane: &Lane<u8>) -> KrateResult<()> {
    write_i32(w, lane.length() as i32)?;
    for i in 0..MAX_STEPS {
        write_i32(w, lane.step(i) as i32)?;
    }
    Ok(())
}

impl Arpeggiator {
    /// Serialize the pattern state in the fixed section order.
    pub fn save_state<W: Write>(&self, w: &mut W) -> KrateResult<()> {
        write_lane_section(w, &self.velocity_lane)?;
        write_lane_section(w, &self.gate_lane)?;
        write_lane_section(w, &self.pitch_lane)?;
        write_lane_section(w, &self.modifier_lane)?;
        write_lane_section(w, &self.ratchet_lane)?;
        write_i32(w, self.euclid.enabled() as i32)?;
        write_i32(w, self.euclid.hits() as i32)?;
        write_i32(w, self.euclid.steps() as i32)?;
        write_i32(w, self.euclid.rotation() as i32)?;
        write_lane_section(w, &self.condition_lane)?;
        write_i32(w, self.fill_active as i32)?;
        Ok(())
    }

    /// Load pattern state. The stream is parsed into a snapshot first;
    /// on any corruption the engine keeps its previous state untouched.
    /// Out-of-range values are clamped, a clean end before any section
    /// leaves that section and everything after it at defaults.
    pub fn load_state<R: Read>(&mut self, r: &mut R) -> KrateResult<()> {
        let snapshot = parse_state(r)?;

        snapshot.velocity.apply(&mut self.velocity_lane);
        snapshot.gate.apply(&mut self.gate_lane);
        snapshot.pitch.apply(&mut self.pitch_lane);
        snapshot.modifier.apply(&mut self.modifier_lane);
        snapshot.ratchet.apply(&mut self.ratchet_lane);
        self.euclid.set_enabled(snapshot.euclid_enabled);
        self.euclid.set_pattern(
            snapshot.euclid_hits,
            snapshot.euclid_steps,
            snapshot.euclid_rotation,
        );
        snapshot.condition.apply(&mut self.condition_lane);
        self.fill_active = snapshot.fill;

        // A freshly loaded pattern starts from the top
        self.reset_lanes();
        Ok(())
    }
}

fn parse_state<R: Read>(r: &mut R) -> KrateResult<StateSnapshot> {
    let mut snapshot = StateSnapshot::defaults();

    if !read_lane_section(r, &mut snapshot.velocity, 255, "velocity lane")? {
        return Ok(snapshot);
    }
    if !read_lane_section(r, &mut snapshot.gate, 255, "gate lane")? {
        return Ok(snapshot);
    }
    if !read_lane_section(r, &mut snapshot.pitch, 255, "pitch lane")? {
        return Ok(snapshot);
    }
    if !read_lane_section(r, &mut snapshot.modifier, 255, "modifier lane")? {
        return Ok(snapshot);
    }
    // Reserved bits never round-trip
    for step in snapshot.modifier.steps.iter_mut() {
        *step &= step_flags::MASK;
    }
    if !read_lane_section(r, &mut snapshot.ratchet, 255, "ratchet lane")? {
        return Ok(snapshot);
    }
    for step in snapshot.ratchet.steps.iter_mut() {
        *step = (*step).clamp(1, 4);
    }

    // Euclidean section
    let Some(enabled) = read_i32_or_eof(r, "euclid section")? else {
        return Ok(snapshot);
    };
    snapshot.euclid_enabled = enabled != 0;
    let hits = read_i32(r, "euclid section")?;
    let steps = read_i32(r, "euclid section")?;
    let rotation = read_i32(r, "euclid section")?;
    snapshot.euclid_steps = clamp_length(steps, "euclid section") as u8;
    snapshot.euclid_hits = clamp_cell(hits, snapshot.euclid_steps as i32, "euclid section");
    snapshot.euclid_rotation = clamp_cell(
        rotation,
        snapshot.euclid_steps as i32 - 1,
        "euclid section",
    );

    // Condition section; EOF right here is the previous-version preset
    if !read_lane_section(r, &mut snapshot.condition, 17, "condition lane")? {
        return Ok(snapshot);
    }

    // Fill toggle is mandatory once the condition section is present
    let fill = read_i32(r, "fill toggle")?;
    snapshot.fill = fill != 0;

    Ok(snapshot)
}
