//! Euclidean rhythm gate
//!
//! Bjorklund's maximally-even distribution of H hits over S steps,
//! rotated by R and cached as a 32-bit mask so the per-step check is a
//! single shift-and-mask. The position counter is independent of every
//! lane and advances on each step tick.

use krate_core::MAX_STEPS;

/// Maximally-even mask of `hits` over `steps` (no rotation), step 0 in
/// bit 0. Computed by pairwise group concatenation (Bjorklund).
fn bjorklund_mask(hits: u32, steps: u32) -> u32 {
    debug_assert!(steps >= 1 && steps <= MAX_STEPS as u32);
    if hits == 0 {
        return 0;
    }
    if hits >= steps {
        return if steps == 32 { u32::MAX } else { (1 << steps) - 1 };
    }

    // Group A starts as a single hit, group B as a single rest; each
    // round folds B into A until the remainder runs out.
    let mut a_pat: u32 = 1;
    let mut a_len: u32 = 1;
    let mut a_cnt: u32 = hits;
    let mut b_pat: u32 = 0;
    let mut b_len: u32 = 1;
    let mut b_cnt: u32 = steps - hits;

    while b_cnt > 1 && a_cnt > 0 {
        if a_cnt > b_cnt {
            let rem = a_cnt - b_cnt;
            let merged = a_pat | (b_pat << a_len);
            b_pat = a_pat;
            b_len = a_len;
            a_cnt = b_cnt;
            b_cnt = rem;
            a_pat = merged;
            a_len += b_len;
        } else {
            let rem = b_cnt - a_cnt;
            a_pat |= b_pat << a_len;
            a_len += b_len;
            b_cnt = rem;
        }
    }

    let mut mask = 0u32;
    let mut pos = 0u32;
    for _ in 0..a_cnt {
        mask |= a_pat << pos;
        pos += a_len;
    }
    for _ in 0..b_cnt {
        mask |= b_pat << pos;
        pos += b_len;
    }
    mask
}

/// Rotate so that `rotated[i] == mask[(i + rotation) % steps]`.
fn rotate_mask(mask: u32, steps: u32, rotation: u32) -> u32 {
    if steps == 0 {
        return mask;
    }
    let rotation = rotation % steps;
    if rotation == 0 {
        return mask;
    }
    let mut out = 0u32;
    for i in 0..steps {
        if mask >> ((i + rotation) % steps) & 1 == 1 {
            out |= 1 << i;
        }
    }
    out
}

/// The Euclidean gate with its independent position counter.
#[derive(Debug, Clone)]
pub struct EuclidGate {
    enabled: bool,
    hits: u8,
    steps: u8,
    rotation: u8,
    mask: u32,
    position: u8,
}

impl EuclidGate {
    pub fn new() -> Self {
        Self {
            enabled: false,
            hits: 4,
            steps: 16,
            rotation: 0,
            mask: bjorklund_mask(4, 16),
            position: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn hits(&self) -> u8 {
        self.hits
    }

    pub fn steps(&self) -> u8 {
        self.steps
    }

    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    /// Reconfigure and re-cache the mask. Values are clamped: steps to
    /// [1, 32], hits to [0, steps], rotation into [0, steps).
    pub fn set_pattern(&mut self, hits: u8, steps: u8, rotation: u8) {
        let steps = steps.clamp(1, MAX_STEPS as u8);
        let hits = hits.min(steps);
        let rotation = rotation % steps;
        self.hits = hits;
        self.steps = steps;
        self.rotation = rotation;
        self.mask = rotate_mask(
            bjorklund_mask(hits as u32, steps as u32),
            steps as u32,
            rotation as u32,
        );
        self.position %= steps;
    }

    /// Read the hit bit at the current position, then advance. When the
    /// gate is disabled every step is a hit; the position still advances
    /// so enabling mid-pattern stays deterministic.
    #[inline]
    pub fn tick(&mut self) -> bool {
        let hit = !self.enabled || (self.mask >> self.position) & 1 == 1;
        self.position = (self.position + 1) % self.steps;
        hit
    }

    pub fn reset_position(&mut self) {
        self.position = 0;
    }
}

impl Default for EuclidGate {
    fn default() -> Self {
        Self::new()
    }
}
