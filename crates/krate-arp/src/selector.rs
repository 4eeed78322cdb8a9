//! Note selector
//!
//! Maps the held-note set to the source pitches of each step. The
//! random mode draws from its own PRNG (seed 42), deliberately distinct
//! from the condition lane's generator so trig patterns and note
//! selection stay decorrelated.

use serde::{Deserialize, Serialize};

use krate_core::{MAX_HELD_NOTES, SELECTOR_SEED, Xorshift32};

use crate::held::{HeldNote, HeldNotes};

/// Selection modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArpMode {
    #[default]
    Up = 0,
    Down = 1,
    UpDown = 2,
    DownUp = 3,
    Converge = 4,
    Diverge = 5,
    Random = 6,
    Chord = 7,
}

impl ArpMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => ArpMode::Up,
            1 => ArpMode::Down,
            2 => ArpMode::UpDown,
            3 => ArpMode::DownUp,
            4 => ArpMode::Converge,
            5 => ArpMode::Diverge,
            6 => ArpMode::Random,
            7 => ArpMode::Chord,
            _ => ArpMode::Up,
        }
    }
}

/// Pitches chosen for one step.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub notes: [HeldNote; MAX_HELD_NOTES],
    pub count: usize,
}

impl Selection {
    fn empty() -> Self {
        Self {
            notes: [HeldNote::default(); MAX_HELD_NOTES],
            count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoteSelector {
    mode: ArpMode,
    cursor: usize,
    rng: Xorshift32,
}

impl NoteSelector {
    pub fn new() -> Self {
        Self {
            mode: ArpMode::Up,
            cursor: 0,
            rng: Xorshift32::new(SELECTOR_SEED),
        }
    }

    pub fn mode(&self) -> ArpMode {
        self.mode
    }

    /// Change mode and restart the traversal.
    pub fn set_mode(&mut self, mode: ArpMode) {
        if self.mode != mode {
            self.mode = mode;
            self.cursor = 0;
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Index into the sorted held set for traversal position `cursor`.
    fn traversal_index(mode: ArpMode, cursor: usize, n: usize) -> usize {
        match mode {
            ArpMode::Up => cursor,
            ArpMode::Down => n - 1 - cursor,
            ArpMode::UpDown => {
                if cursor < n {
                    cursor
                } else {
                    2 * n - 2 - cursor
                }
            }
            ArpMode::DownUp => {
                if cursor < n {
                    n - 1 - cursor
                } else {
                    cursor - (n - 1)
                }
            }
            ArpMode::Converge => {
                if cursor % 2 == 0 {
                    cursor / 2
                } else {
                    n - 1 - cursor / 2
                }
            }
            // Diverge walks the converge sequence backwards: out from
            // the middle.
            ArpMode::Diverge => Self::traversal_index(ArpMode::Converge, n - 1 - cursor, n),
            ArpMode::Random | ArpMode::Chord => 0,
        }
    }

    fn period(mode: ArpMode, n: usize) -> usize {
        match mode {
            ArpMode::UpDown | ArpMode::DownUp => {
                if n > 1 {
                    2 * n - 2
                } else {
                    1
                }
            }
            _ => n.max(1),
        }
    }

    /// Choose this step's source pitches and move the cursor. Returns an
    /// empty selection when nothing is held.
    pub fn advance(&mut self, held: &HeldNotes) -> Selection {
        let n = held.len();
        if n == 0 {
            return Selection::empty();
        }

        let mut selection = Selection::empty();
        match self.mode {
            ArpMode::Chord => {
                for i in 0..n {
                    selection.notes[i] = held.get(i);
                }
                selection.count = n;
            }
            ArpMode::Random => {
                selection.notes[0] = held.get(self.rng.next_range(n));
                selection.count = 1;
            }
            mode => {
                let period = Self::period(mode, n);
                let cursor = self.cursor % period;
                selection.notes[0] = held.get(Self::traversal_index(mode, cursor, n));
                selection.count = 1;
            }
        }

        let period = Self::period(self.mode, n);
        self.cursor = (self.cursor + 1) % period;
        selection
    }
}

impl Default for NoteSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held_of(pitches: &[i8]) -> HeldNotes {
        let mut held = HeldNotes::new();
        for &p in pitches {
            held.note_on(p, 1.0);
        }
        held
    }

    fn run(selector: &mut NoteSelector, held: &HeldNotes, steps: usize) -> Vec<i8> {
        (0..steps)
            .map(|_| {
                let s = selector.advance(held);
                assert_eq!(s.count, 1);
                s.notes[0].pitch
            })
            .collect()
    }

    #[test]
    fn test_up_down_traversals() {
        let held = held_of(&[60, 64, 67]);
        let mut sel = NoteSelector::new();
        assert_eq!(run(&mut sel, &held, 6), vec![60, 64, 67, 60, 64, 67]);

        sel.set_mode(ArpMode::Down);
        assert_eq!(run(&mut sel, &held, 6), vec![67, 64, 60, 67, 64, 60]);
    }

    #[test]
    fn test_updown_skips_endpoints() {
        let held = held_of(&[60, 64, 67]);
        let mut sel = NoteSelector::new();
        sel.set_mode(ArpMode::UpDown);
        // Period 2n-2 = 4: no doubled endpoints
        assert_eq!(run(&mut sel, &held, 8), vec![60, 64, 67, 64, 60, 64, 67, 64]);

        sel.set_mode(ArpMode::DownUp);
        assert_eq!(run(&mut sel, &held, 8), vec![67, 64, 60, 64, 67, 64, 60, 64]);
    }

    #[test]
    fn test_converge_diverge() {
        let held = held_of(&[60, 62, 64, 67]);
        let mut sel = NoteSelector::new();
        sel.set_mode(ArpMode::Converge);
        assert_eq!(run(&mut sel, &held, 4), vec![60, 67, 62, 64]);

        sel.set_mode(ArpMode::Diverge);
        assert_eq!(run(&mut sel, &held, 4), vec![64, 62, 67, 60]);
    }

    #[test]
    fn test_chord_returns_all() {
        let held = held_of(&[60, 64, 67]);
        let mut sel = NoteSelector::new();
        sel.set_mode(ArpMode::Chord);
        let s = sel.advance(&held);
        assert_eq!(s.count, 3);
        assert_eq!(s.notes[0].pitch, 60);
        assert_eq!(s.notes[2].pitch, 67);
    }

    #[test]
    fn test_random_is_deterministic_and_in_range() {
        let held = held_of(&[60, 64, 67]);
        let mut a = NoteSelector::new();
        a.set_mode(ArpMode::Random);
        let mut b = NoteSelector::new();
        b.set_mode(ArpMode::Random);
        for _ in 0..100 {
            let pa = a.advance(&held).notes[0].pitch;
            let pb = b.advance(&held).notes[0].pitch;
            assert_eq!(pa, pb);
            assert!([60, 64, 67].contains(&pa));
        }
    }

    #[test]
    fn test_empty_selection_when_nothing_held() {
        let held = HeldNotes::new();
        let mut sel = NoteSelector::new();
        assert_eq!(sel.advance(&held).count, 0);
    }

    #[test]
    fn test_single_note_updown() {
        let held = held_of(&[60]);
        let mut sel = NoteSelector::new();
        sel.set_mode(ArpMode::UpDown);
        assert_eq!(run(&mut sel, &held, 3), vec![60, 60, 60]);
    }

    #[test]
    fn test_cursor_clamps_when_held_shrinks() {
        let mut held = held_of(&[60, 64, 67, 72]);
        let mut sel = NoteSelector::new();
        run(&mut sel, &held, 3); // cursor at 3
        held.note_off(67);
        held.note_off(72);
        // Must not panic or go out of range
        let p = sel.advance(&held).notes[0].pitch;
        assert!([60, 64].contains(&p));
    }
}
