//! Trig conditions
//!
//! Per-step boolean gates evaluated from the loop counter, a dedicated
//! PRNG, or the live fill flag. The numeric order is part of the
//! persisted format and must not change.

use serde::{Deserialize, Serialize};

use krate_core::Xorshift32;

/// Number of defined conditions.
pub const CONDITION_COUNT: u8 = 18;

/// Per-step trig condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrigCondition {
    #[default]
    Always = 0,
    Prob10 = 1,
    Prob25 = 2,
    Prob50 = 3,
    Prob75 = 4,
    Prob90 = 5,
    Ratio1_2 = 6,
    Ratio2_2 = 7,
    Ratio1_3 = 8,
    Ratio2_3 = 9,
    Ratio3_3 = 10,
    Ratio1_4 = 11,
    Ratio2_4 = 12,
    Ratio3_4 = 13,
    Ratio4_4 = 14,
    First = 15,
    Fill = 16,
    NotFill = 17,
}

impl TrigCondition {
    /// Map a lane cell to a condition; out-of-range values behave as
    /// Always.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => TrigCondition::Always,
            1 => TrigCondition::Prob10,
            2 => TrigCondition::Prob25,
            3 => TrigCondition::Prob50,
            4 => TrigCondition::Prob75,
            5 => TrigCondition::Prob90,
            6 => TrigCondition::Ratio1_2,
            7 => TrigCondition::Ratio2_2,
            8 => TrigCondition::Ratio1_3,
            9 => TrigCondition::Ratio2_3,
            10 => TrigCondition::Ratio3_3,
            11 => TrigCondition::Ratio1_4,
            12 => TrigCondition::Ratio2_4,
            13 => TrigCondition::Ratio3_4,
            14 => TrigCondition::Ratio4_4,
            15 => TrigCondition::First,
            16 => TrigCondition::Fill,
            17 => TrigCondition::NotFill,
            _ => TrigCondition::Always,
        }
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Probability for the probabilistic conditions.
    fn probability(self) -> Option<f64> {
        match self {
            TrigCondition::Prob10 => Some(0.10),
            TrigCondition::Prob25 => Some(0.25),
            TrigCondition::Prob50 => Some(0.50),
            TrigCondition::Prob75 => Some(0.75),
            TrigCondition::Prob90 => Some(0.90),
            _ => None,
        }
    }

    /// (A, B) for the A:B loop-ratio conditions.
    fn ratio(self) -> Option<(u64, u64)> {
        match self {
            TrigCondition::Ratio1_2 => Some((1, 2)),
            TrigCondition::Ratio2_2 => Some((2, 2)),
            TrigCondition::Ratio1_3 => Some((1, 3)),
            TrigCondition::Ratio2_3 => Some((2, 3)),
            TrigCondition::Ratio3_3 => Some((3, 3)),
            TrigCondition::Ratio1_4 => Some((1, 4)),
            TrigCondition::Ratio2_4 => Some((2, 4)),
            TrigCondition::Ratio3_4 => Some((3, 4)),
            TrigCondition::Ratio4_4 => Some((4, 4)),
            _ => None,
        }
    }

    /// Decide whether the step fires. `loop_count` is the index of the
    /// condition-lane cycle the step belongs to. Probability conditions
    /// draw from the PRNG exactly once; every other condition draws
    /// nothing.
    pub fn evaluate(self, loop_count: u64, fill_active: bool, rng: &mut Xorshift32) -> bool {
        if let Some(p) = self.probability() {
            return rng.next_unipolar() < p;
        }
        if let Some((a, b)) = self.ratio() {
            return loop_count % b == a - 1;
        }
        match self {
            TrigCondition::First => loop_count == 0,
            TrigCondition::Fill => fill_active,
            TrigCondition::NotFill => !fill_active,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krate_core::CONDITION_SEED;

    #[test]
    fn test_index_roundtrip() {
        for i in 0..CONDITION_COUNT {
            assert_eq!(TrigCondition::from_index(i).index(), i);
        }
    }

    #[test]
    fn test_out_of_range_is_always() {
        assert_eq!(TrigCondition::from_index(18), TrigCondition::Always);
        assert_eq!(TrigCondition::from_index(255), TrigCondition::Always);
    }

    #[test]
    fn test_ratio_two_of_four() {
        let mut rng = Xorshift32::new(CONDITION_SEED);
        let cond = TrigCondition::Ratio2_4;
        let fired: Vec<u64> = (0..12)
            .filter(|&lc| cond.evaluate(lc, false, &mut rng))
            .collect();
        assert_eq!(fired, vec![1, 5, 9]);
    }

    #[test]
    fn test_first_only_on_cycle_zero() {
        let mut rng = Xorshift32::new(CONDITION_SEED);
        assert!(TrigCondition::First.evaluate(0, false, &mut rng));
        assert!(!TrigCondition::First.evaluate(1, false, &mut rng));
    }

    #[test]
    fn test_fill_pair() {
        let mut rng = Xorshift32::new(CONDITION_SEED);
        assert!(TrigCondition::Fill.evaluate(0, true, &mut rng));
        assert!(!TrigCondition::Fill.evaluate(0, false, &mut rng));
        assert!(TrigCondition::NotFill.evaluate(0, false, &mut rng));
        assert!(!TrigCondition::NotFill.evaluate(0, true, &mut rng));
    }

    /// Non-probability conditions must not touch the PRNG.
    #[test]
    fn test_prng_economy() {
        let mut rng = Xorshift32::new(CONDITION_SEED);
        let mut probe = rng.clone();
        for cond in [
            TrigCondition::Always,
            TrigCondition::Ratio1_2,
            TrigCondition::Ratio4_4,
            TrigCondition::First,
            TrigCondition::Fill,
            TrigCondition::NotFill,
        ] {
            cond.evaluate(3, true, &mut rng);
        }
        assert_eq!(rng.next_u32(), probe.next_u32());

        // One draw per probability evaluation
        let mut rng = Xorshift32::new(CONDITION_SEED);
        let mut probe = rng.clone();
        TrigCondition::Prob50.evaluate(0, false, &mut rng);
        probe.next_unipolar();
        assert_eq!(rng.next_u32(), probe.next_u32());
    }

    #[test]
    fn test_probability_distribution() {
        let mut rng = Xorshift32::new(CONDITION_SEED);
        let n = 10_000;
        let hits = (0..n)
            .filter(|_| TrigCondition::Prob25.evaluate(0, false, &mut rng))
            .count();
        assert!((2200..=2800).contains(&hits), "Prob25 fired {hits}/10000");
    }
}
