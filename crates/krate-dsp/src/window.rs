//! Analysis/synthesis window

use std::f64::consts::PI;

use krate_core::Sample;

/// Constant-overlap-add gain for a Hann window applied on both analysis
/// and synthesis at 75 % overlap (hop = N/4): the shifted window squares
/// sum to 3/2, so the output is scaled by 2/3.
pub const COLA_GAIN: Sample = 2.0 / 3.0;

/// Periodic Hann window of length `size`.
pub fn hann(size: usize) -> Vec<Sample> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hann_endpoints_and_peak() {
        let w = hann(1024);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[512], 1.0);
    }

    #[test]
    fn test_squared_overlap_sums_to_three_halves() {
        // Periodic Hann at hop N/4: sum of the four shifted squares is a
        // flat 3/2, which is what COLA_GAIN compensates.
        let n = 1024;
        let hop = n / 4;
        let w = hann(n);
        for i in 0..hop {
            let sum: f64 = (0..4).map(|k| w[i + k * hop] * w[i + k * hop]).sum();
            assert_relative_eq!(sum, 1.5, epsilon = 1e-9);
            assert_relative_eq!(sum * COLA_GAIN, 1.0, epsilon = 1e-9);
        }
    }
}
