// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use readout_common::DeviceTraits;

/// Push a frequency that sits just above a filter-bank bin multiple past the edge.
pub fn nudge_off_bin_edge(frequency: f64, bin_width: f64, threshold: f64) -> f64 {
    if frequency.rem_euclid(bin_width) < threshold {
        frequency + threshold
    } else {
        frequency
    }
}

/// Seedable jitter applied to tone frequencies before they are written.
///
/// Every frequency gets a uniform offset in `[-jitter, jitter)` and is then
/// moved off the nearest filter-bank bin edge. The same seed always yields the
/// same frequencies.
#[derive(Debug, Clone)]
pub struct TonePerturbation {
    rng: ChaCha8Rng,
    jitter: f64,
    bin_width: f64,
    threshold: f64,
}

impl TonePerturbation {
    pub fn new(traits: &DeviceTraits, seed: u64) -> Self {
        TonePerturbation {
            rng: ChaCha8Rng::seed_from_u64(seed),
            jitter: traits.tone_jitter.value(),
            bin_width: traits.bin_width().value(),
            threshold: traits.bin_edge_threshold.value(),
        }
    }

    /// Independent perturbation whose seed is drawn from this one.
    pub fn fork(&mut self) -> Self {
        TonePerturbation {
            rng: ChaCha8Rng::seed_from_u64(self.rng.next_u64()),
            ..self.clone()
        }
    }

    pub fn perturb(&mut self, frequency: f64) -> f64 {
        let jittered = if self.jitter > 0.0 {
            frequency + self.rng.gen_range(-self.jitter..self.jitter)
        } else {
            frequency
        };
        nudge_off_bin_edge(jittered, self.bin_width, self.threshold)
    }

    pub fn perturb_all(&mut self, frequencies: &mut [f64]) {
        for f in frequencies.iter_mut() {
            *f = self.perturb(*f);
        }
    }
}

#[cfg(test)]
mod tests {
    use readout_common::CRS_TRAITS;

    use super::*;

    #[test]
    fn test_nudge_off_bin_edge() {
        let width = CRS_TRAITS.bin_width().value();
        assert_eq!(nudge_off_bin_edge(3.0 * width + 50.0, width, 101.0), 3.0 * width + 151.0);
        assert_eq!(nudge_off_bin_edge(3.0 * width + 150.0, width, 101.0), 3.0 * width + 150.0);
        assert_eq!(nudge_off_bin_edge(3.0 * width - 50.0, width, 101.0), 3.0 * width - 50.0);
    }

    #[test]
    fn test_perturbation_is_seeded() {
        let frequencies = [5.001e8, 7.25e8, 1.2e9];
        let run = |seed| {
            let mut out = frequencies;
            TonePerturbation::new(&CRS_TRAITS, seed).perturb_all(&mut out);
            out
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_perturbation_bounds() {
        let mut perturbation = TonePerturbation::new(&CRS_TRAITS, 1);
        let width = CRS_TRAITS.bin_width().value();
        for i in 0..1000 {
            let f = 4e8 + f64::from(i) * 1234.5;
            let p = perturbation.perturb(f);
            assert!((p - f).abs() < 50.0 + 101.0);
            assert!(p.rem_euclid(width) >= 101.0);
        }
    }

    #[test]
    fn test_fork_is_deterministic() {
        let mut a = TonePerturbation::new(&CRS_TRAITS, 3);
        let mut b = TonePerturbation::new(&CRS_TRAITS, 3);
        assert_eq!(a.fork().perturb(6e8), b.fork().perturb(6e8));
    }
}
