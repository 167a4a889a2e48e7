//! Seeded per-agent randomness

use rand::distributions::{Distribution as _, WeightedError, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use uuid::Uuid;

/// Every probabilistic decision an agent makes draws from its own source.
///
/// Two sources built from the same seed produce the same sequence of draws,
/// which is what makes population runs reproducible.
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform draw in `[low, high)`. Degenerate ranges return `low`.
    pub fn uniform_between(&mut self, low: f64, high: f64) -> f64 {
        if low < high {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    /// Draw from the standard normal distribution.
    pub fn gaussian(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// Uniform integer in `[0, bound)`. A zero bound returns zero.
    pub fn bounded_int(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.rng.gen_range(0..bound)
        }
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Zero weights are never selected. Fails when every weight is zero or
    /// any weight is negative or not finite.
    pub fn weighted_choice(&mut self, weights: &[f64]) -> Result<usize, WeightedError> {
        let index = WeightedIndex::new(weights)?;
        Ok(index.sample(&mut self.rng))
    }

    /// A v4-shaped UUID drawn from this source rather than the OS.
    pub fn uuid(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_draws() {
        let mut a = RandomSource::seeded(42);
        let mut b = RandomSource::seeded(42);
        for _ in 0..100 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
            assert_eq!(a.bounded_int(17), b.bounded_int(17));
        }
        assert_eq!(a.uuid(), b.uuid());
    }

    #[test]
    fn zero_weight_is_never_chosen() {
        let mut random = RandomSource::seeded(7);
        for _ in 0..10_000 {
            let pick = random.weighted_choice(&[0.0, 1.0, 0.0]).unwrap();
            assert_eq!(pick, 1);
        }
    }

    #[test]
    fn all_zero_weights_fail() {
        let mut random = RandomSource::seeded(7);
        assert!(random.weighted_choice(&[0.0, 0.0]).is_err());
        assert!(random.weighted_choice(&[]).is_err());
    }

    #[test]
    fn degenerate_range_returns_low() {
        let mut random = RandomSource::seeded(1);
        assert!((random.uniform_between(5.0, 5.0) - 5.0).abs() < f64::EPSILON);
        assert!((random.uniform_between(9.0, 2.0) - 9.0).abs() < f64::EPSILON);
        assert_eq!(random.bounded_int(0), 0);
    }
}
