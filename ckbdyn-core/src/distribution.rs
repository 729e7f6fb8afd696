//! Community-size and membership-count distributions.
//!
//! The engine samples two quantities at every community or node birth: how
//! large a community wants to be and how many communities a node wants to
//! join. Both come in a bounded power-law variant and an empirical variant
//! that resamples observed statistics. All draws go through the engine's
//! generator so runs stay reproducible under a fixed seed.

use std::fmt;

use rand::{Rng, rngs::SmallRng};

use crate::error::{GeneratorError, Result};

/// Source of desired community sizes and the density attached to them.
pub trait SizeDistribution: fmt::Debug {
    /// Draws a desired community size in `[min_size, max_size]`.
    fn draw_size(&mut self, rng: &mut SmallRng) -> usize;

    /// Smallest size this distribution can draw.
    fn min_size(&self) -> usize;

    /// Largest size this distribution can draw.
    fn max_size(&self) -> usize;

    /// Expected value of [`draw_size`](Self::draw_size).
    fn avg_size(&self) -> f64;

    /// Intra-community edge probability for a community of `size` nodes,
    /// clamped to `(0, 1]`.
    fn density(&self, size: usize) -> f64;

    /// Background edge probability observed alongside empirical inputs.
    ///
    /// Analytic distributions return `None` and leave the configured value
    /// in force.
    fn epsilon_override(&self) -> Option<f64> {
        None
    }
}

/// Source of per-node desired membership counts.
pub trait MembershipDistribution: fmt::Debug {
    /// Draws a desired membership count in `[min_memberships, max_memberships]`.
    fn draw_memberships(&mut self, rng: &mut SmallRng) -> usize;

    /// Smallest count this distribution can draw.
    fn min_memberships(&self) -> usize;

    /// Largest count this distribution can draw.
    fn max_memberships(&self) -> usize;

    /// Expected value of [`draw_memberships`](Self::draw_memberships).
    fn avg_memberships(&self) -> f64;
}

/// Bounded discrete power law `p(k) ∝ k^-γ` over `[min, max]`.
///
/// Sampling walks a precomputed cumulative weight table with a binary
/// search, so draws cost O(log(max - min)).
#[derive(Clone, Debug)]
struct BoundedPowerlaw {
    min: usize,
    max: usize,
    cumulative: Vec<f64>,
    total: f64,
    mean: f64,
}

impl BoundedPowerlaw {
    fn new(min: usize, max: usize, exponent: f64, what: &str) -> Result<Self> {
        if min == 0 {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("minimum {what} must be at least 1"),
            });
        }
        if min > max {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("minimum {what} ({min}) must not exceed the maximum ({max})"),
            });
        }
        if !exponent.is_finite() || exponent < 0.0 {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("{what} exponent ({exponent}) must be finite and non-negative"),
            });
        }

        let mut cumulative = Vec::with_capacity(max - min + 1);
        let mut total = 0.0;
        let mut weighted = 0.0;
        for value in min..=max {
            let weight = (value as f64).powf(-exponent);
            total += weight;
            weighted += value as f64 * weight;
            cumulative.push(total);
        }

        Ok(Self {
            min,
            max,
            cumulative,
            total,
            mean: weighted / total,
        })
    }

    fn draw(&self, rng: &mut SmallRng) -> usize {
        let target = rng.gen::<f64>() * self.total;
        let offset = self.cumulative.partition_point(|&c| c <= target);
        self.min + offset.min(self.max - self.min)
    }
}

/// Power-law community sizes with a size-dependent edge density.
#[derive(Clone, Debug)]
pub struct PowerlawSizes {
    law: BoundedPowerlaw,
    edge_probability: f64,
    edge_exponent: f64,
}

impl PowerlawSizes {
    /// Creates a size distribution over `[min, max]` with exponent `γ`
    /// (`p(k) ∝ k^-γ`). A community of size `s` receives edge probability
    /// `edge_probability · s^edge_exponent`, clamped to `(0, 1]`.
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidParameters`] for an empty range, a
    /// negative or non-finite exponent, or an edge probability outside
    /// `(0, 1]`.
    pub fn new(
        min: usize,
        max: usize,
        exponent: f64,
        edge_probability: f64,
        edge_exponent: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&edge_probability) || edge_probability == 0.0 {
            return Err(GeneratorError::InvalidParameters {
                reason: format!(
                    "intra-community edge probability ({edge_probability}) must be in (0, 1]"
                ),
            });
        }
        if !edge_exponent.is_finite() {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("intra-community edge exponent ({edge_exponent}) must be finite"),
            });
        }
        Ok(Self {
            law: BoundedPowerlaw::new(min, max, exponent, "community size")?,
            edge_probability,
            edge_exponent,
        })
    }
}

impl SizeDistribution for PowerlawSizes {
    fn draw_size(&mut self, rng: &mut SmallRng) -> usize {
        self.law.draw(rng)
    }

    fn min_size(&self) -> usize {
        self.law.min
    }

    fn max_size(&self) -> usize {
        self.law.max
    }

    fn avg_size(&self) -> f64 {
        self.law.mean
    }

    fn density(&self, size: usize) -> f64 {
        let raw = self.edge_probability * (size.max(1) as f64).powf(self.edge_exponent);
        raw.clamp(f64::MIN_POSITIVE, 1.0)
    }
}

/// Power-law per-node membership counts.
#[derive(Clone, Debug)]
pub struct PowerlawMemberships {
    law: BoundedPowerlaw,
}

impl PowerlawMemberships {
    /// Creates a membership distribution over `[min, max]` with exponent
    /// `γ` (`p(k) ∝ k^-γ`).
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidParameters`] for an empty range or a
    /// negative or non-finite exponent.
    pub fn new(min: usize, max: usize, exponent: f64) -> Result<Self> {
        Ok(Self {
            law: BoundedPowerlaw::new(min, max, exponent, "community membership")?,
        })
    }
}

impl MembershipDistribution for PowerlawMemberships {
    fn draw_memberships(&mut self, rng: &mut SmallRng) -> usize {
        self.law.draw(rng)
    }

    fn min_memberships(&self) -> usize {
        self.law.min
    }

    fn max_memberships(&self) -> usize {
        self.law.max
    }

    fn avg_memberships(&self) -> f64 {
        self.law.mean
    }
}

fn observation_stats(observations: &[usize], what: &str) -> Result<(usize, usize, f64)> {
    if observations.is_empty() {
        return Err(GeneratorError::InvalidParameters {
            reason: format!("empirical {what} input must contain at least one observation"),
        });
    }
    if observations.contains(&0) {
        return Err(GeneratorError::InvalidParameters {
            reason: format!("empirical {what} observations must be at least 1"),
        });
    }
    let min = *observations.iter().min().expect("observations are non-empty");
    let max = *observations.iter().max().expect("observations are non-empty");
    let mean = observations.iter().sum::<usize>() as f64 / observations.len() as f64;
    Ok((min, max, mean))
}

/// Community sizes resampled from an observed cover.
///
/// Carries the background edge probability observed alongside the cover,
/// which overrides the configured `epsilon`.
#[derive(Clone, Debug)]
pub struct EmpiricalSizes {
    observations: Vec<usize>,
    min: usize,
    max: usize,
    mean: f64,
    edge_probability: f64,
    edge_exponent: f64,
    epsilon: f64,
}

impl EmpiricalSizes {
    /// Builds a sampler drawing uniformly from the observed community sizes.
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidParameters`] when the observations
    /// are empty or contain zero-sized communities, or when
    /// `edge_probability` or `epsilon` fall outside `(0, 1]` and `[0, 1]`
    /// respectively.
    pub fn from_observations(
        observations: &[usize],
        edge_probability: f64,
        edge_exponent: f64,
        epsilon: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&edge_probability) || edge_probability == 0.0 {
            return Err(GeneratorError::InvalidParameters {
                reason: format!(
                    "intra-community edge probability ({edge_probability}) must be in (0, 1]"
                ),
            });
        }
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("observed epsilon ({epsilon}) must be in [0, 1]"),
            });
        }
        let (min, max, mean) = observation_stats(observations, "community size")?;
        Ok(Self {
            observations: observations.to_vec(),
            min,
            max,
            mean,
            edge_probability,
            edge_exponent,
            epsilon,
        })
    }
}

impl SizeDistribution for EmpiricalSizes {
    fn draw_size(&mut self, rng: &mut SmallRng) -> usize {
        self.observations[rng.gen_range(0..self.observations.len())]
    }

    fn min_size(&self) -> usize {
        self.min
    }

    fn max_size(&self) -> usize {
        self.max
    }

    fn avg_size(&self) -> f64 {
        self.mean
    }

    fn density(&self, size: usize) -> f64 {
        let raw = self.edge_probability * (size.max(1) as f64).powf(self.edge_exponent);
        raw.clamp(f64::MIN_POSITIVE, 1.0)
    }

    fn epsilon_override(&self) -> Option<f64> {
        Some(self.epsilon)
    }
}

/// Membership counts resampled from an observed cover.
#[derive(Clone, Debug)]
pub struct EmpiricalMemberships {
    observations: Vec<usize>,
    min: usize,
    max: usize,
    mean: f64,
}

impl EmpiricalMemberships {
    /// Builds a sampler drawing uniformly from the observed per-node
    /// membership counts.
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidParameters`] when the observations
    /// are empty or contain zero counts.
    pub fn from_observations(observations: &[usize]) -> Result<Self> {
        let (min, max, mean) = observation_stats(observations, "membership")?;
        Ok(Self {
            observations: observations.to_vec(),
            min,
            max,
            mean,
        })
    }
}

impl MembershipDistribution for EmpiricalMemberships {
    fn draw_memberships(&mut self, rng: &mut SmallRng) -> usize {
        self.observations[rng.gen_range(0..self.observations.len())]
    }

    fn min_memberships(&self) -> usize {
        self.min
    }

    fn max_memberships(&self) -> usize {
        self.max
    }

    fn avg_memberships(&self) -> f64 {
        self.mean
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rstest::rstest;

    use super::*;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[rstest]
    #[case(2, 2)]
    #[case(3, 9)]
    #[case(5, 40)]
    fn powerlaw_sizes_stay_within_bounds(#[case] min: usize, #[case] max: usize) {
        let mut sizes = PowerlawSizes::new(min, max, 2.5, 0.5, -0.5).expect("parameters are valid");
        let mut rng = rng();
        for _ in 0..500 {
            let size = sizes.draw_size(&mut rng);
            assert!(size >= min && size <= max, "size {size} out of [{min}, {max}]");
        }
    }

    #[test]
    fn degenerate_range_always_draws_its_only_value() {
        let mut sizes = PowerlawSizes::new(4, 4, 2.5, 0.5, -0.5).expect("parameters are valid");
        let mut rng = rng();
        for _ in 0..50 {
            assert_eq!(sizes.draw_size(&mut rng), 4);
        }
        assert!((sizes.avg_size() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn exponent_zero_is_uniform_in_expectation() {
        let memberships = PowerlawMemberships::new(1, 3, 0.0).expect("parameters are valid");
        assert!((memberships.avg_memberships() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn larger_exponent_prefers_small_values() {
        let flat = PowerlawSizes::new(2, 20, 0.5, 0.5, -0.5).expect("parameters are valid");
        let steep = PowerlawSizes::new(2, 20, 3.0, 0.5, -0.5).expect("parameters are valid");
        assert!(steep.avg_size() < flat.avg_size());
    }

    #[test]
    fn density_is_clamped_to_a_probability() {
        let sizes = PowerlawSizes::new(2, 50, 2.5, 0.9, 0.5).expect("parameters are valid");
        for size in 2..=50 {
            let density = sizes.density(size);
            assert!(density > 0.0 && density <= 1.0);
        }
    }

    #[test]
    fn rejects_inverted_range() {
        let err = PowerlawSizes::new(9, 3, 2.5, 0.5, -0.5).expect_err("range is inverted");
        assert!(matches!(err, GeneratorError::InvalidParameters { .. }));
    }

    #[test]
    fn empirical_draws_only_observed_values() {
        let observed = [3_usize, 3, 5, 8];
        let mut sizes =
            EmpiricalSizes::from_observations(&observed, 0.5, -0.5, 0.01).expect("input is valid");
        let mut rng = rng();
        for _ in 0..200 {
            assert!(observed.contains(&sizes.draw_size(&mut rng)));
        }
        assert_eq!(sizes.min_size(), 3);
        assert_eq!(sizes.max_size(), 8);
        assert!((sizes.avg_size() - 4.75).abs() < 1e-12);
        assert_eq!(sizes.epsilon_override(), Some(0.01));
    }

    #[test]
    fn empirical_rejects_empty_input() {
        let err = EmpiricalMemberships::from_observations(&[]).expect_err("input is empty");
        assert!(matches!(err, GeneratorError::InvalidParameters { .. }));
    }
}
