//! Particle representation, resampling schemes and point estimates.
//!
//! The resampling functions in this module work purely on weights and return the indices of the
//! particles to keep. This keeps them independent of the state type carried by the filter and
//! lets the index selection be checked against hand-computed thresholds.
use crate::error::{FilterError, Result};

use nalgebra::{DMatrix, DVector, SVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// A single weighted hypothesis of the system state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle<S> {
    pub weight: f64,
    pub state: S,
}
impl<S: Debug> Display for Particle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("weight", &self.weight)
            .field("state", &self.state)
            .finish()
    }
}
impl<S> Particle<S> {
    pub fn new(weight: f64, state: S) -> Particle<S> {
        Particle { weight, state }
    }
}
impl<S> From<(f64, S)> for Particle<S> {
    fn from(tuple: (f64, S)) -> Self {
        let (weight, state) = tuple;
        Particle::new(weight, state)
    }
}

/// Index-selection scheme used to draw the next population from the weighted proposals.
///
/// Systematic resampling places its positions on `[0, 1)` and walks the raw cumulative weights,
/// so it expects weights that sum to one; enable
/// [`ParticleFilterConfig::normalize_weights`](crate::filter::ParticleFilterConfig) when the
/// observation likelihood does not produce normalized weights. Stratified and multinomial
/// resampling scale their positions by the total weight, and residual resampling derives copy
/// counts from the weights divided by their total, so those three accept unnormalized weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// One uniform offset in `[0, 1/N)` plus N evenly spaced strides.
    #[default]
    Systematic,
    /// One uniform draw inside each of the N equal strata of the total weight.
    Stratified,
    /// N independent uniform draws over the total weight.
    Multinomial,
    /// Deterministic copies of `floor(N * w)` followed by systematic resampling of the residuals.
    Residual,
}
impl Display for ResamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplingStrategy::Systematic => "systematic",
            ResamplingStrategy::Stratified => "stratified",
            ResamplingStrategy::Multinomial => "multinomial",
            ResamplingStrategy::Residual => "residual",
        };
        write!(f, "{}", name)
    }
}
impl ResamplingStrategy {
    /// Select `weights.len()` indices in proportion to `weights`, drawing randomness from `rng`.
    ///
    /// # Errors
    /// Returns [`FilterError::DegenerateWeights`] if the total weight is zero or any weight is
    /// NaN, infinite or negative.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
        if weights.is_empty() {
            return Ok(Vec::new());
        }
        let step = 1.0 / weights.len() as f64;
        match self {
            ResamplingStrategy::Systematic => {
                let offset = rng.random::<f64>() * step;
                systematic_resample(weights, offset)
            }
            ResamplingStrategy::Stratified => stratified_resample(weights, rng),
            ResamplingStrategy::Multinomial => multinomial_resample(weights, rng),
            ResamplingStrategy::Residual => residual_resample(weights, rng),
        }
    }
}

/// Sum the weights, rejecting distributions that cannot be resampled.
///
/// # Errors
/// Returns [`FilterError::DegenerateWeights`] if any weight is NaN, infinite or negative, or if
/// the weights sum to zero.
pub fn total_weight(weights: &[f64]) -> Result<f64> {
    let total: f64 = weights.iter().sum();
    let valid = weights.iter().all(|w| w.is_finite() && *w >= 0.0);
    if !valid || !total.is_finite() || total <= 0.0 {
        return Err(FilterError::DegenerateWeights {
            total_weight: total,
        });
    }
    Ok(total)
}

/// Walk the cumulative weights once, selecting for each (non-decreasing) position the first
/// index whose cumulative weight reaches it. The cursor never moves backwards and stops at the
/// last particle when the positions exceed the total weight.
fn select_indices<I: IntoIterator<Item = f64>>(weights: &[f64], positions: I) -> Vec<usize> {
    let last = weights.len() - 1;
    let mut indices = Vec::with_capacity(weights.len());
    let mut i = 0;
    let mut cumulative = weights[0];
    for position in positions {
        while position > cumulative && i < last {
            i += 1;
            cumulative += weights[i];
        }
        indices.push(i);
    }
    indices
}

/// Systematic (low-variance) resampling with a caller-supplied offset.
///
/// Position `m` is `offset + m / N`. `offset` is normally drawn uniformly from `[0, 1/N)`.
///
/// # Example
/// ```
/// use dust::particle::systematic_resample;
///
/// let indices = systematic_resample(&[0.1, 0.4, 0.4, 0.1], 0.05).unwrap();
/// assert_eq!(indices, vec![0, 1, 2, 2]);
/// ```
pub fn systematic_resample(weights: &[f64], offset: f64) -> Result<Vec<usize>> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    total_weight(weights)?;
    let n = weights.len();
    let step = 1.0 / n as f64;
    Ok(select_indices(
        weights,
        (0..n).map(|m| offset + m as f64 * step),
    ))
}

/// Stratified resampling: one independent draw inside each stratum `[m/N, (m+1)/N)` of the
/// total weight.
pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    let total = total_weight(weights)?;
    let n = weights.len();
    let step = total / n as f64;
    let positions: Vec<f64> = (0..n)
        .map(|m| (m as f64 + rng.random::<f64>()) * step)
        .collect();
    Ok(select_indices(weights, positions))
}

/// Multinomial resampling: N independent uniform draws on `[0, total)`.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    let total = total_weight(weights)?;
    let mut positions: Vec<f64> = (0..weights.len())
        .map(|_| rng.random::<f64>() * total)
        .collect();
    positions.sort_by(f64::total_cmp);
    Ok(select_indices(weights, positions))
}

/// Residual resampling.
///
/// Each particle first receives `floor(N * w / total)` copies; the remaining slots are filled by
/// systematic resampling over the fractional residuals.
pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    let total = total_weight(weights)?;
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let expected = n as f64 * w / total;
        let copies = expected.floor() as usize;
        residual[i] = expected - copies as f64;
        for _ in 0..copies {
            indices.push(i);
        }
    }
    indices.truncate(n);
    let residual_particles = n - indices.len();
    if residual_particles > 0 {
        let sum_residual: f64 = residual.iter().sum();
        let step = sum_residual / residual_particles as f64;
        let offset = rng.random::<f64>() * step;
        indices.extend(select_indices(
            &residual,
            (0..residual_particles).map(|k| offset + k as f64 * step),
        ));
    }
    Ok(indices)
}

/// Conversion of a filter state into a column vector for computing point estimates.
pub trait StateVector {
    fn to_state_vector(&self) -> DVector<f64>;
}
impl StateVector for DVector<f64> {
    fn to_state_vector(&self) -> DVector<f64> {
        self.clone()
    }
}
impl<const D: usize> StateVector for SVector<f64, D> {
    fn to_state_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.as_slice())
    }
}
impl StateVector for f64 {
    fn to_state_vector(&self) -> DVector<f64> {
        DVector::from_element(1, *self)
    }
}

/// How a point estimate is extracted from the particle cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    /// Mean and covariance of the most recent weighted proposals.
    #[default]
    WeightedAverage,
    /// Mean and covariance of the resampled (uniformly weighted) population.
    UnweightedAverage,
    /// State of the highest weighted proposal, with zero covariance.
    HighestWeight,
}
impl ParticleAveragingStrategy {
    /// Weighted mean and covariance. `None` if `particles` is empty or carries no weight.
    pub fn weighted_average_state<S: StateVector>(
        particles: &[Particle<S>],
    ) -> Option<(DVector<f64>, DMatrix<f64>)> {
        let total: f64 = particles.iter().map(|p| p.weight).sum();
        if particles.is_empty() || total <= 0.0 || !total.is_finite() {
            return None;
        }
        let vectors: Vec<DVector<f64>> = particles
            .iter()
            .map(|p| p.state.to_state_vector())
            .collect();
        let state_size = vectors[0].len();
        let mut mean = DVector::<f64>::zeros(state_size);
        for (particle, x) in particles.iter().zip(vectors.iter()) {
            mean += (particle.weight / total) * x;
        }
        let mut cov = DMatrix::<f64>::zeros(state_size, state_size);
        for (particle, x) in particles.iter().zip(vectors.iter()) {
            let diff = x - &mean;
            cov += (particle.weight / total) * &diff * diff.transpose();
        }
        Some((mean, cov))
    }
    /// Sample mean and covariance of an unweighted population. `None` if `states` is empty.
    pub fn unweighted_average_state<S: StateVector>(
        states: &[S],
    ) -> Option<(DVector<f64>, DMatrix<f64>)> {
        if states.is_empty() {
            return None;
        }
        let n = states.len() as f64;
        let vectors: Vec<DVector<f64>> = states.iter().map(|s| s.to_state_vector()).collect();
        let state_size = vectors[0].len();
        let mut mean = DVector::<f64>::zeros(state_size);
        for x in &vectors {
            mean += x / n;
        }
        let mut cov = DMatrix::<f64>::zeros(state_size, state_size);
        for x in &vectors {
            let diff = x - &mean;
            cov += (1.0 / n) * &diff * diff.transpose();
        }
        Some((mean, cov))
    }
    /// First particle with the largest weight (lowest index wins ties).
    pub fn highest_weight_particle<S>(particles: &[Particle<S>]) -> Option<&Particle<S>> {
        particles.iter().fold(None, |best, p| match best {
            Some(b) if b.weight >= p.weight => Some(b),
            _ => Some(p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_systematic_hand_computed_thresholds() {
        // thresholds 0.05, 0.30, 0.55, 0.80 against cumulative 0.1, 0.5, 0.9, 1.0
        let indices = systematic_resample(&[0.1, 0.4, 0.4, 0.1], 0.05).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 2]);
    }

    #[test]
    fn test_systematic_ties_prefer_lower_index() {
        // position 0.25 lands exactly on the first cumulative boundary
        let indices = systematic_resample(&[0.25, 0.25, 0.25, 0.25], 0.0).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_systematic_clamps_when_weights_sum_below_one() {
        let indices = systematic_resample(&[0.1, 0.1, 0.1], 0.3).unwrap();
        assert_eq!(indices.len(), 3);
        assert!(indices.iter().all(|&i| i < 3));
        assert_eq!(indices, vec![2, 2, 2]);
    }

    #[test]
    fn test_systematic_single_particle() {
        assert_eq!(systematic_resample(&[0.7], 0.5).unwrap(), vec![0]);
    }

    #[test]
    fn test_degenerate_weights_rejected() {
        for n in 1..=8 {
            let weights = vec![0.0; n];
            let err = systematic_resample(&weights, 0.0).unwrap_err();
            assert!(matches!(err, FilterError::DegenerateWeights { .. }));
        }
        assert!(total_weight(&[0.5, f64::NAN]).is_err());
        assert!(total_weight(&[0.5, f64::INFINITY]).is_err());
        assert!(total_weight(&[0.5, -0.1, 0.6]).is_err());
        assert_approx_eq!(total_weight(&[0.25, 0.75]).unwrap(), 1.0, 1e-12);
    }

    #[test]
    fn test_all_strategies_return_n_valid_indices() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [0.05, 0.3, 0.0, 0.15, 0.4, 0.1];
        for strategy in [
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Residual,
        ] {
            let indices = strategy.resample(&weights, &mut rng).unwrap();
            assert_eq!(indices.len(), weights.len(), "{strategy}");
            assert!(indices.iter().all(|&i| i < weights.len()), "{strategy}");
            assert!(!indices.contains(&2), "{strategy} selected a zero-weight particle");
        }
    }

    #[test]
    fn test_all_strategies_reject_zero_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        for strategy in [
            ResamplingStrategy::Systematic,
            ResamplingStrategy::Stratified,
            ResamplingStrategy::Multinomial,
            ResamplingStrategy::Residual,
        ] {
            assert!(strategy.resample(&[0.0, 0.0, 0.0], &mut rng).is_err());
        }
    }

    #[test]
    fn test_random_strategies_accept_unnormalized_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        // stratified places exactly one position in each particle's quarter of the total
        let indices = stratified_resample(&[1.0, 1.0, 1.0, 1.0], &mut rng).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let weights = vec![2.0; 64];
        let indices = multinomial_resample(&weights, &mut rng).unwrap();
        assert_eq!(indices.len(), 64);
        let distinct: std::collections::HashSet<usize> = indices.iter().copied().collect();
        assert!(distinct.len() > 16, "only {} distinct indices", distinct.len());
        assert!(indices.iter().any(|&i| i >= 32));
    }

    #[test]
    fn test_residual_deterministic_copies() {
        let mut rng = StdRng::seed_from_u64(1);
        // N * w = [2, 1, 1, 0]; no residual slots remain
        let indices = residual_resample(&[0.5, 0.25, 0.25, 0.0], &mut rng).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
        let indices = residual_resample(&[2.0, 1.0, 1.0, 0.0], &mut rng).unwrap();
        assert_eq!(indices, vec![0, 0, 1, 2]);
    }

    #[test]
    fn test_weighted_average_state() {
        let particles = vec![
            Particle::new(0.25, DVector::from_vec(vec![0.0, 2.0])),
            Particle::new(0.75, DVector::from_vec(vec![4.0, 2.0])),
        ];
        let (mean, cov) = ParticleAveragingStrategy::weighted_average_state(&particles).unwrap();
        assert_approx_eq!(mean[0], 3.0, 1e-12);
        assert_approx_eq!(mean[1], 2.0, 1e-12);
        assert_approx_eq!(cov[(0, 0)], 3.0, 1e-12);
        assert_approx_eq!(cov[(1, 1)], 0.0, 1e-12);
    }

    #[test]
    fn test_unweighted_average_state() {
        let states = vec![1.0, 2.0, 3.0, 6.0];
        let (mean, cov) = ParticleAveragingStrategy::unweighted_average_state(&states).unwrap();
        assert_approx_eq!(mean[0], 3.0, 1e-12);
        assert_approx_eq!(cov[(0, 0)], 3.5, 1e-12);
        assert!(ParticleAveragingStrategy::unweighted_average_state::<f64>(&[]).is_none());
    }

    #[test]
    fn test_highest_weight_first_wins_ties() {
        let particles = vec![
            Particle::new(0.2, 'a'),
            Particle::new(0.4, 'b'),
            Particle::new(0.4, 'c'),
        ];
        let best = ParticleAveragingStrategy::highest_weight_particle(&particles).unwrap();
        assert_eq!(best.state, 'b');
    }

    #[test]
    fn test_svector_state_vector() {
        let x = nalgebra::Vector2::new(1.5, -2.0);
        assert_eq!(x.to_state_vector(), DVector::from_vec(vec![1.5, -2.0]));
    }
}
