//! Generic sequential Monte Carlo (particle) filter.
//!
//! The filter keeps a population of `N` state hypotheses. Each call to
//! [`ParticleFilter::update`] pushes every hypothesis through the motion model, scores the
//! proposal against the new observation and draws a fresh population in proportion to those
//! scores. The motion model, observation likelihood and prior sampler are injected as closures,
//! so a new model never requires a new filter type.
//!
//! # Example
//!
//! ```rust
//! use dust::filter::{ParticleFilter, ParticleFilterConfig};
//!
//! let config = ParticleFilterConfig {
//!     num_particles: 100,
//!     normalize_weights: true,
//!     ..Default::default()
//! };
//! let mut state = 0.0_f64;
//! let mut pf = ParticleFilter::<f64, f64>::builder(config)
//!     .with_prior(move || {
//!         state += 0.1;
//!         state
//!     })
//!     .with_motion_model(|x: &f64, dt: f64| x + dt)
//!     .with_observation_likelihood(|z: &f64, x: &f64| (-0.5 * (z - x).powi(2)).exp())
//!     .build()
//!     .unwrap();
//!
//! pf.update(&5.0, 1.0).unwrap();
//! assert_eq!(pf.particles().len(), 100);
//! let (weight, best) = pf.estimate_largest_weight();
//! assert!(weight > 0.0);
//! assert!((best - 5.0).abs() < 0.1);
//! ```
use crate::error::{FilterError, Result};
use crate::particle::{
    Particle, ParticleAveragingStrategy, ResamplingStrategy, StateVector, total_weight,
};

use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Draws a fresh state from the prior (or uniform) distribution.
pub type PriorSampler<S> = Box<dyn FnMut() -> S>;
/// Advances a state hypothesis by `dt`.
pub type MotionModel<S> = Box<dyn FnMut(&S, f64) -> S>;
/// Scores an observation against a proposed state. Must return a non-negative value.
pub type ObservationLikelihood<S, Z> = Box<dyn FnMut(&Z, &S) -> f64>;

/// Particle filter configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    /// Population size, fixed for the lifetime of the filter.
    pub num_particles: usize,
    /// Seed of the random generator used for resampling.
    pub seed: u64,
    pub resampling_strategy: ResamplingStrategy,
    /// Divide the weighted proposals by their total before resampling.
    pub normalize_weights: bool,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 500,
            seed: 42,
            resampling_strategy: ResamplingStrategy::Systematic,
            normalize_weights: false,
        }
    }
}

/// Assembles a [`ParticleFilter`] from its configuration and models.
pub struct ParticleFilterBuilder<S, Z> {
    config: ParticleFilterConfig,
    prior: Option<PriorSampler<S>>,
    initial_state: Option<S>,
    motion: Option<MotionModel<S>>,
    likelihood: Option<ObservationLikelihood<S, Z>>,
}

impl<S: Clone, Z> ParticleFilterBuilder<S, Z> {
    pub fn new(config: ParticleFilterConfig) -> Self {
        Self {
            config,
            prior: None,
            initial_state: None,
            motion: None,
            likelihood: None,
        }
    }
    /// Sampler used to draw the population on construction and on every [`ParticleFilter::reset`].
    pub fn with_prior<F>(mut self, prior: F) -> Self
    where
        F: FnMut() -> S + 'static,
    {
        self.prior = Some(Box::new(prior));
        self
    }
    /// Start every particle from a copy of `state`. Takes precedence over the prior sampler for
    /// the initial population; `reset` still draws from the sampler when one is given.
    pub fn with_initial_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }
    pub fn with_motion_model<F>(mut self, motion: F) -> Self
    where
        F: FnMut(&S, f64) -> S + 'static,
    {
        self.motion = Some(Box::new(motion));
        self
    }
    pub fn with_observation_likelihood<F>(mut self, likelihood: F) -> Self
    where
        F: FnMut(&Z, &S) -> f64 + 'static,
    {
        self.likelihood = Some(Box::new(likelihood));
        self
    }
    /// Validate the configuration and draw the initial population.
    ///
    /// # Errors
    /// [`FilterError::InvalidConfiguration`] if `num_particles` is zero, if neither a prior
    /// sampler nor an initial state was given, or if a model is missing.
    pub fn build(self) -> Result<ParticleFilter<S, Z>> {
        if self.config.num_particles == 0 {
            return Err(FilterError::InvalidConfiguration(
                "num_particles must be positive".to_string(),
            ));
        }
        if self.prior.is_none() && self.initial_state.is_none() {
            return Err(FilterError::InvalidConfiguration(
                "either a prior sampler or an initial state is required".to_string(),
            ));
        }
        let motion = self.motion.ok_or_else(|| {
            FilterError::InvalidConfiguration("a motion model is required".to_string())
        })?;
        let likelihood = self.likelihood.ok_or_else(|| {
            FilterError::InvalidConfiguration("an observation likelihood is required".to_string())
        })?;
        let n = self.config.num_particles;
        let rng = StdRng::seed_from_u64(self.config.seed);
        let mut filter = ParticleFilter {
            particles: Vec::with_capacity(n),
            weighted: Vec::with_capacity(n),
            proposals: Vec::with_capacity(n),
            prior: self.prior,
            initial_state: self.initial_state,
            motion,
            likelihood,
            rng,
            config: self.config,
        };
        if let Some(state) = filter.initial_state.clone() {
            filter.particles.resize(n, state);
        } else {
            filter.reset();
        }
        debug!(
            "particle filter initialized with {} particles ({} resampling, seed {})",
            n, filter.config.resampling_strategy, filter.config.seed
        );
        Ok(filter)
    }
}

/// Sequential Monte Carlo filter over an opaque state `S` and observation `Z`.
pub struct ParticleFilter<S, Z> {
    config: ParticleFilterConfig,
    /// Current unweighted population.
    particles: Vec<S>,
    /// Weighted proposals of the last successful update.
    weighted: Vec<Particle<S>>,
    /// Scratch buffer for the update in progress.
    proposals: Vec<Particle<S>>,
    prior: Option<PriorSampler<S>>,
    initial_state: Option<S>,
    motion: MotionModel<S>,
    likelihood: ObservationLikelihood<S, Z>,
    rng: StdRng,
}

impl<S, Z> Debug for ParticleFilter<S, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weight_range = self.weight_range().map(|(min_weight, max_weight)| {
            format!("[{:.4e}, {:.4e}]", min_weight, max_weight)
        });
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field("weight_range", &weight_range)
            .field("resampling_strategy", &self.config.resampling_strategy)
            .finish()
    }
}

impl<S: Clone, Z> ParticleFilter<S, Z> {
    pub fn builder(config: ParticleFilterConfig) -> ParticleFilterBuilder<S, Z> {
        ParticleFilterBuilder::new(config)
    }
    /// Create a filter whose population is drawn from `prior`.
    pub fn new<U, M, L>(
        config: ParticleFilterConfig,
        prior: U,
        motion: M,
        likelihood: L,
    ) -> Result<Self>
    where
        U: FnMut() -> S + 'static,
        M: FnMut(&S, f64) -> S + 'static,
        L: FnMut(&Z, &S) -> f64 + 'static,
    {
        ParticleFilterBuilder::new(config)
            .with_prior(prior)
            .with_motion_model(motion)
            .with_observation_likelihood(likelihood)
            .build()
    }
    /// Create a filter with every particle starting at `initial_state`.
    pub fn from_initial_state<M, L>(
        config: ParticleFilterConfig,
        initial_state: S,
        motion: M,
        likelihood: L,
    ) -> Result<Self>
    where
        M: FnMut(&S, f64) -> S + 'static,
        L: FnMut(&Z, &S) -> f64 + 'static,
    {
        ParticleFilterBuilder::new(config)
            .with_initial_state(initial_state)
            .with_motion_model(motion)
            .with_observation_likelihood(likelihood)
            .build()
    }

    /// Regenerate the whole population from the prior sampler, or from the initial state when
    /// the filter has no sampler. The weighted proposals of the previous update are discarded.
    pub fn reset(&mut self) {
        let n = self.config.num_particles;
        self.particles.clear();
        if let Some(prior) = self.prior.as_mut() {
            self.particles.extend((0..n).map(|_| prior()));
        } else if let Some(state) = &self.initial_state {
            self.particles.resize(n, state.clone());
        }
        self.weighted.clear();
    }

    /// Propagate, weight and resample the population for one time step.
    ///
    /// # Errors
    /// [`FilterError::DegenerateWeights`] if the proposals carry no usable weight (all zero, or
    /// any NaN, infinite or negative value). The population and the weighted proposals of the
    /// previous update are left untouched in that case.
    pub fn update(&mut self, observation: &Z, dt: f64) -> Result<()> {
        self.proposals.clear();
        for state in &self.particles {
            let proposal = (self.motion)(state, dt);
            let weight = (self.likelihood)(observation, &proposal);
            self.proposals.push(Particle::new(weight, proposal));
        }

        let mut weights: Vec<f64> = self.proposals.iter().map(|p| p.weight).collect();
        let total = match total_weight(&weights) {
            Ok(total) => total,
            Err(err) => {
                warn!("rejecting particle filter update: {}", err);
                self.proposals.clear();
                return Err(err);
            }
        };
        if self.config.normalize_weights {
            for (particle, w) in self.proposals.iter_mut().zip(weights.iter_mut()) {
                *w /= total;
                particle.weight = *w;
            }
        }

        let indices = self
            .config
            .resampling_strategy
            .resample(&weights, &mut self.rng)?;
        trace!("resampled indices: {:?}", indices);

        self.particles.clear();
        for &i in &indices {
            self.particles.push(self.proposals[i].state.clone());
        }
        std::mem::swap(&mut self.weighted, &mut self.proposals);
        self.proposals.clear();

        debug!(
            "particle filter update: total weight {:.4e}, effective sample size {:.1}/{}",
            total,
            self.effective_sample_size(),
            self.config.num_particles
        );
        Ok(())
    }

    /// The `(weight, state)` pair with the largest weight among the last weighted proposals.
    /// Lowest index wins ties. Returns `(0.0, S::default())` before the first update.
    pub fn estimate_largest_weight(&self) -> (f64, S)
    where
        S: Default,
    {
        match ParticleAveragingStrategy::highest_weight_particle(&self.weighted) {
            Some(best) => (best.weight, best.state.clone()),
            None => (0.0, S::default()),
        }
    }

    /// Current (resampled, uniformly weighted) population.
    pub fn particles(&self) -> &[S] {
        &self.particles
    }
    /// Weighted proposals from the most recent successful update. Empty before the first update
    /// and after [`reset`](Self::reset).
    pub fn weighted_particles(&self) -> &[Particle<S>] {
        &self.weighted
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }
}

impl<S, Z> ParticleFilter<S, Z> {
    /// Sum of the weights of the last weighted proposals.
    pub fn total_weight(&self) -> f64 {
        self.weighted.iter().map(|p| p.weight).sum()
    }
    /// Smallest and largest weight of the last weighted proposals, or `None` if there are none.
    pub fn weight_range(&self) -> Option<(f64, f64)> {
        let first = self.weighted.first()?.weight;
        Some(
            self.weighted
                .iter()
                .fold((first, first), |(lo, hi), p| (lo.min(p.weight), hi.max(p.weight))),
        )
    }
    /// Effective sample size `(sum w)^2 / sum w^2` of the last weighted proposals, or `0.0` if
    /// there are none.
    pub fn effective_sample_size(&self) -> f64 {
        let sum: f64 = self.weighted.iter().map(|p| p.weight).sum();
        let sum_of_squares: f64 = self.weighted.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 {
            sum * sum / sum_of_squares
        } else {
            0.0
        }
    }
}

impl<S: Clone + StateVector, Z> ParticleFilter<S, Z> {
    fn average(&self, strategy: ParticleAveragingStrategy) -> Option<(DVector<f64>, DMatrix<f64>)> {
        match strategy {
            ParticleAveragingStrategy::WeightedAverage => {
                ParticleAveragingStrategy::weighted_average_state(&self.weighted)
            }
            ParticleAveragingStrategy::UnweightedAverage => {
                ParticleAveragingStrategy::unweighted_average_state(&self.particles)
            }
            ParticleAveragingStrategy::HighestWeight => {
                ParticleAveragingStrategy::highest_weight_particle(&self.weighted).map(|best| {
                    let mean = best.state.to_state_vector();
                    let size = mean.len();
                    (mean, DMatrix::zeros(size, size))
                })
            }
        }
    }
    /// Point estimate of the state. `None` if the buffer the strategy reads from is empty.
    pub fn estimate(&self, strategy: ParticleAveragingStrategy) -> Option<DVector<f64>> {
        self.average(strategy).map(|(mean, _cov)| mean)
    }
    /// Spread of the particle cloud around [`estimate`](Self::estimate).
    pub fn covariance(&self, strategy: ParticleAveragingStrategy) -> Option<DMatrix<f64>> {
        self.average(strategy).map(|(_mean, cov)| cov)
    }
}
