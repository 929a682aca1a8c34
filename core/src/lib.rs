//! Generic sequential Monte Carlo ("particle") filtering
//!
//! This crate provides a particle filter that is generic over the system state and the
//! observation type. The filter keeps a population of `N` state hypotheses and, for every new
//! observation, runs one predict/weight/resample cycle:
//!
//! 1. every particle is advanced by a caller-supplied motion model,
//! 2. every proposal is scored against the observation by a caller-supplied likelihood,
//! 3. a new population of `N` states is drawn in proportion to the scores.
//!
//! The filter never inspects the state. Models are injected as closures, so the same filter type
//! serves any motion/observation pair, and the random generator used for resampling is owned by
//! each filter instance and seeded explicitly. Given the same seed, inputs and deterministic models,
//! two runs produce identical populations.
//!
//! This is not a Kalman filter or any other parametric estimator: no distributional form is assumed
//! for the state and the posterior is approximated by the particle cloud alone.
//!
//! Primarily built off of the following crate dependencies:
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): random number
//!   generation for resampling and the simulated scenario.
//! - [`nalgebra`](https://crates.io/crates/nalgebra): vector and matrix types for point estimates.
//!
//! ## Crate overview
//!
//! - [filter]: The particle filter, its configuration and builder.
//! - [particle]: Particle type, resampling schemes and averaging strategies.
//! - [error]: Error types returned by the filter.
//! - [sim]: A simulated constant-velocity tracking scenario used by the `dust` binary and the tests.
//!
//! ## Resampling
//!
//! The default scheme is systematic (low-variance) resampling. One offset `r` is drawn uniformly
//! from `[0, 1/N)` and the positions
//!
//! $$
//! U_m = r + \frac{m}{N}, \quad m = 0, \ldots, N-1
//! $$
//!
//! are matched against the cumulative weights in a single forward pass. The first particle whose
//! cumulative weight reaches $U_m$ is selected, so lower indices win ties. Weight distributions that
//! cannot be resampled (zero total, NaN, infinite or negative weights) are rejected with
//! [`FilterError::DegenerateWeights`](error::FilterError::DegenerateWeights) and leave the filter untouched.
pub mod error;
pub mod filter;
pub mod particle;
pub mod sim;

pub use error::FilterError;
pub use filter::{ParticleFilter, ParticleFilterBuilder, ParticleFilterConfig};
pub use particle::{Particle, ParticleAveragingStrategy, ResamplingStrategy, StateVector};
