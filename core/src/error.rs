//! Error types for particle filter construction and updates.
use thiserror::Error;

/// Errors that can occur while building or running a [`ParticleFilter`](crate::filter::ParticleFilter).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// The filter cannot be constructed from the supplied parameters (zero particles,
    /// no prior sampler or initial state, or a missing model).
    #[error("invalid particle filter configuration: {0}")]
    InvalidConfiguration(String),
    /// The weighted proposals cannot be resampled: the total weight is zero or at least one
    /// weight is NaN, infinite or negative.
    #[error("degenerate particle weights (total weight {total_weight})")]
    DegenerateWeights { total_weight: f64 },
}

/// Convenience alias for results returned by the filter.
pub type Result<T> = std::result::Result<T, FilterError>;
