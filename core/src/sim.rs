//! Simulation utilities for exercising the particle filter.
//!
//! This module provides:
//! - A one-dimensional constant-velocity target (`TargetState` = `[position, velocity]`) driven
//!   by random accelerations and observed through noisy position measurements
//! - Factories for the matching motion model, observation likelihood and prior sampler
//! - `run_tracking`, which runs a [`ParticleFilter`] over a simulated trajectory and produces
//!   one `TrackingRecord` per time step
//! - CSV export of the tracking records
use crate::error::{FilterError, Result};
use crate::filter::{ParticleFilter, ParticleFilterConfig};
use crate::particle::ParticleAveragingStrategy;

use nalgebra::Vector2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Target state: position (m) and velocity (m/s).
pub type TargetState = Vector2<f64>;

/// Parameters of the simulated tracking scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of measurement epochs.
    pub steps: usize,
    /// Time between measurements in seconds.
    pub dt: f64,
    pub initial_position: f64,
    pub initial_velocity: f64,
    /// Standard deviation of the random acceleration (m/s^2).
    pub process_noise_std: f64,
    /// Standard deviation of the position measurement (m).
    pub measurement_noise_std: f64,
    /// Spread of the initial particle cloud around the true initial state.
    pub prior_position_std: f64,
    pub prior_velocity_std: f64,
    /// Seed for the ground truth and measurement noise. The filter models derive their own
    /// seeds from it.
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            dt: 1.0,
            initial_position: 0.0,
            initial_velocity: 1.0,
            process_noise_std: 0.1,
            measurement_noise_std: 1.0,
            prior_position_std: 5.0,
            prior_velocity_std: 1.0,
            seed: 7,
        }
    }
}

/// One row of tracking output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub step: usize,
    pub time: f64,
    pub true_position: f64,
    pub true_velocity: f64,
    pub measurement: f64,
    pub estimated_position: f64,
    pub estimated_velocity: f64,
    pub best_weight: f64,
    pub effective_sample_size: f64,
}

/// Simulated trajectory and the position measurements taken along it.
#[derive(Clone, Debug)]
pub struct GroundTruth {
    pub states: Vec<TargetState>,
    pub measurements: Vec<f64>,
}

fn zero_mean_normal(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev).map_err(|e| {
        FilterError::InvalidConfiguration(format!("invalid standard deviation {}: {}", std_dev, e))
    })
}

/// Constant-velocity kinematics under a constant acceleration over `dt`.
pub fn propagate(state: &TargetState, acceleration: f64, dt: f64) -> TargetState {
    Vector2::new(
        state[0] + state[1] * dt + 0.5 * acceleration * dt * dt,
        state[1] + acceleration * dt,
    )
}

/// Motion model for the filter: constant velocity plus a random acceleration drawn from its own
/// generator seeded with `seed`.
pub fn constant_velocity_motion(
    process_noise_std: f64,
    seed: u64,
) -> Result<impl FnMut(&TargetState, f64) -> TargetState + 'static> {
    let normal = zero_mean_normal(process_noise_std)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(move |state: &TargetState, dt: f64| propagate(state, normal.sample(&mut rng), dt))
}

/// Gaussian likelihood of a position measurement given a target state.
pub fn gaussian_position_likelihood(
    measurement_noise_std: f64,
) -> Result<impl FnMut(&f64, &TargetState) -> f64 + 'static> {
    if !(measurement_noise_std > 0.0 && measurement_noise_std.is_finite()) {
        return Err(FilterError::InvalidConfiguration(format!(
            "measurement noise standard deviation must be positive, got {}",
            measurement_noise_std
        )));
    }
    let variance = measurement_noise_std * measurement_noise_std;
    let scale = 1.0 / (measurement_noise_std * (2.0 * std::f64::consts::PI).sqrt());
    Ok(move |measurement: &f64, state: &TargetState| {
        let innovation = measurement - state[0];
        scale * (-0.5 * innovation * innovation / variance).exp()
    })
}

/// Prior sampler drawing independent Gaussian position and velocity around `mean`.
pub fn gaussian_prior(
    mean: TargetState,
    std_dev: Vector2<f64>,
    seed: u64,
) -> Result<impl FnMut() -> TargetState + 'static> {
    let position = zero_mean_normal(std_dev[0])?;
    let velocity = zero_mean_normal(std_dev[1])?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(move || {
        Vector2::new(
            mean[0] + position.sample(&mut rng),
            mean[1] + velocity.sample(&mut rng),
        )
    })
}

/// Generate the true trajectory and noisy position measurements.
pub fn simulate_ground_truth(scenario: &ScenarioConfig) -> Result<GroundTruth> {
    let acceleration = zero_mean_normal(scenario.process_noise_std)?;
    let measurement_noise = zero_mean_normal(scenario.measurement_noise_std)?;
    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut state = Vector2::new(scenario.initial_position, scenario.initial_velocity);
    let mut states = Vec::with_capacity(scenario.steps);
    let mut measurements = Vec::with_capacity(scenario.steps);
    for _ in 0..scenario.steps {
        state = propagate(&state, acceleration.sample(&mut rng), scenario.dt);
        states.push(state);
        measurements.push(state[0] + measurement_noise.sample(&mut rng));
    }
    Ok(GroundTruth {
        states,
        measurements,
    })
}

/// Track the simulated target with a particle filter built from `filter_config`.
///
/// # Errors
/// Returns [`FilterError::InvalidConfiguration`] for invalid noise parameters or filter
/// configuration and [`FilterError::DegenerateWeights`] if every particle loses the target.
pub fn run_tracking(
    filter_config: &ParticleFilterConfig,
    scenario: &ScenarioConfig,
) -> Result<Vec<TrackingRecord>> {
    let truth = simulate_ground_truth(scenario)?;
    let prior = gaussian_prior(
        Vector2::new(scenario.initial_position, scenario.initial_velocity),
        Vector2::new(scenario.prior_position_std, scenario.prior_velocity_std),
        scenario.seed.wrapping_add(1),
    )?;
    let motion = constant_velocity_motion(scenario.process_noise_std, scenario.seed.wrapping_add(2))?;
    let likelihood = gaussian_position_likelihood(scenario.measurement_noise_std)?;
    let mut pf = ParticleFilter::new(filter_config.clone(), prior, motion, likelihood)?;

    let mut records = Vec::with_capacity(scenario.steps);
    for (step, (state, measurement)) in truth
        .states
        .iter()
        .zip(truth.measurements.iter())
        .enumerate()
    {
        pf.update(measurement, scenario.dt)?;
        let estimate = pf
            .estimate(ParticleAveragingStrategy::WeightedAverage)
            .ok_or(FilterError::DegenerateWeights {
                total_weight: pf.total_weight(),
            })?;
        let (best_weight, _best) = pf.estimate_largest_weight();
        records.push(TrackingRecord {
            step,
            time: (step + 1) as f64 * scenario.dt,
            true_position: state[0],
            true_velocity: state[1],
            measurement: *measurement,
            estimated_position: estimate[0],
            estimated_velocity: estimate[1],
            best_weight,
            effective_sample_size: pf.effective_sample_size(),
        });
    }
    Ok(records)
}

/// Root-mean-square error between estimated and true position. `0.0` for no records.
pub fn rms_position_error(records: &[TrackingRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = records
        .iter()
        .map(|r| (r.estimated_position - r.true_position).powi(2))
        .sum();
    (sum_sq / records.len() as f64).sqrt()
}

/// Root-mean-square error of the raw measurements, for comparison with the filter.
pub fn rms_measurement_error(records: &[TrackingRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = records
        .iter()
        .map(|r| (r.measurement - r.true_position).powi(2))
        .sum();
    (sum_sq / records.len() as f64).sqrt()
}

/// Write tracking records to a CSV file with a header row.
pub fn write_records<P: AsRef<Path>>(records: &[TrackingRecord], path: P) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read tracking records back from a CSV file written by [`write_records`].
pub fn read_records<P: AsRef<Path>>(path: P) -> csv::Result<Vec<TrackingRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: TrackingRecord = result?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_propagate_constant_velocity() {
        let state = Vector2::new(1.0, 2.0);
        let next = propagate(&state, 0.0, 0.5);
        assert_approx_eq!(next[0], 2.0, 1e-12);
        assert_approx_eq!(next[1], 2.0, 1e-12);
        let next = propagate(&state, 2.0, 1.0);
        assert_approx_eq!(next[0], 4.0, 1e-12);
        assert_approx_eq!(next[1], 4.0, 1e-12);
    }

    #[test]
    fn test_likelihood_peaks_at_measurement() {
        let mut likelihood = gaussian_position_likelihood(2.0).unwrap();
        let at_peak = likelihood(&3.0, &Vector2::new(3.0, 0.0));
        let off_peak = likelihood(&3.0, &Vector2::new(5.0, 0.0));
        assert_approx_eq!(at_peak, 1.0 / (2.0 * (2.0 * std::f64::consts::PI).sqrt()), 1e-12);
        assert!(off_peak < at_peak);
        assert!(gaussian_position_likelihood(0.0).is_err());
    }

    #[test]
    fn test_noiseless_motion_is_deterministic() {
        let mut motion = constant_velocity_motion(0.0, 1).unwrap();
        let next = motion(&Vector2::new(0.0, 3.0), 2.0);
        assert_approx_eq!(next[0], 6.0, 1e-12);
        assert_approx_eq!(next[1], 3.0, 1e-12);
        assert!(constant_velocity_motion(-1.0, 1).is_err());
    }

    #[test]
    fn test_ground_truth_lengths() {
        let scenario = ScenarioConfig {
            steps: 25,
            ..Default::default()
        };
        let truth = simulate_ground_truth(&scenario).unwrap();
        assert_eq!(truth.states.len(), 25);
        assert_eq!(truth.measurements.len(), 25);
    }

    #[test]
    fn test_rms_of_empty_records() {
        assert_eq!(rms_position_error(&[]), 0.0);
        assert_eq!(rms_measurement_error(&[]), 0.0);
    }
}
