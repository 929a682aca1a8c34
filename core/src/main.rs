//! DUST: run a particle filter against a simulated constant-velocity target.
//!
//! The target moves along a line with random accelerations and is observed through noisy
//! position measurements. The filter tracks position and velocity and the per-step estimates can
//! be written to a CSV file for analysis.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use dust::filter::ParticleFilterConfig;
use dust::particle::ResamplingStrategy;
use dust::sim::{
    ScenarioConfig, rms_measurement_error, rms_position_error, run_tracking, write_records,
};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Track a simulated constant-velocity target with a particle filter.")]
struct Cli {
    /// Number of particles
    #[arg(short, long, default_value_t = 500)]
    num_particles: usize,

    /// Seed for the filter's resampling generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Resampling scheme
    #[arg(long, value_enum, default_value_t = ResamplingStrategy::Systematic)]
    strategy: ResamplingStrategy,

    /// Number of measurement epochs to simulate
    #[arg(long, default_value_t = 100)]
    steps: usize,

    /// Time between measurements (s)
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Standard deviation of the target's random acceleration (m/s^2)
    #[arg(long, default_value_t = 0.1)]
    process_noise_std: f64,

    /// Standard deviation of the position measurement (m)
    #[arg(long, default_value_t = 1.0)]
    measurement_noise_std: f64,

    /// Seed for the simulated trajectory and measurement noise
    #[arg(long, default_value_t = 7)]
    scenario_seed: u64,

    /// Write per-step estimates to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace); falls back to RUST_LOG, then info
    #[arg(long)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Set up `env_logger` for the run.
///
/// An explicit `--log-level` wins; otherwise `RUST_LOG` is honoured and the default is `info`.
/// Records carry the emitting module so filter diagnostics (`dust::filter`) can be told apart from
/// the run summary. With `--log-file` the output is appended to that file instead of stderr.
fn init_logger(cli: &Cli) -> Result<()> {
    use env_logger::{Builder, Env, Target};
    use std::io::Write;

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = &cli.log_level {
        let level = level
            .parse::<log::LevelFilter>()
            .with_context(|| format!("invalid log level '{}'", level))?;
        builder.filter_level(level);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {} - {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = &cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("logger already initialized")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli)?;

    let filter_config = ParticleFilterConfig {
        num_particles: cli.num_particles,
        seed: cli.seed,
        resampling_strategy: cli.strategy,
        normalize_weights: true,
    };
    let scenario = ScenarioConfig {
        steps: cli.steps,
        dt: cli.dt,
        process_noise_std: cli.process_noise_std,
        measurement_noise_std: cli.measurement_noise_std,
        seed: cli.scenario_seed,
        ..Default::default()
    };
    info!(
        "Tracking {} steps with {} particles ({} resampling)",
        scenario.steps, filter_config.num_particles, filter_config.resampling_strategy
    );

    let records = run_tracking(&filter_config, &scenario).context("particle filter run failed")?;
    if let Some(last) = records.last() {
        info!(
            "Final estimate: position {:.3} m (true {:.3} m), velocity {:.3} m/s (true {:.3} m/s)",
            last.estimated_position, last.true_position, last.estimated_velocity, last.true_velocity
        );
    } else {
        warn!("No measurement epochs were simulated");
    }
    info!(
        "RMS position error: filter {:.3} m, raw measurements {:.3} m",
        rms_position_error(&records),
        rms_measurement_error(&records)
    );

    if let Some(path) = &cli.output {
        write_records(&records, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} records to {}", records.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_defaults_to_environment() {
        let cli = Cli::try_parse_from(["dust"]).unwrap();
        assert!(cli.log_level.is_none());
        assert!(cli.log_file.is_none());
        assert_eq!(cli.strategy, ResamplingStrategy::Systematic);
    }

    #[test]
    fn test_invalid_log_level_is_an_error() {
        let cli = Cli::try_parse_from(["dust", "--log-level", "loud"]).unwrap();
        let err = init_logger(&cli).unwrap_err();
        assert!(err.to_string().contains("invalid log level 'loud'"));
    }
}
