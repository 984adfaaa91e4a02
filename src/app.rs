//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs logging
//! - parses CLI arguments into fit configuration
//! - reads channels and responses into a store snapshot
//! - runs the selected experiment
//! - prints a JSON summary and writes optional exports

use std::path::Path;

use chrono::{DateTime, Utc};
use clap::Parser;

use crate::cli::{
    Command, OrthogonalArgs, ResponseArgs, ResponseSourceArgs, SamplingArgs, SimulateArgs, SineArgs, SolverArgs,
};
use crate::error::CalError;
use crate::fit::{Experiment, OrthogonalExperiment, ResponseExperiment, ResponseFitConfig, SineExperiment};
use crate::io::{read_channel_csv, read_response_json, to_json_string, write_channel_csv, write_json, write_response_json};
use crate::math::{SolverOptions, WelchConfig};
use crate::models::TransferFunctionModel;
use crate::store::{ChannelStore, ResponseCatalog};

/// Default iteration cap, overridable by `--max-iterations`.
pub const MAX_ITERATIONS_ENV: &str = "SCAL_MAX_ITERATIONS";
/// Default catalog directory for `--response-name`.
pub const RESPONSE_DIR_ENV: &str = "SCAL_RESPONSE_DIR";

/// Entry point for the `scal` binary.
pub fn run() -> Result<(), CalError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    crate::logging::init(cli.log_level);

    match cli.command {
        Command::Response(args) => handle_response(args),
        Command::Orthogonal(args) => handle_orthogonal(args),
        Command::Sine(args) => handle_sine(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_response(args: ResponseArgs) -> Result<(), CalError> {
    let config = response_config_from_args(&args)?;
    let start = start_time(&args.sampling);
    let interval = args.sampling.interval;

    let response = resolve_response(&args.source)?;
    let store = ChannelStore::new()
        .with_channel(0, read_channel_csv(&args.cal, "calibration", interval, start)?)?
        .with_channel(1, read_channel_csv(&args.out, "output", interval, start)?)?
        .with_response(1, response)?
        .aligned(2)?;

    let mut experiment = ResponseExperiment::new(config);
    let summary = experiment.run_experiment_on_data(&store)?;
    println!("{}", to_json_string(&summary)?);

    if let Some(path) = &args.export {
        write_json(path, &summary)?;
    }
    if let (Some(path), Some(model)) = (&args.export_model, experiment.fitted_model()) {
        write_response_json(path, model)?;
    }
    Ok(())
}

fn handle_orthogonal(args: OrthogonalArgs) -> Result<(), CalError> {
    let solver = solver_options_from_args(&args.solver)?;
    let start = start_time(&args.sampling);
    let interval = args.sampling.interval;

    let mut store = ChannelStore::new();
    for (slot, (path, name)) in [
        (&args.north, "north"),
        (&args.east, "east"),
        (&args.axis1, "axis1"),
        (&args.axis2, "axis2"),
    ]
    .into_iter()
    .enumerate()
    {
        store = store.with_channel(slot, read_channel_csv(path, name, interval, start)?)?;
    }
    let store = store.aligned(4)?;

    let mut experiment = OrthogonalExperiment::new(solver);
    let summary = experiment.run_experiment_on_data(&store)?;
    println!("{}", to_json_string(&summary)?);
    if let Some(path) = &args.export {
        write_json(path, &summary)?;
    }
    Ok(())
}

fn handle_sine(args: SineArgs) -> Result<(), CalError> {
    let solver = solver_options_from_args(&args.solver)?;
    let start = start_time(&args.sampling);
    let interval = args.sampling.interval;

    let store = ChannelStore::new()
        .with_channel(0, read_channel_csv(&args.cal, "calibration", interval, start)?)?
        .with_channel(1, read_channel_csv(&args.out, "output", interval, start)?)?
        .aligned(2)?;

    let mut experiment = SineExperiment::new(solver);
    let summary = experiment.run_experiment_on_data(&store)?;
    println!("{}", to_json_string(&summary)?);
    if let Some(path) = &args.export {
        write_json(path, &summary)?;
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), CalError> {
    let model = resolve_response(&args.source)?;
    let (cal, out) = crate::data::synth::random_calibration(&model, args.len, args.interval, args.sigma, args.seed)?;
    write_channel_csv(&args.cal_out, &cal)?;
    write_channel_csv(&args.out_out, &out)?;
    tracing::info!(
        samples = args.len,
        interval = args.interval,
        cal = %args.cal_out.display(),
        out = %args.out_out.display(),
        "wrote synthetic calibration"
    );
    Ok(())
}

pub fn response_config_from_args(args: &ResponseArgs) -> Result<ResponseFitConfig, CalError> {
    Ok(ResponseFitConfig {
        regime: args.regime,
        welch: WelchConfig {
            segment_len: args.segment_len,
            overlap: args.overlap,
            window: args.window,
        },
        solver: solver_options_from_args(&args.solver)?,
        smoothing_octaves: args.smoothing,
        normalization_hz: args.norm_freq,
        band_hz: args.band_min.zip(args.band_max),
        fit_smoothed: !args.raw,
    })
}

pub fn solver_options_from_args(args: &SolverArgs) -> Result<SolverOptions, CalError> {
    let defaults = SolverOptions::default();
    let max_iterations = match args.max_iterations {
        Some(n) => n,
        None => env_max_iterations()?.unwrap_or(defaults.max_iterations),
    };
    if max_iterations == 0 {
        return Err(CalError::InvalidInput("max iterations must be > 0".to_string()));
    }
    if !(args.tolerance.is_finite() && args.tolerance >= 0.0) {
        return Err(CalError::InvalidInput(format!(
            "solver tolerance must be finite and >= 0, got {}",
            args.tolerance
        )));
    }
    Ok(SolverOptions {
        max_iterations,
        relative_tolerance: args.tolerance,
        jacobian: args.jacobian(),
        ..defaults
    })
}

fn env_max_iterations() -> Result<Option<usize>, CalError> {
    match std::env::var(MAX_ITERATIONS_ENV) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CalError::InvalidInput(format!("{MAX_ITERATIONS_ENV}='{raw}' is not a count: {e}"))),
        Err(_) => Ok(None),
    }
}

fn start_time(args: &SamplingArgs) -> DateTime<Utc> {
    args.start.unwrap_or_default()
}

/// Load a response from an explicit file or from the catalog by name.
fn resolve_response(source: &ResponseSourceArgs) -> Result<TransferFunctionModel, CalError> {
    if let Some(path) = &source.response {
        return read_response_json(path);
    }
    let Some(name) = &source.response_name else {
        return Err(CalError::InvalidInput(
            "a response model is required: pass --response or --response-name".to_string(),
        ));
    };

    let dir = match &source.response_dir {
        Some(dir) => dir.clone(),
        None => std::env::var_os(RESPONSE_DIR_ENV).map(Into::into).ok_or_else(|| {
            CalError::InvalidInput(format!(
                "--response-name needs --response-dir or {RESPONSE_DIR_ENV}"
            ))
        })?,
    };
    load_from_catalog(&dir, name)
}

fn load_from_catalog(dir: &Path, name: &str) -> Result<TransferFunctionModel, CalError> {
    let catalog = ResponseCatalog::from_dir(dir)?;
    let model = catalog.load_by_name(name)?;
    Ok((*model).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use crate::domain::FitRegime;

    #[test]
    fn response_args_map_to_config() {
        let cli = Cli::parse_from([
            "scal",
            "response",
            "--cal",
            "cal.csv",
            "--out",
            "out.csv",
            "--response",
            "sts2.json",
            "--regime",
            "high",
            "--band-min",
            "0.5",
            "--band-max",
            "5",
            "--raw",
            "--max-iterations",
            "12",
        ]);
        let Command::Response(args) = cli.command else {
            panic!("expected response subcommand");
        };
        let config = response_config_from_args(&args).unwrap();
        assert_eq!(config.regime, FitRegime::High);
        assert_eq!(config.band_hz, Some((0.5, 5.0)));
        assert!(!config.fit_smoothed);
        assert_eq!(config.solver.max_iterations, 12);
        assert_eq!(config.welch.overlap, 0.75);
    }

    #[test]
    fn missing_response_source_is_invalid_input() {
        let source = ResponseSourceArgs {
            response: None,
            response_name: None,
            response_dir: None,
        };
        assert!(matches!(resolve_response(&source), Err(CalError::InvalidInput(_))));
    }
}
