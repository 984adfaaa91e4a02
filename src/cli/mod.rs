//! Command-line parsing for the `scal` calibration tool.
//!
//! Parsing and dispatch stay separate from the numerical code: this module
//! only describes arguments, `app` turns them into configuration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::domain::FitRegime;
use crate::logging::LogLevel;
use crate::math::{JacobianKind, WindowKind};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "scal", version, about = "Sensor transfer-function calibration")]
pub struct Cli {
    /// Log verbosity (overrides SCAL_LOG and RUST_LOG).
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit poles (and high-frequency zeros) of a sensor response to a random calibration.
    Response(ResponseArgs),
    /// Fit the azimuths of two horizontal test axes against a reference pair.
    Orthogonal(OrthogonalArgs),
    /// Fit frequency and amplitude ratio of a sine calibration.
    Sine(SineArgs),
    /// Write a synthetic random-calibration record pair for a response model.
    Simulate(SimulateArgs),
}

/// Sampling metadata for CSV inputs (CSV files carry samples only).
#[derive(Debug, Args, Clone)]
pub struct SamplingArgs {
    /// Sample interval in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// Timestamp of the first sample (RFC 3339). Defaults to the Unix epoch.
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,
}

/// Solver controls shared by every fit.
#[derive(Debug, Args, Clone)]
pub struct SolverArgs {
    /// Maximum solver iterations (default: SCAL_MAX_ITERATIONS or 200).
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Stop when an accepted step improves the cost by less than this fraction.
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Use forward rather than central finite differences.
    #[arg(long)]
    pub forward_differences: bool,
}

impl SolverArgs {
    pub fn jacobian(&self) -> JacobianKind {
        if self.forward_differences {
            JacobianKind::Forward
        } else {
            JacobianKind::Central
        }
    }
}

/// Where a response model comes from.
#[derive(Debug, Args, Clone)]
pub struct ResponseSourceArgs {
    /// Response model JSON file.
    #[arg(long, value_name = "JSON", conflicts_with = "response_name")]
    pub response: Option<PathBuf>,

    /// Name of a response in the catalog directory.
    #[arg(long)]
    pub response_name: Option<String>,

    /// Catalog directory of `*.json` responses (default: SCAL_RESPONSE_DIR).
    #[arg(long)]
    pub response_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ResponseArgs {
    /// Calibration input CSV.
    #[arg(long, value_name = "CSV")]
    pub cal: PathBuf,

    /// Sensor output CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    #[command(flatten)]
    pub source: ResponseSourceArgs,

    /// Pole group to fit.
    #[arg(long, value_enum, default_value_t = FitRegime::Low)]
    pub regime: FitRegime,

    /// Smoothing bandwidth in octaves (0 disables).
    #[arg(long, default_value_t = 0.1)]
    pub smoothing: f64,

    /// Fit against the unsmoothed estimate.
    #[arg(long)]
    pub raw: bool,

    /// Amplitude normalization frequency in Hz (default: 0.02 low, 1.0 high).
    #[arg(long)]
    pub norm_freq: Option<f64>,

    /// Lower edge of the fit band in Hz.
    #[arg(long, requires = "band_max")]
    pub band_min: Option<f64>,

    /// Upper edge of the fit band in Hz.
    #[arg(long, requires = "band_min")]
    pub band_max: Option<f64>,

    /// Welch segment length (power of two; default: largest ≤ len/4).
    #[arg(long)]
    pub segment_len: Option<usize>,

    /// Fractional overlap between Welch segments.
    #[arg(long, default_value_t = 0.75)]
    pub overlap: f64,

    /// Taper applied to each segment.
    #[arg(long, value_enum, default_value_t = WindowKind::Hann)]
    pub window: WindowKind,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Export the fit summary to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Write the fitted response model to JSON.
    #[arg(long = "export-model")]
    pub export_model: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct OrthogonalArgs {
    /// Reference north CSV.
    #[arg(long, value_name = "CSV")]
    pub north: PathBuf,

    /// Reference east CSV.
    #[arg(long, value_name = "CSV")]
    pub east: PathBuf,

    /// First test axis CSV.
    #[arg(long, value_name = "CSV")]
    pub axis1: PathBuf,

    /// Second test axis CSV.
    #[arg(long, value_name = "CSV")]
    pub axis2: PathBuf,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Export the fit summary to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SineArgs {
    /// Calibration input CSV.
    #[arg(long, value_name = "CSV")]
    pub cal: PathBuf,

    /// Sensor output CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Export the fit summary to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub source: ResponseSourceArgs,

    /// Number of samples to generate.
    #[arg(short = 'n', long, default_value_t = 1 << 16)]
    pub len: usize,

    /// Sample interval in seconds.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// Standard deviation of the calibration noise.
    #[arg(long, default_value_t = 1.0)]
    pub sigma: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output path for the calibration CSV.
    #[arg(long = "cal-out", value_name = "CSV")]
    pub cal_out: PathBuf,

    /// Output path for the sensor output CSV.
    #[arg(long = "out-out", value_name = "CSV")]
    pub out_out: PathBuf,
}
