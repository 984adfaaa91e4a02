//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON
//! - reloaded later for comparisons

use clap::ValueEnum;
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Which pole group a response fit is allowed to move.
///
/// The first pole (plus its conjugate partner) dominates the long-period
/// corner of a broadband sensor; everything after it shapes the passband edge
/// at high frequency. Fits never move both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitRegime {
    Low,
    High,
}

impl FitRegime {
    pub fn display_name(self) -> &'static str {
        match self {
            FitRegime::Low => "low-frequency",
            FitRegime::High => "high-frequency",
        }
    }
}

/// Complex values on an ascending frequency grid (Hz).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectralCurve {
    pub frequencies: Vec<f64>,
    pub values: Vec<Complex64>,
}

impl SpectralCurve {
    pub fn new(frequencies: Vec<f64>, values: Vec<Complex64>) -> Self {
        debug_assert_eq!(frequencies.len(), values.len());
        Self { frequencies, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Frequency spacing of the grid (0 for fewer than two bins).
    pub fn resolution(&self) -> f64 {
        if self.frequencies.len() < 2 {
            0.0
        } else {
            self.frequencies[1] - self.frequencies[0]
        }
    }

    /// Index of the bin closest to `freq`.
    pub fn nearest_bin(&self, freq: f64) -> Option<usize> {
        self.frequencies
            .iter()
            .enumerate()
            .min_by(|a, b| {
                (a.1 - freq)
                    .abs()
                    .partial_cmp(&(b.1 - freq).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
    }

    pub fn amplitudes(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.norm()).collect()
    }
}

/// Working record of one optimization run.
///
/// One is built for the starting vector and one for the solver's final vector;
/// intermediate iterations are only logged.
#[derive(Debug, Clone)]
pub struct FitState {
    pub params: DVector<f64>,
    pub modeled: SpectralCurve,
    pub residuals: DVector<f64>,
    pub cost: f64,
    pub iterations: usize,
}

impl FitState {
    pub fn new(params: DVector<f64>, modeled: SpectralCurve, residuals: DVector<f64>, iterations: usize) -> Self {
        let cost = residuals.norm_squared();
        Self {
            params,
            modeled,
            residuals,
            cost,
            iterations,
        }
    }
}

/// A pole or zero in JSON-friendly form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexEntry {
    pub re: f64,
    pub im: f64,
}

impl From<Complex64> for ComplexEntry {
    fn from(value: Complex64) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Exported outcome of a response fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFitSummary {
    pub regime: FitRegime,
    pub converged: bool,
    pub iterations: usize,
    pub initial_cost: f64,
    pub fit_cost: f64,
    pub initial_poles: Vec<ComplexEntry>,
    pub fit_poles: Vec<ComplexEntry>,
    pub initial_zeros: Vec<ComplexEntry>,
    pub fit_zeros: Vec<ComplexEntry>,
    pub band_hz: (f64, f64),
    pub bins: usize,
}

/// Exported outcome of an orthogonality fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthogonalFitSummary {
    pub fit_angle_deg: f64,
    pub azimuth_1_deg: f64,
    pub azimuth_2_deg: f64,
    pub converged: bool,
}

/// Exported outcome of a sine calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SineFitSummary {
    pub frequency_hz: f64,
    pub cal_amplitude: f64,
    pub out_amplitude: f64,
    pub ratio: f64,
    pub converged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_bin_picks_closest_frequency() {
        let curve = SpectralCurve::new(
            vec![0.0, 0.5, 1.0, 1.5],
            vec![Complex64::new(0.0, 0.0); 4],
        );
        assert_eq!(curve.nearest_bin(0.9), Some(2));
        assert_eq!(curve.nearest_bin(10.0), Some(3));
        assert!((curve.resolution() - 0.5).abs() < 1e-15);
    }
}
