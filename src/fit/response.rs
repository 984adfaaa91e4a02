//! Random-calibration response fit.
//!
//! A sensor driven by a broadband calibration signal is compared against the
//! signal itself:
//!
//! - estimate `H(f) = Pxy / Pxx` from Welch spectra of calibration (x) and
//!   sensor output (y)
//! - normalize `|H|` to one at the regime's reference frequency
//! - smooth in log-frequency and trim to the regime's band
//! - move the selected pole group (and, at high frequency, the zeros) until
//!   the model's amplitude (dB) and phase (degrees) match the estimate
//!
//! Amplitude and phase residuals are scaled by the reciprocal of the largest
//! measured magnitude of each, so neither dominates the cost.

use std::sync::Arc;

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::{ComplexEntry, FitRegime, FitState, ResponseFitSummary, SpectralCurve};
use crate::error::CalError;
use crate::fit::experiment::{require_data, Experiment, ExperimentState, Lifecycle};
use crate::math::phase::{align_to, amplitude_db, unwrapped_phase_degrees};
use crate::math::spectral::{cross_power, divide, normalize_at, power, smooth, trim};
use crate::math::{minimize, SolverOptions, Termination, WelchConfig};
use crate::models::{GroupSelection, TransferFunctionModel};
use crate::store::{Channel, ChannelStore};

/// Slot holding the calibration input.
pub const CAL_SLOT: usize = 0;
/// Slot holding the sensor output and its nominal response.
pub const OUTPUT_SLOT: usize = 1;

pub const LOW_NORMALIZATION_HZ: f64 = 0.02;
pub const HIGH_NORMALIZATION_HZ: f64 = 1.0;
pub const LOW_BAND_HZ: (f64, f64) = (0.001, 0.05);
pub const HIGH_BAND_MIN_HZ: f64 = 0.2;
/// Upper edge of the high band as a fraction of Nyquist.
pub const HIGH_BAND_NYQUIST_FRACTION: f64 = 0.8;
pub const DEFAULT_SMOOTHING_OCTAVES: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseFitConfig {
    pub regime: FitRegime,
    pub welch: WelchConfig,
    pub solver: SolverOptions,
    pub smoothing_octaves: f64,
    /// Overrides the regime's amplitude reference frequency.
    pub normalization_hz: Option<f64>,
    /// Overrides the regime's band.
    pub band_hz: Option<(f64, f64)>,
    /// Fit against the smoothed estimate rather than the raw one.
    pub fit_smoothed: bool,
}

impl ResponseFitConfig {
    pub fn new(regime: FitRegime) -> Self {
        Self {
            regime,
            welch: WelchConfig::default(),
            solver: SolverOptions::default(),
            smoothing_octaves: DEFAULT_SMOOTHING_OCTAVES,
            normalization_hz: None,
            band_hz: None,
            fit_smoothed: true,
        }
    }

    pub fn normalization_frequency(&self) -> f64 {
        self.normalization_hz.unwrap_or(match self.regime {
            FitRegime::Low => LOW_NORMALIZATION_HZ,
            FitRegime::High => HIGH_NORMALIZATION_HZ,
        })
    }

    /// Fit band, capped at Nyquist.
    pub fn band(&self, nyquist: f64) -> (f64, f64) {
        let (lo, hi) = self.band_hz.unwrap_or(match self.regime {
            FitRegime::Low => LOW_BAND_HZ,
            FitRegime::High => (HIGH_BAND_MIN_HZ, HIGH_BAND_NYQUIST_FRACTION * nyquist),
        });
        (lo, hi.min(nyquist))
    }

    pub fn selection(&self, nyquist: f64) -> GroupSelection {
        match self.regime {
            FitRegime::Low => GroupSelection::new(FitRegime::Low),
            FitRegime::High => GroupSelection::new(FitRegime::High)
                .with_max_frequency(nyquist)
                .with_zeros(true),
        }
    }
}

impl Default for ResponseFitConfig {
    fn default() -> Self {
        Self::new(FitRegime::Low)
    }
}

/// Everything a response fit produces.
#[derive(Debug, Clone)]
pub struct ResponseFitOutcome {
    pub regime: FitRegime,
    /// Normalized estimate inside the band, unsmoothed.
    pub measured: SpectralCurve,
    /// Normalized estimate inside the band, smoothed.
    pub smoothed: SpectralCurve,
    pub initial_model: TransferFunctionModel,
    pub fitted_model: TransferFunctionModel,
    pub initial: FitState,
    pub fitted: FitState,
    /// Bin count of the untrimmed spectra.
    pub psd_len: usize,
    pub band_hz: (f64, f64),
    pub converged: bool,
    pub termination: Termination,
}

impl ResponseFitOutcome {
    pub fn frequencies(&self) -> &[f64] {
        &self.measured.frequencies
    }

    pub fn initial_poles(&self) -> &[Complex64] {
        self.initial_model.poles()
    }

    pub fn fitted_poles(&self) -> &[Complex64] {
        self.fitted_model.poles()
    }

    pub fn initial_zeros(&self) -> &[Complex64] {
        self.initial_model.zeros()
    }

    pub fn fitted_zeros(&self) -> &[Complex64] {
        self.fitted_model.zeros()
    }

    pub fn summary(&self) -> ResponseFitSummary {
        let entries = |values: &[Complex64]| values.iter().map(|&c| ComplexEntry::from(c)).collect();
        ResponseFitSummary {
            regime: self.regime,
            converged: self.converged,
            iterations: self.fitted.iterations,
            initial_cost: self.initial.cost,
            fit_cost: self.fitted.cost,
            initial_poles: entries(self.initial_poles()),
            fit_poles: entries(self.fitted_poles()),
            initial_zeros: entries(self.initial_zeros()),
            fit_zeros: entries(self.fitted_zeros()),
            band_hz: self.band_hz,
            bins: self.measured.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct BoundData {
    cal: Arc<Channel>,
    out: Arc<Channel>,
    response: Arc<TransferFunctionModel>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseExperiment {
    config: ResponseFitConfig,
    lifecycle: Lifecycle,
    data: Option<BoundData>,
    outcome: Option<ResponseFitOutcome>,
}

impl ResponseExperiment {
    pub fn new(config: ResponseFitConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ResponseFitConfig {
        &self.config
    }

    pub fn outcome(&self) -> Option<&ResponseFitOutcome> {
        self.outcome.as_ref()
    }

    pub fn fitted_model(&self) -> Option<&TransferFunctionModel> {
        self.outcome.as_ref().map(|o| &o.fitted_model)
    }

    fn bound_data(&self, store: &ChannelStore) -> Result<BoundData, CalError> {
        require_data(self, store)?;
        let cal = store.aligned_channel(CAL_SLOT)?;
        let out = store.aligned_channel(OUTPUT_SLOT)?;
        if (cal.interval() - out.interval()).abs() > 1e-9 * cal.interval() {
            return Err(CalError::ChannelMismatch(format!(
                "calibration interval {} s differs from output interval {} s",
                cal.interval(),
                out.interval()
            )));
        }
        let response = store.response_for(OUTPUT_SLOT)?;
        Ok(BoundData { cal, out, response })
    }
}

impl Experiment for ResponseExperiment {
    type Summary = ResponseFitSummary;

    fn name(&self) -> &'static str {
        "response"
    }

    fn has_enough_data(&self, store: &ChannelStore) -> bool {
        match (store.channel(CAL_SLOT), store.channel(OUTPUT_SLOT)) {
            (Some(cal), Some(out)) => store.has_response(OUTPUT_SLOT) && cal.len() == out.len(),
            _ => false,
        }
    }

    fn bind(&mut self, store: &ChannelStore) -> Result<(), CalError> {
        let checked = self.bound_data(store);
        self.outcome = None;
        self.data = None;
        self.data = Some(self.lifecycle.bind_checked(checked)?);
        Ok(())
    }

    fn run(&mut self) -> Result<ResponseFitSummary, CalError> {
        self.lifecycle.begin_run()?;
        let result = match &self.data {
            Some(data) => fit_response(data, &self.config),
            None => Err(CalError::InvalidState("no data bound".to_string())),
        };
        let result = result.map(|outcome| {
            let summary = outcome.summary();
            self.outcome = Some(outcome);
            summary
        });
        self.lifecycle.finish(result)
    }

    fn state(&self) -> ExperimentState {
        self.lifecycle.state()
    }
}

fn fit_response(data: &BoundData, config: &ResponseFitConfig) -> Result<ResponseFitOutcome, CalError> {
    let interval = data.cal.interval();
    let nyquist = 0.5 / interval;

    let cross = cross_power(data.cal.samples(), data.out.samples(), interval, &config.welch)?;
    let auto = power(data.cal.samples(), interval, &config.welch)?;
    let psd_len = cross.len();
    let estimate = divide(&cross, &auto)?;

    let norm_freq = config.normalization_frequency();
    let norm_bin = estimate
        .nearest_bin(norm_freq)
        .ok_or_else(|| CalError::InsufficientData("empty spectral estimate".to_string()))?;
    let norm_bin_freq = estimate.frequencies[norm_bin];
    let normalized = normalize_at(&estimate, norm_bin_freq)?;
    let smoothed_full = smooth(&normalized, config.smoothing_octaves);

    let band_hz = config.band(nyquist);
    let measured = trim(&normalized, band_hz.0, band_hz.1);
    let smoothed = trim(&smoothed_full, band_hz.0, band_hz.1);
    let target = if config.fit_smoothed { &smoothed } else { &measured };

    let selection = config.selection(nyquist);
    let initial_model = (*data.response).clone();
    if initial_model.free_entries(&selection) == 0 {
        return Err(CalError::InvalidInput(format!(
            "response '{}' has no free {} entries to fit",
            initial_model.name(),
            config.regime.display_name()
        )));
    }
    let x0 = initial_model.encode(&selection);
    if 2 * target.len() < x0.len() || target.len() < 2 {
        return Err(CalError::InsufficientData(format!(
            "{} bins in [{:.4}, {:.4}] Hz cannot constrain {} parameters",
            target.len(),
            band_hz.0,
            band_hz.1,
            x0.len()
        )));
    }

    let objective = ResponseObjective::new(target, norm_bin_freq);
    let residuals = |p: &DVector<f64>| match initial_model.decode(p.as_slice(), &selection) {
        Ok(model) => objective.residuals(&model),
        Err(_) => DVector::from_element(2 * objective.len(), f64::NAN),
    };

    let x0 = DVector::from_vec(x0);
    let initial = FitState::new(
        x0.clone(),
        objective.modeled(&initial_model),
        objective.residuals(&initial_model),
        0,
    );

    tracing::debug!(
        regime = config.regime.display_name(),
        bins = target.len(),
        params = x0.len(),
        lo = band_hz.0,
        hi = band_hz.1,
        "starting response fit"
    );
    if config.regime == FitRegime::Low {
        tracing::debug!(corner_hz = initial_model.corner_frequency(), "nominal long-period corner");
    }
    let report = minimize(&residuals, x0, &config.solver)?;
    let fitted_model = initial_model.decode(report.params.as_slice(), &selection)?;

    if report.converged {
        tracing::info!(
            regime = config.regime.display_name(),
            iterations = report.iterations,
            initial_cost = report.initial_cost,
            cost = report.cost,
            corner_hz = fitted_model.corner_frequency(),
            "response fit converged"
        );
    } else {
        tracing::warn!(
            regime = config.regime.display_name(),
            iterations = report.iterations,
            termination = ?report.termination,
            cost = report.cost,
            "response fit did not converge; keeping best parameters"
        );
    }

    let fitted = FitState::new(
        report.params.clone(),
        objective.modeled(&fitted_model),
        report.residuals.clone(),
        report.iterations,
    );

    Ok(ResponseFitOutcome {
        regime: config.regime,
        measured,
        smoothed,
        initial_model,
        fitted_model,
        initial,
        fitted,
        psd_len,
        band_hz,
        converged: report.converged,
        termination: report.termination,
    })
}

/// Measured amplitude/phase plus weights, evaluated against candidate models.
struct ResponseObjective {
    frequencies: Vec<f64>,
    norm_freq: f64,
    db: Vec<f64>,
    phase: Vec<f64>,
    amp_weight: f64,
    phase_weight: f64,
}

impl ResponseObjective {
    fn new(target: &SpectralCurve, norm_freq: f64) -> Self {
        let db: Vec<f64> = target.values.iter().map(|&v| amplitude_db(v)).collect();
        let phase = unwrapped_phase_degrees(&target.values);
        Self {
            frequencies: target.frequencies.clone(),
            norm_freq,
            amp_weight: reciprocal_of_peak(&db),
            phase_weight: reciprocal_of_peak(&phase),
            db,
            phase,
        }
    }

    fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// Model curve scaled to unit amplitude at the normalization bin.
    fn modeled(&self, model: &TransferFunctionModel) -> SpectralCurve {
        let reference = model.evaluate(self.norm_freq).norm();
        let scale = if reference > 0.0 && reference.is_finite() {
            1.0 / reference
        } else {
            1.0
        };
        SpectralCurve::new(
            self.frequencies.clone(),
            self.frequencies.iter().map(|&f| model.evaluate(f) * scale).collect(),
        )
    }

    fn residuals(&self, model: &TransferFunctionModel) -> DVector<f64> {
        let modeled = self.modeled(model);
        let mut phase = unwrapped_phase_degrees(&modeled.values);
        if let Some(&reference) = self.phase.first() {
            align_to(&mut phase, reference, 360.0);
        }

        let mut out = DVector::zeros(2 * self.len());
        for (i, v) in modeled.values.iter().enumerate() {
            out[2 * i] = self.amp_weight * (amplitude_db(*v) - self.db[i]);
            out[2 * i + 1] = self.phase_weight * (phase[i] - self.phase[i]);
        }
        out
    }
}

fn reciprocal_of_peak(values: &[f64]) -> f64 {
    let peak = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak > 0.0 && peak.is_finite() { 1.0 / peak } else { 1.0 }
}
