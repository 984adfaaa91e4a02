//! Sine calibration: frequency and amplitude ratio of a single-tone drive.
//!
//! The calibration channel is fit with `a·sin 2πft + b·cos 2πft + c`, `f`
//! included as a free parameter seeded from the spectral peak. The output
//! channel is then fit linearly at the same frequency, and the reported ratio
//! is calibration amplitude over output amplitude.

use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::domain::SineFitSummary;
use crate::error::CalError;
use crate::fit::experiment::{require_data, Experiment, ExperimentState, Lifecycle};
use crate::math::spectral::power;
use crate::math::{minimize, solve_least_squares, SolverOptions, WelchConfig};
use crate::store::{Channel, ChannelStore};

pub const CAL_SLOT: usize = 0;
pub const OUTPUT_SLOT: usize = 1;

/// Linear sinusoid fit at a fixed frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineComponents {
    pub sin: f64,
    pub cos: f64,
    pub offset: f64,
}

impl SineComponents {
    pub fn amplitude(&self) -> f64 {
        self.sin.hypot(self.cos)
    }

    /// Phase (radians) of the equivalent `A·sin(2πft + φ)`.
    pub fn phase(&self) -> f64 {
        self.cos.atan2(self.sin)
    }
}

#[derive(Debug, Clone)]
pub struct SineOutcome {
    pub initial_frequency_hz: f64,
    pub frequency_hz: f64,
    pub cal: SineComponents,
    pub out: SineComponents,
    pub converged: bool,
}

impl SineOutcome {
    pub fn ratio(&self) -> f64 {
        self.cal.amplitude() / self.out.amplitude()
    }

    pub fn summary(&self) -> SineFitSummary {
        SineFitSummary {
            frequency_hz: self.frequency_hz,
            cal_amplitude: self.cal.amplitude(),
            out_amplitude: self.out.amplitude(),
            ratio: self.ratio(),
            converged: self.converged,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SineExperiment {
    solver: SolverOptions,
    lifecycle: Lifecycle,
    data: Option<(Arc<Channel>, Arc<Channel>)>,
    outcome: Option<SineOutcome>,
}

impl SineExperiment {
    pub fn new(solver: SolverOptions) -> Self {
        Self {
            solver,
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> Option<&SineOutcome> {
        self.outcome.as_ref()
    }

    fn bound_data(&self, store: &ChannelStore) -> Result<(Arc<Channel>, Arc<Channel>), CalError> {
        require_data(self, store)?;
        let cal = store.aligned_channel(CAL_SLOT)?;
        let out = store.aligned_channel(OUTPUT_SLOT)?;
        if (cal.interval() - out.interval()).abs() > 1e-9 * cal.interval() {
            return Err(CalError::ChannelMismatch(
                "sine channels have different sample intervals".to_string(),
            ));
        }
        Ok((cal, out))
    }
}

impl Experiment for SineExperiment {
    type Summary = SineFitSummary;

    fn name(&self) -> &'static str {
        "sine"
    }

    fn has_enough_data(&self, store: &ChannelStore) -> bool {
        match (store.channel(CAL_SLOT), store.channel(OUTPUT_SLOT)) {
            (Some(cal), Some(out)) => cal.len() == out.len(),
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

    fn run(&mut self) -> Result<SineFitSummary, CalError> {
        self.lifecycle.begin_run()?;
        let result = match &self.data {
            Some((cal, out)) => fit_sine(cal.samples(), out.samples(), cal.interval(), &self.solver),
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

pub fn fit_sine(cal: &[f64], out: &[f64], interval: f64, solver: &SolverOptions) -> Result<SineOutcome, CalError> {
    if cal.len() != out.len() {
        return Err(CalError::ChannelMismatch(format!(
            "sine channels differ in length ({} vs {})",
            cal.len(),
            out.len()
        )));
    }

    let f0 = peak_frequency(cal, interval)?;
    let seed = fit_components(cal, interval, f0)?;

    let times: Vec<f64> = (0..cal.len()).map(|i| i as f64 * interval).collect();
    let residuals = |p: &DVector<f64>| {
        let w = 2.0 * PI * p[3];
        DVector::from_iterator(
            cal.len(),
            cal.iter().zip(&times).map(|(&x, &t)| {
                let (s, c) = (w * t).sin_cos();
                x - (p[0] * s + p[1] * c + p[2])
            }),
        )
    };
    let x0 = DVector::from_vec(vec![seed.sin, seed.cos, seed.offset, f0]);
    let report = minimize(&residuals, x0, solver)?;

    let frequency_hz = report.params[3];
    let cal_components = SineComponents {
        sin: report.params[0],
        cos: report.params[1],
        offset: report.params[2],
    };
    let out_components = fit_components(out, interval, frequency_hz)?;
    if out_components.amplitude() == 0.0 {
        return Err(CalError::NumericalFailure(format!(
            "output channel has no energy at {frequency_hz:.6} Hz"
        )));
    }

    if report.converged {
        tracing::info!(initial_hz = f0, frequency_hz, iterations = report.iterations, "sine fit converged");
    } else {
        tracing::warn!(termination = ?report.termination, frequency_hz, "sine fit did not converge");
    }

    Ok(SineOutcome {
        initial_frequency_hz: f0,
        frequency_hz,
        cal: cal_components,
        out: out_components,
        converged: report.converged,
    })
}

/// Peak of the calibration power spectrum, refined by a parabola through the
/// log-power of the peak bin and its neighbours.
fn peak_frequency(x: &[f64], interval: f64) -> Result<f64, CalError> {
    if x.len() < 4 {
        return Err(CalError::InsufficientData(format!(
            "{} samples is too short for a sine fit",
            x.len()
        )));
    }
    let config = WelchConfig {
        segment_len: Some(1usize << x.len().ilog2()),
        ..WelchConfig::default()
    };
    let psd = power(x, interval, &config)?;
    let db: Vec<f64> = psd.values.iter().map(|v| v.re.max(f64::MIN_POSITIVE).ln()).collect();

    let peak = (1..db.len())
        .max_by(|&a, &b| db[a].partial_cmp(&db[b]).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| CalError::InsufficientData("empty spectrum".to_string()))?;

    let offset = if peak + 1 < db.len() && peak > 1 {
        let (l, c, r) = (db[peak - 1], db[peak], db[peak + 1]);
        let denom = l - 2.0 * c + r;
        if denom < 0.0 { 0.5 * (l - r) / denom } else { 0.0 }
    } else {
        0.0
    };
    Ok((peak as f64 + offset.clamp(-0.5, 0.5)) * psd.resolution())
}

/// Least-squares `a·sin + b·cos + c` at a fixed frequency.
pub fn fit_components(x: &[f64], interval: f64, freq_hz: f64) -> Result<SineComponents, CalError> {
    let w = 2.0 * PI * freq_hz;
    let design = DMatrix::from_fn(x.len(), 3, |i, j| {
        let t = i as f64 * interval;
        match j {
            0 => (w * t).sin(),
            1 => (w * t).cos(),
            _ => 1.0,
        }
    });
    let beta = solve_least_squares(&design, &DVector::from_column_slice(x)).ok_or_else(|| {
        CalError::NumericalFailure(format!("sinusoid least squares failed at {freq_hz:.6} Hz"))
    })?;
    Ok(SineComponents {
        sin: beta[0],
        cos: beta[1],
        offset: beta[2],
    })
}
