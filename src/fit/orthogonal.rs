//! Relative orientation of two horizontal axes.
//!
//! Two reference channels (north, east) define the frame. Each test axis is
//! modeled as the reference pair rotated by an unknown azimuth `θ`:
//!
//! `test ≈ east·sin θ + north·cos θ`
//!
//! The closed-form projection `atan2(Σ test·E, Σ test·N)` gives the starting
//! angle, which the solver then refines. The reported fit angle is the
//! separation between the two test azimuths folded into `[0°, 180°]`; a
//! perfectly orthogonal pair gives 90°.

use std::sync::Arc;

use nalgebra::DVector;

use crate::domain::OrthogonalFitSummary;
use crate::error::CalError;
use crate::fit::experiment::{require_data, Experiment, ExperimentState, Lifecycle};
use crate::math::{minimize, SolverOptions};
use crate::models::{rotate_signal, wrap_degrees};
use crate::store::{Channel, ChannelStore};

pub const REF_NORTH_SLOT: usize = 0;
pub const REF_EAST_SLOT: usize = 1;
pub const TEST_AXIS_1_SLOT: usize = 2;
pub const TEST_AXIS_2_SLOT: usize = 3;

const SLOTS: [usize; 4] = [REF_NORTH_SLOT, REF_EAST_SLOT, TEST_AXIS_1_SLOT, TEST_AXIS_2_SLOT];

/// Fit of one test axis against the reference pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisFit {
    pub initial_azimuth_deg: f64,
    pub azimuth_deg: f64,
    pub cost: f64,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct OrthogonalOutcome {
    pub axis_1: AxisFit,
    pub axis_2: AxisFit,
    pub fit_angle_deg: f64,
}

impl OrthogonalOutcome {
    pub fn summary(&self) -> OrthogonalFitSummary {
        OrthogonalFitSummary {
            fit_angle_deg: self.fit_angle_deg,
            azimuth_1_deg: self.axis_1.azimuth_deg,
            azimuth_2_deg: self.axis_2.azimuth_deg,
            converged: self.axis_1.converged && self.axis_2.converged,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrthogonalExperiment {
    solver: SolverOptions,
    lifecycle: Lifecycle,
    data: Option<[Arc<Channel>; 4]>,
    outcome: Option<OrthogonalOutcome>,
}

impl OrthogonalExperiment {
    pub fn new(solver: SolverOptions) -> Self {
        Self {
            solver,
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> Option<&OrthogonalOutcome> {
        self.outcome.as_ref()
    }

    fn bound_data(&self, store: &ChannelStore) -> Result<[Arc<Channel>; 4], CalError> {
        require_data(self, store)?;
        let channels = [
            store.aligned_channel(REF_NORTH_SLOT)?,
            store.aligned_channel(REF_EAST_SLOT)?,
            store.aligned_channel(TEST_AXIS_1_SLOT)?,
            store.aligned_channel(TEST_AXIS_2_SLOT)?,
        ];
        let interval = channels[0].interval();
        if channels
            .iter()
            .any(|c| (c.interval() - interval).abs() > 1e-9 * interval)
        {
            return Err(CalError::ChannelMismatch(
                "orthogonality channels have different sample intervals".to_string(),
            ));
        }
        Ok(channels)
    }
}

impl Experiment for OrthogonalExperiment {
    type Summary = OrthogonalFitSummary;

    fn name(&self) -> &'static str {
        "orthogonal"
    }

    fn has_enough_data(&self, store: &ChannelStore) -> bool {
        let lens: Option<Vec<usize>> = SLOTS.iter().map(|&i| store.channel(i).map(|c| c.len())).collect();
        lens.is_some_and(|lens| lens.iter().all(|&l| l == lens[0]))
    }

    fn bind(&mut self, store: &ChannelStore) -> Result<(), CalError> {
        let checked = self.bound_data(store);
        self.outcome = None;
        self.data = None;
        self.data = Some(self.lifecycle.bind_checked(checked)?);
        Ok(())
    }

    fn run(&mut self) -> Result<OrthogonalFitSummary, CalError> {
        self.lifecycle.begin_run()?;
        let result = match &self.data {
            Some([north, east, axis_1, axis_2]) => {
                fit_orthogonality(north.samples(), east.samples(), axis_1.samples(), axis_2.samples(), &self.solver)
            }
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

/// Fit both test axes and the angle between them.
pub fn fit_orthogonality(
    north: &[f64],
    east: &[f64],
    axis_1: &[f64],
    axis_2: &[f64],
    solver: &SolverOptions,
) -> Result<OrthogonalOutcome, CalError> {
    let axis_1 = fit_axis(north, east, axis_1, solver)?;
    let axis_2 = fit_axis(north, east, axis_2, solver)?;

    let mut fit_angle_deg = wrap_degrees(axis_2.azimuth_deg - axis_1.azimuth_deg);
    if fit_angle_deg > 180.0 {
        fit_angle_deg = 360.0 - fit_angle_deg;
    }

    tracing::info!(
        fit_angle_deg,
        azimuth_1_deg = axis_1.azimuth_deg,
        azimuth_2_deg = axis_2.azimuth_deg,
        "orthogonality fit complete"
    );

    Ok(OrthogonalOutcome {
        axis_1,
        axis_2,
        fit_angle_deg,
    })
}

/// Azimuth of `test` relative to the `(north, east)` frame.
pub fn fit_axis(north: &[f64], east: &[f64], test: &[f64], solver: &SolverOptions) -> Result<AxisFit, CalError> {
    if north.len() != east.len() || north.len() != test.len() {
        return Err(CalError::ChannelMismatch(format!(
            "rotation inputs differ in length ({}, {}, {})",
            north.len(),
            east.len(),
            test.len()
        )));
    }
    if north.is_empty() {
        return Err(CalError::InsufficientData("no samples to rotate".to_string()));
    }

    let along_north: f64 = test.iter().zip(north).map(|(t, n)| t * n).sum();
    let along_east: f64 = test.iter().zip(east).map(|(t, e)| t * e).sum();
    let theta0 = along_east.atan2(along_north);

    let residuals = |p: &DVector<f64>| {
        let rotated = rotate_signal(east, north, p[0]);
        DVector::from_iterator(test.len(), test.iter().zip(rotated).map(|(t, r)| t - r))
    };
    let report = minimize(&residuals, DVector::from_element(1, theta0), solver)?;
    if !report.converged {
        tracing::warn!(termination = ?report.termination, "axis rotation fit did not converge");
    }

    Ok(AxisFit {
        initial_azimuth_deg: wrap_degrees(theta0.to_degrees()),
        azimuth_deg: wrap_degrees(report.params[0].to_degrees()),
        cost: report.cost,
        converged: report.converged,
    })
}
