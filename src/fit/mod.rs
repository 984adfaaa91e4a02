//! Calibration experiments.
//!
//! Responsibilities:
//!
//! - shared lifecycle (`Unconfigured → DataBound → Fitting → Fitted | Failed`)
//! - random-calibration response fit (low or high pole group)
//! - orthogonality (relative azimuth) fit of a horizontal pair
//! - sine calibration (frequency + amplitude ratio)

pub mod experiment;
pub mod orthogonal;
pub mod response;
pub mod sine;

pub use experiment::{Experiment, ExperimentState, Lifecycle};
pub use orthogonal::{OrthogonalExperiment, OrthogonalOutcome};
pub use response::{ResponseExperiment, ResponseFitConfig, ResponseFitOutcome};
pub use sine::{SineExperiment, SineOutcome};
