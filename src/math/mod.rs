//! Numerical building blocks: spectra, windows, phase helpers, least squares
//! and the nonlinear solver.

pub mod ols;
pub mod phase;
pub mod solver;
pub mod spectral;
pub mod window;

pub use ols::*;
pub use solver::{minimize, ComplexResidual, JacobianKind, ResidualFunction, SolveReport, SolverOptions, Termination};
pub use spectral::WelchConfig;
pub use window::WindowKind;
