//! `sensor-cal` library crate.
//!
//! The binary (`scal`) is a thin wrapper around this library so that:
//!
//! - spectral estimation and fitting are testable without spawning processes
//! - experiments can be driven from other front-ends or notebooks
//! - the solver and models stay reusable outside the CLI

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod store;
