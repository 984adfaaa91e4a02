//! Domain types used throughout the calibration pipeline.
//!
//! This module defines:
//!
//! - the frequency-regime flag that selects which pole group a fit moves
//! - spectral curves (frequency grid + complex values)
//! - fit state records and serializable run summaries

pub mod types;

pub use types::*;
