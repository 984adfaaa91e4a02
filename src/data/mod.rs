//! Test and demo data.

pub mod synth;
