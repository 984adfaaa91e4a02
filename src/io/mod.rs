//! Input/output helpers.
//!
//! - single-column sample CSVs (`samples`)
//! - response model JSON (`response`)
//! - result exports (`export`)

pub mod export;
pub mod response;
pub mod samples;

pub use export::*;
pub use response::*;
pub use samples::*;
