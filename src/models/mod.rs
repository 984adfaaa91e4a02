//! Parametric models the solver can fit.
//!
//! Models are immutable values so that fitting code can build trial instances
//! freely while the starting model stays untouched.

pub mod response;
pub mod rotation;

pub use response::*;
pub use rotation::*;
