//! Channel snapshots and the response catalog experiments draw from.

pub mod catalog;
pub mod channel;
pub mod snapshot;

pub use catalog::*;
pub use channel::*;
pub use snapshot::*;
