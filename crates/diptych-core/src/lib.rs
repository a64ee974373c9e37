#![forbid(unsafe_code)]

//! Shared value types for the diptych pipeline.

mod fault;
mod geometry;
mod ids;
mod time;

pub mod consts;

pub use fault::{Fault, FaultKind};
pub use geometry::{GeometryCell, PipGeometry};
pub use ids::{SegmentKind, SourceId, TrackKind};
pub use time::{micros_to_secs, scaled_to_micros, secs_to_micros};
