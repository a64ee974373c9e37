#![forbid(unsafe_code)]

//! Playback sink seam and the back-pressured feeder in front of it.
//!
//! The sink is modeled on browser Media Source source buffers: appends
//! are asynchronous (`updating` / `updateend`), removals likewise, and
//! the playhead advances independently. The [`SinkFeeder`] owns all
//! sequencing against that contract.

mod error;
mod feeder;
mod traits;

pub mod mock;

pub use error::{SinkError, SinkResult};
pub use feeder::{FeederCommand, FeederHandle, SinkFeeder};
pub use traits::{MediaSink, TimeRanges, TrackBuffer};
