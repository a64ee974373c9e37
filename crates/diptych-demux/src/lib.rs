#![forbid(unsafe_code)]

//! Push-based fragmented-MP4 demuxing.
//!
//! One [`Demuxer`] per (source, track). Byte ranges are appended with a
//! running file offset; the demuxer consumes complete top-level boxes,
//! emits [`DemuxEvent::Ready`] once the init segment is parsed, then
//! [`DemuxEvent::Samples`] batches of encoded access units with
//! microsecond presentation timestamps.

mod boxes;
mod demuxer;
mod error;
mod esds;
mod fragment;
mod init;
mod params;
mod unit;

pub mod test_support;

pub use demuxer::{DemuxEvent, Demuxer};
pub use error::{DemuxError, DemuxResult};
pub use esds::audio_specific_config;
pub use params::{AudioParams, TrackParams, VideoParams};
pub use unit::EncodedUnit;
