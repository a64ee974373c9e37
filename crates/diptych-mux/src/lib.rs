#![forbid(unsafe_code)]

//! Streaming WebM/Matroska muxing.
//!
//! One [`WebmMuxer`] per output track. Each accepts encoded chunks with
//! monotonic timestamps and yields container chunks suitable for a
//! `video/webm` / `audio/webm` playback sink: a header chunk first, then
//! one chunk per closed cluster.

mod ebml;
mod error;
mod webm;

pub use error::{MuxError, MuxResult};
pub use webm::{ContainerChunk, FirstTimestampBehavior, MuxTrack, MuxerConfig, WebmMuxer};
