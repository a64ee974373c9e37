#![forbid(unsafe_code)]

//! Per-source stream management.
//!
//! One [`StreamPipeline`] task per source: consumes segment records,
//! drives the two demuxers, configures decoders when track parameters
//! arrive, feeds encoded units under the decoder back-pressure rule, and
//! delivers raw frames into bounded queues owned by the compositor side.

mod pipeline;

pub use pipeline::{StreamConfig, StreamHandles, StreamPipeline};
