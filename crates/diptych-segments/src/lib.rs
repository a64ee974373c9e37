#![forbid(unsafe_code)]

//! Per-source segment production.
//!
//! Consumes a resolved [`SourceManifest`] and turns it into an ordered
//! stream of [`SegmentRecord`]s: video init, audio init, then media
//! segments per track in ascending pts. A bounded ready-queue per track
//! (capacity [`diptych_core::consts::SEGMENT_PREFETCH`]) provides the
//! prefetch window; a 100 ms tick re-checks for room while the queue is
//! full.

mod error;
mod manifest;
mod producer;
mod record;

pub use error::{SegmentsError, SegmentsResult};
pub use manifest::{ManifestSource, SegmentEntry, SourceManifest};
pub use producer::{ProducerHandles, SegmentProducer};
pub use record::SegmentRecord;
