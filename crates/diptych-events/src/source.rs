#![forbid(unsafe_code)]

use std::time::Duration;

use diptych_core::{SourceId, TrackKind};

/// Events emitted by the per-source segment producers.
#[derive(Clone, Debug)]
pub enum SourceEvent {
    /// Segment fetch started.
    SegmentStart {
        source: SourceId,
        track: TrackKind,
        segment_index: usize,
    },
    /// Segment fetch completed.
    SegmentComplete {
        source: SourceId,
        track: TrackKind,
        segment_index: usize,
        bytes_transferred: u64,
        duration: Duration,
    },
    /// Transport gave up after the retry; this source stops producing.
    Degraded { source: SourceId, error: String },
    /// All segments of this source have been emitted.
    EndOfStream { source: SourceId },
}
