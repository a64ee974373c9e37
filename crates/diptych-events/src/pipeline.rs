#![forbid(unsafe_code)]

use diptych_core::{SourceId, TrackKind};

/// Internal pipeline lifecycle events, mostly of diagnostic interest.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A demuxer delivered track parameters and the decoder was configured.
    TrackReady { source: SourceId, track: TrackKind },
    /// One track of one source was torn down; the rest continues.
    TrackClosed {
        source: SourceId,
        track: TrackKind,
        reason: String,
    },
    /// A composited frame was dropped at the encoder input.
    FrameDropped { frame_index: u64 },
    /// The compositor reached the end of both sources and terminated.
    Finished { frames_encoded: u64 },
}
