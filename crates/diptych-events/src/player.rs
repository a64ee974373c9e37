#![forbid(unsafe_code)]

use diptych_core::{FaultKind, SourceId};

/// Host-facing events, delivered in occurrence order.
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    /// Emitted after every successful append into the playback sink.
    BufferUpdate {
        video_ranges: Vec<(f64, f64)>,
        audio_ranges: Vec<(f64, f64)>,
    },
    /// Emitted during the audio switch protocol.
    ActiveSourceChanged { source: SourceId },
    /// Emitted whenever the sink reports a time change.
    TimeUpdate { current_time_s: f64 },
    /// Terminal failure surfaced to the user.
    Error { kind: FaultKind, message: String },
}
